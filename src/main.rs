//! Media Sorter - resumable photo and video organizer
//!
//! Moves media files into a `YYYY/MM` tree, renaming exact duplicates
//! instead of deleting them, and checkpoints every file so an interrupted
//! run can pick up where it stopped.

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use media_sorter::{
    Cli, Config, Error, Session, SessionReport, SessionStatus, install_interrupt_handler,
};
use std::path::{Path, PathBuf};
use tracing::{Level, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Exit status for fatal errors
const EXIT_FATAL: i32 = 2;

mod cli_output {
    //! Colored terminal output for the session summary

    use crossterm::{
        ExecutableCommand,
        style::{Color, Print, Stylize, style},
    };
    use std::io::stdout;

    /// CLI theme colors
    pub struct CliTheme;

    impl CliTheme {
        pub const SUCCESS: Color = Color::Green;
        pub const WARNING: Color = Color::Yellow;
        pub const ERROR: Color = Color::Red;
        pub const HINT: Color = Color::DarkGrey;
        pub const ACCENT: Color = Color::Cyan;
    }

    pub fn print_separator() {
        let _ = stdout().execute(Print(&format!("{}\n", "─".repeat(60))));
    }

    /// Print a centered title
    pub fn print_title(title: &str) {
        let width: usize = 60;
        let padding = width.saturating_sub(title.len()) / 2;
        let left_pad = " ".repeat(padding.saturating_sub(1));

        let _ = stdout().execute(Print(&format!(
            "{}{} {}{}\n",
            left_pad,
            "╔".bold().stylize(),
            title.bold().stylize(),
            "╗".bold().stylize(),
        )));
        let _ = stdout().execute(Print("\n"));
    }

    pub fn print_warning(msg: &str) {
        let _ = stdout().execute(Print(style("⚠ ").with(CliTheme::WARNING).bold()));
        let _ = stdout().execute(Print(format!("{}\n", msg)));
    }

    pub fn print_error(msg: &str) {
        let _ = stdout().execute(Print(style("✗ ").with(CliTheme::ERROR).bold()));
        let _ = stdout().execute(Print(format!("{}\n", msg)));
    }

    pub fn print_hint(msg: &str) {
        let _ = stdout().execute(Print(style("→ ").with(CliTheme::HINT)));
        let _ = stdout().execute(Print(format!("{}\n", msg)));
    }

    /// Print one counter line
    pub fn print_stat(key: &str, value: &str, color: Color) {
        let key_styled = style(key).with(CliTheme::HINT);
        let value_styled = style(value).with(color).bold();
        let _ = stdout().execute(Print("  "));
        let _ = stdout().execute(Print(key_styled));
        let _ = stdout().execute(Print(": "));
        let _ = stdout().execute(Print(value_styled));
        let _ = stdout().execute(Print("\n"));
    }

    /// Print one duplicate entry
    pub fn print_result(status_icon: &str, status_color: Color, source: &str, dest_or_msg: &str) {
        let icon_styled = style(status_icon).with(status_color).bold();
        let source_styled = style(source).italic();
        let msg_styled = style(dest_or_msg).with(CliTheme::HINT);

        let _ = stdout().execute(Print("  "));
        let _ = stdout().execute(Print(icon_styled));
        let _ = stdout().execute(Print(" "));
        let _ = stdout().execute(Print(source_styled));
        let _ = stdout().execute(Print(" "));
        let _ = stdout().execute(Print(msg_styled));
        let _ = stdout().execute(Print("\n"));
    }

    pub fn print_log_path(path: &str) {
        let _ = stdout().execute(Print("\n"));
        let _ = stdout().execute(Print(style("  📁 ").with(CliTheme::ACCENT)));
        let _ = stdout().execute(Print(style("Log file: ").with(CliTheme::HINT)));
        let _ = stdout().execute(Print(format!("{}\n", path)));
    }

    pub fn print_blank() {
        let _ = stdout().execute(Print("\n"));
    }
}

fn main() {
    let cli = Cli::parse();

    if cli.sample_config {
        print!("{}", Config::sample_config());
        return;
    }

    let code = match run_cli_mode(&cli) {
        Ok(code) => code,
        Err(e) => {
            cli_output::print_error(&format!("{:#}", e));
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

/// Run one session; returns the process exit status
///
/// The log guard lives inside this function so buffered log lines are
/// flushed before `main` exits.
fn run_cli_mode(cli: &Cli) -> Result<i32> {
    let log_dir = match &cli.log_dir {
        Some(dir) => dir.clone(),
        None => get_executable_dir()?.join("Log"),
    };
    let log_path = get_log_path(&log_dir, cli);
    let _guard = setup_logging(cli, &log_path)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Media Sorter starting");
    info!(log_file = %log_path.display(), "Log file location");

    let result = execute(cli, &log_path);
    if let Err(ref e) = result {
        error!(error = %e, "Session failed");
    }
    result
}

fn execute(cli: &Cli, log_path: &Path) -> Result<i32> {
    let config = load_config(cli)?;

    if cli.verbose {
        info!(?config, "Configuration loaded");
    }

    if let Some(ref path) = cli.write_config {
        config.save_to_file(path)?;
        info!(path = %path.display(), "Configuration written");
        cli_output::print_hint(&format!("Configuration written to {}", path.display()));
        return Ok(0);
    }

    validate_config(&config)?;

    let cancel = install_interrupt_handler()?;
    let session = Session::from_config(config, cancel);
    let report = match session.run() {
        Ok(report) => report,
        Err(Error::Aborted { source, report }) => {
            print_report(&report);
            cli_output::print_separator();
            cli_output::print_log_path(&log_path.display().to_string());
            return Err(anyhow::Error::new(*source).context("Session aborted"));
        }
        Err(e) => return Err(e.into()),
    };

    print_report(&report);
    cli_output::print_separator();
    cli_output::print_log_path(&log_path.display().to_string());

    Ok(report.status.exit_code())
}

/// Print the end-of-session summary
fn print_report(report: &SessionReport) {
    use cli_output::*;

    let title = match (report.status, report.dry_run) {
        (SessionStatus::Interrupted, _) => "Session interrupted",
        (SessionStatus::Aborted, _) => "Session aborted",
        (_, true) => "Dry run complete",
        (SessionStatus::Completed, false) => "Session complete",
        (SessionStatus::CompletedWithErrors, false) => "Session complete with errors",
    };

    print_separator();
    print_title(title);
    print_separator();

    let counters = &report.counters;
    print_blank();
    print_stat("Files found", &report.files_found.to_string(), CliTheme::ACCENT);
    if report.already_done > 0 {
        print_stat(
            "Done in earlier session",
            &report.already_done.to_string(),
            CliTheme::HINT,
        );
    }
    print_stat("Moved", &counters.moved.to_string(), CliTheme::SUCCESS);
    print_stat("Skipped", &counters.skipped.to_string(), CliTheme::WARNING);
    print_stat(
        "Duplicates",
        &counters.duplicates_found.to_string(),
        CliTheme::ACCENT,
    );
    print_stat("Errors", &counters.errors.to_string(), CliTheme::ERROR);
    print_stat(
        "Elapsed",
        &format!("{:.1}s", report.elapsed.as_secs_f64()),
        CliTheme::HINT,
    );
    print_blank();

    if !report.duplicates.is_empty() {
        print_separator();
        print_hint(&format!(
            "{} duplicate(s) renamed in place, nothing was deleted",
            report.duplicates.len()
        ));
        print_blank();
        for dup in &report.duplicates {
            print_result(
                "≡",
                CliTheme::ACCENT,
                &dup.original.display().to_string(),
                &format!("→ {} (same as {})", dup.renamed_to.display(), dup.existing.display()),
            );
        }
    }

    if report.resumed {
        print_hint("Resumed an earlier session; counters include its work");
    }

    match report.status {
        SessionStatus::Interrupted => {
            print_separator();
            print_warning("Interrupted. Run the same command again to resume.");
            if let Some(ref checkpoint) = report.checkpoint {
                print_hint(&format!("Checkpoint kept at {}", checkpoint.display()));
            }
        }
        SessionStatus::CompletedWithErrors => {
            print_separator();
            print_error(&format!(
                "{} file(s) could not be processed; see the log for details",
                counters.errors
            ));
        }
        SessionStatus::Aborted => {
            print_separator();
            print_error("Stopped by a fatal error. Counters above cover the files handled.");
            if let Some(ref checkpoint) = report.checkpoint {
                print_hint(&format!("Checkpoint kept at {}", checkpoint.display()));
            }
        }
        SessionStatus::Completed => {}
    }

    if report.dry_run {
        print_separator();
        print_warning("Dry run: no files were moved and no checkpoint was written");
    }
}

/// Get the directory where the executable is located
fn get_executable_dir() -> Result<PathBuf> {
    let exe_path = std::env::current_exe()?;
    Ok(exe_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".")))
}

/// Determine the log file path based on config file or timestamp
fn get_log_path(log_dir: &Path, cli: &Cli) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");

    if let Some(config_name) = cli.config_name() {
        let config_log_dir = log_dir.join(&config_name);
        let log_filename = format!("{}_{}.log", config_name, timestamp);
        config_log_dir.join(log_filename)
    } else {
        let log_filename = format!("CLIRun_{}.log", timestamp);
        log_dir.join(log_filename)
    }
}

/// Resolve config path - supports shorthand syntax
///
/// `-C nas` finds `nas`, `nas.toml`, or `Config/nas.toml` next to the
/// executable, in that order.
fn resolve_config_path(config_path: &Path) -> PathBuf {
    if config_path.exists() {
        return config_path.to_path_buf();
    }

    let with_extension = if config_path.extension().is_none() {
        config_path.with_extension("toml")
    } else {
        config_path.to_path_buf()
    };

    if with_extension.exists() {
        return with_extension;
    }

    if let Ok(exe_dir) = get_executable_dir() {
        let filename = config_path.file_name().unwrap_or(config_path.as_os_str());
        let mut in_config_dir = exe_dir.join("Config").join(filename);
        if in_config_dir.extension().is_none() {
            in_config_dir = in_config_dir.with_extension("toml");
        }
        if in_config_dir.exists() {
            return in_config_dir;
        }
    }

    config_path.to_path_buf()
}

/// Load configuration from file or CLI arguments
fn load_config(cli: &Cli) -> Result<Config> {
    let config = if let Some(ref config_path) = cli.config {
        let resolved_path = resolve_config_path(config_path);
        info!(config_file = %resolved_path.display(), "Loading configuration from file");
        let file_config = Config::load_from_file(&resolved_path)?;
        cli.merge_with_config(file_config)
    } else {
        cli.to_config()
    };

    Ok(config)
}

/// Setup logging (file + console)
fn setup_logging(cli: &Cli, log_path: &Path) -> Result<WorkerGuard> {
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_path)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if cli.json_log {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(non_blocking),
            )
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    Ok(guard)
}

/// Validate configuration before processing
fn validate_config(config: &Config) -> Result<()> {
    if config.source_dir.as_os_str().is_empty() {
        anyhow::bail!("No source directory given (use --source or set source_dir)");
    }
    if config.dest_dir.as_os_str().is_empty() {
        anyhow::bail!("No destination directory given (use --dest or set dest_dir)");
    }
    if config.min_year < 1 {
        anyhow::bail!("min_year must be positive, got {}", config.min_year);
    }

    if config.dest_dir.starts_with(&config.source_dir) && config.dest_dir != config.source_dir {
        warn!(
            source = %config.source_dir.display(),
            destination = %config.dest_dir.display(),
            "Destination lies inside the source; files already organized there are skipped"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn report(status: SessionStatus) -> SessionReport {
        SessionReport {
            status,
            counters: Default::default(),
            duplicates: vec![],
            dry_run: false,
            resumed: false,
            files_found: 0,
            already_done: 0,
            elapsed: Duration::from_millis(5),
            checkpoint: Some(PathBuf::from("/tmp/run.json")),
        }
    }

    #[test]
    fn test_title_wider_than_banner() {
        cli_output::print_title(&"x".repeat(80));
        cli_output::print_title("Session complete");
    }

    #[test]
    fn test_report_for_every_status() {
        for status in [
            SessionStatus::Completed,
            SessionStatus::CompletedWithErrors,
            SessionStatus::Interrupted,
            SessionStatus::Aborted,
        ] {
            print_report(&report(status));
        }
    }

    #[test]
    fn test_aborted_exit_status_matches_fatal() {
        assert_eq!(SessionStatus::Aborted.exit_code(), EXIT_FATAL);
    }
}
