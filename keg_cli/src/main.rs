mod cli;
mod commands;
mod error_fmt;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::{Result, WrapErr};
use keg_config::Config;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    let _ = color_eyre::install();

    if let Err(err) = run(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&err));
        } else {
            eprintln!("{}", humanize(&err));
        }
        tracing::error!(error = %format!("{err:#}"), "command failed");
        std::process::exit(exit_code_for_error(&err));
    }
}

fn load_config(path: &Path, calibration_override: Option<&Path>) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let mut cfg = keg_config::load_toml(&text)
        .wrap_err_with(|| format!("parse config {}", path.display()))?;
    if let Some(p) = calibration_override {
        cfg.calibration.path = p.display().to_string();
    }
    cfg.validate()?;
    Ok(cfg)
}

fn init_tracing(cli: &Cli, cfg: &Config) {
    let level = cli
        .log_level
        .clone()
        .or_else(|| cfg.logging.level.clone())
        .unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    // stdout carries readings; logs go to stderr
    let json_layer = cli
        .json
        .then(|| fmt::layer().json().with_writer(std::io::stderr));
    let pretty_layer = (!cli.json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    let file_layer = cfg.logging.file.as_deref().map(|file| {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .map_or_else(|| "kegscale.log".into(), |n| n.to_string_lossy().into_owned());
        let appender = match cfg.logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, &name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, &name),
            _ => tracing_appender::rolling::never(dir, &name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        fmt::layer().json().with_ansi(false).with_writer(writer)
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(pretty_layer)
        .with(file_layer)
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    let cfg = load_config(&cli.config, cli.calibration.as_deref())?;
    init_tracing(&cli, &cfg);
    tracing::debug!(config = %cli.config.display(), "config loaded");

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
            tracing::warn!(error = %e, "could not install Ctrl-C handler");
        }
    }

    match &cli.cmd {
        Commands::Monitor {
            source,
            max_frames,
            direct,
        } => commands::monitor(&cfg, source, *max_frames, *direct, cli.json, &shutdown),
        Commands::Calibrate {
            known,
            key,
            from_csv,
            sim_loaded,
            yes,
            source,
        } => commands::calibrate(
            &cfg,
            *known,
            key.clone(),
            from_csv.as_deref(),
            *sim_loaded,
            *yes,
            source,
            cli.json,
            &shutdown,
        ),
        Commands::Tare {
            clear,
            max_frames,
            source,
        } => commands::tare(&cfg, *clear, *max_frames, source, cli.json, &shutdown),
        Commands::Decode { hex } => commands::decode(&cfg, hex, cli.json),
        Commands::SelfCheck => commands::self_check(&cfg, cli.json),
    }
}
