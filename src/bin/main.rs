use std::{
    error::Error,
    sync::{Arc, atomic::{AtomicBool, Ordering}},
};

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chartsup::{
    charts::ChartCache,
    cli::{Cli, Commands, parse_args},
    config::{ProviderConfig, load_config},
    constants::list_url,
    launch::build_command_line,
    probe::{HealthProbe, HttpProbe},
    status::{FanOut, LogReporter, ProviderStatus, StatusFile, StatusReporter},
    supervisor::Supervisor,
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    match args.command {
        Commands::Run { config } => run(config.as_deref())?,
        Commands::Check { config } => {
            let resolved = load_config(config.as_deref())?.resolve()?;
            let command_line = build_command_line(&resolved, std::process::id())?;
            println!("{}", command_line.join(" "));
        }
        Commands::Status { config } => {
            let config = load_config(config.as_deref())?;
            let file = StatusFile::in_dir(&config.expanded_config_dir());
            match file.read()? {
                Some(record) => println!(
                    "{} {} (supervisor pid {}, updated {})",
                    record.status,
                    record.detail,
                    record.pid,
                    record.updated_at.to_rfc3339()
                ),
                None => println!("no status recorded at {}", file.path().display()),
            }
        }
        Commands::Charts { config, host } => {
            let resolved = load_config(config.as_deref())?.resolve()?;
            let probe = HttpProbe::new(list_url(resolved.port), resolved.timing.probe_timeout)?;
            let cache = ChartCache::new();
            cache.replace(probe.probe()?);
            println!("{}", serde_json::to_string_pretty(&cache.list_charts(&host))?);
        }
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Status sinks for a run: the log, plus the status file when its directory exists.
fn reporter_for(config: &ProviderConfig) -> FanOut {
    let config_dir = config.expanded_config_dir();
    let reporter = FanOut::new().with(LogReporter);
    if config_dir.is_dir() {
        reporter.with(StatusFile::in_dir(&config_dir))
    } else {
        reporter
    }
}

fn run(config_path: Option<&str>) -> Result<(), Box<dyn Error>> {
    let config = load_config(config_path)?;
    if !config.enabled {
        reporter_for(&config).report(
            ProviderStatus::Inactive,
            "module not enabled in server config",
        );
        return Ok(());
    }

    let resolved = match config.resolve() {
        Ok(resolved) => resolved,
        Err(err) => {
            error!("invalid provider configuration: {err}");
            reporter_for(&config).report(ProviderStatus::Error, &err.to_string());
            return Err(err.into());
        }
    };

    let mut supervisor = Supervisor::from_config(&resolved, Box::new(reporter_for(&config)))?;
    register_signal_handler(supervisor.shutdown_handle())?;
    info!(
        "supervising provider for {} (tag {})",
        resolved.config_dir.display(),
        supervisor.tag()
    );

    if let Err(err) = supervisor.run() {
        error!("supervisor exited with error: {err}");
        return Err(err.into());
    }
    Ok(())
}

fn register_signal_handler(shutdown: Arc<AtomicBool>) -> Result<(), Box<dyn Error>> {
    ctrlc::set_handler(move || {
        info!("shutdown requested, leaving provider running");
        shutdown.store(true, Ordering::SeqCst);
    })?;

    Ok(())
}
