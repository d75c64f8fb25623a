use std::sync::Arc;

use clap::Parser;
use net_monitoring::{
    actors::{LogListener, NotifierHandle, Scheduler, SchedulerHandle, TransitionListener},
    clock::SystemClock,
    config::read_config_file,
    engine::Engine,
    probe::ProberSet,
    storage::open_store,
    util::{apply_db_path, get_config_path, get_db_path},
};
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (defaults to $NETMON_CONFIG or ./config.json)
    #[arg(short)]
    file: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = filter::Targets::new()
        .with_targets(vec![("net_monitoring", level), ("netmon_engine", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let config_path = args.file.unwrap_or_else(get_config_path);
    let config = read_config_file(&config_path)?;
    let targets = config.resolve_targets()?;
    let storage = apply_db_path(config.storage.clone(), get_db_path());

    let store = open_store(&storage).await?;
    let engine = Arc::new(Engine::open(config.engine.clone(), targets, store).await?);
    info!(
        "monitoring {} targets from {config_path}",
        engine.registry().len()
    );

    let listeners: Vec<Arc<dyn TransitionListener>> = vec![Arc::new(LogListener)];
    let notifier = NotifierHandle::spawn(engine.subscribe(), listeners);

    let probers = ProberSet::from_config(engine.config());
    let scheduler = Arc::new(Scheduler::new(
        engine.clone(),
        probers,
        Arc::new(SystemClock),
    ));
    let scheduler = SchedulerHandle::spawn(scheduler, storage.retention_days());

    wait_for_shutdown(&engine, &config_path).await;

    info!("shutting down");
    if let Err(e) = scheduler.shutdown().await {
        error!("scheduler did not stop cleanly: {e:#}");
    }
    if let Err(e) = notifier.shutdown().await {
        error!("notifier did not stop cleanly: {e:#}");
    }
    engine.close().await?;

    Ok(())
}

/// Re-read the target list; engine tuning requires a restart
fn reload(engine: &Engine, config_path: &str) {
    let targets = read_config_file(config_path).and_then(|config| config.resolve_targets());
    match targets {
        Ok(targets) => {
            info!("reloaded {} targets from {config_path}", targets.len());
            engine.reload_targets(targets);
        }
        Err(e) => warn!("keeping current targets, reload failed: {e:#}"),
    }
}

#[cfg(unix)]
async fn wait_for_shutdown(engine: &Engine, config_path: &str) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!("SIGHUP reload unavailable: {e}");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for ctrl-c: {e}");
            }
            return;
        }
    };

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("failed to listen for ctrl-c: {e}");
                }
                return;
            }
            Some(()) = hangup.recv() => reload(engine, config_path),
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_engine: &Engine, _config_path: &str) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {e}");
    }
}
