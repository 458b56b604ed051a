use std::process;

use pollbee::{
    config::{executor::SourceKind, Config},
    core::{
        error::ExecutorError,
        executor::{Executor, StopReason},
        lifecycle::Lifecycle,
        sinks::ConsoleSink,
        sources::{RandomSource, Uptime, UptimeSource},
        traits::{Sample, Sink, Source},
    },
    logger::LoggerManager,
    print_error, signals,
};
use tokio::task::JoinError;
use tracing::{debug, error, info};

/// Exit status when the failure budget stopped the executor.
const EXIT_BUDGET_EXHAUSTED: i32 = 2;

fn log_sinks_table(sinks: &[(&str, bool)]) {
    let width = sinks
        .iter()
        .map(|(name, _)| name.len())
        .max()
        .unwrap_or(4)
        .max("Sink".len());

    info!("{:<width$} | Status", "Sink", width = width);
    info!("{}-+-{}", "-".repeat(width), "-".repeat(8));
    for (name, enabled) in sinks {
        let status = if *enabled { "ENABLED" } else { "DISABLED" };
        info!("{:<width$} | {}", name, status, width = width);
    }
}

fn build_sinks<S: Sample>(cfg: &Config) -> Vec<Box<dyn Sink<S>>> {
    let mut sinks: Vec<Box<dyn Sink<S>>> = Vec::new();
    #[allow(unused_mut)]
    let mut table = vec![("console", cfg.console.enabled)];

    if cfg.console.enabled {
        sinks.push(Box::new(ConsoleSink::<S>::new()));
    }

    #[cfg(feature = "http-dashboard")]
    {
        use pollbee::core::{cache::MemoryCache, sinks::DashboardSink};

        table.push(("http", cfg.http.enabled));
        if cfg.http.enabled {
            let cache = MemoryCache::new(cfg.cache.retention());
            sinks.push(Box::new(DashboardSink::new(cfg.http.clone(), cache)));
        }
    }

    #[cfg(feature = "pollbee-mqtt")]
    {
        use pollbee::core::sinks::MqttSink;

        table.push(("mqtt", cfg.mqtt.enabled));
        if cfg.mqtt.enabled {
            sinks.push(Box::new(MqttSink::<S>::new(cfg.mqtt.clone())));
        }
    }

    log_sinks_table(&table);
    sinks
}

fn exit_code(result: Result<Result<StopReason, ExecutorError>, JoinError>) -> i32 {
    match result {
        Ok(Ok(StopReason::Cancelled)) => {
            info!("Shutdown complete");
            0
        }
        Ok(Ok(StopReason::FailureBudgetExhausted { failures })) => {
            error!(
                "Failure budget exhausted after {} consecutive failures, exiting",
                failures
            );
            EXIT_BUDGET_EXHAUSTED
        }
        Ok(Err(e)) => {
            error!("{}", e);
            1
        }
        Err(e) => {
            error!("Executor task failed: {}", e);
            1
        }
    }
}

/// Runs one deployment to completion and returns the process exit status.
async fn launch<S: Sample>(cfg: &Config, lifecycle: Lifecycle, source: Box<dyn Source<S>>) -> i32 {
    let sinks = build_sinks::<S>(cfg);
    let mut executor = Executor::new(
        cfg.executor.name.clone(),
        &cfg.executor,
        lifecycle.clone(),
        source,
        sinks,
    );

    let mut run = tokio::spawn(async move { executor.run().await });
    tokio::spawn(signals::route_shutdown(lifecycle.clone()));
    tokio::spawn(signals::route_diagnostics(lifecycle.clone()));

    tokio::select! {
        result = &mut run => exit_code(result),
        _ = lifecycle.cancelled() => {
            let grace = cfg.executor.grace_period();
            debug!("Waiting up to {:?} for the executor to stop", grace);
            match tokio::time::timeout(grace, &mut run).await {
                Ok(result) => exit_code(result),
                Err(_) => {
                    error!(
                        "Executor did not stop within {}s (state: {}), exiting",
                        grace.as_secs(),
                        lifecycle.state()
                    );
                    1
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let cfg = Config::new().unwrap_or_else(|e| {
        print_error!("{}", e);
        process::exit(1);
    });

    let mut logger_manager = LoggerManager::new(cfg.logger.clone(), cfg.executor.debug)
        .unwrap_or_else(|e| {
            print_error!("Failed to setup Log Manager: {}", e);
            process::exit(1);
        });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });

    info!("Starting pollbee version {}...", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", logger_manager.level());
    debug!("{:#?}", cfg.executor);

    let lifecycle = Lifecycle::new();
    let code = match cfg.source.kind {
        SourceKind::Random => {
            launch::<f64>(&cfg, lifecycle, Box::new(RandomSource::new(cfg.source.seed))).await
        }
        SourceKind::Uptime => {
            launch::<Uptime>(&cfg, lifecycle, Box::new(UptimeSource::new())).await
        }
    };

    process::exit(code);
}
