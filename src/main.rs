use ffmpeg_fanout::{FanoutError, FanoutSettings, RunExit, Supervisor};
use tokio_util::sync::CancellationToken;

mod config;

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("ffmpeg_fanout", log::LevelFilter::Debug)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let config = config::load().unwrap_or_else(|e| {
        log::error!("Error loading config: {:#}", e);
        std::process::exit(1);
    });

    if !config.streaming() {
        log::info!("Streaming is disabled. Set \"streaming\": true to start streaming.");
        std::process::exit(0);
    }

    log::info!(
        "Fanning out {} to {} configured output(s)",
        config.fanout().input,
        config.fanout().targets.len()
    );

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let code = match run(config.into_fanout(), cancel).await {
        Ok(()) => 0,
        Err(FanoutError::ConfigurationEmpty) => {
            log::info!("No outputs enabled. Exiting.");
            0
        }
        Err(e) => {
            log::error!("{}", e);
            e.exit_code()
        }
    };

    std::process::exit(code);
}

async fn run(settings: FanoutSettings, cancel: CancellationToken) -> ffmpeg_fanout::Result<()> {
    let mut supervisor = Supervisor::new(settings);
    if supervisor.start_all().await? == 0 {
        return Err(FanoutError::ConfigurationEmpty);
    }

    let result = supervisor.run(cancel).await;
    if let Ok(RunExit::Interrupted) = result {
        log::info!("Stopping streams...");
    }
    supervisor.shutdown().await;
    supervisor.flush_output().await?;
    result.map(|_| ())
}

/// Ctrl-C, or SIGTERM on unix, cancels the token once.
fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {},
                        _ = sigterm.recv() => {},
                    }
                }
                Err(e) => {
                    log::warn!("SIGTERM handler unavailable: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        log::info!("Shutdown signal received");
        cancel.cancel();
    });
}
