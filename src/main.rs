use d_confsync::gather_metrics;
use d_confsync::ConfigLoader;
use d_confsync::Result;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    init_observability();

    // Optional settings file, otherwise CONFIG_PATH or ./service.conf
    let config_file = std::env::args().nth(1);
    let mut loader = ConfigLoader::load(config_file.as_deref()).await?;
    info!(
        service = %loader.settings().service_path(),
        remote = loader.is_remote(),
        keys = loader.store().snapshot().len(),
        "configuration loaded"
    );

    let (graceful_tx, mut graceful_rx) = watch::channel(());
    tokio::spawn(async {
        if let Err(e) = graceful_shutdown(graceful_tx).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    let mut events = loader.subscribe();
    loop {
        tokio::select! {
            _ = graceful_rx.changed() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    let store = loader.store();
                    for key in &event.keys {
                        info!(path = %event.path, key = %key, value = %store.get(key, ""), "config changed");
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "config events dropped"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    loader.shutdown().await;
    debug!("final metrics:\n{}", gather_metrics());
    info!("Exiting program.");
    Ok(())
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| d_confsync::Error::Fatal(format!("SIGINT handler: {e}")))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| d_confsync::Error::Fatal(format!("SIGTERM handler: {e}")))?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }

    graceful_tx.send(()).map_err(|e| {
        error!("Failed to send shutdown signal: {}", e);
        d_confsync::Error::Fatal(format!("Failed to send shutdown signal: {}", e))
    })?;

    info!("Shutdown signal sent");
    Ok(())
}

fn init_observability() {
    let base_subscriber = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();
}
