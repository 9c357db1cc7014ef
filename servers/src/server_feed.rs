use anyhow::Result;
use lib_feed::loggers::setup_logging;
use lib_feed::FeedClient;
use tokio::signal;
use tokio_util::sync::CancellationToken;

mod feed_logic;
use feed_logic::{config, consumer};

async fn wait_for_shutdown_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Could not install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = config::load_config()?;
    let log_path = setup_logging("server_feed", &config.log_dir(), config.log_level())?;
    log::info!("Logging to {}", log_path.display());

    let client = FeedClient::new(config.feed_config())?;
    log::info!("Score feed consumer starting against {}", client.url());

    let shutdown = CancellationToken::new();
    let consumer_handle = tokio::spawn(consumer::run(
        client,
        consumer::Backoff::from_config(&config),
        shutdown.clone(),
    ));

    wait_for_shutdown_signal().await;

    // Cancelling ends the active iteration; the consumer returns after teardown.
    shutdown.cancel();
    consumer_handle.await??;

    log::info!("Shutdown complete.");
    Ok(())
}
