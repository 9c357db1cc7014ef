use crate::feed_logic::config::Config;
use anyhow::Result;
use lib_feed::{Connector, FeedClient, FeedError, FeedEvent};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Exponential reconnect delay: base, doubling, capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max, current: base }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Duration::from_millis(config.reconnect_base_delay_ms.unwrap_or(1000)),
            Duration::from_millis(config.reconnect_max_delay_ms.unwrap_or(60000)),
        )
    }

    /// Returns the delay to wait now and doubles the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

/// Counters for one feed iteration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IterationStats {
    pub events: u64,
    pub message_errors: u64,
    pub connection_errors: u64,
}

fn log_event(event: &FeedEvent) {
    let score = event.score();
    log::info!(
        "{} player={} leaderboard={} score={} acc={:.4}",
        event.kind(),
        event.player_id(),
        event.leaderboard_id(),
        score.modified_score,
        score.accuracy
    );
}

fn log_error(err: &FeedError) {
    if err.is_connection_level() {
        log::error!("[{}] {}", err.kind(), err);
    } else {
        log::warn!("[{}] {}", err.kind(), err);
    }
}

/// Drains one iteration of the feed.
pub async fn consume_once<C: Connector>(
    client: &FeedClient<C>,
    cancel: CancellationToken,
) -> Result<IterationStats> {
    let mut stats = IterationStats::default();
    let mut feed = client.events(cancel)?;

    while let Some(item) = feed.next().await {
        match item {
            Ok(event) => {
                stats.events += 1;
                log_event(&event);
            }
            Err(err) => {
                if err.is_connection_level() {
                    stats.connection_errors += 1;
                } else {
                    stats.message_errors += 1;
                }
                log_error(&err);
            }
        }
    }

    Ok(stats)
}

/// Consumes the feed until `shutdown` fires, reconnecting with backoff.
pub async fn run<C: Connector>(client: FeedClient<C>, mut backoff: Backoff, shutdown: CancellationToken) -> Result<()> {
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let stats = consume_once(&client, shutdown.child_token()).await?;
        log::info!(
            "Feed iteration ended: {} events, {} message errors, {} connection errors",
            stats.events,
            stats.message_errors,
            stats.connection_errors
        );

        if shutdown.is_cancelled() {
            break;
        }

        // A connection that delivered anything counts as healthy.
        if stats.events > 0 {
            backoff.reset();
        }

        let delay = backoff.next_delay();
        log::info!("Reconnecting to {} in {:?}", client.url(), delay);
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = sleep(delay) => {}
        }
    }

    log::info!("Feed consumer shutting down.");
    Ok(())
}
