//! Startup helpers for processes embedding the engine.

use std::future::Future;
use std::time::Duration;

use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing, filtered by the `SHARDSYNC_LOG` environment
/// variable ("info" when unset).
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Call `connect` until it succeeds, backing off exponentially, and return
/// the connected handle. Gives up with the last error after 30 attempts.
/// `tier_name` and `address` only feed the log lines.
///
/// Backing services routinely come up after the game server during a
/// deployment restart, so startup waits for them instead of crash-looping.
pub async fn connect_with_retry<T, E, F, Fut>(
    tier_name: &str,
    address: &str,
    connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    const MAX_RETRIES: u32 = 30;
    const INITIAL_DELAY: Duration = Duration::from_millis(100);
    const MAX_DELAY: Duration = Duration::from_secs(5);

    let mut delay = INITIAL_DELAY;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match connect().await {
            Ok(handle) => {
                tracing::info!("Connected to {} at {}", tier_name, address);
                return Ok(handle);
            }
            Err(e) if attempt < MAX_RETRIES => {
                warn!(
                    "Failed to connect to {} (attempt {}/{}): {}. Retrying in {:?}...",
                    tier_name, attempt, MAX_RETRIES, e, delay
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, MAX_DELAY);
            }
            Err(e) => {
                tracing::error!(
                    "Failed to connect to {} after {} attempts: {}",
                    tier_name,
                    MAX_RETRIES,
                    e
                );
                return Err(e);
            }
        }
    }
}
