use std::sync::Arc;
use std::time::Duration;

use keydrop_domain::services::{AllocationEngine, DeliveryError};
use keydrop_domain::storage::Store;
use metrics::counter;
use thiserror::Error;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::UpdateSource;
use crate::pipeline::{parse_update, Dispatcher, Inbound};

/// Pause after a failed poll before asking again.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("http error: {0}")]
    Http(String),
    #[error("bot api error {code:?}: {description}")]
    Api {
        code: Option<i64>,
        description: String,
    },
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

impl From<reqwest::Error> for TelegramError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value.to_string())
    }
}

/// Long-polls `source` forever. Every update is handled on its own task so
/// a slow broadcast or replay never holds up other users.
pub async fn run_poller<U, S>(source: Arc<U>, dispatcher: Dispatcher<S>) -> Result<(), TelegramError>
where
    U: UpdateSource + 'static,
    S: Store + Clone + 'static,
{
    let mut offset = 0;
    info!("update poller started");

    loop {
        let updates = match source.fetch_updates(offset).await {
            Ok(updates) => updates,
            Err(err) => {
                counter!("keydrop_telegram_updates_total", "kind" => "poll_error").increment(1);
                warn!(?err, "update poll failed");
                sleep(POLL_RETRY_DELAY).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some(inbound) = parse_update(&update) else {
                counter!("keydrop_telegram_updates_total", "kind" => "ignored").increment(1);
                continue;
            };
            counter!("keydrop_telegram_updates_total", "kind" => inbound.kind()).increment(1);

            let source = Arc::clone(&source);
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                if let Inbound::Callback { id, .. } = &inbound {
                    if let Err(err) = source.acknowledge_callback(id).await {
                        debug!(?err, "callback acknowledgement failed");
                    }
                }
                let user = inbound.sender().id;
                if let Err(err) = dispatcher.dispatch(inbound).await {
                    warn!(%user, ?err, "update handling failed");
                }
            });
        }
    }
}

/// Runs the left-channel sweep every `period`. The first sweep happens one
/// period after start-up.
pub async fn run_sweeper<S>(engine: AllocationEngine<S>, period: Duration) -> Result<(), TelegramError>
where
    S: Store,
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    info!(period_secs = period.as_secs(), "left-channel sweeper started");

    loop {
        ticker.tick().await;
        if let Err(err) = engine.left_channel_sweep().await {
            warn!(?err, "left-channel sweep failed");
        }
    }
}
