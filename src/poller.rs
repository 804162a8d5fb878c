use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::platform::greenapi::{GreenApiClient, Notification};
use crate::platform::WhatsAppError;
use crate::relay::Relay;
use crate::server::shutdown_signal;

/// Seconds GreenAPI holds a `receiveNotification` call open.
const RECEIVE_TIMEOUT_SECS: u64 = 20;

/// Fetch and handle at most one queued notification.
///
/// The notification is acknowledged before it is relayed, so a crash or a
/// failed delete can never produce a second reply for the same message.
/// Bodies the relay cannot decode are acknowledged and dropped.
/// Returns whether a notification was taken off the queue.
pub async fn poll_once(
    client: &GreenApiClient,
    relay: &Relay,
    receive_timeout_secs: u64,
) -> Result<bool, WhatsAppError> {
    let Some(received) = client.receive_notification(receive_timeout_secs).await? else {
        return Ok(false);
    };

    if !client.delete_notification(received.receipt_id).await? {
        warn!("GreenAPI did not confirm deleting receipt {}", received.receipt_id);
    }

    let kind = received.kind().to_string();
    match Notification::from_value(received.body).and_then(Notification::into_inbound) {
        Some(message) => {
            relay.dispatch(message).await;
        }
        None => debug!("Ignoring {} notification", kind),
    }

    Ok(true)
}

/// Poll the GreenAPI notification queue until Ctrl-C.
pub async fn run(client: &GreenApiClient, relay: &Relay, backoff: Duration) -> Result<()> {
    info!("Polling GreenAPI for notifications...");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Poller stopped");
                return Ok(());
            }
            result = poll_once(client, relay, RECEIVE_TIMEOUT_SECS) => {
                if let Err(e) = result {
                    warn!("Polling failed, retrying in {:?}: {}", backoff, e);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
