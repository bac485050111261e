use alert_sync_core::{ConnectionStatus, PushMessage};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::backend::AlertBackend;
use crate::board::AlertBoard;

/// Apply push messages from `feed` to `board` until the feed closes.
///
/// A lagging subscriber has missed events it cannot recover, so it reloads
/// page 1 to resync with the backend.
pub async fn run_live<B: AlertBackend>(
    board: AlertBoard<B>,
    mut feed: broadcast::Receiver<PushMessage>,
) {
    tracing::info!("live loop: subscribed");
    board.apply_push(PushMessage::Status(ConnectionStatus::Connected));

    loop {
        match feed.recv().await {
            Ok(message) => {
                if let Some(applied) = board.apply_push(message) {
                    tracing::debug!(result = ?applied, "live loop: event applied");
                }
            }
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "live loop: lagged behind push feed, reloading");
                board.apply_push(PushMessage::Status(ConnectionStatus::Reconnecting));
                let notice = board.reload().await;
                if notice.is_success() {
                    board.apply_push(PushMessage::Status(ConnectionStatus::Connected));
                }
            }
            Err(RecvError::Closed) => {
                tracing::info!("live loop: push feed closed");
                board.apply_push(PushMessage::Status(ConnectionStatus::Disconnected));
                break;
            }
        }
    }
}
