//! Push-channel events and the bridge that folds them into an [`AlertStore`].

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::query::AlertFilters;
use crate::store::AlertStore;
use crate::{Alert, AlertId, AlertPatch};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    Reconnecting,
    #[default]
    Disconnected,
}

impl ConnectionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Connecting => "connecting",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LiveEvent {
    NewAlert { alert: Alert },
    AlertPatched { id: AlertId, patch: AlertPatch },
}

/// Everything the push connection can deliver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum PushMessage {
    Status(ConnectionStatus),
    Event(LiveEvent),
}

/// What applying one event did to the store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LiveApply {
    Inserted,
    /// Already visible, typically because a fetch delivered it first.
    Duplicate,
    /// Valid alert outside the active filters.
    Filtered,
    /// Failed record validation.
    Rejected,
    Patched,
    /// Patch for an alert that is not visible; dropped.
    Unknown,
}

/// Applies push events to the store in delivery order.
///
/// Ordering against in-flight fetches is not coordinated here: insert is
/// idempotent and patches of unknown ids are dropped, so any interleaving
/// leaves the store consistent.
#[derive(Debug, Clone, Default)]
pub struct LiveUpdateBridge {
    status: ConnectionStatus,
    applied: u64,
    ignored: u64,
    last_event_at: Option<OffsetDateTime>,
}

impl LiveUpdateBridge {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(
        &mut self,
        store: &mut AlertStore,
        filters: &AlertFilters,
        event: LiveEvent,
        now: OffsetDateTime,
    ) -> LiveApply {
        self.last_event_at = Some(now);
        let result = match event {
            LiveEvent::NewAlert { alert } => {
                if let Err(err) = alert.validate() {
                    tracing::warn!(alert_id = %alert.id, error = %err, "pushed alert rejected");
                    LiveApply::Rejected
                } else if !filters.matches(&alert) {
                    LiveApply::Filtered
                } else if store.insert(alert) {
                    LiveApply::Inserted
                } else {
                    LiveApply::Duplicate
                }
            }
            LiveEvent::AlertPatched { id, patch } => {
                if store.patch(&id, &patch) {
                    LiveApply::Patched
                } else {
                    LiveApply::Unknown
                }
            }
        };
        if matches!(result, LiveApply::Inserted | LiveApply::Patched) {
            self.applied += 1;
        } else {
            self.ignored += 1;
        }
        result
    }

    /// Record a connection status report. Returns `true` when it changed.
    pub fn set_status(&mut self, status: ConnectionStatus) -> bool {
        if self.status == status {
            return false;
        }
        tracing::info!(from = self.status.as_str(), to = status.as_str(), "push channel status");
        self.status = status;
        true
    }

    /// Route one push message. Status reports yield `None`.
    pub fn handle(
        &mut self,
        store: &mut AlertStore,
        filters: &AlertFilters,
        message: PushMessage,
        now: OffsetDateTime,
    ) -> Option<LiveApply> {
        match message {
            PushMessage::Status(status) => {
                self.set_status(status);
                None
            }
            PushMessage::Event(event) => Some(self.apply(store, filters, event, now)),
        }
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    #[must_use]
    pub fn applied(&self) -> u64 {
        self.applied
    }

    #[must_use]
    pub fn ignored(&self) -> u64 {
        self.ignored
    }

    #[must_use]
    pub fn last_event_at(&self) -> Option<OffsetDateTime> {
        self.last_event_at
    }
}
