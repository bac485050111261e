use alert_sync_core::{AlertFilters, SortKey, DEFAULT_PAGE_SIZE};
use serde::{Deserialize, Serialize};

mod backend;
mod board;
mod live;
mod memory;

pub use backend::{AlertBackend, AlertQuery};
pub use board::AlertBoard;
pub use live::run_live;
pub use memory::{InMemoryBackend, SeedDocument};

pub const API_CONTRACT_VERSION: &str = "api.v1";

/// Buffered push messages per subscriber before it starts lagging.
pub const PUSH_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoardConfig {
    pub user_id: String,
    pub page_size: u32,
    pub default_sort: SortKey,
    pub default_filters: AlertFilters,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            user_id: "local-agent".to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            default_sort: SortKey::DateNew,
            default_filters: AlertFilters::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Error,
}

/// One-line outcome of a user action, shown as a toast by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Success, message: message.into() }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Error, message: message.into() }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.level == NoticeLevel::Success
    }
}
