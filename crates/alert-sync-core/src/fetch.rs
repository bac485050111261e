use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::query::{AlertFilters, SortKey};
use crate::store::AlertStore;
use crate::Alert;

pub const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Page 1 that replaces the visible set.
    Replace,
    /// Next page concatenated onto the visible set.
    Append,
}

/// Arguments for one `getUserAlerts` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchRequest {
    pub filters: AlertFilters,
    pub sort_key: SortKey,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FetchResponse {
    pub alerts: Vec<Alert>,
    pub has_more: bool,
}

/// Handle for one issued request. Only the ticket carrying the current
/// generation may change the store.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchTicket {
    generation: u64,
    mode: FetchMode,
    request: FetchRequest,
}

impl FetchTicket {
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn mode(&self) -> FetchMode {
        self.mode
    }

    #[must_use]
    pub fn request(&self) -> &FetchRequest {
        &self.request
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied { mode: FetchMode, page: u32, added: usize, has_more: bool },
    Failed { message: String },
    /// The ticket was superseded; nothing changed.
    Stale { generation: u64, current: u64 },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum LoadMoreBlocked {
    #[error("a load is already in flight")]
    Busy,
    #[error("no more pages to load")]
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InFlight {
    generation: u64,
    mode: FetchMode,
}

/// Paginated retrieval state: filters, sort key, page cursor and the
/// generation counter used to drop superseded responses.
///
/// The coordinator never performs I/O. Callers obtain a [`FetchTicket`], run the
/// request themselves, and hand the result back through
/// [`FetchCoordinator::complete`] or [`FetchCoordinator::fail`].
#[derive(Debug, Clone)]
pub struct FetchCoordinator {
    filters: AlertFilters,
    sort_key: SortKey,
    page_size: u32,
    page: u32,
    has_more: bool,
    generation: u64,
    in_flight: Option<InFlight>,
    last_error: Option<String>,
}

impl Default for FetchCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE, AlertFilters::default(), SortKey::default())
    }
}

impl FetchCoordinator {
    #[must_use]
    pub fn new(page_size: u32, filters: AlertFilters, sort_key: SortKey) -> Self {
        Self {
            filters,
            sort_key,
            page_size: page_size.max(1),
            page: 0,
            has_more: false,
            generation: 0,
            in_flight: None,
            last_error: None,
        }
    }

    /// Switch filters and sort key and request page 1.
    ///
    /// Any request already in flight becomes stale.
    pub fn begin_query(&mut self, filters: AlertFilters, sort_key: SortKey) -> FetchTicket {
        self.filters = filters;
        self.sort_key = sort_key;
        self.issue(FetchMode::Replace, 1)
    }

    /// Request page 1 again with the current filters (manual refresh / retry).
    pub fn begin_reload(&mut self) -> FetchTicket {
        self.issue(FetchMode::Replace, 1)
    }

    /// Request the next page in append mode.
    ///
    /// # Errors
    /// Returns [`LoadMoreBlocked::Busy`] while any load is in flight and
    /// [`LoadMoreBlocked::Exhausted`] once the last response reported no more pages.
    pub fn begin_load_more(&mut self) -> Result<FetchTicket, LoadMoreBlocked> {
        if self.in_flight.is_some() {
            return Err(LoadMoreBlocked::Busy);
        }
        if !self.has_more {
            return Err(LoadMoreBlocked::Exhausted);
        }
        Ok(self.issue(FetchMode::Append, self.page + 1))
    }

    #[must_use]
    pub fn is_current(&self, ticket: &FetchTicket) -> bool {
        self.in_flight == Some(InFlight { generation: ticket.generation, mode: ticket.mode })
    }

    /// Apply a response if `ticket` is still current.
    pub fn complete(
        &mut self,
        ticket: &FetchTicket,
        response: FetchResponse,
        store: &mut AlertStore,
    ) -> FetchOutcome {
        if !self.is_current(ticket) {
            tracing::debug!(
                generation = ticket.generation,
                current = self.generation,
                "stale fetch response dropped"
            );
            return self.stale(ticket);
        }

        let alerts = response
            .alerts
            .into_iter()
            .filter(|alert| match alert.validate() {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(alert_id = %alert.id, error = %err, "invalid alert dropped from page");
                    false
                }
            })
            .collect::<Vec<_>>();

        let added = match ticket.mode {
            FetchMode::Replace => {
                store.replace_all(alerts);
                store.len()
            }
            FetchMode::Append => store.append_page(alerts),
        };

        self.page = ticket.request.page;
        self.has_more = response.has_more;
        self.in_flight = None;
        self.last_error = None;
        tracing::info!(
            generation = ticket.generation,
            page = self.page,
            added,
            has_more = self.has_more,
            "fetch applied"
        );
        FetchOutcome::Applied { mode: ticket.mode, page: self.page, added, has_more: self.has_more }
    }

    /// Record a failed request. State other than the busy flag stays untouched.
    pub fn fail(&mut self, ticket: &FetchTicket, error: impl Display) -> FetchOutcome {
        if !self.is_current(ticket) {
            return self.stale(ticket);
        }
        let message = error.to_string();
        tracing::warn!(generation = ticket.generation, error = %message, "fetch failed");
        self.in_flight = None;
        self.last_error = Some(message.clone());
        FetchOutcome::Failed { message }
    }

    #[must_use]
    pub fn filters(&self) -> &AlertFilters {
        &self.filters
    }

    #[must_use]
    pub fn sort_key(&self) -> SortKey {
        self.sort_key
    }

    #[must_use]
    pub fn page(&self) -> u32 {
        self.page
    }

    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    #[must_use]
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self.in_flight, Some(InFlight { mode: FetchMode::Replace, .. }))
    }

    #[must_use]
    pub fn is_loading_more(&self) -> bool {
        matches!(self.in_flight, Some(InFlight { mode: FetchMode::Append, .. }))
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn issue(&mut self, mode: FetchMode, page: u32) -> FetchTicket {
        self.generation += 1;
        self.in_flight = Some(InFlight { generation: self.generation, mode });
        FetchTicket {
            generation: self.generation,
            mode,
            request: FetchRequest {
                filters: self.filters.clone(),
                sort_key: self.sort_key,
                page,
                page_size: self.page_size,
            },
        }
    }

    fn stale(&self, ticket: &FetchTicket) -> FetchOutcome {
        FetchOutcome::Stale { generation: ticket.generation, current: self.generation }
    }
}
