use std::future::Future;

use alert_sync_core::{
    Agent, AgentId, AlertFilters, AlertId, AlertStatistics, AlertStatus, ContactMethod,
    FetchRequest, FetchResponse, OutcomeRecord, PushMessage, SortKey,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Arguments of one `get_user_alerts` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertQuery {
    pub user_id: String,
    pub filters: AlertFilters,
    pub sort_key: SortKey,
    pub page: u32,
    pub page_size: u32,
}

impl AlertQuery {
    #[must_use]
    pub fn from_request(user_id: &str, request: &FetchRequest) -> Self {
        Self {
            user_id: user_id.to_string(),
            filters: request.filters.clone(),
            sort_key: request.sort_key,
            page: request.page,
            page_size: request.page_size,
        }
    }
}

/// The remote alert service and its push feed.
///
/// Every call may fail with a transport error; callers surface it once and
/// never retry.
pub trait AlertBackend: Send + Sync + 'static {
    fn get_user_alerts(&self, query: AlertQuery)
        -> impl Future<Output = Result<FetchResponse>> + Send;

    fn get_statistics(
        &self,
        user_id: String,
        filters: AlertFilters,
    ) -> impl Future<Output = Result<AlertStatistics>> + Send;

    fn get_available_agents(&self) -> impl Future<Output = Result<Vec<Agent>>> + Send;

    fn acknowledge_alert(&self, id: AlertId) -> impl Future<Output = Result<()>> + Send;

    fn mark_as_contacted(
        &self,
        id: AlertId,
        method: ContactMethod,
    ) -> impl Future<Output = Result<()>> + Send;

    fn dismiss_alert(&self, id: AlertId) -> impl Future<Output = Result<()>> + Send;

    fn assign_alert(&self, id: AlertId, agent: AgentId)
        -> impl Future<Output = Result<()>> + Send;

    fn record_outcome(
        &self,
        id: AlertId,
        outcome: OutcomeRecord,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Returns how many alerts the backend changed.
    fn bulk_update_status(
        &self,
        ids: Vec<AlertId>,
        status: AlertStatus,
    ) -> impl Future<Output = Result<usize>> + Send;

    fn bulk_dismiss(&self, ids: Vec<AlertId>) -> impl Future<Output = Result<usize>> + Send;

    /// Open a subscription to the push feed.
    fn subscribe(&self) -> broadcast::Receiver<PushMessage>;
}
