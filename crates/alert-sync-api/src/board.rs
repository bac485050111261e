use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use alert_sync_core::{
    Agent, AgentId, AlertFilters, AlertId, AlertStatistics, AlertStatus, BoardSnapshot, BoardState,
    Command, ContactMethod, FetchOutcome, FetchTicket, LiveApply, OutcomeRecord, PushMessage,
    SortKey,
};
use anyhow::Result;
use time::OffsetDateTime;

use crate::backend::{AlertBackend, AlertQuery};
use crate::{BoardConfig, Notice};

/// One user's alert board: local [`BoardState`] kept in step with a backend.
///
/// Backend calls run without holding the state lock; every state change happens
/// in a single short critical section, so pushes, fetch completions and
/// commands never interleave inside one mutation.
pub struct AlertBoard<B> {
    backend: Arc<B>,
    state: Arc<Mutex<BoardState>>,
    config: Arc<BoardConfig>,
}

impl<B> Clone for AlertBoard<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            state: Arc::clone(&self.state),
            config: Arc::clone(&self.config),
        }
    }
}

impl<B: AlertBackend> AlertBoard<B> {
    #[must_use]
    pub fn new(backend: Arc<B>, config: BoardConfig) -> Self {
        let state = BoardState::new(
            config.page_size,
            config.default_filters.clone(),
            config.default_sort,
        );
        Self { backend, state: Arc::new(Mutex::new(state)), config: Arc::new(config) }
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    #[must_use]
    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn snapshot(&self) -> BoardSnapshot {
        self.lock().snapshot()
    }

    /// Switch filters or sort key and fetch page 1.
    pub async fn change_query(&self, filters: AlertFilters, sort_key: SortKey) -> Notice {
        let ticket = self.lock().change_query(filters, sort_key);
        self.run_fetch(ticket).await
    }

    pub async fn reload(&self) -> Notice {
        let ticket = self.lock().reload();
        self.run_fetch(ticket).await
    }

    pub async fn load_more(&self) -> Notice {
        let ticket = self.lock().load_more();
        match ticket {
            Ok(ticket) => self.run_fetch(ticket).await,
            Err(blocked) => Notice::error(blocked.to_string()),
        }
    }

    async fn run_fetch(&self, ticket: FetchTicket) -> Notice {
        let query = AlertQuery::from_request(&self.config.user_id, ticket.request());
        let result = self.backend.get_user_alerts(query).await;

        let mut state = self.lock();
        let outcome = match result {
            Ok(response) => state.complete_fetch(&ticket, response),
            Err(err) => state.fail_fetch(&ticket, format!("{err:#}")),
        };
        match outcome {
            FetchOutcome::Applied { added, .. } => {
                Notice::success(format!("loaded {added} alerts"))
            }
            FetchOutcome::Failed { message } => {
                Notice::error(format!("failed to load alerts: {message}"))
            }
            FetchOutcome::Stale { .. } => Notice::success("superseded by a newer request"),
        }
    }

    /// Run one command: pre-check locally, call the backend, then reflect it.
    pub async fn execute(&self, id: AlertId, command: Command) -> Notice {
        let name = command.name();
        let checked = self.lock().check_command(id, &command);
        if let Err(err) = checked {
            return Notice::error(format!("{name} failed: {err}"));
        }

        let result = match &command {
            Command::Acknowledge => self.backend.acknowledge_alert(id).await,
            Command::Contact { method } => self.backend.mark_as_contacted(id, *method).await,
            Command::Dismiss => self.backend.dismiss_alert(id).await,
            Command::Assign { agent_id } => self.backend.assign_alert(id, *agent_id).await,
            Command::RecordOutcome { outcome } => {
                self.backend.record_outcome(id, outcome.clone()).await
            }
        };
        if let Err(err) = result {
            tracing::warn!(alert_id = %id, command = name, error = %err, "command failed");
            return Notice::error(format!("{name} failed: {err:#}"));
        }

        let applied = self.lock().apply_command(id, command, OffsetDateTime::now_utc());
        if let Err(err) = applied {
            // The push feed can deliver the same change first.
            tracing::debug!(
                alert_id = %id,
                command = name,
                error = %err,
                "command already reflected"
            );
        }
        Notice::success(success_message(name))
    }

    pub async fn acknowledge(&self, id: AlertId) -> Notice {
        self.execute(id, Command::Acknowledge).await
    }

    pub async fn mark_contacted(&self, id: AlertId, method: ContactMethod) -> Notice {
        self.execute(id, Command::Contact { method }).await
    }

    pub async fn dismiss(&self, id: AlertId) -> Notice {
        self.execute(id, Command::Dismiss).await
    }

    pub async fn assign(&self, id: AlertId, agent_id: AgentId) -> Notice {
        self.execute(id, Command::Assign { agent_id }).await
    }

    pub async fn record_outcome(&self, id: AlertId, outcome: OutcomeRecord) -> Notice {
        self.execute(id, Command::RecordOutcome { outcome }).await
    }

    /// Set `status` on `ids`, or on the current selection when `ids` is `None`.
    /// The selection is cleared on success.
    pub async fn bulk_update_status(
        &self,
        ids: Option<Vec<AlertId>>,
        status: AlertStatus,
    ) -> Notice {
        let targets = {
            let state = self.lock();
            let ids = ids.unwrap_or_else(|| state.selected());
            state.check_bulk_status(&ids, status)
        };
        let targets = match targets {
            Ok(targets) => targets,
            Err(err) => return Notice::error(format!("bulk update failed: {err}")),
        };

        match self.backend.bulk_update_status(targets.clone(), status).await {
            Ok(changed) => {
                let mut state = self.lock();
                let applied = state.apply_bulk_status(&targets, status, OffsetDateTime::now_utc());
                state.clear_selection();
                tracing::info!(
                    requested = targets.len(),
                    changed,
                    applied,
                    status = %status,
                    "bulk status applied"
                );
                Notice::success(format!("{changed} alerts updated to {status}"))
            }
            Err(err) => {
                tracing::warn!(error = %err, "bulk status failed");
                Notice::error(format!("bulk update failed: {err:#}"))
            }
        }
    }

    /// Dismiss `ids`, or the current selection when `ids` is `None`.
    pub async fn bulk_dismiss(&self, ids: Option<Vec<AlertId>>) -> Notice {
        let targets = {
            let state = self.lock();
            let ids = ids.unwrap_or_else(|| state.selected());
            state.check_bulk_dismiss(&ids)
        };
        let targets = match targets {
            Ok(targets) => targets,
            Err(err) => return Notice::error(format!("bulk dismiss failed: {err}")),
        };

        match self.backend.bulk_dismiss(targets.clone()).await {
            Ok(changed) => {
                let removed = self.lock().apply_bulk_dismissed(&targets);
                tracing::info!(requested = targets.len(), changed, removed, "bulk dismiss applied");
                Notice::success(format!("{changed} alerts dismissed"))
            }
            Err(err) => {
                tracing::warn!(error = %err, "bulk dismiss failed");
                Notice::error(format!("bulk dismiss failed: {err:#}"))
            }
        }
    }

    pub fn toggle_selected(&self, id: AlertId) -> bool {
        self.lock().toggle_selected(id)
    }

    pub fn select_all(&self) {
        self.lock().select_all();
    }

    pub fn clear_selection(&self) {
        self.lock().clear_selection();
    }

    /// Fold one push message into the board.
    pub fn apply_push(&self, message: PushMessage) -> Option<LiveApply> {
        self.lock().apply_push(message, OffsetDateTime::now_utc())
    }

    /// Server-side counters for the active filters.
    ///
    /// # Errors
    /// Returns an error when the backend call fails.
    pub async fn statistics(&self) -> Result<AlertStatistics> {
        let filters = self.lock().coordinator().filters().clone();
        self.backend.get_statistics(self.config.user_id.clone(), filters).await
    }

    /// # Errors
    /// Returns an error when the backend call fails.
    pub async fn agents(&self) -> Result<Vec<Agent>> {
        self.backend.get_available_agents().await
    }
}

fn success_message(command: &str) -> String {
    match command {
        "acknowledge" => "alert acknowledged".to_string(),
        "contact" => "contact recorded".to_string(),
        "dismiss" => "alert dismissed".to_string(),
        "assign" => "alert assigned".to_string(),
        "record_outcome" => "outcome recorded".to_string(),
        other => format!("{other} succeeded"),
    }
}
