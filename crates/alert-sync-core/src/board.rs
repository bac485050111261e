use std::fmt::Display;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::fetch::{FetchCoordinator, FetchOutcome, FetchResponse, FetchTicket, LoadMoreBlocked};
use crate::live::{ConnectionStatus, LiveApply, LiveEvent, LiveUpdateBridge, PushMessage};
use crate::query::{AlertFilters, SortKey};
use crate::stats::AlertStatistics;
use crate::store::AlertStore;
use crate::{
    AgentId, Alert, AlertId, AlertStatus, ContactMethod, OutcomeRecord, SyncError,
};

/// A single-alert command issued by the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Acknowledge,
    Contact { method: ContactMethod },
    Dismiss,
    Assign { agent_id: AgentId },
    RecordOutcome { outcome: OutcomeRecord },
}

impl Command {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Acknowledge => "acknowledge",
            Self::Contact { .. } => "contact",
            Self::Dismiss => "dismiss",
            Self::Assign { .. } => "assign",
            Self::RecordOutcome { .. } => "record_outcome",
        }
    }
}

/// Serializable view of everything the UI renders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoardSnapshot {
    pub alerts: Vec<Alert>,
    pub selected: Vec<AlertId>,
    pub filters: AlertFilters,
    pub sort_key: SortKey,
    pub page: u32,
    pub page_size: u32,
    pub has_more: bool,
    pub loading: bool,
    pub loading_more: bool,
    pub generation: u64,
    pub connection: ConnectionStatus,
    pub last_error: Option<String>,
}

/// The alert board: one store (with its selection), one fetch coordinator and
/// one live bridge, mutated only through the methods below.
///
/// Each method runs to completion, so no caller ever observes a half-applied
/// change. Command methods are split into `check_*` (before the backend call)
/// and `apply_*` (after the backend confirmed).
#[derive(Debug, Clone, Default)]
pub struct BoardState {
    store: AlertStore,
    coordinator: FetchCoordinator,
    bridge: LiveUpdateBridge,
}

impl BoardState {
    #[must_use]
    pub fn new(page_size: u32, filters: AlertFilters, sort_key: SortKey) -> Self {
        Self {
            store: AlertStore::new(sort_key),
            coordinator: FetchCoordinator::new(page_size, filters, sort_key),
            bridge: LiveUpdateBridge::new(),
        }
    }

    #[must_use]
    pub fn store(&self) -> &AlertStore {
        &self.store
    }

    #[must_use]
    pub fn coordinator(&self) -> &FetchCoordinator {
        &self.coordinator
    }

    #[must_use]
    pub fn bridge(&self) -> &LiveUpdateBridge {
        &self.bridge
    }

    /// New filters or sort key: re-sort what is visible and request page 1.
    pub fn change_query(&mut self, filters: AlertFilters, sort_key: SortKey) -> FetchTicket {
        self.store.set_sort_key(sort_key);
        self.coordinator.begin_query(filters, sort_key)
    }

    pub fn reload(&mut self) -> FetchTicket {
        self.coordinator.begin_reload()
    }

    /// # Errors
    /// See [`FetchCoordinator::begin_load_more`].
    pub fn load_more(&mut self) -> Result<FetchTicket, LoadMoreBlocked> {
        self.coordinator.begin_load_more()
    }

    pub fn complete_fetch(&mut self, ticket: &FetchTicket, response: FetchResponse) -> FetchOutcome {
        self.coordinator.complete(ticket, response, &mut self.store)
    }

    pub fn fail_fetch(&mut self, ticket: &FetchTicket, error: impl Display) -> FetchOutcome {
        self.coordinator.fail(ticket, error)
    }

    /// Apply one push message.
    ///
    /// A patch that leaves a visible alert outside the active filters (a
    /// dismissal, or a status change out of a status view) removes it from the
    /// view along with its selection.
    pub fn apply_push(&mut self, message: PushMessage, now: OffsetDateTime) -> Option<LiveApply> {
        let patched_id = match &message {
            PushMessage::Event(LiveEvent::AlertPatched { id, .. }) => Some(*id),
            _ => None,
        };
        let result =
            self.bridge.handle(&mut self.store, self.coordinator.filters(), message, now);

        if let (Some(LiveApply::Patched), Some(id)) = (result, patched_id) {
            let hidden =
                self.store.get(&id).is_some_and(|alert| !self.coordinator.filters().matches(alert));
            if hidden {
                self.store.remove(&id);
            }
        }
        result
    }

    pub fn toggle_selected(&mut self, id: AlertId) -> bool {
        self.store.toggle_selected(id)
    }

    pub fn select_all(&mut self) {
        self.store.select_all_visible();
    }

    pub fn clear_selection(&mut self) {
        self.store.clear_selection();
    }

    #[must_use]
    pub fn selected(&self) -> Vec<AlertId> {
        self.store.selection().to_vec()
    }

    /// Validate `command` against the current state without changing anything.
    ///
    /// # Errors
    /// Returns [`SyncError::UnknownAlert`] when the alert is not visible, or the
    /// state-machine error the command would hit.
    pub fn check_command(&self, id: AlertId, command: &Command) -> Result<(), SyncError> {
        let alert = self.store.get(&id).ok_or(SyncError::UnknownAlert(id))?;
        match command {
            Command::Acknowledge => alert.check_transition(AlertStatus::Acknowledged),
            Command::Contact { .. } => alert.check_transition(AlertStatus::Contacted),
            Command::Dismiss => alert.check_transition(AlertStatus::Dismissed),
            Command::Assign { .. } => {
                if alert.status.is_terminal() {
                    Err(SyncError::TerminalAlert(id))
                } else {
                    Ok(())
                }
            }
            Command::RecordOutcome { .. } => {
                if alert.status.is_terminal() {
                    return Err(SyncError::TerminalAlert(id));
                }
                if alert.status.can_transition_to(AlertStatus::Resolved) {
                    Ok(())
                } else {
                    Err(SyncError::InvalidTransition {
                        from: alert.status,
                        to: AlertStatus::Resolved,
                    })
                }
            }
        }
    }

    /// Reflect a command the backend accepted.
    ///
    /// # Errors
    /// Same conditions as [`BoardState::check_command`]; nothing changes on error.
    pub fn apply_command(
        &mut self,
        id: AlertId,
        command: Command,
        now: OffsetDateTime,
    ) -> Result<(), SyncError> {
        self.check_command(id, &command)?;
        match command {
            Command::Dismiss => {
                self.store.remove(&id);
                Ok(())
            }
            Command::Acknowledge => self
                .store
                .update(&id, |alert| alert.transition(AlertStatus::Acknowledged, now))
                .unwrap_or(Err(SyncError::UnknownAlert(id))),
            Command::Contact { method } => self
                .store
                .update(&id, |alert| -> Result<(), SyncError> {
                    alert.transition(AlertStatus::Contacted, now)?;
                    alert.contact_attempts += 1;
                    alert.last_contact_method = Some(method);
                    alert.last_contacted_at = Some(now);
                    Ok(())
                })
                .unwrap_or(Err(SyncError::UnknownAlert(id))),
            Command::Assign { agent_id } => self
                .store
                .update(&id, |alert| {
                    alert.assigned_to = Some(agent_id);
                    alert.touch(now);
                })
                .ok_or(SyncError::UnknownAlert(id)),
            Command::RecordOutcome { outcome } => self
                .store
                .update(&id, |alert| -> Result<(), SyncError> {
                    let previous = alert.outcome.replace(outcome);
                    let result = alert.transition(AlertStatus::Resolved, now);
                    if result.is_err() {
                        alert.outcome = previous;
                    }
                    result
                })
                .unwrap_or(Err(SyncError::UnknownAlert(id))),
        }
    }

    /// Narrow `ids` to the visible alerts a bulk status change can target.
    ///
    /// # Errors
    /// Returns [`SyncError::Validation`] for an empty target set or a status no
    /// bulk command may set, and [`SyncError::OutcomeRequired`] for `resolved`.
    pub fn check_bulk_status(
        &self,
        ids: &[AlertId],
        status: AlertStatus,
    ) -> Result<Vec<AlertId>, SyncError> {
        match status {
            AlertStatus::New => {
                return Err(SyncError::Validation(
                    "bulk status cannot move alerts back to new".to_string(),
                ));
            }
            AlertStatus::Resolved => return Err(SyncError::OutcomeRequired),
            _ => {}
        }
        let targets = self.visible_subset(ids);
        if targets.is_empty() {
            return Err(SyncError::Validation("no visible alerts selected".to_string()));
        }
        Ok(targets)
    }

    pub fn apply_bulk_status(
        &mut self,
        ids: &[AlertId],
        status: AlertStatus,
        now: OffsetDateTime,
    ) -> usize {
        self.store.bulk_patch(ids, status, now)
    }

    /// # Errors
    /// Returns [`SyncError::Validation`] when none of `ids` is visible.
    pub fn check_bulk_dismiss(&self, ids: &[AlertId]) -> Result<Vec<AlertId>, SyncError> {
        let targets = self.visible_subset(ids);
        if targets.is_empty() {
            return Err(SyncError::Validation("no visible alerts selected".to_string()));
        }
        Ok(targets)
    }

    pub fn apply_bulk_dismissed(&mut self, ids: &[AlertId]) -> usize {
        self.store.bulk_remove(ids)
    }

    /// Counters over the visible alerts.
    #[must_use]
    pub fn statistics(&self) -> AlertStatistics {
        AlertStatistics::from_alerts(self.store.alerts())
    }

    #[must_use]
    pub fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            alerts: self.store.alerts().to_vec(),
            selected: self.selected(),
            filters: self.coordinator.filters().clone(),
            sort_key: self.store.sort_key(),
            page: self.coordinator.page(),
            page_size: self.coordinator.page_size(),
            has_more: self.coordinator.has_more(),
            loading: self.coordinator.is_loading(),
            loading_more: self.coordinator.is_loading_more(),
            generation: self.coordinator.generation(),
            connection: self.bridge.status(),
            last_error: self.coordinator.last_error().map(str::to_string),
        }
    }

    fn visible_subset(&self, ids: &[AlertId]) -> Vec<AlertId> {
        let mut targets =
            ids.iter().copied().filter(|id| self.store.contains(id)).collect::<Vec<_>>();
        targets.sort_unstable();
        targets.dedup();
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{fixture_id, fixture_time, mk_alert, mk_outcome};
    use crate::{AlertPatch, OutcomeResult, Priority, DEFAULT_PAGE_SIZE};

    const ID_A: &str = "01K1D3A7E9J5MNNN8F5JVCJY51";
    const ID_B: &str = "01K1D3A7E9J5MNNN8F5JVCJY52";
    const ID_Z: &str = "01K1D3A7E9J5MNNN8F5JVCJY5Z";

    fn loaded_board(alerts: Vec<Alert>) -> BoardState {
        let mut board = BoardState::default();
        let ticket = board.reload();
        board.complete_fetch(&ticket, FetchResponse { alerts, has_more: false });
        board
    }

    #[test]
    fn late_patch_then_fetch_keeps_fetched_status() {
        let mut board = BoardState::default();
        let ticket = board.reload();
        let result = board.apply_push(
            PushMessage::Event(LiveEvent::AlertPatched {
                id: fixture_id(ID_Z),
                patch: AlertPatch::status(AlertStatus::Acknowledged),
            }),
            fixture_time(),
        );
        assert_eq!(result, Some(LiveApply::Unknown));

        board.complete_fetch(
            &ticket,
            FetchResponse { alerts: vec![mk_alert(ID_Z, 0, 0.6)], has_more: false },
        );
        assert_eq!(
            board.store().get(&fixture_id(ID_Z)).map(|alert| alert.status),
            Some(AlertStatus::New)
        );
    }

    #[test]
    fn contact_command_records_attempt() {
        let mut board = loaded_board(vec![mk_alert(ID_A, 0, 0.8)]);
        let id = fixture_id(ID_A);
        let later = fixture_time() + time::Duration::hours(1);
        let result = board.apply_command(id, Command::Contact { method: ContactMethod::Phone }, later);
        assert_eq!(result, Ok(()));

        let alert = match board.store().get(&id) {
            Some(alert) => alert,
            None => panic!("alert should still be visible"),
        };
        assert_eq!(alert.status, AlertStatus::Contacted);
        assert_eq!(alert.contact_attempts, 1);
        assert_eq!(alert.last_contact_method, Some(ContactMethod::Phone));
        assert_eq!(alert.updated_at, later);

        assert_eq!(
            board.apply_command(id, Command::Contact { method: ContactMethod::Email }, later),
            Ok(())
        );
        assert_eq!(board.store().get(&id).map(|alert| alert.contact_attempts), Some(2));
    }

    #[test]
    fn acknowledge_twice_is_rejected_without_change() {
        let mut board = loaded_board(vec![mk_alert(ID_A, 0, 0.8)]);
        let id = fixture_id(ID_A);
        assert_eq!(board.apply_command(id, Command::Acknowledge, fixture_time()), Ok(()));
        assert_eq!(
            board.check_command(id, &Command::Acknowledge),
            Err(SyncError::InvalidTransition {
                from: AlertStatus::Acknowledged,
                to: AlertStatus::Acknowledged
            })
        );
    }

    #[test]
    fn dismiss_removes_and_prunes_selection() {
        let mut board = loaded_board(vec![mk_alert(ID_A, 0, 0.8), mk_alert(ID_B, 10, 0.4)]);
        board.select_all();
        assert_eq!(board.apply_command(fixture_id(ID_A), Command::Dismiss, fixture_time()), Ok(()));
        assert!(!board.store().contains(&fixture_id(ID_A)));
        assert_eq!(board.selected(), vec![fixture_id(ID_B)]);
    }

    #[test]
    fn outcome_resolves_and_closes_the_alert() {
        let mut board = loaded_board(vec![mk_alert(ID_A, 0, 0.8)]);
        let id = fixture_id(ID_A);
        let outcome = mk_outcome(OutcomeResult::Converted);
        assert_eq!(
            board.apply_command(id, Command::RecordOutcome { outcome: outcome.clone() }, fixture_time()),
            Ok(())
        );
        let alert = board.store().get(&id).cloned();
        assert_eq!(alert.as_ref().map(|alert| alert.status), Some(AlertStatus::Resolved));
        assert_eq!(alert.and_then(|alert| alert.outcome), Some(outcome));

        assert_eq!(
            board.check_command(id, &Command::Assign { agent_id: AgentId::new() }),
            Err(SyncError::TerminalAlert(id))
        );
    }

    #[test]
    fn assign_sets_agent_without_changing_status() {
        let mut board = loaded_board(vec![mk_alert(ID_A, 0, 0.8)]);
        let id = fixture_id(ID_A);
        let agent = AgentId::new();
        assert_eq!(board.apply_command(id, Command::Assign { agent_id: agent }, fixture_time()), Ok(()));
        let alert = board.store().get(&id);
        assert_eq!(alert.and_then(|alert| alert.assigned_to), Some(agent));
        assert_eq!(alert.map(|alert| alert.status), Some(AlertStatus::New));
    }

    #[test]
    fn commands_on_unknown_alerts_fail() {
        let board = loaded_board(vec![mk_alert(ID_A, 0, 0.8)]);
        assert_eq!(
            board.check_command(fixture_id(ID_Z), &Command::Dismiss),
            Err(SyncError::UnknownAlert(fixture_id(ID_Z)))
        );
    }

    #[test]
    fn bulk_checks_narrow_to_visible_ids() {
        let board = loaded_board(vec![mk_alert(ID_A, 0, 0.8), mk_alert(ID_B, 10, 0.4)]);
        let targets = board.check_bulk_status(
            &[fixture_id(ID_B), fixture_id(ID_Z), fixture_id(ID_B)],
            AlertStatus::Acknowledged,
        );
        assert_eq!(targets, Ok(vec![fixture_id(ID_B)]));
        assert_eq!(
            board.check_bulk_status(&[fixture_id(ID_A)], AlertStatus::Resolved),
            Err(SyncError::OutcomeRequired)
        );
        assert!(matches!(
            board.check_bulk_dismiss(&[fixture_id(ID_Z)]),
            Err(SyncError::Validation(_))
        ));
    }

    #[test]
    fn bulk_dismiss_scenario() {
        let mut board = loaded_board(vec![mk_alert(ID_A, 10, 0.8), mk_alert(ID_B, 0, 0.4)]);
        board.select_all();
        assert_eq!(board.apply_bulk_dismissed(&[fixture_id(ID_A)]), 1);
        let visible = board.store().ids().collect::<Vec<_>>();
        assert_eq!(visible, vec![fixture_id(ID_B)]);
        assert_eq!(board.selected(), vec![fixture_id(ID_B)]);
    }

    #[test]
    fn pushed_dismissal_hides_alert_from_default_view() {
        let mut board = loaded_board(vec![mk_alert(ID_A, 0, 0.8)]);
        board.select_all();
        board.apply_push(
            PushMessage::Event(LiveEvent::AlertPatched {
                id: fixture_id(ID_A),
                patch: AlertPatch::status(AlertStatus::Dismissed),
            }),
            fixture_time(),
        );
        assert!(board.store().is_empty());
        assert!(board.selected().is_empty());
    }

    #[test]
    fn pushed_status_change_leaves_status_view() {
        let new_only = AlertFilters { status: Some(AlertStatus::New), ..AlertFilters::default() };
        let mut board = BoardState::new(DEFAULT_PAGE_SIZE, new_only.clone(), SortKey::DateNew);
        let ticket = board.change_query(new_only, SortKey::DateNew);
        board.complete_fetch(
            &ticket,
            FetchResponse {
                alerts: vec![mk_alert(ID_A, 10, 0.8), mk_alert(ID_B, 0, 0.4)],
                has_more: false,
            },
        );
        board.select_all();

        let result = board.apply_push(
            PushMessage::Event(LiveEvent::AlertPatched {
                id: fixture_id(ID_A),
                patch: AlertPatch::status(AlertStatus::Acknowledged),
            }),
            fixture_time(),
        );
        assert_eq!(result, Some(LiveApply::Patched));
        assert_eq!(board.store().ids().collect::<Vec<_>>(), vec![fixture_id(ID_B)]);
        assert_eq!(board.selected(), vec![fixture_id(ID_B)]);

        board.apply_push(
            PushMessage::Event(LiveEvent::AlertPatched {
                id: fixture_id(ID_B),
                patch: AlertPatch { priority: Some(Priority::Urgent), ..AlertPatch::default() },
            }),
            fixture_time(),
        );
        assert!(board.store().contains(&fixture_id(ID_B)));
    }

    #[test]
    fn change_query_resorts_visible_alerts_immediately() {
        let mut board = loaded_board(vec![mk_alert(ID_A, 10, 0.2), mk_alert(ID_B, 0, 0.9)]);
        let ticket = board.change_query(AlertFilters::default(), SortKey::ConfidenceHigh);
        let visible = board.store().ids().collect::<Vec<_>>();
        assert_eq!(visible, vec![fixture_id(ID_B), fixture_id(ID_A)]);

        let snapshot = board.snapshot();
        assert!(snapshot.loading);
        assert_eq!(snapshot.sort_key, SortKey::ConfidenceHigh);
        assert_eq!(snapshot.generation, ticket.generation());
    }

    #[test]
    fn snapshot_reports_selection_and_connection() {
        let mut board = loaded_board(vec![mk_alert(ID_A, 0, 0.8)]);
        board.toggle_selected(fixture_id(ID_A));
        board.apply_push(PushMessage::Status(ConnectionStatus::Reconnecting), fixture_time());
        let snapshot = board.snapshot();
        assert_eq!(snapshot.selected, vec![fixture_id(ID_A)]);
        assert_eq!(snapshot.connection, ConnectionStatus::Reconnecting);
        assert!(!snapshot.loading);
        assert_eq!(board.statistics().total, 1);
    }
}
