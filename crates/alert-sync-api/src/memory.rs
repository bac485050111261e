use std::collections::HashSet;
use std::future::{ready, Future};
use std::sync::{Mutex, MutexGuard, PoisonError};

use alert_sync_core::{
    sort_alerts, Agent, AgentId, Alert, AlertFilters, AlertId, AlertPatch, AlertStatistics,
    AlertStatus, AlertType, ConnectionStatus, ContactInfo, ContactMethod, FetchResponse,
    LiveEvent, OutcomeRecord, Priority, PushMessage, SignalContribution, SyncError,
};
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tokio::sync::broadcast;

use crate::backend::{AlertBackend, AlertQuery};
use crate::PUSH_CHANNEL_CAPACITY;

/// Alerts and agents a backend starts with.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SeedDocument {
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(default)]
    pub agents: Vec<Agent>,
}

impl SeedDocument {
    /// A small demo portfolio anchored at `now`.
    #[must_use]
    pub fn fixture(now: OffsetDateTime) -> Self {
        let rows = [
            ("Dana Whitfield", AlertType::Sell, Priority::Urgent, 0.94, 2),
            ("Marcus Lee", AlertType::Refinance, Priority::High, 0.81, 5),
            ("Priya Raman", AlertType::Buy, Priority::Medium, 0.67, 9),
            ("Tom Okafor", AlertType::Investment, Priority::Low, 0.42, 20),
            ("Elena Costa", AlertType::Sell, Priority::High, 0.88, 30),
        ];
        let alerts = rows
            .into_iter()
            .map(|(name, alert_type, priority, confidence, hours_ago)| {
                let at = now - Duration::hours(hours_ago);
                Alert {
                    id: AlertId::new(),
                    alert_type,
                    priority,
                    status: AlertStatus::New,
                    contact: ContactInfo {
                        name: name.to_string(),
                        email: Some(format!(
                            "{}@example.com",
                            name.to_lowercase().replace(' ', ".")
                        )),
                        phone: None,
                        property_address: None,
                    },
                    confidence,
                    signal_count: 4,
                    model_version: Some(format!("{}-v1", alert_type.as_str())),
                    top_signals: vec![
                        SignalContribution {
                            signal: "days_since_last_sale".to_string(),
                            value: 2_900.0,
                            importance: 0.31,
                        },
                        SignalContribution {
                            signal: "recent_listing_views".to_string(),
                            value: 6.0,
                            importance: confidence / 4.0,
                        },
                    ],
                    created_at: at,
                    updated_at: at,
                    assigned_to: None,
                    contact_attempts: 0,
                    last_contact_method: None,
                    last_contacted_at: None,
                    outcome: None,
                }
            })
            .collect();
        let agents = ["Jordan Avery", "Sam Patel"]
            .into_iter()
            .map(|name| Agent {
                id: AgentId::new(),
                name: name.to_string(),
                email: None,
                active_alerts: 0,
            })
            .collect();
        Self { alerts, agents }
    }
}

#[derive(Debug, Default)]
struct BackendState {
    alerts: Vec<Alert>,
    agents: Vec<Agent>,
    pending_failure: Option<String>,
}

/// Process-local alert service with a broadcast push feed.
///
/// Every accepted command emits the resulting [`LiveEvent::AlertPatched`] on the
/// feed, the same way the remote service reports changes to other sessions.
#[derive(Debug)]
pub struct InMemoryBackend {
    state: Mutex<BackendState>,
    push: broadcast::Sender<PushMessage>,
}

impl InMemoryBackend {
    /// # Errors
    /// Returns an error when a seed alert fails validation or an id repeats.
    pub fn new(seed: SeedDocument) -> Result<Self> {
        let mut seen = HashSet::new();
        for alert in &seed.alerts {
            alert.validate().with_context(|| format!("invalid seed alert {}", alert.id))?;
            if !seen.insert(alert.id) {
                bail!("duplicate seed alert {}", alert.id);
            }
        }
        let (push, _) = broadcast::channel(PUSH_CHANNEL_CAPACITY);
        Ok(Self {
            state: Mutex::new(BackendState {
                alerts: seed.alerts,
                agents: seed.agents,
                pending_failure: None,
            }),
            push,
        })
    }

    /// Make the next call fail with `message`, as a dropped connection would.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.lock().pending_failure = Some(message.into());
    }

    /// Create an alert server-side and announce it on the push feed.
    ///
    /// # Errors
    /// Returns an error when the alert is invalid or its id already exists.
    pub fn publish(&self, alert: Alert) -> Result<AlertId> {
        alert.validate().context("invalid alert")?;
        let id = alert.id;
        {
            let mut state = self.lock();
            if state.alerts.iter().any(|existing| existing.id == id) {
                bail!("alert already exists: {id}");
            }
            state.alerts.push(alert.clone());
        }
        self.broadcast(PushMessage::Event(LiveEvent::NewAlert { alert }));
        Ok(id)
    }

    pub fn announce(&self, status: ConnectionStatus) {
        self.broadcast(PushMessage::Status(status));
    }

    #[must_use]
    pub fn alert(&self, id: AlertId) -> Option<Alert> {
        self.lock().alerts.iter().find(|alert| alert.id == id).cloned()
    }

    #[must_use]
    pub fn agents(&self) -> Vec<Agent> {
        self.lock().agents.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().alerts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn broadcast(&self, message: PushMessage) {
        if self.push.send(message).is_err() {
            tracing::debug!("push message had no subscribers");
        }
    }

    fn take_failure(state: &mut BackendState) -> Result<()> {
        match state.pending_failure.take() {
            Some(message) => Err(anyhow!(message)),
            None => Ok(()),
        }
    }

    fn page(&self, query: &AlertQuery) -> Result<FetchResponse> {
        let mut state = self.lock();
        Self::take_failure(&mut state)?;
        if query.page_size == 0 {
            bail!("page_size MUST be positive");
        }

        let mut matching = state
            .alerts
            .iter()
            .filter(|alert| query.filters.matches(alert))
            .cloned()
            .collect::<Vec<_>>();
        sort_alerts(&mut matching, query.sort_key);

        let page_size = query.page_size as usize;
        let start = (query.page.max(1) as usize - 1).saturating_mul(page_size);
        let alerts = matching.iter().skip(start).take(page_size).cloned().collect::<Vec<_>>();
        let has_more = matching.len() > start.saturating_add(page_size);
        tracing::debug!(
            user_id = %query.user_id,
            page = query.page,
            returned = alerts.len(),
            has_more,
            "served alert page"
        );
        Ok(FetchResponse { alerts, has_more })
    }

    fn statistics(&self, filters: &AlertFilters) -> Result<AlertStatistics> {
        let mut state = self.lock();
        Self::take_failure(&mut state)?;
        Ok(AlertStatistics::from_alerts(state.alerts.iter().filter(|alert| filters.matches(alert))))
    }

    fn list_agents(&self) -> Result<Vec<Agent>> {
        let mut state = self.lock();
        Self::take_failure(&mut state)?;
        Ok(state.agents.clone())
    }

    /// Run `change` against one alert and publish the resulting patch.
    fn modify<F>(&self, id: AlertId, change: F) -> Result<()>
    where
        F: FnOnce(&mut Alert, OffsetDateTime) -> Result<(), SyncError>,
    {
        let patch = {
            let mut state = self.lock();
            Self::take_failure(&mut state)?;
            let alert = state
                .alerts
                .iter_mut()
                .find(|alert| alert.id == id)
                .ok_or(SyncError::UnknownAlert(id))?;
            change(alert, OffsetDateTime::now_utc())?;
            patch_for(alert)
        };
        self.broadcast(PushMessage::Event(LiveEvent::AlertPatched { id, patch }));
        Ok(())
    }

    fn modify_many(&self, ids: &[AlertId], status: AlertStatus) -> Result<usize> {
        if status == AlertStatus::Resolved {
            return Err(SyncError::OutcomeRequired.into());
        }
        let patches = {
            let mut state = self.lock();
            Self::take_failure(&mut state)?;
            let now = OffsetDateTime::now_utc();
            let wanted = ids.iter().copied().collect::<HashSet<_>>();
            state
                .alerts
                .iter_mut()
                .filter(|alert| wanted.contains(&alert.id))
                .filter_map(|alert| match alert.transition(status, now) {
                    Ok(()) => Some((alert.id, patch_for(alert))),
                    Err(err) => {
                        tracing::debug!(alert_id = %alert.id, error = %err, "bulk update skipped alert");
                        None
                    }
                })
                .collect::<Vec<_>>()
        };
        let changed = patches.len();
        for (id, patch) in patches {
            self.broadcast(PushMessage::Event(LiveEvent::AlertPatched { id, patch }));
        }
        Ok(changed)
    }
}

fn patch_for(alert: &Alert) -> AlertPatch {
    AlertPatch {
        status: Some(alert.status),
        assigned_to: alert.assigned_to,
        outcome: alert.outcome.clone(),
        updated_at: Some(alert.updated_at),
        ..AlertPatch::default()
    }
}

impl AlertBackend for InMemoryBackend {
    fn get_user_alerts(
        &self,
        query: AlertQuery,
    ) -> impl Future<Output = Result<FetchResponse>> + Send {
        ready(self.page(&query))
    }

    fn get_statistics(
        &self,
        _user_id: String,
        filters: AlertFilters,
    ) -> impl Future<Output = Result<AlertStatistics>> + Send {
        ready(self.statistics(&filters))
    }

    fn get_available_agents(&self) -> impl Future<Output = Result<Vec<Agent>>> + Send {
        ready(self.list_agents())
    }

    fn acknowledge_alert(&self, id: AlertId) -> impl Future<Output = Result<()>> + Send {
        ready(self.modify(id, |alert, now| alert.transition(AlertStatus::Acknowledged, now)))
    }

    fn mark_as_contacted(
        &self,
        id: AlertId,
        method: ContactMethod,
    ) -> impl Future<Output = Result<()>> + Send {
        ready(self.modify(id, |alert, now| {
            alert.transition(AlertStatus::Contacted, now)?;
            alert.contact_attempts += 1;
            alert.last_contact_method = Some(method);
            alert.last_contacted_at = Some(now);
            Ok(())
        }))
    }

    fn dismiss_alert(&self, id: AlertId) -> impl Future<Output = Result<()>> + Send {
        ready(self.modify(id, |alert, now| alert.transition(AlertStatus::Dismissed, now)))
    }

    fn assign_alert(
        &self,
        id: AlertId,
        agent: AgentId,
    ) -> impl Future<Output = Result<()>> + Send {
        let known = self.lock().agents.iter().any(|candidate| candidate.id == agent);
        let result = if known {
            self.modify(id, |alert, now| {
                if alert.status.is_terminal() {
                    return Err(SyncError::TerminalAlert(alert.id));
                }
                alert.assigned_to = Some(agent);
                if now > alert.updated_at {
                    alert.updated_at = now;
                }
                Ok(())
            })
        } else {
            Err(anyhow!("unknown agent: {agent}"))
        };
        ready(result)
    }

    fn record_outcome(
        &self,
        id: AlertId,
        outcome: OutcomeRecord,
    ) -> impl Future<Output = Result<()>> + Send {
        ready(self.modify(id, |alert, now| {
            let previous = alert.outcome.replace(outcome);
            let result = alert.transition(AlertStatus::Resolved, now);
            if result.is_err() {
                alert.outcome = previous;
            }
            result
        }))
    }

    fn bulk_update_status(
        &self,
        ids: Vec<AlertId>,
        status: AlertStatus,
    ) -> impl Future<Output = Result<usize>> + Send {
        ready(self.modify_many(&ids, status))
    }

    fn bulk_dismiss(&self, ids: Vec<AlertId>) -> impl Future<Output = Result<usize>> + Send {
        ready(self.modify_many(&ids, AlertStatus::Dismissed))
    }

    fn subscribe(&self) -> broadcast::Receiver<PushMessage> {
        self.push.subscribe()
    }
}
