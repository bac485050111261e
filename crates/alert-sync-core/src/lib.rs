use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

mod board;
mod fetch;
mod live;
mod query;
mod selection;
mod stats;
mod store;

pub use board::{BoardSnapshot, BoardState, Command};
pub use fetch::{
    FetchCoordinator, FetchMode, FetchOutcome, FetchRequest, FetchResponse, FetchTicket,
    LoadMoreBlocked, DEFAULT_PAGE_SIZE,
};
pub use live::{ConnectionStatus, LiveApply, LiveEvent, LiveUpdateBridge, PushMessage};
pub use query::{sort_alerts, AlertFilters, SortKey};
pub use selection::SelectionSet;
pub use stats::AlertStatistics;
pub use store::AlertStore;

/// Alerts at or above this confidence count as high-confidence opportunities.
pub const HIGH_CONFIDENCE_THRESHOLD: f32 = 0.8;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum SyncError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("alert not found: {0}")]
    UnknownAlert(AlertId),
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: AlertStatus, to: AlertStatus },
    #[error("alert {0} is closed")]
    TerminalAlert(AlertId),
    #[error("resolving an alert requires an outcome record")]
    OutcomeRequired,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AlertId(pub Ulid);

impl AlertId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for AlertId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AgentId(pub Ulid);

impl AgentId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for AgentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Urgent => 4,
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

/// Lifecycle of an alert.
///
/// The main line runs `new -> acknowledged -> contacted -> resolved`; `dismissed`
/// is a parallel terminal state reachable from any open state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    New,
    Acknowledged,
    Contacted,
    Resolved,
    Dismissed,
}

impl AlertStatus {
    /// Position on the main line. `dismissed` sits outside it.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::New => 1,
            Self::Acknowledged => 2,
            Self::Contacted => 3,
            Self::Resolved => 4,
            Self::Dismissed => 0,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Dismissed)
    }

    /// Whether an explicit command may move an alert from `self` to `target`.
    ///
    /// Forward moves may skip steps, a contacted alert may be contacted again,
    /// and any open alert may be dismissed.
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match target {
            Self::Dismissed => true,
            Self::New => false,
            Self::Contacted if self == Self::Contacted => true,
            _ => target.rank() > self.rank(),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Acknowledged => "acknowledged",
            Self::Contacted => "contacted",
            Self::Resolved => "resolved",
            Self::Dismissed => "dismissed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "acknowledged" => Some(Self::Acknowledged),
            "contacted" => Some(Self::Contacted),
            "resolved" => Some(Self::Resolved),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }
}

impl Display for AlertStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Homeowner intent predicted by the scoring model that raised the alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Sell,
    Buy,
    Refinance,
    Investment,
}

impl AlertType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sell => "sell",
            Self::Buy => "buy",
            Self::Refinance => "refinance",
            Self::Investment => "investment",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sell" => Some(Self::Sell),
            "buy" => Some(Self::Buy),
            "refinance" => Some(Self::Refinance),
            "investment" => Some(Self::Investment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContactMethod {
    Phone,
    Email,
    Sms,
    InPerson,
}

impl ContactMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Email => "email",
            Self::Sms => "sms",
            Self::InPerson => "in_person",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "phone" => Some(Self::Phone),
            "email" => Some(Self::Email),
            "sms" => Some(Self::Sms),
            "in_person" => Some(Self::InPerson),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeResult {
    Converted,
    FollowUpScheduled,
    NotInterested,
    Unreachable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutcomeRecord {
    pub result: OutcomeResult,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub deal_value: Option<f64>,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ContactInfo {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub property_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub active_alerts: u32,
}

/// One scoring signal behind an alert's confidence, most important first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalContribution {
    pub signal: String,
    pub value: f32,
    pub importance: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: AlertId,
    pub alert_type: AlertType,
    pub priority: Priority,
    pub status: AlertStatus,
    pub contact: ContactInfo,
    pub confidence: f32,
    #[serde(default)]
    pub signal_count: u32,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_signals: Vec<SignalContribution>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(default)]
    pub assigned_to: Option<AgentId>,
    #[serde(default)]
    pub contact_attempts: u32,
    #[serde(default)]
    pub last_contact_method: Option<ContactMethod>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_contacted_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub outcome: Option<OutcomeRecord>,
}

impl Alert {
    /// Validate one alert record as received from a fetch or push source.
    ///
    /// # Errors
    /// Returns [`SyncError::Validation`] when confidence is out of range, the
    /// contact has no name, a signal carries a non-finite score, timestamps run
    /// backwards, or a resolved alert carries no outcome.
    pub fn validate(&self) -> Result<(), SyncError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(SyncError::Validation("confidence MUST be in [0.0, 1.0]".to_string()));
        }

        if self.contact.name.trim().is_empty() {
            return Err(SyncError::Validation("contact name MUST be provided".to_string()));
        }

        if self
            .top_signals
            .iter()
            .any(|signal| !signal.value.is_finite() || !signal.importance.is_finite())
        {
            return Err(SyncError::Validation("signal scores MUST be finite".to_string()));
        }

        if self.updated_at < self.created_at {
            return Err(SyncError::Validation(
                "updated_at MUST NOT precede created_at".to_string(),
            ));
        }

        if self.status == AlertStatus::Resolved && self.outcome.is_none() {
            return Err(SyncError::OutcomeRequired);
        }

        Ok(())
    }

    /// Move the alert along its status machine.
    ///
    /// # Errors
    /// Returns [`SyncError::TerminalAlert`] for closed alerts,
    /// [`SyncError::InvalidTransition`] for moves the machine forbids, and
    /// [`SyncError::OutcomeRequired`] when resolving without an outcome.
    pub fn transition(&mut self, to: AlertStatus, at: OffsetDateTime) -> Result<(), SyncError> {
        self.check_transition(to)?;
        self.status = to;
        self.touch(at);
        Ok(())
    }

    /// Same checks as [`Alert::transition`] without mutating.
    ///
    /// # Errors
    /// See [`Alert::transition`].
    pub fn check_transition(&self, to: AlertStatus) -> Result<(), SyncError> {
        if self.status.is_terminal() {
            return Err(SyncError::TerminalAlert(self.id));
        }
        if !self.status.can_transition_to(to) {
            return Err(SyncError::InvalidTransition { from: self.status, to });
        }
        if to == AlertStatus::Resolved && self.outcome.is_none() {
            return Err(SyncError::OutcomeRequired);
        }
        Ok(())
    }

    fn touch(&mut self, at: OffsetDateTime) {
        if at > self.updated_at {
            self.updated_at = at;
        }
    }
}

/// Partial alert update as delivered by the push channel.
///
/// Absent fields leave the stored value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlertPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AlertStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<ContactInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OutcomeRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_count: Option<u32>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub updated_at: Option<OffsetDateTime>,
}

impl AlertPatch {
    #[must_use]
    pub fn status(status: AlertStatus) -> Self {
        Self { status: Some(status), ..Self::default() }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Merge every present field into `alert`.
    ///
    /// The push channel reports server truth, so status is taken as-is rather
    /// than run through the command state machine. Out-of-range confidence
    /// values are dropped.
    pub fn apply_to(&self, alert: &mut Alert) {
        if let Some(priority) = self.priority {
            alert.priority = priority;
        }
        if let Some(status) = self.status {
            alert.status = status;
        }
        if let Some(confidence) = self.confidence {
            if (0.0..=1.0).contains(&confidence) {
                alert.confidence = confidence;
            }
        }
        if let Some(contact) = &self.contact {
            alert.contact = contact.clone();
        }
        if let Some(agent) = self.assigned_to {
            alert.assigned_to = Some(agent);
        }
        if let Some(outcome) = &self.outcome {
            alert.outcome = Some(outcome.clone());
        }
        if let Some(signal_count) = self.signal_count {
            alert.signal_count = signal_count;
        }
        if let Some(updated_at) = self.updated_at {
            alert.touch(updated_at);
        }
    }
}
