use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::{AgentId, Alert, AlertStatus, AlertType, Priority};

/// Filter parameters for the alert list.
///
/// Every `None` field is inactive. Dismissed alerts are hidden unless `status`
/// asks for them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlertFilters {
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub status: Option<AlertStatus>,
    #[serde(default)]
    pub alert_type: Option<AlertType>,
    #[serde(default)]
    pub min_confidence: Option<f32>,
    #[serde(default)]
    pub assigned_to: Option<AgentId>,
    /// Case-insensitive substring over contact name, email and property address.
    #[serde(default)]
    pub search: Option<String>,
}

impl AlertFilters {
    #[must_use]
    pub fn matches(&self, alert: &Alert) -> bool {
        match self.status {
            Some(status) if alert.status != status => return false,
            None if alert.status == AlertStatus::Dismissed => return false,
            _ => {}
        }
        if let Some(priority) = self.priority {
            if alert.priority != priority {
                return false;
            }
        }
        if let Some(alert_type) = self.alert_type {
            if alert.alert_type != alert_type {
                return false;
            }
        }
        if let Some(min_confidence) = self.min_confidence {
            if alert.confidence < min_confidence {
                return false;
            }
        }
        if let Some(agent) = self.assigned_to {
            if alert.assigned_to != Some(agent) {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.trim().to_lowercase();
            if !needle.is_empty() && !search_haystack(alert).any(|field| field.contains(&needle)) {
                return false;
            }
        }
        true
    }
}

fn search_haystack(alert: &Alert) -> impl Iterator<Item = String> + '_ {
    std::iter::once(Some(&alert.contact.name))
        .chain([alert.contact.email.as_ref(), alert.contact.property_address.as_ref()])
        .flatten()
        .map(|value| value.to_lowercase())
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    DateNew,
    DateOld,
    ConfidenceHigh,
    ConfidenceLow,
    Priority,
}

impl SortKey {
    /// Total order for `key`; ties fall back to newest first, then id.
    #[must_use]
    pub fn compare(self, lhs: &Alert, rhs: &Alert) -> Ordering {
        let primary = match self {
            Self::DateNew => rhs.created_at.cmp(&lhs.created_at),
            Self::DateOld => lhs.created_at.cmp(&rhs.created_at),
            Self::ConfidenceHigh => {
                rhs.confidence.partial_cmp(&lhs.confidence).unwrap_or(Ordering::Equal)
            }
            Self::ConfidenceLow => {
                lhs.confidence.partial_cmp(&rhs.confidence).unwrap_or(Ordering::Equal)
            }
            Self::Priority => rhs
                .priority
                .rank()
                .cmp(&lhs.priority.rank())
                .then_with(|| {
                    rhs.confidence.partial_cmp(&lhs.confidence).unwrap_or(Ordering::Equal)
                }),
        };
        primary
            .then_with(|| rhs.created_at.cmp(&lhs.created_at))
            .then_with(|| lhs.id.cmp(&rhs.id))
    }

    /// Human-readable ordering trace for this key.
    #[must_use]
    pub fn tie_breakers(self) -> Vec<String> {
        let mut order = match self {
            Self::DateNew => vec!["created_at desc".to_string()],
            Self::DateOld => vec!["created_at asc".to_string()],
            Self::ConfidenceHigh => vec!["confidence desc".to_string()],
            Self::ConfidenceLow => vec!["confidence asc".to_string()],
            Self::Priority => {
                vec!["priority_rank desc".to_string(), "confidence desc".to_string()]
            }
        };
        order.push("created_at desc".to_string());
        order.push("alert_id asc".to_string());
        order.dedup();
        order
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DateNew => "date_new",
            Self::DateOld => "date_old",
            Self::ConfidenceHigh => "confidence_high",
            Self::ConfidenceLow => "confidence_low",
            Self::Priority => "priority",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "date_new" => Some(Self::DateNew),
            "date_old" => Some(Self::DateOld),
            "confidence_high" => Some(Self::ConfidenceHigh),
            "confidence_low" => Some(Self::ConfidenceLow),
            "priority" => Some(Self::Priority),
            _ => None,
        }
    }
}

/// Stable in-place sort by `key`.
pub fn sort_alerts(alerts: &mut [Alert], key: SortKey) {
    alerts.sort_by(|lhs, rhs| key.compare(lhs, rhs));
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::test_fixtures::{fixture_time, mk_alert};

    #[test]
    fn empty_filters_hide_only_dismissed() {
        let filters = AlertFilters::default();
        let mut alert = mk_alert("01K1D3A7E9J5MNNN8F5JVCJY51", 0, 0.5);
        assert!(filters.matches(&alert));

        alert.status = AlertStatus::Dismissed;
        assert!(!filters.matches(&alert));

        let dismissed_view =
            AlertFilters { status: Some(AlertStatus::Dismissed), ..AlertFilters::default() };
        assert!(dismissed_view.matches(&alert));
    }

    #[test]
    fn combined_filters() {
        let filters = AlertFilters {
            priority: Some(Priority::High),
            min_confidence: Some(0.6),
            search: Some("HARBOR".to_string()),
            ..AlertFilters::default()
        };
        let mut alert = mk_alert("01K1D3A7E9J5MNNN8F5JVCJY51", 0, 0.7);
        assert!(!filters.matches(&alert));

        alert.priority = Priority::High;
        assert!(filters.matches(&alert));

        alert.confidence = 0.5;
        assert!(!filters.matches(&alert));

        alert.confidence = 0.9;
        alert.contact.property_address = Some("3 Elm Street".to_string());
        assert!(!filters.matches(&alert));
    }

    #[test]
    fn assigned_agent_filter() {
        let agent = AgentId::new();
        let filters = AlertFilters { assigned_to: Some(agent), ..AlertFilters::default() };
        let mut alert = mk_alert("01K1D3A7E9J5MNNN8F5JVCJY51", 0, 0.7);
        assert!(!filters.matches(&alert));
        alert.assigned_to = Some(agent);
        assert!(filters.matches(&alert));
    }

    #[test]
    fn priority_sort_breaks_ties_by_confidence() {
        let mut urgent = mk_alert("01K1D3A7E9J5MNNN8F5JVCJY51", 0, 0.2);
        urgent.priority = Priority::Urgent;
        let mut high_strong = mk_alert("01K1D3A7E9J5MNNN8F5JVCJY52", 10, 0.9);
        high_strong.priority = Priority::High;
        let mut high_weak = mk_alert("01K1D3A7E9J5MNNN8F5JVCJY53", 20, 0.3);
        high_weak.priority = Priority::High;

        let mut alerts = vec![high_weak.clone(), urgent.clone(), high_strong.clone()];
        sort_alerts(&mut alerts, SortKey::Priority);
        let ids = alerts.iter().map(|alert| alert.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![urgent.id, high_strong.id, high_weak.id]);
    }

    #[test]
    fn date_sorts_are_mirror_images() {
        let mut alerts = (0..4)
            .map(|index| {
                let mut alert = mk_alert("01K1D3A7E9J5MNNN8F5JVCJY51", index * 60, 0.5);
                alert.id = crate::AlertId::new();
                alert
            })
            .collect::<Vec<_>>();
        sort_alerts(&mut alerts, SortKey::DateNew);
        let newest_first = alerts.iter().map(|alert| alert.created_at).collect::<Vec<_>>();
        sort_alerts(&mut alerts, SortKey::DateOld);
        let mut oldest_first = alerts.iter().map(|alert| alert.created_at).collect::<Vec<_>>();
        oldest_first.reverse();
        assert_eq!(newest_first, oldest_first);
        assert_eq!(alerts.first().map(|alert| alert.created_at), Some(fixture_time()));
    }

    #[test]
    fn sort_keys_parse_round_trip_and_describe_their_order() {
        for key in [
            SortKey::DateNew,
            SortKey::DateOld,
            SortKey::ConfidenceHigh,
            SortKey::ConfidenceLow,
            SortKey::Priority,
        ] {
            assert_eq!(SortKey::parse(key.as_str()), Some(key));
            assert_eq!(key.tie_breakers().last().map(String::as_str), Some("alert_id asc"));
        }
        assert_eq!(SortKey::DateNew.tie_breakers(), vec!["created_at desc", "alert_id asc"]);
    }

    fn alerts_with_confidences(confidences: &[u16]) -> Vec<Alert> {
        confidences
            .iter()
            .enumerate()
            .map(|(index, value)| {
                let offset = i64::try_from(index).unwrap_or(i64::MAX);
                let mut alert =
                    mk_alert("01K1D3A7E9J5MNNN8F5JVCJY51", offset, f32::from(*value) / 1000.0);
                alert.id = crate::AlertId(ulid::Ulid::from_parts(u64::from(*value), 0));
                alert
            })
            .collect()
    }

    proptest! {
        #[test]
        fn property_confidence_high_is_non_increasing(confidences in proptest::collection::btree_set(0_u16..=1000, 0..24)) {
            let values = confidences.into_iter().collect::<Vec<_>>();
            let mut alerts = alerts_with_confidences(&values);
            sort_alerts(&mut alerts, SortKey::ConfidenceHigh);
            for pair in alerts.windows(2) {
                prop_assert!(pair[0].confidence >= pair[1].confidence);
            }
        }
    }

    proptest! {
        #[test]
        fn property_sorting_is_idempotent(confidences in proptest::collection::vec(0_u16..=1000, 0..24), key_index in 0_usize..5) {
            let key = [
                SortKey::DateNew,
                SortKey::DateOld,
                SortKey::ConfidenceHigh,
                SortKey::ConfidenceLow,
                SortKey::Priority,
            ][key_index];
            let mut once = alerts_with_confidences(&confidences);
            sort_alerts(&mut once, key);
            let mut twice = once.clone();
            sort_alerts(&mut twice, key);
            prop_assert_eq!(once, twice);
        }
    }
}
