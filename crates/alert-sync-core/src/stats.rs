use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Alert, AlertStatus, OutcomeResult, Priority, HIGH_CONFIDENCE_THRESHOLD};

/// Dashboard counters over a set of alerts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlertStatistics {
    pub total: usize,
    pub by_status: BTreeMap<AlertStatus, usize>,
    pub by_priority: BTreeMap<Priority, usize>,
    pub average_confidence: Option<f32>,
    pub high_confidence: usize,
    pub converted: usize,
    /// Converted share of resolved alerts; `None` until something is resolved.
    pub conversion_rate: Option<f32>,
}

impl AlertStatistics {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_alerts<'a, I>(alerts: I) -> Self
    where
        I: IntoIterator<Item = &'a Alert>,
    {
        let mut stats = Self::default();
        let mut confidence_sum = 0.0_f64;
        let mut resolved = 0_usize;

        for alert in alerts {
            stats.total += 1;
            *stats.by_status.entry(alert.status).or_default() += 1;
            *stats.by_priority.entry(alert.priority).or_default() += 1;
            confidence_sum += f64::from(alert.confidence);
            if alert.confidence >= HIGH_CONFIDENCE_THRESHOLD {
                stats.high_confidence += 1;
            }
            if alert.status == AlertStatus::Resolved {
                resolved += 1;
                if alert.outcome.as_ref().map(|outcome| outcome.result)
                    == Some(OutcomeResult::Converted)
                {
                    stats.converted += 1;
                }
            }
        }

        if stats.total > 0 {
            #[allow(clippy::cast_possible_truncation)]
            let average = (confidence_sum / stats.total as f64) as f32;
            stats.average_confidence = Some(average);
        }
        if resolved > 0 {
            stats.conversion_rate = Some(stats.converted as f32 / resolved as f32);
        }
        stats
    }

    #[must_use]
    pub fn count_status(&self, status: AlertStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}
