use std::cmp::Ordering;
use std::collections::BTreeSet;

use time::OffsetDateTime;

use crate::query::{sort_alerts, SortKey};
use crate::selection::SelectionSet;
use crate::{Alert, AlertId, AlertPatch, AlertStatus};

/// Ordered, id-unique collection of the alerts currently visible.
///
/// Every operation that drops an alert also drops it from the embedded
/// [`SelectionSet`] before returning, so a bulk action never sees a dangling id.
/// Merge operations never fail: duplicates and unknown ids are no-ops.
#[derive(Debug, Clone, Default)]
pub struct AlertStore {
    alerts: Vec<Alert>,
    sort_key: SortKey,
    selection: SelectionSet,
}

impl AlertStore {
    #[must_use]
    pub fn new(sort_key: SortKey) -> Self {
        Self { alerts: Vec::new(), sort_key, selection: SelectionSet::new() }
    }

    #[must_use]
    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    #[must_use]
    pub fn get(&self, id: &AlertId) -> Option<&Alert> {
        self.alerts.iter().find(|alert| alert.id == *id)
    }

    #[must_use]
    pub fn contains(&self, id: &AlertId) -> bool {
        self.position(id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = AlertId> + '_ {
        self.alerts.iter().map(|alert| alert.id)
    }

    #[must_use]
    pub fn sort_key(&self) -> SortKey {
        self.sort_key
    }

    /// Switch the active sort key and re-derive the whole order.
    pub fn set_sort_key(&mut self, key: SortKey) {
        self.sort_key = key;
        sort_alerts(&mut self.alerts, key);
    }

    /// Add `alert` at the position its sort key dictates.
    ///
    /// Returns `false` without touching the store when the id is already present.
    pub fn insert(&mut self, alert: Alert) -> bool {
        if self.contains(&alert.id) {
            tracing::debug!(alert_id = %alert.id, "duplicate insert ignored");
            return false;
        }
        let index = self.insertion_point(&alert);
        self.alerts.insert(index, alert);
        true
    }

    /// Merge `patch` into the stored alert with `id`.
    ///
    /// Returns `false` when the alert is not (yet) visible; the patch is dropped.
    pub fn patch(&mut self, id: &AlertId, patch: &AlertPatch) -> bool {
        let Some(index) = self.position(id) else {
            tracing::debug!(alert_id = %id, "patch for unknown alert dropped");
            return false;
        };
        patch.apply_to(&mut self.alerts[index]);
        if patch.priority.is_some() || patch.confidence.is_some() {
            self.reposition(index);
        }
        true
    }

    /// Apply `status` to every listed alert that is present and allowed to move.
    ///
    /// Missing ids and alerts whose state machine forbids the move are skipped.
    /// `dismissed` removes the alerts from the store. Returns how many changed.
    pub fn bulk_patch(&mut self, ids: &[AlertId], status: AlertStatus, at: OffsetDateTime) -> usize {
        let wanted = ids.iter().collect::<BTreeSet<_>>();
        let mut changed = BTreeSet::new();
        for alert in &mut self.alerts {
            if !wanted.contains(&alert.id) {
                continue;
            }
            match alert.transition(status, at) {
                Ok(()) => {
                    changed.insert(alert.id);
                }
                Err(err) => {
                    tracing::debug!(alert_id = %alert.id, error = %err, "bulk status skipped");
                }
            }
        }
        if status == AlertStatus::Dismissed {
            self.drop_where(|alert| changed.contains(&alert.id));
        }
        changed.len()
    }

    /// Remove one alert, pruning it from the selection.
    pub fn remove(&mut self, id: &AlertId) -> Option<Alert> {
        let index = self.position(id)?;
        self.selection.retain(|selected| selected != id);
        Some(self.alerts.remove(index))
    }

    /// Remove every listed alert that is present. Returns how many were removed.
    pub fn bulk_remove(&mut self, ids: &[AlertId]) -> usize {
        let doomed = ids.iter().collect::<BTreeSet<_>>();
        self.drop_where(|alert| doomed.contains(&alert.id))
    }

    /// Discard the current contents and take `page` in its delivered order.
    ///
    /// Repeated ids inside the page keep their first occurrence.
    pub fn replace_all(&mut self, page: Vec<Alert>) {
        let mut seen = BTreeSet::new();
        self.alerts = page.into_iter().filter(|alert| seen.insert(alert.id)).collect();
        self.prune_selection();
    }

    /// Merge `page` at sort position, skipping ids already present (e.g.
    /// delivered by push before the page arrived). Returns how many alerts were
    /// added.
    ///
    /// A page that sorts after everything stored lands as a plain
    /// concatenation; alerts pushed live earlier keep their relative order.
    pub fn append_page(&mut self, page: Vec<Alert>) -> usize {
        let mut seen = self.ids().collect::<BTreeSet<_>>();
        let mut added = 0;
        for alert in page {
            if !seen.insert(alert.id) {
                continue;
            }
            let index = self.insertion_point(&alert);
            self.alerts.insert(index, alert);
            added += 1;
        }
        added
    }

    #[must_use]
    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    /// Toggle selection of a visible alert. Unknown ids are ignored.
    pub fn toggle_selected(&mut self, id: AlertId) -> bool {
        if !self.contains(&id) {
            return false;
        }
        self.selection.toggle(id)
    }

    pub fn select_all_visible(&mut self) {
        let visible = self.ids().collect::<Vec<_>>();
        self.selection.select_all(visible);
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Run `f` against the stored alert with `id`. Sort fields must not change.
    pub(crate) fn update<F, T>(&mut self, id: &AlertId, f: F) -> Option<T>
    where
        F: FnOnce(&mut Alert) -> T,
    {
        let index = self.position(id)?;
        let alert = &mut self.alerts[index];
        let original_id = alert.id;
        let result = f(&mut *alert);
        alert.id = original_id;
        Some(result)
    }

    fn position(&self, id: &AlertId) -> Option<usize> {
        self.alerts.iter().position(|alert| alert.id == *id)
    }

    fn insertion_point(&self, alert: &Alert) -> usize {
        let key = self.sort_key;
        self.alerts.partition_point(|existing| key.compare(existing, alert) != Ordering::Greater)
    }

    fn reposition(&mut self, index: usize) {
        let alert = self.alerts.remove(index);
        let target = self.insertion_point(&alert);
        self.alerts.insert(target, alert);
    }

    fn drop_where<F>(&mut self, doomed: F) -> usize
    where
        F: Fn(&Alert) -> bool,
    {
        let before = self.alerts.len();
        self.alerts.retain(|alert| !doomed(alert));
        let removed = before - self.alerts.len();
        if removed > 0 {
            self.prune_selection();
        }
        removed
    }

    fn prune_selection(&mut self) {
        let present = self.alerts.iter().map(|alert| alert.id).collect::<BTreeSet<_>>();
        self.selection.retain(|id| present.contains(id));
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::test_fixtures::{fixture_id, fixture_time, mk_alert, mk_outcome};
    use crate::{OutcomeResult, Priority};

    const ID_A: &str = "01K1D3A7E9J5MNNN8F5JVCJY51";
    const ID_B: &str = "01K1D3A7E9J5MNNN8F5JVCJY52";
    const ID_C: &str = "01K1D3A7E9J5MNNN8F5JVCJY53";
    const ID_D: &str = "01K1D3A7E9J5MNNN8F5JVCJY54";
    const ID_E: &str = "01K1D3A7E9J5MNNN8F5JVCJY55";
    const ID_Z: &str = "01K1D3A7E9J5MNNN8F5JVCJY5Z";

    fn ids(store: &AlertStore) -> Vec<AlertId> {
        store.ids().collect()
    }

    #[test]
    fn insert_is_idempotent() {
        let a = mk_alert(ID_A, 0, 0.9);
        let mut once = AlertStore::new(SortKey::DateNew);
        assert!(once.insert(a.clone()));

        let mut twice = once.clone();
        assert!(!twice.insert(a));
        assert_eq!(once.alerts(), twice.alerts());
    }

    #[test]
    fn insert_lands_at_sorted_position() {
        let mut store = AlertStore::new(SortKey::ConfidenceHigh);
        store.replace_all(vec![mk_alert(ID_A, 0, 0.9), mk_alert(ID_B, 10, 0.5)]);
        assert!(store.insert(mk_alert(ID_C, 20, 0.7)));
        assert_eq!(ids(&store), vec![fixture_id(ID_A), fixture_id(ID_C), fixture_id(ID_B)]);

        let mut newest_first = AlertStore::new(SortKey::DateNew);
        newest_first.replace_all(vec![mk_alert(ID_B, 10, 0.5), mk_alert(ID_A, 0, 0.9)]);
        newest_first.insert(mk_alert(ID_C, 20, 0.1));
        assert_eq!(ids(&newest_first).first(), Some(&fixture_id(ID_C)));
    }

    #[test]
    fn set_sort_key_rederives_order() {
        let mut store = AlertStore::new(SortKey::DateNew);
        store.replace_all(vec![
            mk_alert(ID_C, 20, 0.1),
            mk_alert(ID_B, 10, 0.9),
            mk_alert(ID_A, 0, 0.5),
        ]);
        store.set_sort_key(SortKey::ConfidenceHigh);
        assert_eq!(ids(&store), vec![fixture_id(ID_B), fixture_id(ID_A), fixture_id(ID_C)]);
        store.set_sort_key(SortKey::DateOld);
        assert_eq!(ids(&store), vec![fixture_id(ID_A), fixture_id(ID_B), fixture_id(ID_C)]);
        assert_eq!(store.sort_key(), SortKey::DateOld);
    }

    #[test]
    fn patch_before_insert_is_a_lost_update() {
        let mut store = AlertStore::new(SortKey::DateNew);
        assert!(!store.patch(&fixture_id(ID_Z), &AlertPatch::status(AlertStatus::Acknowledged)));
        assert!(store.is_empty());

        store.replace_all(vec![mk_alert(ID_Z, 0, 0.6)]);
        assert_eq!(store.get(&fixture_id(ID_Z)).map(|alert| alert.status), Some(AlertStatus::New));
    }

    #[test]
    fn patch_repositions_when_sort_field_changes() {
        let mut store = AlertStore::new(SortKey::ConfidenceHigh);
        store.replace_all(vec![mk_alert(ID_A, 0, 0.9), mk_alert(ID_B, 10, 0.5)]);
        let patch = AlertPatch { confidence: Some(0.95), ..AlertPatch::default() };
        assert!(store.patch(&fixture_id(ID_B), &patch));
        assert_eq!(ids(&store), vec![fixture_id(ID_B), fixture_id(ID_A)]);

        let priority = AlertPatch { priority: Some(Priority::Urgent), ..AlertPatch::default() };
        assert!(store.patch(&fixture_id(ID_A), &priority));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn bulk_patch_skips_missing_and_forbidden() {
        let mut store = AlertStore::new(SortKey::DateNew);
        let mut resolved = mk_alert(ID_B, 10, 0.5);
        resolved.outcome = Some(mk_outcome(OutcomeResult::Converted));
        resolved.status = AlertStatus::Resolved;
        store.replace_all(vec![mk_alert(ID_A, 0, 0.9), resolved]);

        let changed = store.bulk_patch(
            &[fixture_id(ID_A), fixture_id(ID_B), fixture_id(ID_Z)],
            AlertStatus::Acknowledged,
            fixture_time(),
        );
        assert_eq!(changed, 1);
        assert_eq!(
            store.get(&fixture_id(ID_A)).map(|alert| alert.status),
            Some(AlertStatus::Acknowledged)
        );
        assert_eq!(
            store.get(&fixture_id(ID_B)).map(|alert| alert.status),
            Some(AlertStatus::Resolved)
        );
    }

    #[test]
    fn bulk_patch_to_dismissed_removes_and_prunes() {
        let mut store = AlertStore::new(SortKey::DateNew);
        store.replace_all(vec![mk_alert(ID_A, 0, 0.9), mk_alert(ID_B, 10, 0.5)]);
        store.select_all_visible();

        let changed = store.bulk_patch(&[fixture_id(ID_A)], AlertStatus::Dismissed, fixture_time());
        assert_eq!(changed, 1);
        assert_eq!(ids(&store), vec![fixture_id(ID_B)]);
        assert_eq!(store.selection().to_vec(), vec![fixture_id(ID_B)]);
    }

    #[test]
    fn bulk_dismiss_scenario_prunes_selection() {
        let mut store = AlertStore::new(SortKey::DateOld);
        store.replace_all(vec![mk_alert(ID_A, 0, 0.9), mk_alert(ID_B, 10, 0.5)]);
        store.select_all_visible();

        assert_eq!(store.bulk_remove(&[fixture_id(ID_A)]), 1);
        assert_eq!(ids(&store), vec![fixture_id(ID_B)]);
        assert_eq!(store.selection().to_vec(), vec![fixture_id(ID_B)]);
    }

    #[test]
    fn remove_unknown_is_a_noop() {
        let mut store = AlertStore::new(SortKey::DateNew);
        store.replace_all(vec![mk_alert(ID_A, 0, 0.9)]);
        assert!(store.remove(&fixture_id(ID_Z)).is_none());
        assert_eq!(store.bulk_remove(&[fixture_id(ID_Z)]), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn replace_all_prunes_selection_and_dedups_page() {
        let mut store = AlertStore::new(SortKey::DateNew);
        store.replace_all(vec![mk_alert(ID_A, 0, 0.9), mk_alert(ID_B, 10, 0.5)]);
        store.select_all_visible();

        store.replace_all(vec![
            mk_alert(ID_B, 10, 0.5),
            mk_alert(ID_C, 20, 0.7),
            mk_alert(ID_B, 10, 0.1),
        ]);
        assert_eq!(ids(&store), vec![fixture_id(ID_B), fixture_id(ID_C)]);
        assert_eq!(store.selection().to_vec(), vec![fixture_id(ID_B)]);
    }

    #[test]
    fn toggle_selected_ignores_unknown_ids() {
        let mut store = AlertStore::new(SortKey::DateNew);
        store.replace_all(vec![mk_alert(ID_A, 0, 0.9)]);
        assert!(!store.toggle_selected(fixture_id(ID_Z)));
        assert!(store.selection().is_empty());
        assert!(store.toggle_selected(fixture_id(ID_A)));
        store.clear_selection();
        assert!(store.selection().is_empty());
    }

    #[test]
    fn select_all_on_empty_store_is_empty() {
        let mut store = AlertStore::new(SortKey::DateNew);
        store.select_all_visible();
        assert!(store.selection().is_empty());
    }

    fn id_set(store: &AlertStore) -> BTreeSet<AlertId> {
        store.ids().collect()
    }

    fn sorted_under(store: &AlertStore, key: SortKey) -> bool {
        store.alerts().windows(2).all(|pair| key.compare(&pair[0], &pair[1]) != Ordering::Greater)
    }

    fn any_sort_key() -> impl Strategy<Value = SortKey> {
        prop_oneof![
            Just(SortKey::DateNew),
            Just(SortKey::DateOld),
            Just(SortKey::ConfidenceHigh),
            Just(SortKey::ConfidenceLow),
            Just(SortKey::Priority),
        ]
    }

    fn any_priority() -> impl Strategy<Value = Priority> {
        prop_oneof![
            Just(Priority::Low),
            Just(Priority::Medium),
            Just(Priority::High),
            Just(Priority::Urgent),
        ]
    }

    #[test]
    fn append_after_live_insert_keeps_confidence_order() {
        let mut store = AlertStore::new(SortKey::ConfidenceHigh);
        store.replace_all(vec![mk_alert(ID_A, 0, 0.9), mk_alert(ID_B, 10, 0.5)]);
        assert!(store.insert(mk_alert(ID_C, 20, 0.3)));

        assert_eq!(store.append_page(vec![mk_alert(ID_D, 30, 0.4)]), 1);
        assert_eq!(
            ids(&store),
            vec![fixture_id(ID_A), fixture_id(ID_B), fixture_id(ID_D), fixture_id(ID_C)]
        );

        assert!(store.insert(mk_alert(ID_E, 40, 0.35)));
        assert_eq!(
            ids(&store),
            vec![
                fixture_id(ID_A),
                fixture_id(ID_B),
                fixture_id(ID_D),
                fixture_id(ID_E),
                fixture_id(ID_C),
            ]
        );
        assert!(sorted_under(&store, SortKey::ConfidenceHigh));
    }

    #[test]
    fn append_without_pushes_is_concatenation() {
        let mut store = AlertStore::new(SortKey::DateNew);
        store.replace_all(vec![mk_alert(ID_A, 40, 0.9), mk_alert(ID_B, 30, 0.5)]);
        assert_eq!(store.append_page(vec![mk_alert(ID_C, 20, 0.7), mk_alert(ID_B, 30, 0.5)]), 1);
        assert_eq!(ids(&store), vec![fixture_id(ID_A), fixture_id(ID_B), fixture_id(ID_C)]);
    }

    proptest! {
        #[test]
        fn property_push_then_page_commutes_with_page_then_push(
            key in any_sort_key(),
            page in proptest::collection::vec((0_i64..600, 0_u16..=1000, any_priority()), 1..6),
            pushed in (0_i64..600, 0_u16..=1000, any_priority()),
            pushed_is_on_page in any::<bool>(),
        ) {
            let page = page
                .into_iter()
                .enumerate()
                .map(|(index, (offset, confidence, priority))| {
                    let mut alert = mk_alert(ID_A, offset, f32::from(confidence) / 1000.0);
                    alert.id = AlertId(ulid::Ulid::from_parts(u64::try_from(index).unwrap_or(0) + 1, 0));
                    alert.priority = priority;
                    alert
                })
                .collect::<Vec<_>>();
            let mut earlier = page.clone();
            sort_alerts(&mut earlier, key);
            let (first_page, second_page) = earlier.split_at(earlier.len() / 2);

            let live = if pushed_is_on_page {
                second_page.first().cloned().unwrap_or_else(|| earlier[0].clone())
            } else {
                let (offset, confidence, priority) = pushed;
                let mut alert = mk_alert(ID_Z, offset, f32::from(confidence) / 1000.0);
                alert.priority = priority;
                alert
            };

            let mut push_first = AlertStore::new(key);
            push_first.replace_all(first_page.to_vec());
            push_first.insert(live.clone());
            push_first.append_page(second_page.to_vec());

            let mut page_first = AlertStore::new(key);
            page_first.replace_all(first_page.to_vec());
            page_first.append_page(second_page.to_vec());
            page_first.insert(live.clone());

            prop_assert_eq!(id_set(&push_first), id_set(&page_first));
            prop_assert!(push_first.contains(&live.id));
            prop_assert!(sorted_under(&push_first, key));
            prop_assert!(sorted_under(&page_first, key));
        }
    }

    proptest! {
        #[test]
        fn property_bulk_remove_leaves_selection_minus_removed(
            selected_mask in proptest::collection::vec(any::<bool>(), 8),
            removed_mask in proptest::collection::vec(any::<bool>(), 8),
        ) {
            let alerts = (0..8_u64)
                .map(|index| {
                    let mut alert = mk_alert(ID_A, i64::try_from(index).unwrap_or(0), 0.5);
                    alert.id = AlertId(ulid::Ulid::from_parts(index + 1, 0));
                    alert
                })
                .collect::<Vec<_>>();
            let mut store = AlertStore::new(SortKey::DateNew);
            store.replace_all(alerts.clone());

            let selected = alerts
                .iter()
                .zip(&selected_mask)
                .filter(|(_, keep)| **keep)
                .map(|(alert, _)| alert.id)
                .collect::<BTreeSet<_>>();
            for id in &selected {
                store.toggle_selected(*id);
            }
            let removed = alerts
                .iter()
                .zip(&removed_mask)
                .filter(|(_, gone)| **gone)
                .map(|(alert, _)| alert.id)
                .collect::<Vec<_>>();

            store.bulk_remove(&removed);

            let removed_set = removed.iter().copied().collect::<BTreeSet<_>>();
            let expected = selected.difference(&removed_set).copied().collect::<Vec<_>>();
            prop_assert_eq!(store.selection().to_vec(), expected);
            for id in &removed {
                prop_assert!(!store.contains(id));
            }
        }
    }
}
