//! In-memory `MetadataStore` used by unit tests across the pipeline crates.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bundler_types::{BundlePlan, DataItem, ItemOffset, ItemState, Payment, PaymentStatus, PostedBundle};

use crate::store::{ItemStatus, MetadataStore, StoreError};

#[derive(Default)]
struct Inner {
    items: HashMap<String, DataItem>,
    plans: HashMap<String, BundlePlan>,
    /// item_id -> plan_id, populated at plan-creation time, cleared on rewind.
    item_plan: HashMap<String, String>,
    bundles: HashMap<String, PostedBundle>,
    /// plan_id -> bundle_tx_id, populated at mark_posted time.
    plan_bundle: HashMap<String, String>,
    failed_reasons: HashMap<String, String>,
    offsets: HashMap<String, ItemOffset>,
    payments: HashMap<String, Payment>,
    cursors: HashMap<String, String>,
}

/// A `Mutex`-guarded map standing in for a transactional database in tests; every method
/// takes the lock for its whole body so callers see atomic effects, matching the guarantees
/// the Postgres backend gives via a single transaction per call.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryStore {
    async fn insert_new_item(&self, item: DataItem) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.items.contains_key(&item.id) {
            return Err(StoreError::DuplicateItem(item.id));
        }
        inner.items.insert(item.id.clone(), item);
        Ok(())
    }

    async fn get_item(&self, id: &str) -> Result<Option<DataItem>, StoreError> {
        Ok(self.inner.lock().unwrap().items.get(id).cloned())
    }

    async fn get_item_status(&self, id: &str) -> Result<Option<ItemStatus>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let Some(item) = inner.items.get(id) else {
            return Ok(None);
        };
        Ok(Some(ItemStatus {
            state: item.state,
            bundle_id: inner.item_plan.get(id).and_then(|plan_id| inner.plan_bundle.get(plan_id)).cloned(),
            failed_reason: inner.failed_reasons.get(id).cloned(),
        }))
    }

    async fn list_unbundled_items(
        &self,
        feature_class: Option<&str>,
        limit: usize,
        overdue_before: Option<u64>,
    ) -> Result<Vec<DataItem>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut items: Vec<DataItem> = inner
            .items
            .values()
            .filter(|item| item.state == ItemState::New)
            .filter(|item| !inner.item_plan.contains_key(&item.id))
            .filter(|item| match feature_class {
                Some(class) => item.premium_feature_type.as_deref() == Some(class),
                None => true,
            })
            .filter(|item| match overdue_before {
                Some(cutoff) => item.uploaded_at.as_secs() < cutoff,
                None => true,
            })
            .cloned()
            .collect();
        items.sort_by_key(|item| item.uploaded_at.as_secs());
        items.truncate(limit);
        Ok(items)
    }

    async fn create_bundle_plan(&self, plan: BundlePlan) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if plan.item_ids.iter().any(|id| inner.item_plan.contains_key(id)) {
            return Err(StoreError::ItemsAlreadyPlanned);
        }
        for item_id in &plan.item_ids {
            let item = inner.items.get_mut(item_id).ok_or_else(|| StoreError::ItemNotFound(item_id.clone()))?;
            item.state = item
                .state
                .transition(ItemState::Planned, false)
                .map_err(|e| StoreError::Backend(Box::new(e)))?;
            inner.item_plan.insert(item_id.clone(), plan.plan_id.clone());
        }
        inner.plans.insert(plan.plan_id.clone(), plan);
        Ok(())
    }

    async fn get_bundle_plan(&self, plan_id: &str) -> Result<Option<BundlePlan>, StoreError> {
        Ok(self.inner.lock().unwrap().plans.get(plan_id).cloned())
    }

    async fn mark_prepared(&self, plan_id: &str, byte_count: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let plan = inner.plans.get(plan_id).ok_or_else(|| StoreError::PlanNotFound(plan_id.to_string()))?.clone();
        for item_id in &plan.item_ids {
            let item = inner.items.get_mut(item_id).ok_or_else(|| StoreError::ItemNotFound(item_id.clone()))?;
            item.state = item
                .state
                .transition(ItemState::Prepared, false)
                .map_err(|e| StoreError::Backend(Box::new(e)))?;
        }
        inner
            .plans
            .get_mut(plan_id)
            .ok_or_else(|| StoreError::PlanNotFound(plan_id.to_string()))?
            .total_byte_count = byte_count;
        Ok(())
    }

    async fn mark_posted(&self, plan_id: &str, bundle_tx_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let plan = inner.plans.get(plan_id).ok_or_else(|| StoreError::PlanNotFound(plan_id.to_string()))?.clone();
        for item_id in &plan.item_ids {
            let item = inner.items.get_mut(item_id).ok_or_else(|| StoreError::ItemNotFound(item_id.clone()))?;
            item.state = item
                .state
                .transition(ItemState::Posted, false)
                .map_err(|e| StoreError::Backend(Box::new(e)))?;
        }
        inner.plan_bundle.insert(plan_id.to_string(), bundle_tx_id.to_string());
        inner.bundles.insert(
            bundle_tx_id.to_string(),
            PostedBundle {
                bundle_tx_id: bundle_tx_id.to_string(),
                plan_id: plan_id.to_string(),
                byte_count: plan.total_byte_count,
                item_count: plan.item_count,
                posted_at: bundler_types::timestamp::UnixTimestamp::from_secs(0),
                confirmed_height: None,
            },
        );
        Ok(())
    }

    async fn mark_permanent(&self, bundle_tx_id: &str, height: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let bundle = inner
            .bundles
            .get_mut(bundle_tx_id)
            .ok_or_else(|| StoreError::BundleNotFound(bundle_tx_id.to_string()))?;
        bundle.confirmed_height = Some(height);
        let plan_id = bundle.plan_id.clone();
        let plan = inner
            .plans
            .get(&plan_id)
            .ok_or_else(|| StoreError::PlanNotFound(plan_id.clone()))?
            .clone();
        for item_id in &plan.item_ids {
            let item = inner.items.get_mut(item_id).ok_or_else(|| StoreError::ItemNotFound(item_id.clone()))?;
            item.state = item
                .state
                .transition(ItemState::Permanent, false)
                .map_err(|e| StoreError::Backend(Box::new(e)))?;
        }
        Ok(())
    }

    async fn mark_failed(&self, plan_id: &str, reason: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let plan = inner.plans.get(plan_id).ok_or_else(|| StoreError::PlanNotFound(plan_id.to_string()))?.clone();
        for item_id in &plan.item_ids {
            if let Some(item) = inner.items.get_mut(item_id) {
                item.state = item
                    .state
                    .transition(ItemState::Failed, false)
                    .map_err(|e| StoreError::Backend(Box::new(e)))?;
            }
            inner.failed_reasons.insert(item_id.clone(), reason.to_string());
        }
        Ok(())
    }

    async fn record_item_bundle_failure(&self, item_id: &str, plan_id: &str) -> Result<ItemState, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let exhausted = {
            let item = inner.items.get_mut(item_id).ok_or_else(|| StoreError::ItemNotFound(item_id.to_string()))?;
            item.record_bundle_failure(plan_id.to_string())
        };
        let item = inner.items.get_mut(item_id).ok_or_else(|| StoreError::ItemNotFound(item_id.to_string()))?;
        item.state = item
            .state
            .transition(if exhausted { ItemState::Failed } else { ItemState::New }, true)
            .map_err(|e| StoreError::Backend(Box::new(e)))?;
        let result_state = item.state;
        if exhausted {
            inner.failed_reasons.insert(item_id.to_string(), format!("exceeded retry budget in plan {plan_id}"));
        } else {
            inner.item_plan.remove(item_id);
        }
        Ok(result_state)
    }

    async fn rewind_plan_to_planned(&self, plan_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let plan = inner.plans.get(plan_id).ok_or_else(|| StoreError::PlanNotFound(plan_id.to_string()))?.clone();
        for item_id in &plan.item_ids {
            let item = inner.items.get_mut(item_id).ok_or_else(|| StoreError::ItemNotFound(item_id.clone()))?;
            item.state = item
                .state
                .transition(ItemState::Planned, true)
                .map_err(|e| StoreError::Backend(Box::new(e)))?;
        }
        if let Some(bundle_tx_id) = inner.plan_bundle.remove(plan_id) {
            inner.bundles.remove(&bundle_tx_id);
        }
        Ok(())
    }

    async fn get_posted_bundle(&self, bundle_tx_id: &str) -> Result<Option<PostedBundle>, StoreError> {
        Ok(self.inner.lock().unwrap().bundles.get(bundle_tx_id).cloned())
    }

    async fn write_offsets(&self, rows: Vec<ItemOffset>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        for row in rows {
            inner.offsets.insert(row.item_id.clone(), row);
        }
        Ok(())
    }

    async fn get_offset(&self, item_id: &str) -> Result<Option<ItemOffset>, StoreError> {
        Ok(self.inner.lock().unwrap().offsets.get(item_id).cloned())
    }

    async fn insert_payment(&self, payment: Payment) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.payments.insert(payment.payment_id.clone(), payment);
        Ok(())
    }

    async fn link_payment_to_item(&self, payment_id: &str, item_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let payment = inner
            .payments
            .get_mut(payment_id)
            .ok_or_else(|| StoreError::PaymentNotFound(payment_id.to_string()))?;
        payment.linked_item_id = Some(item_id.to_string());
        Ok(())
    }

    async fn finalize_payment(
        &self,
        payment_id: &str,
        actual_bytes: u64,
        status: PaymentStatus,
        refund_amount: Option<u128>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let payment = inner
            .payments
            .get_mut(payment_id)
            .ok_or_else(|| StoreError::PaymentNotFound(payment_id.to_string()))?;
        payment.actual_byte_count = Some(actual_bytes);
        payment.status = status;
        payment.refund_amount = refund_amount;
        Ok(())
    }

    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>, StoreError> {
        Ok(self.inner.lock().unwrap().payments.get(payment_id).cloned())
    }

    async fn get_payment_for_item(&self, item_id: &str) -> Result<Option<Payment>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .payments
            .values()
            .find(|payment| payment.linked_item_id.as_deref() == Some(item_id))
            .cloned())
    }

    async fn list_items_uploaded_before(
        &self,
        before: u64,
        after_cursor: Option<(u64, String)>,
        limit: usize,
    ) -> Result<Vec<DataItem>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut items: Vec<DataItem> = inner
            .items
            .values()
            .filter(|item| item.uploaded_at.as_secs() < before)
            .filter(|item| match &after_cursor {
                Some((cursor_secs, cursor_id)) => {
                    let secs = item.uploaded_at.as_secs();
                    secs > *cursor_secs || (secs == *cursor_secs && item.id > *cursor_id)
                }
                None => true,
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| (a.uploaded_at.as_secs(), &a.id).cmp(&(b.uploaded_at.as_secs(), &b.id)));
        items.truncate(limit);
        Ok(items)
    }

    async fn get_cleanup_cursor(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.lock().unwrap().cursors.get(name).cloned())
    }

    async fn put_cleanup_cursor(&self, name: &str, cursor: &str) -> Result<(), StoreError> {
        self.inner.lock().unwrap().cursors.insert(name.to_string(), cursor.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bundler_types::timestamp::UnixTimestamp;

    fn sample_item(id: &str) -> DataItem {
        DataItem {
            id: id.to_string(),
            owner_address: "0xowner".into(),
            signature_type: 1,
            byte_count: 1024,
            payload_content_type: None,
            payload_data_start: 0,
            uploaded_at: UnixTimestamp::from_secs(100),
            deadline_height: 10_100,
            assessed_price: 10,
            failed_bundles: Vec::new(),
            premium_feature_type: None,
            tags: Vec::new(),
            signature: vec![0u8; 8],
            state: ItemState::New,
        }
    }

    #[tokio::test]
    async fn insert_and_list_unbundled() {
        let store = InMemoryStore::new();
        store.insert_new_item(sample_item("a")).await.unwrap();
        store.insert_new_item(sample_item("b")).await.unwrap();
        let unbundled = store.list_unbundled_items(None, 10, None).await.unwrap();
        assert_eq!(unbundled.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_insert_rejected() {
        let store = InMemoryStore::new();
        store.insert_new_item(sample_item("a")).await.unwrap();
        assert!(matches!(store.insert_new_item(sample_item("a")).await, Err(StoreError::DuplicateItem(_))));
    }

    #[tokio::test]
    async fn plan_lifecycle_transitions_items() {
        let store = InMemoryStore::new();
        store.insert_new_item(sample_item("a")).await.unwrap();
        let plan = BundlePlan::new(
            "plan1".into(),
            &[("a".into(), 1024)],
            UnixTimestamp::from_secs(200),
            None,
            false,
            bundler_types::bundle::DEFAULT_MAX_BUNDLE_BYTE_COUNT,
            bundler_types::bundle::DEFAULT_MAX_ITEMS_PER_BUNDLE,
        )
        .unwrap();
        store.create_bundle_plan(plan).await.unwrap();
        assert_eq!(store.get_item("a").await.unwrap().unwrap().state, ItemState::Planned);
        assert!(store.list_unbundled_items(None, 10, None).await.unwrap().is_empty());

        store.mark_prepared("plan1", 1024).await.unwrap();
        assert_eq!(store.get_item("a").await.unwrap().unwrap().state, ItemState::Prepared);

        store.mark_posted("plan1", "bundle-tx-1").await.unwrap();
        assert_eq!(store.get_item("a").await.unwrap().unwrap().state, ItemState::Posted);
        let status = store.get_item_status("a").await.unwrap().unwrap();
        assert_eq!(status.bundle_id.as_deref(), Some("bundle-tx-1"));

        store.mark_permanent("bundle-tx-1", 18).await.unwrap();
        assert_eq!(store.get_item("a").await.unwrap().unwrap().state, ItemState::Permanent);
    }

    #[tokio::test]
    async fn rewind_returns_item_to_planned_and_drops_bundle() {
        let store = InMemoryStore::new();
        store.insert_new_item(sample_item("a")).await.unwrap();
        let plan = BundlePlan::new(
            "plan1".into(),
            &[("a".into(), 1024)],
            UnixTimestamp::from_secs(200),
            None,
            false,
            bundler_types::bundle::DEFAULT_MAX_BUNDLE_BYTE_COUNT,
            bundler_types::bundle::DEFAULT_MAX_ITEMS_PER_BUNDLE,
        )
        .unwrap();
        store.create_bundle_plan(plan).await.unwrap();
        store.mark_prepared("plan1", 1024).await.unwrap();
        store.mark_posted("plan1", "bundle-tx-1").await.unwrap();

        store.rewind_plan_to_planned("plan1").await.unwrap();
        assert_eq!(store.get_item("a").await.unwrap().unwrap().state, ItemState::Planned);
        assert!(store.get_posted_bundle("bundle-tx-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_bundle_plan_round_trips_item_ids() {
        let store = InMemoryStore::new();
        store.insert_new_item(sample_item("a")).await.unwrap();
        let plan = BundlePlan::new(
            "plan1".into(),
            &[("a".into(), 1024)],
            UnixTimestamp::from_secs(200),
            None,
            false,
            bundler_types::bundle::DEFAULT_MAX_BUNDLE_BYTE_COUNT,
            bundler_types::bundle::DEFAULT_MAX_ITEMS_PER_BUNDLE,
        )
        .unwrap();
        store.create_bundle_plan(plan).await.unwrap();

        let fetched = store.get_bundle_plan("plan1").await.unwrap().unwrap();
        assert_eq!(fetched.item_ids, vec!["a".to_string()]);
        assert!(store.get_bundle_plan("no-such-plan").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_item_bundle_failure_detaches_item_while_budget_remains() {
        let store = InMemoryStore::new();
        store.insert_new_item(sample_item("a")).await.unwrap();
        let plan = BundlePlan::new(
            "plan1".into(),
            &[("a".into(), 1024)],
            UnixTimestamp::from_secs(200),
            None,
            false,
            bundler_types::bundle::DEFAULT_MAX_BUNDLE_BYTE_COUNT,
            bundler_types::bundle::DEFAULT_MAX_ITEMS_PER_BUNDLE,
        )
        .unwrap();
        store.create_bundle_plan(plan).await.unwrap();

        let state = store.record_item_bundle_failure("a", "plan1").await.unwrap();
        assert_eq!(state, ItemState::New);
        // Back in the unbundled pool.
        assert_eq!(store.list_unbundled_items(None, 10, None).await.unwrap().len(), 1);
        assert!(store.get_item_status("a").await.unwrap().unwrap().failed_reason.is_none());
    }

    #[tokio::test]
    async fn record_item_bundle_failure_fails_item_once_budget_exhausted() {
        let store = InMemoryStore::new();
        store.insert_new_item(sample_item("a")).await.unwrap();
        for i in 0..3 {
            let plan = BundlePlan::new(
                format!("plan{i}"),
                &[("a".into(), 1024)],
                UnixTimestamp::from_secs(200),
                None,
                false,
                bundler_types::bundle::DEFAULT_MAX_BUNDLE_BYTE_COUNT,
                bundler_types::bundle::DEFAULT_MAX_ITEMS_PER_BUNDLE,
            )
            .unwrap();
            store.create_bundle_plan(plan).await.unwrap();
            let state = store.record_item_bundle_failure("a", &format!("plan{i}")).await.unwrap();
            if i < 2 {
                assert_eq!(state, ItemState::New);
            } else {
                assert_eq!(state, ItemState::Failed);
            }
        }
        let status = store.get_item_status("a").await.unwrap().unwrap();
        assert_eq!(status.state, ItemState::Failed);
        assert!(status.failed_reason.is_some());
    }

    #[tokio::test]
    async fn list_items_uploaded_before_paginates_with_cursor() {
        let store = InMemoryStore::new();
        for (id, secs) in [("a", 100), ("b", 200), ("c", 300)] {
            let mut item = sample_item(id);
            item.uploaded_at = UnixTimestamp::from_secs(secs);
            store.insert_new_item(item).await.unwrap();
        }

        let first_page = store.list_items_uploaded_before(1000, None, 2).await.unwrap();
        assert_eq!(first_page.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);

        let cursor = (first_page.last().unwrap().uploaded_at.as_secs(), first_page.last().unwrap().id.clone());
        let second_page = store.list_items_uploaded_before(1000, Some(cursor), 2).await.unwrap();
        assert_eq!(second_page.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["c"]);

        assert!(store.list_items_uploaded_before(150, None, 10).await.unwrap().iter().all(|i| i.id == "a"));
    }
}
