//! The `MetadataStore` trait: every transactional operation the pipeline needs against
//! persisted `DataItem`/`BundlePlan`/`PostedBundle`/`ItemOffset`/`Payment` rows.

use async_trait::async_trait;
use bundler_types::{BundlePlan, DataItem, ItemOffset, ItemState, Payment, PostedBundle};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("item {0} already exists")]
    DuplicateItem(String),
    #[error("item {0} not found")]
    ItemNotFound(String),
    #[error("bundle plan {0} not found")]
    PlanNotFound(String),
    #[error("one or more items are already part of an active bundle plan")]
    ItemsAlreadyPlanned,
    #[error("posted bundle {0} not found")]
    BundleNotFound(String),
    #[error("payment {0} not found")]
    PaymentNotFound(String),
    #[error(transparent)]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Minimal status projection returned by `GET /v1/tx/{id}/status`.
#[derive(Debug, Clone)]
pub struct ItemStatus {
    pub state: ItemState,
    pub bundle_id: Option<String>,
    pub failed_reason: Option<String>,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn insert_new_item(&self, item: DataItem) -> Result<(), StoreError>;
    async fn get_item(&self, id: &str) -> Result<Option<DataItem>, StoreError>;
    async fn get_item_status(&self, id: &str) -> Result<Option<ItemStatus>, StoreError>;

    /// Items not yet part of an active bundle plan, oldest first, optionally restricted to
    /// a feature class and/or to items uploaded before `overdue_before`.
    async fn list_unbundled_items(
        &self,
        feature_class: Option<&str>,
        limit: usize,
        overdue_before: Option<u64>,
    ) -> Result<Vec<DataItem>, StoreError>;

    /// Atomically creates a plan and marks its member items `planned`; fails if any member
    /// is already part of an active plan.
    async fn create_bundle_plan(&self, plan: BundlePlan) -> Result<(), StoreError>;

    async fn get_bundle_plan(&self, plan_id: &str) -> Result<Option<BundlePlan>, StoreError>;

    async fn mark_prepared(&self, plan_id: &str, byte_count: u64) -> Result<(), StoreError>;
    async fn mark_posted(&self, plan_id: &str, bundle_tx_id: &str) -> Result<(), StoreError>;
    async fn mark_permanent(&self, bundle_tx_id: &str, height: u64) -> Result<(), StoreError>;
    async fn mark_failed(&self, plan_id: &str, reason: &str) -> Result<(), StoreError>;

    /// Records a failed bundle attempt against a single item still tied to `plan_id`: appends
    /// `plan_id` to the item's `failed_bundles` history and, per
    /// [`DataItem::record_bundle_failure`](bundler_types::item::DataItem::record_bundle_failure),
    /// either detaches it back to `new` (retry budget remains) or moves it to `failed`
    /// (budget exhausted). Returns the item's resulting state.
    async fn record_item_bundle_failure(&self, item_id: &str, plan_id: &str) -> Result<ItemState, StoreError>;

    /// Rewinds a plan's members back to `planned` and clears the plan's `posted` marker,
    /// within one transaction, as required after a bundle-verify timeout.
    async fn rewind_plan_to_planned(&self, plan_id: &str) -> Result<(), StoreError>;

    async fn get_posted_bundle(&self, bundle_tx_id: &str) -> Result<Option<PostedBundle>, StoreError>;

    async fn write_offsets(&self, rows: Vec<ItemOffset>) -> Result<(), StoreError>;
    async fn get_offset(&self, item_id: &str) -> Result<Option<ItemOffset>, StoreError>;

    async fn insert_payment(&self, payment: Payment) -> Result<(), StoreError>;
    async fn link_payment_to_item(&self, payment_id: &str, item_id: &str) -> Result<(), StoreError>;
    async fn finalize_payment(
        &self,
        payment_id: &str,
        actual_bytes: u64,
        status: bundler_types::PaymentStatus,
        refund_amount: Option<u128>,
    ) -> Result<(), StoreError>;
    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>, StoreError>;

    /// The payment linked to `item_id` by [`MetadataStore::link_payment_to_item`], if any —
    /// looked up at `prepare-bundle` time to reconcile the payment against the item's actual
    /// byte count.
    async fn get_payment_for_item(&self, item_id: &str) -> Result<Option<Payment>, StoreError>;

    async fn get_cleanup_cursor(&self, name: &str) -> Result<Option<String>, StoreError>;
    async fn put_cleanup_cursor(&self, name: &str, cursor: &str) -> Result<(), StoreError>;

    /// Items uploaded before `before`, ordered `(uploadedAt, id)`, resuming strictly after
    /// `after_cursor` when given. Used by `cleanup-fs` to walk the whole item population
    /// (regardless of lifecycle state) in stable batches.
    async fn list_items_uploaded_before(
        &self,
        before: u64,
        after_cursor: Option<(u64, String)>,
        limit: usize,
    ) -> Result<Vec<DataItem>, StoreError>;
}
