//! `BundlePlan`, `PostedBundle`, and `ItemOffset`: the entities a bundle moves through on
//! its way from a packing decision to an indexed, permanent chain transaction.

use crate::timestamp::UnixTimestamp;
use serde::{Deserialize, Serialize};

/// Default byte budget for a single bundle (2 GiB).
pub const DEFAULT_MAX_BUNDLE_BYTE_COUNT: u64 = 2 * 1024 * 1024 * 1024;
/// Default item-count budget for a single bundle.
pub const DEFAULT_MAX_ITEMS_PER_BUNDLE: usize = 10_000;

/// A packing decision: a set of items slated to become one bundle transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundlePlan {
    pub plan_id: String,
    pub item_ids: Vec<String>,
    pub total_byte_count: u64,
    pub item_count: usize,
    pub planned_at: UnixTimestamp,
    pub premium_feature_type: Option<String>,
    pub overdue_flag: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum BundlePlanError {
    #[error("plan exceeds maxBundleByteCount ({total} > {max})")]
    TooManyBytes { total: u64, max: u64 },
    #[error("plan exceeds maxItemsPerBundle ({count} > {max})")]
    TooManyItems { count: usize, max: usize },
}

impl BundlePlan {
    /// Builds a plan from a set of `(item_id, byte_count)` pairs already known to share a
    /// feature class, validating the size and count invariants.
    pub fn new(
        plan_id: String,
        items: &[(String, u64)],
        planned_at: UnixTimestamp,
        premium_feature_type: Option<String>,
        overdue_flag: bool,
        max_byte_count: u64,
        max_items: usize,
    ) -> Result<Self, BundlePlanError> {
        let total_byte_count: u64 = items.iter().map(|(_, n)| *n).sum();
        if total_byte_count > max_byte_count {
            return Err(BundlePlanError::TooManyBytes {
                total: total_byte_count,
                max: max_byte_count,
            });
        }
        if items.len() > max_items {
            return Err(BundlePlanError::TooManyItems {
                count: items.len(),
                max: max_items,
            });
        }
        Ok(Self {
            plan_id,
            item_ids: items.iter().map(|(id, _)| id.clone()).collect(),
            total_byte_count,
            item_count: items.len(),
            planned_at,
            premium_feature_type,
            overdue_flag,
        })
    }
}

/// A bundle that has been posted as a chain transaction, pending confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostedBundle {
    pub bundle_tx_id: String,
    pub plan_id: String,
    pub byte_count: u64,
    pub item_count: usize,
    pub posted_at: UnixTimestamp,
    pub confirmed_height: Option<u64>,
}

impl PostedBundle {
    /// A bundle's members become permanent the instant it has a confirmed height.
    pub fn is_permanent(&self) -> bool {
        self.confirmed_height.is_some()
    }
}

/// The byte-range record an item occupies within its (possibly nested) root bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemOffset {
    pub item_id: String,
    pub root_bundle_id: String,
    pub start_offset_in_root: u64,
    pub raw_content_length: u64,
    pub payload_data_start: u64,
    pub payload_content_type: Option<String>,
    pub parent_item_id: Option<String>,
    pub start_offset_in_parent_payload: Option<u64>,
}

impl ItemOffset {
    /// Offsets are only trustworthy when the root bundle they claim matches the bundle
    /// transaction id actually recorded by the pipeline for that item's plan.
    pub fn is_trusted(&self, recorded_bundle_tx_id: &str) -> bool {
        self.root_bundle_id == recorded_bundle_tx_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_rejects_oversized_byte_total() {
        let items = vec![("a".to_string(), 10u64), ("b".to_string(), 20u64)];
        let err = BundlePlan::new(
            "plan-1".into(),
            &items,
            UnixTimestamp::from_secs(0),
            None,
            false,
            25,
            100,
        )
        .unwrap_err();
        assert!(matches!(err, BundlePlanError::TooManyBytes { .. }));
    }

    #[test]
    fn plan_rejects_too_many_items() {
        let items = vec![("a".to_string(), 1u64), ("b".to_string(), 1u64)];
        let err = BundlePlan::new(
            "plan-1".into(),
            &items,
            UnixTimestamp::from_secs(0),
            None,
            false,
            1000,
            1,
        )
        .unwrap_err();
        assert!(matches!(err, BundlePlanError::TooManyItems { .. }));
    }

    #[test]
    fn posted_bundle_is_permanent_only_once_confirmed() {
        let mut posted = PostedBundle {
            bundle_tx_id: "tx-1".into(),
            plan_id: "plan-1".into(),
            byte_count: 100,
            item_count: 1,
            posted_at: UnixTimestamp::from_secs(0),
            confirmed_height: None,
        };
        assert!(!posted.is_permanent());
        posted.confirmed_height = Some(123);
        assert!(posted.is_permanent());
    }

    #[test]
    fn offset_trust_requires_matching_root() {
        let offset = ItemOffset {
            item_id: "item-1".into(),
            root_bundle_id: "tx-1".into(),
            start_offset_in_root: 0,
            raw_content_length: 10,
            payload_data_start: 5,
            payload_content_type: None,
            parent_item_id: None,
            start_offset_in_parent_payload: None,
        };
        assert!(offset.is_trusted("tx-1"));
        assert!(!offset.is_trusted("tx-2"));
    }
}
