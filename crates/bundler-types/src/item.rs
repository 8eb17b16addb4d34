//! `DataItem`: the unit of admission, and its lifecycle state machine.

use crate::timestamp::UnixTimestamp;
use crate::wire::Tag;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a [`DataItem`].
///
/// Transitions are monotonic except the controlled rewinds (`prepared -> planned`,
/// `posted -> planned` on a bundle-verify timeout, `planned -> new` when a bundle attempt
/// fails and the item's retry budget is not yet exhausted), and the unconditional
/// `* -> failed` escape hatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    New,
    Planned,
    Prepared,
    Posted,
    Permanent,
    Failed,
}

/// Error returned by [`ItemState::transition`] when a move is not permitted.
#[derive(Debug, Error)]
#[error("illegal item state transition: {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: ItemState,
    pub to: ItemState,
}

impl ItemState {
    /// Validates and applies a transition, returning the new state.
    ///
    /// `rewind` permits `prepared|posted -> planned`, the only sanctioned regression,
    /// exercised by the bundle-verify timeout path.
    pub fn transition(self, to: ItemState, rewind: bool) -> Result<ItemState, IllegalTransition> {
        use ItemState::*;
        let allowed = match (self, to) {
            (_, Failed) => true,
            (New, Planned) => true,
            (Planned, Prepared) => true,
            (Prepared, Posted) => true,
            (Posted, Permanent) => true,
            (Prepared, Planned) | (Posted, Planned) | (Planned, New) if rewind => true,
            _ => false,
        };
        if allowed {
            Ok(to)
        } else {
            Err(IllegalTransition { from: self, to })
        }
    }
}

/// A data item accepted for bundling.
///
/// `id` and `byteCount = payloadDataStart + payloadSize` are invariant once constructed;
/// everything else may be updated as the item progresses through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataItem {
    pub id: String,
    pub owner_address: String,
    pub signature_type: u16,
    pub byte_count: u64,
    pub payload_content_type: Option<String>,
    pub payload_data_start: u64,
    pub uploaded_at: UnixTimestamp,
    pub deadline_height: u64,
    /// Chain-native unit price assessed at admission time; zero when paid via stable-coin.
    pub assessed_price: u128,
    pub failed_bundles: Vec<String>,
    pub premium_feature_type: Option<String>,
    pub tags: Vec<Tag>,
    pub signature: Vec<u8>,
    pub state: ItemState,
}

/// Maximum number of times a bundle can fail to carry an item before the item itself is
/// marked `failed` (C9 prepare-bundle retry policy).
pub const MAX_FAILED_BUNDLES_BEFORE_ITEM_FAILS: usize = 3;

impl DataItem {
    /// `byteCount = payloadDataStart + payloadSize` invariant, checked at construction.
    pub fn payload_size(&self) -> u64 {
        self.byte_count.saturating_sub(self.payload_data_start)
    }

    /// Records a bundle failure against this item. Returns `true` if the item should now
    /// transition to `Failed` (the retry budget is exhausted).
    pub fn record_bundle_failure(&mut self, plan_id: String) -> bool {
        self.failed_bundles.push(plan_id);
        self.failed_bundles.len() >= MAX_FAILED_BUNDLES_BEFORE_ITEM_FAILS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_progression_is_allowed() {
        let s = ItemState::New;
        let s = s.transition(ItemState::Planned, false).unwrap();
        let s = s.transition(ItemState::Prepared, false).unwrap();
        let s = s.transition(ItemState::Posted, false).unwrap();
        let s = s.transition(ItemState::Permanent, false).unwrap();
        assert_eq!(s, ItemState::Permanent);
    }

    #[test]
    fn skipping_a_state_is_rejected() {
        let err = ItemState::New.transition(ItemState::Posted, false).unwrap_err();
        assert_eq!(err.from, ItemState::New);
    }

    #[test]
    fn rewind_requires_the_flag() {
        assert!(ItemState::Posted.transition(ItemState::Planned, false).is_err());
        assert!(ItemState::Posted.transition(ItemState::Planned, true).is_ok());
    }

    #[test]
    fn planned_to_new_rewind_requires_the_flag() {
        assert!(ItemState::Planned.transition(ItemState::New, false).is_err());
        assert!(ItemState::Planned.transition(ItemState::New, true).is_ok());
    }

    #[test]
    fn any_state_can_fail() {
        for state in [
            ItemState::New,
            ItemState::Planned,
            ItemState::Prepared,
            ItemState::Posted,
        ] {
            assert!(state.transition(ItemState::Failed, false).is_ok());
        }
    }

    #[test]
    fn bundle_failure_budget_exhausts_after_three() {
        let mut item = DataItem {
            id: "item-1".into(),
            owner_address: "owner".into(),
            signature_type: 4,
            byte_count: 100,
            payload_content_type: None,
            payload_data_start: 10,
            uploaded_at: UnixTimestamp::from_secs(0),
            deadline_height: 200,
            assessed_price: 0,
            failed_bundles: vec![],
            premium_feature_type: None,
            tags: vec![],
            signature: vec![],
            state: ItemState::New,
        };
        assert!(!item.record_bundle_failure("plan-1".into()));
        assert!(!item.record_bundle_failure("plan-2".into()));
        assert!(item.record_bundle_failure("plan-3".into()));
    }
}
