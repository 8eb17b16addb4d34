//! The two logical buckets every deployment provisions, and the key prefix external
//! retrievers use to fetch raw item bytes directly.

/// Key prefix under which raw item bytes are stored, so external retrievers (the optical
/// bridge's readers, CDN edges) can address items without knowing internal layout.
pub const RAW_DATA_ITEM_PREFIX: &str = "raw-data-item/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    /// The canonical copy; every other tier is a derived/backup copy of this one.
    Raw,
    /// A secondary copy retained for disaster recovery, never read on the golden path.
    Backup,
}

impl Bucket {
    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::Raw => "raw",
            Bucket::Backup => "backup",
        }
    }
}

pub fn raw_data_item_key(item_id: &str) -> String {
    format!("{RAW_DATA_ITEM_PREFIX}{item_id}")
}
