//! Transactional metadata store for the bundling pipeline (C3).
//!
//! [`MetadataStore`] is the trait every pipeline component (admission, packer, pipeline
//! workers) programs against; [`postgres::PostgresStore`] backs production deployments on
//! `sqlx`/Postgres, and [`memory::InMemoryStore`] backs unit tests without a live database.

pub mod memory;
pub mod postgres;
pub mod store;

pub use store::{ItemStatus, MetadataStore, StoreError};
