//! Bundle packer and pipeline worker entrypoint.
//!
//! Drains the durable job queue one label at a time (`prepare-bundle`, `post-bundle`,
//! `verify-bundle`, `put-offsets`, `optical-post`, `unbundle-nested`, `finalize-upload`) and
//! runs the `plan-bundle` and `cleanup-fs` cron jobs, sharing the same metadata store, object
//! store, and queue broker backends the admission service uses.
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `DATABASE_URL`, `REDIS_URL` select the metadata store and queue broker backends
//! - `LOCAL_MODE=1` swaps both for in-process test doubles and the object store for local
//!   disk, matching the admission service's own local-mode wiring
//! - `GATEWAY_URL` addresses the chain gateway used to post bundles, poll confirmations, and
//!   source chain-unit pricing for payment finalization
//! - `RECEIPT_SIGNING_KEY` is reused as the service wallet that signs posted bundles and
//!   re-signed optical-post headers
//! - `OPTICAL_SINKS` lists the downstream indexers `optical-post` fans out to
//! - `PAYMENTS_CONFIG`, `PLAN_BUNDLE_CRON` override the payments config file path and the
//!   plan-bundle cron expression

mod config;
mod pipeline;
mod run;

use std::sync::Arc;
use std::time::Duration;

use bundler_objectstore::PutObjectStore;
use bundler_optical::{Sink, SinkRole};
use bundler_payments::PaymentEngine;
use bundler_payments::gateway_source::GatewayPriceSource;
use bundler_payments::pricing::PricingOracle;
use bundler_queue::QueueBroker;
use bundler_store::MetadataStore;
use config::Config;
use dotenvy::dotenv;
use ed25519_dalek::SigningKey;
use tokio_util::sync::CancellationToken;

async fn build_store(cfg: &Config) -> Result<Arc<dyn MetadataStore>, Box<dyn std::error::Error>> {
    if cfg.local_mode {
        return Ok(Arc::new(bundler_store::memory::InMemoryStore::new()));
    }
    let database_url = cfg.database_url.clone().ok_or("DATABASE_URL is required outside LOCAL_MODE")?;
    let pool = sqlx::postgres::PgPoolOptions::new().max_connections(10).connect(&database_url).await?;
    Ok(Arc::new(bundler_store::postgres::PostgresStore::new(pool)))
}

async fn build_queue(cfg: &Config) -> Result<Arc<dyn QueueBroker>, Box<dyn std::error::Error>> {
    if cfg.local_mode {
        return Ok(Arc::new(bundler_queue::inmemory::InMemoryQueue::new()));
    }
    let redis_url = cfg.redis_url.clone().ok_or("REDIS_URL is required outside LOCAL_MODE")?;
    let queue = bundler_queue::redis_backed::RedisQueue::connect(&redis_url, "arbundler").await?;
    Ok(Arc::new(queue))
}

fn build_objects(cfg: &Config) -> Result<Arc<PutObjectStore>, Box<dyn std::error::Error>> {
    if cfg.local_mode {
        let raw_path = std::path::PathBuf::from(&cfg.local_data_dir).join("raw");
        let backup_path = std::path::PathBuf::from(&cfg.local_data_dir).join("backup");
        std::fs::create_dir_all(&raw_path)?;
        std::fs::create_dir_all(&backup_path)?;
        let raw = Arc::new(object_store::local::LocalFileSystem::new_with_prefix(raw_path)?);
        let backup = Arc::new(object_store::local::LocalFileSystem::new_with_prefix(backup_path)?);
        return Ok(Arc::new(PutObjectStore::new(raw, backup)));
    }
    let raw_bucket = std::env::var("S3_BUCKET_RAW")?;
    let backup_bucket = std::env::var("S3_BUCKET_BACKUP")?;
    let raw = Arc::new(object_store::aws::AmazonS3Builder::from_env().with_bucket_name(raw_bucket).build()?);
    let backup = Arc::new(object_store::aws::AmazonS3Builder::from_env().with_bucket_name(backup_bucket).build()?);
    Ok(Arc::new(PutObjectStore::new(raw, backup)))
}

/// Parses `OPTICAL_SINKS` (`name=endpoint` pairs, comma-separated) into primary sinks,
/// mirroring the admission service's own `build_optical_sinks`.
fn build_optical_sinks() -> Vec<Sink> {
    std::env::var("OPTICAL_SINKS")
        .ok()
        .map(|raw| {
            raw.split(',')
                .filter_map(|pair| {
                    let (name, endpoint) = pair.split_once('=')?;
                    Some(Sink::new(name.trim(), endpoint.trim(), SinkRole::Primary, Duration::from_secs(30)))
                })
                .collect()
        })
        .unwrap_or_default()
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async { tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler") };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    cancel.cancel();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(Config::load()?);
    let store = build_store(&config).await?;
    let queue = build_queue(&config).await?;
    let objects: Arc<dyn bundler_objectstore::ObjectStore> = build_objects(&config)?;

    let wallet_key_bytes: [u8; 32] = hex::decode(&config.receipt_signing_key_hex)?
        .try_into()
        .map_err(|_| std::io::Error::other("RECEIPT_SIGNING_KEY must decode to exactly 32 bytes"))?;
    let wallet = Arc::new(SigningKey::from_bytes(&wallet_key_bytes));

    let price_source = GatewayPriceSource::new(config.gateway_url.clone());
    let pricing = PricingOracle::new(price_source).with_bundler_fee_percent(config.payments.bundler_fee_percent);
    let payments = Arc::new(PaymentEngine::new(config.payments.clone(), pricing, store.clone()));

    let handles = run::Handles {
        store,
        queue,
        objects,
        http: reqwest::Client::new(),
        wallet,
        payments,
        optical_sinks: Arc::new(build_optical_sinks()),
        config: config.clone(),
    };

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    tracing::info!("bundle packer and pipeline workers starting");
    run::run(handles, cancel).await;
    tracing::info!("worker shut down");
    Ok(())
}
