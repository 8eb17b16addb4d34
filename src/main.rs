//! Admission service HTTP entrypoint.
//!
//! This binary launches an Axum-based HTTP server that accepts signed data items for the
//! bundling pipeline, gating non-free uploads behind an x402 stable-coin quote and handing
//! admitted items off to the bundle packer (`worker/`) via the metadata store and queue
//! broker.
//!
//! Endpoints:
//! - `POST /v1/tx` – admit a signed data item
//! - `GET /v1/tx/{id}/status` – item lifecycle status
//! - `GET /v1/tx/{id}/offsets` – bundle offset lookup once posted
//! - `GET /v1/price/x402/data-item/{token}/{byteCount}` – x402 quote for an upload
//! - `GET /v1/info` / `GET /health` – service metadata and liveness
//!
//! This server includes:
//! - OpenTelemetry tracing via `TraceLayer`
//! - CORS support for cross-origin clients
//! - Graceful shutdown on SIGINT/SIGTERM
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control binding address
//! - `DATABASE_URL`, `REDIS_URL` select the metadata store and queue broker backends
//! - `LOCAL_MODE=1` swaps both for in-process test doubles and the object store for local
//!   disk, for running the admission service without standing infrastructure
//! - `OTEL_*` variables enable tracing to systems like Honeycomb

use arbundler::config::Config;
use arbundler::sig_down::SigDown;
use arbundler::state::AppState;
use arbundler::telemetry::Telemetry;
use arbundler::handlers;
use axum::Router;
use axum::http::Method;
use bundler_objectstore::PutObjectStore;
use bundler_optical::{Sink, SinkRole};
use bundler_payments::GatewayPriceSource;
use bundler_payments::PaymentEngine;
use bundler_payments::pricing::PricingOracle;
use bundler_queue::QueueBroker;
use bundler_store::MetadataStore;
use dashmap::DashMap;
use dotenvy::dotenv;
use ed25519_dalek::SigningKey;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors;

/// Builds the metadata store: `DATABASE_URL`-backed Postgres in production, an in-memory
/// test double under `LOCAL_MODE`.
async fn build_store(local_mode: bool) -> Result<Arc<dyn MetadataStore>, Box<dyn std::error::Error>> {
    if local_mode {
        return Ok(Arc::new(bundler_store::memory::InMemoryStore::new()));
    }
    let database_url = std::env::var("DATABASE_URL")?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await?;
    Ok(Arc::new(bundler_store::postgres::PostgresStore::new(pool)))
}

/// Builds the queue broker: `REDIS_URL`-backed Redis in production, an in-memory test
/// double under `LOCAL_MODE`.
async fn build_queue(local_mode: bool) -> Result<Arc<dyn QueueBroker>, Box<dyn std::error::Error>> {
    if local_mode {
        return Ok(Arc::new(bundler_queue::inmemory::InMemoryQueue::new()));
    }
    let redis_url = std::env::var("REDIS_URL")?;
    let queue = bundler_queue::redis_backed::RedisQueue::connect(&redis_url, "arbundler").await?;
    Ok(Arc::new(queue))
}

/// Builds the raw/backup object stores: S3-compatible buckets named by `S3_BUCKET_RAW` /
/// `S3_BUCKET_BACKUP` in production, two local-disk directories under `LOCAL_MODE`.
fn build_objects(local_mode: bool) -> Result<Arc<PutObjectStore>, Box<dyn std::error::Error>> {
    if local_mode {
        let base = std::env::var("LOCAL_DATA_DIR").unwrap_or_else(|_| "./data".to_string());
        let raw_path = std::path::PathBuf::from(&base).join("raw");
        let backup_path = std::path::PathBuf::from(&base).join("backup");
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

/// Parses `OPTICAL_SINKS` (`name=endpoint` pairs, comma-separated) into primary sinks. A
/// deployment wanting canary/optional sinks configures them through the same pattern in a
/// future revision; every configured sink is treated as primary for now.
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

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let telemetry = Telemetry::new();
    let config = Arc::new(Config::load()?);
    let local_mode = std::env::var("LOCAL_MODE").map(|v| v == "1").unwrap_or(false);

    let store = build_store(local_mode).await?;
    let queue = build_queue(local_mode).await?;
    let objects = build_objects(local_mode)?;

    let price_source = GatewayPriceSource::new(config.gateway_url.clone());
    let pricing = PricingOracle::new(price_source)
        .with_bundler_fee_percent(config.payments.bundler_fee_percent);
    let payments = Arc::new(PaymentEngine::new(config.payments.clone(), pricing, store.clone()));

    let receipt_key_bytes: [u8; 32] = hex::decode(&config.receipt_signing_key_hex)?
        .try_into()
        .map_err(|_| std::io::Error::other("RECEIPT_SIGNING_KEY must decode to exactly 32 bytes"))?;
    let receipt_key = Arc::new(SigningKey::from_bytes(&receipt_key_bytes));

    let app_state = AppState {
        config: config.clone(),
        store,
        objects,
        queue,
        payments,
        optical_sinks: Arc::new(build_optical_sinks()),
        optical_client: reqwest::Client::new(),
        in_flight: Arc::new(DashMap::new()),
        receipt_key,
    };

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(app_state))
        .layer(telemetry.http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!("Starting admission service at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap_or_else(|e| {
        tracing::error!("Failed to bind to {}: {}", addr, e);
        std::process::exit(1);
    });

    let sig_down = SigDown::try_new()?;
    let cancellation_token = sig_down.cancellation_token();
    let graceful_shutdown = async move { cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(graceful_shutdown)
        .await?;

    Ok(())
}
