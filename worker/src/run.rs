//! The per-label poll loop: reserves jobs from the queue broker, dispatches them to the
//! matching pipeline module, and acks or nacks based on the outcome. `cleanup-fs` runs on
//! its own cron ticker instead of a reservation loop, since it isn't driven by enqueued jobs.

use std::sync::Arc;
use std::time::Duration;

use bundler_objectstore::store::ObjectStore;
use bundler_optical::Sink;
use bundler_payments::PaymentEngine;
use bundler_payments::gateway_source::GatewayPriceSource;
use bundler_queue::{CronTicker, Job, Label, QueueBroker};
use bundler_store::MetadataStore;
use ed25519_dalek::SigningKey;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::pipeline;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Everything a job dispatch might need; not every label uses every field.
#[derive(Clone)]
pub struct Handles {
    pub store: Arc<dyn MetadataStore>,
    pub queue: Arc<dyn QueueBroker>,
    pub objects: Arc<dyn ObjectStore>,
    pub http: reqwest::Client,
    pub wallet: Arc<SigningKey>,
    pub payments: Arc<PaymentEngine<GatewayPriceSource>>,
    pub optical_sinks: Arc<Vec<Sink>>,
    pub config: Arc<Config>,
}

/// `PlanBundle` is driven by its own cron ticker rather than the reservation-based poll
/// loop below: nothing ever enqueues a `PlanBundle` job, since a plan-bundle pass doesn't
/// act on a specific payload, it sweeps every unbundled item each tick (matching
/// `cleanup-fs`'s own cron-driven shape).
pub async fn run(handles: Handles, cancel: CancellationToken) {
    let tracker = TaskTracker::new();

    for label in [
        Label::PrepareBundle,
        Label::PostBundle,
        Label::VerifyBundle,
        Label::PutOffsets,
        Label::OpticalPost,
        Label::UnbundleNested,
        Label::FinalizeUpload,
    ] {
        let handles = handles.clone();
        let cancel = cancel.clone();
        tracker.spawn(async move { poll_loop(label, handles, cancel).await });
    }

    {
        let handles = handles.clone();
        let cancel = cancel.clone();
        tracker.spawn(async move { plan_bundle_loop(handles, cancel).await });
    }

    {
        let handles = handles.clone();
        let cancel = cancel.clone();
        tracker.spawn(async move { cleanup_loop(handles, cancel).await });
    }

    tracker.close();
    tracker.wait().await;
}

async fn poll_loop(label: Label, handles: Handles, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        let jobs = match handles.queue.reserve(label, label.default_concurrency()).await {
            Ok(jobs) => jobs,
            Err(err) => {
                tracing::warn!(?label, error = %err, "queue reserve failed");
                continue;
            }
        };
        if jobs.is_empty() {
            continue;
        }

        let dispatches = jobs.into_iter().map(|job| dispatch(job, handles.clone()));
        futures::future::join_all(dispatches).await;
    }
}

async fn plan_bundle_loop(handles: Handles, cancel: CancellationToken) {
    let ticker = match CronTicker::parse(&handles.config.plan_bundle_cron) {
        Ok(ticker) => ticker,
        Err(err) => {
            tracing::error!(error = %err, "invalid plan-bundle cron expression, plan-bundle disabled");
            return;
        }
    };
    ticker
        .run(cancel, || async {
            match pipeline::plan_bundle::run(&handles.store, &handles.queue, &handles.config).await {
                Ok(plans_created) => tracing::info!(plans_created, "plan-bundle pass complete"),
                Err(err) => tracing::error!(error = %err, "plan-bundle pass failed"),
            }
        })
        .await;
}

async fn cleanup_loop(handles: Handles, cancel: CancellationToken) {
    let ticker = match CronTicker::parse(&handles.config.cleanup_cron) {
        Ok(ticker) => ticker,
        Err(err) => {
            tracing::error!(error = %err, "invalid cleanup-fs cron expression, cleanup-fs disabled");
            return;
        }
    };
    ticker
        .run(cancel, || async {
            match pipeline::cleanup_fs::run(&handles.store, &handles.objects, &handles.config).await {
                Ok(swept) => tracing::info!(swept, "cleanup-fs pass complete"),
                Err(err) => tracing::error!(error = %err, "cleanup-fs pass failed"),
            }
        })
        .await;
}

async fn dispatch(job: Job, handles: Handles) {
    let label = job.label;
    let result = run_pipeline(&job, &handles).await;
    match result {
        Ok(()) => {
            if let Err(err) = handles.queue.ack(&job.id).await {
                tracing::warn!(job_id = %job.id, error = %err, "failed to ack completed job");
            }
        }
        Err(err) => {
            let max_attempts = label.default_max_attempts();
            tracing::warn!(?label, job_id = %job.id, attempt = job.attempt, error = %err, "job failed");
            if job.attempt + 1 >= max_attempts {
                if let Err(fail_err) = fail_plan_members(&job, &handles, &err.to_string()).await {
                    tracing::error!(job_id = %job.id, error = %fail_err, "failed to record terminal plan failure");
                }
            }
            if let Err(nack_err) = handles.queue.nack(&job, max_attempts).await {
                tracing::warn!(job_id = %job.id, error = %nack_err, "failed to nack job");
            }
        }
    }
}

async fn run_pipeline(job: &Job, handles: &Handles) -> Result<(), pipeline::PipelineError> {
    match job.label {
        Label::PlanBundle => {
            pipeline::plan_bundle::run(&handles.store, &handles.queue, &handles.config).await.map(|_| ())
        }
        Label::PrepareBundle => {
            pipeline::prepare_bundle::run(
                &job.payload,
                &handles.store,
                &handles.objects,
                &handles.queue,
                &handles.payments,
                &handles.config,
            )
            .await
        }
        Label::PostBundle => {
            pipeline::post_bundle::run(&job.payload, &handles.store, &handles.queue, &handles.http, &handles.wallet, &handles.config)
                .await
        }
        Label::VerifyBundle => {
            pipeline::verify_bundle::run(&job.payload, &handles.store, &handles.queue, &handles.http, &handles.config).await
        }
        Label::PutOffsets => pipeline::put_offsets::run(&job.payload, &handles.store).await,
        Label::OpticalPost => {
            pipeline::optical_post::run(
                &job.payload,
                &handles.store,
                &handles.http,
                &handles.wallet,
                &handles.optical_sinks,
                &handles.config,
            )
            .await
        }
        Label::UnbundleNested => pipeline::unbundle_nested::run(&job.payload, &handles.store, &handles.objects).await,
        Label::FinalizeUpload => pipeline::finalize_upload::run(&job.payload, &handles.store, &handles.objects).await,
        other => {
            tracing::warn!(?other, "no dispatch registered for label, dropping job as unhandled");
            Ok(())
        }
    }
}

/// On a job's final failed attempt, walks its plan's members through the item-level retry
/// budget rather than blindly failing the whole plan, so items with headroom left get
/// another chance in a future `plan-bundle` pass.
async fn fail_plan_members(job: &Job, handles: &Handles, reason: &str) -> Result<(), pipeline::PipelineError> {
    let plan_id = match job.payload.get("planId").and_then(|v| v.as_str()) {
        Some(id) => id.to_string(),
        None => return Ok(()),
    };
    tracing::error!(plan_id, reason, "bundle plan exhausted its retry budget");
    let Some(plan) = handles.store.get_bundle_plan(&plan_id).await? else {
        return Ok(());
    };
    for item_id in &plan.item_ids {
        handles.store.record_item_bundle_failure(item_id, &plan_id).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bundler_queue::inmemory::InMemoryQueue;
    use bundler_store::memory::InMemoryStore;
    use bundler_types::bundle::BundlePlan;
    use bundler_types::item::{DataItem, ItemState};
    use bundler_types::timestamp::UnixTimestamp;

    fn sample_item(id: &str) -> DataItem {
        DataItem {
            id: id.to_string(),
            owner_address: "0xowner".into(),
            signature_type: 1,
            byte_count: 10,
            payload_content_type: None,
            payload_data_start: 0,
            uploaded_at: UnixTimestamp::from_secs(100),
            deadline_height: 10_100,
            assessed_price: 0,
            failed_bundles: Vec::new(),
            premium_feature_type: None,
            tags: Vec::new(),
            signature: vec![0u8; 8],
            state: ItemState::New,
        }
    }

    fn handles(store: Arc<dyn MetadataStore>) -> Handles {
        let pricing = bundler_payments::pricing::PricingOracle::new(GatewayPriceSource::new("http://localhost:1984".into()));
        let payments = Arc::new(PaymentEngine::new(Default::default(), pricing, store.clone()));
        Handles {
            store,
            queue: Arc::new(InMemoryQueue::new()),
            objects: Arc::new(bundler_objectstore::store::PutObjectStore::new(
                Arc::new(object_store::memory::InMemory::new()),
                Arc::new(object_store::memory::InMemory::new()),
            )) as Arc<dyn ObjectStore>,
            http: reqwest::Client::new(),
            wallet: Arc::new(SigningKey::from_bytes(&[7u8; 32])),
            payments,
            optical_sinks: Arc::new(Vec::new()),
            config: Arc::new(Config {
                database_url: None,
                redis_url: None,
                local_mode: true,
                local_data_dir: "/tmp".into(),
                gateway_url: "http://localhost:1984".into(),
                receipt_signing_key_hex: "00".repeat(32),
                max_bundle_byte_count: bundler_types::bundle::DEFAULT_MAX_BUNDLE_BYTE_COUNT,
                max_items_per_bundle: bundler_types::bundle::DEFAULT_MAX_ITEMS_PER_BUNDLE,
                overdue_threshold_secs: 900,
                confirmation_depth: 18,
                verify_timeout_secs: 6 * 60 * 60,
                filesystem_cleanup_days: 7,
                minio_cleanup_days: 90,
                plan_bundle_cron: "0 * * * * *".into(),
                cleanup_cron: "0 0 2 * * *".into(),
                cleanup_batch_size: 500,
                payments: Default::default(),
            }),
        }
    }

    #[tokio::test]
    async fn fail_plan_members_detaches_every_item_in_the_plan() {
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryStore::new());
        store.insert_new_item(sample_item("a")).await.unwrap();
        store.insert_new_item(sample_item("b")).await.unwrap();
        let plan = BundlePlan::new(
            "plan1".into(),
            &[("a".into(), 10), ("b".into(), 10)],
            UnixTimestamp::from_secs(200),
            None,
            false,
            bundler_types::bundle::DEFAULT_MAX_BUNDLE_BYTE_COUNT,
            bundler_types::bundle::DEFAULT_MAX_ITEMS_PER_BUNDLE,
        )
        .unwrap();
        store.create_bundle_plan(plan).await.unwrap();
        let h = handles(store.clone());

        let job = Job { id: "job-1".into(), label: Label::PrepareBundle, payload: serde_json::json!({ "planId": "plan1" }), attempt: 2 };
        fail_plan_members(&job, &h, "prepare-bundle retries exhausted").await.unwrap();

        assert_eq!(store.get_item("a").await.unwrap().unwrap().state, ItemState::New);
        assert_eq!(store.get_item("b").await.unwrap().unwrap().state, ItemState::New);
    }

    #[tokio::test]
    async fn fail_plan_members_is_a_no_op_without_a_plan_id() {
        let store: Arc<dyn MetadataStore> = Arc::new(InMemoryStore::new());
        let h = handles(store.clone());
        let job = Job { id: "job-1".into(), label: Label::FinalizeUpload, payload: serde_json::json!({}), attempt: 2 };
        fail_plan_members(&job, &h, "no plan").await.unwrap();
    }
}
