//! Postgres-backed [`MetadataStore`], one transaction per call, matching the table layout
//! the admission service and pipeline workers agree on: `new_data_item`, `planned_data_item`,
//! `permanent_data_item`, `bundle_plan`, `posted_bundle`, `data_item_offsets`, `x402_payments`,
//! `config`.

use async_trait::async_trait;
use bundler_types::timestamp::UnixTimestamp;
use bundler_types::wire::Tag;
use bundler_types::{BundlePlan, DataItem, ItemOffset, ItemState, Payment, PaymentStatus, PostedBundle};
use sqlx::{PgPool, Row};

use crate::store::{ItemStatus, MetadataStore, StoreError};

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(Box::new(err))
}

/// Thin wrapper around a `sqlx::PgPool`; callers own pool construction (max connections,
/// TLS, statement cache size) the way the admission service's `Config` does for every other
/// external dependency.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn state_from_item_state(state: ItemState) -> &'static str {
        match state {
            ItemState::New => "new",
            ItemState::Planned => "planned",
            ItemState::Prepared => "prepared",
            ItemState::Posted => "posted",
            ItemState::Permanent => "permanent",
            ItemState::Failed => "failed",
        }
    }

    fn item_state_from_str(s: &str) -> Result<ItemState, StoreError> {
        Ok(match s {
            "new" => ItemState::New,
            "planned" => ItemState::Planned,
            "prepared" => ItemState::Prepared,
            "posted" => ItemState::Posted,
            "permanent" => ItemState::Permanent,
            "failed" => ItemState::Failed,
            other => {
                return Err(StoreError::Backend(Box::new(std::io::Error::other(format!(
                    "unknown item state in database: {other}"
                )))));
            }
        })
    }

    fn payment_from_row(row: sqlx::postgres::PgRow) -> Result<Payment, StoreError> {
        let status_str: String = row.try_get("status").map_err(backend)?;
        let status = match status_str.as_str() {
            "pending_validation" => PaymentStatus::PendingValidation,
            "confirmed" => PaymentStatus::Confirmed,
            "refunded" => PaymentStatus::Refunded,
            "fraud_penalty" => PaymentStatus::FraudPenalty,
            "failed" => PaymentStatus::Failed,
            other => {
                return Err(StoreError::Backend(Box::new(std::io::Error::other(format!(
                    "unknown payment status in database: {other}"
                )))));
            }
        };
        let chain_unit_amount_str: String = row.try_get("chain_unit_amount").map_err(backend)?;
        let refund_amount_str: Option<String> = row.try_get("refund_amount").map_err(backend)?;
        let finalized_at: Option<i64> = row.try_get("finalized_at").map_err(backend)?;

        Ok(Payment {
            payment_id: row.try_get("payment_id").map_err(backend)?,
            tx_hash: row.try_get("tx_hash").map_err(backend)?,
            network: row.try_get("network").map_err(backend)?,
            token_address: row.try_get("token_address").map_err(backend)?,
            payer_address: row.try_get("payer_address").map_err(backend)?,
            recipient_address: row.try_get("recipient_address").map_err(backend)?,
            stable_amount: row.try_get::<i64, _>("stable_amount").map_err(backend)? as u64,
            chain_unit_amount: chain_unit_amount_str.parse().unwrap_or(0),
            mode: bundler_types::payment::PaymentMode::Payg,
            declared_byte_count: row.try_get::<i64, _>("declared_byte_count").map_err(backend)? as u64,
            actual_byte_count: row.try_get::<Option<i64>, _>("actual_byte_count").map_err(backend)?.map(|v| v as u64),
            status,
            linked_item_id: row.try_get("linked_item_id").map_err(backend)?,
            created_at: UnixTimestamp::from_secs(row.try_get::<i64, _>("created_at").map_err(backend)? as u64),
            finalized_at: finalized_at.map(|v| UnixTimestamp::from_secs(v as u64)),
            refund_amount: refund_amount_str.and_then(|s| s.parse().ok()),
        })
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn insert_new_item(&self, item: DataItem) -> Result<(), StoreError> {
        let tags = serde_json::to_value(&item.tags).map_err(|e| StoreError::Backend(Box::new(e)))?;
        let result = sqlx::query(
            r#"
            insert into new_data_item
                (id, owner_address, signature_type, byte_count, payload_content_type,
                 payload_data_start, uploaded_at, deadline_height, assessed_price,
                 premium_feature_type, tags, signature, state)
            values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            on conflict (id) do nothing
            "#,
        )
        .bind(&item.id)
        .bind(&item.owner_address)
        .bind(item.signature_type as i32)
        .bind(item.byte_count as i64)
        .bind(&item.payload_content_type)
        .bind(item.payload_data_start as i64)
        .bind(item.uploaded_at.as_secs() as i64)
        .bind(item.deadline_height as i64)
        .bind(item.assessed_price.to_string())
        .bind(&item.premium_feature_type)
        .bind(tags)
        .bind(&item.signature)
        .bind(Self::state_from_item_state(item.state))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DuplicateItem(item.id));
        }
        Ok(())
    }

    async fn get_item(&self, id: &str) -> Result<Option<DataItem>, StoreError> {
        let row = sqlx::query(
            r#"
            select id, owner_address, signature_type, byte_count, payload_content_type,
                   payload_data_start, uploaded_at, deadline_height, assessed_price,
                   premium_feature_type, tags, signature, state, failed_bundles
            from new_data_item where id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let Some(row) = row else { return Ok(None) };
        let tags_json: serde_json::Value = row.try_get("tags").map_err(backend)?;
        let tags: Vec<Tag> = serde_json::from_value(tags_json).map_err(|e| StoreError::Backend(Box::new(e)))?;
        let failed_bundles_json: serde_json::Value = row.try_get("failed_bundles").map_err(backend)?;
        let failed_bundles: Vec<String> =
            serde_json::from_value(failed_bundles_json).map_err(|e| StoreError::Backend(Box::new(e)))?;
        let assessed_price_str: String = row.try_get("assessed_price").map_err(backend)?;

        Ok(Some(DataItem {
            id: row.try_get("id").map_err(backend)?,
            owner_address: row.try_get("owner_address").map_err(backend)?,
            signature_type: row.try_get::<i32, _>("signature_type").map_err(backend)? as u16,
            byte_count: row.try_get::<i64, _>("byte_count").map_err(backend)? as u64,
            payload_content_type: row.try_get("payload_content_type").map_err(backend)?,
            payload_data_start: row.try_get::<i64, _>("payload_data_start").map_err(backend)? as u64,
            uploaded_at: UnixTimestamp::from_secs(row.try_get::<i64, _>("uploaded_at").map_err(backend)? as u64),
            deadline_height: row.try_get::<i64, _>("deadline_height").map_err(backend)? as u64,
            assessed_price: assessed_price_str.parse().unwrap_or(0),
            failed_bundles,
            premium_feature_type: row.try_get("premium_feature_type").map_err(backend)?,
            tags,
            signature: row.try_get("signature").map_err(backend)?,
            state: Self::item_state_from_str(&row.try_get::<String, _>("state").map_err(backend)?)?,
        }))
    }

    async fn get_item_status(&self, id: &str) -> Result<Option<ItemStatus>, StoreError> {
        let row = sqlx::query(
            r#"
            select n.state, n.failed_reason, p.bundle_tx_id
            from new_data_item n
            left join bundle_plan bp on bp.id = any(bp.item_ids) and n.id = any(bp.item_ids)
            left join posted_bundle p on p.plan_id = bp.plan_id
            where n.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(ItemStatus {
            state: Self::item_state_from_str(&row.try_get::<String, _>("state").map_err(backend)?)?,
            bundle_id: row.try_get("bundle_tx_id").map_err(backend)?,
            failed_reason: row.try_get("failed_reason").map_err(backend)?,
        }))
    }

    async fn list_unbundled_items(
        &self,
        feature_class: Option<&str>,
        limit: usize,
        overdue_before: Option<u64>,
    ) -> Result<Vec<DataItem>, StoreError> {
        let rows = sqlx::query(
            r#"
            select id from new_data_item
            where state = 'new'
              and ($1::text is null or premium_feature_type = $1)
              and ($2::bigint is null or uploaded_at < $2)
            order by uploaded_at asc
            limit $3
            "#,
        )
        .bind(feature_class)
        .bind(overdue_before.map(|v| v as i64))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id").map_err(backend)?;
            if let Some(item) = self.get_item(&id).await? {
                items.push(item);
            }
        }
        Ok(items)
    }

    async fn create_bundle_plan(&self, plan: BundlePlan) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let already_planned: i64 = sqlx::query_scalar(
            "select count(*) from new_data_item where id = any($1) and state != 'new'",
        )
        .bind(&plan.item_ids)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;
        if already_planned > 0 {
            return Err(StoreError::ItemsAlreadyPlanned);
        }

        sqlx::query(
            r#"
            insert into bundle_plan
                (plan_id, item_ids, total_byte_count, item_count, planned_at,
                 premium_feature_type, overdue_flag)
            values ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&plan.plan_id)
        .bind(&plan.item_ids)
        .bind(plan.total_byte_count as i64)
        .bind(plan.item_count as i64)
        .bind(plan.planned_at.as_secs() as i64)
        .bind(&plan.premium_feature_type)
        .bind(plan.overdue_flag)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        sqlx::query("update new_data_item set state = 'planned' where id = any($1)")
            .bind(&plan.item_ids)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)
    }

    async fn get_bundle_plan(&self, plan_id: &str) -> Result<Option<BundlePlan>, StoreError> {
        let row = sqlx::query(
            r#"
            select plan_id, item_ids, total_byte_count, item_count, planned_at,
                   premium_feature_type, overdue_flag
            from bundle_plan where plan_id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(BundlePlan {
            plan_id: row.try_get("plan_id").map_err(backend)?,
            item_ids: row.try_get("item_ids").map_err(backend)?,
            total_byte_count: row.try_get::<i64, _>("total_byte_count").map_err(backend)? as u64,
            item_count: row.try_get::<i64, _>("item_count").map_err(backend)? as usize,
            planned_at: UnixTimestamp::from_secs(row.try_get::<i64, _>("planned_at").map_err(backend)? as u64),
            premium_feature_type: row.try_get("premium_feature_type").map_err(backend)?,
            overdue_flag: row.try_get("overdue_flag").map_err(backend)?,
        }))
    }

    async fn mark_prepared(&self, plan_id: &str, byte_count: u64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query(
            r#"
            update new_data_item set state = 'prepared'
            where id = any(select unnest(item_ids) from bundle_plan where plan_id = $1)
            "#,
        )
        .bind(plan_id)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        sqlx::query("update bundle_plan set total_byte_count = $2 where plan_id = $1")
            .bind(plan_id)
            .bind(byte_count as i64)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)
    }

    async fn mark_posted(&self, plan_id: &str, bundle_tx_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let plan_row = sqlx::query("select total_byte_count, item_count from bundle_plan where plan_id = $1")
            .bind(plan_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::PlanNotFound(plan_id.to_string()))?;

        sqlx::query(
            r#"
            insert into posted_bundle (bundle_tx_id, plan_id, byte_count, item_count, posted_at)
            values ($1, $2, $3, $4, extract(epoch from now())::bigint)
            "#,
        )
        .bind(bundle_tx_id)
        .bind(plan_id)
        .bind(plan_row.try_get::<i64, _>("total_byte_count").map_err(backend)?)
        .bind(plan_row.try_get::<i64, _>("item_count").map_err(backend)?)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        sqlx::query(
            r#"
            update new_data_item set state = 'posted'
            where id = any(select unnest(item_ids) from bundle_plan where plan_id = $1)
            "#,
        )
        .bind(plan_id)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)
    }

    async fn mark_permanent(&self, bundle_tx_id: &str, height: u64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("update posted_bundle set confirmed_height = $2 where bundle_tx_id = $1")
            .bind(bundle_tx_id)
            .bind(height as i64)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        let plan_id: Option<String> = sqlx::query_scalar("select plan_id from posted_bundle where bundle_tx_id = $1")
            .bind(bundle_tx_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;
        let plan_id = plan_id.ok_or_else(|| StoreError::BundleNotFound(bundle_tx_id.to_string()))?;

        sqlx::query(
            r#"
            update new_data_item set state = 'permanent'
            where id = any(select unnest(item_ids) from bundle_plan where plan_id = $1)
            "#,
        )
        .bind(&plan_id)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)
    }

    async fn mark_failed(&self, plan_id: &str, reason: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query(
            r#"
            update new_data_item set state = 'failed', failed_reason = $2
            where id = any(select unnest(item_ids) from bundle_plan where plan_id = $1)
            "#,
        )
        .bind(plan_id)
        .bind(reason)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        tx.commit().await.map_err(backend)
    }

    async fn record_item_bundle_failure(&self, item_id: &str, plan_id: &str) -> Result<ItemState, StoreError> {
        let mut item = self.get_item(item_id).await?.ok_or_else(|| StoreError::ItemNotFound(item_id.to_string()))?;
        let exhausted = item.record_bundle_failure(plan_id.to_string());
        let new_state = if exhausted { ItemState::Failed } else { ItemState::New };
        item.state = item
            .state
            .transition(new_state, true)
            .map_err(|e| StoreError::Backend(Box::new(e)))?;

        let failed_bundles = serde_json::to_value(&item.failed_bundles).map_err(|e| StoreError::Backend(Box::new(e)))?;
        sqlx::query(
            r#"
            update new_data_item set
                state = $2, failed_bundles = $3,
                failed_reason = case when $2 = 'failed' then $4 else failed_reason end
            where id = $1
            "#,
        )
        .bind(item_id)
        .bind(Self::state_from_item_state(new_state))
        .bind(failed_bundles)
        .bind(format!("exceeded retry budget in plan {plan_id}"))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(new_state)
    }

    async fn rewind_plan_to_planned(&self, plan_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query(
            r#"
            update new_data_item set state = 'planned'
            where id = any(select unnest(item_ids) from bundle_plan where plan_id = $1)
            "#,
        )
        .bind(plan_id)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        sqlx::query("delete from posted_bundle where plan_id = $1")
            .bind(plan_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)
    }

    async fn get_posted_bundle(&self, bundle_tx_id: &str) -> Result<Option<PostedBundle>, StoreError> {
        let row = sqlx::query(
            "select bundle_tx_id, plan_id, byte_count, item_count, posted_at, confirmed_height from posted_bundle where bundle_tx_id = $1",
        )
        .bind(bundle_tx_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(PostedBundle {
            bundle_tx_id: row.try_get("bundle_tx_id").map_err(backend)?,
            plan_id: row.try_get("plan_id").map_err(backend)?,
            byte_count: row.try_get::<i64, _>("byte_count").map_err(backend)? as u64,
            item_count: row.try_get::<i64, _>("item_count").map_err(backend)? as usize,
            posted_at: UnixTimestamp::from_secs(row.try_get::<i64, _>("posted_at").map_err(backend)? as u64),
            confirmed_height: row.try_get::<Option<i64>, _>("confirmed_height").map_err(backend)?.map(|v| v as u64),
        }))
    }

    async fn write_offsets(&self, rows: Vec<ItemOffset>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for row in rows {
            sqlx::query(
                r#"
                insert into data_item_offsets
                    (item_id, root_bundle_id, start_offset_in_root, raw_content_length,
                     payload_data_start, payload_content_type, parent_item_id,
                     start_offset_in_parent_payload)
                values ($1, $2, $3, $4, $5, $6, $7, $8)
                on conflict (item_id) do update set
                    root_bundle_id = excluded.root_bundle_id,
                    start_offset_in_root = excluded.start_offset_in_root,
                    raw_content_length = excluded.raw_content_length,
                    payload_data_start = excluded.payload_data_start,
                    payload_content_type = excluded.payload_content_type,
                    parent_item_id = excluded.parent_item_id,
                    start_offset_in_parent_payload = excluded.start_offset_in_parent_payload
                "#,
            )
            .bind(&row.item_id)
            .bind(&row.root_bundle_id)
            .bind(row.start_offset_in_root as i64)
            .bind(row.raw_content_length as i64)
            .bind(row.payload_data_start as i64)
            .bind(&row.payload_content_type)
            .bind(&row.parent_item_id)
            .bind(row.start_offset_in_parent_payload.map(|v| v as i64))
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }
        tx.commit().await.map_err(backend)
    }

    async fn get_offset(&self, item_id: &str) -> Result<Option<ItemOffset>, StoreError> {
        let row = sqlx::query(
            r#"
            select item_id, root_bundle_id, start_offset_in_root, raw_content_length,
                   payload_data_start, payload_content_type, parent_item_id,
                   start_offset_in_parent_payload
            from data_item_offsets where item_id = $1
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(ItemOffset {
            item_id: row.try_get("item_id").map_err(backend)?,
            root_bundle_id: row.try_get("root_bundle_id").map_err(backend)?,
            start_offset_in_root: row.try_get::<i64, _>("start_offset_in_root").map_err(backend)? as u64,
            raw_content_length: row.try_get::<i64, _>("raw_content_length").map_err(backend)? as u64,
            payload_data_start: row.try_get::<i64, _>("payload_data_start").map_err(backend)? as u64,
            payload_content_type: row.try_get("payload_content_type").map_err(backend)?,
            parent_item_id: row.try_get("parent_item_id").map_err(backend)?,
            start_offset_in_parent_payload: row
                .try_get::<Option<i64>, _>("start_offset_in_parent_payload")
                .map_err(backend)?
                .map(|v| v as u64),
        }))
    }

    async fn insert_payment(&self, payment: Payment) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            insert into x402_payments
                (payment_id, tx_hash, network, token_address, payer_address, recipient_address,
                 stable_amount, chain_unit_amount, mode, declared_byte_count, status,
                 linked_item_id, created_at)
            values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&payment.payment_id)
        .bind(&payment.tx_hash)
        .bind(&payment.network)
        .bind(&payment.token_address)
        .bind(&payment.payer_address)
        .bind(&payment.recipient_address)
        .bind(payment.stable_amount as i64)
        .bind(payment.chain_unit_amount.to_string())
        .bind("payg")
        .bind(payment.declared_byte_count as i64)
        .bind("pending_validation")
        .bind(&payment.linked_item_id)
        .bind(payment.created_at.as_secs() as i64)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn link_payment_to_item(&self, payment_id: &str, item_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("update x402_payments set linked_item_id = $2 where payment_id = $1")
            .bind(payment_id)
            .bind(item_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::PaymentNotFound(payment_id.to_string()));
        }
        Ok(())
    }

    async fn finalize_payment(
        &self,
        payment_id: &str,
        actual_bytes: u64,
        status: PaymentStatus,
        refund_amount: Option<u128>,
    ) -> Result<(), StoreError> {
        let status_str = match status {
            PaymentStatus::PendingValidation => "pending_validation",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::FraudPenalty => "fraud_penalty",
            PaymentStatus::Failed => "failed",
        };
        let result = sqlx::query(
            r#"
            update x402_payments set
                actual_byte_count = $2, status = $3, refund_amount = $4,
                finalized_at = extract(epoch from now())::bigint
            where payment_id = $1
            "#,
        )
        .bind(payment_id)
        .bind(actual_bytes as i64)
        .bind(status_str)
        .bind(refund_amount.map(|v| v.to_string()))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::PaymentNotFound(payment_id.to_string()));
        }
        Ok(())
    }

    async fn get_payment(&self, payment_id: &str) -> Result<Option<Payment>, StoreError> {
        let row = sqlx::query(
            r#"
            select payment_id, tx_hash, network, token_address, payer_address, recipient_address,
                   stable_amount, chain_unit_amount, declared_byte_count, actual_byte_count,
                   status, linked_item_id, created_at, finalized_at, refund_amount
            from x402_payments where payment_id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(Self::payment_from_row).transpose()
    }

    async fn get_payment_for_item(&self, item_id: &str) -> Result<Option<Payment>, StoreError> {
        let row = sqlx::query(
            r#"
            select payment_id, tx_hash, network, token_address, payer_address, recipient_address,
                   stable_amount, chain_unit_amount, declared_byte_count, actual_byte_count,
                   status, linked_item_id, created_at, finalized_at, refund_amount
            from x402_payments where linked_item_id = $1
            order by created_at desc
            limit 1
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(Self::payment_from_row).transpose()
    }

    async fn list_items_uploaded_before(
        &self,
        before: u64,
        after_cursor: Option<(u64, String)>,
        limit: usize,
    ) -> Result<Vec<DataItem>, StoreError> {
        let (cursor_secs, cursor_id) = after_cursor.unwrap_or((0, String::new()));
        let rows = sqlx::query(
            r#"
            select id from new_data_item
            where uploaded_at < $1
              and (uploaded_at, id) > ($2, $3)
            order by uploaded_at asc, id asc
            limit $4
            "#,
        )
        .bind(before as i64)
        .bind(cursor_secs as i64)
        .bind(&cursor_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id").map_err(backend)?;
            if let Some(item) = self.get_item(&id).await? {
                items.push(item);
            }
        }
        Ok(items)
    }

    async fn get_cleanup_cursor(&self, name: &str) -> Result<Option<String>, StoreError> {
        sqlx::query_scalar("select value from config where key = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)
    }

    async fn put_cleanup_cursor(&self, name: &str, cursor: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            insert into config (key, value) values ($1, $2)
            on conflict (key) do update set value = excluded.value
            "#,
        )
        .bind(name)
        .bind(cursor)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}
