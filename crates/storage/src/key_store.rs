use keydrop_domain::model::{
    AssignedKey, ClaimAttempt, DurationUnit, InventoryStats, KeyClaimRequest, KeyDuration,
    KeyInsert, KeyRecord, NewKey,
};
use keydrop_domain::storage::{KeyStore, StorageError, StorageResult};
use sea_orm::sea_query::{OnConflict, Order, Query};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait,
    FromQueryResult, PaginatorTrait, QueryFilter, QuerySelect, Set, TransactionTrait,
};
use tracing::debug;

use crate::entity::keys::{self, DurationUnitDb};
use crate::entity::{sales, users};
use crate::sale_store::sale_to_record;
use crate::SeaOrmStorage;

/// Attempts before a claim gives up on losing every race for the oldest key.
const MAX_CLAIM_ATTEMPTS: usize = 8;

#[async_trait::async_trait]
impl KeyStore for SeaOrmStorage {
    async fn insert_key(&self, key: NewKey) -> StorageResult<KeyInsert> {
        let duration_value = i32::try_from(key.duration.value())
            .map_err(|_| StorageError::Database("key duration out of range".into()))?;
        let model = keys::ActiveModel {
            key_text: Set(key.key_text),
            duration_value: Set(duration_value),
            duration_unit: Set(unit_to_db(key.duration.unit())),
            product_name: Set(key.product_name),
            product_link: Set(key.product_link),
            used: Set(false),
            created_at: Set(key.created_at),
            ..Default::default()
        };
        let inserted = keys::Entity::insert(model)
            .on_conflict(
                OnConflict::column(keys::Column::KeyText)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(if inserted > 0 {
            KeyInsert::Inserted
        } else {
            KeyInsert::Duplicate
        })
    }

    async fn claim_next_key(&self, request: KeyClaimRequest) -> StorageResult<ClaimAttempt> {
        let txn = self
            .connection()
            .begin()
            .await
            .map_err(StorageError::from_source)?;

        // Marking the key first takes the write lock up front on SQLite.
        let Some(key) = mark_oldest_unused(&txn).await? else {
            txn.rollback().await.map_err(StorageError::from_source)?;
            return Ok(ClaimAttempt::NoInventory);
        };

        let user = users::Entity::find_by_id(request.user.id.get())
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(StorageError::from_source)?;
        let eligible = user.as_ref().is_some_and(|user| {
            let cooling = user
                .last_key_time
                .is_some_and(|last| request.now < last + request.cooldown);
            !user.blocked && user.verified && !cooling
        });
        let Some(user) = user.filter(|_| eligible) else {
            txn.rollback().await.map_err(StorageError::from_source)?;
            return Ok(ClaimAttempt::Ineligible);
        };

        let record = key_to_record(key)?;
        let Some(expires_at) = request.now.checked_add_signed(record.duration.to_chrono()) else {
            txn.rollback().await.map_err(StorageError::from_source)?;
            return Err(StorageError::Corrupted(format!(
                "key {} duration {} overflows its expiry",
                record.id, record.duration
            )));
        };
        let handle = request.user.handle.clone().or(user.handle.clone());
        let total_claims = user.total_claims + 1;

        let mut active_user: users::ActiveModel = user.into();
        active_user.verified = Set(true);
        active_user.last_key_time = Set(Some(request.now));
        active_user.total_claims = Set(total_claims);
        active_user.handle = Set(handle.clone());
        active_user
            .update(&txn)
            .await
            .map_err(StorageError::from_source)?;

        let key_id = i32::try_from(record.id)
            .map_err(|_| StorageError::Corrupted(format!("key id {} out of range", record.id)))?;
        let sale = sales::ActiveModel {
            user_id: Set(request.user.id.get()),
            handle: Set(handle),
            key_id: Set(key_id),
            key_text: Set(record.key_text.clone()),
            product_name: Set(record.product_name.clone()),
            assigned_at: Set(request.now),
            expires_at: Set(expires_at),
            active: Set(true),
            left_channel: Set(false),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(StorageError::from_source)?;

        txn.commit().await.map_err(StorageError::from_source)?;

        Ok(ClaimAttempt::Assigned(AssignedKey {
            key: record,
            sale: sale_to_record(sale),
        }))
    }

    async fn delete_all_keys(&self) -> StorageResult<u64> {
        let result = keys::Entity::delete_many()
            .exec(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(result.rows_affected)
    }

    async fn inventory(&self) -> StorageResult<InventoryStats> {
        let db = self.connection();
        let total = keys::Entity::find()
            .count(db)
            .await
            .map_err(StorageError::from_source)?;
        let available = keys::Entity::find()
            .filter(keys::Column::Used.eq(false))
            .count(db)
            .await
            .map_err(StorageError::from_source)?;
        Ok(InventoryStats {
            total,
            used: total.saturating_sub(available),
            available,
        })
    }
}

/// Flips `used` on the oldest unused key with a single conditional
/// `UPDATE ... RETURNING`. A concurrent claimer that wins the same row makes
/// the update match nothing; the attempt is repeated while unused keys remain.
async fn mark_oldest_unused(txn: &DatabaseTransaction) -> StorageResult<Option<keys::Model>> {
    let backend = txn.get_database_backend();

    for attempt in 1..=MAX_CLAIM_ATTEMPTS {
        let oldest = Query::select()
            .column(keys::Column::Id)
            .from(keys::Entity)
            .and_where(keys::Column::Used.eq(false))
            .order_by(keys::Column::CreatedAt, Order::Asc)
            .order_by(keys::Column::Id, Order::Asc)
            .limit(1)
            .to_owned();

        let mut query = Query::update();
        query.table(keys::Entity);
        query.value(keys::Column::Used, true);
        query.and_where(keys::Column::Id.in_subquery(oldest));
        query.and_where(keys::Column::Used.eq(false));
        query.returning_all();

        let maybe_row = txn
            .query_one(backend.build(&query))
            .await
            .map_err(StorageError::from_source)?;
        if let Some(row) = maybe_row {
            let model =
                keys::Model::from_query_result(&row, "").map_err(StorageError::from_source)?;
            return Ok(Some(model));
        }

        let remaining = keys::Entity::find()
            .filter(keys::Column::Used.eq(false))
            .count(txn)
            .await
            .map_err(StorageError::from_source)?;
        if remaining == 0 {
            return Ok(None);
        }
        debug!(attempt, remaining, "lost race for oldest key; retrying");
    }

    Err(StorageError::Database(
        "key claim contention exceeded retry limit".into(),
    ))
}

fn unit_to_db(unit: DurationUnit) -> DurationUnitDb {
    match unit {
        DurationUnit::Hours => DurationUnitDb::Hours,
        DurationUnit::Days => DurationUnitDb::Days,
    }
}

fn key_to_record(model: keys::Model) -> StorageResult<KeyRecord> {
    let value = u32::try_from(model.duration_value).map_err(|_| {
        StorageError::Corrupted(format!(
            "key {} has negative duration {}",
            model.id, model.duration_value
        ))
    })?;
    let unit = match model.duration_unit {
        DurationUnitDb::Hours => DurationUnit::Hours,
        DurationUnitDb::Days => DurationUnit::Days,
    };
    Ok(KeyRecord {
        id: i64::from(model.id),
        key_text: model.key_text,
        duration: KeyDuration::new(value, unit),
        product_name: model.product_name,
        product_link: model.product_link,
        used: model.used,
        created_at: model.created_at,
    })
}
