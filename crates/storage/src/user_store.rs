use chrono::{DateTime, Utc};
use keydrop_domain::model::{UserId, UserProfile, UserRecord, UserStats};
use keydrop_domain::storage::{StorageError, StorageResult, UserStore};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set};

use crate::entity::users;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl UserStore for SeaOrmStorage {
    async fn upsert_user(
        &self,
        profile: &UserProfile,
        now: DateTime<Utc>,
    ) -> StorageResult<UserRecord> {
        let id = profile.id.get();
        let model = users::ActiveModel {
            id: Set(id),
            handle: Set(profile.handle.clone()),
            verified: Set(false),
            last_key_time: Set(None),
            total_claims: Set(0),
            first_seen: Set(now),
            blocked: Set(false),
            block_reason: Set(None),
        };
        users::Entity::insert(model)
            .on_conflict(OnConflict::column(users::Column::Id).do_nothing().to_owned())
            .exec_without_returning(self.connection())
            .await
            .map_err(StorageError::from_source)?;

        if let Some(handle) = &profile.handle {
            users::Entity::update_many()
                .col_expr(users::Column::Handle, Expr::value(handle.clone()))
                .filter(users::Column::Id.eq(id))
                .exec(self.connection())
                .await
                .map_err(StorageError::from_source)?;
        }

        self.find_user(profile.id)
            .await?
            .ok_or_else(|| StorageError::Corrupted(format!("user {id} vanished after upsert")))
    }

    async fn find_user(&self, id: UserId) -> StorageResult<Option<UserRecord>> {
        let maybe = users::Entity::find_by_id(id.get())
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(maybe.map(user_to_record))
    }

    async fn mark_verified(&self, id: UserId) -> StorageResult<()> {
        users::Entity::update_many()
            .col_expr(users::Column::Verified, Expr::value(true))
            .filter(users::Column::Id.eq(id.get()))
            .exec(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(())
    }

    async fn set_blocked(&self, id: UserId, reason: Option<String>) -> StorageResult<bool> {
        let result = users::Entity::update_many()
            .col_expr(users::Column::Blocked, Expr::value(reason.is_some()))
            .col_expr(users::Column::BlockReason, Expr::value(reason))
            .filter(users::Column::Id.eq(id.get()))
            .exec(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(result.rows_affected > 0)
    }

    async fn list_users(&self) -> StorageResult<Vec<UserRecord>> {
        let models = users::Entity::find()
            .order_by_asc(users::Column::FirstSeen)
            .order_by_asc(users::Column::Id)
            .all(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(models.into_iter().map(user_to_record).collect())
    }

    async fn user_stats(&self) -> StorageResult<UserStats> {
        let db = self.connection();
        let total = users::Entity::find()
            .count(db)
            .await
            .map_err(StorageError::from_source)?;
        let verified = users::Entity::find()
            .filter(users::Column::Verified.eq(true))
            .count(db)
            .await
            .map_err(StorageError::from_source)?;
        let blocked = users::Entity::find()
            .filter(users::Column::Blocked.eq(true))
            .count(db)
            .await
            .map_err(StorageError::from_source)?;
        Ok(UserStats {
            total,
            verified,
            blocked,
        })
    }
}

pub(crate) fn user_to_record(model: users::Model) -> UserRecord {
    UserRecord {
        id: UserId::new(model.id),
        handle: model.handle,
        verified: model.verified,
        last_key_time: model.last_key_time,
        total_claims: model.total_claims,
        first_seen: model.first_seen,
        blocked: model.blocked,
        block_reason: model.block_reason,
    }
}
