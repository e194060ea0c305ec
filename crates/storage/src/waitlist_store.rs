use chrono::{DateTime, Utc};
use keydrop_domain::model::{UserId, UserProfile, WaitlistEntry, WaitlistInsert};
use keydrop_domain::storage::{StorageError, StorageResult, WaitlistStore};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};

use crate::entity::waitlist;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl WaitlistStore for SeaOrmStorage {
    async fn enqueue(
        &self,
        profile: &UserProfile,
        now: DateTime<Utc>,
    ) -> StorageResult<WaitlistInsert> {
        let model = waitlist::ActiveModel {
            user_id: Set(profile.id.get()),
            handle: Set(profile.handle.clone()),
            enqueued_at: Set(now),
            admin_notified: Set(false),
            ..Default::default()
        };
        let inserted = waitlist::Entity::insert(model)
            .on_conflict(
                OnConflict::column(waitlist::Column::UserId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(if inserted > 0 {
            WaitlistInsert::Added
        } else {
            WaitlistInsert::AlreadyWaiting
        })
    }

    async fn list_waitlist(&self) -> StorageResult<Vec<WaitlistEntry>> {
        let models = waitlist::Entity::find()
            .order_by_asc(waitlist::Column::Id)
            .all(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(models
            .into_iter()
            .map(|model| WaitlistEntry {
                id: i64::from(model.id),
                user_id: UserId::new(model.user_id),
                handle: model.handle,
                enqueued_at: model.enqueued_at,
                admin_notified: model.admin_notified,
            })
            .collect())
    }

    async fn remove_from_waitlist(&self, user: UserId) -> StorageResult<bool> {
        let result = waitlist::Entity::delete_many()
            .filter(waitlist::Column::UserId.eq(user.get()))
            .exec(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(result.rows_affected > 0)
    }

    async fn mark_waitlist_notified(&self, user: UserId) -> StorageResult<()> {
        waitlist::Entity::update_many()
            .col_expr(waitlist::Column::AdminNotified, Expr::value(true))
            .filter(waitlist::Column::UserId.eq(user.get()))
            .exec(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(())
    }

    async fn clear_waitlist(&self) -> StorageResult<u64> {
        let result = waitlist::Entity::delete_many()
            .exec(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(result.rows_affected)
    }
}
