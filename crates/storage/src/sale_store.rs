use keydrop_domain::model::{SaleRecord, UserId};
use keydrop_domain::storage::{SaleStore, StorageError, StorageResult};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect};

use crate::entity::sales;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl SaleStore for SeaOrmStorage {
    async fn active_sales(&self) -> StorageResult<Vec<SaleRecord>> {
        let models = sales::Entity::find()
            .filter(sales::Column::Active.eq(true))
            .order_by_asc(sales::Column::Id)
            .all(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(models.into_iter().map(sale_to_record).collect())
    }

    async fn flag_left_channel(&self, user: UserId) -> StorageResult<u64> {
        let result = sales::Entity::update_many()
            .col_expr(sales::Column::LeftChannel, Expr::value(true))
            .filter(sales::Column::UserId.eq(user.get()))
            .filter(sales::Column::Active.eq(true))
            .filter(sales::Column::LeftChannel.eq(false))
            .exec(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(result.rows_affected)
    }

    async fn recent_sales(&self, limit: u64) -> StorageResult<Vec<SaleRecord>> {
        let models = sales::Entity::find()
            .order_by_desc(sales::Column::Id)
            .limit(limit)
            .all(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(models.into_iter().map(sale_to_record).collect())
    }

    async fn count_sales(&self) -> StorageResult<u64> {
        sales::Entity::find()
            .count(self.connection())
            .await
            .map_err(StorageError::from_source)
    }
}

pub(crate) fn sale_to_record(model: sales::Model) -> SaleRecord {
    SaleRecord {
        id: i64::from(model.id),
        user_id: UserId::new(model.user_id),
        handle: model.handle,
        key_id: i64::from(model.key_id),
        key_text: model.key_text,
        product_name: model.product_name,
        assigned_at: model.assigned_at,
        expires_at: model.expires_at,
        active: model.active,
        left_channel: model.left_channel,
    }
}
