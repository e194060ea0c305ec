use keydrop_domain::model::{Channel, ChannelHandle};
use keydrop_domain::storage::{ChannelStore, StorageError, StorageResult};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};

use crate::entity::channels;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl ChannelStore for SeaOrmStorage {
    async fn add_channel(&self, channel: &Channel) -> StorageResult<bool> {
        let model = channels::ActiveModel {
            handle: Set(channel.handle.as_str().to_string()),
            link: Set(channel.link.clone()),
            ..Default::default()
        };
        let inserted = channels::Entity::insert(model)
            .on_conflict(
                OnConflict::column(channels::Column::Handle)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(inserted > 0)
    }

    async fn remove_channel(&self, handle: &ChannelHandle) -> StorageResult<bool> {
        let result = channels::Entity::delete_many()
            .filter(channels::Column::Handle.eq(handle.as_str()))
            .exec(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(result.rows_affected > 0)
    }

    async fn list_channels(&self) -> StorageResult<Vec<Channel>> {
        let models = channels::Entity::find()
            .order_by_asc(channels::Column::Id)
            .all(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(models
            .into_iter()
            .map(|model| Channel {
                handle: ChannelHandle::new(model.handle),
                link: model.link,
            })
            .collect())
    }
}
