use keydrop_domain::storage::{SettingsStore, StorageError, StorageResult};
use sea_orm::{sea_query::OnConflict, EntityTrait, Set};

use crate::entity::settings;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl SettingsStore for SeaOrmStorage {
    async fn get_setting(&self, key: &str) -> StorageResult<Option<String>> {
        let maybe = settings::Entity::find_by_id(key.to_string())
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(maybe.map(|model| model.value))
    }

    async fn put_setting(&self, key: &str, value: &str) -> StorageResult<()> {
        let active = settings::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value.to_string()),
        };
        settings::Entity::insert(active)
            .on_conflict(
                OnConflict::column(settings::Column::Key)
                    .update_column(settings::Column::Value)
                    .to_owned(),
            )
            .exec(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(())
    }
}
