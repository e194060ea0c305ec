use keydrop_domain::model::{
    DEFAULT_COOLDOWN_HOURS, DEFAULT_KEY_MESSAGE, COOLDOWN_HOURS_KEY, KEY_MESSAGE_KEY,
};
use keydrop_domain::storage::{StorageError, StorageResult};
use sea_orm::sea_query::{
    ColumnDef, Index, IndexCreateStatement, OnConflict, Table, TableCreateStatement,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, EntityTrait, Set};

use crate::entity::{channels, keys, sales, settings, users, waitlist};

pub async fn run_migrations(db: &DatabaseConnection) -> StorageResult<()> {
    let backend = db.get_database_backend();

    let users_table = Table::create()
        .table(users::Entity)
        .col(
            ColumnDef::new(users::Column::Id)
                .big_integer()
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(users::Column::Handle).string().null())
        .col(
            ColumnDef::new(users::Column::Verified)
                .boolean()
                .not_null()
                .default(false),
        )
        .col(
            ColumnDef::new(users::Column::LastKeyTime)
                .timestamp_with_time_zone()
                .null(),
        )
        .col(
            ColumnDef::new(users::Column::TotalClaims)
                .big_integer()
                .not_null()
                .default(0),
        )
        .col(
            ColumnDef::new(users::Column::FirstSeen)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(users::Column::Blocked)
                .boolean()
                .not_null()
                .default(false),
        )
        .col(ColumnDef::new(users::Column::BlockReason).string().null())
        .to_owned();
    create_table(db, backend, users_table).await?;

    let channels_table = Table::create()
        .table(channels::Entity)
        .col(
            ColumnDef::new(channels::Column::Id)
                .integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(channels::Column::Handle)
                .string_len(128)
                .not_null()
                .unique_key(),
        )
        .col(ColumnDef::new(channels::Column::Link).string().null())
        .to_owned();
    create_table(db, backend, channels_table).await?;

    let keys_table = Table::create()
        .table(keys::Entity)
        .col(
            ColumnDef::new(keys::Column::Id)
                .integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(keys::Column::KeyText)
                .string()
                .not_null()
                .unique_key(),
        )
        .col(
            ColumnDef::new(keys::Column::DurationValue)
                .integer()
                .not_null(),
        )
        .col(
            ColumnDef::new(keys::Column::DurationUnit)
                .string_len(8)
                .not_null(),
        )
        .col(
            ColumnDef::new(keys::Column::ProductName)
                .string()
                .not_null(),
        )
        .col(
            ColumnDef::new(keys::Column::ProductLink)
                .string()
                .not_null()
                .default(""),
        )
        .col(
            ColumnDef::new(keys::Column::Used)
                .boolean()
                .not_null()
                .default(false),
        )
        .col(
            ColumnDef::new(keys::Column::CreatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .to_owned();
    create_table(db, backend, keys_table).await?;

    let sales_table = Table::create()
        .table(sales::Entity)
        .col(
            ColumnDef::new(sales::Column::Id)
                .integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new(sales::Column::UserId).big_integer().not_null())
        .col(ColumnDef::new(sales::Column::Handle).string().null())
        .col(ColumnDef::new(sales::Column::KeyId).integer().not_null())
        .col(ColumnDef::new(sales::Column::KeyText).string().not_null())
        .col(
            ColumnDef::new(sales::Column::ProductName)
                .string()
                .not_null(),
        )
        .col(
            ColumnDef::new(sales::Column::AssignedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(sales::Column::ExpiresAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(sales::Column::Active)
                .boolean()
                .not_null()
                .default(true),
        )
        .col(
            ColumnDef::new(sales::Column::LeftChannel)
                .boolean()
                .not_null()
                .default(false),
        )
        .to_owned();
    create_table(db, backend, sales_table).await?;

    let settings_table = Table::create()
        .table(settings::Entity)
        .col(
            ColumnDef::new(settings::Column::Key)
                .string_len(64)
                .not_null()
                .primary_key(),
        )
        .col(ColumnDef::new(settings::Column::Value).text().not_null())
        .to_owned();
    create_table(db, backend, settings_table).await?;

    let waitlist_table = Table::create()
        .table(waitlist::Entity)
        .col(
            ColumnDef::new(waitlist::Column::Id)
                .integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(waitlist::Column::UserId)
                .big_integer()
                .not_null()
                .unique_key(),
        )
        .col(ColumnDef::new(waitlist::Column::Handle).string().null())
        .col(
            ColumnDef::new(waitlist::Column::EnqueuedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .col(
            ColumnDef::new(waitlist::Column::AdminNotified)
                .boolean()
                .not_null()
                .default(false),
        )
        .to_owned();
    create_table(db, backend, waitlist_table).await?;

    let unused_keys_index = Index::create()
        .name("idx_keys_used_created_at")
        .table(keys::Entity)
        .col(keys::Column::Used)
        .col(keys::Column::CreatedAt)
        .to_owned();
    create_index(db, backend, unused_keys_index).await?;

    let sales_user_index = Index::create()
        .name("idx_sales_user_id")
        .table(sales::Entity)
        .col(sales::Column::UserId)
        .to_owned();
    create_index(db, backend, sales_user_index).await?;

    seed_settings(db).await
}

/// Inserts default settings without overwriting admin changes.
async fn seed_settings(db: &DatabaseConnection) -> StorageResult<()> {
    let defaults = [
        (COOLDOWN_HOURS_KEY, DEFAULT_COOLDOWN_HOURS.to_string()),
        (KEY_MESSAGE_KEY, DEFAULT_KEY_MESSAGE.to_string()),
    ];
    for (key, value) in defaults {
        let active = settings::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value),
        };
        settings::Entity::insert(active)
            .on_conflict(
                OnConflict::column(settings::Column::Key)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await
            .map_err(StorageError::from_source)?;
    }
    Ok(())
}

async fn create_table(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    mut statement: TableCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(StorageError::from_source)?;
    Ok(())
}

async fn create_index(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    mut statement: IndexCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(StorageError::from_source)?;
    Ok(())
}
