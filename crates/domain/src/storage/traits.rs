use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{
    Channel, ChannelHandle, ClaimAttempt, InventoryStats, KeyClaimRequest, KeyInsert, NewKey,
    SaleRecord, UserId, UserProfile, UserRecord, UserStats, WaitlistEntry, WaitlistInsert,
};

/// Common result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("corrupted row: {0}")]
    Corrupted(String),
}

impl StorageError {
    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Creates the user on first contact, refreshing the handle afterwards.
    async fn upsert_user(
        &self,
        profile: &UserProfile,
        now: DateTime<Utc>,
    ) -> StorageResult<UserRecord>;
    async fn find_user(&self, id: UserId) -> StorageResult<Option<UserRecord>>;
    async fn mark_verified(&self, id: UserId) -> StorageResult<()>;
    /// `Some(reason)` blocks, `None` unblocks. Returns `false` for unknown users.
    async fn set_blocked(&self, id: UserId, reason: Option<String>) -> StorageResult<bool>;
    async fn list_users(&self) -> StorageResult<Vec<UserRecord>>;
    async fn user_stats(&self) -> StorageResult<UserStats>;
}

#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Returns `false` when the handle is already configured.
    async fn add_channel(&self, channel: &Channel) -> StorageResult<bool>;
    async fn remove_channel(&self, handle: &ChannelHandle) -> StorageResult<bool>;
    async fn list_channels(&self) -> StorageResult<Vec<Channel>>;
}

#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn insert_key(&self, key: NewKey) -> StorageResult<KeyInsert>;
    /// Atomically marks the oldest unused key as used, updates the user and
    /// appends the sale. Never hands the same key out twice.
    async fn claim_next_key(&self, request: KeyClaimRequest) -> StorageResult<ClaimAttempt>;
    /// Deletes used and unused keys alike; sales are left in place.
    async fn delete_all_keys(&self) -> StorageResult<u64>;
    async fn inventory(&self) -> StorageResult<InventoryStats>;
}

#[async_trait]
pub trait SaleStore: Send + Sync {
    async fn active_sales(&self) -> StorageResult<Vec<SaleRecord>>;
    /// Sets the left-channel flag on the user's active sales; returns the
    /// number of sales newly flagged.
    async fn flag_left_channel(&self, user: UserId) -> StorageResult<u64>;
    async fn recent_sales(&self, limit: u64) -> StorageResult<Vec<SaleRecord>>;
    async fn count_sales(&self) -> StorageResult<u64>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_setting(&self, key: &str) -> StorageResult<Option<String>>;
    async fn put_setting(&self, key: &str, value: &str) -> StorageResult<()>;
}

#[async_trait]
pub trait WaitlistStore: Send + Sync {
    async fn enqueue(
        &self,
        profile: &UserProfile,
        now: DateTime<Utc>,
    ) -> StorageResult<WaitlistInsert>;
    /// Entries in enqueue order.
    async fn list_waitlist(&self) -> StorageResult<Vec<WaitlistEntry>>;
    async fn remove_from_waitlist(&self, user: UserId) -> StorageResult<bool>;
    async fn mark_waitlist_notified(&self, user: UserId) -> StorageResult<()>;
    async fn clear_waitlist(&self) -> StorageResult<u64>;
}

/// Everything the allocation engine needs from the durable store.
pub trait Store:
    UserStore + ChannelStore + KeyStore + SaleStore + SettingsStore + WaitlistStore
{
}

impl<T> Store for T where
    T: UserStore + ChannelStore + KeyStore + SaleStore + SettingsStore + WaitlistStore
{
}
