use std::time::Duration;

use moka::sync::Cache;
use strum_macros::AsRefStr;

use crate::model::UserId;

/// What the admin console expects as the next free-form input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum AdminSessionState {
    #[default]
    Idle,
    AwaitingKeys,
    AwaitingChannel,
    AwaitingChannelRemoval,
    AwaitingCooldown,
    AwaitingKeyMessage,
    AwaitingBlock,
    AwaitingUnblock,
    AwaitingAnnouncementText,
    AwaitingAnnouncementPhoto,
    /// Key purge requested, waiting for confirm/cancel.
    ConfirmingPurge,
}

/// Per-admin conversation state. Entries expire after `ttl` of inactivity so
/// an abandoned prompt cannot capture an unrelated message hours later.
#[derive(Clone)]
pub struct AdminSessions {
    states: Cache<UserId, AdminSessionState>,
}

impl AdminSessions {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
    const CAPACITY: u64 = 64;

    pub fn new(ttl: Duration) -> Self {
        Self {
            states: Cache::builder()
                .time_to_idle(ttl)
                .max_capacity(Self::CAPACITY)
                .build(),
        }
    }

    pub fn state(&self, admin: UserId) -> AdminSessionState {
        self.states.get(&admin).unwrap_or_default()
    }

    pub fn transition(&self, admin: UserId, next: AdminSessionState) {
        if next == AdminSessionState::Idle {
            self.states.invalidate(&admin);
        } else {
            self.states.insert(admin, next);
        }
    }
}

impl Default for AdminSessions {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}
