//! Allocation engine, admin console and the collaborator contracts they
//! depend on, plus telemetry wiring shared by the binary.

pub mod admin;
pub mod allocation;
pub mod membership;
pub mod notify;
pub mod session;
pub mod telemetry;

pub use admin::*;
pub use allocation::*;
pub use membership::*;
pub use notify::*;
pub use session::*;
pub use telemetry::*;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{ChannelFormatError, SettingError};
use crate::storage::StorageError;

/// Faults surfaced by engine and admin operations. Ineligibility, empty
/// inventory and duplicate keys are ordinary outcomes, not errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("access denied")]
    AccessDenied,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
    #[error("delivery failure: {0}")]
    Delivery(#[from] DeliveryError),
}

impl From<SettingError> for ServiceError {
    fn from(value: SettingError) -> Self {
        Self::InvalidInput(value.to_string())
    }
}

impl From<ChannelFormatError> for ServiceError {
    fn from(value: ChannelFormatError) -> Self {
        Self::InvalidInput(value.to_string())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Time source, swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
