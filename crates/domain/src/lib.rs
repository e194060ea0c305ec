//! Domain-level building blocks shared by the storage adapter, the chat
//! transport and the bot binary.
//!
//! Everything here is transport- and database-agnostic: typed records,
//! storage traits, configuration, and the allocation/admin services that
//! drive key distribution.

pub mod config;
pub mod model;
pub mod services;
pub mod storage;

pub use model::*;
pub use storage::*;
