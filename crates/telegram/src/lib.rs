//! Telegram Bot API transport: the HTTP client behind the notifier and
//! membership contracts, update parsing and routing, message rendering and
//! the long-running worker loops.

pub mod api;
pub mod pipeline;
pub mod render;
pub mod worker;


pub use api::{TelegramApi, Update, UpdateSource};
pub use pipeline::{parse_update, Command, Dispatcher, Inbound};
pub use worker::{run_poller, run_sweeper, TelegramError};
