//! Outbound delivery contract. The chat transport implements [`Notifier`];
//! the engine never knows how a message physically reaches the user.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::UserId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("recipient {0} cannot be reached")]
    Unreachable(UserId),
    #[error("delivery rejected: {0}")]
    Rejected(String),
    #[error("transport failure: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    /// Opaque payload echoed back by the transport when pressed.
    Callback(String),
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub action: ButtonAction,
}

impl Button {
    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Callback(data.into()),
        }
    }

    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Url(url.into()),
        }
    }
}

/// Rows of inline buttons attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(mut self, buttons: Vec<Button>) -> Self {
        self.rows.push(buttons);
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_message(
        &self,
        user: UserId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), DeliveryError>;

    async fn send_photo(
        &self,
        user: UserId,
        photo: &str,
        caption: &str,
    ) -> Result<(), DeliveryError>;
}
