//! Update parsing and routing: one inbound event in, zero or more outbound
//! messages out.

use std::str::FromStr;

use chrono::Utc;
use keydrop_domain::model::UserProfile;
use keydrop_domain::services::{
    AdminAction, AdminConsole, AdminInput, AdminReply, AllocationEngine, Keyboard,
    ServiceError, ServiceResult,
};
use keydrop_domain::storage::Store;
use metrics::counter;
use tracing::{debug, warn};

use crate::api::Update;
use crate::render;
use crate::worker::TelegramError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Admin,
    Other(String),
}

impl Command {
    /// Parses `/name` or `/name@botname`, ignoring trailing arguments.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.trim().split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);
        Some(match name {
            "start" => Self::Start,
            "admin" => Self::Admin,
            other => Self::Other(other.to_string()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Command {
        from: UserProfile,
        command: Command,
    },
    Callback {
        id: String,
        from: UserProfile,
        data: String,
    },
    Text {
        from: UserProfile,
        text: String,
    },
    Photo {
        from: UserProfile,
        photo: String,
        caption: String,
    },
}

impl Inbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Command { .. } => "command",
            Self::Callback { .. } => "callback",
            Self::Text { .. } => "text",
            Self::Photo { .. } => "photo",
        }
    }

    pub fn sender(&self) -> &UserProfile {
        match self {
            Self::Command { from, .. }
            | Self::Callback { from, .. }
            | Self::Text { from, .. }
            | Self::Photo { from, .. } => from,
        }
    }
}

/// Extracts the event the bot reacts to. Group chats, bots and unsupported
/// message kinds yield `None`.
pub fn parse_update(update: &Update) -> Option<Inbound> {
    if let Some(query) = &update.callback_query {
        if query.from.is_bot {
            return None;
        }
        return Some(Inbound::Callback {
            id: query.id.clone(),
            from: UserProfile::new(query.from.id, query.from.username.clone()),
            data: query.data.clone().unwrap_or_default(),
        });
    }

    let message = update.message.as_ref()?;
    if message.chat.kind != "private" {
        return None;
    }
    let sender = message.from.as_ref().filter(|user| !user.is_bot)?;
    let from = UserProfile::new(sender.id, sender.username.clone());

    if let Some(photos) = &message.photo {
        let largest = photos.last()?;
        return Some(Inbound::Photo {
            from,
            photo: largest.file_id.clone(),
            caption: message.caption.clone().unwrap_or_default(),
        });
    }

    let text = message.text.as_ref()?;
    match Command::parse(text) {
        Some(command) => Some(Inbound::Command { from, command }),
        None => Some(Inbound::Text {
            from,
            text: text.clone(),
        }),
    }
}

/// Routes inbound events to the allocation engine or the admin console and
/// renders the outcome back to the sender.
#[derive(Clone)]
pub struct Dispatcher<S> {
    console: AdminConsole<S>,
}

impl<S> Dispatcher<S>
where
    S: Store,
{
    pub fn new(console: AdminConsole<S>) -> Self {
        Self { console }
    }

    fn engine(&self) -> &AllocationEngine<S> {
        self.console.engine()
    }

    pub async fn dispatch(&self, inbound: Inbound) -> Result<(), TelegramError> {
        match inbound {
            Inbound::Command {
                from,
                command: Command::Start,
            } => {
                let outcome = self.engine().start(&from).await;
                match outcome {
                    Ok(outcome) => {
                        let (text, keyboard) = render::welcome(&outcome);
                        self.reply(&from, &text, Some(&keyboard)).await
                    }
                    Err(err) => self.fail(&from, err).await,
                }
            }
            Inbound::Command {
                from,
                command: Command::Admin,
            } => self.admin_action(&from, AdminAction::Panel).await,
            Inbound::Command {
                command: Command::Other(name),
                from,
            } => {
                debug!(user = %from.id, command = %name, "ignoring unknown command");
                Ok(())
            }
            Inbound::Callback { from, data, .. } => self.callback(&from, &data).await,
            Inbound::Text { from, text } => {
                self.admin_input(&from, AdminInput::Text(text)).await
            }
            Inbound::Photo {
                from,
                photo,
                caption,
            } => {
                self.admin_input(&from, AdminInput::Photo { photo, caption })
                    .await
            }
        }
    }

    async fn callback(&self, from: &UserProfile, data: &str) -> Result<(), TelegramError> {
        if data == render::VERIFY_CALLBACK {
            return match self.engine().request_verification(from).await {
                Ok(outcome) => {
                    let text = render::verification(&outcome);
                    self.reply(from, &text, Some(&render::main_keyboard())).await
                }
                Err(err) => self.fail(from, err).await,
            };
        }
        if data == render::CLAIM_CALLBACK {
            return match self.engine().request_claim(from).await {
                Ok(outcome) => {
                    let text = render::claim(&outcome);
                    self.reply(from, &text, Some(&render::main_keyboard())).await
                }
                Err(err) => self.fail(from, err).await,
            };
        }
        match AdminAction::from_str(data) {
            Ok(action) => self.admin_action(from, action).await,
            Err(_) => {
                debug!(user = %from.id, data, "ignoring unknown callback");
                Ok(())
            }
        }
    }

    async fn admin_action(
        &self,
        from: &UserProfile,
        action: AdminAction,
    ) -> Result<(), TelegramError> {
        let result = self.console.handle_action(from.id, action).await;
        self.admin_result(from, result).await
    }

    /// Free-form input only matters to the admin; everyone else is ignored.
    async fn admin_input(&self, from: &UserProfile, input: AdminInput) -> Result<(), TelegramError> {
        if !self.engine().is_admin(from.id) {
            return Ok(());
        }
        let result = self.console.handle_input(from.id, input).await;
        self.admin_result(from, result).await
    }

    async fn admin_result(
        &self,
        from: &UserProfile,
        result: ServiceResult<AdminReply>,
    ) -> Result<(), TelegramError> {
        match result {
            Ok(reply) => match render::admin_reply(&reply, Utc::now()) {
                Some((text, keyboard)) => self.reply(from, &text, Some(&keyboard)).await,
                None => Ok(()),
            },
            Err(ServiceError::InvalidInput(reason)) => {
                let text = format!("❌ {reason}");
                self.reply(from, &text, Some(&render::back_keyboard())).await
            }
            Err(err) => self.fail(from, err).await,
        }
    }

    async fn fail(&self, from: &UserProfile, err: ServiceError) -> Result<(), TelegramError> {
        if !matches!(err, ServiceError::AccessDenied | ServiceError::InvalidInput(_)) {
            warn!(user = %from.id, ?err, "request failed");
        }
        self.reply(from, &render::service_error(&err), None).await
    }

    async fn reply(
        &self,
        to: &UserProfile,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), TelegramError> {
        let sent = self
            .engine()
            .notifier()
            .send_message(to.id, text, keyboard)
            .await;
        let result = if sent.is_ok() { "ok" } else { "failed" };
        counter!("keydrop_deliveries_total", "kind" => "reply", "result" => result).increment(1);
        sent.map_err(TelegramError::from)
    }
}
