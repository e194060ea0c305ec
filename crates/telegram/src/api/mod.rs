use std::time::Duration;

use async_trait::async_trait;
use keydrop_domain::model::{ChannelHandle, UserId};
use keydrop_domain::services::{
    DeliveryError, Keyboard, MembershipChecker, MembershipError, Notifier,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::worker::TelegramError;

mod types;

pub use types::{
    AnswerCallbackQuery, ApiResponse, CallbackQuery, Chat, ChatMember, GetChatMember,
    GetUpdates, InlineKeyboardButton, InlineKeyboardMarkup, Message, PhotoSize, SendMessage,
    SendPhoto, Update, User,
};

/// Slack added on top of the long-poll timeout before the HTTP call is
/// abandoned.
const REQUEST_GRACE: Duration = Duration::from_secs(10);
/// Bot API status for "bot was blocked by the user" and similar.
const FORBIDDEN: i64 = 403;
const BAD_REQUEST: i64 = 400;

#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Long-polls for updates with ids `>= offset`.
    async fn fetch_updates(&self, offset: i64) -> Result<Vec<Update>, TelegramError>;
    /// Clears the loading indicator on a pressed inline button.
    async fn acknowledge_callback(&self, callback_id: &str) -> Result<(), TelegramError>;
}

/// Minimal Bot API client over `reqwest`.
#[derive(Clone)]
pub struct TelegramApi {
    client: reqwest::Client,
    base_url: String,
    poll_timeout: Duration,
}

impl TelegramApi {
    pub fn new(
        api_url: &str,
        token: &str,
        poll_timeout: Duration,
    ) -> Result<Self, TelegramError> {
        let client = reqwest::Client::builder()
            .timeout(poll_timeout + REQUEST_GRACE)
            .build()?;
        Ok(Self {
            client,
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
            poll_timeout,
        })
    }

    async fn call<P, T>(&self, method: &str, params: &P) -> Result<T, TelegramError>
    where
        P: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(params)
            .send()
            .await?;
        let body: ApiResponse<T> = response.json().await?;
        interpret(method, body)
    }
}

fn interpret<T>(method: &str, body: ApiResponse<T>) -> Result<T, TelegramError> {
    if body.ok {
        return body.result.ok_or_else(|| TelegramError::Api {
            code: None,
            description: format!("{method} returned no result"),
        });
    }
    Err(TelegramError::Api {
        code: body.error_code,
        description: body.description.unwrap_or_default(),
    })
}

fn delivery_error(user: UserId, err: TelegramError) -> DeliveryError {
    match err {
        TelegramError::Api {
            code: Some(FORBIDDEN),
            ..
        } => DeliveryError::Unreachable(user),
        TelegramError::Api { description, .. } => DeliveryError::Rejected(description),
        other => DeliveryError::Transport(other.to_string()),
    }
}

#[async_trait]
impl UpdateSource for TelegramApi {
    async fn fetch_updates(&self, offset: i64) -> Result<Vec<Update>, TelegramError> {
        let request = GetUpdates {
            offset,
            timeout: self.poll_timeout.as_secs(),
            allowed_updates: vec!["message", "callback_query"],
        };
        self.call("getUpdates", &request).await
    }

    async fn acknowledge_callback(&self, callback_id: &str) -> Result<(), TelegramError> {
        let request = AnswerCallbackQuery {
            callback_query_id: callback_id,
        };
        let _: bool = self.call("answerCallbackQuery", &request).await?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramApi {
    async fn send_message(
        &self,
        user: UserId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Result<(), DeliveryError> {
        let request = SendMessage {
            chat_id: user.get(),
            text,
            disable_web_page_preview: true,
            reply_markup: keyboard.map(InlineKeyboardMarkup::from),
        };
        self.call::<_, Message>("sendMessage", &request)
            .await
            .map(|_| ())
            .map_err(|err| delivery_error(user, err))
    }

    async fn send_photo(
        &self,
        user: UserId,
        photo: &str,
        caption: &str,
    ) -> Result<(), DeliveryError> {
        let request = SendPhoto {
            chat_id: user.get(),
            photo,
            caption: Some(caption).filter(|caption| !caption.is_empty()),
        };
        self.call::<_, Message>("sendPhoto", &request)
            .await
            .map(|_| ())
            .map_err(|err| delivery_error(user, err))
    }
}

#[async_trait]
impl MembershipChecker for TelegramApi {
    async fn is_channel_member(
        &self,
        channel: &ChannelHandle,
        user: UserId,
    ) -> Result<bool, MembershipError> {
        let request = GetChatMember {
            chat_id: channel.chat_ref(),
            user_id: user.get(),
        };
        match self.call::<_, ChatMember>("getChatMember", &request).await {
            Ok(member) => {
                debug!(%user, channel = %channel, status = %member.status, "membership lookup");
                Ok(member.is_present())
            }
            Err(TelegramError::Api {
                code: Some(BAD_REQUEST),
                description,
            }) if description.contains("chat not found") => {
                Err(MembershipError::UnknownChannel(channel.chat_ref()))
            }
            Err(err) => Err(MembershipError::Lookup(err.to_string())),
        }
    }
}
