//! Admin console: the privileged operations behind the admin panel and the
//! per-admin conversation that collects their free-form input.

use metrics::counter;
use strum_macros::{AsRefStr, EnumString};
use tracing::{info, warn};

use crate::model::{
    parse_import_batch, Channel, ChannelHandle, CooldownHours, InventoryStats, KeyInsert,
    KeyMessageTemplate, RejectedLine, SaleRecord, UserId, UserProfile, UserStats, WaitlistEntry,
    COOLDOWN_HOURS_KEY, KEY_MESSAGE_KEY,
};
use crate::storage::Store;

use super::{
    AdminSessionState, AdminSessions, AllocationEngine, ReplayReport, ServiceError,
    ServiceResult, SweepReport,
};

/// Number of sales shown by the claim history view.
pub const HISTORY_LIMIT: u64 = 10;
/// Number of sales shown at the bottom of the statistics panel.
pub const STATS_RECENT_LIMIT: u64 = 5;

/// Admin panel buttons, keyed by the callback payload the transport echoes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
pub enum AdminAction {
    #[strum(serialize = "admin_panel")]
    Panel,
    #[strum(serialize = "admin_stats")]
    Stats,
    #[strum(serialize = "admin_add_keys")]
    AddKeys,
    #[strum(serialize = "admin_add_channel")]
    AddChannel,
    #[strum(serialize = "admin_remove_channel")]
    RemoveChannel,
    #[strum(serialize = "admin_list_channels")]
    ListChannels,
    #[strum(serialize = "admin_set_cooldown")]
    SetCooldown,
    #[strum(serialize = "admin_set_key_msg")]
    SetKeyMessage,
    #[strum(serialize = "admin_block")]
    Block,
    #[strum(serialize = "admin_unblock")]
    Unblock,
    #[strum(serialize = "admin_announce_text")]
    AnnounceText,
    #[strum(serialize = "admin_announce_photo")]
    AnnouncePhoto,
    #[strum(serialize = "admin_delete_all_keys")]
    DeleteAllKeys,
    #[strum(serialize = "confirm_delete_all_keys")]
    ConfirmDeleteAllKeys,
    #[strum(serialize = "cancel_delete")]
    CancelDelete,
    #[strum(serialize = "admin_user_history")]
    UserHistory,
    #[strum(serialize = "admin_waitlist")]
    Waitlist,
    #[strum(serialize = "admin_clear_waitlist")]
    ClearWaitlist,
    #[strum(serialize = "admin_sweep")]
    Sweep,
    #[strum(serialize = "admin_back_main")]
    BackMain,
}

/// Free-form message sent by the admin while a prompt is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminInput {
    Text(String),
    Photo { photo: String, caption: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    Text(String),
    Photo { photo: String, caption: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub added: usize,
    pub duplicates: usize,
    pub rejected: Vec<RejectedLine>,
    /// Present when at least one key was added.
    pub replay: Option<ReplayReport>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub recipients: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsReport {
    pub users: UserStats,
    pub keys: InventoryStats,
    pub total_claims: u64,
    pub waitlist: usize,
    pub cooldown: CooldownHours,
    pub recent: Vec<SaleRecord>,
}

/// Typed result of an admin operation, rendered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminReply {
    Panel,
    /// A prompt was opened; the state tells the transport what to ask for.
    Prompt(AdminSessionState),
    Stats(StatsReport),
    Channels(Vec<Channel>),
    ChannelAdded(Channel),
    ChannelAlreadyConfigured(ChannelHandle),
    ChannelRemoved(ChannelHandle),
    ChannelNotFound(ChannelHandle),
    CooldownUpdated(CooldownHours),
    KeyMessageUpdated(KeyMessageTemplate),
    UserBlocked { user: UserId, reason: String },
    UserUnblocked(UserId),
    UserNotFound(UserId),
    Imported(ImportReport),
    Broadcast(BroadcastReport),
    ConfirmPurge(InventoryStats),
    Purged(u64),
    PurgeCancelled,
    History(Vec<SaleRecord>),
    Waitlist(Vec<WaitlistEntry>),
    WaitlistCleared(u64),
    Swept(SweepReport),
    /// Input arrived with no prompt open.
    Ignored,
}

/// Splits `"<user id> <reason>"`. The reason is mandatory.
pub fn parse_block_request(input: &str) -> ServiceResult<(UserId, String)> {
    let trimmed = input.trim();
    let (id, reason) = trimmed
        .split_once(char::is_whitespace)
        .unwrap_or((trimmed, ""));
    let user = parse_user_id(id)?;
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(ServiceError::InvalidInput(
            "a block reason is required".into(),
        ));
    }
    Ok((user, reason.to_string()))
}

pub fn parse_user_id(input: &str) -> ServiceResult<UserId> {
    input
        .trim()
        .parse::<i64>()
        .map(UserId::new)
        .map_err(|_| ServiceError::InvalidInput(format!("`{}` is not a user id", input.trim())))
}

/// Splits `"handle | link"`; the link part is optional.
pub fn parse_channel_input(input: &str) -> ServiceResult<Channel> {
    let (handle, link) = match input.split_once('|') {
        Some((handle, link)) => (handle, Some(link.trim())),
        None => (input, None),
    };
    Ok(Channel {
        handle: ChannelHandle::parse(handle)?,
        link: link.filter(|link| !link.is_empty()).map(str::to_string),
    })
}

#[derive(Clone)]
pub struct AdminConsole<S> {
    engine: AllocationEngine<S>,
    sessions: AdminSessions,
}

impl<S> AdminConsole<S>
where
    S: Store,
{
    pub fn new(engine: AllocationEngine<S>, sessions: AdminSessions) -> Self {
        Self { engine, sessions }
    }

    pub fn engine(&self) -> &AllocationEngine<S> {
        &self.engine
    }

    pub fn session_state(&self, admin: UserId) -> AdminSessionState {
        self.sessions.state(admin)
    }

    fn authorize(&self, caller: UserId) -> ServiceResult<()> {
        if self.engine.is_admin(caller) {
            Ok(())
        } else {
            warn!(%caller, "admin operation denied");
            Err(ServiceError::AccessDenied)
        }
    }

    fn prompt(&self, caller: UserId, state: AdminSessionState) -> AdminReply {
        self.sessions.transition(caller, state);
        AdminReply::Prompt(state)
    }

    pub async fn handle_action(
        &self,
        caller: UserId,
        action: AdminAction,
    ) -> ServiceResult<AdminReply> {
        self.authorize(caller)?;
        counter!("keydrop_admin_actions_total", "action" => action.as_ref().to_owned())
            .increment(1);

        match action {
            AdminAction::Panel | AdminAction::BackMain => {
                self.sessions.transition(caller, AdminSessionState::Idle);
                Ok(AdminReply::Panel)
            }
            AdminAction::Stats => self.stats(caller).await.map(AdminReply::Stats),
            AdminAction::AddKeys => Ok(self.prompt(caller, AdminSessionState::AwaitingKeys)),
            AdminAction::AddChannel => Ok(self.prompt(caller, AdminSessionState::AwaitingChannel)),
            AdminAction::RemoveChannel => {
                Ok(self.prompt(caller, AdminSessionState::AwaitingChannelRemoval))
            }
            AdminAction::ListChannels => {
                let channels = self.engine.store().list_channels().await?;
                Ok(AdminReply::Channels(channels))
            }
            AdminAction::SetCooldown => {
                Ok(self.prompt(caller, AdminSessionState::AwaitingCooldown))
            }
            AdminAction::SetKeyMessage => {
                Ok(self.prompt(caller, AdminSessionState::AwaitingKeyMessage))
            }
            AdminAction::Block => Ok(self.prompt(caller, AdminSessionState::AwaitingBlock)),
            AdminAction::Unblock => Ok(self.prompt(caller, AdminSessionState::AwaitingUnblock)),
            AdminAction::AnnounceText => {
                Ok(self.prompt(caller, AdminSessionState::AwaitingAnnouncementText))
            }
            AdminAction::AnnouncePhoto => {
                Ok(self.prompt(caller, AdminSessionState::AwaitingAnnouncementPhoto))
            }
            AdminAction::DeleteAllKeys => self.request_purge(caller).await,
            AdminAction::ConfirmDeleteAllKeys => self.confirm_purge(caller).await,
            AdminAction::CancelDelete => self.cancel_purge(caller),
            AdminAction::UserHistory => {
                let sales = self.engine.store().recent_sales(HISTORY_LIMIT).await?;
                Ok(AdminReply::History(sales))
            }
            AdminAction::Waitlist => {
                let entries = self.engine.store().list_waitlist().await?;
                Ok(AdminReply::Waitlist(entries))
            }
            AdminAction::ClearWaitlist => {
                let cleared = self.engine.store().clear_waitlist().await?;
                info!(cleared, "waitlist cleared by admin");
                Ok(AdminReply::WaitlistCleared(cleared))
            }
            AdminAction::Sweep => self.engine.left_channel_sweep().await.map(AdminReply::Swept),
        }
    }

    /// Routes input to the open prompt. Invalid input is rejected without
    /// mutation and leaves the prompt open so the admin can retry.
    pub async fn handle_input(
        &self,
        caller: UserId,
        input: AdminInput,
    ) -> ServiceResult<AdminReply> {
        self.authorize(caller)?;
        let state = self.sessions.state(caller);

        let reply = match (state, input) {
            (AdminSessionState::Idle, _) | (AdminSessionState::ConfirmingPurge, _) => {
                return Ok(AdminReply::Ignored);
            }
            (AdminSessionState::AwaitingAnnouncementPhoto, AdminInput::Photo { photo, caption }) => {
                let report = self
                    .broadcast(caller, Announcement::Photo { photo, caption })
                    .await?;
                AdminReply::Broadcast(report)
            }
            (AdminSessionState::AwaitingAnnouncementPhoto, AdminInput::Text(_)) => {
                return Err(ServiceError::InvalidInput("please send a photo".into()));
            }
            (_, AdminInput::Photo { .. }) => {
                return Err(ServiceError::InvalidInput("please send text".into()));
            }
            (AdminSessionState::AwaitingKeys, AdminInput::Text(text)) => {
                AdminReply::Imported(self.import_keys(caller, &text).await?)
            }
            (AdminSessionState::AwaitingChannel, AdminInput::Text(text)) => {
                self.add_channel(caller, &text).await?
            }
            (AdminSessionState::AwaitingChannelRemoval, AdminInput::Text(text)) => {
                self.remove_channel(caller, &text).await?
            }
            (AdminSessionState::AwaitingCooldown, AdminInput::Text(text)) => {
                AdminReply::CooldownUpdated(self.set_cooldown(caller, &text).await?)
            }
            (AdminSessionState::AwaitingKeyMessage, AdminInput::Text(text)) => {
                AdminReply::KeyMessageUpdated(self.set_key_message(caller, &text).await?)
            }
            (AdminSessionState::AwaitingBlock, AdminInput::Text(text)) => {
                let (user, reason) = parse_block_request(&text)?;
                self.block_user(caller, user, &reason).await?;
                AdminReply::UserBlocked { user, reason }
            }
            (AdminSessionState::AwaitingUnblock, AdminInput::Text(text)) => {
                let user = parse_user_id(&text)?;
                if self.unblock_user(caller, user).await? {
                    AdminReply::UserUnblocked(user)
                } else {
                    AdminReply::UserNotFound(user)
                }
            }
            (AdminSessionState::AwaitingAnnouncementText, AdminInput::Text(text)) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    return Err(ServiceError::InvalidInput("announcement is empty".into()));
                }
                AdminReply::Broadcast(self.broadcast(caller, Announcement::Text(text)).await?)
            }
        };

        self.sessions.transition(caller, AdminSessionState::Idle);
        Ok(reply)
    }

    /// Imports `|`-delimited key lines. Malformed lines and duplicates are
    /// counted without aborting; any addition triggers a waitlist replay.
    pub async fn import_keys(&self, caller: UserId, text: &str) -> ServiceResult<ImportReport> {
        self.authorize(caller)?;
        let batch = parse_import_batch(text);
        if batch.is_empty() {
            return Err(ServiceError::InvalidInput("no key lines found".into()));
        }

        let created_at = self.engine.now();
        let mut report = ImportReport {
            rejected: batch.rejected,
            ..ImportReport::default()
        };
        for line in batch.lines {
            match self.engine.store().insert_key(line.into_new_key(created_at)).await? {
                KeyInsert::Inserted => report.added += 1,
                KeyInsert::Duplicate => report.duplicates += 1,
            }
        }

        counter!("keydrop_keys_imported_total", "result" => "added")
            .increment(report.added as u64);
        counter!("keydrop_keys_imported_total", "result" => "duplicate")
            .increment(report.duplicates as u64);
        counter!("keydrop_keys_imported_total", "result" => "rejected")
            .increment(report.rejected.len() as u64);
        info!(
            added = report.added,
            duplicates = report.duplicates,
            rejected = report.rejected.len(),
            "keys imported"
        );

        if report.added > 0 {
            report.replay = Some(self.engine.replay_waitlist().await?);
        }
        Ok(report)
    }

    pub async fn add_channel(&self, caller: UserId, input: &str) -> ServiceResult<AdminReply> {
        self.authorize(caller)?;
        let channel = parse_channel_input(input)?;
        if self.engine.store().add_channel(&channel).await? {
            info!(channel = %channel.handle, "verification channel added");
            Ok(AdminReply::ChannelAdded(channel))
        } else {
            Ok(AdminReply::ChannelAlreadyConfigured(channel.handle))
        }
    }

    pub async fn remove_channel(&self, caller: UserId, input: &str) -> ServiceResult<AdminReply> {
        self.authorize(caller)?;
        let handle = ChannelHandle::parse(input)?;
        if self.engine.store().remove_channel(&handle).await? {
            info!(channel = %handle, "verification channel removed");
            Ok(AdminReply::ChannelRemoved(handle))
        } else {
            Ok(AdminReply::ChannelNotFound(handle))
        }
    }

    pub async fn set_cooldown(&self, caller: UserId, input: &str) -> ServiceResult<CooldownHours> {
        self.authorize(caller)?;
        let cooldown = CooldownHours::parse(input)?;
        self.engine
            .store()
            .put_setting(COOLDOWN_HOURS_KEY, &cooldown.get().to_string())
            .await?;
        info!(hours = cooldown.get(), "cooldown updated");
        Ok(cooldown)
    }

    pub async fn set_key_message(
        &self,
        caller: UserId,
        input: &str,
    ) -> ServiceResult<KeyMessageTemplate> {
        self.authorize(caller)?;
        let template = KeyMessageTemplate::parse(input)?;
        self.engine
            .store()
            .put_setting(KEY_MESSAGE_KEY, template.as_str())
            .await?;
        info!("key message template updated");
        Ok(template)
    }

    /// Blocks `user`, creating the record if needed, and drops them from the
    /// waitlist. The reason must not be blank.
    pub async fn block_user(&self, caller: UserId, user: UserId, reason: &str) -> ServiceResult<()> {
        self.authorize(caller)?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ServiceError::InvalidInput(
                "a block reason is required".into(),
            ));
        }
        let store = self.engine.store();
        if !store.set_blocked(user, Some(reason.to_string())).await? {
            store
                .upsert_user(&UserProfile::new(user, None), self.engine.now())
                .await?;
            store.set_blocked(user, Some(reason.to_string())).await?;
        }
        store.remove_from_waitlist(user).await?;
        info!(%user, "user blocked");
        Ok(())
    }

    /// Clears the block flag and reason. The cooldown is left untouched.
    pub async fn unblock_user(&self, caller: UserId, user: UserId) -> ServiceResult<bool> {
        self.authorize(caller)?;
        let found = self.engine.store().set_blocked(user, None).await?;
        if found {
            info!(%user, "user unblocked");
        }
        Ok(found)
    }

    /// Sends `announcement` to every known user, one at a time.
    /// Per-recipient failures are counted, never retried.
    pub async fn broadcast(
        &self,
        caller: UserId,
        announcement: Announcement,
    ) -> ServiceResult<BroadcastReport> {
        self.authorize(caller)?;
        let users = self.engine.store().list_users().await?;
        let notifier = self.engine.notifier();
        let mut report = BroadcastReport::default();

        for user in &users {
            report.recipients += 1;
            let sent = match &announcement {
                Announcement::Text(text) => notifier.send_message(user.id, text, None).await,
                Announcement::Photo { photo, caption } => {
                    notifier.send_photo(user.id, photo, caption).await
                }
            };
            match sent {
                Ok(()) => {
                    report.delivered += 1;
                    counter!("keydrop_deliveries_total", "kind" => "broadcast", "result" => "ok")
                        .increment(1);
                }
                Err(err) => {
                    report.failed += 1;
                    counter!("keydrop_deliveries_total", "kind" => "broadcast", "result" => "failed")
                        .increment(1);
                    warn!(user = %user.id, ?err, "broadcast delivery failed");
                }
            }
        }

        info!(
            recipients = report.recipients,
            delivered = report.delivered,
            failed = report.failed,
            "broadcast finished"
        );
        Ok(report)
    }

    /// First phase of the key purge: arms the confirmation.
    pub async fn request_purge(&self, caller: UserId) -> ServiceResult<AdminReply> {
        self.authorize(caller)?;
        let inventory = self.engine.store().inventory().await?;
        self.sessions
            .transition(caller, AdminSessionState::ConfirmingPurge);
        Ok(AdminReply::ConfirmPurge(inventory))
    }

    /// Deletes every key, used or not. Sales are kept.
    pub async fn confirm_purge(&self, caller: UserId) -> ServiceResult<AdminReply> {
        self.authorize(caller)?;
        if self.sessions.state(caller) != AdminSessionState::ConfirmingPurge {
            return Err(ServiceError::InvalidInput(
                "no key deletion is pending".into(),
            ));
        }
        self.sessions.transition(caller, AdminSessionState::Idle);
        let deleted = self.engine.store().delete_all_keys().await?;
        warn!(deleted, "all keys deleted by admin");
        Ok(AdminReply::Purged(deleted))
    }

    pub fn cancel_purge(&self, caller: UserId) -> ServiceResult<AdminReply> {
        self.authorize(caller)?;
        self.sessions.transition(caller, AdminSessionState::Idle);
        Ok(AdminReply::PurgeCancelled)
    }

    pub async fn stats(&self, caller: UserId) -> ServiceResult<StatsReport> {
        self.authorize(caller)?;
        let store = self.engine.store();
        Ok(StatsReport {
            users: store.user_stats().await?,
            keys: store.inventory().await?,
            total_claims: store.count_sales().await?,
            waitlist: store.list_waitlist().await?.len(),
            cooldown: self.engine.cooldown().await?,
            recent: store.recent_sales(STATS_RECENT_LIMIT).await?,
        })
    }
}
