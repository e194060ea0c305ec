//! Key allocation state machine: eligibility, atomic claim, waitlist
//! fallback, waitlist replay on replenishment and the left-channel sweep.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use strum_macros::AsRefStr;
use tracing::{debug, info, warn};

use crate::model::{
    key_fingerprint, AssignedKey, Channel, ClaimAttempt, CooldownHours, KeyClaimRequest,
    KeyDuration, KeyMessageTemplate, UserId, UserProfile, UserRecord, WaitlistEntry,
    WaitlistInsert, COOLDOWN_HOURS_KEY, KEY_MESSAGE_KEY,
};
use crate::storage::Store;

use super::{Clock, MembershipVerifier, Notifier, ServiceResult, SystemClock};

#[derive(Debug, Clone, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Eligibility {
    Eligible,
    NotVerified,
    Blocked(String),
    /// Time left until the next claim is allowed.
    Cooling(Duration),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }
}

/// Pure eligibility rule. Blocking wins over everything, then verification,
/// then the cooldown window.
pub fn evaluate_eligibility(
    user: &UserRecord,
    cooldown: CooldownHours,
    now: DateTime<Utc>,
) -> Eligibility {
    if user.blocked {
        return Eligibility::Blocked(user.block_reason.clone().unwrap_or_default());
    }
    if !user.verified {
        return Eligibility::NotVerified;
    }
    if let Some(last) = user.last_key_time {
        let next_claim = last + cooldown.as_duration();
        if now < next_claim {
            return Eligibility::Cooling(next_claim - now);
        }
    }
    Eligibility::Eligible
}

/// Everything the transport needs to hand a key to its new owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDelivery {
    pub text: String,
    pub key_text: String,
    pub duration: KeyDuration,
    pub product_name: String,
    pub product_link: String,
    pub expires_at: DateTime<Utc>,
}

impl KeyDelivery {
    pub fn new(template: &KeyMessageTemplate, assigned: &AssignedKey) -> Self {
        let expires_at = assigned.sale.expires_at;
        let text = format!(
            "{}\n\n⏰ Expires: {} UTC",
            template.render(assigned),
            expires_at.format("%Y-%m-%d %H:%M")
        );
        Self {
            text,
            key_text: assigned.key.key_text.clone(),
            duration: assigned.key.duration,
            product_name: assigned.key.product_name.clone(),
            product_link: assigned.key.product_link.clone(),
            expires_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub user: UserRecord,
    pub channels: Vec<Channel>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified,
    /// No channels are configured, so verification is granted outright.
    AutoVerified,
    Missing(Vec<Channel>),
    Blocked(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitlistStatus {
    pub newly_added: bool,
    /// 1-based position in the queue.
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Assigned(KeyDelivery),
    Waitlisted(WaitlistStatus),
    Denied(Eligibility),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub served: usize,
    pub removed: usize,
    pub skipped_cooling: usize,
    pub delivery_failures: usize,
    pub errors: usize,
    pub exhausted: bool,
    pub still_waiting: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked_users: usize,
    pub flagged_sales: u64,
}

enum ReplayStep {
    Served { delivered: bool, exhausted: bool },
    Removed,
    Skipped,
    Exhausted,
}

#[derive(Clone)]
pub struct AllocationEngine<S> {
    store: S,
    membership: MembershipVerifier,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    admin: UserId,
}

impl<S> AllocationEngine<S>
where
    S: Store,
{
    pub fn new(
        store: S,
        membership: MembershipVerifier,
        notifier: Arc<dyn Notifier>,
        admin: UserId,
    ) -> Self {
        Self::with_clock(store, membership, notifier, admin, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: S,
        membership: MembershipVerifier,
        notifier: Arc<dyn Notifier>,
        admin: UserId,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            membership,
            notifier,
            clock,
            admin,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    pub fn admin_id(&self) -> UserId {
        self.admin
    }

    pub fn is_admin(&self, user: UserId) -> bool {
        user == self.admin
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Live cooldown setting; re-read on every check.
    pub async fn cooldown(&self) -> ServiceResult<CooldownHours> {
        let stored = self.store.get_setting(COOLDOWN_HOURS_KEY).await?;
        Ok(CooldownHours::from_stored(stored.as_deref()))
    }

    pub async fn key_message_template(&self) -> ServiceResult<KeyMessageTemplate> {
        let stored = self.store.get_setting(KEY_MESSAGE_KEY).await?;
        Ok(KeyMessageTemplate::from_stored(stored.as_deref()))
    }

    /// Evaluates `user`, granting verification first when no channels are
    /// configured.
    pub async fn eligibility(&self, user: &UserRecord) -> ServiceResult<Eligibility> {
        let mut record = user.clone();
        if !record.blocked && !record.verified && self.store.list_channels().await?.is_empty() {
            self.store.mark_verified(record.id).await?;
            record.verified = true;
        }
        let cooldown = self.cooldown().await?;
        Ok(evaluate_eligibility(&record, cooldown, self.now()))
    }

    pub async fn check_eligibility(&self, user: UserId) -> ServiceResult<Eligibility> {
        match self.store.find_user(user).await? {
            Some(record) => self.eligibility(&record).await,
            None => Ok(Eligibility::NotVerified),
        }
    }

    pub async fn start(&self, profile: &UserProfile) -> ServiceResult<StartOutcome> {
        let user = self.store.upsert_user(profile, self.now()).await?;
        let channels = self.store.list_channels().await?;
        Ok(StartOutcome { user, channels })
    }

    pub async fn request_verification(
        &self,
        profile: &UserProfile,
    ) -> ServiceResult<VerificationOutcome> {
        let user = self.store.upsert_user(profile, self.now()).await?;
        if user.blocked {
            return Ok(VerificationOutcome::Blocked(
                user.block_reason.unwrap_or_default(),
            ));
        }

        let channels = self.store.list_channels().await?;
        if channels.is_empty() {
            self.store.mark_verified(user.id).await?;
            return Ok(VerificationOutcome::AutoVerified);
        }

        let missing = self.membership.missing_channels(user.id, &channels).await;
        if missing.is_empty() {
            self.store.mark_verified(user.id).await?;
            info!(user = %user.id, "membership verified");
            Ok(VerificationOutcome::Verified)
        } else {
            debug!(user = %user.id, missing = missing.len(), "membership incomplete");
            Ok(VerificationOutcome::Missing(missing))
        }
    }

    pub async fn request_claim(&self, profile: &UserProfile) -> ServiceResult<ClaimOutcome> {
        let user = self.store.upsert_user(profile, self.now()).await?;
        let eligibility = self.eligibility(&user).await?;
        if !eligibility.is_eligible() {
            counter!("keydrop_claims_total", "result" => eligibility.as_ref().to_owned())
                .increment(1);
            return Ok(ClaimOutcome::Denied(eligibility));
        }

        // Nothing after a successful claim may fail.
        let template = self.key_message_template().await?;
        match self.claim(profile).await? {
            ClaimAttempt::Assigned(assigned) => {
                counter!("keydrop_claims_total", "result" => "assigned").increment(1);
                self.leave_waitlist(profile.id).await;
                Ok(ClaimOutcome::Assigned(KeyDelivery::new(&template, &assigned)))
            }
            ClaimAttempt::NoInventory => {
                counter!("keydrop_claims_total", "result" => "no_inventory").increment(1);
                let status = self.enqueue(profile).await?;
                if status.newly_added {
                    self.replay_if_restocked().await;
                }
                Ok(ClaimOutcome::Waitlisted(status))
            }
            ClaimAttempt::Ineligible => {
                counter!("keydrop_claims_total", "result" => "lost_race").increment(1);
                let denial = match self.check_eligibility(profile.id).await? {
                    Eligibility::Eligible => Eligibility::Cooling(Duration::zero()),
                    other => other,
                };
                Ok(ClaimOutcome::Denied(denial))
            }
        }
    }

    /// Idempotent waitlist insert. The admin is told about a user once per
    /// enqueue, never for repeated requests while already waiting.
    pub async fn enqueue(&self, profile: &UserProfile) -> ServiceResult<WaitlistStatus> {
        let inserted = self.store.enqueue(profile, self.now()).await?;
        let entries = self.store.list_waitlist().await?;
        let position = entries
            .iter()
            .position(|entry| entry.user_id == profile.id)
            .map_or(entries.len(), |index| index + 1);

        let newly_added = inserted == WaitlistInsert::Added;
        if newly_added {
            counter!("keydrop_waitlist_total", "result" => "added").increment(1);
            info!(user = %profile.id, position, "user added to waitlist");
            self.notify_admin_of_waiter(profile, position).await?;
        } else {
            counter!("keydrop_waitlist_total", "result" => "already_waiting").increment(1);
        }

        Ok(WaitlistStatus {
            newly_added,
            position,
        })
    }

    /// Covers an import whose replay ran between a claim finding no key and
    /// the enqueue landing.
    async fn replay_if_restocked(&self) {
        match self.store.inventory().await {
            Ok(inventory) if inventory.available > 0 => {
                debug!(available = inventory.available, "keys arrived while enqueuing; replaying");
                if let Err(err) = self.replay_waitlist().await {
                    warn!(?err, "waitlist replay after enqueue failed");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(?err, "inventory check after enqueue failed"),
        }
    }

    /// Best-effort removal once the user holds a key. A leftover entry is
    /// skipped as cooling by later replays.
    async fn leave_waitlist(&self, user: UserId) {
        if let Err(err) = self.store.remove_from_waitlist(user).await {
            warn!(%user, ?err, "failed to remove served user from waitlist");
        }
    }

    async fn notify_admin_of_waiter(
        &self,
        profile: &UserProfile,
        position: usize,
    ) -> ServiceResult<()> {
        let text = format!(
            "⏳ {} ({}) joined the waitlist at position {position}. No keys are left.",
            profile.display_name(),
            profile.id
        );
        match self.notifier.send_message(self.admin, &text, None).await {
            Ok(()) => {
                self.store.mark_waitlist_notified(profile.id).await?;
            }
            Err(err) => {
                counter!("keydrop_deliveries_total", "kind" => "admin", "result" => "failed")
                    .increment(1);
                warn!(?err, "failed to notify admin about new waiter");
            }
        }
        Ok(())
    }

    /// Serves waiting users in enqueue order after a replenishment. Cooling
    /// entries are skipped without blocking later ones; the scan stops as soon
    /// as inventory runs out. A fault on one entry only skips that entry.
    pub async fn replay_waitlist(&self) -> ServiceResult<ReplayReport> {
        let entries = self.store.list_waitlist().await?;
        let mut report = ReplayReport::default();

        for entry in &entries {
            match self.replay_entry(entry).await {
                Ok(ReplayStep::Served {
                    delivered,
                    exhausted,
                }) => {
                    report.served += 1;
                    if !delivered {
                        report.delivery_failures += 1;
                    }
                    if exhausted {
                        report.exhausted = true;
                        break;
                    }
                }
                Ok(ReplayStep::Removed) => report.removed += 1,
                Ok(ReplayStep::Skipped) => report.skipped_cooling += 1,
                Ok(ReplayStep::Exhausted) => {
                    report.exhausted = true;
                    break;
                }
                Err(err) => {
                    report.errors += 1;
                    counter!("keydrop_replay_total", "result" => "error").increment(1);
                    warn!(user = %entry.user_id, ?err, "waitlist replay entry failed; skipping");
                }
            }
        }

        report.still_waiting = self.store.list_waitlist().await?.len();
        info!(
            served = report.served,
            removed = report.removed,
            still_waiting = report.still_waiting,
            "waitlist replay finished"
        );
        Ok(report)
    }

    async fn replay_entry(&self, entry: &WaitlistEntry) -> ServiceResult<ReplayStep> {
        let Some(user) = self.store.find_user(entry.user_id).await? else {
            self.store.remove_from_waitlist(entry.user_id).await?;
            return Ok(ReplayStep::Removed);
        };

        match self.eligibility(&user).await? {
            Eligibility::Blocked(_) | Eligibility::NotVerified => {
                self.store.remove_from_waitlist(entry.user_id).await?;
                counter!("keydrop_replay_total", "result" => "removed").increment(1);
                Ok(ReplayStep::Removed)
            }
            Eligibility::Cooling(_) => {
                counter!("keydrop_replay_total", "result" => "cooling").increment(1);
                Ok(ReplayStep::Skipped)
            }
            Eligibility::Eligible => {
                let template = self.key_message_template().await?;
                match self.claim(&entry.profile()).await? {
                    ClaimAttempt::Assigned(assigned) => {
                        Ok(self.deliver_replayed(entry, &template, &assigned).await)
                    }
                    ClaimAttempt::NoInventory => Ok(ReplayStep::Exhausted),
                    ClaimAttempt::Ineligible => Ok(ReplayStep::Skipped),
                }
            }
        }
    }

    /// Runs after the claim committed, so nothing here may fail the entry.
    async fn deliver_replayed(
        &self,
        entry: &WaitlistEntry,
        template: &KeyMessageTemplate,
        assigned: &AssignedKey,
    ) -> ReplayStep {
        let delivery = KeyDelivery::new(template, assigned);
        let text = format!("🔔 A key is now available for you!\n\n{}", delivery.text);
        let delivered = match self.notifier.send_message(entry.user_id, &text, None).await {
            Ok(()) => {
                counter!("keydrop_deliveries_total", "kind" => "replay", "result" => "ok")
                    .increment(1);
                true
            }
            Err(err) => {
                counter!("keydrop_deliveries_total", "kind" => "replay", "result" => "failed")
                    .increment(1);
                warn!(user = %entry.user_id, ?err, "failed to deliver replayed key");
                false
            }
        };
        counter!("keydrop_replay_total", "result" => "served").increment(1);
        self.leave_waitlist(entry.user_id).await;

        let exhausted = match self.store.inventory().await {
            Ok(inventory) => inventory.available == 0,
            Err(err) => {
                warn!(?err, "inventory check during replay failed");
                false
            }
        };
        ReplayStep::Served {
            delivered,
            exhausted,
        }
    }

    /// Flags active sales whose owner no longer belongs to every configured
    /// channel. Keys and sales are never revoked.
    pub async fn left_channel_sweep(&self) -> ServiceResult<SweepReport> {
        let channels = self.store.list_channels().await?;
        let users: BTreeSet<UserId> = self
            .store
            .active_sales()
            .await?
            .into_iter()
            .filter(|sale| !sale.left_channel)
            .map(|sale| sale.user_id)
            .collect();

        let mut report = SweepReport {
            checked_users: users.len(),
            flagged_sales: 0,
        };
        for user in users {
            if !self.membership.verify_all(user, &channels).await {
                report.flagged_sales += self.store.flag_left_channel(user).await?;
            }
        }

        counter!("keydrop_sweep_flagged_total").increment(report.flagged_sales);
        info!(
            checked = report.checked_users,
            flagged = report.flagged_sales,
            "left-channel sweep finished"
        );
        Ok(report)
    }

    async fn claim(&self, profile: &UserProfile) -> ServiceResult<ClaimAttempt> {
        let cooldown = self.cooldown().await?;
        let attempt = self
            .store
            .claim_next_key(KeyClaimRequest {
                user: profile.clone(),
                now: self.now(),
                cooldown: cooldown.as_duration(),
            })
            .await?;
        if let ClaimAttempt::Assigned(assigned) = &attempt {
            info!(
                user = %profile.id,
                key = %key_fingerprint(&assigned.key.key_text),
                sale = assigned.sale.id,
                "key assigned"
            );
        }
        Ok(attempt)
    }
}
