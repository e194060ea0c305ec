//! Turns engine and admin outcomes into chat text and inline keyboards.

use std::fmt::Write as _;

use chrono::{DateTime, Duration, Utc};
use keydrop_domain::model::{Channel, SaleRecord, UserProfile, WaitlistEntry};
use keydrop_domain::services::{
    AdminAction, AdminReply, AdminSessionState, Button, ClaimOutcome, Eligibility, ImportReport,
    Keyboard, ServiceError, StartOutcome, VerificationOutcome,
};

pub const VERIFY_CALLBACK: &str = "verify";
pub const CLAIM_CALLBACK: &str = "start_claim";

pub const ACCESS_DENIED: &str = "❌ Access denied.";
pub const INTERNAL_ERROR: &str = "⚠️ Something went wrong. Please try again later.";

pub fn main_keyboard() -> Keyboard {
    Keyboard::new().row(vec![
        Button::callback("✅ Verify Membership", VERIFY_CALLBACK),
        Button::callback("🎁 Claim Key", CLAIM_CALLBACK),
    ])
}

fn action_button(label: &str, action: AdminAction) -> Button {
    Button::callback(label, action.as_ref())
}

pub fn admin_keyboard() -> Keyboard {
    Keyboard::new()
        .row(vec![action_button("📊 Statistics", AdminAction::Stats)])
        .row(vec![action_button("🔑 Add Keys", AdminAction::AddKeys)])
        .row(vec![
            action_button("📢 Add Channel", AdminAction::AddChannel),
            action_button("🗑 Remove Channel", AdminAction::RemoveChannel),
        ])
        .row(vec![action_button("📋 List Channels", AdminAction::ListChannels)])
        .row(vec![
            action_button("⏰ Set Cooldown", AdminAction::SetCooldown),
            action_button("💬 Set Key Message", AdminAction::SetKeyMessage),
        ])
        .row(vec![
            action_button("🚫 Block User", AdminAction::Block),
            action_button("♻️ Unblock User", AdminAction::Unblock),
        ])
        .row(vec![
            action_button("📣 Announce Text", AdminAction::AnnounceText),
            action_button("🖼 Announce Photo", AdminAction::AnnouncePhoto),
        ])
        .row(vec![
            action_button("⏳ Waitlist", AdminAction::Waitlist),
            action_button("🧹 Clear Waitlist", AdminAction::ClearWaitlist),
        ])
        .row(vec![action_button("🔍 Check Members", AdminAction::Sweep)])
        .row(vec![action_button("👥 User History", AdminAction::UserHistory)])
        .row(vec![action_button("❌ Delete All Keys", AdminAction::DeleteAllKeys)])
}

pub fn back_keyboard() -> Keyboard {
    Keyboard::new().row(vec![action_button("🔙 Back to Admin", AdminAction::BackMain)])
}

pub fn confirm_purge_keyboard() -> Keyboard {
    Keyboard::new().row(vec![
        action_button("✅ Confirm Delete", AdminAction::ConfirmDeleteAllKeys),
        action_button("❌ Cancel", AdminAction::CancelDelete),
    ])
}

fn channel_lines(channels: &[Channel]) -> String {
    let mut out = String::new();
    for (index, channel) in channels.iter().enumerate() {
        let _ = write!(out, "{}. {}", index + 1, channel.handle);
        if let Some(link) = &channel.link {
            let _ = write!(out, " ({link})");
        }
        out.push('\n');
    }
    out
}

/// Welcome text plus a join button for every channel that has a link.
pub fn welcome(outcome: &StartOutcome) -> (String, Keyboard) {
    if outcome.user.blocked {
        return (blocked(outcome.user.block_reason.as_deref().unwrap_or_default()), Keyboard::new());
    }

    let mut text = String::from(
        "🤖 Welcome to the Key Distribution Bot!\n\n\
         To get your key, follow these steps:\n\
         1. Join all required channels below\n\
         2. Click 'Verify Membership'\n\
         3. Claim your key!\n",
    );
    if !outcome.channels.is_empty() {
        text.push_str("\nRequired Channels:\n");
        text.push_str(&channel_lines(&outcome.channels));
    }

    let mut keyboard = Keyboard::new();
    for channel in &outcome.channels {
        if let Some(link) = &channel.link {
            keyboard = keyboard.row(vec![Button::url(format!("Join {}", channel.handle), link)]);
        }
    }
    keyboard.rows.extend(main_keyboard().rows);
    (text, keyboard)
}

fn blocked(reason: &str) -> String {
    if reason.is_empty() {
        "🚫 You have been blocked from claiming keys.".to_string()
    } else {
        format!("🚫 You have been blocked from claiming keys.\nReason: {reason}")
    }
}

pub fn verification(outcome: &VerificationOutcome) -> String {
    match outcome {
        VerificationOutcome::Verified => {
            "✅ Verification successful! You've joined all required channels.\n\n\
             You can now claim your key!"
                .to_string()
        }
        VerificationOutcome::AutoVerified => {
            "✅ No verification channels required. You're automatically verified!".to_string()
        }
        VerificationOutcome::Missing(missing) => format!(
            "❌ Please join all required channels:\n\n{}\nAfter joining, click Verify Membership again.",
            channel_lines(missing)
        ),
        VerificationOutcome::Blocked(reason) => blocked(reason),
    }
}

/// Compact remaining time, e.g. `5h 12m`; under a minute reads `<1m`.
pub fn format_remaining(remaining: Duration) -> String {
    let minutes = remaining.num_minutes();
    if minutes < 1 {
        return "<1m".to_string();
    }
    let (days, hours, minutes) = (minutes / 1440, (minutes % 1440) / 60, minutes % 60);
    match (days, hours) {
        (0, 0) => format!("{minutes}m"),
        (0, _) => format!("{hours}h {minutes}m"),
        _ => format!("{days}d {hours}h {minutes}m"),
    }
}

pub fn denial(eligibility: &Eligibility) -> String {
    match eligibility {
        Eligibility::Eligible => "✅ You can claim a key now.".to_string(),
        Eligibility::NotVerified => {
            "❌ Please verify your channel membership first.".to_string()
        }
        Eligibility::Blocked(reason) => blocked(reason),
        Eligibility::Cooling(remaining) => format!(
            "⏰ Please wait {} before claiming another key.",
            format_remaining(*remaining)
        ),
    }
}

pub fn claim(outcome: &ClaimOutcome) -> String {
    match outcome {
        ClaimOutcome::Assigned(delivery) => delivery.text.clone(),
        ClaimOutcome::Waitlisted(status) if status.newly_added => format!(
            "😔 No keys are available right now.\n\n\
             You've been added to the waitlist at position {}. \
             You'll receive a key automatically as soon as new keys arrive.",
            status.position
        ),
        ClaimOutcome::Waitlisted(status) => format!(
            "⏳ No keys are available yet. You're already on the waitlist (position {}).",
            status.position
        ),
        ClaimOutcome::Denied(eligibility) => denial(eligibility),
    }
}

pub fn service_error(err: &ServiceError) -> String {
    match err {
        ServiceError::AccessDenied => ACCESS_DENIED.to_string(),
        ServiceError::InvalidInput(reason) => format!("❌ {reason}"),
        ServiceError::Storage(_) | ServiceError::Delivery(_) => INTERNAL_ERROR.to_string(),
    }
}

pub fn prompt(state: AdminSessionState) -> &'static str {
    match state {
        AdminSessionState::Idle => "👨‍💼 Admin Panel\n\nSelect an option below:",
        AdminSessionState::AwaitingKeys => {
            "🔑 Send keys, one per line:\n\n\
             key | duration | product name | link\n\n\
             Duration is a number of days, or add h/d (e.g. 12h, 30d). \
             Product name defaults to Premium; link is optional."
        }
        AdminSessionState::AwaitingChannel => {
            "📢 Send the channel to add:\n\n@channel or @channel | https://t.me/channel"
        }
        AdminSessionState::AwaitingChannelRemoval => "🗑 Send the channel to remove (@channel).",
        AdminSessionState::AwaitingCooldown => "⏰ Send the cooldown in hours (1-720).",
        AdminSessionState::AwaitingKeyMessage => {
            "💬 Send the new key message. Placeholders: {key} (required), {duration}, {product}, {link}."
        }
        AdminSessionState::AwaitingBlock => "🚫 Send: <user id> <reason>",
        AdminSessionState::AwaitingUnblock => "♻️ Send the user id to unblock.",
        AdminSessionState::AwaitingAnnouncementText => "📣 Send the announcement text.",
        AdminSessionState::AwaitingAnnouncementPhoto => {
            "🖼 Send the announcement photo with an optional caption."
        }
        AdminSessionState::ConfirmingPurge => "Confirm or cancel the key deletion.",
    }
}

fn age(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    format!("{} ago", format_remaining(now - then))
}

fn sale_line(sale: &SaleRecord, now: DateTime<Utc>) -> String {
    let mut line = format!(
        "• {} → {} ({}) {}",
        UserProfile::new(sale.user_id, sale.handle.clone()).display_name(),
        sale.key_text,
        sale.product_name,
        age(sale.assigned_at, now)
    );
    if sale.left_channel {
        line.push_str(" ⚠️ left channel");
    }
    line
}

fn waitlist_line(position: usize, entry: &WaitlistEntry, now: DateTime<Utc>) -> String {
    format!(
        "{}. {} (since {})",
        position,
        entry.profile().display_name(),
        age(entry.enqueued_at, now)
    )
}

fn import_summary(report: &ImportReport) -> String {
    let mut text = format!("✅ Added {} keys", report.added);
    if report.duplicates > 0 {
        let _ = write!(text, "\n❌ {} duplicate keys skipped", report.duplicates);
    }
    if !report.rejected.is_empty() {
        let _ = write!(text, "\n⚠️ {} lines rejected:", report.rejected.len());
        for rejected in &report.rejected {
            let _ = write!(text, "\n  line {}: {}", rejected.line_no, rejected.error);
        }
    }
    if let Some(replay) = &report.replay {
        let _ = write!(
            text,
            "\n\n⏳ Waitlist: {} served, {} removed, {} still waiting",
            replay.served, replay.removed, replay.still_waiting
        );
        if replay.delivery_failures > 0 {
            let _ = write!(text, "\n⚠️ {} deliveries failed", replay.delivery_failures);
        }
        if replay.errors > 0 {
            let _ = write!(text, "\n⚠️ {} entries failed and were skipped", replay.errors);
        }
    }
    text
}

/// Text and keyboard for an admin reply; `None` when nothing should be sent.
pub fn admin_reply(reply: &AdminReply, now: DateTime<Utc>) -> Option<(String, Keyboard)> {
    let text = match reply {
        AdminReply::Ignored => return None,
        AdminReply::Panel => return Some((prompt(AdminSessionState::Idle).into(), admin_keyboard())),
        AdminReply::Prompt(state) => prompt(*state).to_string(),
        AdminReply::Stats(stats) => {
            let mut text = format!(
                "📊 Bot Statistics\n\n\
                 👥 Users: {} (verified {}, blocked {})\n\
                 🔑 Keys: {} total, {} used, {} available\n\
                 🎁 Claims: {}\n\
                 ⏳ Waitlist: {}\n\
                 ⏰ Cooldown: {}h",
                stats.users.total,
                stats.users.verified,
                stats.users.blocked,
                stats.keys.total,
                stats.keys.used,
                stats.keys.available,
                stats.total_claims,
                stats.waitlist,
                stats.cooldown.get()
            );
            if !stats.recent.is_empty() {
                text.push_str("\n\nRecent claims:");
                for sale in &stats.recent {
                    text.push('\n');
                    text.push_str(&sale_line(sale, now));
                }
            }
            text
        }
        AdminReply::Channels(channels) if channels.is_empty() => {
            "📋 No verification channels configured.".to_string()
        }
        AdminReply::Channels(channels) => {
            format!("📋 Verification channels:\n\n{}", channel_lines(channels))
        }
        AdminReply::ChannelAdded(channel) => {
            format!("✅ Channel {} added successfully!", channel.handle)
        }
        AdminReply::ChannelAlreadyConfigured(handle) => {
            format!("❌ Channel {handle} already exists!")
        }
        AdminReply::ChannelRemoved(handle) => {
            format!("✅ Channel {handle} removed successfully!")
        }
        AdminReply::ChannelNotFound(handle) => format!("❌ Channel {handle} is not configured."),
        AdminReply::CooldownUpdated(cooldown) => {
            format!("✅ Cooldown set to {} hours!", cooldown.get())
        }
        AdminReply::KeyMessageUpdated(_) => "✅ Key message updated successfully!".to_string(),
        AdminReply::UserBlocked { user, reason } => {
            format!("🚫 User {user} blocked. Reason: {reason}")
        }
        AdminReply::UserUnblocked(user) => format!("✅ User {user} unblocked."),
        AdminReply::UserNotFound(user) => format!("❌ User {user} not found."),
        AdminReply::Imported(report) => import_summary(report),
        AdminReply::Broadcast(report) => format!(
            "📣 Announcement sent to {} of {} users ({} failed).",
            report.delivered, report.recipients, report.failed
        ),
        AdminReply::ConfirmPurge(inventory) => {
            let text = format!(
                "❌ Delete All Keys - CONFIRMATION REQUIRED\n\n\
                 This deletes {} keys ({} unused). Claim history is kept.\n\n\
                 Are you sure?",
                inventory.total, inventory.available
            );
            return Some((text, confirm_purge_keyboard()));
        }
        AdminReply::Purged(deleted) => format!("✅ Deleted {deleted} keys."),
        AdminReply::PurgeCancelled => "❌ Deletion cancelled.".to_string(),
        AdminReply::History(sales) if sales.is_empty() => "👥 No claims yet.".to_string(),
        AdminReply::History(sales) => {
            let lines: Vec<String> = sales.iter().map(|sale| sale_line(sale, now)).collect();
            format!("👥 Recent claims:\n\n{}", lines.join("\n"))
        }
        AdminReply::Waitlist(entries) if entries.is_empty() => "⏳ The waitlist is empty.".to_string(),
        AdminReply::Waitlist(entries) => {
            let lines: Vec<String> = entries
                .iter()
                .enumerate()
                .map(|(index, entry)| waitlist_line(index + 1, entry, now))
                .collect();
            format!("⏳ Waitlist ({}):\n\n{}", entries.len(), lines.join("\n"))
        }
        AdminReply::WaitlistCleared(cleared) => {
            format!("🧹 Removed {cleared} users from the waitlist.")
        }
        AdminReply::Swept(report) => format!(
            "🔍 Membership check finished.\n\n\
             Users checked: {}\nSales flagged as left channel: {}",
            report.checked_users, report.flagged_sales
        ),
    };
    Some((text, back_keyboard()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use keydrop_domain::services::WaitlistStatus;

    #[test]
    fn remaining_time_is_compact() {
        assert_eq!(format_remaining(Duration::seconds(20)), "<1m");
        assert_eq!(format_remaining(Duration::minutes(45)), "45m");
        assert_eq!(format_remaining(Duration::minutes(5 * 60 + 12)), "5h 12m");
        assert_eq!(format_remaining(Duration::hours(50)), "2d 2h 0m");
    }

    #[test]
    fn waitlist_messages_distinguish_new_entries() {
        let added = claim(&ClaimOutcome::Waitlisted(WaitlistStatus {
            newly_added: true,
            position: 3,
        }));
        assert!(added.contains("added to the waitlist at position 3"));

        let again = claim(&ClaimOutcome::Waitlisted(WaitlistStatus {
            newly_added: false,
            position: 3,
        }));
        assert!(again.contains("already on the waitlist"));
    }

    #[test]
    fn ignored_admin_input_sends_nothing() {
        assert!(admin_reply(&AdminReply::Ignored, Utc::now()).is_none());
        let (_, keyboard) = admin_reply(&AdminReply::Panel, Utc::now()).unwrap();
        assert_eq!(keyboard, admin_keyboard());
    }

    #[test]
    fn purge_confirmation_offers_confirm_and_cancel() {
        let (text, keyboard) = admin_reply(
            &AdminReply::ConfirmPurge(Default::default()),
            Utc::now(),
        )
        .unwrap();
        assert!(text.contains("CONFIRMATION REQUIRED"));
        assert_eq!(keyboard, confirm_purge_keyboard());
    }
}
