use std::collections::HashSet;

use chrono::{DateTime, Duration, TimeZone, Utc};
use keydrop_domain::model::{
    Channel, ChannelHandle, ClaimAttempt, KeyClaimRequest, KeyDuration, KeyInsert, NewKey,
    UserId, UserProfile, WaitlistInsert, COOLDOWN_HOURS_KEY, KEY_MESSAGE_KEY,
};
use keydrop_domain::storage::{
    ChannelStore, KeyStore, SaleStore, SettingsStore, StorageError, UserStore, WaitlistStore,
};

use crate::SeaOrmStorage;

async fn storage() -> SeaOrmStorage {
    SeaOrmStorage::connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite")
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn new_key(text: &str, created_at: DateTime<Utc>) -> NewKey {
    NewKey {
        key_text: text.to_string(),
        duration: KeyDuration::days(30),
        product_name: "Premium".into(),
        product_link: String::new(),
        created_at,
    }
}

async fn verified_user(storage: &SeaOrmStorage, id: i64) -> UserProfile {
    let profile = UserProfile::new(id, Some(format!("user{id}")));
    storage.upsert_user(&profile, t0()).await.expect("upsert");
    storage.mark_verified(profile.id).await.expect("verify");
    profile
}

fn claim(profile: &UserProfile, now: DateTime<Utc>) -> KeyClaimRequest {
    KeyClaimRequest {
        user: profile.clone(),
        now,
        cooldown: Duration::hours(24),
    }
}

#[tokio::test]
async fn claims_follow_key_creation_order() {
    let storage = storage().await;
    storage
        .insert_key(new_key("SECOND", t0() + Duration::seconds(5)))
        .await
        .unwrap();
    storage.insert_key(new_key("FIRST", t0())).await.unwrap();

    let alice = verified_user(&storage, 1).await;
    let bob = verified_user(&storage, 2).await;
    let carol = verified_user(&storage, 3).await;

    let ClaimAttempt::Assigned(first) = storage.claim_next_key(claim(&alice, t0())).await.unwrap()
    else {
        panic!("alice should receive a key");
    };
    assert_eq!(first.key.key_text, "FIRST");
    assert_eq!(first.sale.expires_at, t0() + Duration::days(30));

    let ClaimAttempt::Assigned(second) = storage.claim_next_key(claim(&bob, t0())).await.unwrap()
    else {
        panic!("bob should receive a key");
    };
    assert_eq!(second.key.key_text, "SECOND");

    assert_eq!(
        storage.claim_next_key(claim(&carol, t0())).await.unwrap(),
        ClaimAttempt::NoInventory
    );

    let alice = storage.find_user(alice.id).await.unwrap().unwrap();
    assert_eq!(alice.total_claims, 1);
    assert_eq!(alice.last_key_time, Some(t0()));
}

#[tokio::test]
async fn concurrent_claims_never_share_a_key() {
    let storage = storage().await;
    for index in 0..3 {
        storage
            .insert_key(new_key(&format!("K{index}"), t0() + Duration::seconds(index)))
            .await
            .unwrap();
    }
    let mut profiles = Vec::new();
    for id in 1..=5 {
        profiles.push(verified_user(&storage, id).await);
    }

    let mut handles = Vec::new();
    for profile in profiles {
        let storage = storage.clone();
        handles.push(tokio::spawn(async move {
            storage.claim_next_key(claim(&profile, t0())).await
        }));
    }

    let mut keys = HashSet::new();
    let mut empty = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            ClaimAttempt::Assigned(assigned) => {
                assert!(keys.insert(assigned.key.key_text));
            }
            ClaimAttempt::NoInventory => empty += 1,
            ClaimAttempt::Ineligible => panic!("all users are eligible"),
        }
    }
    assert_eq!(keys.len(), 3);
    assert_eq!(empty, 2);
    assert_eq!(storage.count_sales().await.unwrap(), 3);
}

#[tokio::test]
async fn ineligible_claims_leave_the_key_unused() {
    let storage = storage().await;
    storage.insert_key(new_key("ONLY", t0())).await.unwrap();

    let unverified = UserProfile::new(7, None);
    storage.upsert_user(&unverified, t0()).await.unwrap();
    assert_eq!(
        storage.claim_next_key(claim(&unverified, t0())).await.unwrap(),
        ClaimAttempt::Ineligible
    );

    let blocked = verified_user(&storage, 8).await;
    storage
        .set_blocked(blocked.id, Some("abuse".into()))
        .await
        .unwrap();
    assert_eq!(
        storage.claim_next_key(claim(&blocked, t0())).await.unwrap(),
        ClaimAttempt::Ineligible
    );

    assert_eq!(storage.inventory().await.unwrap().available, 1);
    assert_eq!(storage.count_sales().await.unwrap(), 0);
}

#[tokio::test]
async fn claim_revalidates_cooldown() {
    let storage = storage().await;
    storage.insert_key(new_key("A", t0())).await.unwrap();
    storage
        .insert_key(new_key("B", t0() + Duration::seconds(1)))
        .await
        .unwrap();
    let alice = verified_user(&storage, 1).await;

    assert!(matches!(
        storage.claim_next_key(claim(&alice, t0())).await.unwrap(),
        ClaimAttempt::Assigned(_)
    ));
    assert_eq!(
        storage
            .claim_next_key(claim(&alice, t0() + Duration::hours(23)))
            .await
            .unwrap(),
        ClaimAttempt::Ineligible
    );
    assert!(matches!(
        storage
            .claim_next_key(claim(&alice, t0() + Duration::hours(24)))
            .await
            .unwrap(),
        ClaimAttempt::Assigned(_)
    ));
}

#[tokio::test]
async fn duplicate_keys_are_reported_and_untouched() {
    let storage = storage().await;
    assert_eq!(
        storage.insert_key(new_key("DUP", t0())).await.unwrap(),
        KeyInsert::Inserted
    );
    let mut again = new_key("DUP", t0() + Duration::hours(1));
    again.product_name = "Other".into();
    assert_eq!(storage.insert_key(again).await.unwrap(), KeyInsert::Duplicate);

    let alice = verified_user(&storage, 1).await;
    let ClaimAttempt::Assigned(assigned) =
        storage.claim_next_key(claim(&alice, t0())).await.unwrap()
    else {
        panic!("key should be assigned");
    };
    assert_eq!(assigned.key.product_name, "Premium");
    assert_eq!(assigned.key.created_at, t0());
}

#[tokio::test]
async fn deleting_keys_keeps_sales() {
    let storage = storage().await;
    storage.insert_key(new_key("A", t0())).await.unwrap();
    storage
        .insert_key(new_key("B", t0() + Duration::seconds(1)))
        .await
        .unwrap();
    let alice = verified_user(&storage, 1).await;
    storage.claim_next_key(claim(&alice, t0())).await.unwrap();
    let before = storage.recent_sales(10).await.unwrap();

    assert_eq!(storage.delete_all_keys().await.unwrap(), 2);

    let inventory = storage.inventory().await.unwrap();
    assert_eq!(inventory.total, 0);
    assert_eq!(storage.recent_sales(10).await.unwrap(), before);
    assert_eq!(before[0].key_text, "A");
}

#[tokio::test]
async fn waitlist_enqueue_is_idempotent_and_ordered() {
    let storage = storage().await;
    let alice = UserProfile::new(1, Some("alice".into()));
    let bob = UserProfile::new(2, None);

    assert_eq!(
        storage.enqueue(&alice, t0()).await.unwrap(),
        WaitlistInsert::Added
    );
    assert_eq!(
        storage.enqueue(&bob, t0()).await.unwrap(),
        WaitlistInsert::Added
    );
    assert_eq!(
        storage
            .enqueue(&alice, t0() + Duration::minutes(1))
            .await
            .unwrap(),
        WaitlistInsert::AlreadyWaiting
    );

    let entries = storage.list_waitlist().await.unwrap();
    let order: Vec<_> = entries.iter().map(|entry| entry.user_id).collect();
    assert_eq!(order, vec![UserId::new(1), UserId::new(2)]);
    assert!(!entries[0].admin_notified);

    storage.mark_waitlist_notified(alice.id).await.unwrap();
    assert!(storage.list_waitlist().await.unwrap()[0].admin_notified);

    assert!(storage.remove_from_waitlist(alice.id).await.unwrap());
    assert!(!storage.remove_from_waitlist(alice.id).await.unwrap());
    assert_eq!(storage.clear_waitlist().await.unwrap(), 1);
}

#[tokio::test]
async fn settings_are_seeded_and_overridable() {
    let storage = storage().await;
    assert_eq!(
        storage.get_setting(COOLDOWN_HOURS_KEY).await.unwrap().as_deref(),
        Some("24")
    );
    assert!(storage
        .get_setting(KEY_MESSAGE_KEY)
        .await
        .unwrap()
        .is_some_and(|value| value.contains("{key}")));

    storage.put_setting(COOLDOWN_HOURS_KEY, "6").await.unwrap();
    assert_eq!(
        storage.get_setting(COOLDOWN_HOURS_KEY).await.unwrap().as_deref(),
        Some("6")
    );
    assert_eq!(storage.get_setting("missing").await.unwrap(), None);
}

#[tokio::test]
async fn channels_are_deduplicated() {
    let storage = storage().await;
    let news = Channel {
        handle: ChannelHandle::new("news"),
        link: Some("https://t.me/news".into()),
    };
    assert!(storage.add_channel(&news).await.unwrap());
    assert!(!storage.add_channel(&news).await.unwrap());
    assert_eq!(storage.list_channels().await.unwrap(), vec![news.clone()]);

    assert!(storage.remove_channel(&news.handle).await.unwrap());
    assert!(!storage.remove_channel(&news.handle).await.unwrap());
    assert!(storage.list_channels().await.unwrap().is_empty());
}

#[tokio::test]
async fn overflowing_expiry_fails_without_consuming_the_key() {
    let storage = storage().await;
    let mut huge = new_key("HUGE", t0());
    huge.duration = KeyDuration::days(100_000_000);
    storage.insert_key(huge).await.unwrap();
    let alice = verified_user(&storage, 1).await;

    assert!(matches!(
        storage.claim_next_key(claim(&alice, t0())).await,
        Err(StorageError::Corrupted(_))
    ));
    assert_eq!(storage.inventory().await.unwrap().available, 1);
    assert_eq!(storage.count_sales().await.unwrap(), 0);
    let user = storage.find_user(alice.id).await.unwrap().unwrap();
    assert_eq!(user.last_key_time, None);
}

#[tokio::test]
async fn sweep_flags_are_idempotent_and_sales_stay_active() {
    let storage = storage().await;
    let mut short = new_key("SHORT", t0());
    short.duration = KeyDuration::hours(1);
    storage.insert_key(short).await.unwrap();
    storage
        .insert_key(new_key("LONG", t0() + Duration::seconds(1)))
        .await
        .unwrap();
    let alice = verified_user(&storage, 1).await;
    let bob = verified_user(&storage, 2).await;
    storage.claim_next_key(claim(&alice, t0())).await.unwrap();
    storage.claim_next_key(claim(&bob, t0())).await.unwrap();

    assert_eq!(storage.flag_left_channel(bob.id).await.unwrap(), 1);
    assert_eq!(storage.flag_left_channel(bob.id).await.unwrap(), 0);

    // Expiry never clears the active flag, so an expired sale is still flaggable.
    let active = storage.active_sales().await.unwrap();
    assert_eq!(active.len(), 2);
    assert!(active[0].expires_at < t0() + Duration::hours(2));
    assert_eq!(storage.flag_left_channel(alice.id).await.unwrap(), 1);
}

#[tokio::test]
async fn upsert_keeps_known_handle() {
    let storage = storage().await;
    let first_seen = t0();
    storage
        .upsert_user(&UserProfile::new(5, Some("eve".into())), first_seen)
        .await
        .unwrap();
    let record = storage
        .upsert_user(&UserProfile::new(5, None), first_seen + Duration::days(1))
        .await
        .unwrap();
    assert_eq!(record.handle.as_deref(), Some("eve"));
    assert_eq!(record.first_seen, first_seen);
    assert!(!record.verified);

    let stats = storage.user_stats().await.unwrap();
    assert_eq!((stats.total, stats.verified, stats.blocked), (1, 0, 0));
    assert!(!storage.set_blocked(UserId::new(99), Some("x".into())).await.unwrap());
}
