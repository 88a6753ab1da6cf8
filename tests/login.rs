//! End-to-end login flows against the in-process fake authority.
//!
//! Each `LoginContext` here plays one device: its own stash directory,
//! its own client id, all sharing one fake authority.

use std::sync::Arc;
use std::time::Duration;

use loginstash::fake::FakeAuthority;
use loginstash::login::{
    change_recovery, delete_password, delete_pin, disable_otp, enable_otp,
    fetch_recovery2_questions, payload_from_stash,
};
use loginstash::{
    change_password, change_pin, change_voucher_status, check_password, check_pin,
    create_account, login_with_key, login_with_password, login_with_pin, login_with_recovery2,
    request_edge_login, sync_login, username_available, AccountOptions, ChangePinOptions,
    EdgeLoginOptions, EdgeLoginOutcome, LoginContext, LoginContextConfig, LoginError, LoginStash,
};
use tempfile::TempDir;

const APP_ID: &str = "co.example.wallet";

struct Device {
    ctx: LoginContext,
    _dir: TempDir,
}

fn device(fake: &Arc<FakeAuthority>) -> Device {
    let dir = TempDir::new().unwrap();
    let ctx = LoginContext::with_authority(
        LoginContextConfig {
            authority_url: "http://fake".into(),
            api_key: "test".into(),
            app_id: APP_ID.into(),
            device_description: Some("test device".into()),
            stash_dir: dir.path().to_path_buf(),
        },
        fake.clone(),
    )
    .unwrap();
    Device { ctx, _dir: dir }
}

fn alice_options() -> AccountOptions {
    AccountOptions {
        username: Some("alice".into()),
        password: Some("p@ss1234".into()),
        pin: Some("1234".into()),
    }
}

fn load_stash(ctx: &LoginContext, username: &str) -> LoginStash {
    ctx.store().load_by_username(username).unwrap().unwrap()
}

#[tokio::test]
async fn all_factors_resolve_the_same_login_key() {
    let fake = FakeAuthority::new();
    let local = device(&fake);

    let created = create_account(&local.ctx, alice_options()).await.unwrap();
    let key = created.login_key().clone();

    let by_password = login_with_password(&local.ctx, "alice", "p@ss1234", None)
        .await
        .unwrap();
    assert_eq!(by_password.login_key(), &key);

    let by_pin = login_with_pin(&local.ctx, "alice", "1234").await.unwrap();
    assert_eq!(by_pin.login_key(), &key);

    let by_key = login_with_key(&local.ctx, "alice", &key).await.unwrap();
    assert_eq!(by_key.login_key(), &key);

    // A second device sees the same key through the password alone.
    let remote = device(&fake);
    let from_remote = login_with_password(&remote.ctx, "alice", "p@ss1234", None)
        .await
        .unwrap();
    assert_eq!(from_remote.login_key(), &key);
}

#[tokio::test]
async fn password_login_works_offline_but_pin_does_not() {
    let fake = FakeAuthority::new();
    let local = device(&fake);
    create_account(&local.ctx, alice_options()).await.unwrap();

    fake.set_offline(true);

    let login = login_with_password(&local.ctx, "alice", "p@ss1234", None)
        .await
        .unwrap();
    assert_eq!(login.active().app_id, APP_ID);

    // Wrong password must still fail offline.
    let err = login_with_password(&local.ctx, "alice", "wrong one", None)
        .await
        .unwrap_err();
    assert!(matches!(err, LoginError::BadFactor));

    // PIN login needs the authority.
    let err = login_with_pin(&local.ctx, "alice", "1234").await.unwrap_err();
    assert!(matches!(err, LoginError::Network(_)));
}

#[tokio::test]
async fn password_change_propagates_to_other_devices() {
    let fake = FakeAuthority::new();
    let local = device(&fake);
    let login = create_account(&local.ctx, alice_options()).await.unwrap();
    let stash = load_stash(&local.ctx, "alice");

    let long_password = "0123456789".repeat(10);
    change_password(&local.ctx, &stash, &login, &long_password)
        .await
        .unwrap();

    let remote = device(&fake);
    login_with_password(&remote.ctx, "alice", &long_password, None)
        .await
        .unwrap();

    let err = login_with_password(&remote.ctx, "alice", "p@ss1234", None)
        .await
        .unwrap_err();
    assert!(matches!(err, LoginError::BadFactor));
    // Wrong-password and unknown-user failures read identically.
    assert_eq!(err.to_string(), LoginError::UserNotFound.to_string());
}

#[tokio::test]
async fn check_password_verifies_locally() {
    let fake = FakeAuthority::new();
    let local = device(&fake);
    create_account(&local.ctx, alice_options()).await.unwrap();
    let stash = load_stash(&local.ctx, "alice");

    assert!(check_password(&stash, "p@ss1234").unwrap());
    assert!(!check_password(&stash, "wrong one").unwrap());
}

#[tokio::test]
async fn deleted_password_no_longer_logs_in() {
    let fake = FakeAuthority::new();
    let local = device(&fake);
    let login = create_account(&local.ctx, alice_options()).await.unwrap();
    let stash = load_stash(&local.ctx, "alice");

    delete_password(&local.ctx, &stash, &login).await.unwrap();

    let err = login_with_password(&local.ctx, "alice", "p@ss1234", None)
        .await
        .unwrap_err();
    assert!(matches!(err, LoginError::BadFactor));
}

#[tokio::test]
async fn pin_enable_disable_cycle() {
    let fake = FakeAuthority::new();
    let local = device(&fake);
    let login = create_account(&local.ctx, alice_options()).await.unwrap();
    let stash = load_stash(&local.ctx, "alice");

    // Change the PIN but leave login disabled: login fails, checking works.
    let stash = change_pin(
        &local.ctx,
        &stash,
        &login,
        ChangePinOptions {
            pin: Some("4321".into()),
            enable_login: false,
        },
    )
    .await
    .unwrap();

    let err = login_with_pin(&local.ctx, "alice", "4321").await.unwrap_err();
    assert!(matches!(err, LoginError::PinNotEnabled));
    assert!(check_pin(&stash, &login, "4321").unwrap());
    assert!(!check_pin(&stash, &login, "1234").unwrap());

    // Re-enable with the stored PIN text.
    let stash = change_pin(
        &local.ctx,
        &stash,
        &login,
        ChangePinOptions {
            pin: None,
            enable_login: true,
        },
    )
    .await
    .unwrap();
    login_with_pin(&local.ctx, "alice", "4321").await.unwrap();

    // Deleting removes even the stored text.
    let stash = delete_pin(&local.ctx, &stash, &login).await.unwrap();
    assert!(matches!(
        check_pin(&stash, &login, "4321").unwrap_err(),
        LoginError::PinNotEnabled
    ));
}

#[tokio::test]
async fn pin_login_without_enrollment_is_pin_not_enabled() {
    let fake = FakeAuthority::new();
    let local = device(&fake);
    create_account(
        &local.ctx,
        AccountOptions {
            username: Some("bob".into()),
            password: Some("hunter22".into()),
            pin: None,
        },
    )
    .await
    .unwrap();

    // No PIN node for this app: the error names the missing enrollment,
    // never a bad factor.
    let err = login_with_pin(&local.ctx, "bob", "1234").await.unwrap_err();
    assert!(matches!(err, LoginError::PinNotEnabled));
}

#[tokio::test]
async fn recovery_answers_must_match_in_order() {
    let fake = FakeAuthority::new();
    let local = device(&fake);
    let login = create_account(&local.ctx, alice_options()).await.unwrap();
    let stash = load_stash(&local.ctx, "alice");
    let key = login.login_key().clone();

    let questions: Vec<String> = vec!["first pet?".into(), "first street?".into()];
    let answers: Vec<String> = vec!["rex".into(), "elm".into()];
    let recovery2_key = change_recovery(&local.ctx, &stash, &login, &questions, &answers)
        .await
        .unwrap();

    let remote = device(&fake);
    let fetched = fetch_recovery2_questions(&remote.ctx, &recovery2_key, "alice")
        .await
        .unwrap();
    assert_eq!(fetched, questions);

    // Right answers, wrong order: fails closed.
    let reversed: Vec<String> = vec!["elm".into(), "rex".into()];
    let err = login_with_recovery2(&remote.ctx, &recovery2_key, "alice", &reversed)
        .await
        .unwrap_err();
    assert!(matches!(err, LoginError::RecoveryAnswer));

    // Wrong count: also fails closed.
    let short: Vec<String> = vec!["rex".into()];
    let err = login_with_recovery2(&remote.ctx, &recovery2_key, "alice", &short)
        .await
        .unwrap_err();
    assert!(matches!(err, LoginError::RecoveryAnswer));

    // Exact ordered answers: same login key as the password path.
    let recovered = login_with_recovery2(&remote.ctx, &recovery2_key, "alice", &answers)
        .await
        .unwrap();
    assert_eq!(recovered.login_key(), &key);
}

#[tokio::test]
async fn sync_login_is_idempotent() {
    let fake = FakeAuthority::new();
    let local = device(&fake);
    let login = create_account(&local.ctx, alice_options()).await.unwrap();
    let stash = load_stash(&local.ctx, "alice");

    let once = sync_login(&local.ctx, &stash, &login).await.unwrap();
    let twice = sync_login(&local.ctx, &once, &login).await.unwrap();
    assert_eq!(once, twice);
}

#[tokio::test]
async fn unknown_device_key_login_queues_a_voucher() {
    let fake = FakeAuthority::new();
    let local = device(&fake);
    let login = create_account(&local.ctx, alice_options()).await.unwrap();
    let key = login.login_key().clone();

    // Migrate the stash bytes to a second device; its client id differs.
    let migrated = device(&fake);
    migrated.ctx.store().save(&load_stash(&local.ctx, "alice")).unwrap();
    let mut events = migrated.ctx.take_events().unwrap();

    // Offline unlock works; the detached sync reports the wait state on
    // the event channel instead of failing the login.
    let remote_login = login_with_key(&migrated.ctx, "alice", &key).await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("background sync should report")
        .expect("event channel open");
    let loginstash::LoginEvent::SyncFailed { error, .. } = event;
    assert!(matches!(error, LoginError::VoucherPending { .. }));

    let remote_stash = load_stash(&migrated.ctx, "alice");
    let err = sync_login(&migrated.ctx, &remote_stash, &remote_login)
        .await
        .unwrap_err();
    let LoginError::VoucherPending { voucher_id, .. } = err else {
        panic!("expected a voucher wait state, got {err:?}");
    };

    // The original device sees the voucher and approves it.
    let local_stash = load_stash(&local.ctx, "alice");
    let local_stash = sync_login(&local.ctx, &local_stash, &login).await.unwrap();
    let mirrored = loginstash::search_tree(&local_stash, |node| {
        node.pending_vouchers.iter().any(|v| v.voucher_id == voucher_id)
    });
    assert!(mirrored.is_some(), "voucher not mirrored into the stash");

    change_voucher_status(&local.ctx, &local_stash, &login, &[voucher_id], &[])
        .await
        .unwrap();

    // Approved: the second device now syncs cleanly.
    sync_login(&migrated.ctx, &remote_stash, &remote_login)
        .await
        .unwrap();
}

#[tokio::test]
async fn edge_login_approval_hands_over_the_account() {
    let fake = FakeAuthority::new();
    let local = device(&fake);
    let login = create_account(&local.ctx, alice_options()).await.unwrap();
    let key = login.login_key().clone();

    let fresh = device(&fake);
    let pending = request_edge_login(
        &fresh.ctx,
        EdgeLoginOptions {
            poll_interval: Duration::from_millis(30),
            max_wait: Duration::from_secs(5),
        },
    )
    .await
    .unwrap();

    // The approving device can inspect the request before deciding.
    let request = fake.lobby_request(&pending.id).unwrap();
    assert_eq!(request["appId"], APP_ID);

    let payload = payload_from_stash(&load_stash(&local.ctx, "alice"));
    fake.approve_lobby(&pending.id, Some("alice"), payload, key.as_bytes())
        .unwrap();

    match pending.wait().await {
        EdgeLoginOutcome::Approved(tree) => {
            assert_eq!(tree.login_key(), &key);
        }
        other => panic!("expected approval, got {other:?}"),
    }

    // The received stash is cached for future offline logins.
    assert!(fresh.ctx.store().load_by_username("alice").unwrap().is_some());
    login_with_key(&fresh.ctx, "alice", &key).await.unwrap();
}

#[tokio::test]
async fn edge_login_cancel_beats_a_recorded_approval() {
    let fake = FakeAuthority::new();
    let local = device(&fake);
    let login = create_account(&local.ctx, alice_options()).await.unwrap();
    let key = login.login_key().clone();

    let fresh = device(&fake);
    let pending = request_edge_login(
        &fresh.ctx,
        EdgeLoginOptions {
            poll_interval: Duration::from_millis(200),
            max_wait: Duration::from_secs(5),
        },
    )
    .await
    .unwrap();

    // The server records the approval, but the caller cancels before the
    // next poll can observe it: the outcome must be Canceled, exactly once.
    let payload = payload_from_stash(&load_stash(&local.ctx, "alice"));
    fake.approve_lobby(&pending.id, Some("alice"), payload, key.as_bytes())
        .unwrap();
    pending.cancel();

    assert!(matches!(pending.wait().await, EdgeLoginOutcome::Canceled));
    assert!(fresh.ctx.store().load_by_username("alice").unwrap().is_none());
}

#[tokio::test]
async fn edge_login_rejection_and_timeout_are_terminal() {
    let fake = FakeAuthority::new();
    let fresh = device(&fake);

    let pending = request_edge_login(
        &fresh.ctx,
        EdgeLoginOptions {
            poll_interval: Duration::from_millis(20),
            max_wait: Duration::from_secs(5),
        },
    )
    .await
    .unwrap();
    fake.reject_lobby(&pending.id).unwrap();
    assert!(matches!(pending.wait().await, EdgeLoginOutcome::Rejected));

    let pending = request_edge_login(
        &fresh.ctx,
        EdgeLoginOptions {
            poll_interval: Duration::from_millis(20),
            max_wait: Duration::from_millis(80),
        },
    )
    .await
    .unwrap();
    assert!(matches!(pending.wait().await, EdgeLoginOutcome::TimedOut));
}

#[tokio::test]
async fn otp_gates_fresh_devices_until_they_present_a_code() {
    let fake = FakeAuthority::new();
    let local = device(&fake);
    let login = create_account(&local.ctx, alice_options()).await.unwrap();
    let stash = load_stash(&local.ctx, "alice");

    let otp_key = enable_otp(&local.ctx, &stash, &login, 7 * 86_400)
        .await
        .unwrap();

    // A fresh device without the code bounces with a reset token.
    let remote = device(&fake);
    let err = login_with_password(&remote.ctx, "alice", "p@ss1234", None)
        .await
        .unwrap_err();
    let LoginError::Otp { reset_token, .. } = err else {
        panic!("expected an OTP challenge, got {err:?}");
    };
    assert!(reset_token.is_some());

    // With the key it gets in, and caches the key for next time.
    login_with_password(&remote.ctx, "alice", "p@ss1234", Some(&otp_key))
        .await
        .unwrap();
    login_with_password(&remote.ctx, "alice", "p@ss1234", None)
        .await
        .unwrap();

    // The enrolled device still works (its stash carries the key), and
    // can turn OTP back off.
    let stash = load_stash(&local.ctx, "alice");
    let login = login_with_password(&local.ctx, "alice", "p@ss1234", None)
        .await
        .unwrap();
    disable_otp(&local.ctx, &stash, &login).await.unwrap();

    let third = device(&fake);
    login_with_password(&third.ctx, "alice", "p@ss1234", None)
        .await
        .unwrap();
}

#[tokio::test]
async fn username_availability_probe() {
    let fake = FakeAuthority::new();
    let local = device(&fake);

    assert!(username_available(&local.ctx, "alice").await.unwrap());
    create_account(&local.ctx, alice_options()).await.unwrap();
    assert!(!username_available(&local.ctx, "alice").await.unwrap());
    assert!(username_available(&local.ctx, "someone else").await.unwrap());
}

#[tokio::test]
async fn username_less_accounts_can_be_created() {
    let fake = FakeAuthority::new();
    let local = device(&fake);

    let login = create_account(
        &local.ctx,
        AccountOptions {
            username: None,
            password: None,
            pin: Some("9876".into()),
        },
    )
    .await
    .unwrap();

    let root_id = login.root().login_id.clone();
    let stash = local.ctx.store().load_by_login_id(&root_id).unwrap().unwrap();
    assert!(stash.username.is_none());

    let users = local.ctx.local_users().unwrap();
    assert_eq!(users.len(), 1);
    assert!(users[0].username.is_none());
    assert!(users[0].pin_login_enabled);
}

#[tokio::test]
async fn local_users_reflect_factor_state() {
    let fake = FakeAuthority::new();
    let local = device(&fake);
    create_account(&local.ctx, alice_options()).await.unwrap();

    let users = local.ctx.local_users().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].username.as_deref(), Some("alice"));
    assert!(users[0].pin_login_enabled);
    assert!(users[0].key_login_enabled);
    assert!(users[0].last_login.is_some());
}

#[tokio::test]
async fn factor_dispatch_covers_the_closed_set() {
    use loginstash::AuthFactor;

    let fake = FakeAuthority::new();
    let local = device(&fake);
    let created = create_account(&local.ctx, alice_options()).await.unwrap();
    let key = created.login_key().clone();

    let by_password = loginstash::login(
        &local.ctx,
        AuthFactor::Password {
            username: "alice",
            password: "p@ss1234",
            otp_key: None,
        },
    )
    .await
    .unwrap();
    assert_eq!(by_password.login_key(), &key);

    let by_pin = loginstash::login(
        &local.ctx,
        AuthFactor::Pin {
            username: "alice",
            pin: "1234",
        },
    )
    .await
    .unwrap();
    assert_eq!(by_pin.login_key(), &key);

    let by_key = loginstash::login(
        &local.ctx,
        AuthFactor::RawKey {
            username: "alice",
            login_key: &key,
        },
    )
    .await
    .unwrap();
    assert_eq!(by_key.login_key(), &key);
}

#[tokio::test]
async fn duplicate_usernames_are_refused() {
    let fake = FakeAuthority::new();
    let local = device(&fake);
    create_account(&local.ctx, alice_options()).await.unwrap();

    let remote = device(&fake);
    let err = create_account(&remote.ctx, alice_options()).await.unwrap_err();
    assert!(matches!(err, LoginError::Server { code: 2 }));
}
