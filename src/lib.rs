//! Login-tree credential core for a multi-device, end-to-end-encrypted
//! wallet platform.
//!
//! An account is a recursive tree of login nodes. Every node owns a
//! symmetric login key; every child's key is wrapped under its parent's
//! key in a `parentBox`, so unlocking the root unlocks any path, while a
//! factor that attaches deeper (PIN, edge login) unlocks only its own
//! subtree. The ciphertext tree, the *stash*, is cached on disk and
//! reconciled against the remote authority after every authenticated
//! round-trip; the authority always wins, except for fields the server
//! never owns.
//!
//! ```no_run
//! use loginstash::{AccountOptions, LoginContext, LoginContextConfig};
//!
//! # async fn demo() -> Result<(), loginstash::LoginError> {
//! let ctx = LoginContext::new(LoginContextConfig {
//!     authority_url: "https://auth.example.com".into(),
//!     api_key: "api-key".into(),
//!     app_id: "co.example.wallet".into(),
//!     device_description: Some("Pixel 9".into()),
//!     stash_dir: "/var/lib/wallet/logins".into(),
//! })?;
//!
//! let login = loginstash::create_account(
//!     &ctx,
//!     AccountOptions {
//!         username: Some("alice".into()),
//!         password: Some("p@ss1234".into()),
//!         pin: Some("1234".into()),
//!     },
//! )
//! .await?;
//! let _key = login.login_key();
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod crypto;
pub mod error;
pub mod fake;
pub mod login;
pub mod stash;

pub use context::{LoginContext, LoginContextConfig, LoginEvent};
pub use error::{LoginError, LoginResult};
pub use login::{
    apply_login_payload, change_password, change_pin, change_recovery, change_voucher_status,
    check_password, check_pin, create_account, login, login_with_key, login_with_password,
    login_with_pin, login_with_recovery2, make_login_tree, request_edge_login, search_tree,
    sync_login, username_available, AccountOptions, AuthFactor, ChangePinOptions,
    EdgeLoginOptions, EdgeLoginOutcome, LoginPayload, LoginTree, PendingEdgeLogin, SecretKey,
};
pub use stash::{LoginStash, StashStore, UserInfo, Voucher, VoucherStatus};
