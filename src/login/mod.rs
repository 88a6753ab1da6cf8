//! The login engine: tree codec, auth factors, vouchers, pairing, sync.
//!
//! Each factor module exposes the same capability set: an online proof,
//! a local key derivation, and (where the factor is settable) a
//! setup/change operation that re-wraps the existing login key, commits
//! to the authority, and only then mutates the local stash.

pub mod authority;
pub mod create;
pub mod edge;
pub mod factor;
pub mod keylogin;
pub mod otp;
pub mod password;
pub mod payload;
pub mod pin2;
pub mod recovery2;
pub mod tree;
pub mod vouchers;

pub use authority::{auth_json, login_fetch, AuthorityClient, LoginAuthority};
pub use create::{create_account, username_available, AccountOptions};
pub use edge::{request_edge_login, EdgeLoginOptions, EdgeLoginOutcome, PendingEdgeLogin};
pub use factor::{login, AuthFactor};
pub use keylogin::login_with_key;
pub use otp::{disable_otp, enable_otp, repair_otp};
pub use password::{change_password, check_password, delete_password, login_with_password};
pub use payload::{apply_login_payload, payload_from_stash, sync_login, LoginPayload};
pub use pin2::{
    change_pin, check_pin, delete_pin, get_pin, login_with_pin, pin_login_enabled,
    ChangePinOptions,
};
pub use recovery2::{
    change_recovery, delete_recovery, fetch_recovery2_questions, login_with_recovery2,
};
pub use tree::{make_login_tree, search_tree, LoginNode, LoginTree, SecretKey};
pub use vouchers::change_voucher_status;
