//! Persisted login stashes: the ciphertext tree and its on-disk store.

pub mod store;
pub mod types;

pub use store::{StashStore, UserInfo};
pub use types::{LoginStash, Voucher, VoucherStatus};
