//! Error taxonomy for the login engine.
//!
//! Wrong-factor failures (`UserNotFound`, `BadFactor`) share one generic
//! display string so callers cannot distinguish "unknown user" from "wrong
//! password" and enumerate usernames. The engine itself still matches on
//! the specific variant to decide things like whether to offer account
//! creation.

use chrono::{DateTime, Utc};

/// All failures the login engine can report.
#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    /// No account matches the supplied identifier.
    #[error("Invalid username or password")]
    UserNotFound,

    /// The account exists but the factor (password, PIN, answers) is wrong.
    #[error("Invalid username or password")]
    BadFactor,

    /// The login tree has no node for the requested application id.
    #[error("Cannot find requested appId: '{app_id}'")]
    AppIdNotFound { app_id: String },

    /// PIN login is not set up for this account on this device.
    #[error("PIN login is not enabled for this account on this device")]
    PinNotEnabled,

    /// Wrong number of recovery answers, or one or more answers mismatch.
    #[error("Incorrect recovery answers")]
    RecoveryAnswer,

    /// The account requires a one-time code that was missing or wrong.
    #[error("A one-time code is required for this login")]
    Otp {
        reset_token: Option<String>,
        reset_date: Option<DateTime<Utc>>,
    },

    /// The login is queued behind a device-approval voucher.
    /// This is a wait state, not an authentication failure.
    #[error("This device is waiting for approval from another device")]
    VoucherPending {
        voucher_id: String,
        activates: DateTime<Utc>,
    },

    /// The authority could not be reached.
    #[error("Network error: {0}")]
    Network(String),

    /// The authority replied with a protocol-level failure.
    #[error("Server error: status code {code}")]
    Server { code: i64 },

    /// A credential box is corrupt, tampered with, or keyed differently.
    /// Decryption fails closed; no partial plaintext is ever produced.
    #[error("Decryption failed")]
    Decrypt,

    /// Local stash persistence failed.
    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),
}

pub type LoginResult<T> = Result<T, LoginError>;
