//! The closed set of authentication factors.
//!
//! Callers that don't care which factor they were handed (a login screen,
//! a bridge surface) dispatch through [`AuthFactor`] instead of picking a
//! module. OTP is deliberately not a variant: it never derives a key and
//! only rides along with another factor (see [`crate::login::otp`]).

use crate::context::LoginContext;
use crate::error::LoginResult;
use crate::login::tree::{LoginTree, SecretKey};
use crate::login::{keylogin, password, pin2, recovery2};

/// One way of proving an identity.
#[derive(Debug)]
pub enum AuthFactor<'a> {
    Password {
        username: &'a str,
        password: &'a str,
        /// One-time key for OTP-protected accounts this device hasn't
        /// enrolled yet.
        otp_key: Option<&'a str>,
    },
    Pin {
        username: &'a str,
        pin: &'a str,
    },
    Recovery {
        recovery2_key: &'a str,
        username: &'a str,
        answers: &'a [String],
    },
    RawKey {
        username: &'a str,
        login_key: &'a SecretKey,
    },
}

/// Log in with whichever factor the caller holds.
pub async fn login(ctx: &LoginContext, factor: AuthFactor<'_>) -> LoginResult<LoginTree> {
    match factor {
        AuthFactor::Password {
            username,
            password,
            otp_key,
        } => password::login_with_password(ctx, username, password, otp_key).await,
        AuthFactor::Pin { username, pin } => pin2::login_with_pin(ctx, username, pin).await,
        AuthFactor::Recovery {
            recovery2_key,
            username,
            answers,
        } => recovery2::login_with_recovery2(ctx, recovery2_key, username, answers).await,
        AuthFactor::RawKey {
            username,
            login_key,
        } => keylogin::login_with_key(ctx, username, login_key).await,
    }
}
