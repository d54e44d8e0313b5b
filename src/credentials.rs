//! Per-client identity and connection token.
//!
//! Tokens follow the HMAC scheme used by Centrifugo-style servers: the hex
//! encoded HMAC-SHA256 of `user ‖ timestamp ‖ info`, keyed with the shared
//! secret the server was started with.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::OffsetDateTime;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: String,
    /// Unix seconds at signing time.
    pub timestamp: i64,
    pub info: String,
    pub token: String,
}

#[derive(Clone)]
pub struct CredentialFactory {
    secret: String,
    info: String,
}

impl CredentialFactory {
    pub fn new(secret: impl Into<String>, info: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            info: info.into(),
        }
    }

    pub fn make_credentials(&self, user_id: u64) -> Credentials {
        let timestamp = OffsetDateTime::now_utc().unix_timestamp();
        self.make_credentials_at(user_id, timestamp)
    }

    pub fn make_credentials_at(&self, user_id: u64, timestamp: i64) -> Credentials {
        let user_id = user_id.to_string();
        let token = sign(&self.secret, &user_id, timestamp, &self.info);
        Credentials {
            user_id,
            timestamp,
            info: self.info.clone(),
            token,
        }
    }
}

impl std::fmt::Debug for CredentialFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialFactory")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

pub fn sign(secret: &str, user_id: &str, timestamp: i64, info: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(user_id.as_bytes());
    mac.update(timestamp.to_string().as_bytes());
    mac.update(info.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
