//! Per-user venue (L2) authentication headers

use crate::error::{GatewayError, GatewayResult};
use crate::redact::redact;
use crate::signing::build_hmac_signature;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

pub const L2_ADDRESS_HEADER: &str = "POLY_ADDRESS";
pub const L2_SIGNATURE_HEADER: &str = "POLY_SIGNATURE";
pub const L2_TIMESTAMP_HEADER: &str = "POLY_TIMESTAMP";
pub const L2_API_KEY_HEADER: &str = "POLY_API_KEY";
pub const L2_PASSPHRASE_HEADER: &str = "POLY_PASSPHRASE";

/// API credential triple the venue issued for one wallet
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct L2Credentials {
    #[serde(alias = "key")]
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

impl fmt::Debug for L2Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("L2Credentials")
            .field("api_key", &redact(&self.api_key))
            .field("secret", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// Builds the venue's per-user headers from a session's credential snapshot.
///
/// Callers must have already checked that the session is linked and not
/// expired; this type does not look at session state.
pub struct L2HeaderBuilder;

impl L2HeaderBuilder {
    /// Headers for `method path body`, stamped with the current unix second
    pub fn build(
        wallet_address: &str,
        credentials: &L2Credentials,
        method: &str,
        path: &str,
        body: &str,
    ) -> GatewayResult<Vec<(String, String)>> {
        Self::build_at(wallet_address, credentials, Utc::now().timestamp(), method, path, body)
    }

    pub fn build_at(
        wallet_address: &str,
        credentials: &L2Credentials,
        timestamp: i64,
        method: &str,
        path: &str,
        body: &str,
    ) -> GatewayResult<Vec<(String, String)>> {
        let signature =
            build_hmac_signature(&credentials.secret, timestamp, method, path, body).map_err(|e| {
                warn!(
                    "Stored L2 credentials for key {} are unusable: {}",
                    redact(&credentials.api_key),
                    e
                );
                GatewayError::unauthorized("session credentials invalid")
            })?;

        Ok(vec![
            (L2_ADDRESS_HEADER.to_string(), wallet_address.to_string()),
            (L2_SIGNATURE_HEADER.to_string(), signature),
            (L2_TIMESTAMP_HEADER.to_string(), timestamp.to_string()),
            (L2_API_KEY_HEADER.to_string(), credentials.api_key.clone()),
            (L2_PASSPHRASE_HEADER.to_string(), credentials.passphrase.clone()),
        ])
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn test_l2() -> L2Credentials {
        L2Credentials {
            api_key: "11111111-2222-3333-4444-555555555555".to_string(),
            secret: "dXNlci1zZWNyZXQtdXNlci1zZWNyZXQtdXNlci0wMQ==".to_string(),
            passphrase: "user-passphrase".to_string(),
        }
    }
}
