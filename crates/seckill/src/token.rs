//! Session and purchase token lifecycles
//!
//! Both tokens are 32 characters drawn from a 62-character alphabet using
//! cryptographically strong randomness, stored as JSON records in the
//! counter store with matching TTLs. Session tokens are validated read-only;
//! purchase tokens are single-use and consumed by an atomic
//! read-compare-delete.

use crate::error::{Result, SeckillError};
use crate::keys;
use crate::retry::{with_deadline, SCRIPT_DEADLINE};
use chrono::Utc;
use counter_store::{CounterStore, TokenConsume};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const PURCHASE_TTL: Duration = Duration::from_secs(30 * 60);
const TOKEN_LEN: usize = 32;
const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Session token record as stored in the counter store
#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    token: String,
    user_id: i64,
    issued_at: i64,
    expires_at: i64,
}

/// Purchase token record; `user_id`, `product_id` and `expires_at` are the
/// fields the atomic consume operation compares
#[derive(Debug, Serialize, Deserialize)]
struct PurchaseRecord {
    token_id: String,
    user_id: i64,
    product_id: i64,
    issued_at: i64,
    expires_at: i64,
}

/// Issues, validates, and consumes both token kinds
#[derive(Clone)]
pub struct TokenService {
    counter: Arc<dyn CounterStore>,
}

impl TokenService {
    pub fn new(counter: Arc<dyn CounterStore>) -> Self {
        Self { counter }
    }

    /// Issue a 24-hour session token for a logged-in user.
    pub async fn issue_session(&self, user_id: i64) -> Result<String> {
        let token = random_token();
        let now = Utc::now().timestamp_millis();
        let record = SessionRecord {
            token: token.clone(),
            user_id,
            issued_at: now,
            expires_at: now + SESSION_TTL.as_millis() as i64,
        };
        let json = serde_json::to_string(&record)
            .map_err(|e| SeckillError::StoreUnavailable(format!("encode session token: {e}")))?;

        with_deadline(
            SCRIPT_DEADLINE,
            self.counter
                .set_record(&keys::session_token(&token), &json, SESSION_TTL),
        )
        .await?;

        info!("Session token issued, user={}, prefix={}", user_id, &token[..8]);
        Ok(token)
    }

    /// Resolve a session token to its user. Absent and expired tokens fail
    /// the same way.
    pub async fn validate_session(&self, token: &str) -> Result<i64> {
        if token.len() != TOKEN_LEN {
            return Err(SeckillError::TokenExpired);
        }
        let raw = with_deadline(
            SCRIPT_DEADLINE,
            self.counter.get_record(&keys::session_token(token)),
        )
        .await?
        .ok_or(SeckillError::TokenExpired)?;

        let record: SessionRecord = serde_json::from_str(&raw)
            .map_err(|e| SeckillError::StoreUnavailable(format!("decode session token: {e}")))?;

        if Utc::now().timestamp_millis() >= record.expires_at {
            debug!("Session token past expiry, user={}", record.user_id);
            return Err(SeckillError::TokenExpired);
        }
        Ok(record.user_id)
    }

    /// Issue a 30-minute single-use purchase token bound to one user and
    /// product.
    pub async fn issue_purchase(&self, user_id: i64, product_id: i64) -> Result<String> {
        let token_id = random_token();
        let now = Utc::now().timestamp_millis();
        let record = PurchaseRecord {
            token_id: token_id.clone(),
            user_id,
            product_id,
            issued_at: now,
            expires_at: now + PURCHASE_TTL.as_millis() as i64,
        };
        let json = serde_json::to_string(&record)
            .map_err(|e| SeckillError::StoreUnavailable(format!("encode purchase token: {e}")))?;

        with_deadline(
            SCRIPT_DEADLINE,
            self.counter
                .set_record(&keys::purchase_token(&token_id), &json, PURCHASE_TTL),
        )
        .await?;

        info!(
            "Purchase token issued, user={}, product={}, prefix={}",
            user_id,
            product_id,
            &token_id[..8]
        );
        Ok(token_id)
    }

    /// Atomically validate and consume a purchase token. Exactly one of any
    /// number of concurrent consumers of the same token succeeds.
    pub async fn validate_and_consume(
        &self,
        token_id: &str,
        user_id: i64,
        product_id: i64,
    ) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let outcome = with_deadline(
            SCRIPT_DEADLINE,
            self.counter
                .consume_token(&keys::purchase_token(token_id), user_id, product_id, now),
        )
        .await?;

        match outcome {
            TokenConsume::Consumed => {
                debug!(
                    "Purchase token consumed, user={}, product={}",
                    user_id, product_id
                );
                Ok(())
            }
            TokenConsume::Missing => Err(SeckillError::InvalidToken),
            TokenConsume::Expired => {
                debug!("Purchase token expired, user={}", user_id);
                Err(SeckillError::InvalidToken)
            }
            TokenConsume::Mismatch => {
                warn!(
                    "Purchase token mismatch, user={}, product={}",
                    user_id, product_id
                );
                Err(SeckillError::InvalidToken)
            }
        }
    }
}

/// 32 characters from a CSPRNG mapped into the 62-character alphabet.
fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_LEN];
    OsRng.fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| TOKEN_ALPHABET[(*b as usize) % TOKEN_ALPHABET.len()] as char)
        .collect()
}
