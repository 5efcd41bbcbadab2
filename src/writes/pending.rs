//! Keyed store of previewed writes awaiting confirmation.
//!
//! The only shared mutable state in the crate. Claims happen under a single
//! lock so the consumed transition is exactly-once: of two confirms racing
//! the same token, one wins and the other observes a missing token.

use crate::error::TokenError;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use subtle::ConstantTimeEq;

/// A write that was measured and rolled back, waiting for its confirmation.
#[derive(Debug, Clone)]
pub struct PendingModification {
    pub token: String,
    /// SHA-256 of the exact previewed text. Confirmation re-submits the text
    /// and must hash to the same digest.
    pub statement_hash: [u8; 32],
    pub target_table: Option<String>,
    pub preview_row_count: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

#[derive(Debug, Default)]
pub struct PendingStore {
    entries: Mutex<HashMap<String, PendingModification>>,
}

/// Digest used to bind a confirmation to the exact previewed statement.
#[must_use]
pub fn statement_digest(sql: &str) -> [u8; 32] {
    Sha256::digest(sql.as_bytes()).into()
}

/// 256 bits of entropy, hex-encoded. Collisions are negligible; the mint
/// loop below guards the store invariant anyway.
fn fresh_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl PendingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, PendingModification>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record a freshly measured write and hand back its single-use token.
    pub fn mint(
        &self,
        sql: &str,
        target_table: Option<String>,
        preview_row_count: u64,
        ttl: Duration,
    ) -> PendingModification {
        let created_at = Utc::now();
        let expires_at = created_at + ttl;
        let mut entries = self.entries();

        let mut token = fresh_token();
        while entries.contains_key(&token) {
            token = fresh_token();
        }

        let entry = PendingModification {
            token: token.clone(),
            statement_hash: statement_digest(sql),
            target_table,
            preview_row_count,
            created_at,
            expires_at,
            consumed: false,
        };
        entries.insert(token, entry.clone());
        entry
    }

    /// Consume a token for execution. Exactly one claim can succeed per
    /// token; the entry leaves the store on success, so a repeat claim
    /// reports a missing token. Expired entries are evicted on sight. A
    /// statement mismatch leaves the token intact: the previewed statement
    /// itself is still confirmable.
    pub fn claim(&self, token: &str, sql: &str) -> Result<PendingModification, TokenError> {
        let now = Utc::now();
        let digest = statement_digest(sql);
        let mut entries = self.entries();

        let Some(mut entry) = entries.remove(token) else {
            return Err(TokenError::NotFound);
        };
        if now > entry.expires_at {
            return Err(TokenError::Expired);
        }
        if !bool::from(digest.as_slice().ct_eq(entry.statement_hash.as_slice())) {
            entries.insert(entry.token.clone(), entry);
            return Err(TokenError::StatementMismatch);
        }
        entry.consumed = true;
        Ok(entry)
    }

    /// Sweep expired entries. Claims already evict lazily; this is for a
    /// periodic housekeeping call.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| now <= entry.expires_at);
        before - entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
