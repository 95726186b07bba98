//! Single-use nonce issuance and verification for the executor attestation
//! handshake.
//!
//! An executor proves it holds its shared secret by returning
//! `HASH(nonce || secret)` for a nonce it was just issued. Signature
//! comparison is constant-time by hand, since no crate in the dependency
//! stack provides it and this is the one place that property matters.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Default nonce time-to-live, in seconds.
pub const DEFAULT_NONCE_TTL_SECS: i64 = 60;

/// Result of a verification attempt, always carrying a specific reason so
/// callers can audit exactly why a handshake failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Signature matched an unused, unexpired nonce bound to this worker.
    Valid,
    /// No such nonce was ever issued.
    NonceUnknown,
    /// The nonce exists but was issued to a different worker.
    NonceWorkerMismatch,
    /// The nonce's TTL has elapsed.
    NonceExpired,
    /// The nonce was already consumed by a prior verification.
    NonceAlreadyUsed,
    /// The signature did not match.
    SignatureMismatch,
}

impl VerifyOutcome {
    /// Stable lowercase/underscore reason string for audit records, e.g.
    /// `"nonce_worker_mismatch"`.
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            VerifyOutcome::Valid => "valid",
            VerifyOutcome::NonceUnknown => "nonce_unknown",
            VerifyOutcome::NonceWorkerMismatch => "nonce_worker_mismatch",
            VerifyOutcome::NonceExpired => "nonce_expired",
            VerifyOutcome::NonceAlreadyUsed => "nonce_already_used",
            VerifyOutcome::SignatureMismatch => "signature_mismatch",
        }
    }

    /// Whether the handshake succeeded.
    #[must_use]
    pub fn is_valid(self) -> bool {
        matches!(self, VerifyOutcome::Valid)
    }
}

struct IssuedNonce {
    worker_id: String,
    issued_at: DateTime<Utc>,
    used: bool,
}

/// Holds per-worker shared secrets and the table of outstanding nonces.
pub struct AttestationAuthority {
    secrets: HashMap<String, String>,
    ttl_secs: i64,
    nonces: Mutex<HashMap<String, IssuedNonce>>,
}

impl AttestationAuthority {
    /// Build an authority from a `worker name -> shared secret` map.
    #[must_use]
    pub fn new(secrets: HashMap<String, String>) -> Self {
        Self::with_ttl(secrets, DEFAULT_NONCE_TTL_SECS)
    }

    /// Like [`Self::new`] with an explicit nonce TTL.
    #[must_use]
    pub fn with_ttl(secrets: HashMap<String, String>, ttl_secs: i64) -> Self {
        Self {
            secrets,
            ttl_secs,
            nonces: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a fresh nonce for `worker_id`.
    ///
    /// Returns `None` if `worker_id` has no registered secret — an
    /// unrecognized executor may never attest.
    pub fn issue_nonce(&self, worker_id: &str) -> Option<String> {
        if !self.secrets.contains_key(worker_id) {
            return None;
        }
        self.prune_expired();
        let nonce = Uuid::new_v4().to_string();
        self.nonces.lock().expect("nonce table lock poisoned").insert(
            nonce.clone(),
            IssuedNonce {
                worker_id: worker_id.to_owned(),
                issued_at: Utc::now(),
                used: false,
            },
        );
        Some(nonce)
    }

    /// Verify a worker's attestation signature for a previously issued
    /// nonce.
    ///
    /// Checks, in order: the nonce exists, it was issued to this worker,
    /// it has not expired, it has not already been used, and the signature
    /// matches `HASH(nonce || secret)` under constant-time comparison.
    /// A successful verification marks the nonce used; repeat calls for
    /// the same nonce return [`VerifyOutcome::NonceAlreadyUsed`].
    pub fn verify(&self, worker_id: &str, nonce: &str, signature: &str) -> VerifyOutcome {
        let mut nonces = self.nonces.lock().expect("nonce table lock poisoned");
        let Some(entry) = nonces.get_mut(nonce) else {
            return VerifyOutcome::NonceUnknown;
        };
        if entry.worker_id != worker_id {
            return VerifyOutcome::NonceWorkerMismatch;
        }
        let deadline = entry.issued_at + chrono::Duration::seconds(self.ttl_secs);
        if Utc::now() > deadline {
            return VerifyOutcome::NonceExpired;
        }
        if entry.used {
            return VerifyOutcome::NonceAlreadyUsed;
        }

        let Some(secret) = self.secrets.get(worker_id) else {
            return VerifyOutcome::NonceWorkerMismatch;
        };
        let expected = expected_signature(nonce, secret);
        if !constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
            return VerifyOutcome::SignatureMismatch;
        }

        entry.used = true;
        VerifyOutcome::Valid
    }

    /// Discard every outstanding nonce issued to `worker_id`, e.g. after a
    /// kill or a credential rotation.
    pub fn revoke(&self, worker_id: &str) {
        self.nonces
            .lock()
            .expect("nonce table lock poisoned")
            .retain(|_, entry| entry.worker_id != worker_id);
    }

    fn prune_expired(&self) {
        let ttl = self.ttl_secs;
        let now = Utc::now();
        self.nonces
            .lock()
            .expect("nonce table lock poisoned")
            .retain(|_, entry| now <= entry.issued_at + chrono::Duration::seconds(ttl));
    }
}

/// Compute the hex-lowercase signature a worker must present:
/// `SHA256(nonce || secret)`.
#[must_use]
pub fn expected_signature(nonce: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nonce.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time byte comparison: always walks the full length of the
/// shorter input so timing does not leak how many leading bytes matched.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority() -> AttestationAuthority {
        AttestationAuthority::new(HashMap::from([(
            "clawd-runner".to_owned(),
            "top-secret".to_owned(),
        )]))
    }

    #[test]
    fn unrecognized_worker_is_denied_a_nonce() {
        let auth = authority();
        assert!(auth.issue_nonce("unknown-worker").is_none());
    }

    #[test]
    fn valid_signature_verifies_once_then_reports_already_used() {
        let auth = authority();
        let nonce = auth.issue_nonce("clawd-runner").expect("nonce issued");
        let sig = expected_signature(&nonce, "top-secret");

        let first = auth.verify("clawd-runner", &nonce, &sig);
        assert!(first.is_valid());

        let second = auth.verify("clawd-runner", &nonce, &sig);
        assert_eq!(second, VerifyOutcome::NonceAlreadyUsed);
    }

    #[test]
    fn nonce_bound_to_a_different_worker_is_rejected() {
        let auth = AttestationAuthority::new(HashMap::from([
            ("worker-a".to_owned(), "secret-a".to_owned()),
            ("worker-b".to_owned(), "secret-b".to_owned()),
        ]));
        let nonce = auth.issue_nonce("worker-a").expect("nonce issued");
        let sig = expected_signature(&nonce, "secret-a");

        let outcome = auth.verify("worker-b", &nonce, &sig);
        assert_eq!(outcome, VerifyOutcome::NonceWorkerMismatch);
    }

    #[test]
    fn wrong_signature_is_rejected() {
        let auth = authority();
        let nonce = auth.issue_nonce("clawd-runner").expect("nonce issued");
        let outcome = auth.verify("clawd-runner", &nonce, "deadbeef");
        assert_eq!(outcome, VerifyOutcome::SignatureMismatch);
    }

    #[test]
    fn expired_nonce_is_rejected() {
        let auth = AttestationAuthority::with_ttl(
            HashMap::from([("clawd-runner".to_owned(), "top-secret".to_owned())]),
            -1,
        );
        let nonce = auth.issue_nonce("clawd-runner").expect("nonce issued");
        let sig = expected_signature(&nonce, "top-secret");
        let outcome = auth.verify("clawd-runner", &nonce, &sig);
        assert_eq!(outcome, VerifyOutcome::NonceExpired);
    }

    #[test]
    fn revoke_discards_all_nonces_for_a_worker() {
        let auth = authority();
        let nonce = auth.issue_nonce("clawd-runner").expect("nonce issued");
        auth.revoke("clawd-runner");
        let sig = expected_signature(&nonce, "top-secret");
        let outcome = auth.verify("clawd-runner", &nonce, &sig);
        assert_eq!(outcome, VerifyOutcome::NonceUnknown);
    }

    #[test]
    fn constant_time_eq_matches_standard_equality() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
