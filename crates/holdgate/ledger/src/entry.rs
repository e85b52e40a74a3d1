//! Sealed ledger records.
//!
//! `LedgerEntry` exposes getters only. Entries are built inside this crate by
//! the sealing path, or deserialized from an export, where any edit surfaces
//! as a chain break on verification.

use chrono::{DateTime, Utc};
use holdgate_types::{
    ActionId, AuditId, DomainTag, IntentState, LeaseId, Rationale, SessionId, SignalStamp,
};
use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// How authority for an action was established.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthorityMode {
    /// Continuous hold and confirm through the intent state machine.
    Hold,
    /// Active, heartbeating lease.
    Lease { lease_id: LeaseId },
}

/// Evidence of the human authorization behind an entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityProof {
    pub session_id: SessionId,
    pub mode: AuthorityMode,
    pub hold_duration_ms: u64,
    pub fsm_path: Vec<IntentState>,
    pub confirmed_at: SignalStamp,
    /// Every session that co-signed a HIGH-risk action, including the owner.
    #[serde(default)]
    pub co_signers: Vec<SessionId>,
}

impl AuthorityProof {
    pub fn hold(
        session_id: SessionId,
        hold_duration_ms: u64,
        fsm_path: Vec<IntentState>,
        confirmed_at: SignalStamp,
    ) -> Self {
        Self {
            session_id,
            mode: AuthorityMode::Hold,
            hold_duration_ms,
            fsm_path,
            confirmed_at,
            co_signers: Vec::new(),
        }
    }

    pub fn lease(session_id: SessionId, lease_id: LeaseId, granted_at: SignalStamp) -> Self {
        Self {
            session_id,
            mode: AuthorityMode::Lease { lease_id },
            hold_duration_ms: 0,
            fsm_path: Vec::new(),
            confirmed_at: granted_at,
            co_signers: Vec::new(),
        }
    }

    pub fn with_co_signers(mut self, co_signers: Vec<SessionId>) -> Self {
        self.co_signers = co_signers;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

/// What the executor reported back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub domain: DomainTag,
    pub status: ExecutionStatus,
    pub duration_ms: u64,
    /// BLAKE3 of the executor output, when there was one.
    pub output_hash: Option<Digest>,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn success(domain: DomainTag, duration_ms: u64, output: &[u8]) -> Self {
        Self {
            domain,
            status: ExecutionStatus::Success,
            duration_ms,
            output_hash: Some(Digest::of(output)),
            error: None,
        }
    }

    pub fn failed(domain: DomainTag, duration_ms: u64, error: impl Into<String>) -> Self {
        Self {
            domain,
            status: ExecutionStatus::Failed,
            duration_ms,
            output_hash: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryBody {
    Authorization {
        authority: AuthorityProof,
        execution: ExecutionResult,
    },
    /// Correction of an earlier entry. The original stays untouched.
    Compensation { compensates: AuditId, reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealingProof {
    pub(crate) sealed_at: DateTime<Utc>,
    pub(crate) sealing_authority: String,
    pub(crate) previous_hash: Digest,
    pub(crate) entry_hash: Digest,
    /// Hex signature over `entry_hash`, if the sealer signs.
    pub(crate) signature: Option<String>,
}

impl SealingProof {
    pub fn sealed_at(&self) -> DateTime<Utc> {
        self.sealed_at
    }

    pub fn sealing_authority(&self) -> &str {
        &self.sealing_authority
    }

    pub fn previous_hash(&self) -> &Digest {
        &self.previous_hash
    }

    pub fn entry_hash(&self) -> &Digest {
        &self.entry_hash
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub(crate) index: u64,
    pub(crate) audit_id: AuditId,
    pub(crate) action_id: ActionId,
    pub(crate) session_id: SessionId,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) rationale: Rationale,
    pub(crate) body: EntryBody,
    pub(crate) seal: SealingProof,
}

/// The hashed projection of an entry: everything except its own hash and
/// signature.
#[derive(Serialize)]
pub(crate) struct HashedView<'a> {
    index: u64,
    audit_id: &'a AuditId,
    action_id: &'a ActionId,
    session_id: &'a SessionId,
    timestamp: &'a DateTime<Utc>,
    rationale: &'a Rationale,
    body: &'a EntryBody,
    sealed_at: &'a DateTime<Utc>,
    sealing_authority: &'a str,
}

const HASH_DOMAIN: &[u8] = b"holdgate-ledger-v1:";

impl LedgerEntry {
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn audit_id(&self) -> &AuditId {
        &self.audit_id
    }

    pub fn action_id(&self) -> &ActionId {
        &self.action_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn rationale(&self) -> &Rationale {
        &self.rationale
    }

    pub fn body(&self) -> &EntryBody {
        &self.body
    }

    pub fn seal(&self) -> &SealingProof {
        &self.seal
    }

    pub fn entry_hash(&self) -> &Digest {
        &self.seal.entry_hash
    }

    pub fn previous_hash(&self) -> &Digest {
        &self.seal.previous_hash
    }

    pub fn authority(&self) -> Option<&AuthorityProof> {
        match &self.body {
            EntryBody::Authorization { authority, .. } => Some(authority),
            EntryBody::Compensation { .. } => None,
        }
    }

    pub fn execution(&self) -> Option<&ExecutionResult> {
        match &self.body {
            EntryBody::Authorization { execution, .. } => Some(execution),
            EntryBody::Compensation { .. } => None,
        }
    }

    pub fn compensates(&self) -> Option<&AuditId> {
        match &self.body {
            EntryBody::Compensation { compensates, .. } => Some(compensates),
            EntryBody::Authorization { .. } => None,
        }
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self.body, EntryBody::Authorization { .. })
    }

    pub(crate) fn hashed_view(&self) -> HashedView<'_> {
        HashedView {
            index: self.index,
            audit_id: &self.audit_id,
            action_id: &self.action_id,
            session_id: &self.session_id,
            timestamp: &self.timestamp,
            rationale: &self.rationale,
            body: &self.body,
            sealed_at: &self.seal.sealed_at,
            sealing_authority: &self.seal.sealing_authority,
        }
    }

    /// Recompute this entry's digest from its content and stored
    /// `previous_hash`.
    pub fn compute_hash(&self) -> Result<Digest, serde_json::Error> {
        let canonical = serde_json::to_vec(&self.hashed_view())?;
        let mut hasher = blake3::Hasher::new();
        hasher.update(HASH_DOMAIN);
        hasher.update(&canonical);
        hasher.update(self.seal.previous_hash.as_bytes());
        Ok(hasher.finalize().into())
    }
}
