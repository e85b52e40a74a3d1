use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

use holdgate_types::{
    ActionId, AuditId, Clock, LedgerEvent, ProposedIntent, SessionId, TelemetrySink,
};
use tracing::{error, info};

use crate::chain::{ChainHead, ChainStatus, ChainVerifier};
use crate::digest::{Digest, GENESIS};
use crate::entry::{AuthorityProof, EntryBody, ExecutionResult, LedgerEntry, SealingProof};
use crate::error::LedgerError;
use crate::export::export_jsonl;
use crate::seal::SealSigner;

#[derive(Default)]
struct LedgerState {
    entries: Vec<LedgerEntry>,
    authorized: HashSet<ActionId>,
    by_audit: HashMap<AuditId, usize>,
}

impl LedgerState {
    fn head(&self) -> Digest {
        self.entries
            .last()
            .map(|entry| *entry.entry_hash())
            .unwrap_or(GENESIS)
    }
}

/// Append-only, hash-chained forensic ledger.
///
/// One mutex serializes every append. `seal` and `seal_compensation` are the
/// only mutators; there is no update or delete path.
pub struct ForensicLedger {
    state: Mutex<LedgerState>,
    signer: Arc<dyn SealSigner>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TelemetrySink>,
}

impl ForensicLedger {
    pub fn new(
        signer: Arc<dyn SealSigner>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            signer,
            clock,
            sink,
        }
    }

    /// Resume from previously exported entries. A broken chain is refused.
    pub fn restore(
        entries: Vec<LedgerEntry>,
        signer: Arc<dyn SealSigner>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Result<Self, LedgerError> {
        if let ChainStatus::BrokenAt { index, reason } = ChainVerifier::new().verify(&entries) {
            return Err(LedgerError::ChainBroken { index, reason });
        }

        let mut state = LedgerState::default();
        for (position, entry) in entries.iter().enumerate() {
            if entry.is_authorization() {
                state.authorized.insert(entry.action_id().clone());
            }
            state.by_audit.insert(entry.audit_id().clone(), position);
        }
        state.entries = entries;

        Ok(Self {
            state: Mutex::new(state),
            signer,
            clock,
            sink,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>, LedgerError> {
        self.state.lock().map_err(|_| LedgerError::LockPoisoned)
    }

    /// Seal the outcome of an authorized, executed intent.
    ///
    /// At most one authorization entry exists per action id.
    pub fn seal(
        &self,
        intent: &ProposedIntent,
        authority: AuthorityProof,
        execution: ExecutionResult,
    ) -> Result<LedgerEntry, LedgerError> {
        let session_id = authority.session_id.clone();
        let timestamp = authority.confirmed_at.wall;

        let mut state = self.lock()?;
        if state.authorized.contains(intent.id()) {
            return Err(LedgerError::DuplicateAction(intent.id().clone()));
        }

        let entry = self.append(
            &mut state,
            intent.id().clone(),
            session_id,
            timestamp,
            intent.rationale().clone(),
            EntryBody::Authorization {
                authority,
                execution,
            },
        )?;
        state.authorized.insert(intent.id().clone());
        drop(state);

        info!(
            index = entry.index(),
            audit_id = %entry.audit_id(),
            action_id = %entry.action_id(),
            "ledger entry sealed"
        );
        self.sink.emit(
            LedgerEvent::Sealed {
                index: entry.index(),
                audit_id: entry.audit_id().clone(),
                action_id: entry.action_id().clone(),
            }
            .into(),
        );
        Ok(entry)
    }

    /// Append a correction referencing an earlier authorization entry.
    pub fn seal_compensation(
        &self,
        original: &AuditId,
        session_id: SessionId,
        reason: impl Into<String>,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut state = self.lock()?;
        let position = *state
            .by_audit
            .get(original)
            .ok_or_else(|| LedgerError::UnknownAudit(original.clone()))?;
        let target = &state.entries[position];
        if !target.is_authorization() {
            return Err(LedgerError::NotCompensable(original.clone()));
        }
        let action_id = target.action_id().clone();
        let rationale = target.rationale().clone();
        let timestamp = self.clock.wall();

        let entry = self.append(
            &mut state,
            action_id,
            session_id,
            timestamp,
            rationale,
            EntryBody::Compensation {
                compensates: original.clone(),
                reason: reason.into(),
            },
        )?;
        drop(state);

        info!(index = entry.index(), compensates = %original, "compensation sealed");
        self.sink.emit(
            LedgerEvent::CompensationSealed {
                index: entry.index(),
                audit_id: entry.audit_id().clone(),
                compensates: original.clone(),
            }
            .into(),
        );
        Ok(entry)
    }

    fn append(
        &self,
        state: &mut LedgerState,
        action_id: ActionId,
        session_id: SessionId,
        timestamp: chrono::DateTime<chrono::Utc>,
        rationale: holdgate_types::Rationale,
        body: EntryBody,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut entry = LedgerEntry {
            index: state.entries.len() as u64,
            audit_id: AuditId::new(),
            action_id,
            session_id,
            timestamp,
            rationale,
            body,
            seal: SealingProof {
                sealed_at: self.clock.wall(),
                sealing_authority: self.signer.authority().to_string(),
                previous_hash: state.head(),
                entry_hash: GENESIS,
                signature: None,
            },
        };
        let hash = entry.compute_hash()?;
        entry.seal.entry_hash = hash;
        entry.seal.signature = self.signer.sign(&hash)?.map(hex::encode);

        state
            .by_audit
            .insert(entry.audit_id.clone(), state.entries.len());
        state.entries.push(entry.clone());
        Ok(entry)
    }

    pub fn contains_action(&self, action_id: &ActionId) -> bool {
        self.lock()
            .map(|state| state.authorized.contains(action_id))
            .unwrap_or(false)
    }

    pub fn entry(&self, audit_id: &AuditId) -> Result<Option<LedgerEntry>, LedgerError> {
        let state = self.lock()?;
        Ok(state
            .by_audit
            .get(audit_id)
            .map(|&position| state.entries[position].clone()))
    }

    /// Every entry sealed for `action_id`, authorization first.
    pub fn entries_for(&self, action_id: &ActionId) -> Result<Vec<LedgerEntry>, LedgerError> {
        let state = self.lock()?;
        Ok(state
            .entries
            .iter()
            .filter(|entry| entry.action_id() == action_id)
            .cloned()
            .collect())
    }

    /// Full ordered read, without verification.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.lock()?.entries.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|state| state.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn head(&self) -> Result<ChainHead, LedgerError> {
        let state = self.lock()?;
        Ok(ChainHead {
            length: state.entries.len() as u64,
            digest: state.head(),
        })
    }

    /// Recompute the whole chain from genesis and report the result.
    pub fn verify(&self) -> Result<ChainStatus, LedgerError> {
        let entries = self.entries()?;
        let status = ChainVerifier::new().verify(&entries);
        match &status {
            ChainStatus::Valid { entries, .. } => {
                self.sink
                    .emit(LedgerEvent::ChainVerified { entries: *entries }.into());
            }
            ChainStatus::BrokenAt { index, reason } => {
                error!(index, %reason, "ledger chain broken");
                self.sink.emit(
                    LedgerEvent::ChainBroken {
                        index: *index,
                        reason: reason.to_string(),
                    }
                    .into(),
                );
            }
        }
        Ok(status)
    }

    /// Verified ordered read for external tooling. Refuses a broken chain.
    pub fn export(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let entries = self.entries()?;
        if let ChainStatus::BrokenAt { index, reason } = ChainVerifier::new().verify(&entries) {
            error!(index, %reason, "refusing to export broken chain");
            return Err(LedgerError::ChainBroken { index, reason });
        }
        Ok(entries)
    }

    /// Verified export as JSON lines. Returns the number of entries written.
    pub fn export_jsonl<W: Write>(&self, writer: W) -> Result<usize, LedgerError> {
        let entries = self.export()?;
        export_jsonl(&entries, writer)?;
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::verify_chain;
    use crate::entry::ExecutionStatus;
    use crate::seal::UnsignedSealer;
    use holdgate_types::{
        DomainTag, IntentState, ManualClock, Rationale, RecordingSink, TargetAction,
        TelemetryEvent,
    };
    use std::thread;

    fn ledger() -> (ForensicLedger, Arc<ManualClock>, Arc<RecordingSink>) {
        let clock = Arc::new(ManualClock::new());
        let sink = Arc::new(RecordingSink::new());
        let ledger = ForensicLedger::new(
            Arc::new(UnsignedSealer::new("desk-1")),
            clock.clone(),
            sink.clone(),
        );
        (ledger, clock, sink)
    }

    fn intent() -> ProposedIntent {
        ProposedIntent::builder(
            DomainTag::new("video.edit").unwrap(),
            TargetAction::new("cut", "timeline://main"),
        )
        .rationale(Rationale::new("perception", "remove dead air", 0.66).unwrap())
        .build()
        .unwrap()
    }

    fn proof(clock: &ManualClock, session: &str) -> AuthorityProof {
        AuthorityProof::hold(
            SessionId::new(session),
            512,
            vec![IntentState::VisibleGhost, IntentState::Executed],
            clock.stamp(),
        )
    }

    fn ok(intent: &ProposedIntent) -> ExecutionResult {
        ExecutionResult::success(intent.domain().clone(), 20, b"done")
    }

    #[test]
    fn seal_links_to_genesis_then_previous() {
        let (ledger, clock, _) = ledger();
        let first = intent();
        let second = intent();
        let a = ledger.seal(&first, proof(&clock, "s-1"), ok(&first)).unwrap();
        clock.advance(10);
        let b = ledger.seal(&second, proof(&clock, "s-1"), ok(&second)).unwrap();

        assert_eq!(a.index(), 0);
        assert_eq!(a.previous_hash(), &GENESIS);
        assert_eq!(b.index(), 1);
        assert_eq!(b.previous_hash(), a.entry_hash());
        assert_eq!(a.seal().sealing_authority(), "desk-1");
        assert_eq!(a.rationale().confidence, 0.66);
        assert!(ledger.verify().unwrap().is_valid());
    }

    #[test]
    fn at_most_one_entry_per_action() {
        let (ledger, clock, _) = ledger();
        let i = intent();
        ledger.seal(&i, proof(&clock, "s-1"), ok(&i)).unwrap();
        assert!(matches!(
            ledger.seal(&i, proof(&clock, "s-2"), ok(&i)),
            Err(LedgerError::DuplicateAction(_))
        ));
        assert_eq!(ledger.len(), 1);
        assert!(ledger.contains_action(i.id()));
    }

    struct RefusingSigner;

    impl SealSigner for RefusingSigner {
        fn authority(&self) -> &str {
            "hsm-1"
        }

        fn sign(&self, _entry_hash: &Digest) -> Result<Option<Vec<u8>>, LedgerError> {
            Err(LedgerError::Signing {
                authority: "hsm-1".into(),
                reason: "token unavailable".into(),
            })
        }
    }

    #[test]
    fn refused_signature_leaves_chain_untouched() {
        let clock = Arc::new(ManualClock::new());
        let ledger = ForensicLedger::new(
            Arc::new(RefusingSigner),
            clock.clone(),
            Arc::new(RecordingSink::new()),
        );
        let i = intent();
        assert!(matches!(
            ledger.seal(&i, proof(&clock, "s-1"), ok(&i)),
            Err(LedgerError::Signing { .. })
        ));
        assert!(ledger.is_empty());
        assert!(!ledger.contains_action(i.id()));
    }

    #[test]
    fn failed_execution_is_sealed() {
        let (ledger, clock, _) = ledger();
        let i = intent();
        let entry = ledger
            .seal(
                &i,
                proof(&clock, "s-1"),
                ExecutionResult::failed(i.domain().clone(), 7, "renderer crashed"),
            )
            .unwrap();
        let execution = entry.execution().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("renderer crashed"));
    }

    #[test]
    fn compensation_appends_without_editing() {
        let (ledger, clock, sink) = ledger();
        let i = intent();
        let original = ledger.seal(&i, proof(&clock, "s-1"), ok(&i)).unwrap();
        clock.advance(5_000);

        let correction = ledger
            .seal_compensation(original.audit_id(), SessionId::new("s-2"), "cut was wrong")
            .unwrap();
        assert_eq!(correction.compensates(), Some(original.audit_id()));
        assert_eq!(correction.action_id(), original.action_id());
        assert_eq!(correction.previous_hash(), original.entry_hash());

        assert_eq!(ledger.entry(original.audit_id()).unwrap(), Some(original.clone()));
        assert_eq!(ledger.entries_for(i.id()).unwrap().len(), 2);
        assert!(ledger.verify().unwrap().is_valid());
        assert!(sink.events().iter().any(|e| matches!(
            e,
            TelemetryEvent::Ledger(LedgerEvent::CompensationSealed { .. })
        )));

        assert!(matches!(
            ledger.seal_compensation(correction.audit_id(), SessionId::new("s-2"), "again"),
            Err(LedgerError::NotCompensable(_))
        ));
        assert!(matches!(
            ledger.seal_compensation(&AuditId::new(), SessionId::new("s-2"), "nothing"),
            Err(LedgerError::UnknownAudit(_))
        ));
    }

    #[test]
    fn restore_resumes_chain() {
        let (ledger, clock, _) = ledger();
        let first = intent();
        ledger.seal(&first, proof(&clock, "s-1"), ok(&first)).unwrap();
        let exported = ledger.export().unwrap();

        let restored = ForensicLedger::restore(
            exported,
            Arc::new(UnsignedSealer::new("desk-1")),
            clock.clone(),
            Arc::new(holdgate_types::NullSink),
        )
        .unwrap();
        assert!(matches!(
            restored.seal(&first, proof(&clock, "s-1"), ok(&first)),
            Err(LedgerError::DuplicateAction(_))
        ));
        let second = intent();
        let entry = restored.seal(&second, proof(&clock, "s-1"), ok(&second)).unwrap();
        assert_eq!(entry.index(), 1);
        assert!(verify_chain(&restored.entries().unwrap()).is_valid());
    }

    #[test]
    fn restore_refuses_broken_chain() {
        let (ledger, clock, _) = ledger();
        for _ in 0..3 {
            let i = intent();
            ledger.seal(&i, proof(&clock, "s-1"), ok(&i)).unwrap();
        }
        let mut entries = ledger.entries().unwrap();
        entries.remove(0);
        assert!(matches!(
            ForensicLedger::restore(
                entries,
                Arc::new(UnsignedSealer::default()),
                clock.clone(),
                Arc::new(holdgate_types::NullSink),
            ),
            Err(LedgerError::ChainBroken { index: 0, .. })
        ));
    }

    #[test]
    fn concurrent_seals_form_one_chain() {
        let (ledger, _, _) = ledger();
        let ledger = Arc::new(ledger);
        let clock = ManualClock::new();
        let stamp = clock.stamp();

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let ledger = ledger.clone();
                thread::spawn(move || {
                    for _ in 0..10 {
                        let i = intent();
                        let authority = AuthorityProof::hold(
                            SessionId::new(format!("s-{n}")),
                            400,
                            vec![IntentState::Executed],
                            stamp,
                        );
                        ledger.seal(&i, authority, ok(&i)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(ledger.len(), 80);
        assert_eq!(
            ledger.verify().unwrap(),
            ChainStatus::Valid {
                entries: 80,
                head: ledger.head().unwrap().digest
            }
        );
    }

    #[test]
    fn export_jsonl_writes_one_line_per_entry() {
        let (ledger, clock, _) = ledger();
        for _ in 0..3 {
            let i = intent();
            ledger.seal(&i, proof(&clock, "s-1"), ok(&i)).unwrap();
        }
        let mut buf = Vec::new();
        assert_eq!(ledger.export_jsonl(&mut buf).unwrap(), 3);
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 3);
    }
}
