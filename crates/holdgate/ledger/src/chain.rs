//! Independent chain verification.
//!
//! Nothing here touches writer state: the verifier takes an ordered slice of
//! entries (live or imported) and recomputes every link from genesis.

use serde::{Deserialize, Serialize};

use crate::digest::{Digest, GENESIS};
use crate::entry::LedgerEntry;
use crate::seal::SealVerifier;

/// Why verification stopped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakReason {
    /// Stored index differs from position: deletion or reordering.
    IndexOutOfSequence { found: u64 },
    /// `previous_hash` does not match the preceding entry.
    PreviousHashMismatch,
    /// Recomputed digest differs from the stored one: field mutation.
    EntryHashMismatch,
    /// Entry content could not be canonically serialized.
    Unserializable(String),
    /// Seal signature missing, malformed, or invalid.
    SignatureInvalid,
    /// Fewer entries than the trusted head records.
    Truncated { expected: u64 },
    /// Entry at the trusted head position carries a different digest.
    HeadMismatch,
}

impl std::fmt::Display for BreakReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakReason::IndexOutOfSequence { found } => {
                write!(f, "index out of sequence (found {found})")
            }
            BreakReason::PreviousHashMismatch => write!(f, "previous hash mismatch"),
            BreakReason::EntryHashMismatch => write!(f, "entry hash mismatch"),
            BreakReason::Unserializable(e) => write!(f, "unserializable entry: {e}"),
            BreakReason::SignatureInvalid => write!(f, "seal signature invalid"),
            BreakReason::Truncated { expected } => {
                write!(f, "chain truncated (expected {expected} entries)")
            }
            BreakReason::HeadMismatch => write!(f, "head digest mismatch"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainStatus {
    Valid { entries: u64, head: Digest },
    BrokenAt { index: u64, reason: BreakReason },
}

impl ChainStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }
}

/// Length and last digest of a chain, kept out of band to detect tail
/// truncation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    pub length: u64,
    pub digest: Digest,
}

#[derive(Default)]
pub struct ChainVerifier<'a> {
    seal_verifier: Option<&'a dyn SealVerifier>,
    head: Option<ChainHead>,
}

impl<'a> ChainVerifier<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also check every seal signature.
    pub fn with_seal_verifier(mut self, verifier: &'a dyn SealVerifier) -> Self {
        self.seal_verifier = Some(verifier);
        self
    }

    /// Also require the chain to reach a trusted head.
    pub fn with_head(mut self, head: ChainHead) -> Self {
        self.head = Some(head);
        self
    }

    pub fn verify(&self, entries: &[LedgerEntry]) -> ChainStatus {
        let mut previous = GENESIS;

        for (position, entry) in entries.iter().enumerate() {
            let index = position as u64;
            if let Err(reason) = self.verify_entry(index, entry, &previous) {
                return ChainStatus::BrokenAt { index, reason };
            }
            previous = *entry.entry_hash();
        }

        if let Some(head) = &self.head {
            let length = entries.len() as u64;
            if length < head.length {
                return ChainStatus::BrokenAt {
                    index: length,
                    reason: BreakReason::Truncated {
                        expected: head.length,
                    },
                };
            }
            let at_head = match head.length {
                0 => GENESIS,
                n => *entries[(n - 1) as usize].entry_hash(),
            };
            if at_head != head.digest {
                return ChainStatus::BrokenAt {
                    index: head.length.saturating_sub(1),
                    reason: BreakReason::HeadMismatch,
                };
            }
        }

        ChainStatus::Valid {
            entries: entries.len() as u64,
            head: previous,
        }
    }

    fn verify_entry(
        &self,
        index: u64,
        entry: &LedgerEntry,
        previous: &Digest,
    ) -> Result<(), BreakReason> {
        if entry.index() != index {
            return Err(BreakReason::IndexOutOfSequence {
                found: entry.index(),
            });
        }
        if entry.previous_hash() != previous {
            return Err(BreakReason::PreviousHashMismatch);
        }
        let computed = entry
            .compute_hash()
            .map_err(|e| BreakReason::Unserializable(e.to_string()))?;
        if &computed != entry.entry_hash() {
            return Err(BreakReason::EntryHashMismatch);
        }
        if let Some(verifier) = self.seal_verifier {
            let signature = match entry.seal().signature() {
                Some(encoded) => {
                    Some(hex::decode(encoded).map_err(|_| BreakReason::SignatureInvalid)?)
                }
                None => None,
            };
            if !verifier.verify(
                entry.seal().sealing_authority(),
                &computed,
                signature.as_deref(),
            ) {
                return Err(BreakReason::SignatureInvalid);
            }
        }
        Ok(())
    }
}

/// Recompute a chain from genesis, hash linkage only.
pub fn verify_chain(entries: &[LedgerEntry]) -> ChainStatus {
    ChainVerifier::new().verify(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{AuthorityProof, ExecutionResult};
    use crate::ledger::ForensicLedger;
    use crate::seal::{KeyedDigestSealer, UnsignedSealer};
    use holdgate_types::{
        Clock, DomainTag, IntentState, ManualClock, NullSink, ProposedIntent, Rationale,
        SessionId, TargetAction,
    };
    use proptest::prelude::*;
    use serde_json::Value;
    use std::sync::Arc;

    fn sealed_chain(n: usize) -> Vec<LedgerEntry> {
        sealed_chain_with(n, Arc::new(UnsignedSealer::default()))
    }

    fn sealed_chain_with(n: usize, signer: Arc<dyn crate::SealSigner>) -> Vec<LedgerEntry> {
        let clock = Arc::new(ManualClock::new());
        let ledger = ForensicLedger::new(signer, clock.clone(), Arc::new(NullSink));
        for i in 0..n {
            clock.advance(1_000);
            let intent = ProposedIntent::builder(
                DomainTag::new("document.edit").unwrap(),
                TargetAction::new("insert_text", format!("doc://draft/{i}")),
            )
            .rationale(
                Rationale::new("perception", format!("insert paragraph {i}"), 0.75).unwrap(),
            )
            .build()
            .unwrap();
            let authority = AuthorityProof::hold(
                SessionId::new(format!("s-{i}")),
                400 + i as u64,
                vec![
                    IntentState::VisibleGhost,
                    IntentState::Holding,
                    IntentState::PreviewArmed,
                    IntentState::ConfirmReady,
                    IntentState::Executed,
                ],
                clock.stamp(),
            );
            let execution =
                ExecutionResult::success(intent.domain().clone(), 5, format!("out-{i}").as_bytes());
            ledger.seal(&intent, authority, execution).unwrap();
        }
        ledger.entries().unwrap()
    }

    fn to_values(entries: &[LedgerEntry]) -> Vec<Value> {
        entries
            .iter()
            .map(|e| serde_json::to_value(e).unwrap())
            .collect()
    }

    fn from_values(values: Vec<Value>) -> Vec<LedgerEntry> {
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).unwrap())
            .collect()
    }

    fn flip_hex(s: &str, at: usize) -> String {
        s.char_indices()
            .map(|(i, c)| {
                if i == at {
                    if c == '0' {
                        '1'
                    } else {
                        '0'
                    }
                } else {
                    c
                }
            })
            .collect()
    }

    fn flip_letter(s: &str, at: usize) -> String {
        let at = at % s.len();
        s.char_indices()
            .map(|(i, c)| if i == at { if c == 'x' { 'y' } else { 'x' } } else { c })
            .collect()
    }

    fn mutate(value: &mut Value, kind: u8, at: usize) {
        match kind {
            0 => {
                let sid = value["session_id"].as_str().unwrap().to_string();
                value["session_id"] = Value::String(flip_letter(&sid, at));
            }
            1 => {
                let held = value["body"]["authority"]["hold_duration_ms"].as_u64().unwrap();
                value["body"]["authority"]["hold_duration_ms"] = Value::from(held + 1);
            }
            2 => {
                let text = value["rationale"]["description"].as_str().unwrap().to_string();
                value["rationale"]["description"] = Value::String(flip_letter(&text, at));
            }
            3 => {
                value["rationale"]["confidence"] = Value::from(0.125);
            }
            4 => {
                let hash = value["seal"]["entry_hash"].as_str().unwrap().to_string();
                value["seal"]["entry_hash"] = Value::String(flip_hex(&hash, at % 64));
            }
            5 => {
                let hash = value["seal"]["previous_hash"].as_str().unwrap().to_string();
                value["seal"]["previous_hash"] = Value::String(flip_hex(&hash, at % 64));
            }
            6 => {
                value["body"]["execution"]["status"] = Value::String("FAILED".into());
            }
            _ => {
                value["seal"]["sealing_authority"] = Value::String("impostor".into());
            }
        }
    }

    #[test]
    fn empty_chain_is_valid() {
        assert_eq!(
            verify_chain(&[]),
            ChainStatus::Valid {
                entries: 0,
                head: GENESIS
            }
        );
    }

    #[test]
    fn sealed_chain_is_valid() {
        let entries = sealed_chain(5);
        let status = verify_chain(&entries);
        assert_eq!(
            status,
            ChainStatus::Valid {
                entries: 5,
                head: *entries[4].entry_hash()
            }
        );
        assert!(entries[0].previous_hash().is_genesis());
    }

    #[test]
    fn deletion_detected_at_gap() {
        let mut entries = sealed_chain(4);
        entries.remove(1);
        assert_eq!(
            verify_chain(&entries),
            ChainStatus::BrokenAt {
                index: 1,
                reason: BreakReason::IndexOutOfSequence { found: 2 }
            }
        );
    }

    #[test]
    fn reordering_detected() {
        let mut entries = sealed_chain(4);
        entries.swap(2, 3);
        assert!(matches!(
            verify_chain(&entries),
            ChainStatus::BrokenAt { index: 2, .. }
        ));
    }

    #[test]
    fn reindexed_deletion_still_breaks_linkage() {
        let mut values = to_values(&sealed_chain(3));
        values.remove(1);
        values[1]["index"] = Value::from(1u64);
        assert_eq!(
            verify_chain(&from_values(values)),
            ChainStatus::BrokenAt {
                index: 1,
                reason: BreakReason::PreviousHashMismatch
            }
        );
    }

    #[test]
    fn tail_truncation_needs_head() {
        let entries = sealed_chain(4);
        let head = ChainHead {
            length: 4,
            digest: *entries[3].entry_hash(),
        };
        let truncated = &entries[..3];
        assert!(verify_chain(truncated).is_valid());
        assert_eq!(
            ChainVerifier::new().with_head(head).verify(truncated),
            ChainStatus::BrokenAt {
                index: 3,
                reason: BreakReason::Truncated { expected: 4 }
            }
        );
        assert!(ChainVerifier::new().with_head(head).verify(&entries).is_valid());
    }

    #[test]
    fn signatures_checked_when_verifier_given() {
        let sealer = Arc::new(KeyedDigestSealer::new("desk", [3u8; 32]));
        let entries = sealed_chain_with(3, sealer.clone());
        assert!(ChainVerifier::new()
            .with_seal_verifier(sealer.as_ref())
            .verify(&entries)
            .is_valid());

        let wrong_key = KeyedDigestSealer::new("desk", [4u8; 32]);
        assert_eq!(
            ChainVerifier::new()
                .with_seal_verifier(&wrong_key)
                .verify(&entries),
            ChainStatus::BrokenAt {
                index: 0,
                reason: BreakReason::SignatureInvalid
            }
        );
    }

    #[test]
    fn stripped_signature_detected() {
        let sealer = Arc::new(KeyedDigestSealer::new("desk", [3u8; 32]));
        let mut values = to_values(&sealed_chain_with(2, sealer.clone()));
        values[1]["seal"]["signature"] = Value::Null;
        let entries = from_values(values);
        assert!(verify_chain(&entries).is_valid());
        assert_eq!(
            ChainVerifier::new()
                .with_seal_verifier(sealer.as_ref())
                .verify(&entries),
            ChainStatus::BrokenAt {
                index: 1,
                reason: BreakReason::SignatureInvalid
            }
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn any_single_field_mutation_breaks_at_that_index(
            len in 1usize..7,
            target in 0usize..7,
            kind in 0u8..8,
            at in 0usize..64,
        ) {
            let target = target % len;
            let mut values = to_values(&sealed_chain(len));
            mutate(&mut values[target], kind, at);
            let status = verify_chain(&from_values(values));
            prop_assert!(
                matches!(status, ChainStatus::BrokenAt { index, .. } if index == target as u64),
                "expected break at {}, got {:?}", target, status
            );
        }
    }
}
