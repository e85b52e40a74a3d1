//! Pluggable seal signatures.
//!
//! No signature algorithm ships here. `UnsignedSealer` records the sealing
//! authority only; `KeyedDigestSealer` is a BLAKE3 keyed MAC for deployments
//! that share a secret between writer and auditor.

use crate::digest::Digest;
use crate::error::LedgerError;

pub trait SealSigner: Send + Sync {
    /// Identifier recorded as `sealing_authority` on every entry.
    fn authority(&self) -> &str;

    /// Signature over an entry hash, or `None` when unsigned. An error
    /// aborts the append; the chain is left as it was.
    fn sign(&self, entry_hash: &Digest) -> Result<Option<Vec<u8>>, LedgerError>;
}

pub trait SealVerifier: Send + Sync {
    fn verify(&self, authority: &str, entry_hash: &Digest, signature: Option<&[u8]>) -> bool;
}

#[derive(Clone, Debug)]
pub struct UnsignedSealer {
    authority: String,
}

impl UnsignedSealer {
    pub fn new(authority: impl Into<String>) -> Self {
        Self {
            authority: authority.into(),
        }
    }
}

impl Default for UnsignedSealer {
    fn default() -> Self {
        Self::new("holdgate")
    }
}

impl SealSigner for UnsignedSealer {
    fn authority(&self) -> &str {
        &self.authority
    }

    fn sign(&self, _entry_hash: &Digest) -> Result<Option<Vec<u8>>, LedgerError> {
        Ok(None)
    }
}

impl SealVerifier for UnsignedSealer {
    fn verify(&self, authority: &str, _entry_hash: &Digest, signature: Option<&[u8]>) -> bool {
        authority == self.authority && signature.is_none()
    }
}

pub struct KeyedDigestSealer {
    authority: String,
    key: [u8; 32],
}

impl KeyedDigestSealer {
    pub fn new(authority: impl Into<String>, key: [u8; 32]) -> Self {
        Self {
            authority: authority.into(),
            key,
        }
    }

    fn mac(&self, entry_hash: &Digest) -> [u8; 32] {
        *blake3::keyed_hash(&self.key, entry_hash.as_bytes()).as_bytes()
    }
}

impl SealSigner for KeyedDigestSealer {
    fn authority(&self) -> &str {
        &self.authority
    }

    fn sign(&self, entry_hash: &Digest) -> Result<Option<Vec<u8>>, LedgerError> {
        Ok(Some(self.mac(entry_hash).to_vec()))
    }
}

impl SealVerifier for KeyedDigestSealer {
    fn verify(&self, authority: &str, entry_hash: &Digest, signature: Option<&[u8]>) -> bool {
        let Some(signature) = signature else {
            return false;
        };
        authority == self.authority && signature == self.mac(entry_hash).as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsigned_rejects_signatures() {
        let sealer = UnsignedSealer::new("desk");
        let hash = Digest::of(b"entry");
        assert!(sealer.sign(&hash).unwrap().is_none());
        assert!(sealer.verify("desk", &hash, None));
        assert!(!sealer.verify("desk", &hash, Some(b"sig")));
        assert!(!sealer.verify("other", &hash, None));
    }

    #[test]
    fn keyed_sealer_roundtrip() {
        let sealer = KeyedDigestSealer::new("desk", [7u8; 32]);
        let hash = Digest::of(b"entry");
        let sig = sealer.sign(&hash).unwrap().unwrap();
        assert!(sealer.verify("desk", &hash, Some(&sig)));
        assert!(!sealer.verify("desk", &Digest::of(b"other"), Some(&sig)));
        assert!(!sealer.verify("desk", &hash, None));

        let stranger = KeyedDigestSealer::new("desk", [8u8; 32]);
        assert!(!stranger.verify("desk", &hash, Some(&sig)));
    }
}
