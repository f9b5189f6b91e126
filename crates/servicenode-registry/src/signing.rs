//! Signed gossip messages.
//!
//! Every gossiped message (announcement, ping) signs a text message: either
//! the legacy concatenated-field string or the hex of its structured
//! signature hash. The [`SignatureDomain`] tag travels with the signature so
//! verification rebuilds the same text the signer used.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::hash::HashWriter;
use crate::types::Hash256;

/// Prefix mixed into every signed message digest.
pub const MESSAGE_MAGIC: &str = "Service Node Signed Message:\n";

/// Length of the canonical pay-to-key-id script.
pub const PAYOUT_SCRIPT_LEN: usize = 25;

/// Which message text a signature covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureDomain {
    /// Concatenated human-readable fields (messages signed before the upgrade).
    LegacyString,
    /// Hex of the structured signature hash.
    #[default]
    HashDigest,
}

// ── Keys ─────────────────────────────────────────────────────────────

/// Public key bytes for a 32-byte secret seed.
pub fn public_key(secret_seed: &[u8; 32]) -> Vec<u8> {
    SigningKey::from_bytes(secret_seed)
        .verifying_key()
        .to_bytes()
        .to_vec()
}

fn verifying_key(pubkey: &[u8]) -> Option<VerifyingKey> {
    let bytes: [u8; 32] = pubkey.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

/// 20-byte key id (truncated SHA-256), `None` for bytes that are not a key.
pub fn key_id(pubkey: &[u8]) -> Option<[u8; 20]> {
    verifying_key(pubkey)?;
    let digest = Sha256::digest(pubkey);
    let mut id = [0u8; 20];
    id.copy_from_slice(&digest[..20]);
    Some(id)
}

/// Hex key id, or an empty string for invalid keys.
pub fn key_id_hex(pubkey: &[u8]) -> String {
    key_id(pubkey).map(hex::encode).unwrap_or_default()
}

/// Pay-to-key-id script: `OP_DUP OP_HASH160 <20> id OP_EQUALVERIFY OP_CHECKSIG`.
///
/// Empty for bytes that do not decode to a public key.
pub fn payout_script(pubkey: &[u8]) -> Vec<u8> {
    let Some(id) = key_id(pubkey) else {
        return Vec::new();
    };
    let mut script = Vec::with_capacity(PAYOUT_SCRIPT_LEN);
    script.extend_from_slice(&[0x76, 0xa9, 0x14]);
    script.extend_from_slice(&id);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

// ── Messages ─────────────────────────────────────────────────────────

/// Digest actually signed for a text message.
pub fn message_digest(message: &str) -> Hash256 {
    HashWriter::new()
        .write_bytes(MESSAGE_MAGIC.as_bytes())
        .write_bytes(message.as_bytes())
        .finish()
}

/// Sign a text message.
pub fn sign_message(message: &str, secret_seed: &[u8; 32]) -> Vec<u8> {
    let key = SigningKey::from_bytes(secret_seed);
    key.sign(message_digest(message).as_bytes()).to_bytes().to_vec()
}

/// Verify a text message signature. Malformed keys or signatures verify false.
pub fn verify_message(pubkey: &[u8], signature: &[u8], message: &str) -> bool {
    let Some(key) = verifying_key(pubkey) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    let sig = Signature::from_bytes(&sig_bytes);
    key.verify_strict(message_digest(message).as_bytes(), &sig)
        .is_ok()
}

/// A gossiped message carrying a signature over one of two domains.
pub trait SignedMessage {
    /// Structured hash signed in the [`SignatureDomain::HashDigest`] domain.
    fn signature_hash(&self) -> Hash256;

    /// Concatenated-field text signed in the [`SignatureDomain::LegacyString`] domain.
    fn legacy_message(&self) -> String;

    fn signature_domain(&self) -> SignatureDomain;

    fn signature(&self) -> &[u8];

    fn set_signature(&mut self, signature: Vec<u8>, domain: SignatureDomain);

    /// The exact text the signature covers.
    fn signed_text(&self) -> String {
        match self.signature_domain() {
            SignatureDomain::HashDigest => self.signature_hash().to_hex(),
            SignatureDomain::LegacyString => self.legacy_message(),
        }
    }

    /// Signature digest for the message's current domain.
    fn signature_digest(&self) -> Hash256 {
        message_digest(&self.signed_text())
    }

    /// Sign in the hash domain (new messages always use it).
    fn sign(&mut self, secret_seed: &[u8; 32]) {
        // the hash may depend on the domain tag, switch first
        self.set_signature(Vec::new(), SignatureDomain::HashDigest);
        let text = self.signature_hash().to_hex();
        self.set_signature(sign_message(&text, secret_seed), SignatureDomain::HashDigest);
    }

    /// Verify against `pubkey` using the domain the message carries.
    fn verify(&self, pubkey: &[u8]) -> bool {
        verify_message(pubkey, self.signature(), &self.signed_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Note {
        body: String,
        sig: Vec<u8>,
        domain: SignatureDomain,
    }

    impl SignedMessage for Note {
        fn signature_hash(&self) -> Hash256 {
            HashWriter::new().write_bytes(self.body.as_bytes()).finish()
        }
        fn legacy_message(&self) -> String {
            self.body.clone()
        }
        fn signature_domain(&self) -> SignatureDomain {
            self.domain
        }
        fn signature(&self) -> &[u8] {
            &self.sig
        }
        fn set_signature(&mut self, signature: Vec<u8>, domain: SignatureDomain) {
            self.sig = signature;
            self.domain = domain;
        }
    }

    fn note(body: &str) -> Note {
        Note {
            body: body.into(),
            sig: Vec::new(),
            domain: SignatureDomain::LegacyString,
        }
    }

    #[test]
    fn sign_switches_to_hash_domain_and_verifies() {
        let seed = [7u8; 32];
        let mut n = note("hello");
        n.sign(&seed);
        assert_eq!(n.signature_domain(), SignatureDomain::HashDigest);
        assert!(n.verify(&public_key(&seed)));
    }

    #[test]
    fn legacy_domain_signature_verifies() {
        let seed = [8u8; 32];
        let mut n = note("legacy body");
        let sig = sign_message(&n.legacy_message(), &seed);
        n.set_signature(sig, SignatureDomain::LegacyString);
        assert!(n.verify(&public_key(&seed)));
    }

    #[test]
    fn domain_mismatch_fails() {
        let seed = [9u8; 32];
        let mut n = note("body");
        n.sign(&seed);
        n.domain = SignatureDomain::LegacyString;
        assert!(!n.verify(&public_key(&seed)));
    }

    #[test]
    fn wrong_key_fails() {
        let mut n = note("body");
        n.sign(&[1u8; 32]);
        assert!(!n.verify(&public_key(&[2u8; 32])));
    }

    #[test]
    fn malformed_inputs_verify_false() {
        let pk = public_key(&[3u8; 32]);
        assert!(!verify_message(&pk, &[0u8; 10], "x"));
        assert!(!verify_message(&[1, 2, 3], &[0u8; 64], "x"));
    }

    #[test]
    fn payout_script_is_standard_length() {
        let pk = public_key(&[4u8; 32]);
        let script = payout_script(&pk);
        assert_eq!(script.len(), PAYOUT_SCRIPT_LEN);
        assert_eq!(&script[..3], &[0x76, 0xa9, 0x14]);
        assert_eq!(&script[23..], &[0x88, 0xac]);
    }

    #[test]
    fn invalid_key_has_no_script() {
        assert!(payout_script(&[0u8; 5]).is_empty());
        assert!(key_id(&[]).is_none());
        assert_eq!(key_id_hex(&[1]), "");
    }
}
