//! Running transcript hash over TLS handshake messages.
//!
//! The hash function follows the negotiated suite, so the transcript is
//! created only once the ClientHello has been parsed and a suite chosen.
//! Intermediate hashes are taken by cloning the running state.

use sha2::{Digest, Sha256, Sha384};

use crate::crypto::{CipherSuite, Secret};

#[derive(Clone)]
enum Hasher {
    Sha256(Sha256),
    Sha384(Sha384),
}

#[derive(Clone)]
pub struct Transcript {
    hasher: Hasher,
    /// Bytes hashed so far.
    len: usize,
}

impl core::fmt::Debug for Transcript {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Transcript").field("len", &self.len).finish()
    }
}

impl Transcript {
    pub fn new(suite: CipherSuite) -> Self {
        let hasher = match suite {
            CipherSuite::Aes128GcmSha256 => Hasher::Sha256(Sha256::new()),
            CipherSuite::Aes256GcmSha384 => Hasher::Sha384(Sha384::new()),
        };
        Self { hasher, len: 0 }
    }

    /// Feed one complete handshake message, header included.
    pub fn update(&mut self, message: &[u8]) {
        match &mut self.hasher {
            Hasher::Sha256(h) => h.update(message),
            Hasher::Sha384(h) => h.update(message),
        }
        self.len += message.len();
    }

    /// Hash of everything fed so far. Does not consume the state.
    pub fn current_hash(&self) -> Secret {
        let mut out = Secret::new();
        let _ = match &self.hasher {
            Hasher::Sha256(h) => out.extend_from_slice(&h.clone().finalize()),
            Hasher::Sha384(h) => out.extend_from_slice(&h.clone().finalize()),
        };
        out
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
