//! TLS 1.3 key schedule (RFC 8446 section 7.1).
//!
//! ```text
//!             0
//!             |
//!             v
//!   PSK ->  HKDF-Extract = Early Secret
//!             |
//!             v
//!   ECDHE -> HKDF-Extract = Handshake Secret
//!             |
//!             +-> Derive-Secret(., "c hs traffic", CH..SH)
//!             +-> Derive-Secret(., "s hs traffic", CH..SH)
//!             |
//!             v
//!     0  ->  HKDF-Extract = Master Secret
//!             |
//!             +-> Derive-Secret(., "c ap traffic", CH..SF)
//!             +-> Derive-Secret(., "s ap traffic", CH..SF)
//! ```
//!
//! Every secret is `hash_len` bytes of the negotiated suite.

use crate::crypto::key_schedule::hkdf_expand_label;
use crate::crypto::{CipherSuite, Secret, MAX_HASH_LEN};
use crate::error::Error;

/// Client and server traffic secrets of one epoch.
#[derive(Clone, PartialEq, Eq)]
pub struct TrafficSecrets {
    pub client: Secret,
    pub server: Secret,
}

impl core::fmt::Debug for TrafficSecrets {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TrafficSecrets").finish_non_exhaustive()
    }
}

pub struct TlsKeySchedule {
    suite: CipherSuite,
    early_secret: Secret,
    handshake_secret: Secret,
    master_secret: Secret,
}

impl TlsKeySchedule {
    /// Start the schedule without a PSK: Early Secret = HKDF-Extract(0, 0).
    pub fn new(suite: CipherSuite) -> Self {
        let zeros = [0u8; MAX_HASH_LEN];
        let hash_len = suite.hash_len();
        let early_secret = extract(suite, &zeros[..hash_len], &zeros[..hash_len]);
        Self {
            suite,
            early_secret,
            handshake_secret: Secret::new(),
            master_secret: Secret::new(),
        }
    }

    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    pub fn early_secret(&self) -> &[u8] {
        &self.early_secret
    }

    pub fn handshake_secret(&self) -> &[u8] {
        &self.handshake_secret
    }

    pub fn master_secret(&self) -> &[u8] {
        &self.master_secret
    }

    /// Derive-Secret(secret, label, messages) with the transcript hash
    /// already computed.
    pub fn derive_secret(&self, secret: &[u8], label: &[u8], hash: &[u8]) -> Result<Secret, Error> {
        let mut out = zeroed(self.suite.hash_len());
        hkdf_expand_label(self.suite.hkdf(), secret, label, hash, &mut out)?;
        Ok(out)
    }

    /// Handshake Secret = HKDF-Extract(Derive-Secret(early, "derived", ""), ECDHE).
    pub fn derive_handshake_secret(&mut self, shared_secret: &[u8]) -> Result<(), Error> {
        let empty = self.suite.hash(&[]);
        let salt = self.derive_secret(&self.early_secret, b"derived", &empty)?;
        self.handshake_secret = extract(self.suite, &salt, shared_secret);
        Ok(())
    }

    /// `transcript_hash` covers ClientHello..ServerHello.
    pub fn handshake_traffic_secrets(&self, transcript_hash: &[u8]) -> Result<TrafficSecrets, Error> {
        Ok(TrafficSecrets {
            client: self.derive_secret(&self.handshake_secret, b"c hs traffic", transcript_hash)?,
            server: self.derive_secret(&self.handshake_secret, b"s hs traffic", transcript_hash)?,
        })
    }

    /// Master Secret = HKDF-Extract(Derive-Secret(handshake, "derived", ""), 0).
    pub fn derive_master_secret(&mut self) -> Result<(), Error> {
        let empty = self.suite.hash(&[]);
        let salt = self.derive_secret(&self.handshake_secret, b"derived", &empty)?;
        let zeros = [0u8; MAX_HASH_LEN];
        self.master_secret = extract(self.suite, &salt, &zeros[..self.suite.hash_len()]);
        Ok(())
    }

    /// `transcript_hash` covers ClientHello..server Finished.
    pub fn app_traffic_secrets(&self, transcript_hash: &[u8]) -> Result<TrafficSecrets, Error> {
        Ok(TrafficSecrets {
            client: self.derive_secret(&self.master_secret, b"c ap traffic", transcript_hash)?,
            server: self.derive_secret(&self.master_secret, b"s ap traffic", transcript_hash)?,
        })
    }

    /// finished_key = HKDF-Expand-Label(traffic_secret, "finished", "", Hash.length)
    pub fn finished_key(&self, traffic_secret: &[u8]) -> Result<Secret, Error> {
        self.derive_secret(traffic_secret, b"finished", &[])
    }

    /// verify_data = HMAC(finished_key, transcript_hash)
    pub fn finished_verify_data(
        &self,
        traffic_secret: &[u8],
        transcript_hash: &[u8],
    ) -> Result<Secret, Error> {
        let key = self.finished_key(traffic_secret)?;
        self.suite.hmac(&key, transcript_hash)
    }

    /// Constant-time check of a peer's Finished verify_data.
    pub fn verify_finished(
        &self,
        traffic_secret: &[u8],
        transcript_hash: &[u8],
        verify_data: &[u8],
    ) -> Result<bool, Error> {
        let key = self.finished_key(traffic_secret)?;
        Ok(self.suite.verify_hmac(&key, transcript_hash, verify_data))
    }
}

fn zeroed(len: usize) -> Secret {
    let mut s = Secret::new();
    // len never exceeds MAX_HASH_LEN.
    let _ = s.resize_default(len);
    s
}

fn extract(suite: CipherSuite, salt: &[u8], ikm: &[u8]) -> Secret {
    let mut prk = zeroed(suite.hash_len());
    suite.hkdf().extract(salt, ikm, &mut prk);
    prk
}
