//! Cryptographic traits and implementations for QUIC packet protection.
//!
//! QUIC needs several crypto primitives: AEAD for packet encryption,
//! HKDF for key derivation, and header protection. The negotiated
//! [`CipherSuite`] picks the concrete implementations at runtime, and
//! [`PacketKeys`] bundles them for one direction of one epoch.

pub mod key_exchange;
pub mod key_schedule;
pub mod rustcrypto;
pub mod sign;

use hmac::Mac;
use sha2::Digest;

use crate::error::Error;

/// Tag length shared by AES-128-GCM and AES-256-GCM.
pub const TAG_LEN: usize = 16;

/// In-place AEAD with a 12-byte nonce and a trailing [`TAG_LEN`] tag.
pub trait Aead {
    fn key_len(&self) -> usize;

    /// Seals `buf[..payload_len]`, appending the tag. Returns the sealed length.
    fn seal_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        payload_len: usize,
    ) -> Result<usize, Error>;

    /// Opens `buf[..ciphertext_len]` (tag included). Returns the plaintext length.
    fn open_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        ciphertext_len: usize,
    ) -> Result<usize, Error>;
}

/// RFC 5869 extract and expand, object safe so suites can return `&'static dyn Hkdf`.
pub trait Hkdf {
    fn hash_len(&self) -> usize;

    /// `prk` must hold at least `hash_len()` bytes.
    fn extract(&self, salt: &[u8], ikm: &[u8], prk: &mut [u8]);

    fn expand(&self, prk: &[u8], info: &[u8], okm: &mut [u8]) -> Result<(), Error>;
}

/// Header protection mask source (RFC 9001 section 5.4).
///
/// `mask[0]` covers the low bits of the first byte, `mask[1..5]` the
/// packet number.
pub trait HeaderProtection {
    fn mask(&self, sample: &[u8; 16]) -> [u8; 5];
}

/// Largest hash output of any supported suite (SHA-384).
pub const MAX_HASH_LEN: usize = 48;

/// A traffic secret, finished key or hash output.
pub type Secret = heapless::Vec<u8, MAX_HASH_LEN>;

/// Encryption level: determines which keys to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Level {
    Initial,
    Handshake,
    /// 1-RTT application data.
    Application,
}

impl Level {
    pub const ALL: [Level; 3] = [Level::Initial, Level::Handshake, Level::Application];

    pub const fn index(self) -> usize {
        match self {
            Level::Initial => 0,
            Level::Handshake => 1,
            Level::Application => 2,
        }
    }
}

/// TLS 1.3 cipher suites this server negotiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherSuite {
    /// TLS_AES_128_GCM_SHA256 (0x1301)
    Aes128GcmSha256,
    /// TLS_AES_256_GCM_SHA384 (0x1302)
    Aes256GcmSha384,
}

impl CipherSuite {
    /// Server preference order; the first one the client offers wins.
    pub const PREFERENCE: [CipherSuite; 2] =
        [CipherSuite::Aes128GcmSha256, CipherSuite::Aes256GcmSha384];

    pub const fn code(self) -> u16 {
        match self {
            CipherSuite::Aes128GcmSha256 => 0x1301,
            CipherSuite::Aes256GcmSha384 => 0x1302,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::PREFERENCE.into_iter().find(|s| s.code() == code)
    }

    /// AEAD key length.
    pub const fn key_len(self) -> usize {
        match self {
            CipherSuite::Aes128GcmSha256 => 16,
            CipherSuite::Aes256GcmSha384 => 32,
        }
    }

    pub const fn hash_len(self) -> usize {
        match self {
            CipherSuite::Aes128GcmSha256 => 32,
            CipherSuite::Aes256GcmSha384 => 48,
        }
    }

    pub fn hkdf(self) -> &'static dyn Hkdf {
        match self {
            CipherSuite::Aes128GcmSha256 => &rustcrypto::HkdfSha256,
            CipherSuite::Aes256GcmSha384 => &rustcrypto::HkdfSha384,
        }
    }

    /// Hash `data` with the suite hash.
    pub fn hash(self, data: &[u8]) -> Secret {
        let mut out = Secret::new();
        // Both digests fit in MAX_HASH_LEN.
        let _ = match self {
            CipherSuite::Aes128GcmSha256 => out.extend_from_slice(&sha2::Sha256::digest(data)),
            CipherSuite::Aes256GcmSha384 => out.extend_from_slice(&sha2::Sha384::digest(data)),
        };
        out
    }

    /// HMAC of `data` under `key` with the suite hash.
    pub fn hmac(self, key: &[u8], data: &[u8]) -> Result<Secret, Error> {
        let tag = match self {
            CipherSuite::Aes128GcmSha256 => {
                let mut mac =
                    hmac::Hmac::<sha2::Sha256>::new_from_slice(key).map_err(|_| Error::Crypto)?;
                mac.update(data);
                Secret::from_slice(&mac.finalize().into_bytes())
            }
            CipherSuite::Aes256GcmSha384 => {
                let mut mac =
                    hmac::Hmac::<sha2::Sha384>::new_from_slice(key).map_err(|_| Error::Crypto)?;
                mac.update(data);
                Secret::from_slice(&mac.finalize().into_bytes())
            }
        };
        tag.map_err(|_| Error::Crypto)
    }

    /// Constant-time check of an HMAC tag.
    pub fn verify_hmac(self, key: &[u8], data: &[u8], tag: &[u8]) -> bool {
        match self {
            CipherSuite::Aes128GcmSha256 => hmac::Hmac::<sha2::Sha256>::new_from_slice(key)
                .map(|mut mac| {
                    mac.update(data);
                    mac.verify_slice(tag).is_ok()
                })
                .unwrap_or(false),
            CipherSuite::Aes256GcmSha384 => hmac::Hmac::<sha2::Sha384>::new_from_slice(key)
                .map(|mut mac| {
                    mac.update(data);
                    mac.verify_slice(tag).is_ok()
                })
                .unwrap_or(false),
        }
    }
}

/// Packet protection keys for one direction at one encryption level.
pub struct PacketKeys {
    aead: Box<dyn Aead>,
    header_protection: Box<dyn HeaderProtection>,
    /// Nonce base, XORed with the packet number to form the per-packet nonce.
    iv: [u8; 12],
}

impl core::fmt::Debug for PacketKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PacketKeys")
            .field("key_len", &self.aead.key_len())
            .finish_non_exhaustive()
    }
}

impl PacketKeys {
    /// Build keys from raw material. The AEAD is chosen by key length.
    pub fn new(key: &[u8], iv: [u8; 12], hp_key: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            aead: rustcrypto::aead_for_key(key)?,
            header_protection: rustcrypto::header_protection_for_key(hp_key)?,
            iv,
        })
    }

    /// Derive `quic key`/`quic iv`/`quic hp` from a traffic secret.
    pub fn from_secret(suite: CipherSuite, secret: &[u8]) -> Result<Self, Error> {
        let key_len = suite.key_len();
        let mut key = [0u8; 32];
        let mut iv = [0u8; 12];
        let mut hp = [0u8; 32];
        key_schedule::derive_packet_keys(
            suite.hkdf(),
            secret,
            &mut key[..key_len],
            &mut iv,
            &mut hp[..key_len],
        )?;
        Self::new(&key[..key_len], iv, &hp[..key_len])
    }

    /// Compute the AEAD nonce for a given packet number.
    ///
    /// The nonce is formed by XORing the IV with the packet number
    /// (left-padded to 12 bytes).
    pub fn nonce(&self, packet_number: u64) -> [u8; 12] {
        let mut nonce = self.iv;
        for (n, p) in nonce[4..].iter_mut().zip(packet_number.to_be_bytes()) {
            *n ^= p;
        }
        nonce
    }

    pub fn seal(
        &self,
        packet_number: u64,
        aad: &[u8],
        buf: &mut [u8],
        payload_len: usize,
    ) -> Result<usize, Error> {
        self.aead
            .seal_in_place(&self.nonce(packet_number), aad, buf, payload_len)
    }

    pub fn open(
        &self,
        packet_number: u64,
        aad: &[u8],
        buf: &mut [u8],
        ciphertext_len: usize,
    ) -> Result<usize, Error> {
        self.aead
            .open_in_place(&self.nonce(packet_number), aad, buf, ciphertext_len)
    }

    pub fn header_mask(&self, sample: &[u8; 16]) -> [u8; 5] {
        self.header_protection.mask(sample)
    }
}

/// Read and write keys of one epoch, from the server's point of view.
#[derive(Debug)]
pub struct KeyPair {
    /// Opens packets from the client.
    pub read: PacketKeys,
    /// Seals packets to the client.
    pub write: PacketKeys,
}

impl KeyPair {
    /// Initial keys derived from the client's original DCID.
    pub fn initial(original_dcid: &[u8]) -> Result<Self, Error> {
        let (client, server) = key_schedule::derive_initial_keys(original_dcid)?;
        Ok(Self {
            read: client,
            write: server,
        })
    }

    pub fn from_secrets(
        suite: CipherSuite,
        client_secret: &[u8],
        server_secret: &[u8],
    ) -> Result<Self, Error> {
        Ok(Self {
            read: PacketKeys::from_secret(suite, client_secret)?,
            write: PacketKeys::from_secret(suite, server_secret)?,
        })
    }
}
