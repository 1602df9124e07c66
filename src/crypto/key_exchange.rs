//! ECDHE for the TLS 1.3 `key_share` extension.
//!
//! The server answers one client share with a fresh ephemeral key and
//! derives the 32-byte shared secret. For secp256r1 the secret is the
//! x-coordinate of the shared point (RFC 8446 section 7.4.2).

use p256::elliptic_curve::sec1::ToEncodedPoint;

use crate::error::{Error, HandshakeError};
use crate::transport::Rng;

/// Supported key exchange groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedGroup {
    /// x25519 (0x001d)
    X25519,
    /// secp256r1 (0x0017)
    Secp256r1,
}

impl NamedGroup {
    /// Server preference order.
    pub const PREFERENCE: [NamedGroup; 2] = [NamedGroup::X25519, NamedGroup::Secp256r1];

    pub const fn code(self) -> u16 {
        match self {
            NamedGroup::X25519 => 0x001d,
            NamedGroup::Secp256r1 => 0x0017,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::PREFERENCE.into_iter().find(|g| g.code() == code)
    }
}

/// Result of answering a client key share.
pub struct ServerKeyShare {
    pub group: NamedGroup,
    /// Public key sent in ServerHello (32 bytes, or 65 for an uncompressed P-256 point).
    pub public: Vec<u8>,
    pub shared_secret: [u8; 32],
}

impl core::fmt::Debug for ServerKeyShare {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ServerKeyShare")
            .field("group", &self.group)
            .field("public", &self.public.len())
            .finish_non_exhaustive()
    }
}

/// Generate an ephemeral key for `group` and agree with `client_public`.
pub fn respond(
    group: NamedGroup,
    client_public: &[u8],
    rng: &mut dyn Rng,
) -> Result<ServerKeyShare, Error> {
    match group {
        NamedGroup::X25519 => {
            let peer: [u8; 32] = client_public
                .try_into()
                .map_err(|_| HandshakeError::Decode)?;
            let mut seed = [0u8; 32];
            rng.fill(&mut seed);
            let secret = x25519_dalek::StaticSecret::from(seed);
            let public = x25519_dalek::PublicKey::from(&secret);
            let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(peer));
            // low-order client points give an all-zero secret (RFC 8446 section 7.4.2)
            if !shared.was_contributory() {
                return Err(HandshakeError::IllegalParameter.into());
            }
            Ok(ServerKeyShare {
                group,
                public: public.as_bytes().to_vec(),
                shared_secret: *shared.as_bytes(),
            })
        }
        NamedGroup::Secp256r1 => {
            let peer = p256::PublicKey::from_sec1_bytes(client_public)
                .map_err(|_| HandshakeError::Decode)?;
            let secret = loop {
                let mut seed = [0u8; 32];
                rng.fill(&mut seed);
                // Rejects zero and values above the group order; retry.
                if let Ok(secret) = p256::SecretKey::from_slice(&seed) {
                    break secret;
                }
            };
            let public = secret.public_key().to_encoded_point(false);
            let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
            let mut shared_secret = [0u8; 32];
            shared_secret.copy_from_slice(shared.raw_secret_bytes());
            Ok(ServerKeyShare {
                group,
                public: public.as_bytes().to_vec(),
                shared_secret,
            })
        }
    }
}
