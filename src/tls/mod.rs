//! TLS 1.3 server handshake for QUIC.
//!
//! QUIC uses TLS 1.3 differently from TCP:
//! - No record layer. Handshake messages travel in CRYPTO frames.
//! - No TLS content encryption. QUIC does its own packet protection.
//! - QUIC transport parameters are exchanged as a TLS extension.
//!
//! The engine consumes and produces handshake messages and hands the
//! traffic secrets of each epoch to the connection.

pub mod alert;
pub mod extensions;
pub mod key_schedule;
pub mod messages;
pub mod server;
pub mod transcript;
pub mod transport_params;

pub use alert::AlertDescription;
pub use extensions::TLS13;
pub use key_schedule::{TlsKeySchedule, TrafficSecrets};
pub use messages::ClientHello;
pub use server::{HandshakeState, TlsEvent, TlsServer};
pub use transcript::Transcript;
pub use transport_params::TransportParams;

use crate::crypto::key_exchange::{self, NamedGroup, ServerKeyShare};
use crate::crypto::CipherSuite;
use crate::error::{Error, HandshakeError};
use crate::transport::Rng;

/// Parameters chosen for a ClientHello.
#[derive(Debug)]
pub struct Negotiated {
    pub suite: CipherSuite,
    pub key_share: ServerKeyShare,
}

/// Pick the cipher suite and key exchange group for `hello` and answer
/// its key share.
///
/// Both choices are first-match in server preference order:
/// AES-128-GCM before AES-256-GCM, x25519 before secp256r1. Only groups
/// the client sent a share for are eligible.
pub fn negotiate(hello: &ClientHello, rng: &mut dyn Rng) -> Result<Negotiated, Error> {
    let suite = CipherSuite::PREFERENCE
        .into_iter()
        .find(|s| hello.cipher_suites.contains(&s.code()))
        .ok_or(HandshakeError::UnsupportedCipherSuite)?;

    let (group, share) = NamedGroup::PREFERENCE
        .into_iter()
        .find_map(|g| {
            hello
                .key_shares
                .iter()
                .find(|ks| ks.group == g.code())
                .map(|ks| (g, ks))
        })
        .ok_or(HandshakeError::UnsupportedGroup)?;

    let key_share = key_exchange::respond(group, &share.key_exchange, rng)?;
    Ok(Negotiated { suite, key_share })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::messages::KeyShareEntry;
    use crate::transport::SystemRng;

    fn hello(suites: &[u16], shares: Vec<KeyShareEntry>) -> ClientHello {
        ClientHello {
            cipher_suites: suites.to_vec(),
            key_shares: shares,
            ..ClientHello::default()
        }
    }

    fn x25519_share() -> KeyShareEntry {
        let secret = x25519_dalek::StaticSecret::from([0x42; 32]);
        KeyShareEntry {
            group: 0x001d,
            key_exchange: x25519_dalek::PublicKey::from(&secret).as_bytes().to_vec(),
        }
    }

    #[test]
    fn server_preference_wins() {
        let n = negotiate(&hello(&[0x1302, 0x1301], vec![x25519_share()]), &mut SystemRng).unwrap();
        assert_eq!(n.suite, CipherSuite::Aes128GcmSha256);
        assert_eq!(n.key_share.group, NamedGroup::X25519);
        assert_eq!(n.key_share.public.len(), 32);
    }

    #[test]
    fn sha384_only_client() {
        let n = negotiate(&hello(&[0x1302], vec![x25519_share()]), &mut SystemRng).unwrap();
        assert_eq!(n.suite, CipherSuite::Aes256GcmSha384);
    }

    #[test]
    fn unsupported_suite_and_group() {
        let err = negotiate(&hello(&[0x1303], vec![x25519_share()]), &mut SystemRng).unwrap_err();
        assert_eq!(err, HandshakeError::UnsupportedCipherSuite.into());

        let ffdhe = KeyShareEntry {
            group: 0x0100,
            key_exchange: vec![1; 256],
        };
        let err = negotiate(&hello(&[0x1301], vec![ffdhe]), &mut SystemRng).unwrap_err();
        assert_eq!(err, HandshakeError::UnsupportedGroup.into());
    }
}
