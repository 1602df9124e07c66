//! Server signatures for TLS 1.3 CertificateVerify.
//!
//! The private key is loaded from PKCS#8 DER. Its type decides the
//! signature scheme:
//!
//! | Key type     | Scheme                       | Code   |
//! |--------------|------------------------------|--------|
//! | RSA          | rsa_pss_rsae_sha256          | 0x0804 |
//! | EC P-256     | ecdsa_secp256r1_sha256       | 0x0403 |
//! | Ed25519      | ed25519                      | 0x0807 |

use crate::error::{Error, HandshakeError};

pub const RSA_PSS_RSAE_SHA256: u16 = 0x0804;
pub const ECDSA_SECP256R1_SHA256: u16 = 0x0403;
pub const ED25519: u16 = 0x0807;

/// Context string for server CertificateVerify (RFC 8446 section 4.4.3).
const SERVER_CONTEXT: &[u8] = b"TLS 1.3, server CertificateVerify";

/// Build the content to be signed for the server CertificateVerify:
///   64 bytes of 0x20 + context string + 0x00 + transcript hash
pub fn certificate_verify_content(transcript_hash: &[u8]) -> Vec<u8> {
    let mut content = Vec::with_capacity(64 + SERVER_CONTEXT.len() + 1 + transcript_hash.len());
    content.resize(64, 0x20);
    content.extend_from_slice(SERVER_CONTEXT);
    content.push(0x00);
    content.extend_from_slice(transcript_hash);
    content
}

/// A certificate private key.
pub enum SigningKey {
    Ed25519(ed25519_dalek::SigningKey),
    EcdsaP256(p256::ecdsa::SigningKey),
    #[cfg(feature = "rsa-pss")]
    RsaPss(Box<rsa::pss::BlindedSigningKey<sha2::Sha256>>),
}

impl core::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SigningKey({:#06x})", self.scheme())
    }
}

impl SigningKey {
    /// Parse a PKCS#8 DER private key, trying each supported key type.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self, Error> {
        {
            use p256::pkcs8::DecodePrivateKey;
            if let Ok(key) = p256::ecdsa::SigningKey::from_pkcs8_der(der) {
                return Ok(SigningKey::EcdsaP256(key));
            }
        }
        {
            use ed25519_dalek::pkcs8::DecodePrivateKey;
            if let Ok(key) = ed25519_dalek::SigningKey::from_pkcs8_der(der) {
                return Ok(SigningKey::Ed25519(key));
            }
        }
        #[cfg(feature = "rsa-pss")]
        {
            use rsa::pkcs8::DecodePrivateKey;
            if let Ok(key) = rsa::RsaPrivateKey::from_pkcs8_der(der) {
                return Ok(SigningKey::RsaPss(Box::new(
                    rsa::pss::BlindedSigningKey::<sha2::Sha256>::new(key),
                )));
            }
        }
        Err(HandshakeError::UnsupportedKeyType.into())
    }

    /// Signature scheme code sent in CertificateVerify.
    pub fn scheme(&self) -> u16 {
        match self {
            SigningKey::Ed25519(_) => ED25519,
            SigningKey::EcdsaP256(_) => ECDSA_SECP256R1_SHA256,
            #[cfg(feature = "rsa-pss")]
            SigningKey::RsaPss(_) => RSA_PSS_RSAE_SHA256,
        }
    }

    /// Sign the CertificateVerify content for `transcript_hash`.
    ///
    /// Fails with `NoCompatibleSignatureScheme` when the client did not
    /// advertise this key's scheme in `signature_algorithms`.
    pub fn sign_certificate_verify(
        &self,
        transcript_hash: &[u8],
        client_schemes: &[u16],
    ) -> Result<Vec<u8>, Error> {
        if !client_schemes.contains(&self.scheme()) {
            return Err(HandshakeError::NoCompatibleSignatureScheme.into());
        }
        let content = certificate_verify_content(transcript_hash);
        Ok(match self {
            SigningKey::Ed25519(key) => {
                use ed25519_dalek::Signer;
                key.sign(&content).to_bytes().to_vec()
            }
            SigningKey::EcdsaP256(key) => {
                use p256::ecdsa::signature::Signer;
                let signature: p256::ecdsa::DerSignature = key.sign(&content);
                signature.as_bytes().to_vec()
            }
            #[cfg(feature = "rsa-pss")]
            SigningKey::RsaPss(key) => {
                use rsa::signature::{RandomizedSigner, SignatureEncoding};
                key.sign_with_rng(&mut rand::rngs::OsRng, &content).to_vec()
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_layout() {
        let hash = [0xabu8; 32];
        let content = certificate_verify_content(&hash);
        assert_eq!(content.len(), 64 + 33 + 1 + 32);
        assert!(content[..64].iter().all(|&b| b == 0x20));
        assert_eq!(&content[64..97], SERVER_CONTEXT);
        assert_eq!(content[97], 0);
        assert_eq!(&content[98..], &hash);
    }

    #[test]
    fn ecdsa_signature_verifies() {
        use p256::ecdsa::signature::Verifier;
        let inner = p256::ecdsa::SigningKey::from_slice(&[5u8; 32]).unwrap();
        let verifying = *inner.verifying_key();
        let key = SigningKey::EcdsaP256(inner);
        assert_eq!(key.scheme(), 0x0403);

        let hash = [1u8; 32];
        let sig = key
            .sign_certificate_verify(&hash, &[0x0804, 0x0403])
            .unwrap();
        let sig = p256::ecdsa::DerSignature::try_from(sig.as_slice()).unwrap();
        verifying
            .verify(&certificate_verify_content(&hash), &sig)
            .unwrap();
    }

    #[test]
    fn ed25519_signature_verifies() {
        use ed25519_dalek::Verifier;
        let inner = ed25519_dalek::SigningKey::from_bytes(&[3u8; 32]);
        let verifying = inner.verifying_key();
        let key = SigningKey::Ed25519(inner);

        let hash = [2u8; 48];
        let sig = key.sign_certificate_verify(&hash, &[0x0807]).unwrap();
        let sig = ed25519_dalek::Signature::from_slice(&sig).unwrap();
        verifying
            .verify(&certificate_verify_content(&hash), &sig)
            .unwrap();
    }

    #[test]
    fn scheme_must_be_offered() {
        let key = SigningKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&[3u8; 32]));
        assert_eq!(
            key.sign_certificate_verify(&[0u8; 32], &[0x0403, 0x0804]),
            Err(Error::Handshake(HandshakeError::NoCompatibleSignatureScheme))
        );
    }

    #[test]
    fn garbage_key_rejected() {
        assert_eq!(
            SigningKey::from_pkcs8_der(&[0x30, 0x03, 0x02, 0x01, 0x00]).unwrap_err(),
            Error::Handshake(HandshakeError::UnsupportedKeyType)
        );
    }
}
