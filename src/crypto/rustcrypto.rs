//! RustCrypto-backed implementations of the QUIC crypto traits.

use aes_gcm::aead::consts::{U12, U16};
use aes_gcm::aead::{AeadInPlace, Nonce, Tag};

use crate::crypto::{Aead as AeadTrait, HeaderProtection, Hkdf as HkdfTrait, TAG_LEN};
use crate::error::Error;

// ---- HKDF ----

/// HKDF using SHA-256 (via the `hkdf` crate).
pub struct HkdfSha256;

impl HkdfTrait for HkdfSha256 {
    fn hash_len(&self) -> usize {
        32
    }

    fn extract(&self, salt: &[u8], ikm: &[u8], prk: &mut [u8]) {
        let (out, _) = hkdf::Hkdf::<sha2::Sha256>::extract(Some(salt), ikm);
        prk[..32].copy_from_slice(&out);
    }

    fn expand(&self, prk: &[u8], info: &[u8], okm: &mut [u8]) -> Result<(), Error> {
        let hk = hkdf::Hkdf::<sha2::Sha256>::from_prk(prk).map_err(|_| Error::Crypto)?;
        hk.expand(info, okm).map_err(|_| Error::Crypto)
    }
}

/// HKDF using SHA-384, for TLS_AES_256_GCM_SHA384.
pub struct HkdfSha384;

impl HkdfTrait for HkdfSha384 {
    fn hash_len(&self) -> usize {
        48
    }

    fn extract(&self, salt: &[u8], ikm: &[u8], prk: &mut [u8]) {
        let (out, _) = hkdf::Hkdf::<sha2::Sha384>::extract(Some(salt), ikm);
        prk[..48].copy_from_slice(&out);
    }

    fn expand(&self, prk: &[u8], info: &[u8], okm: &mut [u8]) -> Result<(), Error> {
        let hk = hkdf::Hkdf::<sha2::Sha384>::from_prk(prk).map_err(|_| Error::Crypto)?;
        hk.expand(info, okm).map_err(|_| Error::Crypto)
    }
}

// ---- AES-GCM AEAD ----

/// AES-GCM AEAD, generic over the 128- and 256-bit variants.
pub struct AesGcmAead<C> {
    cipher: C,
    key_len: usize,
}

pub type Aes128GcmAead = AesGcmAead<aes_gcm::Aes128Gcm>;
pub type Aes256GcmAead = AesGcmAead<aes_gcm::Aes256Gcm>;

impl<C> AeadTrait for AesGcmAead<C>
where
    C: AeadInPlace<NonceSize = U12, TagSize = U16>,
{
    fn key_len(&self) -> usize {
        self.key_len
    }

    fn seal_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        payload_len: usize,
    ) -> Result<usize, Error> {
        if nonce.len() != 12 {
            return Err(Error::Crypto);
        }
        let total = payload_len + TAG_LEN;
        if buf.len() < total {
            return Err(Error::BufferTooSmall { needed: total });
        }

        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::<C>::from_slice(nonce), aad, &mut buf[..payload_len])
            .map_err(|_| Error::Crypto)?;
        buf[payload_len..total].copy_from_slice(&tag);
        Ok(total)
    }

    fn open_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        ciphertext_len: usize,
    ) -> Result<usize, Error> {
        if nonce.len() != 12 || ciphertext_len < TAG_LEN || buf.len() < ciphertext_len {
            return Err(Error::Crypto);
        }
        let plaintext_len = ciphertext_len - TAG_LEN;
        let tag = Tag::<C>::clone_from_slice(&buf[plaintext_len..ciphertext_len]);
        self.cipher
            .decrypt_in_place_detached(
                Nonce::<C>::from_slice(nonce),
                aad,
                &mut buf[..plaintext_len],
                &tag,
            )
            .map_err(|_| Error::Crypto)?;
        Ok(plaintext_len)
    }
}

/// Build the AEAD matching `key.len()`: 16 bytes selects AES-128-GCM,
/// 32 bytes AES-256-GCM.
pub fn aead_for_key(key: &[u8]) -> Result<Box<dyn AeadTrait>, Error> {
    use aes_gcm::KeyInit;
    match key.len() {
        16 => Ok(Box::new(Aes128GcmAead {
            cipher: aes_gcm::Aes128Gcm::new_from_slice(key).map_err(|_| Error::Crypto)?,
            key_len: 16,
        })),
        32 => Ok(Box::new(Aes256GcmAead {
            cipher: aes_gcm::Aes256Gcm::new_from_slice(key).map_err(|_| Error::Crypto)?,
            key_len: 32,
        })),
        _ => Err(Error::Crypto),
    }
}

// ---- AES Header Protection ----

/// AES-ECB header protection (RFC 9001 section 5.4.3).
pub struct AesHeaderProtection<C> {
    cipher: C,
}

impl<C> HeaderProtection for AesHeaderProtection<C>
where
    C: aes::cipher::BlockEncrypt + aes::cipher::BlockSizeUser<BlockSize = U16>,
{
    fn mask(&self, sample: &[u8; 16]) -> [u8; 5] {
        let mut block = aes::Block::clone_from_slice(sample);
        self.cipher.encrypt_block(&mut block);
        let mut mask = [0u8; 5];
        mask.copy_from_slice(&block[..5]);
        mask
    }
}

/// Header protection cipher matching the AEAD key size of the suite.
pub fn header_protection_for_key(key: &[u8]) -> Result<Box<dyn HeaderProtection>, Error> {
    use aes::cipher::KeyInit;
    match key.len() {
        16 => Ok(Box::new(AesHeaderProtection {
            cipher: aes::Aes128::new_from_slice(key).map_err(|_| Error::Crypto)?,
        })),
        32 => Ok(Box::new(AesHeaderProtection {
            cipher: aes::Aes256::new_from_slice(key).map_err(|_| Error::Crypto)?,
        })),
        _ => Err(Error::Crypto),
    }
}
