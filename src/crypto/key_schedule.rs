//! Packet key derivation for QUIC v1: the Initial secrets keyed by the
//! client's original DCID and the `quic key`/`quic iv`/`quic hp` expansion
//! applied to every traffic secret (RFC 9001 section 5).

use crate::crypto::{CipherSuite, Hkdf, PacketKeys};
use crate::error::Error;

/// QUIC v1 Initial salt (RFC 9001 section 5.2).
pub const INITIAL_SALT_V1: [u8; 20] = [
    0x38, 0x76, 0x2c, 0xf7, 0xf5, 0x59, 0x34, 0xb3, 0x4d, 0x17, 0x9a, 0xe6, 0xa4, 0xc8, 0x0c,
    0xad, 0xcc, 0xbb, 0x7f, 0x0a,
];

/// Longest `HkdfLabel`: a 12-byte label plus a SHA-384 transcript hash.
const MAX_LABEL_INFO: usize = 80;

/// RFC 8446 section 7.1 `HKDF-Expand-Label`, filling all of `out`.
pub fn hkdf_expand_label<H: Hkdf + ?Sized>(
    hkdf: &H,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    out: &mut [u8],
) -> Result<(), Error> {
    let mut info = heapless::Vec::<u8, MAX_LABEL_INFO>::new();
    let label_len = u8::try_from(6 + label.len()).map_err(|_| Error::Crypto)?;
    let context_len = u8::try_from(context.len()).map_err(|_| Error::Crypto)?;
    let out_len = u16::try_from(out.len())
        .map_err(|_| Error::Crypto)?
        .to_be_bytes();
    let parts: [&[u8]; 6] = [
        &out_len,
        &[label_len],
        b"tls13 ",
        label,
        &[context_len],
        context,
    ];
    parts
        .into_iter()
        .try_for_each(|part| info.extend_from_slice(part))
        .map_err(|_| Error::Crypto)?;
    hkdf.expand(secret, &info, out)
}

/// Client and server Initial secrets for `dcid`. Always SHA-256.
pub fn derive_initial_secrets<H: Hkdf + ?Sized>(
    hkdf: &H,
    dcid: &[u8],
    client_secret: &mut [u8],
    server_secret: &mut [u8],
) -> Result<(), Error> {
    let mut initial_secret = [0u8; 32];
    hkdf.extract(&INITIAL_SALT_V1, dcid, &mut initial_secret);

    hkdf_expand_label(hkdf, &initial_secret, b"client in", &[], client_secret)?;
    hkdf_expand_label(hkdf, &initial_secret, b"server in", &[], server_secret)?;
    Ok(())
}

/// Expands one traffic secret into AEAD key, IV and header protection key.
pub fn derive_packet_keys<H: Hkdf + ?Sized>(
    hkdf: &H,
    secret: &[u8],
    key: &mut [u8],
    iv: &mut [u8],
    hp_key: &mut [u8],
) -> Result<(), Error> {
    hkdf_expand_label(hkdf, secret, b"quic key", &[], key)?;
    hkdf_expand_label(hkdf, secret, b"quic iv", &[], iv)?;
    hkdf_expand_label(hkdf, secret, b"quic hp", &[], hp_key)?;
    Ok(())
}

/// Initial packet keys `(client, server)` for an original DCID.
pub fn derive_initial_keys(dcid: &[u8]) -> Result<(PacketKeys, PacketKeys), Error> {
    let suite = CipherSuite::Aes128GcmSha256;
    let mut client_secret = [0u8; 32];
    let mut server_secret = [0u8; 32];
    derive_initial_secrets(suite.hkdf(), dcid, &mut client_secret, &mut server_secret)?;
    Ok((
        PacketKeys::from_secret(suite, &client_secret)?,
        PacketKeys::from_secret(suite, &server_secret)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::rustcrypto::HkdfSha256;
    use hex_literal::hex;

    // RFC 9001 Appendix A.1

    #[test]
    fn initial_secrets_rfc9001_a1() {
        let dcid = hex!("8394c8f03e515708");

        let mut client_secret = [0u8; 32];
        let mut server_secret = [0u8; 32];
        derive_initial_secrets(&HkdfSha256, &dcid, &mut client_secret, &mut server_secret)
            .unwrap();

        assert_eq!(
            client_secret,
            hex!("c00cf151ca5be075ed0ebfb5c80323c42d6b7db67881289af4008f1f6c357aea")
        );
        assert_eq!(
            server_secret,
            hex!("3c199828fd139efd216c155ad844cc81fb82fa8d7446fa7d78be803acdda951b")
        );
    }

    #[test]
    fn initial_client_keys_rfc9001_a1() {
        let client_secret =
            hex!("c00cf151ca5be075ed0ebfb5c80323c42d6b7db67881289af4008f1f6c357aea");

        let mut key = [0u8; 16];
        let mut iv = [0u8; 12];
        let mut hp = [0u8; 16];
        derive_packet_keys(&HkdfSha256, &client_secret, &mut key, &mut iv, &mut hp).unwrap();

        assert_eq!(key, hex!("1f369613dd76d5467730efcbe3b1a22d"));
        assert_eq!(iv, hex!("fa044b2f42a3fd3b46fb255c"));
        assert_eq!(hp, hex!("9f50449e04a0e810283a1e9933adedd2"));
    }

    #[test]
    fn initial_server_keys_rfc9001_a1() {
        let server_secret =
            hex!("3c199828fd139efd216c155ad844cc81fb82fa8d7446fa7d78be803acdda951b");

        let mut key = [0u8; 16];
        let mut iv = [0u8; 12];
        let mut hp = [0u8; 16];
        derive_packet_keys(&HkdfSha256, &server_secret, &mut key, &mut iv, &mut hp).unwrap();

        assert_eq!(key, hex!("cf3a5331653c364c88f0f379b6067e37"));
        assert_eq!(iv, hex!("0ac1493ca1905853b0bba03e"));
        assert_eq!(hp, hex!("c206b8d9b9f0f37644430b490eeaa314"));
    }

    #[test]
    fn dyn_hkdf_matches_concrete() {
        let dcid = hex!("8394c8f03e515708");
        let mut a = ([0u8; 32], [0u8; 32]);
        let mut b = ([0u8; 32], [0u8; 32]);
        derive_initial_secrets(&HkdfSha256, &dcid, &mut a.0, &mut a.1).unwrap();
        derive_initial_secrets(
            CipherSuite::Aes128GcmSha256.hkdf(),
            &dcid,
            &mut b.0,
            &mut b.1,
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn initial_keys_nonce() {
        let (client, _server) = derive_initial_keys(&hex!("8394c8f03e515708")).unwrap();
        // Nonce for packet number 0 equals the IV.
        assert_eq!(client.nonce(0), hex!("fa044b2f42a3fd3b46fb255c"));
        let mut expected = hex!("fa044b2f42a3fd3b46fb255c");
        expected[11] ^= 2;
        assert_eq!(client.nonce(2), expected);
    }

    #[test]
    fn label_too_long_is_rejected() {
        let mut out = [0u8; 16];
        let context = [0u8; 72];
        assert_eq!(
            hkdf_expand_label(&HkdfSha256, &[0u8; 32], b"quic key", &context, &mut out),
            Err(Error::Crypto)
        );
    }
}
