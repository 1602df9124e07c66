//! TLS 1.3 handshake message encoding and decoding.
//!
//! Handshake message format:
//!   HandshakeType (1 byte)
//!   Length (3 bytes, big-endian)
//!   Body (Length bytes)
//!
//! The server parses ClientHello and Finished, and builds every other
//! message of the 1-RTT flight. ServerHello parsing and ClientHello
//! encoding exist for test clients.

use crate::error::{Error, HandshakeError};
use crate::tls::extensions::{
    self, put_u16, put_u24, put_vec16, put_vec8, Reader, EXT_KEY_SHARE, EXT_SUPPORTED_VERSIONS,
};

pub const HANDSHAKE_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeType {
    ClientHello = 1,
    ServerHello = 2,
    EncryptedExtensions = 8,
    Certificate = 11,
    CertificateVerify = 15,
    Finished = 20,
}

impl HandshakeType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::ClientHello),
            2 => Some(Self::ServerHello),
            8 => Some(Self::EncryptedExtensions),
            11 => Some(Self::Certificate),
            15 => Some(Self::CertificateVerify),
            20 => Some(Self::Finished),
            _ => None,
        }
    }
}

/// Read the handshake header: returns `(type_byte, body_length)`, or
/// `None` when fewer than four bytes are available.
pub fn read_handshake_header(data: &[u8]) -> Option<(u8, usize)> {
    let h = data.get(..HANDSHAKE_HEADER_LEN)?;
    Some((h[0], ((h[1] as usize) << 16) | ((h[2] as usize) << 8) | h[3] as usize))
}

/// Wrap `body` in a handshake header.
pub fn handshake_message(msg_type: HandshakeType, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HANDSHAKE_HEADER_LEN + body.len());
    out.push(msg_type as u8);
    put_u24(&mut out, body.len());
    out.extend_from_slice(body);
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyShareEntry {
    pub group: u16,
    pub key_exchange: Vec<u8>,
}

/// The fields of a ClientHello the server acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHello {
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suites: Vec<u16>,
    pub supported_versions: Vec<u16>,
    pub supported_groups: Vec<u16>,
    pub signature_algorithms: Vec<u16>,
    pub alpn: Vec<Vec<u8>>,
    pub key_shares: Vec<KeyShareEntry>,
    pub server_name: Option<String>,
    /// Raw `quic_transport_parameters` extension body.
    pub transport_params: Option<Vec<u8>>,
}

impl ClientHello {
    /// Encode as a complete handshake message.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(512);
        put_u16(&mut body, 0x0303);
        body.extend_from_slice(&self.random);
        put_vec8(&mut body, &self.session_id);
        let suites: Vec<u8> = self.cipher_suites.iter().flat_map(|s| s.to_be_bytes()).collect();
        put_vec16(&mut body, &suites);
        // compression methods: null only
        put_vec8(&mut body, &[0]);
        let mut exts = Vec::new();
        extensions::encode_client_hello_extensions(self, &mut exts);
        put_vec16(&mut body, &exts);
        handshake_message(HandshakeType::ClientHello, &body)
    }
}

/// Parse a ClientHello message body (after the 4-byte handshake header).
pub fn parse_client_hello(body: &[u8]) -> Result<ClientHello, Error> {
    let mut r = Reader::new(body);
    let _legacy_version = r.u16()?;
    let mut hello = ClientHello::default();
    hello.random.copy_from_slice(r.bytes(32)?);
    hello.session_id = r.vec8()?.to_vec();
    if hello.session_id.len() > 32 {
        return Err(HandshakeError::Decode.into());
    }
    hello.cipher_suites = r.u16_list(2)?;
    let _compression = r.vec8()?;
    if !r.is_empty() {
        let exts = r.vec16()?;
        extensions::parse_client_hello_extensions(exts, &mut hello)?;
    }
    Ok(hello)
}

/// ServerHello body: legacy version, random, echoed session id, suite,
/// null compression, then extensions.
pub fn encode_server_hello(
    random: &[u8; 32],
    session_id: &[u8],
    cipher_suite: u16,
    group: u16,
    public: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(128 + public.len());
    put_u16(&mut body, 0x0303);
    body.extend_from_slice(random);
    put_vec8(&mut body, session_id);
    put_u16(&mut body, cipher_suite);
    body.push(0);
    let mut exts = Vec::new();
    extensions::encode_server_hello_extensions(group, public, &mut exts);
    put_vec16(&mut body, &exts);
    handshake_message(HandshakeType::ServerHello, &body)
}

/// The parts of a ServerHello a client needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suite: u16,
    pub selected_version: Option<u16>,
    pub key_share: Option<KeyShareEntry>,
}

/// Parse a ServerHello message body (after the 4-byte handshake header).
pub fn parse_server_hello(body: &[u8]) -> Result<ServerHello, Error> {
    let mut r = Reader::new(body);
    let _legacy_version = r.u16()?;
    let mut random = [0u8; 32];
    random.copy_from_slice(r.bytes(32)?);
    let session_id = r.vec8()?.to_vec();
    let cipher_suite = r.u16()?;
    let _compression = r.u8()?;

    let mut hello = ServerHello {
        random,
        session_id,
        cipher_suite,
        selected_version: None,
        key_share: None,
    };
    let mut exts = Reader::new(r.vec16()?);
    while !exts.is_empty() {
        let ext_type = exts.u16()?;
        let mut e = Reader::new(exts.vec16()?);
        match ext_type {
            EXT_SUPPORTED_VERSIONS => hello.selected_version = Some(e.u16()?),
            EXT_KEY_SHARE => {
                let group = e.u16()?;
                let key_exchange = e.vec16()?.to_vec();
                hello.key_share = Some(KeyShareEntry {
                    group,
                    key_exchange,
                });
            }
            _ => {}
        }
    }
    Ok(hello)
}

pub fn encode_encrypted_extensions(alpn: Option<&[u8]>, transport_params: &[u8]) -> Vec<u8> {
    let mut exts = Vec::new();
    extensions::encode_encrypted_extensions(alpn, transport_params, &mut exts);
    let mut body = Vec::with_capacity(exts.len() + 2);
    put_vec16(&mut body, &exts);
    handshake_message(HandshakeType::EncryptedExtensions, &body)
}

/// Certificate message with an empty request context and no
/// per-certificate extensions. `chain` is leaf first, DER encoded.
pub fn encode_certificate<C: AsRef<[u8]>>(chain: &[C]) -> Vec<u8> {
    let mut list = Vec::new();
    for cert in chain {
        let cert = cert.as_ref();
        put_u24(&mut list, cert.len());
        list.extend_from_slice(cert);
        put_u16(&mut list, 0);
    }
    let mut body = Vec::with_capacity(list.len() + 4);
    body.push(0);
    put_u24(&mut body, list.len());
    body.extend_from_slice(&list);
    handshake_message(HandshakeType::Certificate, &body)
}

/// Parse a Certificate body into its DER certificates.
pub fn parse_certificate(body: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
    let mut r = Reader::new(body);
    let _context = r.vec8()?;
    let mut list = Reader::new(r.vec24()?);
    let mut chain = Vec::new();
    while !list.is_empty() {
        chain.push(list.vec24()?.to_vec());
        let _exts = list.vec16()?;
    }
    Ok(chain)
}

pub fn encode_certificate_verify(scheme: u16, signature: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + signature.len());
    put_u16(&mut body, scheme);
    put_vec16(&mut body, signature);
    handshake_message(HandshakeType::CertificateVerify, &body)
}

pub fn encode_finished(verify_data: &[u8]) -> Vec<u8> {
    handshake_message(HandshakeType::Finished, verify_data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hello() -> ClientHello {
        ClientHello {
            random: [7; 32],
            session_id: vec![1, 2, 3],
            cipher_suites: vec![0x1302, 0x1301],
            supported_versions: vec![0x0304],
            supported_groups: vec![0x001d, 0x0017],
            signature_algorithms: vec![0x0403, 0x0804],
            alpn: vec![b"h3".to_vec()],
            key_shares: vec![KeyShareEntry {
                group: 0x001d,
                key_exchange: vec![9; 32],
            }],
            server_name: Some("localhost".into()),
            transport_params: Some(vec![0x01, 0x01, 0x00]),
        }
    }

    #[test]
    fn client_hello_encode_parse() {
        let hello = sample_hello();
        let msg = hello.encode();
        let (ty, len) = read_handshake_header(&msg).unwrap();
        assert_eq!(ty, HandshakeType::ClientHello as u8);
        assert_eq!(len, msg.len() - 4);
        assert_eq!(parse_client_hello(&msg[4..]).unwrap(), hello);
    }

    #[test]
    fn truncated_client_hello_is_decode_error() {
        let msg = sample_hello().encode();
        for cut in [10, 40, msg.len() - 1] {
            assert_eq!(
                parse_client_hello(&msg[4..cut]),
                Err(HandshakeError::Decode.into())
            );
        }
    }

    #[test]
    fn server_hello_roundtrip() {
        let msg = encode_server_hello(&[3; 32], &[1, 2, 3], 0x1301, 0x001d, &[0xab; 32]);
        assert_eq!(msg[0], HandshakeType::ServerHello as u8);
        let hello = parse_server_hello(&msg[4..]).unwrap();
        assert_eq!(hello.session_id, vec![1, 2, 3]);
        assert_eq!(hello.cipher_suite, 0x1301);
        assert_eq!(hello.selected_version, Some(0x0304));
        assert_eq!(hello.key_share.unwrap().key_exchange, vec![0xab; 32]);
    }

    #[test]
    fn certificate_chain_roundtrip() {
        let chain = vec![vec![0x30, 0x82, 0x01], vec![0x30, 0x03]];
        let msg = encode_certificate(&chain);
        assert_eq!(msg[0], 11);
        // request context is empty
        assert_eq!(msg[4], 0);
        assert_eq!(parse_certificate(&msg[4..]).unwrap(), chain);
    }

    #[test]
    fn certificate_verify_layout() {
        let msg = encode_certificate_verify(0x0807, &[0xee; 64]);
        assert_eq!(&msg[..8], &[15, 0, 0, 68, 0x08, 0x07, 0, 64]);
    }

    #[test]
    fn header_needs_four_bytes() {
        assert_eq!(read_handshake_header(&[20, 0, 0]), None);
        assert_eq!(read_handshake_header(&[20, 0, 0, 32]), Some((20, 32)));
    }
}
