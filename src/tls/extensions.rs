//! TLS 1.3 extensions used by the QUIC handshake.
//!
//! Extension format: type (2 bytes) + length (2 bytes) + data.

use crate::error::{Error, HandshakeError};
use crate::tls::messages::{ClientHello, KeyShareEntry};

pub const EXT_SERVER_NAME: u16 = 0x0000;
pub const EXT_SUPPORTED_GROUPS: u16 = 0x000a;
pub const EXT_SIGNATURE_ALGORITHMS: u16 = 0x000d;
pub const EXT_ALPN: u16 = 0x0010;
pub const EXT_SUPPORTED_VERSIONS: u16 = 0x002b;
pub const EXT_KEY_SHARE: u16 = 0x0033;
pub const EXT_QUIC_TRANSPORT_PARAMS: u16 = 0x0039;

pub const TLS13: u16 = 0x0304;

/// Big-endian cursor over handshake bytes. Every short read is a
/// decode error.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    off: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, off: 0 }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.off >= self.data.len()
    }

    pub(crate) fn bytes(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let end = self
            .off
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(HandshakeError::Decode)?;
        let out = &self.data[self.off..end];
        self.off = end;
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, Error> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, Error> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn u24(&mut self) -> Result<usize, Error> {
        let b = self.bytes(3)?;
        Ok(((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }

    /// Vector with a 1-byte length prefix.
    pub(crate) fn vec8(&mut self) -> Result<&'a [u8], Error> {
        let len = self.u8()? as usize;
        self.bytes(len)
    }

    /// Vector with a 2-byte length prefix.
    pub(crate) fn vec16(&mut self) -> Result<&'a [u8], Error> {
        let len = self.u16()? as usize;
        self.bytes(len)
    }

    pub(crate) fn vec24(&mut self) -> Result<&'a [u8], Error> {
        let len = self.u24()?;
        self.bytes(len)
    }

    /// A vector of u16 values with a `prefix`-byte length.
    pub(crate) fn u16_list(&mut self, prefix: usize) -> Result<Vec<u16>, Error> {
        let body = match prefix {
            1 => self.vec8()?,
            _ => self.vec16()?,
        };
        if body.len() % 2 != 0 {
            return Err(HandshakeError::Decode.into());
        }
        Ok(body
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect())
    }
}

pub(crate) fn put_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub(crate) fn put_u24(out: &mut Vec<u8>, v: usize) {
    out.extend_from_slice(&(v as u32).to_be_bytes()[1..]);
}

pub(crate) fn put_vec8(out: &mut Vec<u8>, data: &[u8]) {
    out.push(data.len() as u8);
    out.extend_from_slice(data);
}

pub(crate) fn put_vec16(out: &mut Vec<u8>, data: &[u8]) {
    put_u16(out, data.len() as u16);
    out.extend_from_slice(data);
}

/// Append one extension: type, 2-byte length, body.
pub fn put_extension(out: &mut Vec<u8>, ext_type: u16, body: &[u8]) {
    put_u16(out, ext_type);
    put_vec16(out, body);
}

/// Fill the extension-derived fields of `hello` from its extension block.
pub fn parse_client_hello_extensions(data: &[u8], hello: &mut ClientHello) -> Result<(), Error> {
    let mut r = Reader::new(data);
    while !r.is_empty() {
        let ext_type = r.u16()?;
        let body = r.vec16()?;
        let mut e = Reader::new(body);
        match ext_type {
            EXT_SERVER_NAME => {
                let mut list = Reader::new(e.vec16()?);
                while !list.is_empty() {
                    let name_type = list.u8()?;
                    let name = list.vec16()?;
                    if name_type == 0 && hello.server_name.is_none() {
                        hello.server_name = Some(String::from_utf8_lossy(name).into_owned());
                    }
                }
            }
            EXT_SUPPORTED_GROUPS => hello.supported_groups = e.u16_list(2)?,
            EXT_SIGNATURE_ALGORITHMS => hello.signature_algorithms = e.u16_list(2)?,
            EXT_ALPN => {
                let mut list = Reader::new(e.vec16()?);
                while !list.is_empty() {
                    hello.alpn.push(list.vec8()?.to_vec());
                }
            }
            EXT_SUPPORTED_VERSIONS => hello.supported_versions = e.u16_list(1)?,
            EXT_KEY_SHARE => {
                let mut list = Reader::new(e.vec16()?);
                while !list.is_empty() {
                    let group = list.u16()?;
                    let key_exchange = list.vec16()?.to_vec();
                    hello.key_shares.push(KeyShareEntry {
                        group,
                        key_exchange,
                    });
                }
            }
            EXT_QUIC_TRANSPORT_PARAMS => hello.transport_params = Some(body.to_vec()),
            _ => {}
        }
    }
    Ok(())
}

/// Extensions of the ClientHello, in the order browsers send them.
pub fn encode_client_hello_extensions(hello: &ClientHello, out: &mut Vec<u8>) {
    if let Some(name) = &hello.server_name {
        let mut entry = vec![0u8];
        put_vec16(&mut entry, name.as_bytes());
        let mut list = Vec::new();
        put_vec16(&mut list, &entry);
        put_extension(out, EXT_SERVER_NAME, &list);
    }

    let u16_vec = |values: &[u16]| values.iter().flat_map(|v| v.to_be_bytes()).collect::<Vec<u8>>();

    let mut body = Vec::new();
    put_vec16(&mut body, &u16_vec(&hello.supported_groups));
    put_extension(out, EXT_SUPPORTED_GROUPS, &body);

    body.clear();
    put_vec16(&mut body, &u16_vec(&hello.signature_algorithms));
    put_extension(out, EXT_SIGNATURE_ALGORITHMS, &body);

    if !hello.alpn.is_empty() {
        let mut list = Vec::new();
        for proto in &hello.alpn {
            put_vec8(&mut list, proto);
        }
        body.clear();
        put_vec16(&mut body, &list);
        put_extension(out, EXT_ALPN, &body);
    }

    body.clear();
    put_vec8(&mut body, &u16_vec(&hello.supported_versions));
    put_extension(out, EXT_SUPPORTED_VERSIONS, &body);

    let mut shares = Vec::new();
    for share in &hello.key_shares {
        put_u16(&mut shares, share.group);
        put_vec16(&mut shares, &share.key_exchange);
    }
    body.clear();
    put_vec16(&mut body, &shares);
    put_extension(out, EXT_KEY_SHARE, &body);

    if let Some(params) = &hello.transport_params {
        put_extension(out, EXT_QUIC_TRANSPORT_PARAMS, params);
    }
}

/// ServerHello extensions: supported_versions (TLS 1.3) and key_share.
pub fn encode_server_hello_extensions(group: u16, public: &[u8], out: &mut Vec<u8>) {
    put_extension(out, EXT_SUPPORTED_VERSIONS, &TLS13.to_be_bytes());
    let mut share = Vec::with_capacity(4 + public.len());
    put_u16(&mut share, group);
    put_vec16(&mut share, public);
    put_extension(out, EXT_KEY_SHARE, &share);
}

/// EncryptedExtensions: the selected ALPN and our transport parameters.
pub fn encode_encrypted_extensions(alpn: Option<&[u8]>, transport_params: &[u8], out: &mut Vec<u8>) {
    if let Some(proto) = alpn {
        let mut list = Vec::new();
        put_vec8(&mut list, proto);
        let mut body = Vec::new();
        put_vec16(&mut body, &list);
        put_extension(out, EXT_ALPN, &body);
    }
    put_extension(out, EXT_QUIC_TRANSPORT_PARAMS, transport_params);
}
