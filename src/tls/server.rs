//! TLS 1.3 server handshake state machine for QUIC.
//!
//! ```text
//! WaitClientHello -> WaitCertificate -> WaitClientFinished -> Complete
//! ```
//!
//! The engine is fed complete handshake messages (CRYPTO reassembly
//! happens in the connection) and reports what to do next through
//! [`TlsEvent`]s. Between ClientHello and Certificate it pauses until
//! the application supplies a certificate for the requested name.

use std::collections::VecDeque;

use crate::crypto::sign::SigningKey;
use crate::crypto::{CipherSuite, Level};
use crate::error::{Error, HandshakeError};
use crate::tls::key_schedule::{TlsKeySchedule, TrafficSecrets};
use crate::tls::messages::{
    self, read_handshake_header, HandshakeType, HANDSHAKE_HEADER_LEN,
};
use crate::tls::transcript::Transcript;
use crate::tls::transport_params::TransportParams;
use crate::tls::{negotiate, TLS13};
use crate::transport::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    WaitClientHello,
    /// ServerHello and EncryptedExtensions are out; waiting for a certificate.
    WaitCertificate,
    WaitClientFinished,
    Complete,
}

/// Output of the handshake engine, drained with [`TlsServer::poll_event`].
#[derive(Debug)]
pub enum TlsEvent {
    /// Handshake bytes to send in CRYPTO frames at `level`.
    Send { level: Level, data: Vec<u8> },
    /// Traffic secrets for `level` are ready.
    Secrets {
        level: Level,
        suite: CipherSuite,
        secrets: TrafficSecrets,
    },
    /// ClientHello processed; call [`TlsServer::install_certificate`].
    CertificateRequested { server_name: Option<String> },
    /// Client Finished verified.
    Complete,
}

pub struct TlsServer {
    state: HandshakeState,
    alpn_protocols: Vec<Vec<u8>>,
    local_params: TransportParams,

    key_schedule: Option<TlsKeySchedule>,
    transcript: Option<Transcript>,
    handshake_secrets: Option<TrafficSecrets>,

    client_signature_algorithms: Vec<u16>,
    server_name: Option<String>,
    selected_alpn: Option<Vec<u8>>,
    peer_params: Option<TransportParams>,

    events: VecDeque<TlsEvent>,
}

impl core::fmt::Debug for TlsServer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TlsServer")
            .field("state", &self.state)
            .field("suite", &self.suite())
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl TlsServer {
    /// `local_params` is sent in EncryptedExtensions as-is, so it must
    /// already carry this connection's CIDs and reset token.
    pub fn new(alpn_protocols: Vec<Vec<u8>>, local_params: TransportParams) -> Self {
        Self {
            state: HandshakeState::WaitClientHello,
            alpn_protocols,
            local_params,
            key_schedule: None,
            transcript: None,
            handshake_secrets: None,
            client_signature_algorithms: Vec::new(),
            server_name: None,
            selected_alpn: None,
            peer_params: None,
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == HandshakeState::Complete
    }

    pub fn suite(&self) -> Option<CipherSuite> {
        self.key_schedule.as_ref().map(TlsKeySchedule::suite)
    }

    pub fn alpn(&self) -> Option<&[u8]> {
        self.selected_alpn.as_deref()
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    pub fn peer_transport_params(&self) -> Option<&TransportParams> {
        self.peer_params.as_ref()
    }

    pub fn poll_event(&mut self) -> Option<TlsEvent> {
        self.events.pop_front()
    }

    /// Drop the transcript and handshake secrets once 1-RTT is confirmed.
    pub fn discard_handshake_state(&mut self) {
        self.transcript = None;
        self.handshake_secrets = None;
    }

    /// Process one complete handshake message received at `level`.
    pub fn read_handshake(
        &mut self,
        level: Level,
        message: &[u8],
        rng: &mut dyn Rng,
    ) -> Result<(), Error> {
        let (msg_type, body_len) =
            read_handshake_header(message).ok_or(HandshakeError::Decode)?;
        if message.len() != HANDSHAKE_HEADER_LEN + body_len {
            return Err(HandshakeError::Decode.into());
        }
        let body = &message[HANDSHAKE_HEADER_LEN..];

        match (self.state, level, HandshakeType::from_u8(msg_type)) {
            (HandshakeState::WaitClientHello, Level::Initial, Some(HandshakeType::ClientHello)) => {
                self.process_client_hello(message, body, rng)
            }
            (
                HandshakeState::WaitClientFinished,
                Level::Handshake,
                Some(HandshakeType::Finished),
            ) => self.process_client_finished(body),
            _ => {
                tracing::debug!(msg_type, ?level, state = ?self.state, "unexpected handshake message");
                Err(HandshakeError::UnexpectedMessage.into())
            }
        }
    }

    fn process_client_hello(
        &mut self,
        message: &[u8],
        body: &[u8],
        rng: &mut dyn Rng,
    ) -> Result<(), Error> {
        let hello = messages::parse_client_hello(body)?;
        if !hello.supported_versions.contains(&TLS13) {
            return Err(HandshakeError::UnsupportedVersion.into());
        }
        let raw_params = hello
            .transport_params
            .as_deref()
            .ok_or(HandshakeError::MissingExtension)?;
        let peer_params = TransportParams::decode(raw_params)?;

        let alpn = self
            .alpn_protocols
            .iter()
            .find(|ours| hello.alpn.contains(ours))
            .cloned()
            .ok_or(HandshakeError::NoApplicationProtocol)?;

        let negotiated = negotiate(&hello, rng)?;
        let suite = negotiated.suite;
        tracing::debug!(
            suite = format_args!("{:#06x}", suite.code()),
            group = format_args!("{:#06x}", negotiated.key_share.group.code()),
            sni = hello.server_name.as_deref().unwrap_or(""),
            "ClientHello accepted"
        );

        let mut transcript = Transcript::new(suite);
        transcript.update(message);

        let mut random = [0u8; 32];
        rng.fill(&mut random);
        let server_hello = messages::encode_server_hello(
            &random,
            &hello.session_id,
            suite.code(),
            negotiated.key_share.group.code(),
            &negotiated.key_share.public,
        );
        transcript.update(&server_hello);
        self.events.push_back(TlsEvent::Send {
            level: Level::Initial,
            data: server_hello,
        });

        let mut key_schedule = TlsKeySchedule::new(suite);
        key_schedule.derive_handshake_secret(&negotiated.key_share.shared_secret)?;
        let handshake_secrets = key_schedule.handshake_traffic_secrets(&transcript.current_hash())?;
        self.events.push_back(TlsEvent::Secrets {
            level: Level::Handshake,
            suite,
            secrets: handshake_secrets.clone(),
        });

        let mut params = Vec::with_capacity(128);
        self.local_params.encode(&mut params)?;
        let encrypted_extensions = messages::encode_encrypted_extensions(Some(&alpn), &params);
        transcript.update(&encrypted_extensions);
        self.events.push_back(TlsEvent::Send {
            level: Level::Handshake,
            data: encrypted_extensions,
        });

        self.events.push_back(TlsEvent::CertificateRequested {
            server_name: hello.server_name.clone(),
        });

        self.client_signature_algorithms = hello.signature_algorithms;
        self.server_name = hello.server_name;
        self.selected_alpn = Some(alpn);
        self.peer_params = Some(peer_params);
        self.key_schedule = Some(key_schedule);
        self.transcript = Some(transcript);
        self.handshake_secrets = Some(handshake_secrets);
        self.state = HandshakeState::WaitCertificate;
        Ok(())
    }

    /// Send Certificate, CertificateVerify and Finished, then derive the
    /// application secrets.
    pub fn install_certificate<C: AsRef<[u8]>>(
        &mut self,
        chain: &[C],
        key: &SigningKey,
    ) -> Result<(), Error> {
        if self.state != HandshakeState::WaitCertificate {
            return Err(Error::InvalidState);
        }
        let (Some(key_schedule), Some(transcript), Some(handshake_secrets)) = (
            self.key_schedule.as_mut(),
            self.transcript.as_mut(),
            self.handshake_secrets.as_ref(),
        ) else {
            return Err(Error::InvalidState);
        };

        let certificate = messages::encode_certificate(chain);
        transcript.update(&certificate);

        let signature =
            key.sign_certificate_verify(&transcript.current_hash(), &self.client_signature_algorithms)?;
        let certificate_verify = messages::encode_certificate_verify(key.scheme(), &signature);
        transcript.update(&certificate_verify);

        let verify_data =
            key_schedule.finished_verify_data(&handshake_secrets.server, &transcript.current_hash())?;
        let finished = messages::encode_finished(&verify_data);
        transcript.update(&finished);

        let mut flight = certificate;
        flight.extend_from_slice(&certificate_verify);
        flight.extend_from_slice(&finished);
        self.events.push_back(TlsEvent::Send {
            level: Level::Handshake,
            data: flight,
        });

        key_schedule.derive_master_secret()?;
        let app_secrets = key_schedule.app_traffic_secrets(&transcript.current_hash())?;
        self.events.push_back(TlsEvent::Secrets {
            level: Level::Application,
            suite: key_schedule.suite(),
            secrets: app_secrets,
        });

        self.state = HandshakeState::WaitClientFinished;
        Ok(())
    }

    fn process_client_finished(&mut self, verify_data: &[u8]) -> Result<(), Error> {
        let (Some(key_schedule), Some(transcript), Some(handshake_secrets)) = (
            self.key_schedule.as_ref(),
            self.transcript.as_ref(),
            self.handshake_secrets.as_ref(),
        ) else {
            return Err(Error::InvalidState);
        };

        let ok = key_schedule.verify_finished(
            &handshake_secrets.client,
            &transcript.current_hash(),
            verify_data,
        )?;
        if !ok {
            return Err(HandshakeError::BadFinished.into());
        }

        self.state = HandshakeState::Complete;
        self.events.push_back(TlsEvent::Complete);
        Ok(())
    }
}
