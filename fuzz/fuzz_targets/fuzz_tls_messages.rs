#![no_main]

use libfuzzer_sys::fuzz_target;
use quico::tls::messages::{self, HandshakeType};
use quico::tls::TransportParams;

fuzz_target!(|data: &[u8]| {
    if let Some((msg_type, body_len)) = messages::read_handshake_header(data) {
        if let Some(body) = data.get(4..4 + body_len) {
            match HandshakeType::from_u8(msg_type) {
                Some(HandshakeType::ClientHello) => {
                    if let Ok(hello) = messages::parse_client_hello(body) {
                        if let Some(params) = &hello.transport_params {
                            let _ = TransportParams::decode(params);
                        }
                    }
                }
                Some(HandshakeType::ServerHello) => {
                    let _ = messages::parse_server_hello(body);
                }
                Some(HandshakeType::Certificate) => {
                    let _ = messages::parse_certificate(body);
                }
                _ => {}
            }
        }
    }

    let _ = messages::parse_client_hello(data);
    let _ = messages::parse_server_hello(data);
    let _ = messages::parse_certificate(data);
    let _ = TransportParams::decode(data);
});
