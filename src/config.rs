//! Server configuration.

use crate::h3::Settings;
use crate::tls::TransportParams;
use crate::transport::MICROS_PER_MS;

/// Fixed-rate pacing and in-flight caps for 1-RTT sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendLimits {
    pub packets_per_sec: usize,
    pub bytes_per_sec: usize,
    /// Largest UDP payload the scheduler builds.
    pub max_packet_size: usize,
    /// Below this much budget no packet is built.
    pub min_packet_size: usize,
    pub max_packets_in_flight: usize,
    pub max_bytes_in_flight: usize,
}

impl Default for SendLimits {
    fn default() -> Self {
        Self {
            packets_per_sec: 1000,
            bytes_per_sec: 150_000,
            max_packet_size: 1200,
            min_packet_size: 35,
            max_packets_in_flight: 20,
            max_bytes_in_flight: 150_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Offered application protocols, in preference order.
    pub alpn: Vec<Vec<u8>>,
    /// Sent in EncryptedExtensions. Connection IDs and the reset token
    /// are filled in per connection.
    pub transport_params: TransportParams,
    /// Sent on our HTTP/3 control stream.
    pub settings: Settings,
    pub limits: SendLimits,
    /// Microseconds a receive stream waits for more data before the
    /// HTTP/3 layer parses it.
    pub stream_check_delay: u64,
    /// Length of the connection IDs we issue.
    pub cid_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            alpn: vec![b"h3".to_vec()],
            transport_params: TransportParams::server_defaults(),
            settings: Settings::server_defaults(),
            limits: SendLimits::default(),
            stream_check_delay: 5 * MICROS_PER_MS,
            cid_len: 8,
        }
    }
}
