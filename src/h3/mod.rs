//! HTTP/3 framing layer (RFC 9114).
//!
//! Frame codec, SETTINGS, stream classification and the QPACK codec.
//! Everything here works on byte slices; the connection owns the streams.

pub mod frame;
pub mod qpack;
pub mod settings;
pub mod stream_type;

pub use frame::{extract_frames, H3Frame};
pub use settings::Settings;
pub use stream_type::StreamKind;
