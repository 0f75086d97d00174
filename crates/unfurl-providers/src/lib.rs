//! Wire side of the unfurl streaming engine: frame decoding and the
//! transports that deliver frames and job snapshots.

pub mod frames;
pub mod http;
pub mod replay;
pub mod transport;

pub use frames::{decode_delivery, decode_line, Frame, FrameDecoder, FrameError, ReasoningKind, ReasoningNotice};
pub use http::HttpJobClient;
pub use replay::{ReplayStep, ReplayTransport, StaticSnapshotSource};
pub use transport::{
    ByteStream, JobResult, JobSnapshot, SnapshotSource, StreamTransport, TransportError,
    STATUS_COMPLETED,
};
