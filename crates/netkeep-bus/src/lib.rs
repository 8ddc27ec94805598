//! Message bus between netkeep agents and the netkeep server.
//!
//! Every agent holds one connection to the server socket. Over it the agent
//! issues [`BusRequest`] frames and receives [`BusResponse`] frames strictly in
//! order; the server may additionally push [`BusSignal`] frames, for example
//! to tell an agent that its session was killed by another session. Frames
//! are single JSON lines bounded by [`DEFAULT_MAX_FRAME_BYTES`].
//!
//! The server learns that an agent went away when its connection reaches end
//! of stream, which is the connection-loss notification the session registry
//! relies on to drop orphaned sessions.

pub mod client;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod transport;

pub use self::client::{BusClient, EventBatch, ServerInfo};
pub use self::error::BusError;
pub use self::frame::{DEFAULT_MAX_FRAME_BYTES, FrameReader, write_frame};
pub use self::protocol::{BusRequest, BusResponse, BusSignal, EventRecord, ServerFrame};
pub use self::transport::{BusStream, CONNECTION_TIMEOUT, connect};
