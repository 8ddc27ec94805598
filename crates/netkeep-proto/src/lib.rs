//! Protocol codec for the netkeep management protocol.
//!
//! Clients speak a NETCONF-style protocol to their agent: a `hello` exchange
//! negotiates capabilities, after which the client issues `rpc` messages and
//! receives `rpc-reply` messages plus asynchronous `notification` messages
//! when an event subscription is active. Payloads are JSON documents and every
//! message is terminated by the base:1.0 end-of-message marker `]]>]]>`.
//!
//! The crate is deliberately free of I/O policy. [`framing`] splits a byte
//! stream into frames, [`codec`] turns frames into typed messages, and the
//! remaining modules describe the messages themselves. Agents and the server
//! share these types so a reply built by a configuration module travels to
//! the client unchanged.
//!
//! # Example
//!
//! ```rust
//! use netkeep_proto::{Decoded, FrameDecoder, decode_request};
//!
//! let mut decoder = FrameDecoder::new(1024);
//! decoder.push(br#"{"rpc":{"message-id":"1","operation":"get"}}]]>]]>"#);
//! let frame = decoder.next_frame().expect("frame fits").expect("frame complete");
//! match decode_request(&frame) {
//!     Decoded::Rpc(rpc) => assert_eq!(rpc.operation, "get"),
//!     other => panic!("unexpected decode result: {other:?}"),
//! }
//! ```

pub mod capability;
pub mod codec;
pub mod error;
pub mod framing;
pub mod message;
pub mod subscription;
pub mod timestamp;

pub use self::capability::{Capability, CapabilitySet, NegotiationError, negotiate};
pub use self::codec::{
    CodecError, Decoded, decode_hello, decode_request, encode_hello, encode_notification,
    encode_reply,
};
pub use self::error::{ErrorInfo, ErrorTag, ErrorType, RpcError, Severity};
pub use self::framing::{END_OF_MESSAGE, FrameDecoder, FramingError, write_frame};
pub use self::message::{
    ClientMessage, Hello, Notification, OperationKind, Reply, ReplyBody, Rpc, ServerMessage,
};
pub use self::subscription::{DEFAULT_STREAM, SubscriptionRequest, SubtreeFilter};
