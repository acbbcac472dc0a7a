//! Tokio transport and pipelined client engine on top of
//! [`letterbox_proto`].
//!
//! The engine owns the socket, the tag generator and a FIFO of in-flight
//! commands. Commands may be submitted without waiting for earlier replies;
//! the server's responses are attributed to commands strictly in submission
//! order, as IMAP pipelining requires.

mod client;
mod transport;

pub use crate::client::{
    CommandHandle, Config, ConnectionState, ImapClient, DEFAULT_TIMEOUT_MS,
};
pub use crate::transport::{TlsMode, PORT_NO_TLS, PORT_TLS};

pub use letterbox_proto::{Error, ErrorKind};

pub mod types {
    pub use letterbox_proto::types::*;
}
