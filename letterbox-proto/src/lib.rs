//! Protocol-level pieces of the Letterbox IMAP4rev1 client: command tags,
//! wire types, the incremental response accumulator and the per-command
//! response handlers.
//!
//! This crate knows nothing about sockets. Bytes go into an
//! [`Accumulator`] as they arrive from whatever transport the caller runs;
//! once a response is complete, [`handler::dispatch`] turns it into the
//! typed result of the command that produced it.

pub mod builders;
pub mod error;
pub mod handler;
pub mod parser;
pub mod response;
pub mod tag;
pub mod types;

pub use crate::error::{Error, ErrorKind};
pub use crate::response::{Accumulator, Digest};
pub use crate::tag::{Tag, TagGenerator};
