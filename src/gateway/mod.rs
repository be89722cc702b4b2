//! Gateway domain model: in-flight messages and the address index.

mod address;
mod message;

pub use address::{password_digest, AddressError, AddressIndex, Client, ClientNumber, NumberMatch};
pub use message::{next_log_id, MmsEnvelope, MmsPart, MsgContent, MsgKind, MsgQueueItem};
