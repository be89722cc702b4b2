//! SMPP v3.4 wire layer.
//!
//! Covers the PDU subset the gateway speaks: bind (all three modes),
//! submit_sm, deliver_sm, unbind, enquire_link and generic_nack. Anything
//! else decodes into an opaque frame so the session can echo it back.

mod codec;
mod pdu;

pub use codec::{CodecError, SmppCodec};
pub use pdu::{
    command_id, BindRequest, BindResponse, CommandStatus, Frame, MessageIdBody, Pdu, ShortMessage,
    HEADER_LEN, MAX_PDU_LEN,
};
