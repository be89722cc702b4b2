//! PDU bodies and their wire encoding.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::codec::CodecError;

/// Fixed header size for every PDU.
pub const HEADER_LEN: usize = 16;

/// Upper bound on a whole PDU; larger frames are a protocol error.
pub const MAX_PDU_LEN: u32 = 64 * 1024;

/// SMPP command identifiers.
pub mod command_id {
    pub const GENERIC_NACK: u32 = 0x8000_0000;
    pub const BIND_RECEIVER: u32 = 0x0000_0001;
    pub const BIND_RECEIVER_RESP: u32 = 0x8000_0001;
    pub const BIND_TRANSMITTER: u32 = 0x0000_0002;
    pub const BIND_TRANSMITTER_RESP: u32 = 0x8000_0002;
    pub const SUBMIT_SM: u32 = 0x0000_0004;
    pub const SUBMIT_SM_RESP: u32 = 0x8000_0004;
    pub const DELIVER_SM: u32 = 0x0000_0005;
    pub const DELIVER_SM_RESP: u32 = 0x8000_0005;
    pub const UNBIND: u32 = 0x0000_0006;
    pub const UNBIND_RESP: u32 = 0x8000_0006;
    pub const BIND_TRANSCEIVER: u32 = 0x0000_0009;
    pub const BIND_TRANSCEIVER_RESP: u32 = 0x8000_0009;
    pub const ENQUIRE_LINK: u32 = 0x0000_0015;
    pub const ENQUIRE_LINK_RESP: u32 = 0x8000_0015;
}

/// Command status codes (ESME_*).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus(pub u32);

impl CommandStatus {
    pub const OK: Self = Self(0x0000_0000);
    pub const INVALID_COMMAND_ID: Self = Self(0x0000_0003);
    pub const INVALID_BIND_STATUS: Self = Self(0x0000_0004);
    pub const SYSTEM_ERROR: Self = Self(0x0000_0008);
    pub const BIND_FAILED: Self = Self(0x0000_000D);
    pub const INVALID_PASSWORD: Self = Self(0x0000_000E);
    pub const INVALID_SYSTEM_ID: Self = Self(0x0000_000F);
    pub const SUBMIT_FAILED: Self = Self(0x0000_0045);

    pub fn is_ok(self) -> bool {
        self == Self::OK
    }
}

/// Body of the three bind request variants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindRequest {
    pub system_id: String,
    pub password: String,
    pub system_type: String,
    pub interface_version: u8,
    pub addr_ton: u8,
    pub addr_npi: u8,
    pub address_range: String,
}

/// Body of the three bind response variants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindResponse {
    pub system_id: String,
}

/// Shared layout of submit_sm and deliver_sm.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShortMessage {
    pub service_type: String,
    pub source_addr_ton: u8,
    pub source_addr_npi: u8,
    pub source_addr: String,
    pub dest_addr_ton: u8,
    pub dest_addr_npi: u8,
    pub destination_addr: String,
    pub esm_class: u8,
    pub protocol_id: u8,
    pub priority_flag: u8,
    pub schedule_delivery_time: String,
    pub validity_period: String,
    pub registered_delivery: u8,
    pub replace_if_present: u8,
    pub data_coding: u8,
    pub sm_default_msg_id: u8,
    pub short_message: Vec<u8>,
}

impl ShortMessage {
    pub fn new(
        source_addr: impl Into<String>,
        destination_addr: impl Into<String>,
        text: impl AsRef<[u8]>,
    ) -> Self {
        Self {
            source_addr: source_addr.into(),
            destination_addr: destination_addr.into(),
            short_message: text.as_ref().to_vec(),
            ..Default::default()
        }
    }

    /// Message body as text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.short_message).into_owned()
    }
}

/// Body of submit_sm_resp / deliver_sm_resp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageIdBody {
    pub message_id: String,
}

/// Decoded PDU body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    BindTransmitter(BindRequest),
    BindReceiver(BindRequest),
    BindTransceiver(BindRequest),
    BindTransmitterResp(BindResponse),
    BindReceiverResp(BindResponse),
    BindTransceiverResp(BindResponse),
    SubmitSm(ShortMessage),
    SubmitSmResp(MessageIdBody),
    DeliverSm(ShortMessage),
    DeliverSmResp(MessageIdBody),
    Unbind,
    UnbindResp,
    EnquireLink,
    EnquireLinkResp,
    GenericNack,
    /// Anything outside the supported subset; kept raw for echoing.
    Other { command_id: u32, body: Vec<u8> },
}

impl Pdu {
    pub fn command_id(&self) -> u32 {
        match self {
            Pdu::BindTransmitter(_) => command_id::BIND_TRANSMITTER,
            Pdu::BindReceiver(_) => command_id::BIND_RECEIVER,
            Pdu::BindTransceiver(_) => command_id::BIND_TRANSCEIVER,
            Pdu::BindTransmitterResp(_) => command_id::BIND_TRANSMITTER_RESP,
            Pdu::BindReceiverResp(_) => command_id::BIND_RECEIVER_RESP,
            Pdu::BindTransceiverResp(_) => command_id::BIND_TRANSCEIVER_RESP,
            Pdu::SubmitSm(_) => command_id::SUBMIT_SM,
            Pdu::SubmitSmResp(_) => command_id::SUBMIT_SM_RESP,
            Pdu::DeliverSm(_) => command_id::DELIVER_SM,
            Pdu::DeliverSmResp(_) => command_id::DELIVER_SM_RESP,
            Pdu::Unbind => command_id::UNBIND,
            Pdu::UnbindResp => command_id::UNBIND_RESP,
            Pdu::EnquireLink => command_id::ENQUIRE_LINK,
            Pdu::EnquireLinkResp => command_id::ENQUIRE_LINK_RESP,
            Pdu::GenericNack => command_id::GENERIC_NACK,
            Pdu::Other { command_id, .. } => *command_id,
        }
    }

    pub fn is_response(&self) -> bool {
        self.command_id() & 0x8000_0000 != 0
    }
}

/// One framed PDU: status + sequence + body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub status: CommandStatus,
    pub sequence: u32,
    pub body: Pdu,
}

impl Frame {
    pub fn request(sequence: u32, body: Pdu) -> Self {
        Self {
            status: CommandStatus::OK,
            sequence,
            body,
        }
    }

    pub fn response(sequence: u32, status: CommandStatus, body: Pdu) -> Self {
        Self {
            status,
            sequence,
            body,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire encoding
// ---------------------------------------------------------------------------

fn put_cstring(dst: &mut BytesMut, s: &str) {
    dst.put_slice(s.as_bytes());
    dst.put_u8(0);
}

fn get_cstring(src: &mut Bytes) -> Result<String, CodecError> {
    match src.iter().position(|&b| b == 0) {
        Some(pos) => {
            let raw = src.split_to(pos);
            src.advance(1);
            Ok(String::from_utf8_lossy(&raw).into_owned())
        }
        None => Err(CodecError::Truncated("unterminated c-octet string")),
    }
}

fn get_u8(src: &mut Bytes) -> Result<u8, CodecError> {
    if src.remaining() < 1 {
        return Err(CodecError::Truncated("missing octet"));
    }
    Ok(src.get_u8())
}

impl BindRequest {
    fn encode(&self, dst: &mut BytesMut) {
        put_cstring(dst, &self.system_id);
        put_cstring(dst, &self.password);
        put_cstring(dst, &self.system_type);
        dst.put_u8(self.interface_version);
        dst.put_u8(self.addr_ton);
        dst.put_u8(self.addr_npi);
        put_cstring(dst, &self.address_range);
    }

    fn decode(src: &mut Bytes) -> Result<Self, CodecError> {
        Ok(Self {
            system_id: get_cstring(src)?,
            password: get_cstring(src)?,
            system_type: get_cstring(src)?,
            interface_version: get_u8(src)?,
            addr_ton: get_u8(src)?,
            addr_npi: get_u8(src)?,
            address_range: get_cstring(src)?,
        })
    }
}

impl BindResponse {
    fn encode(&self, dst: &mut BytesMut) {
        put_cstring(dst, &self.system_id);
    }

    fn decode(src: &mut Bytes) -> Result<Self, CodecError> {
        // Error responses may carry an empty body.
        if src.is_empty() {
            return Ok(Self::default());
        }
        Ok(Self {
            system_id: get_cstring(src)?,
        })
    }
}

impl ShortMessage {
    fn encode(&self, dst: &mut BytesMut) {
        put_cstring(dst, &self.service_type);
        dst.put_u8(self.source_addr_ton);
        dst.put_u8(self.source_addr_npi);
        put_cstring(dst, &self.source_addr);
        dst.put_u8(self.dest_addr_ton);
        dst.put_u8(self.dest_addr_npi);
        put_cstring(dst, &self.destination_addr);
        dst.put_u8(self.esm_class);
        dst.put_u8(self.protocol_id);
        dst.put_u8(self.priority_flag);
        put_cstring(dst, &self.schedule_delivery_time);
        put_cstring(dst, &self.validity_period);
        dst.put_u8(self.registered_delivery);
        dst.put_u8(self.replace_if_present);
        dst.put_u8(self.data_coding);
        dst.put_u8(self.sm_default_msg_id);
        // sm_length is a single octet; longer bodies belong in message_payload.
        let sm = &self.short_message[..self.short_message.len().min(254)];
        dst.put_u8(sm.len() as u8);
        dst.put_slice(sm);
    }

    fn decode(src: &mut Bytes) -> Result<Self, CodecError> {
        let service_type = get_cstring(src)?;
        let source_addr_ton = get_u8(src)?;
        let source_addr_npi = get_u8(src)?;
        let source_addr = get_cstring(src)?;
        let dest_addr_ton = get_u8(src)?;
        let dest_addr_npi = get_u8(src)?;
        let destination_addr = get_cstring(src)?;
        let esm_class = get_u8(src)?;
        let protocol_id = get_u8(src)?;
        let priority_flag = get_u8(src)?;
        let schedule_delivery_time = get_cstring(src)?;
        let validity_period = get_cstring(src)?;
        let registered_delivery = get_u8(src)?;
        let replace_if_present = get_u8(src)?;
        let data_coding = get_u8(src)?;
        let sm_default_msg_id = get_u8(src)?;
        let sm_length = get_u8(src)? as usize;
        if src.remaining() < sm_length {
            return Err(CodecError::Truncated("short_message shorter than sm_length"));
        }
        let short_message = src.split_to(sm_length).to_vec();
        // Optional TLVs may follow; the gateway ignores them.

        Ok(Self {
            service_type,
            source_addr_ton,
            source_addr_npi,
            source_addr,
            dest_addr_ton,
            dest_addr_npi,
            destination_addr,
            esm_class,
            protocol_id,
            priority_flag,
            schedule_delivery_time,
            validity_period,
            registered_delivery,
            replace_if_present,
            data_coding,
            sm_default_msg_id,
            short_message,
        })
    }
}

impl MessageIdBody {
    fn encode(&self, dst: &mut BytesMut) {
        put_cstring(dst, &self.message_id);
    }

    fn decode(src: &mut Bytes) -> Result<Self, CodecError> {
        if src.is_empty() {
            return Ok(Self::default());
        }
        Ok(Self {
            message_id: get_cstring(src)?,
        })
    }
}

impl Pdu {
    pub(super) fn encode_body(&self, dst: &mut BytesMut) {
        match self {
            Pdu::BindTransmitter(b) | Pdu::BindReceiver(b) | Pdu::BindTransceiver(b) => {
                b.encode(dst)
            }
            Pdu::BindTransmitterResp(b) | Pdu::BindReceiverResp(b) | Pdu::BindTransceiverResp(b) => {
                b.encode(dst)
            }
            Pdu::SubmitSm(b) | Pdu::DeliverSm(b) => b.encode(dst),
            Pdu::SubmitSmResp(b) | Pdu::DeliverSmResp(b) => b.encode(dst),
            Pdu::Unbind
            | Pdu::UnbindResp
            | Pdu::EnquireLink
            | Pdu::EnquireLinkResp
            | Pdu::GenericNack => {}
            Pdu::Other { body, .. } => dst.put_slice(body),
        }
    }

    pub(super) fn decode_body(command: u32, mut body: Bytes) -> Result<Self, CodecError> {
        Ok(match command {
            command_id::BIND_TRANSMITTER => Pdu::BindTransmitter(BindRequest::decode(&mut body)?),
            command_id::BIND_RECEIVER => Pdu::BindReceiver(BindRequest::decode(&mut body)?),
            command_id::BIND_TRANSCEIVER => Pdu::BindTransceiver(BindRequest::decode(&mut body)?),
            command_id::BIND_TRANSMITTER_RESP => {
                Pdu::BindTransmitterResp(BindResponse::decode(&mut body)?)
            }
            command_id::BIND_RECEIVER_RESP => {
                Pdu::BindReceiverResp(BindResponse::decode(&mut body)?)
            }
            command_id::BIND_TRANSCEIVER_RESP => {
                Pdu::BindTransceiverResp(BindResponse::decode(&mut body)?)
            }
            command_id::SUBMIT_SM => Pdu::SubmitSm(ShortMessage::decode(&mut body)?),
            command_id::SUBMIT_SM_RESP => Pdu::SubmitSmResp(MessageIdBody::decode(&mut body)?),
            command_id::DELIVER_SM => Pdu::DeliverSm(ShortMessage::decode(&mut body)?),
            command_id::DELIVER_SM_RESP => Pdu::DeliverSmResp(MessageIdBody::decode(&mut body)?),
            command_id::UNBIND => Pdu::Unbind,
            command_id::UNBIND_RESP => Pdu::UnbindResp,
            command_id::ENQUIRE_LINK => Pdu::EnquireLink,
            command_id::ENQUIRE_LINK_RESP => Pdu::EnquireLinkResp,
            command_id::GENERIC_NACK => Pdu::GenericNack,
            other => Pdu::Other {
                command_id: other,
                body: body.to_vec(),
            },
        })
    }
}
