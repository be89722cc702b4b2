//! Length-prefixed framing for SMPP PDUs.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use super::pdu::{CommandStatus, Frame, Pdu, HEADER_LEN, MAX_PDU_LEN};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command_length {0} out of bounds")]
    BadLength(u32),

    #[error("truncated PDU: {0}")]
    Truncated(&'static str),
}

/// Codec for `Framed` SMPP streams.
#[derive(Debug, Default)]
pub struct SmppCodec;

impl SmppCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for SmppCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let command_length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        if command_length < HEADER_LEN as u32 || command_length > MAX_PDU_LEN {
            return Err(CodecError::BadLength(command_length));
        }

        if src.len() < command_length as usize {
            src.reserve(command_length as usize - src.len());
            return Ok(None);
        }

        let mut pdu = src.split_to(command_length as usize);
        pdu.advance(4);
        let command = pdu.get_u32();
        let status = CommandStatus(pdu.get_u32());
        let sequence = pdu.get_u32();

        let body = Pdu::decode_body(command, pdu.freeze())?;

        Ok(Some(Frame {
            status,
            sequence,
            body,
        }))
    }
}

impl Encoder<Frame> for SmppCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        let mut body = BytesMut::new();
        frame.body.encode_body(&mut body);

        let command_length = (HEADER_LEN + body.len()) as u32;
        if command_length > MAX_PDU_LEN {
            return Err(CodecError::BadLength(command_length));
        }

        dst.reserve(command_length as usize);
        dst.put_u32(command_length);
        dst.put_u32(frame.body.command_id());
        dst.put_u32(frame.status.0);
        dst.put_u32(frame.sequence);
        dst.put_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smpp::pdu::{command_id, BindRequest, MessageIdBody, ShortMessage};

    fn round_trip(frame: Frame) -> Frame {
        let mut codec = SmppCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();
        codec.decode(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn bind_transceiver_round_trip() {
        let frame = Frame::request(
            1,
            Pdu::BindTransceiver(BindRequest {
                system_id: "acme".into(),
                password: "secret".into(),
                interface_version: 0x34,
                ..Default::default()
            }),
        );
        let decoded = round_trip(frame.clone());
        assert_eq!(decoded, frame);
        assert_eq!(decoded.body.command_id(), command_id::BIND_TRANSCEIVER);
    }

    #[test]
    fn submit_sm_round_trip() {
        let frame = Frame::request(
            7,
            Pdu::SubmitSm(ShortMessage::new("+15550999", "+15550001", "hello")),
        );
        let decoded = round_trip(frame);
        match decoded.body {
            Pdu::SubmitSm(sm) => {
                assert_eq!(sm.source_addr, "+15550999");
                assert_eq!(sm.destination_addr, "+15550001");
                assert_eq!(sm.text(), "hello");
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn submit_sm_resp_round_trip() {
        let frame = Frame::response(
            7,
            CommandStatus::OK,
            Pdu::SubmitSmResp(MessageIdBody {
                message_id: "17000000001".into(),
            }),
        );
        assert_eq!(round_trip(frame.clone()), frame);
    }

    #[test]
    fn partial_header_yields_none() {
        let mut codec = SmppCodec::new();
        let mut buf = BytesMut::from(&[0u8, 0, 0][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn partial_body_yields_none() {
        let mut codec = SmppCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(
                Frame::request(1, Pdu::SubmitSm(ShortMessage::new("a", "b", "body"))),
                &mut buf,
            )
            .unwrap();
        buf.truncate(buf.len() - 2);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversize_length_is_rejected() {
        let mut codec = SmppCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_PDU_LEN + 1);
        buf.put_u32(command_id::ENQUIRE_LINK);
        buf.put_u32(0);
        buf.put_u32(1);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::BadLength(_))
        ));
    }

    #[test]
    fn unknown_command_passes_through() {
        let frame = Frame::request(
            3,
            Pdu::Other {
                command_id: 0x0000_0103,
                body: vec![1, 2, 3],
            },
        );
        assert_eq!(round_trip(frame.clone()), frame);
    }
}
