//! Binary frame of the LAN protocol.
//!
//! Every datagram starts with a fixed 36 byte little-endian header followed by a
//! payload whose schema is selected by the [`MessageType`]:
//!
//! ```text
//! frame           size: u16 | protocol/addressable/tagged/origin: u16 | source: u32
//! frame address   target: u64 | reserved: [u8; 6] | flags: u8 | sequence: u8
//! protocol header reserved: u64 | type: u16 | reserved: u16
//! ```
//!
//! The frame codec only cares about the header and the payload length. Typed
//! payloads live in [`payload`] and [`color`].

use std::fmt::{Display, Formatter};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

pub mod color;
pub mod payload;

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 36;
/// The only protocol number devices speak.
pub const PROTOCOL_NUMBER: u16 = 1024;
/// Well-known UDP port of the LAN protocol.
pub const DEFAULT_PORT: u16 = 56700;

const PROTOCOL_MASK: u16 = 0x0fff;
const ADDRESSABLE_BIT: u16 = 1 << 12;
const TAGGED_BIT: u16 = 1 << 13;
const RES_REQUIRED_BIT: u8 = 0b01;
const ACK_REQUIRED_BIT: u8 = 0b10;

/// Reasons a buffer could not be turned into a [`Message`] (or a message into a buffer).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedMessage {
    #[error("message truncated: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("size field says {declared} bytes but the datagram has {actual}")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("unsupported protocol number {0}")]
    UnsupportedProtocol(u16),

    #[error("addressable bit is not set")]
    NotAddressable,

    #[error("unknown message type {0}")]
    UnknownMessageType(u16),

    #[error("payload of {size} bytes does not fit in a frame")]
    PayloadTooLarge { size: usize },

    #[error("{message_type} payload needs {need} bytes, got {got}")]
    PayloadTruncated {
        message_type: MessageType,
        need: usize,
        got: usize,
    },

    #[error("inconsistent {message_type} payload: {reason}")]
    InconsistentPayload {
        message_type: MessageType,
        reason: String,
    },
}

macro_rules! message_types {
    ($($(#[$doc:meta])* $name:ident = $code:literal,)+) => {
        /// Tag identifying the payload schema of a [`Message`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum MessageType {
            $($(#[$doc])* $name,)+
        }

        impl MessageType {
            /// The numeric tag written on the wire.
            pub fn code(self) -> u16 {
                match self {
                    $(MessageType::$name => $code,)+
                }
            }
        }

        impl TryFrom<u16> for MessageType {
            type Error = MalformedMessage;

            fn try_from(code: u16) -> Result<Self, Self::Error> {
                match code {
                    $($code => Ok(MessageType::$name),)+
                    other => Err(MalformedMessage::UnknownMessageType(other)),
                }
            }
        }
    };
}

message_types! {
    /// Discovery request, broadcast by clients.
    GetService = 2,
    /// Discovery reply.
    StateService = 3,
    GetPower = 20,
    SetPower = 21,
    StatePower = 22,
    GetLabel = 23,
    SetLabel = 24,
    StateLabel = 25,
    GetVersion = 32,
    StateVersion = 33,
    /// Bare receipt confirmation, sent when `ack_required` is set.
    Acknowledgement = 45,
    GetGroup = 51,
    StateGroup = 53,
    EchoRequest = 58,
    EchoResponse = 59,
    LightGet = 101,
    LightSetColor = 102,
    LightState = 107,
    LightSetPower = 117,
    SetColorZones = 501,
    GetColorZones = 502,
    /// One fragment of a multi-zone state, eight zones per datagram.
    StateMultiZone = 506,
}

impl MessageType {
    /// Whether this message answers a discovery request.
    pub fn is_discovery_reply(self) -> bool {
        self == MessageType::StateService
    }
}

impl Display for MessageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// One protocol message, header fields plus an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Identifies the client instance; devices echo it back in replies.
    pub source: u32,
    /// Caller-assigned exchange number, echoed back in replies.
    pub sequence: u8,
    pub message_type: MessageType,
    /// Device serial (MAC in the low six bytes), zero for "all devices".
    pub target: u64,
    /// Set when the message is addressed to all devices.
    pub tagged: bool,
    pub ack_required: bool,
    pub res_required: bool,
    pub payload: Bytes,
}

/// An outbound [`Message`]. The dispatcher owns its `ack_required`/`res_required` flags.
pub type Request = Message;

impl Message {
    /// A message for all devices with source and sequence left at zero.
    pub fn new(message_type: MessageType, payload: impl Into<Bytes>) -> Self {
        Message {
            source: 0,
            sequence: 0,
            message_type,
            target: 0,
            tagged: true,
            ack_required: false,
            res_required: false,
            payload: payload.into(),
        }
    }

    pub fn with_source(mut self, source: u32) -> Self {
        self.source = source;
        self
    }

    pub fn with_sequence(mut self, sequence: u8) -> Self {
        self.sequence = sequence;
        self
    }

    /// Addresses a single device. A zero target addresses every device and sets `tagged`.
    pub fn with_target(mut self, target: u64) -> Self {
        self.target = target;
        self.tagged = target == 0;
        self
    }

    /// The device serial carried in `target`, as twelve hex digits.
    pub fn serial(&self) -> String {
        serial_to_string(self.target)
    }

    pub fn encode(&self) -> Result<Bytes, MalformedMessage> {
        let size = HEADER_SIZE + self.payload.len();
        let size_field =
            u16::try_from(size).map_err(|_| MalformedMessage::PayloadTooLarge { size })?;

        let mut buffer = BytesMut::with_capacity(size);

        // frame
        buffer.put_u16_le(size_field);
        let mut protocol = PROTOCOL_NUMBER | ADDRESSABLE_BIT;
        if self.tagged {
            protocol |= TAGGED_BIT;
        }
        buffer.put_u16_le(protocol);
        buffer.put_u32_le(self.source);

        // frame address
        buffer.put_u64_le(self.target);
        buffer.put_bytes(0, 6);
        let mut flags = 0u8;
        if self.res_required {
            flags |= RES_REQUIRED_BIT;
        }
        if self.ack_required {
            flags |= ACK_REQUIRED_BIT;
        }
        buffer.put_u8(flags);
        buffer.put_u8(self.sequence);

        // protocol header
        buffer.put_u64_le(0);
        buffer.put_u16_le(self.message_type.code());
        buffer.put_u16_le(0);

        buffer.extend_from_slice(&self.payload);
        Ok(buffer.freeze())
    }

    /// Decodes one datagram. Never panics; every failure is classified.
    pub fn decode(data: &[u8]) -> Result<Self, MalformedMessage> {
        if data.len() < HEADER_SIZE {
            return Err(MalformedMessage::Truncated {
                need: HEADER_SIZE,
                got: data.len(),
            });
        }

        let mut header = &data[..HEADER_SIZE];
        let declared = header.get_u16_le() as usize;
        if declared != data.len() {
            return Err(MalformedMessage::SizeMismatch {
                declared,
                actual: data.len(),
            });
        }

        let protocol = header.get_u16_le();
        if protocol & PROTOCOL_MASK != PROTOCOL_NUMBER {
            return Err(MalformedMessage::UnsupportedProtocol(
                protocol & PROTOCOL_MASK,
            ));
        }
        if protocol & ADDRESSABLE_BIT == 0 {
            return Err(MalformedMessage::NotAddressable);
        }
        let tagged = protocol & TAGGED_BIT != 0;
        let source = header.get_u32_le();

        let target = header.get_u64_le();
        header.advance(6);
        let flags = header.get_u8();
        let sequence = header.get_u8();

        header.advance(8);
        let message_type = MessageType::try_from(header.get_u16_le())?;

        Ok(Message {
            source,
            sequence,
            message_type,
            target,
            tagged,
            ack_required: flags & ACK_REQUIRED_BIT != 0,
            res_required: flags & RES_REQUIRED_BIT != 0,
            payload: Bytes::copy_from_slice(&data[HEADER_SIZE..]),
        })
    }

    /// Decodes the payload as `P`, checking its length first.
    pub fn payload_as<P: payload::Payload>(&self) -> Result<P, MalformedMessage> {
        P::from_bytes(self.message_type, &self.payload)
    }
}

/// Formats a target the way device labels print it, e.g. `d073d5001337`.
pub fn serial_to_string(target: u64) -> String {
    hex::encode(&target.to_le_bytes()[..6])
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn sample() -> Message {
        Message::new(MessageType::LightSetColor, vec![1u8, 2, 3, 4, 5])
            .with_source(0xdead_beef)
            .with_sequence(42)
            .with_target(0x0000_3713_00d5_73d0)
    }

    #[test]
    fn test_round_trip_keeps_every_field() {
        let mut message = sample();
        message.ack_required = true;
        message.res_required = true;
        let decoded = Message::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);

        let broadcast = Message::new(MessageType::GetService, Bytes::new()).with_source(7);
        let decoded = Message::decode(&broadcast.encode().unwrap()).unwrap();
        assert_eq!(decoded, broadcast);
        assert!(decoded.tagged);
        assert!(!decoded.ack_required && !decoded.res_required);
    }

    #[test]
    fn test_known_header_layout() {
        let message = Message::new(MessageType::GetService, Bytes::new())
            .with_source(0x0102_0304)
            .with_sequence(9);
        let bytes = message.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[0..2], &[36, 0]);
        // protocol 1024 | addressable | tagged
        assert_eq!(&bytes[2..4], &[0x00, 0x34]);
        assert_eq!(&bytes[4..8], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(bytes[23], 9);
        assert_eq!(&bytes[32..34], &[2, 0]);
    }

    #[test]
    fn test_flag_bits() {
        let mut message = sample();
        message.res_required = true;
        assert_eq!(message.encode().unwrap()[22], 0b01);
        message.res_required = false;
        message.ack_required = true;
        assert_eq!(message.encode().unwrap()[22], 0b10);
    }

    #[test]
    fn test_decode_truncated() {
        let bytes = sample().encode().unwrap();
        assert_eq!(
            Message::decode(&bytes[..10]),
            Err(MalformedMessage::Truncated { need: 36, got: 10 })
        );
        assert_eq!(
            Message::decode(&bytes[..bytes.len() - 1]),
            Err(MalformedMessage::SizeMismatch {
                declared: bytes.len(),
                actual: bytes.len() - 1
            })
        );
    }

    #[test]
    fn test_decode_rejects_unknown_type_and_protocol() {
        let mut bytes = sample().encode().unwrap().to_vec();
        bytes[32] = 0xff;
        bytes[33] = 0x7f;
        assert_eq!(
            Message::decode(&bytes),
            Err(MalformedMessage::UnknownMessageType(0x7fff))
        );

        let mut bytes = sample().encode().unwrap().to_vec();
        bytes[2] = 0x01;
        assert!(matches!(
            Message::decode(&bytes),
            Err(MalformedMessage::UnsupportedProtocol(_))
        ));

        let mut bytes = sample().encode().unwrap().to_vec();
        bytes[3] &= !0x10;
        assert_eq!(
            Message::decode(&bytes),
            Err(MalformedMessage::NotAddressable)
        );
    }

    #[test]
    fn test_decode_never_panics_on_garbage() {
        let mut rng = StdRng::seed_from_u64(0x1234_5678);
        for len in 0..200usize {
            let mut buffer = vec![0u8; len];
            rng.fill(&mut buffer[..]);
            let _ = Message::decode(&buffer);
        }
        // valid header, random payload
        for _ in 0..50 {
            let mut bytes = sample().encode().unwrap().to_vec();
            rng.fill(&mut bytes[HEADER_SIZE..]);
            let _ = Message::decode(&bytes);
        }
    }

    #[test]
    fn test_payload_too_large() {
        let message = Message::new(MessageType::EchoRequest, vec![0u8; u16::MAX as usize]);
        assert!(matches!(
            message.encode(),
            Err(MalformedMessage::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_serial() {
        assert_eq!(sample().serial(), "d073d5001337");
    }
}
