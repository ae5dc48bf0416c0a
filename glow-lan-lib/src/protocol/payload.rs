//! Typed payloads for the messages the device facade uses.
//!
//! Each payload has a fixed wire size. Decoding checks the length once and then
//! reads with [`bytes::Buf`], so a payload decoder cannot run past its buffer.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::protocol::color::Hsbk;
use crate::protocol::{MalformedMessage, MessageType};

/// Size of the fixed, NUL padded label field.
pub const LABEL_SIZE: usize = 32;
/// Size of an echo payload.
pub const ECHO_SIZE: usize = 64;
/// Zones carried by one multi-zone fragment.
pub const ZONES_PER_FRAGMENT: usize = 8;

/// A fixed-size payload schema.
pub trait Payload: Sized {
    /// Bytes on the wire.
    const SIZE: usize;

    fn write(&self, buffer: &mut BytesMut);

    /// Reads from a buffer known to hold at least [`Self::SIZE`] bytes.
    fn read(buffer: &mut &[u8]) -> Self;

    fn to_bytes(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(Self::SIZE);
        self.write(&mut buffer);
        buffer.freeze()
    }

    fn from_bytes(message_type: MessageType, data: &[u8]) -> Result<Self, MalformedMessage> {
        if data.len() < Self::SIZE {
            return Err(MalformedMessage::PayloadTruncated {
                message_type,
                need: Self::SIZE,
                got: data.len(),
            });
        }
        let mut buffer = &data[..Self::SIZE];
        Ok(Self::read(&mut buffer))
    }
}

/// Discovery reply: which service a device offers and on what port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateService {
    /// `1` is UDP, the only service this client talks to.
    pub service: u8,
    pub port: u32,
}

impl StateService {
    pub const UDP: u8 = 1;
}

impl Payload for StateService {
    const SIZE: usize = 5;

    fn write(&self, buffer: &mut BytesMut) {
        buffer.put_u8(self.service);
        buffer.put_u32_le(self.port);
    }

    fn read(buffer: &mut &[u8]) -> Self {
        StateService {
            service: buffer.get_u8(),
            port: buffer.get_u32_le(),
        }
    }
}

/// Device power level. Devices only use `0` and `65535`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerLevel {
    pub level: u16,
}

impl PowerLevel {
    pub const ON: PowerLevel = PowerLevel { level: u16::MAX };
    pub const OFF: PowerLevel = PowerLevel { level: 0 };

    pub fn from_on(on: bool) -> Self {
        if on {
            Self::ON
        } else {
            Self::OFF
        }
    }

    pub fn is_on(&self) -> bool {
        self.level > 0
    }
}

impl Payload for PowerLevel {
    const SIZE: usize = 2;

    fn write(&self, buffer: &mut BytesMut) {
        buffer.put_u16_le(self.level);
    }

    fn read(buffer: &mut &[u8]) -> Self {
        PowerLevel {
            level: buffer.get_u16_le(),
        }
    }
}

/// A UTF-8 label in a 32 byte NUL padded field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Label(pub String);

impl Label {
    /// Truncates on a character boundary so the label fits the field.
    pub fn new(text: &str) -> Self {
        let mut end = text.len().min(LABEL_SIZE);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        Label(text[..end].to_string())
    }

    fn write_field(text: &str, buffer: &mut BytesMut) {
        let label = Label::new(text);
        buffer.extend_from_slice(label.0.as_bytes());
        buffer.put_bytes(0, LABEL_SIZE - label.0.len());
    }

    fn read_field(buffer: &mut &[u8]) -> String {
        let mut field = [0u8; LABEL_SIZE];
        buffer.copy_to_slice(&mut field);
        let end = field.iter().position(|&b| b == 0).unwrap_or(LABEL_SIZE);
        String::from_utf8_lossy(&field[..end]).into_owned()
    }
}

impl Payload for Label {
    const SIZE: usize = LABEL_SIZE;

    fn write(&self, buffer: &mut BytesMut) {
        Label::write_field(&self.0, buffer);
    }

    fn read(buffer: &mut &[u8]) -> Self {
        Label(Label::read_field(buffer))
    }
}

/// Group membership of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateGroup {
    pub group: Uuid,
    pub label: String,
    pub updated_at: DateTime<Utc>,
}

impl StateGroup {
    /// The registry key of the group, lower-case hyphenated.
    pub fn group_id(&self) -> String {
        self.group.hyphenated().to_string()
    }
}

impl Payload for StateGroup {
    const SIZE: usize = 16 + LABEL_SIZE + 8;

    fn write(&self, buffer: &mut BytesMut) {
        buffer.extend_from_slice(self.group.as_bytes());
        Label::write_field(&self.label, buffer);
        let nanos = self.updated_at.timestamp_nanos_opt().unwrap_or(0);
        buffer.put_u64_le(nanos.max(0) as u64);
    }

    fn read(buffer: &mut &[u8]) -> Self {
        let mut group = [0u8; 16];
        buffer.copy_to_slice(&mut group);
        let label = Label::read_field(buffer);
        let nanos = buffer.get_u64_le().min(i64::MAX as u64) as i64;
        StateGroup {
            group: Uuid::from_bytes(group),
            label,
            updated_at: Utc.timestamp_nanos(nanos),
        }
    }
}

/// Hardware vendor, product and firmware version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct StateVersion {
    pub vendor: u32,
    pub product: u32,
    pub version: u32,
}

impl Payload for StateVersion {
    const SIZE: usize = 12;

    fn write(&self, buffer: &mut BytesMut) {
        buffer.put_u32_le(self.vendor);
        buffer.put_u32_le(self.product);
        buffer.put_u32_le(self.version);
    }

    fn read(buffer: &mut &[u8]) -> Self {
        StateVersion {
            vendor: buffer.get_u32_le(),
            product: buffer.get_u32_le(),
            version: buffer.get_u32_le(),
        }
    }
}

/// Full light state: color, power and label in one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightState {
    pub color: Hsbk,
    pub power: PowerLevel,
    pub label: String,
}

impl Payload for LightState {
    const SIZE: usize = Hsbk::SIZE + 2 + 2 + LABEL_SIZE + 8;

    fn write(&self, buffer: &mut BytesMut) {
        self.color.write(buffer);
        buffer.put_i16_le(0);
        self.power.write(buffer);
        Label::write_field(&self.label, buffer);
        buffer.put_u64_le(0);
    }

    fn read(buffer: &mut &[u8]) -> Self {
        let color = Hsbk::read(buffer);
        buffer.advance(2);
        let power = PowerLevel::read(buffer);
        let label = Label::read_field(buffer);
        buffer.advance(8);
        LightState {
            color,
            power,
            label,
        }
    }
}

fn put_duration(buffer: &mut BytesMut, duration: Duration) {
    buffer.put_u32_le(duration.as_millis().min(u32::MAX as u128) as u32);
}

fn get_duration(buffer: &mut &[u8]) -> Duration {
    Duration::from_millis(buffer.get_u32_le() as u64)
}

/// Fades the whole light to `color` over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetColor {
    pub color: Hsbk,
    pub duration: Duration,
}

impl Payload for SetColor {
    const SIZE: usize = 1 + Hsbk::SIZE + 4;

    fn write(&self, buffer: &mut BytesMut) {
        buffer.put_u8(0);
        self.color.write(buffer);
        put_duration(buffer, self.duration);
    }

    fn read(buffer: &mut &[u8]) -> Self {
        buffer.advance(1);
        let color = Hsbk::read(buffer);
        SetColor {
            color,
            duration: get_duration(buffer),
        }
    }
}

/// Power change with a fade duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetLightPower {
    pub level: PowerLevel,
    pub duration: Duration,
}

impl Payload for SetLightPower {
    const SIZE: usize = 2 + 4;

    fn write(&self, buffer: &mut BytesMut) {
        self.level.write(buffer);
        put_duration(buffer, self.duration);
    }

    fn read(buffer: &mut &[u8]) -> Self {
        SetLightPower {
            level: PowerLevel::read(buffer),
            duration: get_duration(buffer),
        }
    }
}

/// Inclusive zone range for a multi-zone query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneRange {
    pub start_index: u8,
    pub end_index: u8,
}

impl ZoneRange {
    pub const ALL: ZoneRange = ZoneRange {
        start_index: 0,
        end_index: u8::MAX,
    };
}

impl Payload for ZoneRange {
    const SIZE: usize = 2;

    fn write(&self, buffer: &mut BytesMut) {
        buffer.put_u8(self.start_index);
        buffer.put_u8(self.end_index);
    }

    fn read(buffer: &mut &[u8]) -> Self {
        ZoneRange {
            start_index: buffer.get_u8(),
            end_index: buffer.get_u8(),
        }
    }
}

/// Whether a zone change is shown immediately or buffered until the next `Apply`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneApply {
    NoApply = 0,
    Apply = 1,
    ApplyOnly = 2,
}

impl ZoneApply {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ZoneApply::NoApply,
            2 => ZoneApply::ApplyOnly,
            _ => ZoneApply::Apply,
        }
    }
}

/// Paints a zone range with one color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetColorZones {
    pub range: ZoneRange,
    pub color: Hsbk,
    pub duration: Duration,
    pub apply: ZoneApply,
}

impl Payload for SetColorZones {
    const SIZE: usize = ZoneRange::SIZE + Hsbk::SIZE + 4 + 1;

    fn write(&self, buffer: &mut BytesMut) {
        self.range.write(buffer);
        self.color.write(buffer);
        put_duration(buffer, self.duration);
        buffer.put_u8(self.apply as u8);
    }

    fn read(buffer: &mut &[u8]) -> Self {
        let range = ZoneRange::read(buffer);
        let color = Hsbk::read(buffer);
        let duration = get_duration(buffer);
        SetColorZones {
            range,
            color,
            duration,
            apply: ZoneApply::from_u8(buffer.get_u8()),
        }
    }
}

/// One fragment of a multi-zone state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateMultiZone {
    /// Total zones on the device.
    pub count: u8,
    /// Zone index of `colors[0]`.
    pub index: u8,
    pub colors: [Hsbk; ZONES_PER_FRAGMENT],
}

impl Payload for StateMultiZone {
    const SIZE: usize = 2 + Hsbk::SIZE * ZONES_PER_FRAGMENT;

    fn write(&self, buffer: &mut BytesMut) {
        buffer.put_u8(self.count);
        buffer.put_u8(self.index);
        for color in &self.colors {
            color.write(buffer);
        }
    }

    fn read(buffer: &mut &[u8]) -> Self {
        let count = buffer.get_u8();
        let index = buffer.get_u8();
        let mut colors = [Hsbk::default(); ZONES_PER_FRAGMENT];
        for color in colors.iter_mut() {
            *color = Hsbk::read(buffer);
        }
        StateMultiZone {
            count,
            index,
            colors,
        }
    }
}

/// 64 opaque bytes a device sends straight back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoPayload(pub [u8; ECHO_SIZE]);

impl EchoPayload {
    /// Copies up to 64 bytes, zero padding the rest.
    pub fn new(data: &[u8]) -> Self {
        let mut payload = [0u8; ECHO_SIZE];
        let len = data.len().min(ECHO_SIZE);
        payload[..len].copy_from_slice(&data[..len]);
        EchoPayload(payload)
    }
}

impl Payload for EchoPayload {
    const SIZE: usize = ECHO_SIZE;

    fn write(&self, buffer: &mut BytesMut) {
        buffer.extend_from_slice(&self.0);
    }

    fn read(buffer: &mut &[u8]) -> Self {
        let mut payload = [0u8; ECHO_SIZE];
        buffer.copy_to_slice(&mut payload);
        EchoPayload(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_is_padded_and_truncated() {
        let bytes = Label::new("Kitchen").to_bytes();
        assert_eq!(bytes.len(), LABEL_SIZE);
        assert_eq!(&bytes[..7], b"Kitchen");
        assert!(bytes[7..].iter().all(|&b| b == 0));

        // 'é' is two bytes and would straddle the 32 byte boundary
        let long = format!("{}é", "a".repeat(31));
        let label = Label::new(&long);
        assert_eq!(label.0.len(), 31);
    }

    #[test]
    fn test_state_group_decodes_fields() {
        let group = Uuid::new_v4();
        let updated_at = Utc.timestamp_nanos(1_700_000_000_123_456_789);
        let state = StateGroup {
            group,
            label: "Living Room".to_string(),
            updated_at,
        };
        let decoded =
            StateGroup::from_bytes(MessageType::StateGroup, &state.to_bytes()).unwrap();
        assert_eq!(decoded, state);
        assert_eq!(decoded.group_id(), group.hyphenated().to_string());
    }

    #[test]
    fn test_short_payload_is_rejected() {
        let result = StateService::from_bytes(MessageType::StateService, &[1, 0x7c]);
        assert_eq!(
            result,
            Err(MalformedMessage::PayloadTruncated {
                message_type: MessageType::StateService,
                need: 5,
                got: 2
            })
        );
    }

    #[test]
    fn test_light_state_layout() {
        let state = LightState {
            color: Hsbk::new(100, 200, 300, 3500),
            power: PowerLevel::ON,
            label: "Desk".to_string(),
        };
        let bytes = state.to_bytes();
        assert_eq!(bytes.len(), 52);
        assert_eq!(&bytes[10..12], &[0xff, 0xff]);
        assert_eq!(&bytes[12..16], b"Desk");
        assert_eq!(
            LightState::from_bytes(MessageType::LightState, &bytes).unwrap(),
            state
        );
    }

    #[test]
    fn test_durations_are_milliseconds() {
        let set = SetColor {
            color: Hsbk::default(),
            duration: Duration::from_millis(1500),
        };
        let bytes = set.to_bytes();
        assert_eq!(&bytes[9..13], &1500u32.to_le_bytes());
    }
}
