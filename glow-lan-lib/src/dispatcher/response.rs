//! Response kinds the dispatcher can wait for.
//!
//! A response kind names the message type that answers it, declares which reply
//! flags the request has to carry, and accumulates inbound messages until it is
//! complete. Most kinds complete on their first message; [`MultiZoneResponse`]
//! needs one fragment per eight zones.

use crate::protocol::color::Hsbk;
use crate::protocol::payload::{
    EchoPayload, Label, LightState, Payload, PowerLevel, StateGroup, StateMultiZone,
    StateVersion,
};
use crate::protocol::{MalformedMessage, Message, MessageType};

/// Which reply a request asks the device for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseExpectation {
    pub requires_ack: bool,
    pub requires_response: bool,
}

impl ResponseExpectation {
    /// Only a bare acknowledgement, no state payload.
    pub const ACKNOWLEDGEMENT: Self = ResponseExpectation {
        requires_ack: true,
        requires_response: false,
    };

    /// A state message carrying data.
    pub const STATE: Self = ResponseExpectation {
        requires_ack: false,
        requires_response: true,
    };
}

/// An inbound accumulator for one exchange.
pub trait Response: Default + Send + 'static {
    /// Message type of the reply, part of the correlation key.
    const MESSAGE_TYPE: MessageType;

    const EXPECTS: ResponseExpectation = ResponseExpectation::STATE;

    /// Appends `message` and reports whether the response is now complete.
    fn parse(&mut self, message: &Message) -> Result<bool, MalformedMessage>;
}

/// Receipt confirmation for a setter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acknowledgement {
    pub sequence: u8,
}

impl Response for Acknowledgement {
    const MESSAGE_TYPE: MessageType = MessageType::Acknowledgement;
    const EXPECTS: ResponseExpectation = ResponseExpectation::ACKNOWLEDGEMENT;

    fn parse(&mut self, message: &Message) -> Result<bool, MalformedMessage> {
        self.sequence = message.sequence;
        Ok(true)
    }
}

macro_rules! state_response {
    ($(#[$doc:meta])* $name:ident, $message_type:ident, $payload:ty) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $name(pub Option<$payload>);

        impl $name {
            pub fn into_inner(self) -> Option<$payload> {
                self.0
            }
        }

        impl Response for $name {
            const MESSAGE_TYPE: MessageType = MessageType::$message_type;

            fn parse(&mut self, message: &Message) -> Result<bool, MalformedMessage> {
                self.0 = Some(<$payload>::from_bytes(message.message_type, &message.payload)?);
                Ok(true)
            }
        }
    };
}

state_response!(PowerResponse, StatePower, PowerLevel);
state_response!(LabelResponse, StateLabel, Label);
state_response!(VersionResponse, StateVersion, StateVersion);
state_response!(
    /// The group a device belongs to.
    GroupResponse,
    StateGroup,
    StateGroup
);
state_response!(LightStateResponse, LightState, LightState);
state_response!(EchoResponse, EchoResponse, EchoPayload);

/// Colors of every zone, assembled from eight-zone fragments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiZoneResponse {
    zones: Vec<Option<Hsbk>>,
    fragments: usize,
}

impl MultiZoneResponse {
    /// Zone colors once complete. Zones not received yet are `None`.
    pub fn zones(&self) -> &[Option<Hsbk>] {
        &self.zones
    }

    /// All zone colors, or `None` if a zone is missing.
    pub fn colors(&self) -> Option<Vec<Hsbk>> {
        self.zones.iter().copied().collect()
    }

    pub fn fragments(&self) -> usize {
        self.fragments
    }
}

impl Response for MultiZoneResponse {
    const MESSAGE_TYPE: MessageType = MessageType::StateMultiZone;

    fn parse(&mut self, message: &Message) -> Result<bool, MalformedMessage> {
        let state: StateMultiZone = message.payload_as()?;
        let count = state.count as usize;
        if self.fragments == 0 {
            self.zones = vec![None; count];
        } else if self.zones.len() != count {
            return Err(MalformedMessage::InconsistentPayload {
                message_type: message.message_type,
                reason: format!(
                    "zone count changed from {} to {}",
                    self.zones.len(),
                    count
                ),
            });
        }
        self.fragments += 1;

        let start = state.index as usize;
        for (offset, color) in state.colors.iter().enumerate() {
            if let Some(zone) = self.zones.get_mut(start + offset) {
                *zone = Some(*color);
            }
        }
        Ok(self.zones.iter().all(Option::is_some))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::payload::ZONES_PER_FRAGMENT;

    fn fragment(count: u8, index: u8) -> Message {
        let mut colors = [Hsbk::default(); ZONES_PER_FRAGMENT];
        for (offset, color) in colors.iter_mut().enumerate() {
            color.hue = index as u16 + offset as u16;
        }
        let state = StateMultiZone {
            count,
            index,
            colors,
        };
        Message::new(MessageType::StateMultiZone, state.to_bytes())
    }

    #[test]
    fn test_flags_come_from_the_kind() {
        assert_eq!(
            Acknowledgement::EXPECTS,
            ResponseExpectation {
                requires_ack: true,
                requires_response: false
            }
        );
        assert!(PowerResponse::EXPECTS.requires_response);
        assert!(!PowerResponse::EXPECTS.requires_ack);
        assert!(MultiZoneResponse::EXPECTS.requires_response);
    }

    #[test]
    fn test_multi_zone_completes_on_last_fragment() {
        let mut response = MultiZoneResponse::default();
        assert!(!response.parse(&fragment(20, 0)).unwrap());
        assert!(!response.parse(&fragment(20, 16)).unwrap());
        assert!(response.parse(&fragment(20, 8)).unwrap());
        let colors = response.colors().unwrap();
        assert_eq!(colors.len(), 20);
        assert!(colors.iter().enumerate().all(|(i, c)| c.hue == i as u16));
        assert_eq!(response.fragments(), 3);
    }

    #[test]
    fn test_multi_zone_rejects_changing_count() {
        let mut response = MultiZoneResponse::default();
        response.parse(&fragment(16, 0)).unwrap();
        assert!(matches!(
            response.parse(&fragment(24, 8)),
            Err(MalformedMessage::InconsistentPayload { .. })
        ));
    }

    #[test]
    fn test_state_response_rejects_short_payload() {
        let mut response = PowerResponse::default();
        let message = Message::new(MessageType::StatePower, vec![1u8]);
        assert!(response.parse(&message).is_err());
        assert_eq!(response.into_inner(), None);
    }
}
