//! Per-device facade over the dispatcher.
//!
//! A [`Device`] is created by the client, either from a discovery reply or from
//! [`Client::connect`](crate::client::Client::connect), and lives as long as the
//! client. It caches what it last learned about the device and raises
//! `PropertiesChanged`/`StateChanged` events when that changes.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use anyhow::{anyhow, Context};
use bytes::Bytes;
use derivative::Derivative;
use log::debug;
use serde::Serialize;

use crate::client::ClientContext;
use crate::dispatcher::response::{
    Acknowledgement, EchoResponse, GroupResponse, LabelResponse, LightStateResponse,
    MultiZoneResponse, PowerResponse, VersionResponse,
};
use crate::dispatcher::Response;
use crate::error::Error;
use crate::protocol::color::Hsbk;
use crate::protocol::payload::{
    EchoPayload, Label, Payload, PowerLevel, SetColor, SetColorZones, SetLightPower,
    StateVersion, ZoneApply, ZoneRange,
};
use crate::protocol::{serial_to_string, MessageType};

pub mod group;

use group::DeviceGroup;

/// Cached descriptive properties of a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceProperties {
    /// Serial from the discovery reply, zero until known.
    pub target: u64,
    pub label: Option<String>,
    /// UUID of the group the device belongs to.
    pub group: Option<String>,
    pub version: Option<StateVersion>,
}

/// A property change carried by `PropertiesChanged`.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceProperty {
    Label(String),
    Group(String),
    Version(StateVersion),
}

/// Last known power and color.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    pub power: Option<bool>,
    pub color: Option<Hsbk>,
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct Device {
    address: SocketAddr,
    #[derivative(Debug = "ignore")]
    context: Weak<ClientContext>,
    properties: Mutex<DeviceProperties>,
    state: Mutex<DeviceState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Device {
    pub(crate) fn new(address: SocketAddr, target: u64, context: Weak<ClientContext>) -> Self {
        Device {
            address,
            context,
            properties: Mutex::new(DeviceProperties {
                target,
                ..DeviceProperties::default()
            }),
            state: Mutex::new(DeviceState::default()),
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn ip(&self) -> IpAddr {
        self.address.ip()
    }

    pub fn target(&self) -> u64 {
        lock(&self.properties).target
    }

    /// Device serial as twelve hex digits, `None` until a discovery reply was seen.
    pub fn serial(&self) -> Option<String> {
        match self.target() {
            0 => None,
            target => Some(serial_to_string(target)),
        }
    }

    pub fn properties(&self) -> DeviceProperties {
        lock(&self.properties).clone()
    }

    pub fn state(&self) -> DeviceState {
        *lock(&self.state)
    }

    pub fn label(&self) -> Option<String> {
        lock(&self.properties).label.clone()
    }

    pub fn group_id(&self) -> Option<String> {
        lock(&self.properties).group.clone()
    }

    /// Records the serial from a later discovery reply of a connected device.
    pub(crate) fn observe_target(&self, target: u64) {
        let mut properties = lock(&self.properties);
        if properties.target == 0 && target != 0 {
            properties.target = target;
        }
    }

    fn context(&self) -> Result<Arc<ClientContext>, Error> {
        self.context.upgrade().ok_or(Error::ShutDown)
    }

    async fn exchange<R: Response>(&self, message_type: MessageType, payload: Bytes) -> anyhow::Result<R> {
        let context = self.context()?;
        let request = context.request(self.target(), message_type, payload);
        let handle = context
            .dispatcher()
            .send_and_await::<R>(self.address, request, None)
            .await
            .with_context(|| format!("Failed to send {} to {}", message_type, self.address))?;
        drop(context);
        handle
            .await
            .with_context(|| format!("No {} from {}", R::MESSAGE_TYPE, self.address))
    }

    async fn send(&self, message_type: MessageType, payload: Bytes) -> anyhow::Result<()> {
        let context = self.context()?;
        let request = context.request(self.target(), message_type, payload);
        context
            .dispatcher()
            .send_fire_and_forget(self.address, request)
            .await
            .with_context(|| format!("Failed to send {} to {}", message_type, self.address))
    }

    fn update_state(self: &Arc<Self>, update: impl FnOnce(&mut DeviceState)) {
        let (changed, state) = {
            let mut state = lock(&self.state);
            let before = *state;
            update(&mut state);
            (before != *state, *state)
        };
        if changed {
            if let Ok(context) = self.context() {
                context.raise_state_changed(self.clone(), state);
            }
        }
    }

    pub(crate) fn update_property(self: &Arc<Self>, property: DeviceProperty) {
        let changed = {
            let mut properties = lock(&self.properties);
            match &property {
                DeviceProperty::Label(label) => {
                    replace_if_changed(&mut properties.label, label.clone())
                }
                DeviceProperty::Group(group) => {
                    replace_if_changed(&mut properties.group, group.clone())
                }
                DeviceProperty::Version(version) => {
                    replace_if_changed(&mut properties.version, *version)
                }
            }
        };
        if changed {
            if let Ok(context) = self.context() {
                context.raise_properties_changed(self.clone(), property);
            }
        }
    }

    pub async fn get_power(self: &Arc<Self>) -> anyhow::Result<bool> {
        let response: PowerResponse = self.exchange(MessageType::GetPower, Bytes::new()).await?;
        let on = response
            .into_inner()
            .context("Empty power response")?
            .is_on();
        self.update_state(|state| state.power = Some(on));
        Ok(on)
    }

    /// Switches the device on or off and waits for the acknowledgement.
    pub async fn set_power(self: &Arc<Self>, on: bool) -> anyhow::Result<()> {
        let _: Acknowledgement = self
            .exchange(MessageType::SetPower, PowerLevel::from_on(on).to_bytes())
            .await?;
        self.update_state(|state| state.power = Some(on));
        Ok(())
    }

    /// Switches the light on or off, fading over `duration`.
    pub async fn set_light_power(self: &Arc<Self>, on: bool, duration: Duration) -> anyhow::Result<()> {
        let payload = SetLightPower {
            level: PowerLevel::from_on(on),
            duration,
        }
        .to_bytes();
        let _: Acknowledgement = self.exchange(MessageType::LightSetPower, payload).await?;
        self.update_state(|state| state.power = Some(on));
        Ok(())
    }

    /// Like [`Device::set_power`] without asking for an acknowledgement.
    pub async fn set_power_unacknowledged(&self, on: bool) -> anyhow::Result<()> {
        self.send(MessageType::SetPower, PowerLevel::from_on(on).to_bytes())
            .await
    }

    /// Reads color, power and label in one exchange.
    pub async fn get_color(self: &Arc<Self>) -> anyhow::Result<Hsbk> {
        let response: LightStateResponse =
            self.exchange(MessageType::LightGet, Bytes::new()).await?;
        let light = response.into_inner().context("Empty light state")?;
        self.update_state(|state| {
            state.color = Some(light.color);
            state.power = Some(light.power.is_on());
        });
        self.update_property(DeviceProperty::Label(light.label));
        Ok(light.color)
    }

    pub async fn set_color(self: &Arc<Self>, color: Hsbk, duration: Duration) -> anyhow::Result<()> {
        let payload = SetColor { color, duration }.to_bytes();
        let _: Acknowledgement = self.exchange(MessageType::LightSetColor, payload).await?;
        self.update_state(|state| state.color = Some(color));
        Ok(())
    }

    /// Like [`Device::set_color`] without asking for an acknowledgement.
    pub async fn set_color_unacknowledged(&self, color: Hsbk, duration: Duration) -> anyhow::Result<()> {
        self.send(
            MessageType::LightSetColor,
            SetColor { color, duration }.to_bytes(),
        )
        .await
    }

    pub async fn get_label(self: &Arc<Self>) -> anyhow::Result<String> {
        let response: LabelResponse = self.exchange(MessageType::GetLabel, Bytes::new()).await?;
        let Label(label) = response.into_inner().context("Empty label response")?;
        self.update_property(DeviceProperty::Label(label.clone()));
        Ok(label)
    }

    /// Sets the label, truncated to what fits the 32 byte field.
    pub async fn set_label(self: &Arc<Self>, label: &str) -> anyhow::Result<()> {
        let label = Label::new(label);
        let _: Acknowledgement = self
            .exchange(MessageType::SetLabel, label.to_bytes())
            .await?;
        self.update_property(DeviceProperty::Label(label.0));
        Ok(())
    }

    /// Asks for the device's group and registers the group with the client.
    pub async fn get_group(self: &Arc<Self>) -> anyhow::Result<Arc<DeviceGroup>> {
        let response: GroupResponse = self.exchange(MessageType::GetGroup, Bytes::new()).await?;
        let state = response.into_inner().context("Empty group response")?;
        let context = self.context()?;
        let group = context.assign_group(self, &state);
        self.update_property(DeviceProperty::Group(group.id().to_string()));
        Ok(group)
    }

    pub async fn get_version(self: &Arc<Self>) -> anyhow::Result<StateVersion> {
        let response: VersionResponse =
            self.exchange(MessageType::GetVersion, Bytes::new()).await?;
        let version = response.into_inner().context("Empty version response")?;
        self.update_property(DeviceProperty::Version(version));
        Ok(version)
    }

    /// Colors of every zone of a multi-zone device.
    pub async fn get_zones(&self) -> anyhow::Result<Vec<Hsbk>> {
        let response: MultiZoneResponse = self
            .exchange(MessageType::GetColorZones, ZoneRange::ALL.to_bytes())
            .await?;
        debug!(
            "Zones of {} arrived in {} fragments",
            self.address,
            response.fragments()
        );
        response
            .colors()
            .ok_or_else(|| anyhow!("Incomplete zone response from {}", self.address))
    }

    /// Paints zones `start..=end` and applies the change right away.
    pub async fn set_zone_colors(
        &self,
        start: u8,
        end: u8,
        color: Hsbk,
        duration: Duration,
    ) -> anyhow::Result<()> {
        let payload = SetColorZones {
            range: ZoneRange {
                start_index: start,
                end_index: end,
            },
            color,
            duration,
            apply: ZoneApply::Apply,
        }
        .to_bytes();
        let _: Acknowledgement = self.exchange(MessageType::SetColorZones, payload).await?;
        Ok(())
    }

    /// Sends up to 64 bytes and checks that the device echoes them back.
    pub async fn echo(&self, data: &[u8]) -> anyhow::Result<bool> {
        let sent = EchoPayload::new(data);
        let response: EchoResponse = self
            .exchange(MessageType::EchoRequest, sent.to_bytes())
            .await?;
        Ok(response.into_inner().as_ref() == Some(&sent))
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut Option<T>, value: T) -> bool {
    if slot.as_ref() == Some(&value) {
        false
    } else {
        *slot = Some(value);
        true
    }
}
