use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use crate::device::group::DeviceGroup;
use crate::device::{Device, DeviceProperty, DeviceState};

/// A registry entry announced through [`ClientEvent::DeviceDiscovered`].
#[derive(Debug, Clone)]
pub enum Discovered {
    Device(Arc<Device>),
    Group(Arc<DeviceGroup>),
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A device or group was registered for the first time.
    DeviceDiscovered(Discovered),
    /// A cached device property (label, group, version) changed.
    PropertiesChanged {
        device: Arc<Device>,
        property: DeviceProperty,
    },
    /// Power or color of a device changed.
    StateChanged {
        device: Arc<Device>,
        state: DeviceState,
    },
}

#[derive(Default)]
struct Entries {
    devices: HashMap<IpAddr, Arc<Device>>,
    groups: HashMap<String, Arc<DeviceGroup>>,
    /// Registration order across devices and groups.
    order: Vec<Discovered>,
}

/// Devices and groups seen by one client. Entries are never removed.
pub(crate) struct Registry {
    entries: Mutex<Entries>,
    events: broadcast::Sender<ClientEvent>,
}

impl Registry {
    pub(crate) fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Registry {
            entries: Mutex::new(Entries::default()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the device for `ip`, creating it with `create` if it is new.
    ///
    /// Lookup, creation and the discovery event happen under one lock, so
    /// racing registrations of one address yield a single instance.
    pub(crate) fn get_or_insert_device(
        &self,
        ip: IpAddr,
        create: impl FnOnce() -> Device,
    ) -> (Arc<Device>, bool) {
        let mut entries = self.lock();
        if let Some(device) = entries.devices.get(&ip) {
            return (device.clone(), false);
        }
        let device = Arc::new(create());
        entries.devices.insert(ip, device.clone());
        let discovered = Discovered::Device(device.clone());
        entries.order.push(discovered.clone());
        let _ = self.events.send(ClientEvent::DeviceDiscovered(discovered));
        (device, true)
    }

    pub(crate) fn get_or_insert_group(
        &self,
        id: &str,
        create: impl FnOnce() -> DeviceGroup,
    ) -> (Arc<DeviceGroup>, bool) {
        let mut entries = self.lock();
        if let Some(group) = entries.groups.get(id) {
            return (group.clone(), false);
        }
        let group = Arc::new(create());
        entries.groups.insert(id.to_string(), group.clone());
        let discovered = Discovered::Group(group.clone());
        entries.order.push(discovered.clone());
        let _ = self.events.send(ClientEvent::DeviceDiscovered(discovered));
        (group, true)
    }

    pub(crate) fn device(&self, ip: &IpAddr) -> Option<Arc<Device>> {
        self.lock().devices.get(ip).cloned()
    }

    pub(crate) fn group(&self, id: &str) -> Option<Arc<DeviceGroup>> {
        self.lock().groups.get(id).cloned()
    }

    pub(crate) fn devices(&self) -> Vec<Arc<Device>> {
        self.lock()
            .order
            .iter()
            .filter_map(|entry| match entry {
                Discovered::Device(device) => Some(device.clone()),
                Discovered::Group(_) => None,
            })
            .collect()
    }

    pub(crate) fn groups(&self) -> Vec<Arc<DeviceGroup>> {
        self.lock()
            .order
            .iter()
            .filter_map(|entry| match entry {
                Discovered::Group(group) => Some(group.clone()),
                Discovered::Device(_) => None,
            })
            .collect()
    }

    /// Current entries plus a receiver for everything registered afterwards.
    pub(crate) fn snapshot_and_subscribe(
        &self,
    ) -> (Vec<Discovered>, broadcast::Receiver<ClientEvent>) {
        let entries = self.lock();
        (entries.order.clone(), self.events.subscribe())
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub(crate) fn raise(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}
