//! UDP transport and device registry.
//!
//! [`Client::start`] binds the socket and spawns three tasks that run until
//! [`Client::stop`]:
//!
//! - the receive loop, which decodes datagrams and routes discovery replies to
//!   the registry and everything else to the [`Dispatcher`],
//! - the discovery loop, which broadcasts a `GetService` every `discovery_interval`,
//! - the sweeper, which evicts exchanges past their deadline.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, Stream, StreamExt};
use log::{debug, error, info, trace, warn};
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::device::group::DeviceGroup;
use crate::device::{Device, DeviceProperty, DeviceState};
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::protocol::payload::{StateGroup, StateService};
use crate::protocol::{serial_to_string, Message, MessageType};

pub mod registry;

pub use registry::{ClientEvent, Discovered};
use registry::Registry;

const MAX_DATAGRAM_SIZE: usize = 4096;
const EVENT_CAPACITY: usize = 256;

/// State shared by the client tasks and every device facade.
pub(crate) struct ClientContext {
    config: ClientConfig,
    source: u32,
    sequence: AtomicU8,
    socket: Arc<UdpSocket>,
    dispatcher: Arc<Dispatcher>,
    registry: Registry,
    fault: Mutex<Option<String>>,
}

impl ClientContext {
    pub(crate) fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    fn next_sequence(&self) -> u8 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// A request stamped with this client's source and the next sequence number.
    pub(crate) fn request(&self, target: u64, message_type: MessageType, payload: Bytes) -> Message {
        Message::new(message_type, payload)
            .with_source(self.source)
            .with_sequence(self.next_sequence())
            .with_target(target)
    }

    fn broadcast_target(&self) -> SocketAddr {
        SocketAddr::new(self.config.broadcast_address, self.config.port)
    }

    async fn broadcast_discovery(&self) -> Result<()> {
        let request = self.request(0, MessageType::GetService, Bytes::new());
        self.dispatcher
            .send_fire_and_forget(self.broadcast_target(), request)
            .await
    }

    pub(crate) fn handle_datagram(self: &Arc<Self>, from: SocketAddr, data: &[u8]) {
        let message = match Message::decode(data) {
            Ok(message) => message,
            Err(err) => {
                warn!("Dropping datagram from {}: {}", from, err);
                return;
            }
        };
        trace!("Received {} from {}", message.message_type, from);

        if message.message_type.is_discovery_reply() {
            self.on_discovery_reply(from, &message);
        } else {
            self.dispatcher.on_message_received(from, &message);
        }
    }

    fn on_discovery_reply(self: &Arc<Self>, from: SocketAddr, message: &Message) {
        let service: StateService = match message.payload_as() {
            Ok(service) => service,
            Err(err) => {
                warn!("Dropping discovery reply from {}: {}", from, err);
                return;
            }
        };
        if service.service != StateService::UDP {
            trace!("Ignoring service {} offered by {}", service.service, from);
            return;
        }
        let port = u16::try_from(service.port)
            .ok()
            .filter(|port| *port != 0)
            .unwrap_or(from.port());

        let (device, created) = self.register_device(SocketAddr::new(from.ip(), port), message.target);
        if created && self.config.query_group_on_discovery {
            tokio::spawn(async move {
                if let Err(err) = device.get_group().await {
                    debug!("Group query for {} failed: {:#}", device.address(), err);
                }
            });
        }
    }

    fn register_device(self: &Arc<Self>, address: SocketAddr, target: u64) -> (Arc<Device>, bool) {
        let (device, created) = self.registry.get_or_insert_device(address.ip(), || {
            Device::new(address, target, Arc::downgrade(self))
        });
        if created {
            info!("Registered device {} ({})", address, serial_to_string(target));
        } else {
            device.observe_target(target);
        }
        (device, created)
    }

    /// Registers the group named in `state` and moves `device` into it.
    pub(crate) fn assign_group(&self, device: &Arc<Device>, state: &StateGroup) -> Arc<DeviceGroup> {
        let id = state.group_id();
        let (group, created) = self
            .registry
            .get_or_insert_group(&id, || DeviceGroup::new(state));
        if created {
            info!("Registered group {} ({})", state.label, id);
        } else {
            group.update(state);
        }

        if let Some(previous) = device.group_id().filter(|previous| *previous != id) {
            if let Some(previous) = self.registry.group(&previous) {
                previous.remove_member(device);
            }
        }
        group.add_member(device);
        group
    }

    pub(crate) fn raise_state_changed(&self, device: Arc<Device>, state: DeviceState) {
        self.registry
            .raise(ClientEvent::StateChanged { device, state });
    }

    pub(crate) fn raise_properties_changed(&self, device: Arc<Device>, property: DeviceProperty) {
        self.registry
            .raise(ClientEvent::PropertiesChanged { device, property });
    }

    fn set_fault(&self, fault: String) {
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner) = Some(fault);
    }
}

/// A running client: one socket, its tasks and the registry they fill.
pub struct Client {
    context: Arc<ClientContext>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Client {
    /// Binds the socket with broadcast enabled and starts the client tasks.
    pub async fn start(config: ClientConfig) -> Result<Client> {
        let socket = UdpSocket::bind(config.bind_address).await?;
        socket.set_broadcast(true)?;
        let socket = Arc::new(socket);

        let source = config
            .source
            .filter(|source| *source > 1)
            .unwrap_or_else(|| rand::thread_rng().gen_range(2..=u32::MAX));
        let dispatcher = Arc::new(Dispatcher::new(socket.clone(), config.response_timeout));
        info!(
            "Client listening on {} with source {:#010x}",
            socket.local_addr()?,
            source
        );

        let context = Arc::new(ClientContext {
            config,
            source,
            sequence: AtomicU8::new(0),
            socket,
            dispatcher,
            registry: Registry::new(EVENT_CAPACITY),
            fault: Mutex::new(None),
        });

        let cancel = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(receive_loop(
                context.clone(),
                context.socket.clone(),
                cancel.clone(),
            )),
            tokio::spawn(discovery_loop(context.clone(), cancel.clone())),
            tokio::spawn(
                context
                    .dispatcher
                    .clone()
                    .run_sweeper(context.config.sweep_interval, cancel.clone()),
            ),
        ];

        Ok(Client {
            context,
            cancel,
            tasks,
        })
    }

    /// Cancels the client tasks and waits for them before releasing the socket.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                warn!("Client task ended abnormally: {}", err);
            }
        }
        info!("Client stopped");
    }

    pub fn config(&self) -> &ClientConfig {
        &self.context.config
    }

    pub fn source(&self) -> u32 {
        self.context.source
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.context.socket.local_addr()?)
    }

    /// Minimum gap devices expect between two messages. Not enforced here.
    pub fn min_message_interval(&self) -> Duration {
        self.context.config.min_message_interval
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.context.dispatcher
    }

    pub fn next_sequence(&self) -> u8 {
        self.context.next_sequence()
    }

    /// A request stamped with this client's source and the next sequence number.
    pub fn request(&self, target: u64, message_type: MessageType, payload: Bytes) -> Message {
        self.context.request(target, message_type, payload)
    }

    /// Broadcasts a discovery request now instead of waiting for the next interval.
    pub async fn discover_now(&self) -> Result<()> {
        self.context.broadcast_discovery().await
    }

    /// Registers a device at `ip` on the configured port without waiting for discovery.
    pub fn connect(&self, ip: IpAddr) -> Arc<Device> {
        self.context
            .register_device(SocketAddr::new(ip, self.context.config.port), 0)
            .0
    }

    /// Like [`Client::connect`] for textual input: `ip` or `ip:port`.
    pub fn connect_address(&self, address: &str) -> anyhow::Result<Arc<Device>> {
        let address = address.trim();
        if let Ok(socket_address) = address.parse::<SocketAddr>() {
            return Ok(self.context.register_device(socket_address, 0).0);
        }
        let ip = address
            .parse::<IpAddr>()
            .map_err(|err| anyhow!("Invalid device address {}: {}", address, err))?;
        Ok(self.connect(ip))
    }

    pub fn device(&self, ip: IpAddr) -> Option<Arc<Device>> {
        self.context.registry.device(&ip)
    }

    pub fn group(&self, id: &str) -> Option<Arc<DeviceGroup>> {
        self.context.registry.group(&id.to_lowercase())
    }

    /// Registered devices, in registration order.
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.context.registry.devices()
    }

    /// Registered groups, in registration order.
    pub fn groups(&self) -> Vec<Arc<DeviceGroup>> {
        self.context.registry.groups()
    }

    /// Live events only. See [`Client::snapshot_and_subscribe`] to also get what is registered.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.context.registry.subscribe()
    }

    /// Everything registered so far plus a receiver for every later event,
    /// with nothing lost or repeated in between.
    pub fn snapshot_and_subscribe(&self) -> (Vec<Discovered>, broadcast::Receiver<ClientEvent>) {
        self.context.registry.snapshot_and_subscribe()
    }

    /// Registered entities in registration order, then new ones as they are discovered.
    pub fn discovered(&self) -> impl Stream<Item = Discovered> + Send + 'static {
        let (existing, receiver) = self.snapshot_and_subscribe();
        let live = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(ClientEvent::DeviceDiscovered(discovered)) => {
                        return Some((discovered, receiver))
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Discovery stream lagged, {} events skipped", skipped);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        stream::iter(existing).chain(live)
    }

    pub fn raise_state_changed(&self, device: &Arc<Device>, state: DeviceState) {
        self.context.raise_state_changed(device.clone(), state);
    }

    pub fn raise_properties_changed(&self, device: &Arc<Device>, property: DeviceProperty) {
        self.context
            .raise_properties_changed(device.clone(), property);
    }

    /// Why the receive loop gave up, if it did.
    pub fn fault(&self) -> Option<String> {
        self.context
            .fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[cfg(test)]
    pub(crate) fn handle_datagram(&self, from: SocketAddr, data: &[u8]) {
        self.context.handle_datagram(from, data);
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Where the receive loop reads datagrams from.
pub(crate) trait DatagramSource: Send + Sync + 'static {
    fn recv_datagram<'a>(
        &'a self,
        buffer: &'a mut [u8],
    ) -> BoxFuture<'a, io::Result<(usize, SocketAddr)>>;
}

impl DatagramSource for UdpSocket {
    fn recv_datagram<'a>(
        &'a self,
        buffer: &'a mut [u8],
    ) -> BoxFuture<'a, io::Result<(usize, SocketAddr)>> {
        self.recv_from(buffer).boxed()
    }
}

/// Receives datagrams until cancelled.
///
/// Receive errors are retried with a linear backoff. After
/// `max_receive_restarts` consecutive failures the loop records a fault and
/// exits; [`Client::fault`] reports it.
async fn receive_loop<S: DatagramSource>(
    context: Arc<ClientContext>,
    source: Arc<S>,
    cancel: CancellationToken,
) {
    let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut failures = 0u32;

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = source.recv_datagram(&mut buffer) => received,
        };

        match received {
            Ok((len, from)) => {
                failures = 0;
                context.handle_datagram(from, &buffer[..len]);
            }
            Err(err) => {
                failures += 1;
                if failures > context.config.max_receive_restarts {
                    let fault = format!(
                        "receive loop stopped after {} consecutive errors, last: {}",
                        failures, err
                    );
                    error!("{}", fault);
                    context.set_fault(fault);
                    return;
                }
                let backoff = context.config.receive_restart_backoff * failures;
                warn!(
                    "Receive failed ({}), retrying in {:?} [{}/{}]",
                    err, backoff, failures, context.config.max_receive_restarts
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
    debug!("Receive loop stopped");
}

/// Broadcasts a discovery request every `discovery_interval`, starting immediately.
async fn discovery_loop(context: Arc<ClientContext>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(context.config.discovery_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match context.broadcast_discovery().await {
                    Ok(()) => debug!("Discovery request sent to {}", context.broadcast_target()),
                    Err(err) => warn!("Discovery request failed: {}", err),
                }
            }
        }
    }
    debug!("Discovery loop stopped");
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;

    use futures::future::{join_all, pending};
    use uuid::Uuid;

    use super::*;
    use crate::protocol::payload::Payload;

    fn config() -> ClientConfig {
        ClientConfig {
            // keep the loop from probing during registry tests
            discovery_interval: Duration::from_secs(3600),
            ..ClientConfig::loopback()
        }
    }

    fn discovery_reply(target: u64) -> Bytes {
        let service = StateService {
            service: StateService::UDP,
            port: 56700,
        };
        Message::new(MessageType::StateService, service.to_bytes())
            .with_target(target)
            .encode()
            .unwrap()
    }

    fn address(last: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), 56700)
    }

    /// Plays back a fixed list of receive outcomes, then blocks forever.
    struct ScriptedSource {
        script: Mutex<VecDeque<io::Result<(Bytes, SocketAddr)>>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<io::Result<(Bytes, SocketAddr)>>) -> Arc<Self> {
            Arc::new(ScriptedSource {
                script: Mutex::new(script.into()),
            })
        }
    }

    impl DatagramSource for ScriptedSource {
        fn recv_datagram<'a>(
            &'a self,
            buffer: &'a mut [u8],
        ) -> BoxFuture<'a, io::Result<(usize, SocketAddr)>> {
            let next = self.script.lock().unwrap().pop_front();
            async move {
                match next {
                    Some(Ok((data, from))) => {
                        buffer[..data.len()].copy_from_slice(&data);
                        Ok((data.len(), from))
                    }
                    Some(Err(err)) => Err(err),
                    None => pending().await,
                }
            }
            .boxed()
        }
    }

    fn receive_error() -> io::Result<(Bytes, SocketAddr)> {
        Err(io::Error::new(io::ErrorKind::Other, "network is down"))
    }

    fn supervised_config() -> ClientConfig {
        ClientConfig {
            max_receive_restarts: 2,
            receive_restart_backoff: Duration::from_millis(1),
            ..config()
        }
    }

    fn device_ip(discovered: &Discovered) -> Option<IpAddr> {
        match discovered {
            Discovered::Device(device) => Some(device.ip()),
            Discovered::Group(_) => None,
        }
    }

    #[tokio::test]
    async fn test_discovery_reply_registers_one_device() {
        let client = Client::start(config()).await.unwrap();
        let mut events = client.subscribe();

        client.handle_datagram(address(5), &discovery_reply(0x1122_3344_5566));
        client.handle_datagram(address(5), &discovery_reply(0x1122_3344_5566));

        let devices = client.devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].ip(), "10.0.0.5".parse::<IpAddr>().unwrap());
        assert_eq!(devices[0].serial().as_deref(), Some("665544332211"));

        match events.try_recv() {
            Ok(ClientEvent::DeviceDiscovered(Discovered::Device(device))) => {
                assert!(Arc::ptr_eq(&device, &devices[0]));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(events.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
        client.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_datagram_is_dropped() {
        let client = Client::start(config()).await.unwrap();
        client.handle_datagram(address(7), &[0u8; 12]);
        let mut wrong_service = discovery_reply(1).to_vec();
        wrong_service[36] = 5;
        client.handle_datagram(address(7), &wrong_service);
        assert!(client.devices().is_empty());
        client.stop().await;
    }

    #[tokio::test]
    async fn test_concurrent_registration_yields_one_instance() {
        let client = Arc::new(Client::start(config()).await.unwrap());
        let ip: IpAddr = "10.0.0.8".parse().unwrap();

        let tasks = (0..16).map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                if i % 2 == 0 {
                    client.connect(ip)
                } else {
                    client.handle_datagram(address(8), &discovery_reply(9));
                    client.device(ip).unwrap()
                }
            })
        });
        let devices: Vec<Arc<Device>> = join_all(tasks)
            .await
            .into_iter()
            .map(|result| result.unwrap())
            .collect();

        assert!(devices.iter().all(|device| Arc::ptr_eq(device, &devices[0])));
        assert_eq!(client.devices().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent_and_learns_serial() {
        let client = Client::start(config()).await.unwrap();
        let first = client.connect_address("10.0.0.9").unwrap();
        let second = client.connect_address(" 10.0.0.9 ").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.serial(), None);

        client.handle_datagram(address(9), &discovery_reply(0xaa));
        assert_eq!(first.target(), 0xaa);

        let v6 = client.connect_address("FE80::1").unwrap();
        let v6_lower = client.connect_address("fe80::1").unwrap();
        assert!(Arc::ptr_eq(&v6, &v6_lower));
        assert!(client.connect_address("not-an-ip").is_err());
        client.stop().await;
    }

    #[tokio::test]
    async fn test_snapshot_replays_in_registration_order() {
        let client = Client::start(config()).await.unwrap();
        for last in [3u8, 1, 2] {
            client.handle_datagram(address(last), &discovery_reply(last as u64));
        }

        let (existing, mut live) = client.snapshot_and_subscribe();
        let order: Vec<_> = existing.iter().filter_map(device_ip).collect();
        assert_eq!(
            order,
            vec![address(3).ip(), address(1).ip(), address(2).ip()]
        );

        client.handle_datagram(address(4), &discovery_reply(4));
        match live.try_recv() {
            Ok(ClientEvent::DeviceDiscovered(discovered)) => {
                assert_eq!(device_ip(&discovered), Some(address(4).ip()));
            }
            other => panic!("unexpected event {:?}", other),
        }
        client.stop().await;
    }

    #[tokio::test]
    async fn test_discovered_stream_yields_existing_then_live() {
        let client = Client::start(config()).await.unwrap();
        client.handle_datagram(address(1), &discovery_reply(1));
        client.handle_datagram(address(2), &discovery_reply(2));

        let mut discovered = Box::pin(client.discovered());
        client.handle_datagram(address(3), &discovery_reply(3));

        let mut seen = Vec::new();
        for _ in 0..3 {
            let next = tokio::time::timeout(Duration::from_secs(1), discovered.next())
                .await
                .unwrap()
                .unwrap();
            seen.push(device_ip(&next).unwrap());
        }
        assert_eq!(seen, vec![address(1).ip(), address(2).ip(), address(3).ip()]);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_group_assignment_moves_membership() {
        let client = Client::start(config()).await.unwrap();
        let device = client.connect(address(6).ip());
        let kitchen = StateGroup {
            group: Uuid::new_v4(),
            label: "Kitchen".to_string(),
            updated_at: chrono::Utc::now(),
        };
        let hall = StateGroup {
            group: Uuid::new_v4(),
            label: "Hall".to_string(),
            updated_at: chrono::Utc::now(),
        };

        let first = client.context.assign_group(&device, &kitchen);
        device.update_property(DeviceProperty::Group(first.id().to_string()));
        let again = client.context.assign_group(&device, &kitchen);
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(first.members().len(), 1);

        let second = client.context.assign_group(&device, &hall);
        assert!(first.members().is_empty());
        assert_eq!(second.members().len(), 1);
        assert_eq!(client.groups().len(), 2);
        assert!(client
            .group(&kitchen.group_id().to_uppercase())
            .is_some());
        client.stop().await;
    }

    #[tokio::test]
    async fn test_stop_joins_tasks() {
        let client = Client::start(config()).await.unwrap();
        let local = client.local_addr().unwrap();
        tokio::time::timeout(Duration::from_secs(2), client.stop())
            .await
            .unwrap();
        // the port is free again once the socket has been released
        UdpSocket::bind(local).await.unwrap();
    }

    #[tokio::test]
    async fn test_discovery_request_is_broadcast() {
        let listener = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let client = Client::start(ClientConfig {
            port: listener.local_addr().unwrap().port(),
            ..config()
        })
        .await
        .unwrap();

        let mut buffer = [0u8; 128];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), listener.recv_from(&mut buffer))
            .await
            .unwrap()
            .unwrap();
        let request = Message::decode(&buffer[..len]).unwrap();
        assert_eq!(request.message_type, MessageType::GetService);
        assert_eq!(request.source, client.source());
        assert!(request.tagged);
        assert!(!request.ack_required && !request.res_required);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_receive_loop_records_fault_after_restarts() {
        let client = Client::start(supervised_config()).await.unwrap();
        let source = ScriptedSource::new(vec![receive_error(), receive_error(), receive_error()]);

        // exits on its own once the restarts are used up
        tokio::time::timeout(
            Duration::from_secs(2),
            receive_loop(client.context.clone(), source, CancellationToken::new()),
        )
        .await
        .unwrap();

        let fault = client.fault().unwrap();
        assert!(fault.contains("3 consecutive errors"), "{}", fault);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_receive_success_resets_restart_count() {
        let client = Client::start(supervised_config()).await.unwrap();
        let source = ScriptedSource::new(vec![
            receive_error(),
            receive_error(),
            Ok((discovery_reply(0x42), address(12))),
            receive_error(),
            receive_error(),
        ]);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(receive_loop(client.context.clone(), source.clone(), cancel.clone()));
        // wait until the script has been consumed
        tokio::time::timeout(Duration::from_secs(2), async {
            while !source.script.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(client.fault(), None);
        assert!(client.device(address(12).ip()).is_some());
        client.stop().await;
    }
}
