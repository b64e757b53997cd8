//! btleplug-backed connection manager.
//!
//! [`BtleplugLink`] owns one peripheral. A supervisor task connects,
//! discovers services, executes queued requests and watches for link loss,
//! reporting everything as [`ProtocolEvent`]s on an mpsc channel. The link
//! itself implements [`GattView`] and [`GattClient`], so it can be handed to
//! a [`Driver`](crate::Driver) next to the event receiver.
//!
//! # Synthetic handles
//!
//! btleplug addresses attributes by UUID and never exposes ATT handles. The
//! link numbers attributes itself after every discovery, in discovery order:
//! each service takes one handle, each characteristic two (declaration and
//! value) and each descriptor one. Handles are only meaningful for the
//! connection that assigned them.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Characteristic, Descriptor, Peripheral as _, Service,
    ValueNotification,
};
use btleplug::platform::{Adapter, Peripheral};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use blesensor_types::{BleUuid, ConnectionId, GattStatus, Handle};

use crate::error::{Error, Result, SubmitError};
use crate::gatt::{CharacteristicInfo, DescriptorInfo, ServiceInfo, ServiceTree};
use crate::protocol::{DisconnectReason, ProtocolEvent};
use crate::reconnect::ReconnectOptions;
use crate::scan::{ScanOptions, find_device};
use crate::traits::{GattClient, GattView};
use crate::util::{create_identifier, format_peripheral_id};

/// Default timeout for establishing a BLE connection.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service discovery.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a single read or subscribe request.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Options for the connection manager.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// How to find the peripheral.
    pub scan: ScanOptions,
    /// Timeout for establishing a BLE connection.
    pub connect_timeout: Duration,
    /// Timeout for service discovery after connection.
    pub discovery_timeout: Duration,
    /// Timeout for a single read or subscribe request.
    pub request_timeout: Duration,
    /// Capacity of the request queue; submissions beyond it are refused.
    pub queue_capacity: usize,
    /// Capacity of the protocol event channel.
    pub event_capacity: usize,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            scan: ScanOptions::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            queue_capacity: 16,
            event_capacity: 64,
        }
    }
}

impl LinkOptions {
    /// Create default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan options.
    #[must_use]
    pub fn scan(mut self, scan: ScanOptions) -> Self {
        self.scan = scan;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the request queue capacity.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Validate the options and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("discovery_timeout", self.discovery_timeout),
            ("request_timeout", self.request_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::invalid_config(format!("{} must be > 0", name)));
            }
        }
        if self.queue_capacity == 0 {
            return Err(Error::invalid_config("queue_capacity must be > 0"));
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be > 0"));
        }
        Ok(())
    }
}

/// A btleplug attribute addressed by a synthetic handle.
#[derive(Debug, Clone)]
enum Attribute {
    Characteristic(Characteristic),
    Descriptor {
        descriptor: Descriptor,
        owner: Characteristic,
        owner_handle: Handle,
    },
}

impl Attribute {
    /// The characteristic to subscribe to and its value handle.
    fn notify_target(&self, handle: Handle) -> (&Characteristic, Handle) {
        match self {
            Self::Characteristic(c) => (c, handle),
            Self::Descriptor {
                owner,
                owner_handle,
                ..
            } => (owner, *owner_handle),
        }
    }
}

/// Link state shared between the supervisor task and submitters.
#[derive(Debug, Default)]
struct LinkState {
    active: Option<ConnectionId>,
    established: bool,
    tree: ServiceTree,
    attributes: HashMap<Handle, Attribute>,
    /// Value handles registered for notifications on this connection.
    subscribed: HashSet<Handle>,
}

impl LinkState {
    fn reset(&mut self) {
        self.active = None;
        self.established = false;
        self.tree = ServiceTree::new();
        self.attributes.clear();
        self.subscribed.clear();
    }
}

#[derive(Debug, Clone, Copy)]
enum Request {
    Read {
        connection: ConnectionId,
        handle: Handle,
    },
    Subscribe {
        connection: ConnectionId,
        handle: Handle,
    },
}

#[derive(Debug, Default)]
struct Shared {
    state: RwLock<LinkState>,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, LinkState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LinkState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Connection manager for one peripheral.
#[derive(Debug)]
pub struct BtleplugLink {
    identifier: String,
    shared: Arc<Shared>,
    requests: mpsc::Sender<Request>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl BtleplugLink {
    /// Find the peripheral and start the supervisor task.
    ///
    /// Returns once the peripheral has been found; connecting happens in the
    /// background and is reported through the returned event receiver.
    #[tracing::instrument(level = "info", skip_all, fields(identifier = %identifier))]
    pub async fn spawn(
        identifier: &str,
        options: LinkOptions,
        reconnect: ReconnectOptions,
    ) -> Result<(Self, mpsc::Receiver<ProtocolEvent>)> {
        options.validate()?;
        reconnect.validate()?;

        let (adapter, peripheral) = find_device(identifier, &options.scan).await?;
        let resolved = match peripheral.properties().await? {
            Some(props) => create_identifier(&props.address.to_string(), &peripheral.id()),
            None => format_peripheral_id(&peripheral.id()),
        };
        info!("Using peripheral {}", resolved);

        let shared = Arc::new(Shared::default());
        let (request_tx, request_rx) = mpsc::channel(options.queue_capacity);
        let (event_tx, event_rx) = mpsc::channel(options.event_capacity);
        let cancel = CancellationToken::new();

        let supervisor = Supervisor {
            adapter,
            peripheral,
            shared: Arc::clone(&shared),
            events: event_tx,
            requests: request_rx,
            options,
            reconnect,
            cancel: cancel.clone(),
            next_connection: ConnectionId(0),
        };
        let task = tokio::spawn(supervisor.run());

        Ok((
            Self {
                identifier: resolved,
                shared,
                requests: request_tx,
                cancel,
                task: Some(task),
            },
            event_rx,
        ))
    }

    /// Address or platform id of the peripheral.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Snapshot of the current attribute tree.
    pub fn service_tree(&self) -> ServiceTree {
        self.shared.read().tree.clone()
    }

    /// Token that stops the supervisor when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Disconnect and wait for the supervisor task to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!("Link task ended abnormally: {}", e);
        }
    }

    fn submit(
        &self,
        request: Request,
        connection: ConnectionId,
        handle: Handle,
    ) -> std::result::Result<(), SubmitError> {
        {
            let state = self.shared.read();
            match state.active {
                None => return Err(SubmitError::NotConnected),
                Some(active) if active != connection => {
                    return Err(SubmitError::StaleConnection(connection));
                }
                Some(_) => {}
            }
            if !state.attributes.contains_key(&handle) {
                return Err(SubmitError::UnknownHandle(handle));
            }
        }
        self.requests.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SubmitError::NotConnected,
        })
    }
}

impl Drop for BtleplugLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl GattView for BtleplugLink {
    fn active_connection(&self) -> Option<ConnectionId> {
        self.shared.read().active
    }

    fn is_link_established(&self) -> bool {
        self.shared.read().established
    }

    fn find_characteristic(
        &self,
        service: &BleUuid,
        characteristic: &BleUuid,
    ) -> Option<CharacteristicInfo> {
        self.shared
            .read()
            .tree
            .characteristic(service, characteristic)
            .cloned()
    }
}

impl GattClient for BtleplugLink {
    fn submit_read(
        &self,
        connection: ConnectionId,
        handle: Handle,
    ) -> std::result::Result<(), SubmitError> {
        self.submit(Request::Read { connection, handle }, connection, handle)
    }

    fn submit_subscribe(
        &self,
        connection: ConnectionId,
        handle: Handle,
    ) -> std::result::Result<(), SubmitError> {
        self.submit(Request::Subscribe { connection, handle }, connection, handle)
    }
}

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;
type AdapterStream = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;

/// Why a session ended.
enum SessionEnd {
    Cancelled,
    Lost(DisconnectReason),
    /// The event receiver was dropped; nobody is listening any more.
    Abandoned,
}

struct Supervisor {
    adapter: Adapter,
    peripheral: Peripheral,
    shared: Arc<Shared>,
    events: mpsc::Sender<ProtocolEvent>,
    requests: mpsc::Receiver<Request>,
    options: LinkOptions,
    reconnect: ReconnectOptions,
    cancel: CancellationToken,
    next_connection: ConnectionId,
}

impl Supervisor {
    async fn run(mut self) {
        let mut failures: u32 = 0;
        loop {
            if failures > 0 {
                if !self.reconnect.allows_attempt(failures) {
                    warn!("Giving up after {} reconnection attempts", failures - 1);
                    break;
                }
                let delay = self.reconnect.delay_for_attempt(failures - 1);
                info!("Reconnection attempt {} in {:?}", failures, delay);
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = sleep(delay) => {}
                }
            }

            self.next_connection = self.next_connection.next();
            let connection = self.next_connection;
            match self.session(connection).await {
                SessionEnd::Cancelled | SessionEnd::Abandoned => break,
                SessionEnd::Lost(reason) => {
                    let was_up = self.shared.read().active == Some(connection);
                    self.shared.write().reset();
                    if !self.emit(ProtocolEvent::ConnectionClosed { connection, reason }).await {
                        break;
                    }
                    // A session that came up restarts the backoff sequence.
                    failures = if was_up { 1 } else { failures + 1 };
                }
            }
        }

        let was_active = self.shared.read().active;
        self.shared.write().reset();
        if let Some(connection) = was_active {
            let _ = self.peripheral.disconnect().await;
            // A full queue means nobody is draining it; do not block shutdown.
            let _ = self.events.try_send(ProtocolEvent::ConnectionClosed {
                connection,
                reason: DisconnectReason::LocalRequest,
            });
        }
        debug!("Link supervisor stopped");
    }

    async fn emit(&self, event: ProtocolEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    #[tracing::instrument(level = "info", skip_all, fields(%connection))]
    async fn session(&mut self, connection: ConnectionId) -> SessionEnd {
        if let Err(e) = self.open(connection).await {
            warn!("Connection failed: {}", e);
            let _ = self.peripheral.disconnect().await;
            return SessionEnd::Lost(DisconnectReason::BleError(e.to_string()));
        }

        let (mut notifications, mut adapter_events) = match self.streams().await {
            Ok(streams) => streams,
            Err(e) => {
                warn!("Could not open event streams: {}", e);
                let _ = self.peripheral.disconnect().await;
                return SessionEnd::Lost(DisconnectReason::BleError(e.to_string()));
            }
        };

        if !self.emit(ProtocolEvent::DiscoveryComplete { connection }).await {
            return SessionEnd::Abandoned;
        }

        let peripheral_id = self.peripheral.id();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
                request = self.requests.recv() => {
                    let Some(request) = request else {
                        return SessionEnd::Cancelled;
                    };
                    if let Some(end) = self.execute(connection, request).await {
                        return end;
                    }
                }
                notification = notifications.next() => {
                    let Some(notification) = notification else {
                        return SessionEnd::Lost(DisconnectReason::Unknown);
                    };
                    if let Some(event) = self.map_notification(connection, notification)
                        && !self.emit(event).await
                    {
                        return SessionEnd::Abandoned;
                    }
                }
                event = adapter_events.next() => match event {
                    Some(CentralEvent::DeviceDisconnected(id)) if id == peripheral_id => {
                        return SessionEnd::Lost(DisconnectReason::RemoteRequest);
                    }
                    Some(_) => {}
                    None => return SessionEnd::Lost(DisconnectReason::Unknown),
                },
            }
        }
    }

    /// Connect, discover and publish the attribute tree.
    async fn open(&mut self, connection: ConnectionId) -> Result<()> {
        info!("Connecting to device...");
        let connected = timeout(self.options.connect_timeout, self.peripheral.connect())
            .await
            .map_err(|_| Error::timeout("connect to device", self.options.connect_timeout))
            .and_then(|r| r.map_err(Error::from));
        let status = if connected.is_ok() {
            GattStatus::SUCCESS
        } else {
            GattStatus::ERROR
        };
        if !self.emit(ProtocolEvent::ConnectionOpened { connection, status }).await {
            return Err(Error::Cancelled);
        }
        connected?;

        info!("Discovering services...");
        timeout(self.options.discovery_timeout, self.peripheral.discover_services())
            .await
            .map_err(|_| Error::timeout("discover services", self.options.discovery_timeout))??;

        let (tree, attributes) = build_tree(&self.peripheral.services());
        debug!(
            "Found {} services, {} attributes",
            tree.services().len(),
            attributes.len()
        );

        // Requests queued for a previous connection are stale.
        while self.requests.try_recv().is_ok() {}

        let mut state = self.shared.write();
        state.tree = tree;
        state.attributes = attributes;
        state.subscribed.clear();
        state.active = Some(connection);
        state.established = true;
        Ok(())
    }

    async fn streams(&self) -> Result<(NotificationStream, AdapterStream)> {
        let notifications = self.peripheral.notifications().await?;
        let adapter_events = self.adapter.events().await?;
        Ok((notifications, adapter_events))
    }

    /// Run one request. Returns `Some` if the link turned out to be gone.
    async fn execute(&mut self, connection: ConnectionId, request: Request) -> Option<SessionEnd> {
        let (requested, handle) = match request {
            Request::Read { connection, handle } | Request::Subscribe { connection, handle } => {
                (connection, handle)
            }
        };
        if requested != connection {
            debug!(%requested, "Dropping request for a previous connection");
            return None;
        }
        let attribute = self.shared.read().attributes.get(&handle).cloned();
        let Some(attribute) = attribute else {
            debug!(%handle, "Dropping request for an unknown handle");
            return None;
        };

        let request_timeout = self.options.request_timeout;
        let event = match request {
            Request::Read { .. } => {
                let result = match &attribute {
                    Attribute::Characteristic(c) => {
                        timeout(request_timeout, self.peripheral.read(c)).await
                    }
                    Attribute::Descriptor { descriptor, .. } => {
                        timeout(request_timeout, self.peripheral.read_descriptor(descriptor)).await
                    }
                };
                let (status, payload) = match result {
                    Ok(Ok(data)) => (GattStatus::SUCCESS, Bytes::from(data)),
                    Ok(Err(e)) => {
                        debug!(%handle, "Read failed: {}", e);
                        (status_for_error(&e), Bytes::new())
                    }
                    Err(_) => {
                        debug!(%handle, "Read timed out after {:?}", request_timeout);
                        (GattStatus::ERROR, Bytes::new())
                    }
                };
                ProtocolEvent::ReadComplete {
                    connection,
                    handle,
                    status,
                    payload,
                }
            }
            Request::Subscribe { .. } => {
                let (characteristic, value_handle) = attribute.notify_target(handle);
                let status = match timeout(request_timeout, self.peripheral.subscribe(characteristic)).await {
                    Ok(Ok(())) => {
                        self.shared.write().subscribed.insert(value_handle);
                        GattStatus::SUCCESS
                    }
                    Ok(Err(e)) => {
                        debug!(%handle, "Subscribe failed: {}", e);
                        status_for_error(&e)
                    }
                    Err(_) => GattStatus::ERROR,
                };
                ProtocolEvent::NotifyRegistered {
                    connection,
                    handle: Some(handle),
                    status,
                }
            }
        };

        let failed = matches!(
            event,
            ProtocolEvent::ReadComplete { status, .. } | ProtocolEvent::NotifyRegistered { status, .. }
                if !status.is_success()
        );
        if !self.emit(event).await {
            return Some(SessionEnd::Abandoned);
        }
        if failed && !self.peripheral.is_connected().await.unwrap_or(false) {
            return Some(SessionEnd::Lost(DisconnectReason::Timeout));
        }
        None
    }

    /// btleplug identifies a notification by characteristic UUID only, so
    /// when two services expose the same characteristic and both are
    /// subscribed, the first in discovery order receives every value.
    fn map_notification(
        &self,
        connection: ConnectionId,
        notification: ValueNotification,
    ) -> Option<ProtocolEvent> {
        let uuid = BleUuid::from(notification.uuid);
        let handle = {
            let state = self.shared.read();
            notification_handle(&state.tree, &state.subscribed, uuid)
        };
        let Some(handle) = handle else {
            trace!(%uuid, "Notification for an unsubscribed characteristic");
            return None;
        };
        Some(ProtocolEvent::Notification {
            connection,
            handle,
            payload: Bytes::from(notification.value),
        })
    }
}

/// The subscribed value handle a notification for `uuid` belongs to, taking
/// the first match in discovery order.
fn notification_handle(
    tree: &ServiceTree,
    subscribed: &HashSet<Handle>,
    uuid: BleUuid,
) -> Option<Handle> {
    tree.characteristics()
        .find(|c| c.uuid == uuid && subscribed.contains(&c.handle))
        .map(|c| c.handle)
}

/// Map a btleplug error to the closest ATT status.
fn status_for_error(error: &btleplug::Error) -> GattStatus {
    match error {
        btleplug::Error::PermissionDenied => GattStatus::READ_NOT_PERMITTED,
        btleplug::Error::NotSupported(_) => GattStatus::REQUEST_NOT_SUPPORTED,
        btleplug::Error::NoSuchCharacteristic => GattStatus::INVALID_HANDLE,
        btleplug::Error::NotConnected => GattStatus::INTERNAL_ERROR,
        _ => GattStatus::ERROR,
    }
}

/// Discovered layout of one service, used to number attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ServiceLayout {
    uuid: BleUuid,
    /// Characteristic UUIDs with their descriptor UUIDs.
    characteristics: Vec<(BleUuid, Vec<BleUuid>)>,
}

/// Number the attributes of `layouts` in order, starting at handle 1.
///
/// Attributes that would overflow the 16-bit handle space are dropped.
fn assign_handles(layouts: &[ServiceLayout]) -> ServiceTree {
    // `None` once 0xFFFF has been handed out.
    let mut next: Option<u16> = Some(1);
    let mut take = |count: u16| -> Option<Handle> {
        let last = next?.checked_add(count - 1)?;
        next = last.checked_add(1);
        Handle::new(last)
    };

    let mut services = Vec::with_capacity(layouts.len());
    'services: for layout in layouts {
        if take(1).is_none() {
            break;
        }
        let mut info = ServiceInfo {
            uuid: layout.uuid,
            characteristics: Vec::with_capacity(layout.characteristics.len()),
        };
        for (uuid, descriptors) in &layout.characteristics {
            // Declaration and value; the value handle is the second.
            let Some(handle) = take(2) else {
                services.push(info);
                break 'services;
            };
            let mut characteristic = CharacteristicInfo {
                service: layout.uuid,
                uuid: *uuid,
                handle,
                descriptors: Vec::with_capacity(descriptors.len()),
            };
            for descriptor in descriptors {
                let Some(handle) = take(1) else {
                    info.characteristics.push(characteristic);
                    services.push(info);
                    break 'services;
                };
                characteristic.descriptors.push(DescriptorInfo {
                    uuid: *descriptor,
                    handle,
                });
            }
            info.characteristics.push(characteristic);
        }
        services.push(info);
    }
    ServiceTree::from_services(services)
}

/// Build the attribute tree and handle map for btleplug's discovered services.
fn build_tree(services: &BTreeSet<Service>) -> (ServiceTree, HashMap<Handle, Attribute>) {
    let layouts: Vec<ServiceLayout> = services
        .iter()
        .map(|s| ServiceLayout {
            uuid: BleUuid::from(s.uuid),
            characteristics: s
                .characteristics
                .iter()
                .map(|c| {
                    (
                        BleUuid::from(c.uuid),
                        c.descriptors.iter().map(|d| BleUuid::from(d.uuid)).collect(),
                    )
                })
                .collect(),
        })
        .collect();
    let tree = assign_handles(&layouts);

    // Both sides iterate in the same order, so zip pairs them up.
    let mut attributes = HashMap::new();
    for (service, info) in services.iter().zip(tree.services()) {
        for (characteristic, chr_info) in service.characteristics.iter().zip(&info.characteristics) {
            attributes.insert(chr_info.handle, Attribute::Characteristic(characteristic.clone()));
            for (descriptor, descr_info) in characteristic.descriptors.iter().zip(&chr_info.descriptors) {
                attributes.insert(
                    descr_info.handle,
                    Attribute::Descriptor {
                        descriptor: descriptor.clone(),
                        owner: characteristic.clone(),
                        owner_handle: chr_info.handle,
                    },
                );
            }
        }
    }
    (tree, attributes)
}
