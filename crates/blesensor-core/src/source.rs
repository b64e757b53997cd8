//! The per-source GATT state machine.
//!
//! A [`Source`] holds the only mutable state of a value source: its
//! [`ConnectionState`], the resolved [`Handle`] and the in-flight read flag.
//! Every protocol event goes through [`Source::dispatch`], every scheduler
//! tick through [`Source::poll`]. Neither talks to the transport or the sink
//! directly; both return [`Effect`]s that the caller carries out, so the
//! whole machine can be driven from tests with nothing but a [`GattView`].
//!
//! # State transitions
//!
//! ```text
//!                 discovery complete
//! Disconnected ──────────────────────► Discovering
//!      ▲                                   │ resolved
//!      │ connection closed                 ├──────────── notify ──► SubscriptionPending
//!      │ (from any state)                  │                              │ notify registered
//!      │                                   └── no notify ──► Established ◄┘
//! ```
//!
//! A resolution failure leaves the source in `Discovering` until the link
//! drops.

use tracing::{debug, info, trace, warn};

use blesensor_types::{ConnectionId, ConnectionState, GattStatus, Handle, Measurement};

use crate::config::SourceConfig;
use crate::error::{Fault, NotReady, SubmitError};
use crate::protocol::ProtocolEvent;
use crate::resolver::{AttributeTarget, resolve};
use crate::traits::GattView;

/// A side effect requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Publish a measurement or the unavailable marker.
    Emit(Measurement),
    /// Raise the degraded-status flag.
    SetDegraded(Fault),
    /// Clear the degraded-status flag.
    ClearDegraded,
    /// A fault that is logged but leaves the status flag alone.
    Report(Fault),
    /// Submit a notification registration.
    Subscribe {
        /// Connection to submit on.
        connection: ConnectionId,
        /// Handle to register for.
        handle: Handle,
    },
    /// Submit a read.
    Read {
        /// Connection to submit on.
        connection: ConnectionId,
        /// Handle to read.
        handle: Handle,
    },
}

/// One configured value source and its connection-scoped state.
#[derive(Debug)]
pub struct Source {
    config: SourceConfig,
    state: ConnectionState,
    handle: Option<Handle>,
    read_in_flight: bool,
}

impl Source {
    /// Create a source in the `Disconnected` state.
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            handle: None,
            read_in_flight: false,
        }
    }

    /// The configuration this source was created with.
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// The source name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The resolved handle, if discovery found the target.
    pub fn handle(&self) -> Option<Handle> {
        self.handle
    }

    /// Whether a guarded read is outstanding.
    pub fn read_in_flight(&self) -> bool {
        self.read_in_flight
    }

    /// Apply one protocol event.
    pub fn dispatch<V>(&mut self, event: &ProtocolEvent, view: &V) -> Vec<Effect>
    where
        V: GattView + ?Sized,
    {
        match event {
            ProtocolEvent::ConnectionOpened { connection, status } => {
                if status.is_success() {
                    info!(source = %self.config.name, %connection, "Connected successfully!");
                } else {
                    debug!(source = %self.config.name, %connection, %status, "Connection attempt failed");
                }
                Vec::new()
            }
            ProtocolEvent::ConnectionClosed { connection, reason } => {
                warn!(source = %self.config.name, %connection, %reason, "Disconnected!");
                self.state = ConnectionState::Disconnected;
                self.handle = None;
                self.read_in_flight = false;
                vec![
                    Effect::SetDegraded(Fault::LinkLost),
                    Effect::Emit(Measurement::Unavailable),
                ]
            }
            ProtocolEvent::DiscoveryComplete { connection } => {
                if !is_active(*connection, view) {
                    return Vec::new();
                }
                self.on_discovery_complete(*connection, view)
            }
            ProtocolEvent::NotifyRegistered {
                connection,
                handle,
                status,
            } => {
                if !is_active(*connection, view) {
                    return Vec::new();
                }
                self.on_notify_registered(*handle, *status);
                Vec::new()
            }
            ProtocolEvent::ReadComplete {
                connection,
                handle,
                status,
                payload,
            } => {
                if !is_active(*connection, view) {
                    return Vec::new();
                }
                self.on_read_complete(*handle, *status, payload)
            }
            ProtocolEvent::Notification {
                connection,
                handle,
                payload,
            } => {
                if !is_active(*connection, view) || self.handle != Some(*handle) {
                    return Vec::new();
                }
                trace!(
                    source = %self.config.name,
                    %handle,
                    len = payload.len(),
                    "Notification: {:02X?}",
                    payload.as_ref()
                );
                vec![Effect::Emit(self.config.parser.parse(payload))]
            }
            ProtocolEvent::WriteComplete { .. } | ProtocolEvent::MtuChanged { .. } => Vec::new(),
        }
    }

    fn on_discovery_complete<V>(&mut self, connection: ConnectionId, view: &V) -> Vec<Effect>
    where
        V: GattView + ?Sized,
    {
        self.state = ConnectionState::Discovering;
        self.handle = None;
        self.read_in_flight = false;

        let target = AttributeTarget {
            service: &self.config.service,
            characteristic: &self.config.characteristic,
            descriptor: self.config.descriptor.as_ref(),
        };
        let handle = match resolve(target, view) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(source = %self.config.name, "{}", e);
                return vec![
                    Effect::SetDegraded(Fault::from(e)),
                    Effect::Emit(Measurement::Unavailable),
                ];
            }
        };

        debug!(source = %self.config.name, %handle, "Resolved handle");
        self.handle = Some(handle);
        if self.config.notify {
            self.state = ConnectionState::SubscriptionPending;
            vec![Effect::Subscribe { connection, handle }]
        } else {
            self.state = ConnectionState::Established;
            Vec::new()
        }
    }

    fn on_notify_registered(&mut self, handle: Option<Handle>, status: GattStatus) {
        if self.state != ConnectionState::SubscriptionPending {
            return;
        }
        if handle.is_some() && handle != self.handle {
            return;
        }
        if !status.is_success() {
            // A failed registration still makes the source ready; polling
            // keeps working without notifications.
            warn!(source = %self.config.name, %status, "Notification registration failed");
        } else {
            debug!(source = %self.config.name, "Registered for notifications");
        }
        self.state = ConnectionState::Established;
    }

    fn on_read_complete(&mut self, handle: Handle, status: GattStatus, payload: &[u8]) -> Vec<Effect> {
        let ours = self.handle == Some(handle);
        if ours {
            self.read_in_flight = false;
        }
        if !status.is_success() {
            warn!(
                source = %self.config.name,
                "Error reading char at handle {}, status={}",
                handle,
                status
            );
            if !ours {
                return Vec::new();
            }
            return vec![Effect::Report(Fault::ReadFailed { handle, status })];
        }
        if !ours {
            return Vec::new();
        }
        trace!(source = %self.config.name, %handle, "Read: {:02X?}", payload);
        vec![
            Effect::ClearDegraded,
            Effect::Emit(self.config.parser.parse(payload)),
        ]
    }

    /// Handle a scheduler tick.
    ///
    /// Returns the read to submit, or why no read may be issued. The
    /// preconditions are checked in order: established, handle resolved,
    /// link up, no guarded read outstanding.
    pub fn poll<V>(&mut self, view: &V) -> Result<Effect, NotReady>
    where
        V: GattView + ?Sized,
    {
        let result = self.check_ready(view);
        match result {
            Ok(Effect::Read { .. }) => {
                if self.config.dedupe_reads {
                    self.read_in_flight = true;
                }
            }
            Err(NotReady::ReadInFlight) => {
                debug!(source = %self.config.name, "{}", NotReady::ReadInFlight);
            }
            Err(e) => warn!(source = %self.config.name, "{}", e),
            Ok(_) => {}
        }
        result
    }

    fn check_ready<V>(&self, view: &V) -> Result<Effect, NotReady>
    where
        V: GattView + ?Sized,
    {
        if self.state != ConnectionState::Established {
            return Err(NotReady::NotEstablished);
        }
        let handle = self.handle.ok_or(NotReady::NoHandle)?;
        let connection = view
            .active_connection()
            .filter(|_| view.is_link_established())
            .ok_or(NotReady::LinkDown)?;
        if self.config.dedupe_reads && self.read_in_flight {
            return Err(NotReady::ReadInFlight);
        }
        Ok(Effect::Read { connection, handle })
    }

    /// The transport refused a read synchronously.
    pub fn read_rejected(&mut self, handle: Handle, error: SubmitError) -> Vec<Effect> {
        self.read_in_flight = false;
        let fault = Fault::ReadRejected {
            handle,
            source: error,
        };
        warn!(source = %self.config.name, "{}", fault);
        vec![
            Effect::SetDegraded(fault),
            Effect::Emit(Measurement::Unavailable),
        ]
    }

    /// The transport refused a subscribe request synchronously.
    ///
    /// No registration event will follow, so the source becomes ready
    /// straight away and is served by polling alone.
    pub fn subscribe_rejected(&mut self, handle: Handle, error: SubmitError) -> Vec<Effect> {
        let fault = Fault::SubscribeRejected {
            handle,
            source: error,
        };
        warn!(source = %self.config.name, "{}", fault);
        if self.state == ConnectionState::SubscriptionPending && self.handle == Some(handle) {
            self.state = ConnectionState::Established;
        }
        vec![Effect::Report(fault)]
    }
}

fn is_active<V>(connection: ConnectionId, view: &V) -> bool
where
    V: GattView + ?Sized,
{
    view.active_connection() == Some(connection)
}
