//! Transport Adapter capability
//!
//! The narrow interface the connection controller uses to reach a haptic
//! control endpoint. Device notifications flow back through the event channel
//! handed to [`TransportAdapter::connect`] for the lifetime of the session.

use crate::domain::error::TransportError;
use crate::domain::models::{ConnectorChoice, RemoteDevice};
use crate::infrastructure::haptics::external::ExternalTransport;
use crate::infrastructure::haptics::simulator::Simulator;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Live handle returned by a successful handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Session {
    pub id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    DeviceAdded(RemoteDevice),
    DeviceRemoved(u32),
    ScanningFinished,
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;
pub type TransportResult<T> = Result<T, TransportError>;

pub trait TransportAdapter: Send + Sync {
    fn connect(&self, events: TransportEventSender) -> BoxFuture<'_, TransportResult<Session>>;

    fn disconnect(&self, session: Session) -> BoxFuture<'_, TransportResult<()>>;

    fn start_scanning(&self, session: Session) -> BoxFuture<'_, TransportResult<()>>;

    fn stop_scanning(&self, session: Session) -> BoxFuture<'_, TransportResult<()>>;

    /// `intensity` is already clamped to [0, 1]
    fn send_vibrate(
        &self,
        session: Session,
        device_index: u32,
        intensity: f64,
    ) -> BoxFuture<'_, TransportResult<()>>;

    fn send_stop(&self, session: Session, device_index: u32) -> BoxFuture<'_, TransportResult<()>>;
}

/// Builds the adapter for a connector choice at connect time.
pub trait TransportFactory: Send + Sync {
    fn create(&self, choice: ConnectorChoice) -> Arc<dyn TransportAdapter>;
}

/// Embedded connections share one simulator; external ones dial a local socket.
pub struct DefaultTransportFactory {
    simulator: Simulator,
    client_name: String,
    endpoint_name: String,
}

impl DefaultTransportFactory {
    pub fn new(
        simulator: Simulator,
        client_name: impl Into<String>,
        endpoint_name: impl Into<String>,
    ) -> Self {
        Self {
            simulator,
            client_name: client_name.into(),
            endpoint_name: endpoint_name.into(),
        }
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, choice: ConnectorChoice) -> Arc<dyn TransportAdapter> {
        match choice {
            ConnectorChoice::Embedded => Arc::new(self.simulator.clone()),
            ConnectorChoice::External => Arc::new(ExternalTransport::new(
                self.client_name.clone(),
                self.endpoint_name.clone(),
            )),
        }
    }
}
