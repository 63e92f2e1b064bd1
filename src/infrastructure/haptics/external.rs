//! External connector
//!
//! Reaches a haptic endpoint running in another process over a local socket.
//! A background reader task routes replies to the request that is waiting for
//! them and turns device notifications into [`TransportEvent`]s.

use crate::domain::error::TransportError;
use crate::infrastructure::haptics::protocol::{
    decode_line, encode_line, ClientMessage, ServerMessage, PROTOCOL_VERSION,
};
use crate::infrastructure::haptics::transport::{
    Session, TransportAdapter, TransportEvent, TransportEventSender, TransportResult,
};
use futures::future::BoxFuture;
use futures::FutureExt;
use interprocess::local_socket::tokio::{prelude::*, RecvHalf, SendHalf, Stream as LocalStream};
use interprocess::local_socket::{GenericFilePath, GenericNamespaced, Name, NameType, ToFsName, ToNsName};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long a single request may wait for its reply
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolve an endpoint name to a local socket name. Names containing a path
/// separator are treated as filesystem paths, everything else as namespaced.
pub fn socket_name(endpoint: &str) -> io::Result<Name<'_>> {
    if endpoint.contains('/') || !GenericNamespaced::is_supported() {
        endpoint.to_fs_name::<GenericFilePath>()
    } else {
        endpoint.to_ns_name::<GenericNamespaced>()
    }
}

/// Session ids are unique per process, across connector instances
static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

type PendingReplies = Arc<Mutex<HashMap<u32, oneshot::Sender<ServerMessage>>>>;

struct Link {
    session: Session,
    writer: tokio::sync::Mutex<SendHalf>,
    pending: PendingReplies,
    reader: JoinHandle<()>,
}

pub struct ExternalTransport {
    client_name: String,
    endpoint_name: String,
    next_request: AtomicU32,
    link: Mutex<Option<Arc<Link>>>,
}

impl ExternalTransport {
    pub fn new(client_name: impl Into<String>, endpoint_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            endpoint_name: endpoint_name.into(),
            next_request: AtomicU32::new(1),
            link: Mutex::new(None),
        }
    }

    fn link_slot(&self) -> MutexGuard<'_, Option<Arc<Link>>> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn link_for(&self, session: Session) -> TransportResult<Arc<Link>> {
        match self.link_slot().as_ref() {
            Some(link) if link.session == session => Ok(link.clone()),
            _ => Err(TransportError::SessionClosed),
        }
    }

    async fn request(
        &self,
        link: &Link,
        build: impl FnOnce(u32) -> ClientMessage,
    ) -> TransportResult<ServerMessage> {
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let message = build(id);
        let line = encode_line(&message)?;

        let (tx, rx) = oneshot::channel();
        link.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);

        let written = {
            let mut writer = link.writer.lock().await;
            match writer.write_all(line.as_bytes()).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            link.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
            return Err(e.into());
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(TransportError::SessionClosed),
            Err(_) => {
                link.pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&id);
                Err(TransportError::Timeout(REQUEST_TIMEOUT))
            }
        }
    }

    async fn request_ok(
        &self,
        session: Session,
        build: impl FnOnce(u32) -> ClientMessage,
    ) -> TransportResult<()> {
        let link = self.link_for(session)?;
        expect_ok(self.request(&link, build).await?)
    }

    async fn open(&self, events: TransportEventSender) -> TransportResult<Session> {
        if self.link_slot().is_some() {
            return Err(TransportError::Rejected(
                "connector already has an open session".to_string(),
            ));
        }

        let name = socket_name(&self.endpoint_name)?;
        let stream = LocalStream::connect(name).await.map_err(|e| {
            TransportError::Unreachable(format!("{}: {}", self.endpoint_name, e))
        })?;
        let (reader, writer) = stream.split();

        let pending: PendingReplies = Arc::default();
        let reader = tokio::spawn(read_loop(reader, pending.clone(), events));
        let session = Session {
            id: NEXT_SESSION.fetch_add(1, Ordering::Relaxed),
        };
        let link = Link {
            session,
            writer: tokio::sync::Mutex::new(writer),
            pending,
            reader,
        };

        let client_name = self.client_name.clone();
        let reply = self
            .request(&link, |id| ClientMessage::RequestServerInfo {
                id,
                client_name,
                protocol_version: PROTOCOL_VERSION,
            })
            .await;

        match reply {
            Ok(ServerMessage::ServerInfo { server_name, .. }) => {
                info!("Connected to haptic endpoint '{}'", server_name);
                *self.link_slot() = Some(Arc::new(link));
                Ok(session)
            }
            Ok(ServerMessage::Error { message, .. }) => {
                link.reader.abort();
                Err(TransportError::Rejected(message))
            }
            Ok(other) => {
                link.reader.abort();
                Err(TransportError::Protocol(format!(
                    "expected ServerInfo, got {:?}",
                    other
                )))
            }
            Err(e) => {
                link.reader.abort();
                Err(e)
            }
        }
    }

    async fn close(&self, session: Session) -> TransportResult<()> {
        let link = self.link_for(session)?;
        let result = self
            .request(&link, |id| ClientMessage::Disconnect { id })
            .await
            .and_then(expect_ok);

        link.reader.abort();
        self.link_slot().take();
        debug!("External session {} closed", session.id);
        result
    }
}

fn expect_ok(reply: ServerMessage) -> TransportResult<()> {
    match reply {
        ServerMessage::Ok { .. } => Ok(()),
        ServerMessage::Error { message, .. } => Err(TransportError::Rejected(message)),
        other => Err(TransportError::Protocol(format!(
            "unexpected reply {:?}",
            other
        ))),
    }
}

async fn read_loop(reader: RecvHalf, pending: PendingReplies, events: TransportEventSender) {
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("Endpoint closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Endpoint read failed: {}", e);
                break;
            }
        }

        let message: ServerMessage = match decode_line(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping malformed endpoint message: {}", e);
                continue;
            }
        };

        if let Some(id) = message.reply_to() {
            let waiter = pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(message);
                }
                None => debug!("Reply {} arrived after its request gave up", id),
            }
            continue;
        }

        let event = match message {
            ServerMessage::DeviceAdded { device } => TransportEvent::DeviceAdded(device),
            ServerMessage::DeviceRemoved { device_index } => {
                TransportEvent::DeviceRemoved(device_index)
            }
            ServerMessage::ScanningFinished => TransportEvent::ScanningFinished,
            _ => continue,
        };
        if events.send(event).is_err() {
            break;
        }
    }

    // Wake every request still waiting; they observe a closed session
    pending.lock().unwrap_or_else(|e| e.into_inner()).clear();
}

impl TransportAdapter for ExternalTransport {
    fn connect(&self, events: TransportEventSender) -> BoxFuture<'_, TransportResult<Session>> {
        self.open(events).boxed()
    }

    fn disconnect(&self, session: Session) -> BoxFuture<'_, TransportResult<()>> {
        self.close(session).boxed()
    }

    fn start_scanning(&self, session: Session) -> BoxFuture<'_, TransportResult<()>> {
        self.request_ok(session, |id| ClientMessage::StartScanning { id })
            .boxed()
    }

    fn stop_scanning(&self, session: Session) -> BoxFuture<'_, TransportResult<()>> {
        self.request_ok(session, |id| ClientMessage::StopScanning { id })
            .boxed()
    }

    fn send_vibrate(
        &self,
        session: Session,
        device_index: u32,
        intensity: f64,
    ) -> BoxFuture<'_, TransportResult<()>> {
        self.request_ok(session, move |id| ClientMessage::Vibrate {
            id,
            device_index,
            intensity,
        })
        .boxed()
    }

    fn send_stop(&self, session: Session, device_index: u32) -> BoxFuture<'_, TransportResult<()>> {
        self.request_ok(session, move |id| ClientMessage::Stop { id, device_index })
            .boxed()
    }
}

impl Drop for ExternalTransport {
    fn drop(&mut self) {
        if let Some(link) = self.link_slot().take() {
            link.reader.abort();
        }
    }
}
