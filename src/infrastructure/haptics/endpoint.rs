//! Local-socket haptic endpoint
//!
//! Serves a [`Simulator`] to `External` connectors in other processes.
//! Each connection gets its own session; the simulator still admits only one
//! client at a time and rejects the handshake of any other.

use crate::domain::error::TransportError;
use crate::domain::vibration::clamp_unit;
use crate::infrastructure::haptics::external::socket_name;
use crate::infrastructure::haptics::protocol::{
    decode_line, encode_line, ClientMessage, ServerMessage,
};
use crate::infrastructure::haptics::simulator::Simulator;
use crate::infrastructure::haptics::transport::{Session, TransportAdapter, TransportEvent};
use anyhow::Context;
use interprocess::local_socket::tokio::{prelude::*, Listener, Stream as LocalStream};
use interprocess::local_socket::ListenerOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const SERVER_NAME: &str = "Flappy Taco Simulated Endpoint";

pub struct EndpointServer {
    listener: Listener,
    simulator: Simulator,
}

impl EndpointServer {
    pub fn bind(endpoint_name: &str, simulator: Simulator) -> anyhow::Result<Self> {
        let name = socket_name(endpoint_name)
            .with_context(|| format!("Invalid endpoint name '{}'", endpoint_name))?;
        let listener = ListenerOptions::new()
            .name(name)
            .create_tokio()
            .with_context(|| format!("Failed to listen on '{}'", endpoint_name))?;
        info!("Haptic endpoint listening on '{}'", endpoint_name);
        Ok(Self {
            listener,
            simulator,
        })
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        loop {
            let conn = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Accept failed: {}", e);
                    continue;
                }
            };
            info!("Client connected");
            let simulator = self.simulator.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(conn, simulator).await {
                    error!("Connection error: {:#}", e);
                }
            });
        }
    }
}

fn map_event(event: TransportEvent) -> ServerMessage {
    match event {
        TransportEvent::DeviceAdded(device) => ServerMessage::DeviceAdded { device },
        TransportEvent::DeviceRemoved(device_index) => ServerMessage::DeviceRemoved { device_index },
        TransportEvent::ScanningFinished => ServerMessage::ScanningFinished,
    }
}

fn reply(id: u32, result: Result<(), TransportError>) -> ServerMessage {
    match result {
        Ok(()) => ServerMessage::Ok { id },
        Err(e) => ServerMessage::Error {
            id,
            message: e.to_string(),
        },
    }
}

async fn handle_connection(conn: LocalStream, simulator: Simulator) -> anyhow::Result<()> {
    let (reader, mut writer) = conn.split();
    let mut reader = BufReader::new(reader);

    // Replies and notifications share one writer so their order is kept
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let writer_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let line = match encode_line(&message) {
                Ok(line) => line,
                Err(e) => {
                    warn!("Could not encode {:?}: {}", message, e);
                    continue;
                }
            };
            if writer.write_all(line.as_bytes()).await.is_err() || writer.flush().await.is_err() {
                break;
            }
        }
    });

    let mut session: Option<Session> = None;
    let mut buffer = String::new();

    loop {
        buffer.clear();
        match reader.read_line(&mut buffer).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                error!("Read error: {}", e);
                break;
            }
        }

        let message: ClientMessage = match decode_line(&buffer) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring malformed request: {}", e);
                continue;
            }
        };
        debug!("Received request: {:?}", message);
        let id = message.id();

        let response = match (message, session) {
            (
                ClientMessage::RequestServerInfo {
                    client_name,
                    protocol_version,
                    ..
                },
                None,
            ) => {
                let (events_tx, mut events_rx) = mpsc::unbounded_channel();
                match simulator.connect(events_tx).await {
                    Ok(opened) => {
                        info!(
                            "Client '{}' (protocol v{}) opened session {}",
                            client_name, protocol_version, opened.id
                        );
                        session = Some(opened);
                        let forward = out_tx.clone();
                        // ServerInfo is queued before any device notification
                        let _ = out_tx.send(ServerMessage::ServerInfo {
                            id,
                            server_name: SERVER_NAME.to_string(),
                        });
                        tokio::spawn(async move {
                            while let Some(event) = events_rx.recv().await {
                                if forward.send(map_event(event)).is_err() {
                                    break;
                                }
                            }
                        });
                        continue;
                    }
                    Err(e) => reply(id, Err(e)),
                }
            }
            (ClientMessage::RequestServerInfo { .. }, Some(_)) => {
                reply(id, Err(TransportError::Rejected("handshake already done".into())))
            }
            (_, None) => reply(id, Err(TransportError::SessionClosed)),
            (ClientMessage::StartScanning { .. }, Some(s)) => {
                reply(id, simulator.start_scanning(s).await)
            }
            (ClientMessage::StopScanning { .. }, Some(s)) => {
                reply(id, simulator.stop_scanning(s).await)
            }
            (
                ClientMessage::Vibrate {
                    device_index,
                    intensity,
                    ..
                },
                Some(s),
            ) => reply(
                id,
                simulator
                    .send_vibrate(s, device_index, clamp_unit(intensity))
                    .await,
            ),
            (ClientMessage::Stop { device_index, .. }, Some(s)) => {
                reply(id, simulator.send_stop(s, device_index).await)
            }
            (ClientMessage::Disconnect { .. }, Some(s)) => {
                session = None;
                let _ = out_tx.send(reply(id, simulator.disconnect(s).await));
                break;
            }
        };
        let _ = out_tx.send(response);
    }

    if let Some(s) = session.take() {
        debug!("Client went away without disconnecting");
        let _ = simulator.disconnect(s).await;
    }
    drop(out_tx);
    let _ = writer_task.await;
    info!("Client disconnected");
    Ok(())
}
