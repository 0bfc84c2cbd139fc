//! TCP link to the host runtime.  Frames are length-prefixed JSON
//! [`Message`]s in both directions.

use nowplaying_proto::protocol::{Message, PluginCommand, MAX_FRAME_LEN, PROTOCOL_VERSION};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use crate::engine::EngineEvent;

pub fn start_server(
    bind_address: String,
    port: u16,
    event_tx: mpsc::Sender<EngineEvent>,
    host_tx: broadcast::Sender<PluginCommand>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = nowplaying_proto::platform::plugin_address(&bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind TCP socket {}: {}", addr, e);
                return;
            }
        };

        info!("Waiting for host at {}", addr);

        let mut client_id = 0usize;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    let id = client_id;
                    info!("Host {} connected from {}", id, peer);

                    let evt_tx = event_tx.clone();
                    let cmd_rx = host_tx.subscribe();

                    tokio::spawn(async move {
                        handle_host(stream, id, evt_tx.clone(), cmd_rx).await;
                        info!("Host {} disconnected", id);
                        let _ = evt_tx.send(EngineEvent::HostDisconnected).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    })
}

async fn handle_host(
    stream: TcpStream,
    host_id: usize,
    event_tx: mpsc::Sender<EngineEvent>,
    mut cmd_rx: broadcast::Receiver<PluginCommand>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    let hello = PluginCommand::Hello {
        protocol_version: PROTOCOL_VERSION,
    };
    if let Ok(encoded) = Message::Plugin(hello).encode() {
        if write_half.write_all(&encoded).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => {
                        info!("Host {} closed connection", host_id);
                        break;
                    }
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);

                        loop {
                            let Some(len) = Message::declared_len(&read_buf) else { break; };
                            if len > MAX_FRAME_LEN {
                                warn!("Host {} announced a {} byte frame, dropping connection", host_id, len);
                                return;
                            }
                            match Message::decode(&read_buf) {
                                Ok((Message::Host(event), consumed)) => {
                                    read_buf.drain(..consumed);
                                    if event_tx.send(EngineEvent::Host(event)).await.is_err() {
                                        warn!("Engine channel closed");
                                        return;
                                    }
                                }
                                Ok((_, consumed)) => {
                                    read_buf.drain(..consumed);
                                }
                                Err(e) => {
                                    if read_buf.len() >= 4 + len {
                                        // Whole frame present but not understood: skip it.
                                        warn!("Host {} sent an unreadable frame: {}", host_id, e);
                                        read_buf.drain(..4 + len);
                                    } else {
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Read error from host {}: {}", host_id, e);
                        break;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Ok(cmd) => {
                        if let Ok(encoded) = Message::Plugin(cmd).encode() {
                            if write_half.write_all(&encoded).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Host {} missed {} commands", host_id, n);
                    }
                    Err(_) => break,
                }
            }
        }
    }
}
