//! NMEA 0183 over TCP.
//!
//! Every client connected to the server receives every outbound sentence,
//! terminated with CRLF. Clients only receive sentences emitted after they
//! connect.

use std::net::SocketAddr;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::ServerError;

/// Serves the outbound sentence channel to TCP clients.
pub struct NmeaTcpServer {
    listener: TcpListener,
    sentences: broadcast::Sender<String>,
}

impl NmeaTcpServer {
    pub async fn bind(
        addr: impl ToSocketAddrs + std::fmt::Display,
        sentences: broadcast::Sender<String>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self {
            listener,
            sentences,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients until the task is dropped.
    pub async fn run(self) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("NMEA 0183 TCP server listening on {addr}");
        }
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let rx = self.sentences.subscribe();
                    tokio::spawn(handle_client(stream, addr, rx));
                }
                Err(e) => {
                    error!("Failed to accept NMEA 0183 client: {e}");
                }
            }
        }
    }
}

async fn handle_client(
    mut stream: TcpStream,
    addr: SocketAddr,
    mut sentences: broadcast::Receiver<String>,
) {
    info!("NMEA 0183 client connected: {addr}");
    loop {
        match sentences.recv().await {
            Ok(sentence) => {
                let line = format!("{sentence}\r\n");
                if let Err(e) = stream.write_all(line.as_bytes()).await {
                    debug!("Write to {addr} failed: {e}");
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("NMEA 0183 client {addr} lagged, skipped {skipped} sentences");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    info!("NMEA 0183 client disconnected: {addr}");
}
