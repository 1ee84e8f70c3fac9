//! TCP client source.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use signalk_core::ConfigError;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{info, warn};

use super::READ_CHUNK;
use crate::error::StageError;
use crate::record::Record;
use crate::stage::{end_of_input, AppContext, Stage, StageLink, StageOptions};

/// Delay before reconnecting after a failed or closed connection.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Connects to `host:port` and forwards whatever the peer sends.
///
/// A lost connection is retried until end-of-input.
#[derive(Debug)]
pub struct TcpClient {
    host: String,
    port: u16,
}

pub(crate) fn create(
    options: StageOptions,
    _app: &Arc<AppContext>,
) -> Result<Box<dyn Stage>, ConfigError> {
    Ok(Box::new(TcpClient::new(
        options.require_str("host")?,
        options.require_port("port")?,
    )))
}

impl TcpClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Read one connection until it closes. Returns false once the stage
    /// should stop.
    async fn pump(&self, mut stream: TcpStream, link: &mut StageLink) -> bool {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let read = tokio::select! {
                _ = end_of_input(&mut link.input) => return false,
                read = stream.read(&mut buf) => read,
            };
            match read {
                Ok(0) => {
                    warn!("Connection to {}:{} closed", self.host, self.port);
                    return true;
                }
                Ok(n) => {
                    if !link.emit(Record::Chunk(buf[..n].to_vec())).await {
                        return false;
                    }
                }
                Err(e) => {
                    warn!("Error reading from {}:{}: {e}", self.host, self.port);
                    return true;
                }
            }
        }
    }
}

impl Stage for TcpClient {
    fn run(self: Box<Self>, mut link: StageLink) -> BoxFuture<'static, Result<(), StageError>> {
        async move {
            loop {
                let connected = tokio::select! {
                    _ = end_of_input(&mut link.input) => return Ok(()),
                    connected = TcpStream::connect((self.host.as_str(), self.port)) => connected,
                };

                match connected {
                    Ok(stream) => {
                        info!("Connected to {}:{}", self.host, self.port);
                        if !self.pump(stream, &mut link).await {
                            return Ok(());
                        }
                    }
                    Err(e) => warn!("Cannot connect to {}:{}: {e}", self.host, self.port),
                }

                tokio::select! {
                    _ = end_of_input(&mut link.input) => return Ok(()),
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[test]
    fn test_host_and_port_required() {
        let app = Arc::new(AppContext::default());
        let mut options = StageOptions::default();
        options.insert("port", 10110);
        assert!(matches!(
            create(options.clone(), &app),
            Err(ConfigError::MissingOption(o)) if o == "host"
        ));
        options.insert("host", "localhost");
        options.insert("port", "not a port");
        assert!(matches!(create(options, &app), Err(ConfigError::InvalidOption { .. })));
    }

    #[tokio::test]
    async fn test_reads_from_peer_and_stops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (tx, input) = mpsc::channel(1);
        let (output, mut rx) = mpsc::channel(1);
        let task = tokio::spawn(Box::new(TcpClient::new("127.0.0.1", port)).run(StageLink { input, output }));

        let (mut peer, _) = listener.accept().await.unwrap();
        peer.write_all(b"$GPGLL,1\r\n").await.unwrap();
        assert_eq!(rx.recv().await, Some(Record::Chunk(b"$GPGLL,1\r\n".to_vec())));

        drop(tx);
        task.await.unwrap().unwrap();
    }
}
