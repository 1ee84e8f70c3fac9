//! UDP listener source.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use signalk_core::ConfigError;
use tokio::net::UdpSocket;
use tracing::{info, trace};

use crate::error::StageError;
use crate::record::Record;
use crate::stage::{end_of_input, AppContext, Stage, StageLink, StageOptions};

const MAX_DATAGRAM: usize = 65_535;

/// Binds `0.0.0.0:port` and forwards each datagram as one chunk.
#[derive(Debug)]
pub struct UdpListener {
    addr: SocketAddr,
}

pub(crate) fn create(
    options: StageOptions,
    _app: &Arc<AppContext>,
) -> Result<Box<dyn Stage>, ConfigError> {
    let port = options.require_port("port")?;
    Ok(Box::new(UdpListener::new(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))))
}

impl UdpListener {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl Stage for UdpListener {
    fn run(self: Box<Self>, mut link: StageLink) -> BoxFuture<'static, Result<(), StageError>> {
        async move {
            let socket = UdpSocket::bind(self.addr).await?;
            info!("Listening for UDP on {}", socket.local_addr()?);
            let mut buf = vec![0u8; MAX_DATAGRAM];

            loop {
                let (n, peer) = tokio::select! {
                    _ = end_of_input(&mut link.input) => return Ok(()),
                    received = socket.recv_from(&mut buf) => received?,
                };
                trace!("{n} bytes from {peer}");
                if !link.emit(Record::Chunk(buf[..n].to_vec())).await {
                    return Ok(());
                }
            }
        }
        .boxed()
    }
}
