use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    io::AsyncReadExt,
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    message::RECV_CHUNK,
    registry::{ClientId, ClientRegistry},
};

const SHUTDOWN_NOTICE: &[u8] = b"*** relay shutting down";

/// The TCP relay: accepts connections indefinitely and runs one handler task
/// per connection. The registry is owned here and injected into handlers
/// rather than living in ambient global state.
pub struct RelayServer {
    listener: TcpListener,
    registry: Arc<ClientRegistry<OwnedWriteHalf>>,
}

impl RelayServer {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            registry: Arc::new(ClientRegistry::new()),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle to the registry, mostly for tests that want to observe
    /// membership from outside the accept loop.
    pub fn registry(&self) -> Arc<ClientRegistry<OwnedWriteHalf>> {
        Arc::clone(&self.registry)
    }

    /// Accept until the shutdown future resolves. Accept failures are
    /// transient: log and keep accepting. Handlers spawned before shutdown
    /// run until their own connection dies.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let RelayServer { listener, registry } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("relay shutting down");
                    registry.broadcast(SHUTDOWN_NOTICE, None).await;
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &registry).await;
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    registry: &Arc<ClientRegistry<OwnedWriteHalf>>,
) {
    match result {
        Ok((stream, peer)) => {
            let (reader, writer) = stream.into_split();
            let id = registry.add(writer).await;
            info!(%peer, client = id, "client connected");
            spawn_client_handler(reader, id, peer, registry);
        }
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_client_handler(
    reader: OwnedReadHalf,
    id: ClientId,
    peer: SocketAddr,
    registry: &Arc<ClientRegistry<OwnedWriteHalf>>,
) {
    let registry = Arc::clone(registry);
    tokio::spawn(async move {
        handle_connection(reader, id, &registry).await;
        // First failed read is terminal for this connection; deregister once
        // and let the task end.
        registry.remove(id).await;
        info!(%peer, client = id, "client disconnected");
    });
}

/// Read chunks and fan each one out verbatim, excluding the sender. The wire
/// is unframed: a chunk may hold a partial or merged message, and it is
/// relayed exactly as received.
async fn handle_connection(
    mut reader: OwnedReadHalf,
    id: ClientId,
    registry: &ClientRegistry<OwnedWriteHalf>,
) {
    let mut buf = [0u8; RECV_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => registry.broadcast(&buf[..n], Some(id)).await,
            Err(error) => {
                info!(client = id, ?error, "read failed, dropping connection");
                break;
            }
        }
    }
}
