use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};
use tracing::debug;

pub type ClientId = u64;

/// Thread-safe set of live connection writers.
///
/// One exclusive lock guards the whole set: `add`, `remove`, and `broadcast`
/// all hold it for their duration, so a broadcast pass can never interleave
/// with a membership change. That serializes all registry traffic through one
/// lock, which is fine at interactive chat rates.
///
/// Generic over the write half so unit tests can drive it with in-memory
/// duplex streams; the relay instantiates it with `OwnedWriteHalf`.
pub struct ClientRegistry<W> {
    clients: Mutex<HashMap<ClientId, W>>,
    next_id: AtomicU64,
}

impl<W> ClientRegistry<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Insert a writer and return the id its handler uses to exclude itself
    /// from broadcasts and to deregister on disconnect.
    pub async fn add(&self, writer: W) -> ClientId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut clients = self.clients.lock().await;
        clients.insert(id, writer);
        id
    }

    /// Remove a client. Called exactly once per connection, by its own
    /// handler on the first failed read.
    pub async fn remove(&self, id: ClientId) -> bool {
        let mut clients = self.clients.lock().await;
        clients.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        let clients = self.clients.lock().await;
        clients.len()
    }

    /// Fan the payload out to every member except `exclude`, each as an
    /// independent write. A failed write is logged and skipped; the broken
    /// member is removed later by its own handler, not here.
    pub async fn broadcast(&self, payload: &[u8], exclude: Option<ClientId>) {
        let mut clients = self.clients.lock().await;
        for (&id, writer) in clients.iter_mut() {
            if Some(id) == exclude {
                continue;
            }
            if let Err(error) = write_payload(writer, payload).await {
                debug!(client = id, ?error, "skipping undeliverable peer");
            }
        }
    }
}

impl<W> Default for ClientRegistry<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn default() -> Self {
        Self::new()
    }
}

async fn write_payload<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(payload).await?;
    writer.flush().await
}
