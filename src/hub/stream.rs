//! Stream hub: per-channel ingest, state machine and fan-out
//!
//! One [`StreamHub`] serves one logical channel (one UDP address plus an
//! interface set). It owns the ingest sockets and their receive loops, the
//! table of attached clients, the late-joiner ring and the last broadcast
//! frame. A single control task serializes attach/detach traffic; frames
//! fan out to every client queue without ever blocking on a slow one.
//!
//! Lifetime: a hub starts Playing, closes once (idempotently) when its last
//! client leaves or [`StreamHub::close`] is called, and is then replaced by
//! a fresh hub on the next request for the same channel.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{HubError, Result};
use crate::hub::client::HubClient;
use crate::hub::config::HubConfig;
use crate::hub::socket::open_channel_socket;
use crate::media::ring::FrameRing;
use crate::media::rtp;
use crate::stats::HubStats;

/// Playback state of a hub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    /// Frames are flowing (or the hub just started and expects them)
    Playing,
    /// Terminal state entered by `close`
    Stopped,
    /// Reserved terminal failure state; nothing produces it currently
    Error,
}

type OnEmpty = Box<dyn FnOnce() + Send + 'static>;

/// Fan-out unit for one logical channel
pub struct StreamHub {
    me: Weak<StreamHub>,
    addrs: Vec<String>,
    config: HubConfig,
    shared: RwLock<HubShared>,
    state_tx: watch::Sender<HubState>,
    closed: CancellationToken,
    add_tx: mpsc::Sender<HubClient>,
    remove_tx: mpsc::Sender<String>,
    packet_count: AtomicU64,
    drop_count: AtomicU64,
    on_empty: Mutex<Option<OnEmpty>>,
}

/// Mutable hub state guarded by the hub lock.
///
/// The ring carries its own inner lock; when both are needed the hub lock
/// is taken first.
struct HubShared {
    sockets: Vec<Arc<UdpSocket>>,
    /// Cancels the receive loops of the current socket generation;
    /// replaced wholesale by `update_interfaces`.
    socket_gen: CancellationToken,
    clients: HashMap<String, HubClient>,
    ring: Option<Arc<FrameRing>>,
    last_frame: Option<Bytes>,
}

impl StreamHub {
    /// Create a hub listening on `addrs`, optionally scoped to `ifaces`.
    ///
    /// Must be called from within a tokio runtime; the control task and one
    /// receive task per socket are spawned immediately.
    pub fn new(addrs: Vec<String>, ifaces: Vec<String>) -> Result<Arc<Self>> {
        Self::with_config(addrs, ifaces, HubConfig::default())
    }

    /// Create a hub with a custom configuration
    pub fn with_config(
        addrs: Vec<String>,
        ifaces: Vec<String>,
        config: HubConfig,
    ) -> Result<Arc<Self>> {
        if addrs.is_empty() {
            return Err(HubError::NoAddresses);
        }

        let mut sockets = Vec::with_capacity(addrs.len());
        let mut last_err: Option<HubError> = None;
        for addr in &addrs {
            match open_channel_socket(addr, &ifaces, config.recv_buffer_bytes) {
                Ok(std_socket) => match UdpSocket::from_std(std_socket) {
                    Ok(socket) => sockets.push(Arc::new(socket)),
                    Err(e) => last_err = Some(HubError::Bind(e)),
                },
                Err(e) => last_err = Some(e),
            }
        }
        if sockets.is_empty() {
            return Err(last_err.unwrap_or(HubError::NoAddresses));
        }

        let (add_tx, add_rx) = mpsc::channel(config.control_queue_capacity);
        let (remove_tx, remove_rx) = mpsc::channel(config.control_queue_capacity);
        let (state_tx, _) = watch::channel(HubState::Playing);
        let socket_gen = CancellationToken::new();
        let ring = Arc::new(FrameRing::with_capacity(config.ring_capacity));

        let hub = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            addrs,
            config,
            shared: RwLock::new(HubShared {
                sockets: sockets.clone(),
                socket_gen: socket_gen.clone(),
                clients: HashMap::new(),
                ring: Some(ring),
                last_frame: None,
            }),
            state_tx,
            closed: CancellationToken::new(),
            add_tx,
            remove_tx,
            packet_count: AtomicU64::new(0),
            drop_count: AtomicU64::new(0),
            on_empty: Mutex::new(None),
        });

        tokio::spawn(Arc::clone(&hub).run(add_rx, remove_rx));
        hub.start_read_loops(&sockets, &socket_gen);

        Ok(hub)
    }

    /// Addresses this hub listens on
    pub fn addresses(&self) -> &[String] {
        &self.addrs
    }

    /// The hub's configuration
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Datagrams ingested since construction
    pub fn packet_count(&self) -> u64 {
        self.packet_count.load(Ordering::Relaxed)
    }

    /// Frames dropped to back-pressure since construction
    pub fn drop_count(&self) -> u64 {
        self.drop_count.load(Ordering::Relaxed)
    }

    /// Current playback state
    pub fn state(&self) -> HubState {
        *self.state_tx.borrow()
    }

    /// Whether `close` has run
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the hub has been closed
    pub async fn wait_closed(&self) {
        self.closed.cancelled().await
    }

    /// Number of currently attached clients
    pub async fn client_count(&self) -> usize {
        self.shared.read().await.clients.len()
    }

    /// Local addresses of the currently bound sockets
    pub async fn local_addrs(&self) -> Vec<SocketAddr> {
        let shared = self.shared.read().await;
        shared
            .sockets
            .iter()
            .filter_map(|s| s.local_addr().ok())
            .collect()
    }

    /// Counter and table-size snapshot
    pub async fn stats(&self) -> HubStats {
        let shared = self.shared.read().await;
        HubStats {
            packet_count: self.packet_count(),
            drop_count: self.drop_count(),
            client_count: shared.clients.len(),
            ring_frames: shared.ring.as_ref().map(|r| r.len()).unwrap_or(0),
            state: self.state(),
        }
    }

    /// Install the callback invoked after the hub stops because its last
    /// client left. Invoked at most once, outside the hub lock.
    pub fn set_on_empty(&self, callback: impl FnOnce() + Send + 'static) {
        *self.on_empty.lock() = Some(Box::new(callback));
    }

    /// Queue a client for attachment. Fails once the hub is closed.
    pub async fn attach(&self, client: HubClient) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(HubError::HubClosed);
        }
        tokio::select! {
            res = self.add_tx.send(client) => res.map_err(|_| HubError::HubClosed),
            _ = self.closed.cancelled() => Err(HubError::HubClosed),
        }
    }

    /// Queue a client for detachment. A no-op on a closed hub, whose
    /// queues are already closed.
    pub async fn detach(&self, conn_id: impl Into<String>) {
        let conn_id = conn_id.into();
        tokio::select! {
            _ = self.remove_tx.send(conn_id) => {}
            _ = self.closed.cancelled() => {}
        }
    }

    /// Close the hub: stop ingest, close every client queue, drop the ring
    /// and last frame, and transition to Stopped. Idempotent.
    pub async fn close(&self) {
        let mut shared = self.shared.write().await;
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();

        shared.socket_gen.cancel();
        shared.sockets.clear();
        for (_, client) in shared.clients.drain() {
            client.queue.close();
        }
        shared.ring = None;
        shared.last_frame = None;

        self.state_tx.send_replace(HubState::Stopped);
        tracing::info!(addr = %self.addrs[0], "hub closed");
    }

    /// Wait until the hub is Playing.
    ///
    /// Returns true immediately while Playing; while Stopped, blocks until
    /// the next broadcast flips the state back. Returns false on the Error
    /// state, hub close, or cancellation of `cancel`.
    pub async fn wait_for_playing(&self, cancel: &CancellationToken) -> bool {
        let mut state_rx = self.state_tx.subscribe();
        loop {
            if self.closed.is_cancelled() {
                return false;
            }
            match *state_rx.borrow_and_update() {
                HubState::Playing => return true,
                HubState::Error => return false,
                HubState::Stopped => {}
            }
            tokio::select! {
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                _ = cancel.cancelled() => return false,
                _ = self.closed.cancelled() => return false,
            }
        }
    }

    /// Rebind every address, preferring `ifaces`, and swap the sockets in
    /// without disturbing attached clients, the ring or the last frame.
    ///
    /// Fails if no new socket binds, leaving the old sockets untouched, and
    /// refuses to run on a closed hub.
    pub async fn update_interfaces(&self, ifaces: &[String]) -> Result<()> {
        let mut new_sockets = Vec::with_capacity(self.addrs.len());
        let mut last_err: Option<HubError> = None;
        for addr in &self.addrs {
            match open_channel_socket(addr, ifaces, self.config.recv_buffer_bytes) {
                Ok(std_socket) => match UdpSocket::from_std(std_socket) {
                    Ok(socket) => new_sockets.push(Arc::new(socket)),
                    Err(e) => last_err = Some(HubError::Bind(e)),
                },
                Err(e) => last_err = Some(e),
            }
        }
        if new_sockets.is_empty() {
            return Err(last_err.unwrap_or(HubError::NoAddresses));
        }

        let mut shared = self.shared.write().await;
        if self.closed.is_cancelled() {
            return Err(HubError::HubClosed);
        }

        shared.socket_gen.cancel();
        shared.socket_gen = CancellationToken::new();
        shared.sockets = new_sockets.clone();
        let socket_gen = shared.socket_gen.clone();
        drop(shared);

        self.start_read_loops(&new_sockets, &socket_gen);
        tracing::info!(addr = %self.addrs[0], ?ifaces, "hub sockets rebound");
        Ok(())
    }

    /// Move every client and the buffered frames into `target`.
    ///
    /// Each moved client is re-primed with this hub's ring snapshot and
    /// last frame (non-blocking) to minimize the visible interruption.
    /// Queues are not closed; the caller is expected to close this hub
    /// afterwards.
    pub async fn transfer_clients_to(&self, target: &StreamHub) {
        let mut src = self.shared.write().await;
        let mut dst = target.shared.write().await;

        let frames = src.ring.as_ref().map(|r| r.snapshot()).unwrap_or_default();
        if let Some(ring) = dst.ring.as_ref() {
            for frame in &frames {
                ring.push(frame.clone());
            }
        }

        let last_frame = src.last_frame.clone();
        for (conn_id, client) in src.clients.drain() {
            for frame in &frames {
                client.queue.push(frame.clone());
            }
            if let Some(last) = &last_frame {
                client.queue.push(last.clone());
            }
            dst.clients.insert(conn_id, client);
        }

        tracing::info!(clients = dst.clients.len(), "clients transferred");
    }

    fn start_read_loops(&self, sockets: &[Arc<UdpSocket>], socket_gen: &CancellationToken) {
        for socket in sockets {
            if let Some(hub) = self.me.upgrade() {
                tokio::spawn(hub.read_loop(Arc::clone(socket), socket_gen.clone()));
            }
        }
    }

    /// Per-socket ingest loop: read, copy out of the scratch buffer,
    /// extract, broadcast.
    async fn read_loop(self: Arc<Self>, socket: Arc<UdpSocket>, socket_gen: CancellationToken) {
        let mut scratch = vec![0u8; self.config.read_buffer_bytes];
        loop {
            let received = tokio::select! {
                _ = self.closed.cancelled() => return,
                _ = socket_gen.cancelled() => return,
                res = socket.recv_from(&mut scratch) => res,
            };
            let len = match received {
                Ok((len, _peer)) => len,
                // Socket closed or unrecoverable; normal shutdown path.
                Err(_) => return,
            };

            // The scratch buffer is reused for the next datagram; own the
            // bytes before anything downstream can see them.
            let datagram = Bytes::copy_from_slice(&scratch[..len]);

            if self.state() == HubState::Stopped || self.ring_dropped().await {
                return;
            }

            let payload = rtp::extract_payload(datagram);
            self.broadcast(payload).await;
        }
    }

    async fn ring_dropped(&self) -> bool {
        self.shared.read().await.ring.is_none()
    }

    /// Publish one frame: update counters, ring and last frame under the
    /// hub lock, then fan out to the client queues without it.
    async fn broadcast(&self, frame: Bytes) {
        let (clients, last_frame) = {
            let mut shared = self.shared.write().await;
            if self.closed.is_cancelled() {
                return;
            }
            let Some(ring) = shared.ring.clone() else {
                return;
            };

            self.packet_count.fetch_add(1, Ordering::Relaxed);
            shared.last_frame = Some(frame.clone());
            ring.push(frame.clone());

            self.state_tx.send_if_modified(|state| {
                if *state != HubState::Playing {
                    *state = HubState::Playing;
                    true
                } else {
                    false
                }
            });

            let clients: Vec<HubClient> = shared.clients.values().cloned().collect();
            (clients, shared.last_frame.clone())
        };

        for client in &clients {
            if client.queue.push(frame.clone()) {
                continue;
            }
            let drops = self.drop_count.fetch_add(1, Ordering::Relaxed) + 1;
            if drops % 100 == 0 {
                // Resync pulse: make room for the freshest frame so a
                // chronically slow client can catch up.
                client.queue.drop_oldest();
                if let Some(last) = &last_frame {
                    client.queue.push(last.clone());
                }
            }
        }
    }

    /// Control loop: serializes every mutation of the clients table.
    async fn run(
        self: Arc<Self>,
        mut add_rx: mpsc::Receiver<HubClient>,
        mut remove_rx: mpsc::Receiver<String>,
    ) {
        loop {
            tokio::select! {
                Some(client) = add_rx.recv() => {
                    let queue = Arc::clone(&client.queue);
                    let count = {
                        let mut shared = self.shared.write().await;
                        shared.clients.insert(client.conn_id.clone(), client);
                        shared.clients.len()
                    };
                    tracing::debug!(clients = count, "client attached");

                    // Prime the newcomer with the ring snapshot, oldest
                    // first, off the control loop.
                    let hub = Arc::clone(&self);
                    tokio::spawn(async move {
                        let frames = {
                            let shared = hub.shared.read().await;
                            shared.ring.as_ref().map(|r| r.snapshot()).unwrap_or_default()
                        };
                        for frame in frames {
                            if hub.closed.is_cancelled() {
                                return;
                            }
                            if !queue.push(frame) {
                                return;
                            }
                        }
                    });
                }
                Some(conn_id) = remove_rx.recv() => {
                    let now_empty = {
                        let mut shared = self.shared.write().await;
                        if let Some(client) = shared.clients.remove(&conn_id) {
                            client.queue.close();
                            tracing::debug!(
                                clients = shared.clients.len(),
                                conn_id = %conn_id,
                                "client detached"
                            );
                        }
                        shared.clients.is_empty()
                    };
                    if now_empty {
                        self.close().await;
                        let callback = self.on_empty.lock().take();
                        if let Some(callback) = callback {
                            callback();
                        }
                        return;
                    }
                }
                _ = self.closed.cancelled() => {
                    let mut shared = self.shared.write().await;
                    for (_, client) in shared.clients.drain() {
                        client.queue.close();
                    }
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_until<F, Fut>(mut probe: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !probe().await {
            assert!(
                tokio::time::Instant::now() < deadline,
                "condition not reached in time"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_requires_an_address() {
        assert!(matches!(
            StreamHub::new(vec![], vec![]),
            Err(HubError::NoAddresses)
        ));
    }

    #[tokio::test]
    async fn test_rejects_unresolvable_address() {
        let result = StreamHub::new(vec!["definitely not an address".into()], vec![]);
        assert!(matches!(result, Err(HubError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_starts_playing_on_unicast_fallback() {
        let hub = StreamHub::new(vec!["127.0.0.1:0".into()], vec![]).unwrap();

        assert_eq!(hub.state(), HubState::Playing);
        assert!(!hub.is_closed());
        assert_eq!(hub.addresses()[0], "127.0.0.1:0");
        assert_eq!(hub.local_addrs().await.len(), 1);

        hub.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let hub = StreamHub::new(vec!["127.0.0.1:0".into()], vec![]).unwrap();

        hub.close().await;
        hub.close().await;

        assert!(hub.is_closed());
        assert_eq!(hub.state(), HubState::Stopped);
        assert!(hub.local_addrs().await.is_empty());

        let stats = hub.stats().await;
        assert_eq!(stats.client_count, 0);
        assert_eq!(stats.ring_frames, 0);
    }

    #[tokio::test]
    async fn test_attach_after_close_fails() {
        let hub = StreamHub::new(vec!["127.0.0.1:0".into()], vec![]).unwrap();
        hub.close().await;

        let client = HubClient::new("late", 16);
        assert!(matches!(
            hub.attach(client).await,
            Err(HubError::HubClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_ends_attached_client_queue() {
        let hub = StreamHub::new(vec!["127.0.0.1:0".into()], vec![]).unwrap();

        let client = HubClient::new("viewer", 16);
        let queue = Arc::clone(&client.queue);
        hub.attach(client).await.unwrap();
        wait_until(|| async { hub.client_count().await == 1 }).await;

        hub.close().await;

        let ended = tokio::time::timeout(Duration::from_secs(2), queue.recv())
            .await
            .unwrap();
        assert!(ended.is_none());
        assert!(queue.is_closed());
    }

    #[tokio::test]
    async fn test_wait_for_playing_immediate() {
        let hub = StreamHub::new(vec!["127.0.0.1:0".into()], vec![]).unwrap();

        let cancel = CancellationToken::new();
        assert!(hub.wait_for_playing(&cancel).await);

        hub.close().await;
        assert!(!hub.wait_for_playing(&cancel).await);
    }

    #[tokio::test]
    async fn test_wait_for_playing_respects_cancellation() {
        let hub = StreamHub::new(vec!["127.0.0.1:0".into()], vec![]).unwrap();
        // Force the waiting path without closing the hub.
        hub.state_tx.send_replace(HubState::Stopped);

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!hub.wait_for_playing(&cancel).await);

        hub.close().await;
    }

    #[tokio::test]
    async fn test_wait_for_playing_error_state() {
        let hub = StreamHub::new(vec!["127.0.0.1:0".into()], vec![]).unwrap();
        hub.state_tx.send_replace(HubState::Error);

        let cancel = CancellationToken::new();
        assert!(!hub.wait_for_playing(&cancel).await);

        hub.close().await;
    }

    #[tokio::test]
    async fn test_update_interfaces_on_closed_hub() {
        let hub = StreamHub::new(vec!["127.0.0.1:0".into()], vec![]).unwrap();
        hub.close().await;

        assert!(matches!(
            hub.update_interfaces(&[]).await,
            Err(HubError::HubClosed)
        ));
    }

    #[tokio::test]
    async fn test_broadcast_updates_ring_and_counters() {
        let hub = StreamHub::new(vec!["127.0.0.1:0".into()], vec![]).unwrap();

        hub.broadcast(Bytes::from_static(b"one")).await;
        hub.broadcast(Bytes::from_static(b"two")).await;

        let stats = hub.stats().await;
        assert_eq!(stats.packet_count, 2);
        assert_eq!(stats.drop_count, 0);
        assert_eq!(stats.ring_frames, 2);
        assert_eq!(stats.state, HubState::Playing);

        hub.close().await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_frame_without_blocking() {
        let hub = StreamHub::new(vec!["127.0.0.1:0".into()], vec![]).unwrap();
        let client = HubClient::new("slow", 1);
        let queue = Arc::clone(&client.queue);
        hub.attach(client).await.unwrap();
        wait_until(|| async { hub.client_count().await == 1 }).await;

        hub.broadcast(Bytes::from_static(b"kept")).await;
        hub.broadcast(Bytes::from_static(b"dropped")).await;

        assert_eq!(hub.drop_count(), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(&queue.recv().await.unwrap()[..], b"kept");

        hub.close().await;
    }

    #[tokio::test]
    async fn test_resync_pulse_on_hundredth_drop() {
        let config = HubConfig::default().client_queue_capacity(1).ring_capacity(4);
        let hub =
            StreamHub::with_config(vec!["127.0.0.1:0".into()], vec![], config).unwrap();
        let client = HubClient::new("stalled", 1);
        let queue = Arc::clone(&client.queue);
        hub.attach(client).await.unwrap();
        wait_until(|| async { hub.client_count().await == 1 }).await;

        hub.broadcast(Bytes::from_static(b"stale")).await;
        for i in 0..100u32 {
            hub.broadcast(Bytes::from(format!("frame-{}", i))).await;
        }

        assert_eq!(hub.drop_count(), 100);
        // The 100th drop evicted the stale frame and queued the latest one.
        assert_eq!(&queue.recv().await.unwrap()[..], b"frame-99");

        hub.close().await;
    }

    #[tokio::test]
    async fn test_broadcast_flips_stopped_back_to_playing() {
        let hub = StreamHub::new(vec!["127.0.0.1:0".into()], vec![]).unwrap();
        hub.state_tx.send_replace(HubState::Stopped);

        let waiter = {
            let hub = Arc::clone(&hub);
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                hub.wait_for_playing(&cancel).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        hub.broadcast(Bytes::from_static(b"resume")).await;

        let resumed = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(resumed);
        assert_eq!(hub.state(), HubState::Playing);

        hub.close().await;
    }

    #[tokio::test]
    async fn test_transfer_clients_moves_everything() {
        let source = StreamHub::new(vec!["127.0.0.1:0".into()], vec![]).unwrap();
        let target = StreamHub::new(vec!["127.0.0.1:0".into()], vec![]).unwrap();

        let client = HubClient::new("mover", 64);
        let queue = Arc::clone(&client.queue);
        source.attach(client).await.unwrap();
        wait_until(|| async { source.client_count().await == 1 }).await;

        source.broadcast(Bytes::from_static(b"a")).await;
        source.broadcast(Bytes::from_static(b"b")).await;

        source.transfer_clients_to(&target).await;

        assert_eq!(source.client_count().await, 0);
        assert_eq!(target.client_count().await, 1);
        assert!(!queue.is_closed());
        assert_eq!(target.stats().await.ring_frames, 2);

        // Live frames from the new hub reach the moved client.
        target.broadcast(Bytes::from_static(b"c")).await;
        let mut seen_live = false;
        for _ in 0..8 {
            match tokio::time::timeout(Duration::from_secs(2), queue.recv()).await {
                Ok(Some(frame)) if &frame[..] == b"c" => {
                    seen_live = true;
                    break;
                }
                Ok(Some(_)) => continue,
                _ => break,
            }
        }
        assert!(seen_live);

        source.close().await;
        target.close().await;
    }

    #[tokio::test]
    async fn test_update_interfaces_rebinds() {
        let hub = StreamHub::new(vec!["127.0.0.1:0".into()], vec![]).unwrap();
        let before = hub.local_addrs().await;

        hub.update_interfaces(&[]).await.unwrap();

        let after = hub.local_addrs().await;
        assert_eq!(after.len(), 1);
        // Port 0 re-resolves to a fresh ephemeral port.
        assert_ne!(before, after);

        hub.close().await;
    }
}
