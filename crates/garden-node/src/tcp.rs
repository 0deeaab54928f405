//! TCP transport: newline-delimited JSON frames.
//!
//! Each connection opens with a `hello` frame carrying the node id (and the
//! port the node listens on, if any), after which either side may send
//! `data` frames:
//!
//! ```text
//! {"type":"hello","id":"3f9a0c...","port":9400}
//! {"type":"data","lines":["{\"kind\":\"msg\",...}"]}
//! ```
//!
//! Every connection gets a reader task (frames in → coordinator events) and
//! a writer task (queued frames out). [`Transport`] calls only queue, so the
//! coordinator never waits on a socket.
//!
//! When two nodes dial each other at the same time, both sides keep the
//! connection dialed by the smaller id and close the other one.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use garden_protocols::{Origin, PeerId, Transport, TransportEvent};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};

/// Wire frame.
///
/// Decoded through [`WireFrame`]: serde buffers internally tagged enums, and
/// buffered numbers do not survive serde_json's `arbitrary_precision`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", try_from = "WireFrame")]
pub enum Frame {
    Hello {
        id: String,
        /// Port the sender accepts peers on.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },
    Data {
        lines: Vec<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum FrameType {
    Hello,
    Data,
}

/// Flat form of every frame, read field by field.
#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(rename = "type")]
    kind: FrameType,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    lines: Option<Vec<String>>,
}

impl TryFrom<WireFrame> for Frame {
    type Error = String;

    fn try_from(wire: WireFrame) -> std::result::Result<Self, Self::Error> {
        match wire.kind {
            FrameType::Hello => {
                let id = wire.id.ok_or("hello frame without id")?;
                Ok(Frame::Hello {
                    id,
                    port: wire.port,
                })
            }
            FrameType::Data => {
                let lines = wire.lines.ok_or("data frame without lines")?;
                Ok(Frame::Data { lines })
            }
        }
    }
}

/// One live connection to a peer.
#[derive(Debug)]
struct Link {
    tx: mpsc::UnboundedSender<Frame>,
    /// Which side opened the connection.
    dialer: PeerId,
    conn: u64,
}

/// Result of registering a handshaken connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// First connection to this peer.
    Joined,
    /// Took over from an existing connection to the same peer.
    Replaced,
    /// An existing connection to the same peer wins.
    Rejected,
}

#[derive(Debug, Default)]
struct DirectoryState {
    links: HashMap<PeerId, Link>,
    /// Dialable address per peer id, learned from connections.
    addresses: HashMap<PeerId, String>,
}

/// Connected peers, the queues feeding their writer tasks, and where to
/// reach peers we have seen.
#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    state: Arc<Mutex<DirectoryState>>,
    next_conn: Arc<AtomicU64>,
}

impl PeerDirectory {
    fn lock(&self) -> garden_protocols::Result<MutexGuard<'_, DirectoryState>> {
        self.state
            .lock()
            .map_err(|_| garden_protocols::Error::Transport("peer directory poisoned".into()))
    }

    /// Connected peer ids, sorted.
    pub fn ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self
            .lock()
            .map(|state| state.links.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn is_connected(&self, peer: &str) -> bool {
        self.lock()
            .map(|state| state.links.contains_key(peer))
            .unwrap_or(false)
    }

    /// Last known address of a peer.
    pub fn address_of(&self, peer: &str) -> Option<String> {
        self.lock()
            .ok()
            .and_then(|state| state.addresses.get(peer).cloned())
    }

    fn remember(&self, peer: &str, addr: String) {
        if let Ok(mut state) = self.lock() {
            state.addresses.insert(peer.to_string(), addr);
        }
    }

    fn next_conn(&self) -> u64 {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a connection to `peer`. Of two connections between the same
    /// pair of nodes, the one dialed by the smaller id is kept.
    fn admit(&self, local: &str, peer: &str, link: Link) -> Admission {
        let Ok(mut state) = self.lock() else {
            return Admission::Rejected;
        };
        let keeper = std::cmp::min(local, peer);
        let admission = match state.links.get(peer) {
            None => Admission::Joined,
            Some(existing) if link.dialer == keeper && existing.dialer != keeper => {
                Admission::Replaced
            }
            Some(_) => Admission::Rejected,
        };
        if admission != Admission::Rejected {
            // dropping a replaced sender ends its writer task
            state.links.insert(peer.to_string(), link);
        }
        admission
    }

    /// Remove `peer` if connection `conn` is still the one registered.
    fn remove(&self, peer: &str, conn: u64) -> bool {
        match self.lock() {
            Ok(mut state) if state.links.get(peer).is_some_and(|l| l.conn == conn) => {
                state.links.remove(peer);
                true
            }
            _ => false,
        }
    }
}

/// Whether `s` reads as `host:port`.
fn is_address(s: &str) -> bool {
    s.rsplit_once(':')
        .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
}

/// State shared by the transport handle and its connection tasks.
#[derive(Debug)]
struct Shared {
    id: PeerId,
    port: Option<u16>,
    directory: PeerDirectory,
    events: mpsc::UnboundedSender<TransportEvent>,
}

/// Gossip transport over TCP.
///
/// [`Transport::connect`] and [`Transport::offer_to`] spawn tasks and must be
/// called from inside a tokio runtime.
#[derive(Debug)]
pub struct TcpTransport {
    shared: Arc<Shared>,
    listen_addr: SocketAddr,
    bootstrap_peers: Vec<String>,
}

impl TcpTransport {
    /// Create a transport and the receiver its events arrive on.
    pub fn new(
        id: impl Into<PeerId>,
        listen_addr: SocketAddr,
        bootstrap_peers: Vec<String>,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            shared: Arc::new(Shared {
                id: id.into(),
                port: Some(listen_addr.port()).filter(|p| *p != 0),
                directory: PeerDirectory::default(),
                events,
            }),
            listen_addr,
            bootstrap_peers,
        };
        (transport, rx)
    }

    /// Handle on the peer set, for renderers.
    pub fn directory(&self) -> PeerDirectory {
        self.shared.directory.clone()
    }

    fn dial(&self, addr: String) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            info!("Connecting to peer {}", addr);
            match TcpStream::connect(&addr).await {
                Ok(stream) => {
                    if let Err(e) = handle_connection(shared, stream, Some(addr.clone())).await {
                        warn!("Peer {} error: {}", addr, e);
                    }
                }
                Err(e) => warn!("Failed to connect to {}: {}", addr, e),
            }
        });
    }
}

impl Transport for TcpTransport {
    fn local_id(&self) -> &str {
        &self.shared.id
    }

    fn peers(&self) -> Vec<PeerId> {
        self.shared.directory.ids()
    }

    fn connect(&mut self) -> garden_protocols::Result<()> {
        let shared = Arc::clone(&self.shared);
        let addr = self.listen_addr;
        tokio::spawn(async move {
            if let Err(e) = listen(shared, addr).await {
                error!("Listener on {} failed: {}", addr, e);
            }
        });

        for peer in self.bootstrap_peers.clone() {
            self.dial(peer);
        }
        Ok(())
    }

    fn broadcast(&mut self, lines: &[String], origin: &Origin) -> garden_protocols::Result<()> {
        let state = self.shared.directory.lock()?;
        for (peer, link) in state.links.iter() {
            if origin.excludes(peer) {
                continue;
            }
            let frame = Frame::Data {
                lines: lines.to_vec(),
            };
            if link.tx.send(frame).is_err() {
                trace!(peer = %peer, "Writer closed, dropping frame");
            }
        }
        Ok(())
    }

    fn send_to(&mut self, peer: &str, lines: &[String]) -> garden_protocols::Result<()> {
        let state = self.shared.directory.lock()?;
        let link = state
            .links
            .get(peer)
            .ok_or_else(|| garden_protocols::Error::UnknownPeer(peer.to_string()))?;
        link.tx
            .send(Frame::Data {
                lines: lines.to_vec(),
            })
            .map_err(|_| garden_protocols::Error::Transport(format!("connection to {peer} closed")))
    }

    /// `peer` is the id of a peer seen before, or a `host:port` to dial.
    fn offer_to(&mut self, peer: &str) -> garden_protocols::Result<()> {
        let directory = &self.shared.directory;
        if directory.is_connected(peer) {
            debug!(peer, "Already connected");
            return Ok(());
        }
        let addr = match directory.address_of(peer) {
            Some(addr) => addr,
            None if is_address(peer) => peer.to_string(),
            None => return Err(garden_protocols::Error::UnknownPeer(peer.to_string())),
        };
        self.dial(addr);
        Ok(())
    }
}

async fn listen(shared: Arc<Shared>, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening for peers on {}", addr);

    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                debug!("Incoming connection from {}", remote);
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(shared, stream, None).await {
                        warn!("Connection error from {}: {}", remote, e);
                    }
                });
            }
            Err(e) => {
                error!("Accept error: {}", e);
            }
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    let mut bytes = serde_json::to_vec(frame)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    Ok(())
}

/// Run one connection. `dialed` is the address we dialed, `None` for
/// accepted connections.
async fn handle_connection(
    shared: Arc<Shared>,
    stream: TcpStream,
    dialed: Option<String>,
) -> Result<()> {
    let remote = stream.peer_addr()?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    write_frame(
        &mut writer,
        &Frame::Hello {
            id: shared.id.clone(),
            port: shared.port,
        },
    )
    .await?;

    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(());
    }
    let (peer, port) = match serde_json::from_str::<Frame>(&line)? {
        Frame::Hello { id, port } if !id.is_empty() => (id, port),
        other => {
            return Err(Error::Handshake(format!("expected hello, got {other:?}")));
        }
    };
    if peer == shared.id {
        debug!("Dropping connection to self");
        return Ok(());
    }

    let directory = &shared.directory;
    let address = dialed
        .clone()
        .or_else(|| port.map(|p| SocketAddr::new(remote.ip(), p).to_string()));
    if let Some(address) = address {
        directory.remember(&peer, address);
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    let conn = directory.next_conn();
    let dialer = if dialed.is_some() {
        shared.id.clone()
    } else {
        peer.clone()
    };
    match directory.admit(&shared.id, &peer, Link { tx, dialer, conn }) {
        Admission::Joined => {
            let _ = shared.events.send(TransportEvent::PeerJoined(peer.clone()));
        }
        Admission::Replaced => {
            debug!(peer = %peer, "Simultaneous dial, keeping this connection");
        }
        Admission::Rejected => {
            debug!(peer = %peer, "Already connected, dropping duplicate connection");
            return Ok(());
        }
    }

    let writer_peer = peer.clone();
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                warn!(peer = %writer_peer, "Write failed: {}", e);
                break;
            }
        }
    });

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => match serde_json::from_str::<Frame>(line.trim_end()) {
                Ok(Frame::Data { lines }) => {
                    trace!(peer = %peer, count = lines.len(), "Received data frame");
                    let event = TransportEvent::Data {
                        from: peer.clone(),
                        lines,
                    };
                    if shared.events.send(event).is_err() {
                        break;
                    }
                }
                Ok(Frame::Hello { .. }) => trace!(peer = %peer, "Ignoring repeated hello"),
                Err(e) => warn!(peer = %peer, "Bad frame: {}", e),
            },
            Err(e) => {
                warn!(peer = %peer, "Read error: {}", e);
                break;
            }
        }
    }

    // a replaced connection ends without the peer leaving
    if directory.remove(&peer, conn) {
        writer_task.abort();
        let _ = shared.events.send(TransportEvent::PeerLeft(peer.clone()));
        info!(peer = %peer, "Peer disconnected");
    }
    Ok(())
}
