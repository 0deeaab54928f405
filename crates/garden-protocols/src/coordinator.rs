//! Dispatch Coordinator - the single entry point for every log mutation.
//!
//! Two triggers reach the log, and both go through this type:
//!
//! - **Local actions** are encoded, appended, and broadcast to every peer.
//! - **Inbound batches** are decoded line by line, appended, and the lines
//!   that were new to us are relayed onward to every peer except the sender.
//!
//! Relaying only what was new is what stops the flood: a message that comes
//! back around is a duplicate and goes no further. After any change the log
//! is persisted and the view is rebuilt from scratch and published on a
//! `watch` channel for the renderer.
//!
//! # Ordering
//!
//! [`Coordinator::run`] handles one input or transport event at a time, so
//! appends are strictly sequenced without locks. The final view does not
//! depend on that sequence, only on which messages arrived.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use garden_log::{DecodeError, Message, MessageId, ReplicatedLog};
use garden_view::{project, View};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use crate::error::Result;
use crate::store::Store;
use crate::transport::{Origin, PeerId, Transport, TransportEvent};

/// Something the local user did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Post { channel: String, text: String },
    Reply {
        channel: String,
        parent: MessageId,
        text: String,
    },
    Nick(String),
    Join(String),
    Part(String),
}

impl Action {
    /// Turn the action into a message authored by `author` at `time`.
    pub fn into_message(self, author: &str, time: u64) -> garden_log::Result<Message> {
        match self {
            Self::Post { channel, text } => Message::post(&channel, author, time, &text),
            Self::Reply {
                channel,
                parent,
                text,
            } => Message::reply(&channel, author, time, parent, &text),
            Self::Nick(nick) => Message::nick(author, time, &nick),
            Self::Join(channel) => Message::join(&channel, author, time),
            Self::Part(channel) => Message::part(&channel, author, time),
        }
    }
}

/// Local input to [`Coordinator::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Author a message.
    Author(Action),
    /// Ask the transport to connect to a peer.
    Offer(PeerId),
    /// Persist and stop.
    Quit,
}

/// Configuration for a coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Forward newly received messages to the other peers.
    pub relay: bool,

    /// Send our whole log to a peer when it connects.
    pub sync_on_join: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            relay: true,
            sync_on_join: true,
        }
    }
}

impl CoordinatorConfig {
    /// Disable relaying (star topologies, tests).
    #[must_use]
    pub fn without_relay(mut self) -> Self {
        self.relay = false;
        self
    }

    /// Disable full-log sync on peer join.
    #[must_use]
    pub fn without_sync_on_join(mut self) -> Self {
        self.sync_on_join = false;
        self
    }
}

/// Result of a local action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatched {
    pub id: MessageId,
    /// `false` if the log already held this exact message.
    pub appended: bool,
}

/// Result of an inbound batch.
#[derive(Debug, Default)]
pub struct InboundReport {
    /// Lines that added a new message.
    pub accepted: usize,
    /// Lines already in the log.
    pub duplicates: usize,
    /// Lines that failed to decode.
    pub rejected: Vec<DecodeError>,
}

impl InboundReport {
    /// Whether the batch changed the log.
    pub fn changed(&self) -> bool {
        self.accepted > 0
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Owns the log, the current view, the transport and the store.
pub struct Coordinator<T, S> {
    transport: T,
    store: S,
    config: CoordinatorConfig,
    log: ReplicatedLog,
    view: Arc<View>,
    view_tx: watch::Sender<Arc<View>>,
}

impl<T: Transport, S: Store> Coordinator<T, S> {
    /// Create a coordinator, hydrating the log from the store.
    pub fn new(transport: T, store: S, config: CoordinatorConfig) -> Result<Self> {
        let blob = store.load()?;
        let mut log = ReplicatedLog::new();
        let report = log.hydrate(&blob);
        if !report.is_clean() {
            warn!(
                skipped = report.errors.len(),
                loaded = report.loaded,
                "Some persisted entries could not be loaded"
            );
        }

        let view = Arc::new(project(&log));
        let (view_tx, _) = watch::channel(Arc::clone(&view));

        info!(
            id = transport.local_id(),
            messages = log.len(),
            relay = config.relay,
            "Coordinator ready"
        );

        Ok(Self {
            transport,
            store,
            config,
            log,
            view,
            view_tx,
        })
    }

    /// Start the transport.
    pub fn start(&mut self) -> Result<()> {
        self.transport.connect()
    }

    /// Author a message stamped with the current time.
    pub fn author(&mut self, action: Action) -> Result<Dispatched> {
        self.author_at(action, now_ms())
    }

    /// Author a message with an explicit timestamp.
    pub fn author_at(&mut self, action: Action, time: u64) -> Result<Dispatched> {
        let message = action.into_message(self.transport.local_id(), time)?;
        let id = message.id();
        let line = message.encoded().to_string();

        if !self.log.append(message) {
            debug!(id = %id.short(), "Local message already in log, not broadcasting");
            return Ok(Dispatched {
                id,
                appended: false,
            });
        }

        if let Err(e) = self.transport.broadcast(&[line], &Origin::Local) {
            warn!(id = %id.short(), "Broadcast failed: {}", e);
        }
        self.persist();
        self.refresh();

        Ok(Dispatched { id, appended: true })
    }

    /// Apply a batch of encoded messages received from `from`.
    pub fn receive(&mut self, from: &str, lines: &[String]) -> InboundReport {
        let mut report = InboundReport::default();
        let mut fresh = Vec::new();

        for line in lines {
            match garden_log::decode(line) {
                Ok(message) => {
                    let encoded = message.encoded().to_string();
                    if self.log.append(message) {
                        report.accepted += 1;
                        fresh.push(encoded);
                    } else {
                        report.duplicates += 1;
                    }
                }
                Err(e) => {
                    warn!(peer = from, "Skipping undecodable message: {}", e);
                    report.rejected.push(e);
                }
            }
        }

        trace!(
            peer = from,
            accepted = report.accepted,
            duplicates = report.duplicates,
            rejected = report.rejected.len(),
            "Received batch"
        );

        if report.changed() {
            if self.config.relay {
                let origin = Origin::Peer(from.to_string());
                if let Err(e) = self.transport.broadcast(&fresh, &origin) {
                    warn!(peer = from, "Relay failed: {}", e);
                }
            }
            self.persist();
            self.refresh();
        }

        report
    }

    /// Apply one transport event.
    pub fn handle(&mut self, event: TransportEvent) -> InboundReport {
        match event {
            TransportEvent::Data { from, lines } => self.receive(&from, &lines),
            TransportEvent::PeerJoined(peer) => {
                info!(peer = %peer, "Peer connected");
                if self.config.sync_on_join && !self.log.is_empty() {
                    if let Err(e) = self.transport.send_to(&peer, &self.log.lines()) {
                        warn!(peer = %peer, "Initial sync failed: {}", e);
                    }
                }
                self.notify();
                InboundReport::default()
            }
            TransportEvent::PeerLeft(peer) => {
                info!(peer = %peer, "Peer disconnected");
                self.notify();
                InboundReport::default()
            }
        }
    }

    /// Ask the transport to connect to a peer.
    pub fn offer_to(&mut self, peer: &str) -> Result<()> {
        debug!(peer, "Offering connection");
        self.transport.offer_to(peer)
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.transport.peers()
    }

    pub fn local_id(&self) -> &str {
        self.transport.local_id()
    }

    /// The current view.
    pub fn view(&self) -> Arc<View> {
        Arc::clone(&self.view)
    }

    /// Re-render signal: yields the new view after every change.
    pub fn subscribe(&self) -> watch::Receiver<Arc<View>> {
        self.view_tx.subscribe()
    }

    pub fn log(&self) -> &ReplicatedLog {
        &self.log
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Persist the log. Call before dropping the coordinator.
    pub fn shutdown(&mut self) -> Result<()> {
        info!(messages = self.log.len(), "Saving log on shutdown");
        self.store.save(&self.log.to_blob())
    }

    /// Serve local inputs and transport events until the input side closes
    /// or asks to quit, then persist.
    pub async fn run(
        mut self,
        mut inputs: mpsc::Receiver<Input>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Result<()> {
        let mut events_open = true;

        loop {
            tokio::select! {
                input = inputs.recv() => match input {
                    Some(Input::Author(action)) => {
                        if let Err(e) = self.author(action) {
                            warn!("Could not author message: {}", e);
                        }
                    }
                    Some(Input::Offer(peer)) => {
                        if let Err(e) = self.offer_to(&peer) {
                            warn!(peer = %peer, "Offer failed: {}", e);
                        }
                    }
                    Some(Input::Quit) | None => break,
                },
                event = events.recv(), if events_open => match event {
                    Some(event) => {
                        self.handle(event);
                    }
                    None => {
                        warn!("Transport event channel closed");
                        events_open = false;
                    }
                },
            }
        }

        self.shutdown()
    }

    fn persist(&mut self) {
        if let Err(e) = self.store.save(&self.log.to_blob()) {
            error!("Failed to persist log: {}", e);
        }
    }

    fn refresh(&mut self) {
        self.view = Arc::new(project(&self.log));
        self.notify();
    }

    fn notify(&self) {
        self.view_tx.send_replace(Arc::clone(&self.view));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::MemoryStore;

    /// Transport that records what it was asked to send.
    #[derive(Debug, Default)]
    struct Recording {
        peers: Vec<PeerId>,
        broadcasts: Vec<(Vec<String>, Origin)>,
        sent: Vec<(PeerId, Vec<String>)>,
        offers: Vec<PeerId>,
        connected: bool,
    }

    impl Recording {
        fn with_peers(peers: &[&str]) -> Self {
            Self {
                peers: peers.iter().map(|p| p.to_string()).collect(),
                ..Default::default()
            }
        }

        /// Which peers each broadcast would reach.
        fn recipients(&self) -> Vec<Vec<PeerId>> {
            self.broadcasts
                .iter()
                .map(|(_, origin)| {
                    self.peers
                        .iter()
                        .filter(|p| !origin.excludes(p))
                        .cloned()
                        .collect()
                })
                .collect()
        }
    }

    impl Transport for Recording {
        fn local_id(&self) -> &str {
            "me"
        }

        fn peers(&self) -> Vec<PeerId> {
            self.peers.clone()
        }

        fn connect(&mut self) -> Result<()> {
            self.connected = true;
            Ok(())
        }

        fn broadcast(&mut self, lines: &[String], origin: &Origin) -> Result<()> {
            self.broadcasts.push((lines.to_vec(), origin.clone()));
            Ok(())
        }

        fn send_to(&mut self, peer: &str, lines: &[String]) -> Result<()> {
            self.sent.push((peer.to_string(), lines.to_vec()));
            Ok(())
        }

        fn offer_to(&mut self, peer: &str) -> Result<()> {
            self.offers.push(peer.to_string());
            Ok(())
        }
    }

    /// Transport whose sends always fail.
    struct Broken;

    impl Transport for Broken {
        fn local_id(&self) -> &str {
            "me"
        }
        fn peers(&self) -> Vec<PeerId> {
            Vec::new()
        }
        fn connect(&mut self) -> Result<()> {
            Err(Error::Transport("down".into()))
        }
        fn broadcast(&mut self, _: &[String], _: &Origin) -> Result<()> {
            Err(Error::Transport("down".into()))
        }
        fn send_to(&mut self, peer: &str, _: &[String]) -> Result<()> {
            Err(Error::UnknownPeer(peer.into()))
        }
        fn offer_to(&mut self, peer: &str) -> Result<()> {
            Err(Error::UnknownPeer(peer.into()))
        }
    }

    fn coordinator(peers: &[&str]) -> Coordinator<Recording, MemoryStore> {
        Coordinator::new(
            Recording::with_peers(peers),
            MemoryStore::new(),
            CoordinatorConfig::default(),
        )
        .unwrap()
    }

    fn post(channel: &str, text: &str) -> Action {
        Action::Post {
            channel: channel.into(),
            text: text.into(),
        }
    }

    fn line(author: &str, time: u64, text: &str) -> String {
        Message::post("#garden", author, time, text)
            .unwrap()
            .into_encoded()
    }

    #[test]
    fn local_action_broadcasts_persists_and_projects() {
        let mut c = coordinator(&["p1", "p2"]);
        let mut rx = c.subscribe();

        let sent = c.author_at(post("#garden", "hi"), 1000).unwrap();

        assert!(sent.appended);
        assert_eq!(c.transport().broadcasts.len(), 1);
        assert_eq!(c.transport().broadcasts[0].1, Origin::Local);
        assert_eq!(c.transport().recipients(), vec![vec!["p1".to_string(), "p2".to_string()]]);
        assert_eq!(c.store().contents(), c.log().to_blob());
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().channels["#garden"].wall[0].author, "me");
    }

    #[test]
    fn repeated_local_message_is_not_rebroadcast() {
        let mut c = coordinator(&["p1"]);
        let first = c.author_at(post("#garden", "hi"), 1000).unwrap();
        let second = c.author_at(post("#garden", "hi"), 1000).unwrap();

        assert!(first.appended);
        assert!(!second.appended);
        assert_eq!(first.id, second.id);
        assert_eq!(c.transport().broadcasts.len(), 1);
        assert_eq!(c.log().len(), 1);
    }

    #[test]
    fn invalid_action_is_an_error() {
        let mut c = coordinator(&[]);
        assert!(matches!(
            c.author_at(post("", "hi"), 1),
            Err(Error::Decode(_))
        ));
        assert!(c.log().is_empty());
    }

    #[test]
    fn inbound_batch_relays_to_everyone_but_sender() {
        let mut c = coordinator(&["alice", "bob", "carol"]);
        let lines = vec![line("alice", 1, "a"), line("alice", 2, "b")];

        let report = c.receive("alice", &lines);

        assert_eq!(report.accepted, 2);
        assert_eq!(c.transport().broadcasts.len(), 1);
        assert_eq!(c.transport().broadcasts[0].1, Origin::Peer("alice".into()));
        assert_eq!(
            c.transport().recipients(),
            vec![vec!["bob".to_string(), "carol".to_string()]]
        );
        assert_eq!(c.view().channels["#garden"].wall.len(), 2);
    }

    #[test]
    fn duplicate_batch_is_not_relayed() {
        let mut c = coordinator(&["alice", "bob"]);
        let lines = vec![line("alice", 1, "a")];

        c.receive("alice", &lines);
        let again = c.receive("bob", &lines);

        assert!(!again.changed());
        assert_eq!(again.duplicates, 1);
        assert_eq!(c.transport().broadcasts.len(), 1);
    }

    #[test]
    fn relay_only_forwards_new_lines() {
        let mut c = coordinator(&["alice", "bob"]);
        let old = line("alice", 1, "old");
        c.receive("alice", &[old.clone()]);

        c.receive("bob", &[old, line("bob", 2, "new")]);

        let (relayed, origin) = &c.transport().broadcasts[1];
        assert_eq!(relayed, &vec![line("bob", 2, "new")]);
        assert_eq!(origin, &Origin::Peer("bob".into()));
    }

    #[test]
    fn relay_can_be_disabled() {
        let mut c = Coordinator::new(
            Recording::with_peers(&["alice", "bob"]),
            MemoryStore::new(),
            CoordinatorConfig::default().without_relay(),
        )
        .unwrap();

        let report = c.receive("alice", &[line("alice", 1, "a")]);
        assert!(report.changed());
        assert!(c.transport().broadcasts.is_empty());
        assert_eq!(c.view().channels["#garden"].wall.len(), 1);
    }

    #[test]
    fn bad_lines_are_skipped_individually() {
        let mut c = coordinator(&["alice"]);
        let lines = vec![line("alice", 1, "a"), "garbage".to_string(), line("alice", 2, "b")];

        let report = c.receive("alice", &lines);

        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(c.log().len(), 2);
    }

    #[test]
    fn inbound_changes_notify_renderer_only_when_log_changes() {
        let mut c = coordinator(&["alice"]);
        let mut rx = c.subscribe();
        rx.mark_unchanged();

        c.receive("alice", &["garbage".to_string()]);
        assert!(!rx.has_changed().unwrap());

        c.receive("alice", &[line("alice", 1, "a")]);
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn hydrates_from_store_and_tolerates_corruption() {
        let blob = format!("{}\nnot json\n{}\n", line("u1", 1, "a"), line("u1", 2, "b"));
        let c = Coordinator::new(
            Recording::default(),
            MemoryStore::with_blob(blob),
            CoordinatorConfig::default(),
        )
        .unwrap();

        assert_eq!(c.log().len(), 2);
        assert_eq!(c.view().channels["#garden"].wall.len(), 2);
    }

    #[test]
    fn peer_join_sends_full_log() {
        let mut c = coordinator(&["alice"]);
        c.author_at(post("#garden", "one"), 1).unwrap();
        c.author_at(Action::Nick("me-nick".into()), 2).unwrap();

        c.handle(TransportEvent::PeerJoined("alice".into()));

        assert_eq!(c.transport().sent.len(), 1);
        assert_eq!(c.transport().sent[0].0, "alice");
        assert_eq!(c.transport().sent[0].1, c.log().lines());
    }

    #[test]
    fn peer_join_with_empty_log_sends_nothing() {
        let mut c = coordinator(&["alice"]);
        let mut rx = c.subscribe();
        rx.mark_unchanged();

        c.handle(TransportEvent::PeerJoined("alice".into()));

        assert!(c.transport().sent.is_empty());
        // membership changes still re-render
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn transport_failures_do_not_lose_local_messages() {
        let mut c = Coordinator::new(Broken, MemoryStore::new(), CoordinatorConfig::default()).unwrap();

        assert!(c.start().is_err());
        let sent = c.author_at(post("#garden", "still here"), 1).unwrap();
        assert!(sent.appended);
        assert_eq!(c.log().len(), 1);
        assert!(c.offer_to("x").is_err());
    }

    #[test]
    fn actions_map_to_messages() {
        let parent = MessageId::of("p");
        let reply = Action::Reply {
            channel: "#g".into(),
            parent,
            text: "re".into(),
        }
        .into_message("me", 5)
        .unwrap();
        assert_eq!(reply.parent(), Some(parent));

        let join = Action::Join("#g".into()).into_message("me", 5).unwrap();
        assert_eq!(join.kind(), garden_log::Kind::Join);
        let part = Action::Part("#g".into()).into_message("me", 6).unwrap();
        assert_eq!(part.kind(), garden_log::Kind::Part);
    }

    #[tokio::test]
    async fn run_serves_inputs_and_events_then_persists() {
        let store = MemoryStore::new();
        let c = Coordinator::new(
            Recording::with_peers(&["alice"]),
            store.clone(),
            CoordinatorConfig::default(),
        )
        .unwrap();
        let mut view_rx = c.subscribe();

        let (input_tx, input_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(c.run(input_rx, event_rx));

        event_tx
            .send(TransportEvent::Data {
                from: "alice".into(),
                lines: vec![line("alice", 1, "hello")],
            })
            .unwrap();
        view_rx.changed().await.unwrap();

        input_tx.send(Input::Author(post("#garden", "hi back"))).await.unwrap();
        input_tx.send(Input::Offer("bob".into())).await.unwrap();
        input_tx.send(Input::Quit).await.unwrap();
        task.await.unwrap().unwrap();

        let mut restored = ReplicatedLog::new();
        restored.hydrate(&store.contents());
        assert_eq!(restored.len(), 2);
    }

    #[tokio::test]
    async fn run_survives_closed_event_channel() {
        let c = coordinator(&[]);
        let (input_tx, input_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TransportEvent>();
        drop(event_tx);

        let task = tokio::spawn(c.run(input_rx, event_rx));
        input_tx.send(Input::Author(post("#garden", "x"))).await.unwrap();
        drop(input_tx);

        tokio_test::assert_ok!(task.await.unwrap());
    }
}
