//! Scripted stand-ins for the local peer and the media server.

use crate::media::{
    BoxError, CandidateStream, IceCandidate, LocalPeer, MediaClient, MediaPipeline, MediaServer,
    PeerFactory, SessionDescription, SourceEndpoint, VideoSink, WebRtcEndpoint,
};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

pub fn candidate(typ: &str, n: u32) -> IceCandidate {
    IceCandidate::new(
        format!("candidate:{} 1 udp 2122260223 10.0.0.{} {} typ {}", n, n, 50000 + n, typ),
        Some("0"),
        Some(0),
    )
}

/// Which calls fail
#[derive(Debug, Default, Clone)]
pub struct Failures {
    pub peer_create: bool,
    pub offer: Option<String>,
    pub answer: bool,
    pub connect: bool,
    pub create_pipeline: bool,
    pub create_source: bool,
    pub create_endpoint: bool,
    pub process_offer: bool,
    pub gather: bool,
    pub connect_to: bool,
    pub play: bool,
    pub release: bool,
}

/// Shared script and call journal for one test
#[derive(Default)]
pub struct World {
    pub fail: Mutex<Failures>,
    journal: Mutex<Vec<String>>,
    /// When set, `play()` parks until the gate is notified
    play_gate: Mutex<Option<Arc<Notify>>>,
    /// When set, `create_pipeline()` parks until the gate is notified
    pipeline_gate: Mutex<Option<Arc<Notify>>>,
    pub play_entered: Notify,
    pub pipeline_entered: Notify,
    peers: Mutex<Vec<Arc<FakePeer>>>,
    endpoints: Mutex<Vec<Arc<FakeEndpoint>>>,
}

impl World {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, call: impl Into<String>) {
        self.journal.lock().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.journal.lock().iter().filter(|c| c.as_str() == call).count()
    }

    pub fn called(&self, call: &str) -> bool {
        self.count(call) > 0
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.journal.lock().iter().position(|c| c.as_str() == call)
    }

    pub fn gate_play(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.play_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn gate_pipeline(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.pipeline_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn last_peer(&self) -> Option<Arc<FakePeer>> {
        self.peers.lock().last().cloned()
    }

    pub fn last_endpoint(&self) -> Option<Arc<FakeEndpoint>> {
        self.endpoints.lock().last().cloned()
    }

    pub fn peer_factory(self: &Arc<Self>) -> Arc<FakePeerFactory> {
        Arc::new(FakePeerFactory { world: self.clone() })
    }

    pub fn server(self: &Arc<Self>) -> Arc<FakeServer> {
        Arc::new(FakeServer { world: self.clone() })
    }
}

fn boxed(msg: &str) -> BoxError {
    msg.to_string().into()
}

/// Fan-out helper standing in for an event emitter
#[derive(Default)]
struct Emitter {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<IceCandidate>>>,
}

impl Emitter {
    fn subscribe(&self) -> CandidateStream {
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.lock().push(tx);
        rx.boxed()
    }

    fn emit(&self, candidate: IceCandidate) {
        for tx in self.subscribers.lock().iter() {
            let _ = tx.unbounded_send(candidate.clone());
        }
    }

    fn live(&self) -> usize {
        self.subscribers.lock().iter().filter(|tx| !tx.is_closed()).count()
    }
}

pub struct FakePeerFactory {
    world: Arc<World>,
}

#[async_trait]
impl PeerFactory for FakePeerFactory {
    async fn create(&self, sink: &VideoSink) -> Result<Arc<dyn LocalPeer>, BoxError> {
        self.world.record(format!("create_peer:{}", sink));
        if self.world.fail.lock().peer_create {
            return Err(boxed("no media devices"));
        }
        let peer = FakePeer::with_world(self.world.clone());
        self.world.peers.lock().push(peer.clone());
        Ok(peer)
    }
}

pub struct FakePeer {
    world: Arc<World>,
    local: Emitter,
    added: Mutex<Vec<IceCandidate>>,
    answers: Mutex<Vec<SessionDescription>>,
    disposed: AtomicUsize,
}

impl FakePeer {
    pub fn new() -> Arc<Self> {
        Self::with_world(World::new())
    }

    fn with_world(world: Arc<World>) -> Arc<Self> {
        Arc::new(Self {
            world,
            local: Emitter::default(),
            added: Mutex::new(Vec::new()),
            answers: Mutex::new(Vec::new()),
            disposed: AtomicUsize::new(0),
        })
    }

    pub fn emit_local(&self, candidate: IceCandidate) {
        self.local.emit(candidate);
    }

    pub fn added_candidates(&self) -> Vec<IceCandidate> {
        self.added.lock().clone()
    }

    pub fn answers(&self) -> Vec<SessionDescription> {
        self.answers.lock().clone()
    }

    pub fn live_subscribers(&self) -> usize {
        self.local.live()
    }

    pub fn dispose_count(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalPeer for FakePeer {
    async fn generate_offer(&self) -> Result<SessionDescription, BoxError> {
        self.world.record("generate_offer");
        if let Some(reason) = self.world.fail.lock().offer.clone() {
            return Err(reason.into());
        }
        Ok(SessionDescription::offer("v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\na=recvonly\r\n"))
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), BoxError> {
        self.world.record("apply_answer");
        if self.world.fail.lock().answer {
            return Err(boxed("malformed answer"));
        }
        self.answers.lock().push(answer);
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), BoxError> {
        self.added.lock().push(candidate);
        Ok(())
    }

    fn local_candidates(&self) -> CandidateStream {
        self.local.subscribe()
    }

    async fn dispose(&self) {
        self.world.record("dispose");
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeServer {
    world: Arc<World>,
}

#[async_trait]
impl MediaServer for FakeServer {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn MediaClient>, BoxError> {
        self.world.record(format!("connect:{}", endpoint));
        if self.world.fail.lock().connect {
            return Err(boxed("connection refused"));
        }
        Ok(Arc::new(FakeClient { world: self.world.clone() }))
    }
}

pub struct FakeClient {
    world: Arc<World>,
}

#[async_trait]
impl MediaClient for FakeClient {
    async fn create_pipeline(&self) -> Result<Arc<dyn MediaPipeline>, BoxError> {
        self.world.record("create_pipeline");
        let gate = self.world.pipeline_gate.lock().clone();
        if let Some(gate) = gate {
            self.world.pipeline_entered.notify_one();
            gate.notified().await;
        }
        if self.world.fail.lock().create_pipeline {
            return Err(boxed("pipeline quota exceeded"));
        }
        Ok(Arc::new(FakePipeline {
            world: self.world.clone(),
            released: AtomicBool::new(false),
        }))
    }

    async fn close(&self) {
        self.world.record("close");
    }
}

pub struct FakePipeline {
    world: Arc<World>,
    released: AtomicBool,
}

#[async_trait]
impl MediaPipeline for FakePipeline {
    fn id(&self) -> &str {
        "pipeline-1"
    }

    async fn create_source_endpoint(&self, uri: &str) -> Result<Arc<dyn SourceEndpoint>, BoxError> {
        self.world.record(format!("create_source:{}", uri));
        if self.world.fail.lock().create_source {
            return Err(boxed("unsupported uri"));
        }
        Ok(Arc::new(FakeSource { world: self.world.clone() }))
    }

    async fn create_webrtc_endpoint(&self) -> Result<Arc<dyn WebRtcEndpoint>, BoxError> {
        self.world.record("create_webrtc_endpoint");
        if self.world.fail.lock().create_endpoint {
            return Err(boxed("endpoint quota exceeded"));
        }
        let endpoint = FakeEndpoint::with_world("webrtc-1", self.world.clone());
        self.world.endpoints.lock().push(endpoint.clone());
        Ok(endpoint)
    }

    async fn release(&self) -> Result<(), BoxError> {
        self.world.record("release");
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.world.fail.lock().release {
            return Err(boxed("pipeline already gone"));
        }
        Ok(())
    }
}

pub struct FakeSource {
    world: Arc<World>,
}

#[async_trait]
impl SourceEndpoint for FakeSource {
    fn id(&self) -> &str {
        "player-1"
    }

    async fn connect_to(&self, sink: &dyn WebRtcEndpoint) -> Result<(), BoxError> {
        self.world.record(format!("connect_to:{}", sink.id()));
        if self.world.fail.lock().connect_to {
            return Err(boxed("incompatible caps"));
        }
        Ok(())
    }

    async fn play(&self) -> Result<(), BoxError> {
        self.world.record("play");
        let gate = self.world.play_gate.lock().clone();
        if let Some(gate) = gate {
            self.world.play_entered.notify_one();
            gate.notified().await;
        }
        if self.world.fail.lock().play {
            return Err(boxed("camera unreachable"));
        }
        Ok(())
    }
}

pub struct FakeEndpoint {
    id: String,
    world: Arc<World>,
    remote: Emitter,
    added: Mutex<Vec<IceCandidate>>,
    fail_add: AtomicBool,
}

impl FakeEndpoint {
    pub fn new(id: &str) -> Arc<Self> {
        Self::with_world(id, World::new())
    }

    fn with_world(id: &str, world: Arc<World>) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            world,
            remote: Emitter::default(),
            added: Mutex::new(Vec::new()),
            fail_add: AtomicBool::new(false),
        })
    }

    pub fn emit_remote(&self, candidate: IceCandidate) {
        self.remote.emit(candidate);
    }

    pub fn fail_next_add_candidate(&self) {
        self.fail_add.store(true, Ordering::SeqCst);
    }

    pub fn added_candidates(&self) -> Vec<IceCandidate> {
        self.added.lock().clone()
    }

    pub fn live_subscribers(&self) -> usize {
        self.remote.live()
    }
}

#[async_trait]
impl WebRtcEndpoint for FakeEndpoint {
    fn id(&self) -> &str {
        &self.id
    }

    async fn process_offer(&self, offer: SessionDescription) -> Result<SessionDescription, BoxError> {
        self.world.record("process_offer");
        if self.world.fail.lock().process_offer {
            return Err(boxed("no compatible codecs"));
        }
        Ok(SessionDescription::answer(offer.sdp.replace("recvonly", "sendonly")))
    }

    async fn gather_candidates(&self) -> Result<(), BoxError> {
        self.world.record("gather_candidates");
        if self.world.fail.lock().gather {
            return Err(boxed("gathering refused"));
        }
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), BoxError> {
        if self.fail_add.swap(false, Ordering::SeqCst) {
            return Err(boxed("unknown mid"));
        }
        self.added.lock().push(candidate);
        Ok(())
    }

    fn remote_candidates(&self) -> CandidateStream {
        self.remote.subscribe()
    }
}
