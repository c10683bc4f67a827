//! Session controller
//!
//! Owns the lifecycle of one viewing session at a time: `start` creates the
//! local peer and kicks off negotiation, `stop` tears everything down in
//! reverse acquisition order. Every asynchronous continuation carries the
//! generation of the session it was started for and is ignored once that
//! session is gone.

use super::ice::IceRelay;
use super::negotiation::{NegotiationPipeline, SessionLink};
use super::status::{StatusSignal, StatusStream, StatusSubscription, VideoStatus};
use super::ViewerError;
use crate::config::{Config, NegotiationConfig, ViewerConfig};
use crate::media::{LocalPeer, MediaClient, MediaPipeline, MediaServer, PeerFactory, VideoSink};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

const ERROR_CHANNEL_CAPACITY: usize = 64;

/// Upper bound for `shutdown` when no negotiation deadline is configured
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Handles held by the live session
struct Session {
    generation: u64,
    id: String,
    /// A fatal error was reported and teardown is pending
    failing: bool,
    peer: Option<Arc<dyn LocalPeer>>,
    client: Option<Arc<dyn MediaClient>>,
    pipeline: Option<Arc<dyn MediaPipeline>>,
    relay: Option<IceRelay>,
}

impl Session {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            id: Uuid::new_v4().to_string(),
            failing: false,
            peer: None,
            client: None,
            pipeline: None,
            relay: None,
        }
    }

    fn is_live(&self, generation: u64) -> bool {
        self.generation == generation && !self.failing
    }
}

#[derive(Default)]
struct ControllerState {
    last_generation: u64,
    session: Option<Session>,
}

struct ControllerInner {
    server: Arc<dyn MediaServer>,
    peers: Arc<dyn PeerFactory>,
    negotiation: NegotiationConfig,
    viewer: Mutex<ViewerConfig>,
    status: StatusSignal,
    /// Orders `Playing` against teardown's `Stopped`
    status_gate: Mutex<()>,
    errors: broadcast::Sender<ViewerError>,
    state: Mutex<ControllerState>,
    /// Serializes start and stop
    lifecycle: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ControllerInner {
    fn publish(&self, status: VideoStatus) {
        let _gate = self.status_gate.lock();
        self.status.publish(status);
    }

    fn is_live(&self, generation: u64) -> bool {
        self.state
            .lock()
            .session
            .as_ref()
            .map_or(false, |s| s.is_live(generation))
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    /// Log and publish `error`. Returns true when the caller must stop the
    /// session; only the first fatal error of a session does.
    fn fail(&self, generation: u64, error: ViewerError) -> bool {
        if error.is_cancelled() {
            debug!("Dropping cancelled continuation of generation {}", generation);
            return false;
        }

        if !error.is_fatal() {
            warn!("{}", error);
            let _ = self.errors.send(error);
            return false;
        }

        let failed = {
            let mut state = self.state.lock();
            match state.session.as_mut() {
                Some(session) if session.is_live(generation) => {
                    session.failing = true;
                    Some(session.id.clone())
                }
                _ => None,
            }
        };

        match failed {
            Some(id) => {
                error!("Session {} failed: {}", id, error);
                let _ = self.errors.send(error);
                true
            }
            None => {
                debug!("Ignoring error from finished session (generation {}): {}", generation, error);
                false
            }
        }
    }

    /// Stop the live session. With `Some(generation)` only that session is
    /// stopped and nothing is published if it is already gone.
    async fn stop_session(&self, generation: Option<u64>) {
        let _lifecycle = self.lifecycle.lock().await;

        let session = {
            let mut state = self.state.lock();
            let matches = match (generation, state.session.as_ref()) {
                (_, None) => false,
                (Some(g), Some(s)) => s.generation == g,
                (None, Some(_)) => true,
            };
            if matches {
                state.session.take()
            } else {
                None
            }
        };

        match session {
            Some(session) => self.teardown(session).await,
            None if generation.is_some() => return,
            None => {
                if self.status.current() == VideoStatus::Stopped {
                    debug!("Stop requested with no active session");
                    return;
                }
            }
        }

        self.publish(VideoStatus::Stopped);
    }

    /// Release in reverse acquisition order: relay, pipeline, client, peer.
    async fn teardown(&self, session: Session) {
        let Session { id, peer, client, pipeline, relay, .. } = session;

        if let Some(mut relay) = relay {
            relay.unwire();
        }

        if let Some(pipeline) = pipeline {
            info!("Session {} releasing pipeline {}", id, pipeline.id());
            if let Err(e) = pipeline.release().await {
                let error = ViewerError::Release(format!("{}: {}", pipeline.id(), e));
                warn!("Session {} {}", id, error);
                let _ = self.errors.send(error);
            }
        }

        if let Some(client) = client {
            client.close().await;
        }

        if let Some(peer) = peer {
            peer.dispose().await;
        }

        info!("Session {} stopped", id);
    }
}

/// A negotiation's handle back to the controller, pinned to one generation
struct SessionHandle {
    inner: Arc<ControllerInner>,
    generation: u64,
    id: String,
}

impl SessionHandle {
    fn attach_peer(&self, peer: Arc<dyn LocalPeer>) -> bool {
        self.attach(|session| session.peer = Some(peer))
    }

    fn attach(&self, apply: impl FnOnce(&mut Session)) -> bool {
        let mut state = self.inner.state.lock();
        match state.session.as_mut() {
            Some(session) if session.is_live(self.generation) => {
                apply(session);
                true
            }
            _ => false,
        }
    }
}

impl SessionLink for SessionHandle {
    fn session_id(&self) -> &str {
        &self.id
    }

    fn is_current(&self) -> bool {
        self.inner.is_live(self.generation)
    }

    fn attach_client(&self, client: Arc<dyn MediaClient>) -> bool {
        self.attach(|session| session.client = Some(client))
    }

    fn attach_pipeline(&self, pipeline: Arc<dyn MediaPipeline>) -> bool {
        self.attach(|session| {
            debug_assert!(session.peer.is_some(), "pipeline attached without a local peer");
            session.pipeline = Some(pipeline);
        })
    }

    fn attach_relay(&self, relay: IceRelay) -> bool {
        let mut relay = Some(relay);
        let attached = self.attach(|session| session.relay = relay.take());
        // Not attached: dropping it here unwires it.
        drop(relay);
        attached
    }

    fn mark_playing(&self) -> bool {
        let _gate = self.inner.status_gate.lock();
        let live = self.inner.is_live(self.generation);
        if live {
            self.inner.status.publish(VideoStatus::Playing);
        }
        live
    }

    fn report(&self, error: ViewerError) {
        if self.inner.fail(self.generation, error) {
            let inner = self.inner.clone();
            let generation = self.generation;
            self.inner.track(tokio::spawn(async move {
                inner.stop_session(Some(generation)).await;
            }));
        }
    }
}

/// Drives camera viewing sessions against a media server
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    pub fn new(config: &Config, server: Arc<dyn MediaServer>, peers: Arc<dyn PeerFactory>) -> Self {
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ControllerInner {
                server,
                peers,
                negotiation: config.negotiation.clone(),
                viewer: Mutex::new(config.viewer.clone()),
                status: StatusSignal::new(),
                status_gate: Mutex::new(()),
                errors,
                state: Mutex::new(ControllerState::default()),
                lifecycle: tokio::sync::Mutex::new(()),
                tasks: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Replace the viewer configuration; takes effect on the next `start`.
    pub fn configure(&self, viewer: ViewerConfig) {
        info!(
            "Viewer configured: {} via {} into '{}'",
            viewer.camera_url, viewer.signaling_url, viewer.video_sink
        );
        *self.inner.viewer.lock() = viewer;
    }

    pub fn viewer_config(&self) -> ViewerConfig {
        self.inner.viewer.lock().clone()
    }

    pub fn status(&self) -> VideoStatus {
        self.inner.status.current()
    }

    /// Status updates as a stream, starting with the current value
    pub fn watch_status(&self) -> StatusStream {
        self.inner.status.subscribe()
    }

    /// Status callback, invoked immediately with the current value
    pub fn observe_status<F>(&self, observer: F) -> StatusSubscription
    where
        F: Fn(VideoStatus) + Send + Sync + 'static,
    {
        self.inner.status.observe(observer)
    }

    /// Every reported error, fatal or not
    pub fn errors(&self) -> broadcast::Receiver<ViewerError> {
        self.inner.errors.subscribe()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.state.lock().session.as_ref().map(|s| s.id.clone())
    }

    pub fn has_local_peer(&self) -> bool {
        self.inner.state.lock().session.as_ref().map_or(false, |s| s.peer.is_some())
    }

    pub fn has_remote_pipeline(&self) -> bool {
        self.inner.state.lock().session.as_ref().map_or(false, |s| s.pipeline.is_some())
    }

    /// Begin a new session. Only valid while `Stopped`.
    ///
    /// Returns once `Loading` is published; negotiation continues in the
    /// background and its outcome is observable through the status signal.
    pub async fn start(&self) -> Result<(), ViewerError> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ViewerError::InvalidState("controller is shut down".to_string()));
        }

        let current = self.inner.status.current();
        if current != VideoStatus::Stopped {
            return Err(ViewerError::InvalidState(format!(
                "cannot start while {}",
                current.as_str()
            )));
        }

        let viewer = self.inner.viewer.lock().clone();
        if let Err(e) = viewer.validate() {
            return Err(ViewerError::InvalidState(e.to_string()));
        }

        let handle = {
            let mut state = self.inner.state.lock();
            state.last_generation += 1;
            let session = Session::new(state.last_generation);
            let handle = Arc::new(SessionHandle {
                inner: self.inner.clone(),
                generation: session.generation,
                id: session.id.clone(),
            });
            state.session = Some(session);
            handle
        };

        info!(
            "Session {} starting: {} -> '{}'",
            handle.id, viewer.camera_url, viewer.video_sink
        );
        self.inner.publish(VideoStatus::Loading);

        let inner = self.inner.clone();
        self.inner.track(tokio::spawn(run_session(inner, handle, viewer)));
        Ok(())
    }

    /// Tear down the current session. Safe to call in any state, any number of times.
    pub async fn stop(&self) {
        self.inner.stop_session(None).await;
    }

    /// Report an externally observed failure against the current session
    pub async fn on_error(&self, error: Option<ViewerError>) {
        let Some(error) = error else {
            return;
        };

        let generation = self.inner.state.lock().session.as_ref().map(|s| s.generation);
        match generation {
            Some(generation) => {
                if self.inner.fail(generation, error) {
                    self.inner.stop_session(Some(generation)).await;
                }
            }
            None => debug!("No active session, ignoring: {}", error),
        }
    }

    /// Wait for every in-flight negotiation and error-triggered stop to finish
    pub async fn settle(&self) {
        loop {
            let tasks = std::mem::take(&mut *self.inner.tasks.lock());
            if tasks.is_empty() {
                break;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    if e.is_panic() {
                        error!("Session task panicked: {}", e);
                    }
                }
            }
        }
    }

    /// Stop, wait for stragglers, and refuse further starts
    pub async fn shutdown(self) {
        self.stop().await;

        let grace = self.inner.negotiation.deadline().unwrap_or(SHUTDOWN_GRACE);
        if tokio::time::timeout(grace, self.settle()).await.is_err() {
            warn!("Session tasks still running after {} ms, detaching", grace.as_millis());
        }

        self.inner.closed.store(true, Ordering::SeqCst);
        info!("Session controller shut down");
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let session = self.inner.state.lock().session.take();
        let Some(mut session) = session else {
            return;
        };

        if let Some(mut relay) = session.relay.take() {
            relay.unwire();
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let inner = self.inner.clone();
                runtime.spawn(async move {
                    inner.teardown(session).await;
                });
            }
            Err(_) => {
                warn!(
                    "Session {} dropped outside a runtime; remote pipeline not released",
                    session.id
                );
            }
        }

        self.inner.publish(VideoStatus::Stopped);
    }
}

async fn run_session(inner: Arc<ControllerInner>, handle: Arc<SessionHandle>, viewer: ViewerConfig) {
    let work = negotiate_session(inner.clone(), handle.clone(), viewer);

    let Some(deadline) = inner.negotiation.deadline() else {
        work.await;
        return;
    };

    // The deadline fails the session but never cancels the work: a stage still
    // in flight must run to completion so whatever it created gets released.
    tokio::pin!(work);
    tokio::select! {
        _ = &mut work => return,
        _ = tokio::time::sleep(deadline) => handle.report(ViewerError::Timeout(deadline)),
    }
    work.await;
}

async fn negotiate_session(inner: Arc<ControllerInner>, handle: Arc<SessionHandle>, viewer: ViewerConfig) {
    let sink = VideoSink::new(&viewer.video_sink);

    let peer = match inner.peers.create(&sink).await {
        Ok(peer) => peer,
        Err(e) => {
            handle.report(ViewerError::Peer(e.to_string()));
            return;
        }
    };
    if !handle.attach_peer(peer.clone()) {
        peer.dispose().await;
        return;
    }

    // Subscribe before the offer so candidates gathered meanwhile are queued.
    let local_candidates = peer.local_candidates();

    let offer = match peer.generate_offer().await {
        Ok(offer) => offer,
        Err(e) => {
            handle.report(ViewerError::Offer(e.to_string()));
            return;
        }
    };
    if !handle.is_current() {
        return;
    }
    debug!("Session {} generated SDP offer ({} bytes)", handle.id, offer.sdp.len());

    let link: Arc<dyn SessionLink> = handle;
    NegotiationPipeline::new(inner.server.clone(), &viewer)
        .negotiate(offer, peer, local_candidates, link)
        .await;
}
