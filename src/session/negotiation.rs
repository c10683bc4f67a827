//! Ordered negotiation against the remote media pipeline
//!
//! Stages, each depending on the previous one:
//! 1. connect to the media server
//! 2. create the pipeline (handed to the session immediately so teardown can release it)
//! 3. create the player bound to the camera URL
//! 4. create the WebRTC endpoint
//! 5. wire the ICE relay
//! 6. process the offer, then in parallel:
//!    a. gather remote candidates and apply the answer locally
//!    b. connect player -> endpoint and start playback
//!
//! Every failure is routed through [`SessionLink::report`]. Children of the
//! pipeline are not tracked separately: releasing the pipeline releases them.

use super::ice::IceRelay;
use super::ViewerError;
use crate::config::ViewerConfig;
use crate::media::{
    CandidateStream, LocalPeer, MediaClient, MediaElement, MediaPipeline, MediaServer,
    SessionDescription, SourceEndpoint, WebRtcEndpoint,
};
use log::{debug, info, warn};
use std::sync::Arc;

/// The negotiation's view of the session that owns it.
///
/// Every `attach_*` returns false when the session was stopped or replaced in
/// the meantime; the caller then owns (and must release) what it created.
pub trait SessionLink: Send + Sync {
    fn session_id(&self) -> &str;

    /// Still the live session and not failing
    fn is_current(&self) -> bool;

    fn attach_client(&self, client: Arc<dyn MediaClient>) -> bool;

    fn attach_pipeline(&self, pipeline: Arc<dyn MediaPipeline>) -> bool;

    fn attach_relay(&self, relay: IceRelay) -> bool;

    /// Publish `Playing` if the session is still live
    fn mark_playing(&self) -> bool;

    /// Single failure funnel
    fn report(&self, error: ViewerError);
}

/// Transient state of one negotiation
struct NegotiationContext {
    offer: SessionDescription,
    remote_endpoint: Option<Arc<dyn WebRtcEndpoint>>,
    answer: Option<SessionDescription>,
}

/// Resources produced by stages 1-5
struct Provisioned {
    player: Arc<dyn SourceEndpoint>,
    endpoint: Arc<dyn WebRtcEndpoint>,
}

pub struct NegotiationPipeline {
    server: Arc<dyn MediaServer>,
    camera_url: String,
    signaling_url: String,
}

impl NegotiationPipeline {
    pub fn new(server: Arc<dyn MediaServer>, viewer: &ViewerConfig) -> Self {
        Self {
            server,
            camera_url: viewer.camera_url.clone(),
            signaling_url: viewer.signaling_url.clone(),
        }
    }

    /// Run every stage for `offer`. Failures are reported through `link`.
    pub async fn negotiate(
        &self,
        offer: SessionDescription,
        peer: Arc<dyn LocalPeer>,
        local_candidates: CandidateStream,
        link: Arc<dyn SessionLink>,
    ) {
        let mut ctx = NegotiationContext {
            offer,
            remote_endpoint: None,
            answer: None,
        };

        let provisioned = match self.provision(&mut ctx, &peer, local_candidates, &link).await {
            Ok(p) => p,
            Err(e) => {
                link.report(e);
                return;
            }
        };

        if let Err(e) = self.exchange(&mut ctx, &link).await {
            link.report(e);
            return;
        }
        let Some(answer) = ctx.answer.take() else {
            return;
        };

        // Each branch reports as soon as it fails so the other one stops at its next check.
        tokio::join!(
            async {
                if let Err(e) = Self::apply_answer(&provisioned.endpoint, &peer, answer, link.as_ref()).await {
                    link.report(e);
                }
            },
            async {
                if let Err(e) = Self::start_playback(&provisioned.player, &provisioned.endpoint, link.as_ref()).await {
                    link.report(e);
                }
            },
        );
    }

    /// Stages 1-5
    async fn provision(
        &self,
        ctx: &mut NegotiationContext,
        peer: &Arc<dyn LocalPeer>,
        local_candidates: CandidateStream,
        link: &Arc<dyn SessionLink>,
    ) -> Result<Provisioned, ViewerError> {
        let sid = link.session_id().to_string();

        info!("Session {} connecting to media server {}", sid, self.signaling_url);
        let client = self
            .server
            .connect(&self.signaling_url)
            .await
            .map_err(|e| ViewerError::Connect(format!("{}: {}", self.signaling_url, e)))?;
        if !link.attach_client(client.clone()) {
            client.close().await;
            return Err(ViewerError::Cancelled);
        }

        let pipeline = client
            .create_pipeline()
            .await
            .map_err(|e| ViewerError::create(MediaElement::Pipeline, e))?;
        if !link.attach_pipeline(pipeline.clone()) {
            debug!("Session {} gone before pipeline {} was attached, releasing it", sid, pipeline.id());
            if let Err(e) = pipeline.release().await {
                warn!("Session {} orphan pipeline release failed: {}", sid, e);
            }
            return Err(ViewerError::Cancelled);
        }
        info!("Session {} created pipeline {}", sid, pipeline.id());

        let player = pipeline
            .create_source_endpoint(&self.camera_url)
            .await
            .map_err(|e| ViewerError::create(MediaElement::SourceEndpoint, e))?;
        ensure_current(link.as_ref())?;
        debug!("Session {} created player {} for {}", sid, player.id(), self.camera_url);

        let endpoint = pipeline
            .create_webrtc_endpoint()
            .await
            .map_err(|e| ViewerError::create(MediaElement::WebRtcEndpoint, e))?;
        ensure_current(link.as_ref())?;
        debug!("Session {} created WebRTC endpoint {}", sid, endpoint.id());
        ctx.remote_endpoint = Some(endpoint.clone());

        // Relay must be live before the offer is processed so no early candidate is lost.
        let errors = link.clone();
        let relay = IceRelay::wire(
            &sid,
            peer.clone(),
            endpoint.clone(),
            local_candidates,
            endpoint.remote_candidates(),
            Arc::new(move |e| errors.report(e)),
        );
        if !link.attach_relay(relay) {
            return Err(ViewerError::Cancelled);
        }

        Ok(Provisioned { player, endpoint })
    }

    /// Stage 6: offer in, answer out
    async fn exchange(
        &self,
        ctx: &mut NegotiationContext,
        link: &Arc<dyn SessionLink>,
    ) -> Result<(), ViewerError> {
        let endpoint = ctx.remote_endpoint.clone().ok_or(ViewerError::Cancelled)?;

        let answer = endpoint
            .process_offer(ctx.offer.clone())
            .await
            .map_err(|e| ViewerError::Negotiation(e.to_string()))?;
        ensure_current(link.as_ref())?;
        debug!("Session {} received SDP answer ({} bytes)", link.session_id(), answer.sdp.len());

        ctx.answer = Some(answer);
        Ok(())
    }

    /// Stage 6a
    async fn apply_answer(
        endpoint: &Arc<dyn WebRtcEndpoint>,
        peer: &Arc<dyn LocalPeer>,
        answer: SessionDescription,
        link: &dyn SessionLink,
    ) -> Result<(), ViewerError> {
        endpoint
            .gather_candidates()
            .await
            .map_err(|e| ViewerError::Media(format!("gather candidates: {}", e)))?;
        ensure_current(link)?;

        peer.apply_answer(answer)
            .await
            .map_err(|e| ViewerError::Answer(e.to_string()))?;
        debug!("Session {} applied remote answer", link.session_id());
        Ok(())
    }

    /// Stage 6b
    async fn start_playback(
        player: &Arc<dyn SourceEndpoint>,
        endpoint: &Arc<dyn WebRtcEndpoint>,
        link: &dyn SessionLink,
    ) -> Result<(), ViewerError> {
        player
            .connect_to(endpoint.as_ref())
            .await
            .map_err(|e| ViewerError::Media(format!("connect {} -> {}: {}", player.id(), endpoint.id(), e)))?;
        ensure_current(link)?;
        info!("Session {} player {} connected to {}", link.session_id(), player.id(), endpoint.id());

        player
            .play()
            .await
            .map_err(|e| ViewerError::Media(format!("play: {}", e)))?;

        if link.mark_playing() {
            info!("Session {} playing", link.session_id());
            Ok(())
        } else {
            Err(ViewerError::Cancelled)
        }
    }
}

fn ensure_current(link: &dyn SessionLink) -> Result<(), ViewerError> {
    if link.is_current() {
        Ok(())
    } else {
        Err(ViewerError::Cancelled)
    }
}
