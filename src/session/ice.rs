//! Bidirectional ICE candidate relay
//!
//! Forwards local candidates to the remote WebRTC endpoint and remote
//! candidates to the local peer. One task per direction; a failed forward is
//! reported and the loop keeps going. Unwiring aborts both tasks, which drops
//! the candidate subscriptions.

use super::ViewerError;
use crate::media::{CandidateStream, LocalPeer, WebRtcEndpoint};
use futures::StreamExt;
use log::{debug, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Error sink for non-fatal forwarding failures
pub type CandidateErrorSink = Arc<dyn Fn(ViewerError) + Send + Sync>;

/// Forwarding counters
#[derive(Debug, Default)]
pub struct RelayStats {
    pub local_forwarded: AtomicU64,
    pub remote_forwarded: AtomicU64,
    pub failed: AtomicU64,
}

/// An active candidate relay between the local peer and one remote endpoint
pub struct IceRelay {
    session_id: String,
    local_task: Option<JoinHandle<()>>,
    remote_task: Option<JoinHandle<()>>,
    stats: Arc<RelayStats>,
}

impl IceRelay {
    /// Start forwarding in both directions.
    ///
    /// `local` must have been taken from `peer` before the offer was generated
    /// so candidates discovered in the meantime are queued in it.
    pub fn wire(
        session_id: &str,
        peer: Arc<dyn LocalPeer>,
        endpoint: Arc<dyn WebRtcEndpoint>,
        local: CandidateStream,
        remote: CandidateStream,
        on_error: CandidateErrorSink,
    ) -> Self {
        let stats = Arc::new(RelayStats::default());
        info!("Session {} ICE relay wired to endpoint {}", session_id, endpoint.id());

        let local_task = {
            let sid = session_id.to_string();
            let stats = stats.clone();
            let on_error = on_error.clone();
            tokio::spawn(async move {
                let mut local = local;
                while let Some(candidate) = local.next().await {
                    debug!("Session {} local candidate ({}): {}", sid, candidate.kind().as_str(), candidate);
                    match endpoint.add_candidate(candidate).await {
                        Ok(()) => {
                            stats.local_forwarded.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            stats.failed.fetch_add(1, Ordering::Relaxed);
                            on_error(ViewerError::Candidate(format!("remote endpoint rejected local candidate: {}", e)));
                        }
                    }
                }
                debug!("Session {} local candidate stream ended", sid);
            })
        };

        let remote_task = {
            let sid = session_id.to_string();
            let stats = stats.clone();
            tokio::spawn(async move {
                let mut remote = remote;
                while let Some(candidate) = remote.next().await {
                    debug!("Session {} remote candidate ({}): {}", sid, candidate.kind().as_str(), candidate);
                    match peer.add_candidate(candidate).await {
                        Ok(()) => {
                            stats.remote_forwarded.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            stats.failed.fetch_add(1, Ordering::Relaxed);
                            on_error(ViewerError::Candidate(format!("local peer rejected remote candidate: {}", e)));
                        }
                    }
                }
                debug!("Session {} remote candidate stream ended", sid);
            })
        };

        Self {
            session_id: session_id.to_string(),
            local_task: Some(local_task),
            remote_task: Some(remote_task),
            stats,
        }
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        self.stats.clone()
    }

    /// True while at least one direction is still forwarding
    pub fn is_active(&self) -> bool {
        [&self.local_task, &self.remote_task]
            .iter()
            .any(|t| t.as_ref().map(|h| !h.is_finished()).unwrap_or(false))
    }

    /// Stop forwarding in both directions
    pub fn unwire(&mut self) {
        let mut aborted = false;
        for task in [self.local_task.take(), self.remote_task.take()].into_iter().flatten() {
            task.abort();
            aborted = true;
        }
        if aborted {
            info!(
                "Session {} ICE relay unwired ({} local / {} remote forwarded, {} failed)",
                self.session_id,
                self.stats.local_forwarded.load(Ordering::Relaxed),
                self.stats.remote_forwarded.load(Ordering::Relaxed),
                self.stats.failed.load(Ordering::Relaxed),
            );
        }
    }
}

impl Drop for IceRelay {
    fn drop(&mut self) {
        self.unwire();
    }
}
