//! # Neighborhood Manager
//!
//! Keeps the number of outgoing peers at `target_outgoing_peers`.
//!
//! ## Rounds
//!
//! A round computes the deficit, asks peer selection for that many
//! candidates and dials them all concurrently. The round ends when every
//! dial has finished or `connect_timeout` expires; dials still pending are
//! abandoned.
//!
//! A round is triggered by:
//! - startup
//! - an outgoing peer leaving
//! - the periodic refresh tick
//! - the retry deadline after a round that left a deficit
//!
//! Requests that arrive while a round runs are merged into the next one.

use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::core::SwarmInner;
use crate::ports::ConnectionDirection;

impl SwarmInner {
    /// Dial up to `want` selected candidates. Returns how many became new
    /// outgoing peers.
    ///
    /// Candidates that fail to dial or are already connected as incoming
    /// are not counted; the caller tops up on a later round.
    pub(crate) async fn get_more_peers(&self, want: usize) -> usize {
        if want == 0 {
            return 0;
        }

        let candidates = self.selector.select_peers(want).await;
        if candidates.is_empty() {
            debug!(want, "Peer selection returned no candidates");
            return 0;
        }

        let mut dials = JoinSet::new();
        for candidate in candidates {
            if candidate.public_key() == &self.identity.public_key() {
                continue;
            }
            let pool = self.pool.clone();
            dials.spawn(async move {
                let result = pool
                    .get_connection(candidate.address(), candidate.public_key())
                    .await;
                (candidate, result)
            });
        }

        let deadline = time::sleep(self.config.connect_timeout());
        tokio::pin!(deadline);
        let mut shutdown = self.shutdown_signal();
        let mut added = 0;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stopped| *stopped) => break,
                _ = &mut deadline => {
                    debug!(pending = dials.len(), "Connect timeout, abandoning pending dials");
                    break;
                }
                joined = dials.join_next() => match joined {
                    None => break,
                    Some(Ok((candidate, Ok(connection)))) => {
                        // The pool handed back a link the candidate opened;
                        // its pending inbound event files it as incoming.
                        if connection.direction() == ConnectionDirection::Inbound {
                            debug!(peer = %candidate, "Candidate already linked inbound");
                            continue;
                        }
                        if self.add_outgoing_peer(candidate) {
                            added += 1;
                        }
                    }
                    Some(Ok((candidate, Err(e)))) => {
                        debug!(peer = %candidate, error = %e, "Could not connect to candidate");
                    }
                    Some(Err(e)) => warn!(error = %e, "Dial task failed"),
                },
            }
        }
        dials.abort_all();

        debug!(want, added, "Peering round finished");
        added
    }

    /// Run one round if below target. Returns whether the target is met.
    pub(crate) async fn ask_for_more_peers(&self) -> bool {
        let target = self.config.target_outgoing_peers;
        let deficit = target.saturating_sub(self.outgoing_count());
        if deficit > 0 {
            self.get_more_peers(deficit).await;
        }

        let satisfied = self.outgoing_count() >= target;
        if satisfied {
            self.mark_initial_peering_complete();
        } else {
            debug!(
                outgoing = self.outgoing_count(),
                target, "Neighborhood below target"
            );
        }
        satisfied
    }

    pub(crate) async fn run_neighborhood(&self, mut requests: tokio::sync::mpsc::Receiver<()>) {
        let mut shutdown = self.shutdown_signal();
        let mut refresh = time::interval(self.config.refresh_interval());
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
        refresh.tick().await;

        let mut retry_at: Option<Instant> = None;
        self.request_more_peers();
        info!(
            target = self.config.target_outgoing_peers,
            "Neighborhood manager started"
        );

        loop {
            let retry = async move {
                match retry_at {
                    Some(at) => time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stopped| *stopped) => break,
                request = requests.recv() => {
                    if request.is_none() {
                        break;
                    }
                    let mut merged = 0usize;
                    while requests.try_recv().is_ok() {
                        merged += 1;
                    }
                    if merged > 0 {
                        debug!(merged, "Merged pending peering requests");
                    }
                }
                _ = refresh.tick() => {}
                _ = retry => {}
            }

            retry_at = if self.ask_for_more_peers().await {
                None
            } else {
                Some(Instant::now() + self.config.no_results_retry())
            };
        }
        debug!("Neighborhood manager stopped");
    }
}

