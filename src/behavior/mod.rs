//! Session worker: the page-side half of a decoy session.
//!
//! Each dispatched session runs one worker task. The worker waits for the
//! page to settle, handshakes with the orchestrator, and either executes
//! its assigned behavior (first load) or disconnects (the page a behavior
//! navigated to). Behaviors themselves live in [`strategies`].

pub mod strategies;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::host::TabHost;
use crate::orchestrator::timer::JitterRange;
use crate::pool::Algorithm;
use crate::protocol::ProtocolClient;

/// Terminal outcome a behavior reports before its session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A link was activated; the session ends on the next handshake.
    Navigate,
    /// A search was submitted; ends like `Navigate`.
    Search,
    /// Search was assigned but no term or no form was available.
    SearchFail,
    /// Nothing left to do here; disconnect now.
    Remove,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Navigate => "navigate",
            Outcome::Search => "search",
            Outcome::SearchFail => "searchfail",
            Outcome::Remove => "remove",
        };
        f.write_str(s)
    }
}

/// Drive one session to completion.
///
/// The loop mirrors a page lifecycle: every settled page produces one
/// handshake. A fresh session executes its behavior; if that behavior
/// navigates, the next pass gets `disconnect_after_redirect` and ends the
/// session. Stand-down replies (the pool no longer knows this tab) end the
/// worker without touching orchestrator state.
pub async fn run_worker(host: Arc<dyn TabHost>, client: ProtocolClient, delay: JitterRange) {
    let tab = client.session();
    loop {
        let page = match host.page(tab).await {
            Ok(page) => page,
            Err(err) => {
                warn!(%tab, error = %err, "page context lost, disconnecting");
                let _ = client.disconnect().await;
                return;
            }
        };
        if let Err(err) = page.wait_for_load().await {
            warn!(%tab, error = %err, "page never settled, disconnecting");
            let _ = client.disconnect().await;
            return;
        }
        if let Ok(url) = page.current_url().await {
            debug!(%tab, url, "page settled");
        }

        let reply = match client.handshake().await {
            Ok(reply) => reply,
            // Orchestrator is gone; the whole run is ending.
            Err(_) => return,
        };

        if reply.disconnect_after_redirect {
            debug!(%tab, "post-redirect handshake, disconnecting");
            let _ = client.disconnect().await;
            return;
        }
        let algorithm = match reply.algorithm {
            Some(algorithm) if reply.should_execute => algorithm,
            _ => {
                debug!(%tab, "handshake says stand down");
                return;
            }
        };

        let outcome = strategies::execute(algorithm, page.as_ref(), &client, delay).await;
        info!(%tab, %algorithm, %outcome, "behavior finished");
        match outcome {
            // The page is changing under us; loop for the next handshake.
            Outcome::Navigate | Outcome::Search => continue,
            Outcome::SearchFail | Outcome::Remove => {
                let _ = client.disconnect().await;
                return;
            }
        }
    }
}
