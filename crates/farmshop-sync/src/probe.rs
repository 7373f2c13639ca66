//! # Connectivity Probe
//!
//! A bounded GET against the backend's probe path. The only operation in
//! the sync layer with its own timeout: a probe that hasn't answered within
//! `probe.timeout_secs` counts as failed, same as an error response.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use crate::context::SyncContext;
use crate::transport::{Request, Transport};

/// Checks whether the backend answers.
pub struct ConnectivityProbe {
    ctx: Arc<SyncContext>,
    transport: Arc<dyn Transport>,
    url: String,
    timeout: Duration,
}

impl ConnectivityProbe {
    /// Probe through `transport`, which should be the undecorated base stack.
    pub fn new(ctx: Arc<SyncContext>, transport: Arc<dyn Transport>) -> Self {
        let url = ctx.config().probe_url();
        let timeout = ctx.config().probe_timeout();

        ConnectivityProbe {
            ctx,
            transport,
            url,
            timeout,
        }
    }

    /// Sends the probe and updates the reachability flag.
    pub async fn check(&self) -> bool {
        let outcome = timeout(self.timeout, self.transport.send(Request::get(&self.url))).await;

        let failure = match outcome {
            Ok(Ok(response)) if response.is_success() => None,
            Ok(Ok(response)) => Some(format!("probe answered HTTP {}", response.status.as_u16())),
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("probe timed out after {}s", self.timeout.as_secs())),
        };

        match failure {
            None => {
                debug!(url = %self.url, "Probe succeeded");
                self.ctx.mark_reachable();
                true
            }
            Some(reason) => {
                debug!(url = %self.url, reason = %reason, "Probe failed");
                self.ctx.mark_unreachable("probe", &reason);
                false
            }
        }
    }
}
