//! Block executor backed by the IPC event stream

use async_trait::async_trait;
use siteguard_api::{Event, EventPayload};
use siteguard_core::CoreEvent;
use siteguard_host_api::{BlockExecutor, BlockRequest, HostError, HostResult};
use siteguard_ipc::IpcServer;
use std::sync::Arc;
use tracing::{debug, warn};

/// Asks subscribed bridge clients to redirect a tab
pub struct IpcBlockExecutor {
    ipc: Arc<IpcServer>,
}

impl IpcBlockExecutor {
    pub fn new(ipc: Arc<IpcServer>) -> Self {
        Self { ipc }
    }
}

#[async_trait]
impl BlockExecutor for IpcBlockExecutor {
    async fn redirect(&self, request: &BlockRequest) -> HostResult<()> {
        if self.ipc.subscriber_count().await == 0 {
            return Err(HostError::BridgeUnavailable);
        }

        debug!(tab_id = %request.tab_id, host = %request.host, "Sending block request");
        self.ipc.broadcast_event(Event::new(EventPayload::BlockTab {
            tab_id: request.tab_id,
            host: request.host.clone(),
            url: request.original_url.clone(),
            reason: request.reason.clone(),
            reason_text: request.reason_text.clone(),
            redirect_url: request.redirect_url.clone(),
        }));
        Ok(())
    }
}

/// Turn engine events into redirects and pushed events, in order.
///
/// A failed redirect is logged and dropped; the remaining events still go out.
pub async fn dispatch_events(
    executor: &dyn BlockExecutor,
    block_page_url: Option<&str>,
    events: Vec<CoreEvent>,
    mut publish: impl FnMut(EventPayload),
) {
    for event in events {
        let payload = match event {
            CoreEvent::BlockTab {
                tab_id,
                host,
                url,
                reason,
            } => {
                let request = BlockRequest::new(tab_id, host, url, reason, block_page_url);
                if let Err(e) = executor.redirect(&request).await {
                    warn!(tab_id = %request.tab_id, host = %request.host, error = %e, "Redirect failed");
                }
                continue;
            }
            CoreEvent::TemporaryDisableStarted { until } => {
                EventPayload::TemporaryDisableStarted { until }
            }
            CoreEvent::TemporaryDisableExpired => EventPayload::TemporaryDisableExpired,
            CoreEvent::ModeChanged { mode } => EventPayload::ModeChanged { mode },
            CoreEvent::RulesChanged { host, removed } => EventPayload::RulesChanged { host, removed },
            CoreEvent::GlobalLimitsChanged { limits } => {
                EventPayload::GlobalLimitsChanged { limits }
            }
            CoreEvent::UsageCleared => EventPayload::UsageCleared,
            CoreEvent::DailyRollover { date, .. } => EventPayload::DailyRollover { date },
        };

        publish(payload);
    }
}
