//! Browser collaborator traits

use async_trait::async_trait;
use siteguard_api::{BlockReason, TabInfo};
use siteguard_util::{HostName, TabId, WindowId};
use thiserror::Error;
use url::Url;

/// Errors from browser-side operations
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Redirect failed: {0}")]
    RedirectFailed(String),

    #[error("Tab not found: {0}")]
    TabNotFound(TabId),

    #[error("Browser bridge unavailable")]
    BridgeUnavailable,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type HostResult<T> = Result<T, HostError>;

/// Current view of the browser's tabs
pub trait TabQuery {
    fn tab(&self, tab_id: TabId) -> Option<TabInfo>;

    /// Active tab of `window`
    fn active_tab(&self, window: WindowId) -> Option<TabInfo>;

    fn open_tabs(&self) -> Vec<TabInfo>;

    /// Focused browser window; `None` when another application has focus
    fn focused_window(&self) -> Option<WindowId>;

    /// Active tab of the focused window
    fn focused_tab(&self) -> Option<TabInfo> {
        self.focused_window().and_then(|w| self.active_tab(w))
    }
}

/// A tab to redirect to the block page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRequest {
    pub tab_id: TabId,
    pub host: HostName,
    pub original_url: String,
    pub reason: BlockReason,
    pub reason_text: String,
    /// Block page carrying `url`, `reason` and `host` query parameters
    pub redirect_url: Option<String>,
}

impl BlockRequest {
    pub fn new(
        tab_id: TabId,
        host: HostName,
        original_url: impl Into<String>,
        reason: BlockReason,
        block_page: Option<&str>,
    ) -> Self {
        let original_url = original_url.into();
        let reason_text = reason.to_string();
        let redirect_url =
            block_page.and_then(|page| block_page_url(page, &original_url, &reason_text, &host));

        Self {
            tab_id,
            host,
            original_url,
            reason,
            reason_text,
            redirect_url,
        }
    }
}

/// Build the redirect target; `None` if `block_page` is not a valid URL
pub fn block_page_url(
    block_page: &str,
    original_url: &str,
    reason_text: &str,
    host: &HostName,
) -> Option<String> {
    Url::parse_with_params(
        block_page,
        &[
            ("url", original_url),
            ("reason", reason_text),
            ("host", host.as_str()),
        ],
    )
    .ok()
    .map(String::from)
}

/// Redirects tabs to the block page
#[async_trait]
pub trait BlockExecutor: Send + Sync {
    /// Fire-and-forget redirect; callers log and drop failures
    async fn redirect(&self, request: &BlockRequest) -> HostResult<()>;

    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteguard_util::DayType;

    #[test]
    fn redirect_url_carries_context() {
        let request = BlockRequest::new(
            TabId(5),
            HostName::new("youtube.com"),
            "https://www.youtube.com/watch?v=1&t=2",
            BlockReason::OutsideAllowedHours {
                day_type: DayType::Weekday,
            },
            Some("http://127.0.0.1:8080/blocked.html"),
        );

        assert_eq!(request.reason_text, "outside allowed hours for weekday");

        let redirect = Url::parse(request.redirect_url.as_deref().unwrap()).unwrap();
        assert_eq!(redirect.path(), "/blocked.html");
        let params: Vec<(String, String)> = redirect.query_pairs().into_owned().collect();
        assert_eq!(
            params,
            vec![
                ("url".into(), "https://www.youtube.com/watch?v=1&t=2".into()),
                ("reason".into(), "outside allowed hours for weekday".into()),
                ("host".into(), "youtube.com".into()),
            ]
        );
    }

    #[test]
    fn no_block_page_means_no_redirect_url() {
        let request = BlockRequest::new(
            TabId(5),
            HostName::new("a.com"),
            "https://a.com/",
            BlockReason::NoRuleDefined,
            None,
        );
        assert!(request.redirect_url.is_none());
        assert!(block_page_url("not a url", "https://a.com/", "x", &request.host).is_none());
    }
}
