//! Mock block executor for testing

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::{BlockExecutor, BlockRequest, HostError, HostResult};

/// Records every redirect instead of touching a browser
#[derive(Debug, Clone, Default)]
pub struct MockBlockExecutor {
    requests: Arc<Mutex<Vec<BlockRequest>>>,

    /// Configure redirects to fail
    pub fail_redirect: Arc<Mutex<bool>>,
}

impl MockBlockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Redirects issued so far, oldest first
    pub fn requests(&self) -> Vec<BlockRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn set_fail_redirect(&self, fail: bool) {
        if let Ok(mut flag) = self.fail_redirect.lock() {
            *flag = fail;
        }
    }
}

#[async_trait]
impl BlockExecutor for MockBlockExecutor {
    async fn redirect(&self, request: &BlockRequest) -> HostResult<()> {
        if self.fail_redirect.lock().map(|f| *f).unwrap_or(false) {
            return Err(HostError::RedirectFailed("Mock redirect failure".into()));
        }

        self.requests
            .lock()
            .map_err(|_| HostError::Internal("mock lock poisoned".into()))?
            .push(request.clone());
        Ok(())
    }
}
