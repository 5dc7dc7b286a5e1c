//! Async front for the gateway.
//!
//! Identity scopes are per thread and the guards are `!Send`, so a request
//! must never cross an `.await` while impersonating. Each request therefore
//! runs to completion (switch, operation, retry, restore) inside one
//! `spawn_blocking` task.

use super::Gateway;
use crate::backend::{Request, Response, StorageBackend};
use crate::identity::RequestEnv;

use std::sync::Arc;

pub struct AsyncGateway<B: StorageBackend + 'static> {
    inner: Arc<Gateway<B>>,
}

impl<B: StorageBackend + 'static> Clone for AsyncGateway<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: StorageBackend + 'static> AsyncGateway<B> {
    pub fn new(gateway: Gateway<B>) -> Self {
        Self {
            inner: Arc::new(gateway),
        }
    }

    pub fn gateway(&self) -> &Gateway<B> {
        &self.inner
    }

    /// Run `request` on a blocking thread. A panicked or cancelled task
    /// reports `EIO`.
    pub async fn handle(&self, env: Option<RequestEnv>, request: Request) -> Response {
        let gateway = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || gateway.handle(env.as_ref(), &request))
            .await
            .unwrap_or_else(|e| {
                tracing::error!(target: "gateway", error = %e, "request task failed");
                Response::error(libc::EIO)
            })
    }
}
