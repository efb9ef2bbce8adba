//! Resolver session lifecycle

use crate::aggregator::{Publisher, WatchAggregator};
use crate::conn::{ClientConn, Resolver};
use async_trait::async_trait;
use resolver_core::Target;
use resolver_naming::WatchChannel;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Watching,
    Closed,
}

/// NamingResolver owns one watch from build to close
pub struct NamingResolver {
    target: Target,
    cancel: CancellationToken,
    publisher: Arc<Publisher>,
    state: Arc<watch::Sender<SessionState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NamingResolver {
    pub(crate) fn new(target: Target, conn: Arc<dyn ClientConn>) -> Self {
        let (state, _) = watch::channel(SessionState::Created);
        Self {
            target,
            cancel: CancellationToken::new(),
            publisher: Arc::new(Publisher::new(conn)),
            state: Arc::new(state),
            task: Mutex::new(None),
        }
    }

    /// Token handed to the naming source; cancelled on close.
    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Spawn the merge loop over `source`.
    pub(crate) fn start(&mut self, source: WatchChannel) {
        let aggregator = WatchAggregator::new(
            source,
            self.publisher.clone(),
            self.cancel.clone(),
            self.state.clone(),
        );
        // Set before spawning: the loop may reach Closed at once.
        self.state.send_replace(SessionState::Watching);
        *self.task.get_mut() = Some(tokio::spawn(aggregator.run()));
        info!("Watching {}", self.target.service_name());
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Wait until the session reaches [`SessionState::Closed`], either
    /// through `close` or because the naming source stopped.
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in self, so this cannot fail.
        let _ = rx.wait_for(|s| *s == SessionState::Closed).await;
    }

    /// No-op: pushed updates keep the address set current.
    pub fn resolve_now(&self) {
        trace!("resolve_now ignored for {}", self.target.service_name());
    }

    /// Stop the watch and wait for the merge loop to exit. The consumer
    /// receives nothing once this has been called. Safe to call repeatedly.
    pub async fn close(&self) {
        self.publisher.shut();
        self.cancel.cancel();

        let mut task = self.task.lock().await;
        if let Some(handle) = task.take() {
            if let Err(e) = handle.await {
                error!("Watch task for {} failed: {}", self.target.service_name(), e);
            }
            debug!("Resolver for {} closed", self.target.service_name());
        }
        self.state.send_replace(SessionState::Closed);
    }
}

#[async_trait]
impl Resolver for NamingResolver {
    fn resolve_now(&self) {
        NamingResolver::resolve_now(self)
    }

    async fn close(&self) {
        NamingResolver::close(self).await
    }
}

impl Drop for NamingResolver {
    fn drop(&mut self) {
        self.publisher.shut();
        self.cancel.cancel();
    }
}
