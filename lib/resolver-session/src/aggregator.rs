//! Watch aggregator: merges update batches into the address table and
//! publishes a full snapshot after each batch

use crate::conn::ClientConn;
use crate::resolver::SessionState;
use futures::StreamExt;
use resolver_core::{AddressTable, ResolveError, Snapshot};
use resolver_naming::WatchChannel;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Gate in front of the consumer. Once shut, nothing reaches it again.
///
/// The consumer is called with the gate's lock held, so `shut` (and with it
/// `NamingResolver::close`) waits on the runtime thread for an in-flight
/// call to return. See [`ClientConn`] for the non-blocking contract.
pub(crate) struct Publisher {
    conn: Arc<dyn ClientConn>,
    open: Mutex<bool>,
}

impl Publisher {
    pub(crate) fn new(conn: Arc<dyn ClientConn>) -> Self {
        Self {
            conn,
            open: Mutex::new(true),
        }
    }

    /// Returns false if the gate is shut.
    pub(crate) fn publish(&self, snapshot: Snapshot) -> bool {
        let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if *open {
            self.conn.update_state(snapshot);
        }
        *open
    }

    pub(crate) fn report_error(&self, error: ResolveError) -> bool {
        let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if *open {
            self.conn.report_error(error);
        }
        *open
    }

    /// Waits for an in-flight publish to return.
    pub(crate) fn shut(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

pub(crate) struct WatchAggregator {
    source: WatchChannel,
    table: AddressTable,
    publisher: Arc<Publisher>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<SessionState>>,
}

impl WatchAggregator {
    pub(crate) fn new(
        source: WatchChannel,
        publisher: Arc<Publisher>,
        cancel: CancellationToken,
        state: Arc<watch::Sender<SessionState>>,
    ) -> Self {
        Self {
            source,
            table: AddressTable::new(),
            publisher,
            cancel,
            state,
        }
    }

    /// Merge loop. Sole owner of the address table.
    pub(crate) async fn run(mut self) {
        let service = self.source.service().to_string();
        debug!("Watch aggregator started for {}", service);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Watch on {} cancelled", service);
                    break;
                }
                event = self.source.next() => match event {
                    Some(Ok(batch)) => {
                        self.table.apply(&batch);
                        let snapshot = self.table.snapshot();
                        debug!(
                            "Applied {} updates for {}, {} endpoints",
                            batch.len(),
                            service,
                            snapshot.len()
                        );
                        if !self.publisher.publish(snapshot) {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Resolution error for {}: {}", service, e);
                        if !self.publisher.report_error(e) {
                            break;
                        }
                    }
                    None => {
                        warn!("Naming source for {} closed", service);
                        self.publisher
                            .report_error(ResolveError::SourceClosed(service.clone()));
                        break;
                    }
                },
            }
        }

        self.source.close().await;
        self.state.send_replace(SessionState::Closed);
        info!("Watch on {} stopped", service);
    }
}
