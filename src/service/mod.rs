//! NFQUEUE subscription that hands each packet to a [`PacketHandler`] and
//! guarantees every packet leaves with exactly one verdict.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::bounded;

use crate::envelope::Envelope;
use crate::error::{QueueError, TransportError, VerdictError};
use crate::monitor::{ServiceStats, StatsSnapshot};
use crate::transport::{NfqTransport, PacketTransport};

mod config;
mod dispatch;

pub use config::{ErrorAction, ErrorHandler, ServiceConfig};

/// Per-packet callback run on the worker pool.
///
/// Handlers for different packets run concurrently. Returning without a
/// verdict leaves the decision to the service's default verdict; returning
/// an error drops the packet if it is still undecided.
pub trait PacketHandler: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn handle(&self, packet: &Envelope) -> Result<(), Self::Error>;
}

impl<F, E> PacketHandler for F
where
    F: Fn(&Envelope) -> Result<(), E> + Send + Sync,
    E: std::error::Error + Send + Sync + 'static,
{
    type Error = E;

    fn handle(&self, packet: &Envelope) -> Result<(), E> {
        self(packet)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceState {
    Created = 0,
    Running = 1,
    Closing = 2,
    Closed = 3,
}

impl ServiceState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ServiceState::Created,
            1 => ServiceState::Running,
            2 => ServiceState::Closing,
            _ => ServiceState::Closed,
        }
    }
}

/// State shared between the service handle, the dispatch thread and workers.
pub(crate) struct Shared {
    config: ServiceConfig,
    cancel: AtomicBool,
    state: AtomicU8,
    stats: ServiceStats,
}

impl Shared {
    fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            cancel: AtomicBool::new(false),
            state: AtomicU8::new(ServiceState::Created as u8),
            stats: ServiceStats::default(),
        }
    }

    fn set_state(&self, state: ServiceState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Routes an error to the configured handler; logged and suppressed
    /// when there is none.
    fn report(&self, err: QueueError) -> ErrorAction {
        match &err {
            QueueError::Transport(_) => self.stats.record_transport_error(),
            QueueError::Handler { .. } => self.stats.record_handler_error(),
        }
        log::warn!("{err}");
        match self.config.error_handler() {
            Some(handler) => handler(&err),
            None => ErrorAction::Continue,
        }
    }

    fn apply_default(&self, envelope: &Envelope) {
        let verdict = self.config.default_verdict();
        match envelope.decide(verdict, None) {
            Ok(()) => {
                self.stats.record_default();
                log::trace!("packet {}: default verdict {verdict}", envelope.id());
            }
            Err(VerdictError::AlreadyDecided(_)) => {}
            Err(e) => log::warn!("packet {}: {e}", envelope.id()),
        }
    }
}

pub struct QueueService {
    shared: Arc<Shared>,
    dispatcher: Option<JoinHandle<()>>,
}

impl QueueService {
    /// Subscribes to the configured NFQUEUE and starts dispatching.
    pub fn create<H>(handler: H, config: ServiceConfig) -> Result<Self, TransportError>
    where
        H: PacketHandler + 'static,
    {
        Self::with_transport(handler, config, NfqTransport::open)
    }

    /// Like [`QueueService::create`] over any transport. `open` runs on the
    /// dispatch thread, which then owns the transport for its whole life.
    pub fn with_transport<H, T, F>(
        handler: H,
        config: ServiceConfig,
        open: F,
    ) -> Result<Self, TransportError>
    where
        H: PacketHandler + 'static,
        T: PacketTransport + 'static,
        F: FnOnce(&ServiceConfig) -> Result<T, TransportError> + Send + 'static,
    {
        let queue_num = config.queue_num();
        let shared = Arc::new(Shared::new(config));
        let handler = Arc::new(handler);
        let (ready_tx, ready_rx) = bounded::<Result<(), TransportError>>(1);

        let thread_shared = Arc::clone(&shared);
        let dispatcher = thread::Builder::new()
            .name(format!("nfq-dispatch-{queue_num}"))
            .spawn(move || {
                let transport = match open(&thread_shared.config) {
                    Ok(transport) => transport,
                    Err(e) => {
                        thread_shared.set_state(ServiceState::Closed);
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                thread_shared.set_state(ServiceState::Running);
                let _ = ready_tx.send(Ok(()));
                dispatch::run(thread_shared, handler, transport);
            })
            .map_err(|source| TransportError::Open {
                queue: queue_num,
                source,
            })?;

        let opened = ready_rx.recv().unwrap_or(Err(TransportError::Closed));
        if let Err(e) = opened {
            let _ = dispatcher.join();
            return Err(e);
        }

        log::info!("nfqueue service listening on queue {queue_num}");
        Ok(Self {
            shared,
            dispatcher: Some(dispatcher),
        })
    }

    pub fn state(&self) -> ServiceState {
        ServiceState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// False once the dispatch loop has stopped, e.g. after an error handler
    /// asked it to.
    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Stops dispatching, lets in-flight handlers finish, relays their
    /// verdicts and releases the queue.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(dispatcher) = self.dispatcher.take() else {
            return;
        };
        log::info!("closing nfqueue service...");
        self.shared.cancel();
        if dispatcher.join().is_err() {
            log::error!("nfqueue dispatch thread panicked");
        }
        self.shared.set_state(ServiceState::Closed);
    }
}

impl Drop for QueueService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
