use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, bounded, unbounded};

use crate::envelope::{Envelope, VerdictCommand};
use crate::error::{HandlerPanic, QueueError, VerdictError};
use crate::monitor::Monitor;
use crate::service::{ErrorAction, PacketHandler, ServiceState, Shared};
use crate::transport::PacketTransport;

// Packets pulled from the kernel per round before verdicts get relayed again.
const BATCH_LIMIT: usize = 256;
// Envelopes buffered per worker; beyond this, receiving stalls and the
// kernel queue absorbs (then overruns) the burst.
const JOBS_PER_WORKER: usize = 64;
const IDLE_WAIT: Duration = Duration::from_micros(100);

/// Dispatch loop. Owns the transport; returns once cancelled or stopped by
/// the error handler, after every worker has finished.
pub(crate) fn run<H, T>(shared: Arc<Shared>, handler: Arc<H>, mut transport: T)
where
    H: PacketHandler + 'static,
    T: PacketTransport,
{
    let workers = shared.config.workers().get();
    let (job_tx, job_rx) = bounded::<Envelope>(workers * JOBS_PER_WORKER);
    let (verdict_tx, verdict_rx) = unbounded::<VerdictCommand>();

    let mut pool = Vec::with_capacity(workers);
    for i in 0..workers {
        match spawn_worker(i, job_rx.clone(), Arc::clone(&shared), Arc::clone(&handler)) {
            Ok(worker) => pool.push(worker),
            Err(e) => log::error!("unable to spawn nfqueue worker {i}: {e}"),
        }
    }
    drop(job_rx);

    let mut monitor = shared
        .config
        .stats_interval()
        .map(|interval| Monitor::new(&format!("queue {}", shared.config.queue_num()), interval));

    'dispatch: while !shared.cancelled() {
        let mut working = false;

        while let Ok(cmd) = verdict_rx.try_recv() {
            working = true;
            if relay(&shared, &mut transport, cmd) == ErrorAction::Stop {
                break 'dispatch;
            }
        }

        for _ in 0..BATCH_LIMIT {
            if shared.cancelled() {
                break;
            }
            match transport.recv() {
                Ok(Some(packet)) => {
                    working = true;
                    shared.stats.record_received();
                    let envelope = Envelope::new(packet, verdict_tx.clone());
                    if let Err(returned) = job_tx.send(envelope) {
                        // Every worker is gone; nobody else will decide it.
                        shared.apply_default(&returned.0);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    if shared.report(QueueError::Transport(e)) == ErrorAction::Stop {
                        break 'dispatch;
                    }
                    break;
                }
            }
        }

        if let Some(monitor) = monitor.as_mut() {
            monitor.check_and_report(&shared.stats);
        }

        if !working {
            if let Ok(cmd) = verdict_rx.recv_timeout(IDLE_WAIT) {
                if relay(&shared, &mut transport, cmd) == ErrorAction::Stop {
                    break 'dispatch;
                }
            }
        }
    }

    shared.set_state(ServiceState::Closing);
    // Workers see the flag, resolve any queued envelope with the default
    // verdict and exit once the job channel drains.
    shared.cancel();
    drop(job_tx);
    for worker in pool {
        if worker.join().is_err() {
            log::error!("nfqueue worker panicked");
        }
    }

    drop(verdict_tx);
    for cmd in verdict_rx.try_iter() {
        relay(&shared, &mut transport, cmd);
    }

    if let Err(e) = transport.close() {
        shared.report(QueueError::Transport(e));
    }
    shared.set_state(ServiceState::Closed);
}

fn relay<T: PacketTransport>(shared: &Shared, transport: &mut T, cmd: VerdictCommand) -> ErrorAction {
    let VerdictCommand {
        id,
        verdict,
        payload,
    } = cmd;
    let modified = payload.is_some();
    match transport.verdict(id, verdict, payload) {
        Ok(()) => {
            shared.stats.record_verdict(verdict, modified);
            ErrorAction::Continue
        }
        Err(e) => shared.report(QueueError::Transport(e)),
    }
}

fn spawn_worker<H>(
    index: usize,
    jobs: Receiver<Envelope>,
    shared: Arc<Shared>,
    handler: Arc<H>,
) -> std::io::Result<JoinHandle<()>>
where
    H: PacketHandler + 'static,
{
    thread::Builder::new()
        .name(format!("nfq-worker-{index}"))
        .spawn(move || {
            for envelope in jobs.iter() {
                handle_one(&shared, handler.as_ref(), &envelope);
            }
        })
}

/// Runs the handler for one packet and makes sure a verdict follows.
fn handle_one<H: PacketHandler>(shared: &Shared, handler: &H, envelope: &Envelope) {
    if shared.cancelled() {
        shared.apply_default(envelope);
        return;
    }

    let source: Box<dyn std::error::Error + Send + Sync> =
        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(envelope))) {
            Ok(Ok(())) => {
                shared.apply_default(envelope);
                return;
            }
            Ok(Err(e)) => Box::new(e),
            Err(payload) => Box::new(HandlerPanic(panic_message(payload.as_ref()))),
        };

    let id = envelope.id();
    if shared.report(QueueError::Handler { id, source }) == ErrorAction::Stop {
        shared.cancel();
    }
    // Fail closed.
    match envelope.drop() {
        Ok(()) | Err(VerdictError::AlreadyDecided(_)) => {}
        Err(e) => log::warn!("packet {id}: {e}"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
