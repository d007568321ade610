#![allow(dead_code)]

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};

use nfq_rewriter::error::TransportError;
use nfq_rewriter::service::{PacketHandler, QueueService, ServiceConfig};
use nfq_rewriter::transport::{PacketId, PacketTransport, RawPacket, Verdict};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub id: u32,
    pub verdict: Verdict,
    pub payload: Option<Vec<u8>>,
}

/// In-memory queue fed by the test.
pub struct ScriptedTransport {
    incoming: Receiver<Result<RawPacket, TransportError>>,
    verdicts: Sender<Recorded>,
    closed: Arc<AtomicBool>,
    /// Ids whose verdict write times out.
    failing: Vec<u32>,
    attempts: Arc<Mutex<Vec<u32>>>,
}

impl PacketTransport for ScriptedTransport {
    fn recv(&mut self) -> Result<Option<RawPacket>, TransportError> {
        match self.incoming.try_recv() {
            Ok(Ok(packet)) => Ok(Some(packet)),
            Ok(Err(e)) => Err(e),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Ok(None),
        }
    }

    fn verdict(
        &mut self,
        id: PacketId,
        verdict: Verdict,
        payload: Option<Vec<u8>>,
    ) -> Result<(), TransportError> {
        self.attempts.lock().unwrap().push(id.0);
        if self.failing.contains(&id.0) {
            return Err(TransportError::WriteTimeout(id));
        }
        let _ = self.verdicts.send(Recorded {
            id: id.0,
            verdict,
            payload,
        });
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

pub struct Harness {
    pub packets: Sender<Result<RawPacket, TransportError>>,
    pub verdicts: Receiver<Recorded>,
    pub closed: Arc<AtomicBool>,
    attempts: Arc<Mutex<Vec<u32>>>,
}

impl Harness {
    /// Verdict writes tried for `id`, failed ones included.
    pub fn write_attempts(&self, id: u32) -> usize {
        self.attempts.lock().unwrap().iter().filter(|&&a| a == id).count()
    }

    pub fn push(&self, id: u32) {
        self.push_bytes(id, vec![0x45, 0, 0, 20]);
    }

    pub fn push_bytes(&self, id: u32, payload: Vec<u8>) {
        self.packets
            .send(Ok(RawPacket {
                id: PacketId(id),
                payload,
                hw_protocol: 0x0800,
            }))
            .unwrap();
    }

    pub fn next_verdict(&self) -> Recorded {
        self.verdicts
            .recv_timeout(Duration::from_secs(5))
            .expect("no verdict relayed")
    }

    pub fn assert_quiet(&self) {
        assert!(
            self.verdicts
                .recv_timeout(Duration::from_millis(100))
                .is_err(),
            "unexpected extra verdict"
        );
    }
}

pub fn start<H>(handler: H, config: ServiceConfig) -> (QueueService, Harness)
where
    H: PacketHandler + 'static,
{
    start_with_failing_writes(handler, config, &[])
}

/// Like [`start`], but verdict writes for `failing` ids time out.
pub fn start_with_failing_writes<H>(
    handler: H,
    config: ServiceConfig,
    failing: &[u32],
) -> (QueueService, Harness)
where
    H: PacketHandler + 'static,
{
    let (packet_tx, packet_rx) = unbounded();
    let (verdict_tx, verdict_rx) = unbounded();
    let closed = Arc::new(AtomicBool::new(false));
    let attempts = Arc::new(Mutex::new(Vec::new()));

    let transport_closed = Arc::clone(&closed);
    let transport_attempts = Arc::clone(&attempts);
    let failing = failing.to_vec();
    let service = QueueService::with_transport(handler, config, move |_| {
        Ok(ScriptedTransport {
            incoming: packet_rx,
            verdicts: verdict_tx,
            closed: transport_closed,
            failing,
            attempts: transport_attempts,
        })
    })
    .unwrap();

    let harness = Harness {
        packets: packet_tx,
        verdicts: verdict_rx,
        closed,
        attempts,
    };
    (service, harness)
}

pub fn config() -> ServiceConfig {
    ServiceConfig::new(1).with_workers(NonZeroUsize::new(2).unwrap())
}

pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}
