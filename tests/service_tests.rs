mod common;

use std::io;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;

use nfq_rewriter::envelope::Envelope;
use nfq_rewriter::error::{QueueError, TransportError, VerdictError};
use nfq_rewriter::service::{ErrorAction, QueueService, ServiceConfig, ServiceState};
use nfq_rewriter::transport::{PacketId, Verdict};

use common::{
    Recorded, ScriptedTransport, config, start, start_with_failing_writes, wait_until,
};

#[test]
fn undecided_packet_gets_default_verdict_once() {
    let (service, harness) = start(
        |_: &Envelope| -> Result<(), io::Error> { Ok(()) },
        config(),
    );
    assert_eq!(service.state(), ServiceState::Running);

    harness.push(1);
    assert_eq!(
        harness.next_verdict(),
        Recorded {
            id: 1,
            verdict: Verdict::Drop,
            payload: None
        }
    );
    harness.assert_quiet();
    assert!(wait_until(|| service.stats().defaulted == 1));
    assert!(wait_until(|| service.stats().dropped == 1));
    service.close();
}

#[test]
fn handler_verdict_suppresses_default() {
    let (service, harness) = start(
        |env: &Envelope| -> Result<(), VerdictError> { env.accept_with_payload(vec![1, 2, 3]) },
        config(),
    );

    harness.push(5);
    assert_eq!(
        harness.next_verdict(),
        Recorded {
            id: 5,
            verdict: Verdict::Accept,
            payload: Some(vec![1, 2, 3])
        }
    );
    harness.assert_quiet();
    assert!(wait_until(|| service.stats().modified == 1));
    assert_eq!(service.stats().defaulted, 0);
    service.close();
}

#[test]
fn every_packet_gets_exactly_one_verdict() {
    let (service, harness) = start(
        |env: &Envelope| -> Result<(), VerdictError> {
            if env.id().0 % 2 == 0 {
                env.accept()?;
            }
            Ok(())
        },
        config().with_default_verdict(Verdict::Drop),
    );

    for id in 0..100 {
        harness.push(id);
    }
    let mut seen = vec![0u32; 100];
    for _ in 0..100 {
        let rec = harness.next_verdict();
        seen[rec.id as usize] += 1;
        let expected = if rec.id % 2 == 0 {
            Verdict::Accept
        } else {
            Verdict::Drop
        };
        assert_eq!(rec.verdict, expected, "packet {}", rec.id);
    }
    assert!(seen.iter().all(|&n| n == 1));
    harness.assert_quiet();
    service.close();
}

#[test]
fn handler_error_forces_drop_and_reaches_error_handler() {
    let reported = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reported);
    let config = config()
        .with_default_verdict(Verdict::Accept)
        .with_error_handler(move |err| {
            if matches!(err, QueueError::Handler { id: PacketId(9), .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            ErrorAction::Continue
        });
    let (service, harness) = start(
        |_: &Envelope| -> Result<(), io::Error> { Err(io::Error::other("boom")) },
        config,
    );

    harness.push(9);
    assert_eq!(harness.next_verdict().verdict, Verdict::Drop);
    harness.assert_quiet();
    assert_eq!(reported.load(Ordering::SeqCst), 1);
    assert!(wait_until(|| service.stats().handler_errors == 1));
    assert!(service.is_running());
    service.close();
}

#[test]
fn panicking_handler_still_gets_a_drop() {
    let reported = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reported);
    let config = config()
        .with_default_verdict(Verdict::Accept)
        .with_error_handler(move |err| {
            if let QueueError::Handler { id: PacketId(1), source } = err {
                if source.to_string().contains("bad packet") {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }
            ErrorAction::Continue
        });
    let (service, harness) = start(
        |env: &Envelope| -> Result<(), io::Error> {
            if env.id().0 == 1 {
                panic!("bad packet");
            }
            Ok(())
        },
        config,
    );

    harness.push(1);
    harness.push(2);
    let mut verdicts = vec![harness.next_verdict(), harness.next_verdict()];
    verdicts.sort_by_key(|r| r.id);
    assert_eq!(verdicts[0].verdict, Verdict::Drop);
    assert_eq!(verdicts[1].verdict, Verdict::Accept);
    harness.assert_quiet();

    assert_eq!(reported.load(Ordering::SeqCst), 1);
    assert!(wait_until(|| service.stats().outstanding() == 0));
    assert_eq!(service.stats().handler_errors, 1);

    // Both workers survive the panic.
    for id in 3..7 {
        harness.push(id);
    }
    for _ in 3..7 {
        assert_eq!(harness.next_verdict().verdict, Verdict::Accept);
    }
    service.close();
}

#[test]
fn failed_verdict_write_is_reported_once() {
    let timeouts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&timeouts);
    let config = config().with_error_handler(move |err| {
        if matches!(
            err,
            QueueError::Transport(TransportError::WriteTimeout(PacketId(4)))
        ) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        ErrorAction::Continue
    });
    let (service, harness) = start_with_failing_writes(
        |_: &Envelope| -> Result<(), io::Error> { Ok(()) },
        config,
        &[4],
    );

    harness.push(4);
    assert!(wait_until(|| service.stats().transport_errors == 1));
    harness.push(5);
    assert_eq!(harness.next_verdict().id, 5);
    harness.assert_quiet();

    assert_eq!(timeouts.load(Ordering::SeqCst), 1);
    assert_eq!(harness.write_attempts(4), 1);
    assert_eq!(service.stats().transport_errors, 1);
    assert!(service.is_running());
    service.close();
}

#[test]
fn second_verdict_from_handler_fails() {
    let (result_tx, result_rx) = unbounded();
    let (service, harness) = start(
        move |env: &Envelope| -> Result<(), VerdictError> {
            env.accept()?;
            let _ = result_tx.send(env.drop());
            Ok(())
        },
        config(),
    );

    harness.push(3);
    assert_eq!(harness.next_verdict().verdict, Verdict::Accept);
    let second = result_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(second, Err(VerdictError::AlreadyDecided(PacketId(3)))));
    harness.assert_quiet();
    service.close();
}

#[test]
fn error_handler_can_stop_the_loop() {
    let config = config().with_error_handler(|err| match err {
        QueueError::Transport(TransportError::Overrun) => ErrorAction::Stop,
        _ => ErrorAction::Continue,
    });
    let (service, harness) = start(
        |_: &Envelope| -> Result<(), io::Error> { Ok(()) },
        config,
    );

    harness.packets.send(Err(TransportError::Overrun)).unwrap();
    assert!(wait_until(|| !service.is_running()));
    assert!(wait_until(|| service.state() == ServiceState::Closed));
    assert!(harness.closed.load(Ordering::Acquire));
    assert_eq!(service.stats().transport_errors, 1);
    service.close();
}

#[test]
fn transport_errors_are_suppressed_without_handler() {
    let (service, harness) = start(
        |_: &Envelope| -> Result<(), io::Error> { Ok(()) },
        config(),
    );

    harness.packets.send(Err(TransportError::Overrun)).unwrap();
    harness.push(1);
    assert_eq!(harness.next_verdict().id, 1);
    assert!(service.is_running());
    service.close();
}

#[test]
fn open_failure_is_returned() {
    let result = QueueService::with_transport(
        |_: &Envelope| -> Result<(), io::Error> { Ok(()) },
        ServiceConfig::new(9),
        |config: &ServiceConfig| -> Result<ScriptedTransport, TransportError> {
            Err(TransportError::Open {
                queue: config.queue_num(),
                source: io::Error::from(io::ErrorKind::PermissionDenied),
            })
        },
    );
    assert!(matches!(result, Err(TransportError::Open { queue: 9, .. })));
}

#[test]
fn close_finishes_in_flight_and_defaults_queued() {
    let (started_tx, started_rx) = unbounded();
    let (release_tx, release_rx) = unbounded::<()>();
    let calls = Arc::new(AtomicUsize::new(0));
    let handler_calls = Arc::clone(&calls);

    let (service, harness) = start(
        move |env: &Envelope| -> Result<(), VerdictError> {
            handler_calls.fetch_add(1, Ordering::SeqCst);
            let _ = started_tx.send(env.id());
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
            env.accept()
        },
        ServiceConfig::new(1)
            .with_workers(NonZeroUsize::MIN)
            .with_default_verdict(Verdict::Drop),
    );

    harness.push(1);
    harness.push(2);
    assert_eq!(
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        PacketId(1)
    );
    assert!(wait_until(|| service.stats().received == 2));

    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        let _ = release_tx.send(());
    });
    service.close();
    releaser.join().unwrap();

    let mut verdicts = harness.verdicts.try_iter().collect::<Vec<_>>();
    verdicts.sort_by_key(|r| r.id);
    assert_eq!(
        verdicts,
        vec![
            Recorded {
                id: 1,
                verdict: Verdict::Accept,
                payload: None
            },
            Recorded {
                id: 2,
                verdict: Verdict::Drop,
                payload: None
            },
        ]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(harness.closed.load(Ordering::Acquire));
}
