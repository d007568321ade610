use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use clap::Parser;

use nfq_rewriter::cli::Cli;
use nfq_rewriter::error::AppError;
use nfq_rewriter::rewriter::SubnetRewriter;
use nfq_rewriter::service::QueueService;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Set by the signal handlers.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(
            libc::SIGTERM,
            signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGINT,
            signal_handler as *const () as libc::sighandler_t,
        );
    }
}

fn exit_code(err: &AppError) -> i32 {
    match err {
        AppError::Config(_) => 1,
        AppError::Transport(_) => 2,
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        process::exit(exit_code(&e));
    }
}

fn run(cli: Cli) -> Result<(), AppError> {
    log::info!(
        "mode: {} num: {} length: {} from: {} to: {}",
        cli.mode,
        cli.num,
        cli.len,
        cli.from.as_deref().unwrap_or("-"),
        cli.to
    );

    // Both subnets are checked before the queue is touched.
    let rewrite = cli.rewrite_config()?;
    let mapper = rewrite.mapper();
    match mapper.from() {
        Some(from) => log::info!("from: {from} to: {}", mapper.to()),
        None => log::info!("from: any to: {}", mapper.to()),
    }

    let config = cli.service_config();
    log::debug!("{config:?}");

    install_signal_handlers();
    let service = QueueService::create(SubnetRewriter::new(rewrite), config)?;

    while !SHUTDOWN_REQUESTED.load(Ordering::Relaxed) && service.is_running() {
        thread::sleep(POLL_INTERVAL);
    }
    if !service.is_running() {
        log::warn!("dispatch loop stopped");
    }

    let stats = service.stats();
    service.close();
    log::info!(
        "received {} rewritten {} accepted {} dropped {}",
        stats.received,
        stats.modified,
        stats.accepted,
        stats.dropped
    );
    Ok(())
}
