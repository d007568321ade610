use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::QueueError;
use crate::transport::Verdict;

const DEFAULT_MAX_QUEUE_LEN: u32 = 0xff;
const DEFAULT_MAX_PACKET_LEN: u32 = 0xffff;

/// What the dispatch loop does after an error was reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    Continue,
    Stop,
}

pub type ErrorHandler = Arc<dyn Fn(&QueueError) -> ErrorAction + Send + Sync>;

/// Settings for one queue subscription; fixed once the service starts.
#[derive(Clone)]
pub struct ServiceConfig {
    queue_num: u16,
    max_queue_len: u32,
    max_packet_len: u32,
    default_verdict: Verdict,
    enable_enobufs: bool,
    workers: NonZeroUsize,
    error_handler: Option<ErrorHandler>,
    stats_interval: Option<Duration>,
}

impl ServiceConfig {
    pub fn new(queue_num: u16) -> Self {
        Self {
            queue_num,
            max_queue_len: DEFAULT_MAX_QUEUE_LEN,
            max_packet_len: DEFAULT_MAX_PACKET_LEN,
            default_verdict: Verdict::Drop,
            enable_enobufs: false,
            workers: thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
            error_handler: None,
            stats_interval: None,
        }
    }

    /// Verdict for packets the handler leaves undecided.
    pub fn with_default_verdict(mut self, verdict: Verdict) -> Self {
        self.default_verdict = verdict;
        self
    }

    pub fn with_max_queue_len(mut self, len: u32) -> Self {
        self.max_queue_len = len;
        self
    }

    pub fn with_max_packet_len(mut self, len: u32) -> Self {
        self.max_packet_len = len;
        self
    }

    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&QueueError) -> ErrorAction + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Report kernel queue overruns instead of suppressing them.
    pub fn with_enobufs(mut self) -> Self {
        self.enable_enobufs = true;
        self
    }

    pub fn with_workers(mut self, workers: NonZeroUsize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = Some(interval);
        self
    }

    pub fn queue_num(&self) -> u16 {
        self.queue_num
    }

    pub fn max_queue_len(&self) -> u32 {
        self.max_queue_len
    }

    pub fn max_packet_len(&self) -> u32 {
        self.max_packet_len
    }

    pub fn default_verdict(&self) -> Verdict {
        self.default_verdict
    }

    pub fn enobufs_enabled(&self) -> bool {
        self.enable_enobufs
    }

    pub fn workers(&self) -> NonZeroUsize {
        self.workers
    }

    pub fn error_handler(&self) -> Option<&ErrorHandler> {
        self.error_handler.as_ref()
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        self.stats_interval
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("queue_num", &self.queue_num)
            .field("max_queue_len", &self.max_queue_len)
            .field("max_packet_len", &self.max_packet_len)
            .field("default_verdict", &self.default_verdict)
            .field("enable_enobufs", &self.enable_enobufs)
            .field("workers", &self.workers)
            .field("error_handler", &self.error_handler.is_some())
            .field("stats_interval", &self.stats_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_nfqueue_service() {
        let config = ServiceConfig::new(3);
        assert_eq!(config.queue_num(), 3);
        assert_eq!(config.max_queue_len(), 0xff);
        assert_eq!(config.max_packet_len(), 0xffff);
        assert_eq!(config.default_verdict(), Verdict::Drop);
        assert!(!config.enobufs_enabled());
        assert!(config.error_handler().is_none());
        assert!(config.stats_interval().is_none());
    }

    #[test]
    fn builder_overrides() {
        let config = ServiceConfig::new(1)
            .with_default_verdict(Verdict::Accept)
            .with_max_queue_len(1024)
            .with_max_packet_len(1500)
            .with_enobufs()
            .with_workers(NonZeroUsize::new(2).unwrap())
            .with_error_handler(|_| ErrorAction::Stop);
        assert_eq!(config.default_verdict(), Verdict::Accept);
        assert_eq!(config.max_queue_len(), 1024);
        assert_eq!(config.max_packet_len(), 1500);
        assert!(config.enobufs_enabled());
        assert_eq!(config.workers().get(), 2);
        let handler = config.error_handler().unwrap();
        assert_eq!(handler(&QueueError::from(crate::error::TransportError::Overrun)), ErrorAction::Stop);
    }
}
