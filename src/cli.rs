use std::num::NonZeroUsize;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::error::ConfigError;
use crate::rewriter::{Mode, RewriteConfig};
use crate::service::ServiceConfig;
use crate::transport::Verdict;

#[derive(Parser, Debug)]
#[command(
    name = "nfq-rewriter",
    version,
    about = "Rewrite IPv4 addresses between two equal-sized subnets on an NFQUEUE"
)]
pub struct Cli {
    /// Worker mode: egress (1) rewrites the destination, ingress (2) the source
    #[arg(long, default_value = "1", value_parser = parse_mode)]
    pub mode: Mode,

    /// nfqueue number
    #[arg(long, default_value_t = 1)]
    pub num: u16,

    /// nfqueue length
    #[arg(long, default_value_t = 1024)]
    pub len: u32,

    /// Rewrite only addresses inside this subnet; leave empty to skip the check
    #[arg(long)]
    pub from: Option<String>,

    /// Subnet to rewrite into
    #[arg(long)]
    pub to: String,

    /// Verdict for packets that are not rewritten
    #[arg(long, default_value = "accept")]
    pub default_verdict: DefaultVerdict,

    /// Bytes of each packet copied to userspace
    #[arg(long, default_value_t = 0xffff, value_parser = validate_packet_len)]
    pub max_packet_len: u32,

    /// Handler threads [default: available parallelism]
    #[arg(long)]
    pub workers: Option<NonZeroUsize>,

    /// Report kernel queue overruns (ENOBUFS) instead of suppressing them
    #[arg(long)]
    pub enobufs: bool,

    /// Seconds between statistics reports, 0 disables them
    #[arg(long, default_value_t = 0)]
    pub stats_interval: u64,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultVerdict {
    Accept,
    Drop,
}

impl From<DefaultVerdict> for Verdict {
    fn from(v: DefaultVerdict) -> Self {
        match v {
            DefaultVerdict::Accept => Verdict::Accept,
            DefaultVerdict::Drop => Verdict::Drop,
        }
    }
}

fn parse_mode(s: &str) -> Result<Mode, String> {
    s.parse()
}

fn validate_packet_len(s: &str) -> Result<u32, String> {
    let val: u32 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid integer"))?;
    if val == 0 {
        Err("max-packet-len must be at least 1 byte".to_string())
    } else if val > 0xffff {
        Err("max-packet-len must be at most 65535 bytes".to_string())
    } else {
        Ok(val)
    }
}

impl Cli {
    /// Validates `--from`/`--to`. Nothing is opened here.
    pub fn rewrite_config(&self) -> Result<RewriteConfig, ConfigError> {
        RewriteConfig::parse(self.mode, self.from.as_deref(), &self.to)
    }

    pub fn service_config(&self) -> ServiceConfig {
        let mut config = ServiceConfig::new(self.num)
            .with_default_verdict(self.default_verdict.into())
            .with_max_queue_len(self.len)
            .with_max_packet_len(self.max_packet_len);
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if self.enobufs {
            config = config.with_enobufs();
        }
        if self.stats_interval > 0 {
            config = config.with_stats_interval(Duration::from_secs(self.stats_interval));
        }
        config
    }
}
