//! Userspace NFQUEUE worker that moves IPv4 traffic between two subnets of
//! equal size, keeping each host's id.

pub mod cli;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod monitor;
pub mod rewriter;
pub mod service;
pub mod subnet;
pub mod transport;
