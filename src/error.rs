use std::io;

use crate::transport::PacketId;

/// Startup configuration problems. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid subnet `{input}`: {reason}")]
    InvalidSubnet { input: String, reason: String },

    #[error("`from`/`to` network mask not equal. from: {from} to: {to}")]
    PrefixMismatch { from: u8, to: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("prefix length mismatch: {from} != {to}")]
    PrefixMismatch { from: u8, to: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty packet")]
    Empty,

    #[error("unsupported IP version {0}")]
    UnsupportedVersion(u8),

    #[error("{layer} header truncated: need {needed} bytes, have {available}")]
    Truncated {
        layer: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("{layer} header length {value} is invalid")]
    BadHeaderLength { layer: &'static str, value: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SerializeError {
    #[error("no enclosing network layer found before {0} layer")]
    MissingNetworkLayer(&'static str),

    #[error("packet was only partially decoded (stopped at {0}); refusing to serialize")]
    IncompleteDecode(&'static str),

    #[error("{layer} too large to serialize: {len} bytes")]
    TooLarge { layer: &'static str, len: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum VerdictError {
    #[error("packet {0} cannot be verdicted twice")]
    AlreadyDecided(PacketId),

    #[error("verdict for packet {0} not delivered: service is closed")]
    ServiceClosed(PacketId),

    #[error(transparent)]
    Serialize(#[from] SerializeError),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("unable to open nfqueue {queue}: {source}")]
    Open {
        queue: u16,
        #[source]
        source: io::Error,
    },

    #[error("nfqueue overrun (ENOBUFS): kernel dropped packets")]
    Overrun,

    #[error("nfqueue receive failed: {0}")]
    Recv(#[source] io::Error),

    #[error("verdict write for packet {id} failed: {source}")]
    Write {
        id: PacketId,
        #[source]
        source: io::Error,
    },

    #[error("verdict write for packet {0} timed out")]
    WriteTimeout(PacketId),

    #[error("verdict for unknown packet {0}")]
    UnknownPacket(PacketId),

    #[error("unable to unbind nfqueue: {0}")]
    Unbind(#[source] io::Error),

    #[error("transport closed")]
    Closed,
}

/// Everything routed to a service's error handler.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("nfqueue service callback error on packet {id}: {source}")]
    Handler {
        id: PacketId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// A packet handler panicked; reported in place of its error.
#[derive(Debug, thiserror::Error)]
#[error("handler panicked: {0}")]
pub struct HandlerPanic(pub String);

#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error(transparent)]
    Verdict(#[from] VerdictError),
}

/// Errors that end the binary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
