use std::fmt;

use crate::error::TransportError;

mod netfilter;

pub use netfilter::NfqTransport;

/// Kernel-assigned id; unique among packets still waiting for a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketId(pub u32);

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub id: PacketId,
    pub payload: Vec<u8>,
    /// Ethertype reported by netfilter, 0 if unknown.
    pub hw_protocol: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Drop,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Accept => f.write_str("accept"),
            Verdict::Drop => f.write_str("drop"),
        }
    }
}

/// Duplex channel to the kernel queue.
///
/// `recv` never blocks: it returns `Ok(None)` when nothing is pending.
pub trait PacketTransport {
    fn recv(&mut self) -> Result<Option<RawPacket>, TransportError>;

    /// Sends the verdict for `id`, optionally replacing the packet bytes.
    fn verdict(
        &mut self,
        id: PacketId,
        verdict: Verdict,
        payload: Option<Vec<u8>>,
    ) -> Result<(), TransportError>;

    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
