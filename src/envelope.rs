use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::Sender;

use crate::codec::{self, ParsedPacket, ProtocolHint};
use crate::error::{ParseError, VerdictError};
use crate::transport::{PacketId, RawPacket, Verdict};

/// A verdict on its way back to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerdictCommand {
    pub id: PacketId,
    pub verdict: Verdict,
    /// Replacement bytes; `None` forwards the original packet.
    pub payload: Option<Vec<u8>>,
}

/// One intercepted packet that must receive exactly one verdict.
///
/// All verdict methods take `&self`; the first one to run wins and every
/// later call, from any thread, fails with [`VerdictError::AlreadyDecided`].
#[derive(Debug)]
pub struct Envelope {
    packet: RawPacket,
    decided: AtomicBool,
    verdicts: Sender<VerdictCommand>,
}

impl Envelope {
    pub fn new(packet: RawPacket, verdicts: Sender<VerdictCommand>) -> Self {
        Self {
            packet,
            decided: AtomicBool::new(false),
            verdicts,
        }
    }

    pub fn id(&self) -> PacketId {
        self.packet.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.packet.payload
    }

    /// Guess from netfilter's hardware protocol, then from the version nibble.
    pub fn protocol_hint(&self) -> Option<ProtocolHint> {
        ProtocolHint::from_ethertype(self.packet.hw_protocol)
            .or_else(|| ProtocolHint::detect(&self.packet.payload).ok())
    }

    /// Decodes the packet bytes; does not touch the verdict state.
    pub fn as_network_packet(&self, hint: ProtocolHint) -> Result<ParsedPacket, ParseError> {
        codec::parse(&self.packet.payload, hint)
    }

    pub fn is_decided(&self) -> bool {
        self.decided.load(Ordering::Acquire)
    }

    pub fn accept(&self) -> Result<(), VerdictError> {
        self.decide(Verdict::Accept, None)
    }

    pub fn drop(&self) -> Result<(), VerdictError> {
        self.decide(Verdict::Drop, None)
    }

    pub fn accept_with_payload(&self, payload: Vec<u8>) -> Result<(), VerdictError> {
        self.decide(Verdict::Accept, Some(payload))
    }

    /// Serializes `packet` and accepts it. A serialization failure leaves the
    /// envelope undecided so the caller can still fall back.
    pub fn accept_with_packet(&self, packet: &ParsedPacket) -> Result<(), VerdictError> {
        let bytes = packet.serialize()?;
        self.accept_with_payload(bytes)
    }

    pub(crate) fn decide(
        &self,
        verdict: Verdict,
        payload: Option<Vec<u8>>,
    ) -> Result<(), VerdictError> {
        let id = self.packet.id;
        if self
            .decided
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(VerdictError::AlreadyDecided(id));
        }
        self.verdicts
            .send(VerdictCommand {
                id,
                verdict,
                payload,
            })
            .map_err(|_| VerdictError::ServiceClosed(id))
    }
}
