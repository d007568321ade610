use std::collections::HashMap;
use std::io;

use nfq::{Message, Queue};

use crate::error::TransportError;
use crate::service::ServiceConfig;
use crate::transport::{PacketId, PacketTransport, RawPacket, Verdict};

/// NFQUEUE subscription. Received messages are parked here until their
/// verdict comes back, since `nfq` needs the original message to reply.
pub struct NfqTransport {
    queue: Queue,
    queue_num: u16,
    pending: HashMap<u32, Message>,
}

impl NfqTransport {
    pub fn open(config: &ServiceConfig) -> Result<Self, TransportError> {
        let queue_num = config.queue_num();
        let open_err = |source: io::Error| TransportError::Open {
            queue: queue_num,
            source,
        };

        let mut queue = Queue::open().map_err(open_err)?;
        queue.bind(queue_num).map_err(open_err)?;
        // Copy the whole packet, up to the configured limit.
        let copy_range = config.max_packet_len().min(u32::from(u16::MAX)) as u16;
        queue.set_copy_range(queue_num, copy_range).map_err(open_err)?;
        queue
            .set_queue_max_len(queue_num, config.max_queue_len())
            .map_err(open_err)?;
        queue
            .set_recv_enobufs(config.enobufs_enabled())
            .map_err(open_err)?;
        // Verdict writes share the socket, so they never wait either.
        queue.set_nonblocking(true);

        Ok(Self {
            queue,
            queue_num,
            pending: HashMap::new(),
        })
    }
}

impl PacketTransport for NfqTransport {
    fn recv(&mut self) -> Result<Option<RawPacket>, TransportError> {
        match self.queue.recv() {
            Ok(msg) => {
                let id = msg.get_packet_id();
                let packet = RawPacket {
                    id: PacketId(id),
                    payload: msg.get_payload().to_vec(),
                    hw_protocol: msg.get_hw_protocol(),
                };
                self.pending.insert(id, msg);
                Ok(Some(packet))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.raw_os_error() == Some(libc::ENOBUFS) => Err(TransportError::Overrun),
            Err(e) => Err(TransportError::Recv(e)),
        }
    }

    fn verdict(
        &mut self,
        id: PacketId,
        verdict: Verdict,
        payload: Option<Vec<u8>>,
    ) -> Result<(), TransportError> {
        let mut msg = self
            .pending
            .remove(&id.0)
            .ok_or(TransportError::UnknownPacket(id))?;
        msg.set_verdict(match verdict {
            Verdict::Accept => nfq::Verdict::Accept,
            Verdict::Drop => nfq::Verdict::Drop,
        });
        if let Some(payload) = payload {
            msg.set_payload(payload);
        }
        // One send per verdict; `nfq` consumes the message, so a failure is final.
        self.queue.verdict(msg).map_err(|e| match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::WriteTimeout(id),
            _ => TransportError::Write { id, source: e },
        })
    }

    fn close(&mut self) -> Result<(), TransportError> {
        // The kernel resolves whatever is still queued once we unbind.
        self.pending.clear();
        self.queue
            .unbind(self.queue_num)
            .map_err(TransportError::Unbind)
    }
}
