use crate::codec::checksum::{NetworkContext, add_bytes, finalize_checksum};
use crate::error::{ParseError, SerializeError};

pub const PROTOCOL: u8 = 17;
pub const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    /// As read from the wire; recomputed on serialize.
    pub length: u16,
    /// As read from the wire; recomputed on serialize.
    pub checksum: u16,
}

impl UdpHeader {
    pub fn decode(data: &[u8]) -> Result<(Self, &[u8]), ParseError> {
        if data.len() < HEADER_LEN {
            return Err(ParseError::Truncated {
                layer: "UDP",
                needed: HEADER_LEN,
                available: data.len(),
            });
        }
        let header = Self {
            src_port: u16::from_be_bytes([data[0], data[1]]),
            dst_port: u16::from_be_bytes([data[2], data[3]]),
            length: u16::from_be_bytes([data[4], data[5]]),
            checksum: u16::from_be_bytes([data[6], data[7]]),
        };
        Ok((header, &data[HEADER_LEN..]))
    }

    pub fn write(
        &self,
        net: &NetworkContext,
        body: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<(), SerializeError> {
        let length =
            u16::try_from(HEADER_LEN + body.len()).map_err(|_| SerializeError::TooLarge {
                layer: "UDP",
                len: HEADER_LEN + body.len(),
            })?;

        let start = out.len();
        out.extend_from_slice(&self.src_port.to_be_bytes());
        out.extend_from_slice(&self.dst_port.to_be_bytes());
        out.extend_from_slice(&length.to_be_bytes());
        out.extend_from_slice(&[0, 0]);

        let mut sum = net.pseudo_header_sum(PROTOCOL, length as usize);
        sum = add_bytes(sum, &out[start..]);
        sum = add_bytes(sum, body);
        // Zero means "no checksum" on the wire; a computed zero goes out as all ones.
        let checksum = match finalize_checksum(sum) {
            0 => 0xffff,
            c => c,
        };
        out[start + 6..start + 8].copy_from_slice(&checksum.to_be_bytes());
        Ok(())
    }
}
