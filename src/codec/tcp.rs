use crate::codec::checksum::{NetworkContext, add_bytes, finalize_checksum};
use crate::error::{ParseError, SerializeError};

pub const PROTOCOL: u8 = 6;
pub const MIN_HEADER_LEN: usize = 20;
const MAX_HEADER_LEN: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    /// NS plus the eight classic flag bits (CWR..FIN).
    pub flags: u16,
    pub window: u16,
    /// As read from the wire; recomputed on serialize.
    pub checksum: u16,
    pub urgent: u16,
    pub options: Vec<u8>,
}

impl TcpHeader {
    pub fn decode(data: &[u8]) -> Result<(Self, &[u8]), ParseError> {
        if data.len() < MIN_HEADER_LEN {
            return Err(ParseError::Truncated {
                layer: "TCP",
                needed: MIN_HEADER_LEN,
                available: data.len(),
            });
        }
        // Data offset sits in the high nibble of byte 12, in 32-bit words.
        let data_offset = (data[12] >> 4) as usize * 4;
        if data_offset < MIN_HEADER_LEN {
            return Err(ParseError::BadHeaderLength {
                layer: "TCP",
                value: data_offset,
            });
        }
        if data.len() < data_offset {
            return Err(ParseError::Truncated {
                layer: "TCP options",
                needed: data_offset,
                available: data.len(),
            });
        }

        let header = Self {
            src_port: u16::from_be_bytes([data[0], data[1]]),
            dst_port: u16::from_be_bytes([data[2], data[3]]),
            seq: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ack: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            flags: (u16::from(data[12] & 0x01) << 8) | u16::from(data[13]),
            window: u16::from_be_bytes([data[14], data[15]]),
            checksum: u16::from_be_bytes([data[16], data[17]]),
            urgent: u16::from_be_bytes([data[18], data[19]]),
            options: data[MIN_HEADER_LEN..data_offset].to_vec(),
        };
        Ok((header, &data[data_offset..]))
    }

    pub fn header_len(&self) -> usize {
        MIN_HEADER_LEN + self.options.len().div_ceil(4) * 4
    }

    /// Writes the header for `body`, with the data offset and the
    /// pseudo-header checksum filled in.
    pub fn write(
        &self,
        net: &NetworkContext,
        body: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<(), SerializeError> {
        let header_len = self.header_len();
        if header_len > MAX_HEADER_LEN {
            return Err(SerializeError::TooLarge {
                layer: "TCP options",
                len: self.options.len(),
            });
        }

        let start = out.len();
        out.extend_from_slice(&self.src_port.to_be_bytes());
        out.extend_from_slice(&self.dst_port.to_be_bytes());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.ack.to_be_bytes());
        out.push((((header_len / 4) as u8) << 4) | ((self.flags >> 8) as u8 & 0x01));
        out.push(self.flags as u8);
        out.extend_from_slice(&self.window.to_be_bytes());
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.urgent.to_be_bytes());
        out.extend_from_slice(&self.options);
        out.resize(start + header_len, 0);

        let mut sum = net.pseudo_header_sum(PROTOCOL, header_len + body.len());
        sum = add_bytes(sum, &out[start..]);
        sum = add_bytes(sum, body);
        let checksum = finalize_checksum(sum);
        out[start + 16..start + 18].copy_from_slice(&checksum.to_be_bytes());
        Ok(())
    }
}
