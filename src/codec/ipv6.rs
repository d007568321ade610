use std::net::Ipv6Addr;

use crate::codec::checksum::NetworkContext;
use crate::error::{ParseError, SerializeError};

pub const HEADER_LEN: usize = 40;

/// Fixed IPv6 header. Extension headers are left in the body undecoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv6Header {
    pub traffic_class: u8,
    pub flow_label: u32,
    /// As read from the wire; recomputed on serialize.
    pub payload_length: u16,
    pub next_header: u8,
    pub hop_limit: u8,
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
}

impl Ipv6Header {
    pub fn decode(data: &[u8]) -> Result<(Self, &[u8]), ParseError> {
        if data.is_empty() {
            return Err(ParseError::Empty);
        }
        let version = data[0] >> 4;
        if version != 6 {
            return Err(ParseError::UnsupportedVersion(version));
        }
        if data.len() < HEADER_LEN {
            return Err(ParseError::Truncated {
                layer: "IPv6",
                needed: HEADER_LEN,
                available: data.len(),
            });
        }

        let payload_length = u16::from_be_bytes([data[4], data[5]]);
        let end = HEADER_LEN + payload_length as usize;
        if data.len() < end {
            return Err(ParseError::Truncated {
                layer: "IPv6 payload",
                needed: end,
                available: data.len(),
            });
        }

        let mut src = [0u8; 16];
        src.copy_from_slice(&data[8..24]);
        let mut dst = [0u8; 16];
        dst.copy_from_slice(&data[24..40]);

        let header = Self {
            traffic_class: (data[0] << 4) | (data[1] >> 4),
            flow_label: u32::from_be_bytes([0, data[1] & 0x0f, data[2], data[3]]),
            payload_length,
            next_header: data[6],
            hop_limit: data[7],
            src: Ipv6Addr::from(src),
            dst: Ipv6Addr::from(dst),
        };
        Ok((header, &data[HEADER_LEN..end]))
    }

    pub fn context(&self) -> NetworkContext {
        NetworkContext::V6 {
            src: self.src,
            dst: self.dst,
        }
    }

    pub fn write(&self, body_len: usize, out: &mut Vec<u8>) -> Result<(), SerializeError> {
        let payload_length = u16::try_from(body_len).map_err(|_| SerializeError::TooLarge {
            layer: "IPv6",
            len: body_len,
        })?;
        out.push(0x60 | (self.traffic_class >> 4));
        out.push((self.traffic_class << 4) | ((self.flow_label >> 16) & 0x0f) as u8);
        out.extend_from_slice(&(self.flow_label as u16).to_be_bytes());
        out.extend_from_slice(&payload_length.to_be_bytes());
        out.push(self.next_header);
        out.push(self.hop_limit);
        out.extend_from_slice(&self.src.octets());
        out.extend_from_slice(&self.dst.octets());
        Ok(())
    }
}
