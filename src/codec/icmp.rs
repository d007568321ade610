use crate::codec::checksum::{NetworkContext, add_bytes, finalize_checksum};
use crate::error::{ParseError, SerializeError};

pub const PROTOCOL_V4: u8 = 1;
pub const PROTOCOL_V6: u8 = 58;
pub const HEADER_LEN: usize = 8;

/// Common ICMP/ICMPv6 header: type, code, checksum and the 4-byte
/// type-specific word (id/seq, MTU, pointer...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpHeader {
    pub icmp_type: u8,
    pub code: u8,
    /// As read from the wire; recomputed on serialize.
    pub checksum: u16,
    pub rest: [u8; 4],
}

impl IcmpHeader {
    pub fn decode(data: &[u8]) -> Result<(Self, &[u8]), ParseError> {
        if data.len() < HEADER_LEN {
            return Err(ParseError::Truncated {
                layer: "ICMP",
                needed: HEADER_LEN,
                available: data.len(),
            });
        }
        let header = Self {
            icmp_type: data[0],
            code: data[1],
            checksum: u16::from_be_bytes([data[2], data[3]]),
            rest: [data[4], data[5], data[6], data[7]],
        };
        Ok((header, &data[HEADER_LEN..]))
    }

    /// ICMPv4 checksums cover only the message; ICMPv6 adds the pseudo-header.
    pub fn write(
        &self,
        net: Option<&NetworkContext>,
        body: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<(), SerializeError> {
        let start = out.len();
        out.push(self.icmp_type);
        out.push(self.code);
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.rest);

        let mut sum = match net {
            Some(net) => net.pseudo_header_sum(PROTOCOL_V6, HEADER_LEN + body.len()),
            None => 0,
        };
        sum = add_bytes(sum, &out[start..]);
        sum = add_bytes(sum, body);
        let checksum = finalize_checksum(sum);
        out[start + 2..start + 4].copy_from_slice(&checksum.to_be_bytes());
        Ok(())
    }
}
