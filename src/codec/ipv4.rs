use std::net::Ipv4Addr;

use crate::codec::checksum::{NetworkContext, add_bytes, finalize_checksum};
use crate::error::{ParseError, SerializeError};

pub const MIN_HEADER_LEN: usize = 20;
const MAX_HEADER_LEN: usize = 60;

// Flags live in the top 3 bits of bytes 6..8, the fragment offset below them.
const FLAG_MORE_FRAGMENTS: u8 = 0b001;
const FRAGMENT_OFFSET_MASK: u16 = 0x1fff;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub tos: u8,
    /// As read from the wire; recomputed on serialize.
    pub total_length: u16,
    pub identification: u16,
    pub flags: u8,
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    /// As read from the wire; recomputed on serialize.
    pub checksum: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub options: Vec<u8>,
}

impl Ipv4Header {
    /// Decodes the header and returns it with the datagram body.
    ///
    /// Bytes past `total_length` (link-layer padding) are not part of the body.
    pub fn decode(data: &[u8]) -> Result<(Self, &[u8]), ParseError> {
        if data.is_empty() {
            return Err(ParseError::Empty);
        }
        // The top 4 bits of byte 0 are the version.
        let version = data[0] >> 4;
        if version != 4 {
            return Err(ParseError::UnsupportedVersion(version));
        }
        if data.len() < MIN_HEADER_LEN {
            return Err(ParseError::Truncated {
                layer: "IPv4",
                needed: MIN_HEADER_LEN,
                available: data.len(),
            });
        }

        // IHL counts 32-bit words.
        let ihl = (data[0] & 0x0f) as usize * 4;
        if ihl < MIN_HEADER_LEN {
            return Err(ParseError::BadHeaderLength {
                layer: "IPv4",
                value: ihl,
            });
        }
        if data.len() < ihl {
            return Err(ParseError::Truncated {
                layer: "IPv4",
                needed: ihl,
                available: data.len(),
            });
        }

        let total_length = u16::from_be_bytes([data[2], data[3]]);
        let total = total_length as usize;
        if total < ihl {
            return Err(ParseError::BadHeaderLength {
                layer: "IPv4 total length",
                value: total,
            });
        }
        if data.len() < total {
            return Err(ParseError::Truncated {
                layer: "IPv4 datagram",
                needed: total,
                available: data.len(),
            });
        }

        let flags_frag = u16::from_be_bytes([data[6], data[7]]);
        let header = Self {
            tos: data[1],
            total_length,
            identification: u16::from_be_bytes([data[4], data[5]]),
            flags: (flags_frag >> 13) as u8,
            fragment_offset: flags_frag & FRAGMENT_OFFSET_MASK,
            ttl: data[8],
            protocol: data[9],
            checksum: u16::from_be_bytes([data[10], data[11]]),
            src: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            dst: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
            options: data[MIN_HEADER_LEN..ihl].to_vec(),
        };
        Ok((header, &data[ihl..total]))
    }

    /// True for any piece of a fragmented datagram; the transport header is
    /// either absent or cannot be checksummed on its own.
    pub fn is_fragment(&self) -> bool {
        self.fragment_offset != 0 || self.flags & FLAG_MORE_FRAGMENTS != 0
    }

    /// The leading piece of a fragmented datagram, which still carries the
    /// transport header.
    pub fn is_first_fragment(&self) -> bool {
        self.fragment_offset == 0 && self.flags & FLAG_MORE_FRAGMENTS != 0
    }

    /// Header length with options padded to a 32-bit boundary.
    pub fn header_len(&self) -> usize {
        MIN_HEADER_LEN + self.options.len().div_ceil(4) * 4
    }

    pub fn context(&self) -> NetworkContext {
        NetworkContext::V4 {
            src: self.src,
            dst: self.dst,
        }
    }

    /// Writes the header for a body of `body_len` bytes, fixing IHL, total
    /// length and the header checksum.
    pub fn write(&self, body_len: usize, out: &mut Vec<u8>) -> Result<(), SerializeError> {
        let header_len = self.header_len();
        if header_len > MAX_HEADER_LEN {
            return Err(SerializeError::TooLarge {
                layer: "IPv4 options",
                len: self.options.len(),
            });
        }
        let total_length =
            u16::try_from(header_len + body_len).map_err(|_| SerializeError::TooLarge {
                layer: "IPv4",
                len: header_len + body_len,
            })?;

        let start = out.len();
        out.push(0x40 | (header_len / 4) as u8);
        out.push(self.tos);
        out.extend_from_slice(&total_length.to_be_bytes());
        out.extend_from_slice(&self.identification.to_be_bytes());
        let flags_frag =
            (u16::from(self.flags & 0b111) << 13) | (self.fragment_offset & FRAGMENT_OFFSET_MASK);
        out.extend_from_slice(&flags_frag.to_be_bytes());
        out.push(self.ttl);
        out.push(self.protocol);
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&self.src.octets());
        out.extend_from_slice(&self.dst.octets());
        out.extend_from_slice(&self.options);
        out.resize(start + header_len, 0);

        let checksum = finalize_checksum(add_bytes(0, &out[start..]));
        out[start + 10..start + 12].copy_from_slice(&checksum.to_be_bytes());
        Ok(())
    }
}
