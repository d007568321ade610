// Internet checksum (RFC 1071) and pseudo-header helpers.

use std::net::{Ipv4Addr, Ipv6Addr};

/// Adds `bytes` to a running ones'-complement sum as big-endian words.
pub fn add_bytes(mut sum: u32, bytes: &[u8]) -> u32 {
    let mut chunks = bytes.chunks_exact(2);
    for chunk in &mut chunks {
        sum = sum.wrapping_add(u32::from(u16::from_be_bytes([chunk[0], chunk[1]])));
    }
    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add(u32::from(u16::from_be_bytes([*last, 0])));
    }
    sum
}

fn fold(mut sum: u32) -> u16 {
    while (sum >> 16) != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum as u16
}

pub fn finalize_checksum(sum: u32) -> u16 {
    !fold(sum)
}

/// Adjusts `checksum` for `old` having been replaced by `new` inside the
/// covered data (RFC 1624, eqn. 3). Both slices have the same even length.
pub fn update_checksum(checksum: u16, old: &[u8], new: &[u8]) -> u16 {
    let mut sum = u32::from(!checksum);
    for word in old.chunks_exact(2) {
        sum = sum.wrapping_add(u32::from(!u16::from_be_bytes([word[0], word[1]])));
    }
    !fold(add_bytes(sum, new))
}

/// A checksummed region is intact when it sums (checksum included) to 0xffff.
pub fn verify(sum: u32) -> bool {
    fold(sum) == 0xffff
}

/// Addresses of the network layer enclosing a checksum-dependent layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkContext {
    V4 { src: Ipv4Addr, dst: Ipv4Addr },
    V6 { src: Ipv6Addr, dst: Ipv6Addr },
}

impl NetworkContext {
    /// Partial sum of the pseudo-header for an upper-layer segment of `len` bytes.
    pub fn pseudo_header_sum(&self, protocol: u8, len: usize) -> u32 {
        match self {
            NetworkContext::V4 { src, dst } => {
                let mut sum = add_bytes(0, &src.octets());
                sum = add_bytes(sum, &dst.octets());
                sum = sum.wrapping_add(u32::from(protocol));
                sum.wrapping_add(len as u32 & 0xffff)
            }
            NetworkContext::V6 { src, dst } => {
                let len = len as u32;
                let mut sum = add_bytes(0, &src.octets());
                sum = add_bytes(sum, &dst.octets());
                sum = sum.wrapping_add(len >> 16);
                sum = sum.wrapping_add(len & 0xffff);
                sum.wrapping_add(u32::from(protocol))
            }
        }
    }
}
