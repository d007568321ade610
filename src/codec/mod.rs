//! Layered IP packet decoding and re-serialization.
//!
//! [`parse`] turns raw bytes into a [`ParsedPacket`]: a network layer, an
//! optional transport layer and an optional payload. Header fields can be
//! edited in place; [`ParsedPacket::serialize`] then rebuilds the bytes with
//! every length and checksum recomputed.

use std::net::Ipv4Addr;

use crate::error::{ParseError, SerializeError};

pub mod checksum;
mod icmp;
mod ipv4;
mod ipv6;
mod tcp;
mod udp;

pub use checksum::NetworkContext;
pub use icmp::IcmpHeader;
pub use ipv4::Ipv4Header;
pub use ipv6::Ipv6Header;
pub use tcp::TcpHeader;
pub use udp::UdpHeader;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86dd;

/// Which network protocol the first byte of a buffer starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolHint {
    Ipv4,
    Ipv6,
}

impl ProtocolHint {
    /// From the hardware protocol netfilter reports alongside the packet.
    pub fn from_ethertype(ethertype: u16) -> Option<Self> {
        match ethertype {
            ETHERTYPE_IPV4 => Some(Self::Ipv4),
            ETHERTYPE_IPV6 => Some(Self::Ipv6),
            _ => None,
        }
    }

    /// From the IP version nibble.
    pub fn detect(data: &[u8]) -> Result<Self, ParseError> {
        match data.first().map(|b| b >> 4) {
            None => Err(ParseError::Empty),
            Some(4) => Ok(Self::Ipv4),
            Some(6) => Ok(Self::Ipv6),
            Some(v) => Err(ParseError::UnsupportedVersion(v)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layer {
    Ipv4(Ipv4Header),
    Ipv6(Ipv6Header),
    Tcp(TcpHeader),
    Udp(UdpHeader),
    Icmpv4(IcmpHeader),
    Icmpv6(IcmpHeader),
    Payload(Vec<u8>),
}

impl Layer {
    pub fn name(&self) -> &'static str {
        match self {
            Layer::Ipv4(_) => "IPv4",
            Layer::Ipv6(_) => "IPv6",
            Layer::Tcp(_) => "TCP",
            Layer::Udp(_) => "UDP",
            Layer::Icmpv4(_) => "ICMPv4",
            Layer::Icmpv6(_) => "ICMPv6",
            Layer::Payload(_) => "Payload",
        }
    }

    /// Set for network layers: the addresses enclosed layers checksum against.
    fn network_context(&self) -> Option<NetworkContext> {
        match self {
            Layer::Ipv4(h) => Some(h.context()),
            Layer::Ipv6(h) => Some(h.context()),
            _ => None,
        }
    }

    fn needs_network_layer(&self) -> bool {
        matches!(self, Layer::Tcp(_) | Layer::Udp(_) | Layer::Icmpv6(_))
    }

    /// Prepends this layer to the already serialized `body`.
    fn serialize(
        &self,
        net: Option<&NetworkContext>,
        body: Vec<u8>,
    ) -> Result<Vec<u8>, SerializeError> {
        let missing = || SerializeError::MissingNetworkLayer(self.name());
        let mut out = Vec::with_capacity(body.len() + 60);
        match self {
            Layer::Ipv4(h) => h.write(body.len(), &mut out)?,
            Layer::Ipv6(h) => h.write(body.len(), &mut out)?,
            Layer::Tcp(h) => h.write(net.ok_or_else(missing)?, &body, &mut out)?,
            Layer::Udp(h) => h.write(net.ok_or_else(missing)?, &body, &mut out)?,
            Layer::Icmpv4(h) => h.write(None, &body, &mut out)?,
            Layer::Icmpv6(h) => h.write(Some(net.ok_or_else(missing)?), &body, &mut out)?,
            Layer::Payload(data) => out.extend_from_slice(data),
        }
        out.extend_from_slice(&body);
        Ok(out)
    }
}

/// Where and why layer decoding stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFailure {
    pub layer: &'static str,
    pub error: ParseError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPacket {
    layers: Vec<Layer>,
    decode_failure: Option<DecodeFailure>,
}

/// Decodes as many layers of `data` as possible.
///
/// Only a failure of the network layer is an error; a transport header that
/// does not decode ends the layer list and is recorded as a [`DecodeFailure`].
pub fn parse(data: &[u8], hint: ProtocolHint) -> Result<ParsedPacket, ParseError> {
    let mut packet = ParsedPacket::default();
    let (next, body, v6) = match hint {
        ProtocolHint::Ipv4 => {
            let (header, body) = Ipv4Header::decode(data)?;
            let next = (!header.is_fragment()).then_some(header.protocol);
            packet.layers.push(Layer::Ipv4(header));
            (next, body, false)
        }
        ProtocolHint::Ipv6 => {
            let (header, body) = Ipv6Header::decode(data)?;
            let next = Some(header.next_header);
            packet.layers.push(Layer::Ipv6(header));
            (next, body, true)
        }
    };

    let decoded = match next {
        Some(tcp::PROTOCOL) => TcpHeader::decode(body).map(|(h, rest)| (Layer::Tcp(h), rest)),
        Some(udp::PROTOCOL) => UdpHeader::decode(body).map(|(h, rest)| (Layer::Udp(h), rest)),
        Some(icmp::PROTOCOL_V4) if !v6 => {
            IcmpHeader::decode(body).map(|(h, rest)| (Layer::Icmpv4(h), rest))
        }
        Some(icmp::PROTOCOL_V6) if v6 => {
            IcmpHeader::decode(body).map(|(h, rest)| (Layer::Icmpv6(h), rest))
        }
        _ => {
            packet.push_payload(body);
            return Ok(packet);
        }
    };

    match decoded {
        Ok((layer, rest)) => {
            packet.layers.push(layer);
            packet.push_payload(rest);
        }
        Err(error) => {
            let layer = match next {
                Some(tcp::PROTOCOL) => "TCP",
                Some(udp::PROTOCOL) => "UDP",
                _ => "ICMP",
            };
            packet.decode_failure = Some(DecodeFailure { layer, error });
        }
    }
    Ok(packet)
}

impl ParsedPacket {
    /// Builds a packet from explicit layers, outermost first.
    pub fn from_layers(layers: Vec<Layer>) -> Self {
        Self {
            layers,
            decode_failure: None,
        }
    }

    fn push_payload(&mut self, data: &[u8]) {
        if !data.is_empty() {
            self.layers.push(Layer::Payload(data.to_vec()));
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    pub fn decode_failure(&self) -> Option<&DecodeFailure> {
        self.decode_failure.as_ref()
    }

    pub fn ipv4(&self) -> Option<&Ipv4Header> {
        self.layers.iter().find_map(|l| match l {
            Layer::Ipv4(h) => Some(h),
            _ => None,
        })
    }

    pub fn ipv4_mut(&mut self) -> Option<&mut Ipv4Header> {
        self.layers.iter_mut().find_map(|l| match l {
            Layer::Ipv4(h) => Some(h),
            _ => None,
        })
    }

    pub fn ipv6(&self) -> Option<&Ipv6Header> {
        self.layers.iter().find_map(|l| match l {
            Layer::Ipv6(h) => Some(h),
            _ => None,
        })
    }

    pub fn ipv6_mut(&mut self) -> Option<&mut Ipv6Header> {
        self.layers.iter_mut().find_map(|l| match l {
            Layer::Ipv6(h) => Some(h),
            _ => None,
        })
    }

    pub fn tcp(&self) -> Option<&TcpHeader> {
        self.layers.iter().find_map(|l| match l {
            Layer::Tcp(h) => Some(h),
            _ => None,
        })
    }

    pub fn udp(&self) -> Option<&UdpHeader> {
        self.layers.iter().find_map(|l| match l {
            Layer::Udp(h) => Some(h),
            _ => None,
        })
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.layers.iter().find_map(|l| match l {
            Layer::Payload(data) => Some(data.as_slice()),
            _ => None,
        })
    }

    /// Carries an IPv4 address change into the transport checksum of a
    /// datagram's first fragment, whose transport header stays undecoded in
    /// the payload. Returns whether a checksum was patched.
    pub fn patch_first_fragment(&mut self, old: Ipv4Addr, new: Ipv4Addr) -> bool {
        let [Layer::Ipv4(ip), Layer::Payload(body), ..] = self.layers.as_mut_slice() else {
            return false;
        };
        if !ip.is_first_fragment() {
            return false;
        }
        let (offset, udp) = match ip.protocol {
            tcp::PROTOCOL => (16, false),
            udp::PROTOCOL => (6, true),
            _ => return false,
        };
        let Some(field) = body.get_mut(offset..offset + 2) else {
            return false;
        };
        let current = u16::from_be_bytes([field[0], field[1]]);
        if udp && current == 0 {
            // checksum disabled
            return false;
        }
        let updated = match checksum::update_checksum(current, &old.octets(), &new.octets()) {
            0 if udp => 0xffff,
            c => c,
        };
        field.copy_from_slice(&updated.to_be_bytes());
        true
    }

    /// Rebuilds the wire bytes, recomputing lengths and checksums.
    ///
    /// Pass one binds every checksum-dependent layer to the nearest network
    /// layer above it; pass two writes the layers innermost first so each one
    /// sees its final body.
    pub fn serialize(&self) -> Result<Vec<u8>, SerializeError> {
        if let Some(failure) = &self.decode_failure {
            return Err(SerializeError::IncompleteDecode(failure.layer));
        }

        let mut bound = Vec::with_capacity(self.layers.len());
        let mut net = None;
        for layer in &self.layers {
            if let Some(ctx) = layer.network_context() {
                net = Some(ctx);
            }
            if layer.needs_network_layer() && net.is_none() {
                return Err(SerializeError::MissingNetworkLayer(layer.name()));
            }
            bound.push(net);
        }

        let mut bytes = Vec::new();
        for (layer, net) in self.layers.iter().zip(&bound).rev() {
            bytes = layer.serialize(net.as_ref(), bytes)?;
        }
        Ok(bytes)
    }
}

/// Result of [`validate_checksums`]; `None` where no checksum applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumReport {
    pub network: Option<bool>,
    pub transport: Option<bool>,
}

impl ChecksumReport {
    pub fn is_valid(&self) -> bool {
        self.network != Some(false) && self.transport != Some(false)
    }
}

/// Checks the IPv4 header checksum and the transport checksum of raw bytes.
pub fn validate_checksums(data: &[u8]) -> Result<ChecksumReport, ParseError> {
    use crate::codec::checksum::{add_bytes, verify};

    let (net, protocol, segment, network) = match ProtocolHint::detect(data)? {
        ProtocolHint::Ipv4 => {
            let (header, body) = Ipv4Header::decode(data)?;
            let network = Some(verify(add_bytes(0, &data[..header.header_len()])));
            if header.is_fragment() {
                return Ok(ChecksumReport {
                    network,
                    transport: None,
                });
            }
            (header.context(), header.protocol, body, network)
        }
        ProtocolHint::Ipv6 => {
            let (header, body) = Ipv6Header::decode(data)?;
            (header.context(), header.next_header, body, None)
        }
    };
    let v6 = matches!(net, NetworkContext::V6 { .. });

    let transport = match protocol {
        tcp::PROTOCOL if segment.len() >= tcp::MIN_HEADER_LEN => Some(verify(add_bytes(
            net.pseudo_header_sum(protocol, segment.len()),
            segment,
        ))),
        udp::PROTOCOL if segment.len() >= udp::HEADER_LEN => {
            if !v6 && segment[6] == 0 && segment[7] == 0 {
                // checksum disabled
                Some(true)
            } else {
                Some(verify(add_bytes(
                    net.pseudo_header_sum(protocol, segment.len()),
                    segment,
                )))
            }
        }
        icmp::PROTOCOL_V4 if !v6 && segment.len() >= icmp::HEADER_LEN => {
            Some(verify(add_bytes(0, segment)))
        }
        icmp::PROTOCOL_V6 if v6 && segment.len() >= icmp::HEADER_LEN => Some(verify(add_bytes(
            net.pseudo_header_sum(protocol, segment.len()),
            segment,
        ))),
        _ => None,
    };

    Ok(ChecksumReport { network, transport })
}
