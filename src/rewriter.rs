//! Subnet-to-subnet address rewriting for IPv4 packets.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::codec::{self, ProtocolHint};
use crate::envelope::Envelope;
use crate::error::{ConfigError, MapError, RewriteError};
use crate::service::PacketHandler;
use crate::subnet::{AddressMapper, Subnet, host_mask};

/// Which address of the packet gets rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Rewrites the destination.
    Egress = 1,
    /// Rewrites the source.
    Ingress = 2,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Egress => f.write_str("egress"),
            Mode::Ingress => f.write_str("ingress"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "egress" => Ok(Mode::Egress),
            "2" | "ingress" => Ok(Mode::Ingress),
            other => Err(format!("unknown mode '{other}', expected 1 (egress) or 2 (ingress)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteConfig {
    mode: Mode,
    mapper: AddressMapper,
}

impl RewriteConfig {
    pub fn new(mode: Mode, from: Option<Subnet>, to: Subnet) -> Result<Self, ConfigError> {
        Ok(Self {
            mode,
            mapper: AddressMapper::new(from, to)?,
        })
    }

    /// Parses the CIDR strings, `from` first, then checks the prefix lengths.
    pub fn parse(mode: Mode, from: Option<&str>, to: &str) -> Result<Self, ConfigError> {
        let from = from.map(str::parse::<Subnet>).transpose()?;
        let to: Subnet = to.parse()?;
        Self::new(mode, from, to)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn mapper(&self) -> &AddressMapper {
        &self.mapper
    }
}

/// What happened to one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Not an IPv4 packet the rewriter can read; left to the default verdict.
    Skipped,
    /// Outside the `from` filter; accepted unchanged.
    OutOfScope,
    /// Accepted with the rewritten address.
    Rewritten { old: Ipv4Addr, new: Ipv4Addr },
    /// Rewrite abandoned; the original bytes were accepted.
    Unmodified,
}

#[derive(Debug, Clone)]
pub struct SubnetRewriter {
    config: RewriteConfig,
}

impl SubnetRewriter {
    pub fn new(config: RewriteConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RewriteConfig {
        &self.config
    }

    /// Rewrites one packet and issues its verdict, unless it is skipped.
    pub fn process(&self, packet: &Envelope) -> Result<Outcome, RewriteError> {
        let id = packet.id();
        let mut parsed = match packet.as_network_packet(ProtocolHint::Ipv4) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::debug!("packet {id}: not rewritable: {e}");
                return Ok(Outcome::Skipped);
            }
        };
        let Some(ip) = parsed.ipv4_mut() else {
            return Ok(Outcome::Skipped);
        };
        log::debug!("packet source: {} packet destination: {}", ip.src, ip.dst);

        let target = match self.config.mode {
            Mode::Egress => &mut ip.dst,
            Mode::Ingress => &mut ip.src,
        };
        let mapper = &self.config.mapper;
        if !mapper.in_scope(*target) {
            packet.accept()?;
            return Ok(Outcome::OutOfScope);
        }

        let old = *target;
        let new = match mapper.map(old) {
            Ok(new) => new,
            Err(e @ MapError::InvalidAddress(_)) => {
                log::debug!("packet {id}: {e}");
                packet.accept()?;
                return Ok(Outcome::OutOfScope);
            }
            // AddressMapper::new already rejected unequal prefixes.
            Err(e @ MapError::PrefixMismatch { .. }) => {
                log::warn!("packet {id}: {e}");
                packet.accept()?;
                return Ok(Outcome::Unmodified);
            }
        };
        *target = new;

        let mask = host_mask(mapper.to().prefix_len());
        log::debug!(
            "mask: {:x} host id: {:x} src: {} dst: {}",
            mask,
            old.to_bits() & mask,
            ip.src,
            ip.dst
        );
        if parsed.patch_first_fragment(old, new) {
            log::debug!("packet {id}: patched transport checksum of first fragment");
        }

        let bytes = match parsed.serialize() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("packet {id}: rewrite abandoned, forwarding original: {e}");
                packet.accept()?;
                return Ok(Outcome::Unmodified);
            }
        };
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("packet {id}: checksums {:?}", codec::validate_checksums(&bytes));
        }
        packet.accept_with_payload(bytes)?;
        Ok(Outcome::Rewritten { old, new })
    }
}

impl PacketHandler for SubnetRewriter {
    type Error = RewriteError;

    fn handle(&self, packet: &Envelope) -> Result<(), RewriteError> {
        self.process(packet).map(|_| ())
    }
}
