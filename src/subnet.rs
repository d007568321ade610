// Host-preserving address mapping between two subnets of equal size.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use crate::error::{ConfigError, MapError};

const IPV4_BITS: u8 = 32;

/// Mask covering the host bits of a `/prefix_len` network.
pub fn host_mask(prefix_len: u8) -> u32 {
    let host_bits = IPV4_BITS.saturating_sub(prefix_len) as u32;
    // host_bits == 32 would overflow the shift
    1u32.checked_shl(host_bits).map_or(u32::MAX, |v| v - 1)
}

/// Moves `addr` into the network of `to_base`, keeping its host bits.
///
/// Host `x` of the source subnet becomes host `x` of the target subnet. Both
/// prefix lengths must match; the number of host bits never changes.
pub fn rewrite(
    addr: IpAddr,
    from_prefix_len: u8,
    to_base: IpAddr,
    to_prefix_len: u8,
) -> Result<Ipv4Addr, MapError> {
    if from_prefix_len != to_prefix_len {
        return Err(MapError::PrefixMismatch {
            from: from_prefix_len,
            to: to_prefix_len,
        });
    }
    if to_prefix_len > IPV4_BITS {
        return Err(MapError::InvalidAddress(format!(
            "prefix length {to_prefix_len} exceeds {IPV4_BITS}"
        )));
    }
    let (IpAddr::V4(addr), IpAddr::V4(to_base)) = (addr, to_base) else {
        return Err(MapError::InvalidAddress(format!(
            "{addr} -> {to_base}: only IPv4 is supported"
        )));
    };

    let mask = host_mask(to_prefix_len);
    let host_id = addr.to_bits() & mask;
    Ok(Ipv4Addr::from_bits((to_base.to_bits() & !mask) | host_id))
}

/// Same as [`rewrite`] for an address still in wire form.
pub fn rewrite_octets(
    octets: &[u8],
    from_prefix_len: u8,
    to_base: IpAddr,
    to_prefix_len: u8,
) -> Result<Ipv4Addr, MapError> {
    let octets: [u8; 4] = octets.try_into().map_err(|_| {
        MapError::InvalidAddress(format!("expected 4 address bytes, got {}", octets.len()))
    })?;
    rewrite(
        IpAddr::V4(Ipv4Addr::from(octets)),
        from_prefix_len,
        to_base,
        to_prefix_len,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet {
    base: Ipv4Addr,
    prefix_len: u8,
}

impl Subnet {
    /// The base address is masked down to the network address.
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self, ConfigError> {
        if prefix_len > IPV4_BITS {
            return Err(ConfigError::InvalidSubnet {
                input: format!("{addr}/{prefix_len}"),
                reason: format!("prefix length must be at most {IPV4_BITS}"),
            });
        }
        let base = Ipv4Addr::from_bits(addr.to_bits() & !host_mask(prefix_len));
        Ok(Self { base, prefix_len })
    }

    pub fn base(&self) -> Ipv4Addr {
        self.base
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let mask = !host_mask(self.prefix_len);
        addr.to_bits() & mask == self.base.to_bits()
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.prefix_len)
    }
}

impl FromStr for Subnet {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidSubnet {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let (addr, prefix) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| invalid("expected CIDR notation a.b.c.d/len"))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| invalid("not an IPv4 address"))?;
        let prefix_len: u8 = prefix
            .parse()
            .map_err(|_| invalid("prefix length is not a number"))?;
        if prefix_len > IPV4_BITS {
            return Err(invalid("prefix length must be at most 32"));
        }
        Self::new(addr, prefix_len)
    }
}

/// A validated `from`/`to` pair.
///
/// Without a `from` filter every address is in scope and is mapped into `to`
/// using the target's prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressMapper {
    from: Option<Subnet>,
    to: Subnet,
}

impl AddressMapper {
    pub fn new(from: Option<Subnet>, to: Subnet) -> Result<Self, ConfigError> {
        if let Some(from) = from {
            if from.prefix_len() != to.prefix_len() {
                return Err(ConfigError::PrefixMismatch {
                    from: from.prefix_len(),
                    to: to.prefix_len(),
                });
            }
        }
        Ok(Self { from, to })
    }

    pub fn from(&self) -> Option<Subnet> {
        self.from
    }

    pub fn to(&self) -> Subnet {
        self.to
    }

    /// True if `addr` passes the `from` filter.
    pub fn in_scope(&self, addr: Ipv4Addr) -> bool {
        self.from.is_none_or(|from| from.contains(addr))
    }

    pub fn map(&self, addr: Ipv4Addr) -> Result<Ipv4Addr, MapError> {
        let from_prefix_len = self.from.map_or(self.to.prefix_len(), |f| f.prefix_len());
        rewrite(
            IpAddr::V4(addr),
            from_prefix_len,
            IpAddr::V4(self.to.base()),
            self.to.prefix_len(),
        )
    }

    /// The mapper for the return direction (`to` back into `from`).
    pub fn reversed(&self) -> Option<Self> {
        self.from.map(|from| Self {
            from: Some(self.to),
            to: from,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn host_mask_edges() {
        assert_eq!(host_mask(32), 0);
        assert_eq!(host_mask(24), 0xff);
        assert_eq!(host_mask(16), 0xffff);
        assert_eq!(host_mask(0), u32::MAX);
    }

    #[test]
    fn rewrite_keeps_host_bits() {
        let out = rewrite(v4(10, 0, 0, 42), 24, v4(10, 0, 1, 0), 24).unwrap();
        assert_eq!(out, Ipv4Addr::new(10, 0, 1, 42));
    }

    #[test]
    fn rewrite_masks_unaligned_target_base() {
        // A target base with host bits set must not leak them into the result.
        let out = rewrite(v4(10, 0, 0, 7), 24, v4(172, 16, 5, 99), 24).unwrap();
        assert_eq!(out, Ipv4Addr::new(172, 16, 5, 7));
    }

    #[test]
    fn rewrite_rejects_prefix_mismatch() {
        let err = rewrite(v4(10, 0, 0, 1), 24, v4(10, 0, 1, 0), 16).unwrap_err();
        assert_eq!(err, MapError::PrefixMismatch { from: 24, to: 16 });
    }

    #[test]
    fn rewrite_rejects_ipv6() {
        let addr: IpAddr = "fd00::1".parse().unwrap();
        let err = rewrite(addr, 24, v4(10, 0, 1, 0), 24).unwrap_err();
        assert!(matches!(err, MapError::InvalidAddress(_)));
    }

    #[test]
    fn rewrite_octets_rejects_wrong_length() {
        let err = rewrite_octets(&[10, 0, 0], 24, v4(10, 0, 1, 0), 24).unwrap_err();
        assert!(matches!(err, MapError::InvalidAddress(_)));
        let ok = rewrite_octets(&[10, 0, 0, 9], 24, v4(10, 0, 1, 0), 24).unwrap();
        assert_eq!(ok, Ipv4Addr::new(10, 0, 1, 9));
    }

    #[test]
    fn subnet_parses_and_masks() {
        let s: Subnet = "10.0.1.77/24".parse().unwrap();
        assert_eq!(s.base(), Ipv4Addr::new(10, 0, 1, 0));
        assert_eq!(s.prefix_len(), 24);
        assert_eq!(s.to_string(), "10.0.1.0/24");
        assert!(s.contains(Ipv4Addr::new(10, 0, 1, 200)));
        assert!(!s.contains(Ipv4Addr::new(10, 0, 2, 1)));
    }

    #[test]
    fn subnet_rejects_garbage() {
        for bad in ["", "10.0.0.0", "10.0.0.0/33", "10.0.0/24", "fd00::/64", "x/y"] {
            assert!(
                matches!(bad.parse::<Subnet>(), Err(ConfigError::InvalidSubnet { .. })),
                "{bad} should not parse"
            );
        }
    }

    #[test]
    fn mapper_rejects_mismatched_prefixes() {
        let from: Subnet = "10.0.0.0/24".parse().unwrap();
        let to: Subnet = "10.0.1.0/16".parse().unwrap();
        let err = AddressMapper::new(Some(from), to).unwrap_err();
        assert!(matches!(err, ConfigError::PrefixMismatch { from: 24, to: 16 }));
    }

    #[test]
    fn mapper_without_filter_maps_everything() {
        let to: Subnet = "10.0.1.0/24".parse().unwrap();
        let mapper = AddressMapper::new(None, to).unwrap();
        assert!(mapper.in_scope(Ipv4Addr::new(192, 168, 1, 5)));
        assert_eq!(
            mapper.map(Ipv4Addr::new(192, 168, 1, 5)),
            Ok(Ipv4Addr::new(10, 0, 1, 5))
        );
        assert!(mapper.reversed().is_none());
    }

    #[test]
    fn mapper_filter_miss() {
        let mapper = AddressMapper::new(
            Some("10.0.0.0/24".parse().unwrap()),
            "10.0.1.0/24".parse().unwrap(),
        )
        .unwrap();
        assert!(mapper.in_scope(Ipv4Addr::new(10, 0, 0, 42)));
        assert!(!mapper.in_scope(Ipv4Addr::new(192, 168, 1, 5)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn mapping_is_a_bijection(
            from_base in any::<u32>(),
            to_base in any::<u32>(),
            host in any::<u32>(),
            prefix in 0u8..=32,
        ) {
            let from = Subnet::new(Ipv4Addr::from_bits(from_base), prefix).unwrap();
            let to = Subnet::new(Ipv4Addr::from_bits(to_base), prefix).unwrap();
            let addr = Ipv4Addr::from_bits(from.base().to_bits() | (host & host_mask(prefix)));
            prop_assert!(from.contains(addr));

            let there = rewrite(IpAddr::V4(addr), prefix, IpAddr::V4(to.base()), prefix).unwrap();
            prop_assert!(to.contains(there));
            let back = rewrite(IpAddr::V4(there), prefix, IpAddr::V4(from.base()), prefix).unwrap();
            prop_assert_eq!(back, addr);

            let mapper = AddressMapper::new(Some(from), to).unwrap();
            prop_assert_eq!(mapper.map(addr), Ok(there));
            prop_assert_eq!(mapper.reversed().unwrap().map(there), Ok(addr));
        }
    }
}
