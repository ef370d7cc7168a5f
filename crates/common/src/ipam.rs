use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use parking_lot::Mutex;

/// Host offset handed out before the first `take`.
///  Offset 1 is left to the network gateway, so the
///  first allocated address is always `<network>.2`.
const GATEWAY_OFFSET: u64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum IpamError {
    #[error("invalid cidr: {0}")]
    InvalidCidr(String),
    #[error("address space of {0} is exhausted")]
    AddressSpaceExhausted(Cidr),
}

/// An IPv4 network block, always stored with its host bits masked off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

impl Cidr {
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix
    }

    /// Number of addresses covered by the block, including
    ///  the network and broadcast addresses
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix))
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let mask = mask(self.prefix);
        u32::from(ip) & mask == u32::from(self.network)
    }

    fn offset(&self, offset: u64) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) + offset as u32)
    }
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

impl FromStr for Cidr {
    type Err = IpamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| IpamError::InvalidCidr(s.to_string()))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| IpamError::InvalidCidr(s.to_string()))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| IpamError::InvalidCidr(s.to_string()))?;
        if prefix > 32 {
            return Err(IpamError::InvalidCidr(s.to_string()));
        }
        Ok(Self {
            network: Ipv4Addr::from(u32::from(addr) & mask(prefix)),
            prefix,
        })
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Sequential address allocator over a single CIDR block.
///
/// Addresses are never returned to the pool: every call to
///  [`Ipam::take`] yields an address that no earlier call
///  produced, until the host range runs out.
#[derive(Debug)]
pub struct Ipam {
    cidr: Cidr,
    given: Mutex<u64>,
}

impl Ipam {
    pub fn new(cidr: &str) -> Result<Self, IpamError> {
        Ok(Self {
            cidr: cidr.parse()?,
            given: Mutex::new(GATEWAY_OFFSET),
        })
    }

    pub fn cidr(&self) -> Cidr {
        self.cidr
    }

    /// Allocate the next address in the block
    pub fn take(&self) -> Result<Ipv4Addr, IpamError> {
        let mut given = self.given.lock();
        let next = *given + 1;
        // the last address of the block is the broadcast address
        if next >= self.cidr.size().saturating_sub(1) {
            return Err(IpamError::AddressSpaceExhausted(self.cidr));
        }
        *given = next;
        Ok(self.cidr.offset(next))
    }

    /// The most recently allocated address (the gateway before any `take`)
    pub fn peek(&self) -> Ipv4Addr {
        self.cidr.offset(*self.given.lock())
    }
}

impl fmt::Display for Ipam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.cidr.fmt(f)
    }
}
