use crate::error::{PortalError, Result};
use ipnet::IpNet;
use std::fmt;
use std::net::IpAddr;

/// Ordered set of IP prefixes that may reach a funnel-exposed service.
///
/// Entries are kept in insertion order. Lookups return the *first*
/// containing entry; overlapping entries are not reordered by specificity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Allowlist {
    entries: Vec<IpNet>,
}

impl Allowlist {
    /// Parse every configured entry. Blank entries are skipped; any other
    /// unparseable entry fails the whole list.
    pub fn parse<I, S>(raw: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries = Vec::new();
        for item in raw {
            let trimmed = item.as_ref().trim();
            if trimmed.is_empty() {
                continue;
            }
            entries.push(parse_entry(trimmed)?);
        }
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[IpNet] {
        &self.entries
    }

    /// First entry (in insertion order) containing `addr`.
    pub fn matching_entry(&self, addr: IpAddr) -> Option<&IpNet> {
        let addr = addr.to_canonical();
        self.entries.iter().find(|net| net.contains(&addr))
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        self.matching_entry(addr).is_some()
    }

    /// Canonical string form of each entry, e.g. `203.0.113.10/32`.
    pub fn to_strings(&self) -> Vec<String> {
        self.entries.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for Allowlist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_strings().join(","))
    }
}

/// Parse one entry as a CIDR block (masked to its network base) or a bare
/// address (widened to /32 or /128).
pub fn parse_entry(raw: &str) -> Result<IpNet> {
    let invalid = || {
        PortalError::config(format!(
            "invalid funnel allowlist entry {raw:?}: must be an IP address or CIDR block"
        ))
    };

    if raw.contains('/') {
        let net: IpNet = raw.parse().map_err(|_| invalid())?;
        return Ok(net.trunc());
    }

    let addr = raw.parse::<IpAddr>().map_err(|_| invalid())?.to_canonical();
    let full_len = if addr.is_ipv4() { 32 } else { 128 };
    IpNet::new(addr, full_len).map_err(|_| invalid())
}
