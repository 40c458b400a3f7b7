//! CIDR sets for answer-address validation.

use super::{MatchError, Result};
use ipnet::IpNet;
use std::net::IpAddr;
use std::path::Path;

/// An immutable set of IP networks.
///
/// Line grammar: one CIDR (`192.168.0.0/16`, `fd00::/8`) or bare address
/// per line; bare addresses become host routes.
#[derive(Debug, Default, Clone)]
pub struct IpSet {
    nets: Vec<IpNet>,
}

impl IpSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a network.
    pub fn add(&mut self, net: IpNet) {
        self.nets.push(net);
    }

    /// Parses and adds a single line of the list grammar.
    pub fn add_rule(&mut self, rule: &str) -> std::result::Result<(), String> {
        let net = if rule.contains('/') {
            rule.parse::<IpNet>().map_err(|e| e.to_string())?
        } else {
            let addr: IpAddr = rule.parse().map_err(|e: std::net::AddrParseError| e.to_string())?;
            IpNet::from(addr)
        };
        self.add(net);
        Ok(())
    }

    /// Loads rules from one or more files, merging into this set.
    pub fn load_files<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<()> {
        for path in paths {
            for (line, rule) in super::read_rule_lines(path.as_ref())? {
                self.add_rule(&rule).map_err(|message| MatchError::Parse {
                    path: path.as_ref().to_path_buf(),
                    line,
                    message,
                })?;
            }
        }
        Ok(())
    }

    /// Tests membership of an address.
    pub fn contains(&self, addr: IpAddr) -> bool {
        self.nets.iter().any(|net| net.contains(&addr))
    }

    /// Number of networks in the set.
    pub fn len(&self) -> usize {
        self.nets.len()
    }

    /// Returns true if the set has no networks.
    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }
}
