//! Hardware (MAC) address generation and parsing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{WeaveError, WeaveResult};

/// A 48-bit Ethernet hardware address.
///
/// The bridge is given a random address on creation; the router container
/// then uses that address as its peer name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    /// Bit marking a locally administered address.
    const LOCAL_BIT: u8 = 0x02;
    /// Bit marking a multicast address.
    const MULTICAST_BIT: u8 = 0x01;

    /// Create an address from raw octets.
    #[must_use]
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Generate a random locally administered unicast address.
    #[must_use]
    pub fn random_local() -> Self {
        let mut octets: [u8; 6] = rand::random();
        octets[0] = (octets[0] & !Self::MULTICAST_BIT) | Self::LOCAL_BIT;
        Self(octets)
    }

    /// Raw octets.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Whether the locally administered bit is set.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        self.0[0] & Self::LOCAL_BIT != 0
    }

    /// Whether the multicast bit is set.
    #[must_use]
    pub const fn is_multicast(&self) -> bool {
        self.0[0] & Self::MULTICAST_BIT != 0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddr {
    type Err = WeaveError;

    fn from_str(s: &str) -> WeaveResult<Self> {
        let invalid = || WeaveError::Config {
            message: format!("invalid hardware address: {s:?}"),
        };

        let mut octets = [0u8; 6];
        let mut parts = s.trim().split(':');
        for octet in &mut octets {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = WeaveError;

    fn try_from(value: String) -> WeaveResult<Self> {
        value.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn display_and_parse() {
        let mac = MacAddr::new([0x7a, 0x01, 0xbc, 0x00, 0xff, 0x10]);
        assert_eq!(mac.to_string(), "7a:01:bc:00:ff:10");
        assert_eq!("7a:01:bc:00:ff:10".parse::<MacAddr>().unwrap(), mac);
        assert_eq!("7A:01:BC:00:FF:10\n".parse::<MacAddr>().unwrap(), mac);
    }

    #[test]
    fn rejects_malformed() {
        assert!("".parse::<MacAddr>().is_err());
        assert!("7a:01:bc:00:ff".parse::<MacAddr>().is_err());
        assert!("7a:01:bc:00:ff:10:22".parse::<MacAddr>().is_err());
        assert!("7a:01:bc:00:ff:1".parse::<MacAddr>().is_err());
        assert!("zz:01:bc:00:ff:10".parse::<MacAddr>().is_err());
    }

    #[test]
    fn random_addresses_differ() {
        assert_ne!(MacAddr::random_local(), MacAddr::random_local());
    }

    #[test]
    fn serde_as_string() {
        let mac = MacAddr::new([0x02, 0, 0, 0, 0, 1]);
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"02:00:00:00:00:01\"");
        let back: MacAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
    }

    proptest! {
        #[test]
        fn random_is_local_unicast(_seed in 0u8..64) {
            let mac = MacAddr::random_local();
            prop_assert!(mac.is_local());
            prop_assert!(!mac.is_multicast());
        }

        #[test]
        fn parse_accepts_any_display(octets in any::<[u8; 6]>()) {
            let mac = MacAddr::new(octets);
            prop_assert_eq!(mac.to_string().parse::<MacAddr>().unwrap(), mac);
        }
    }
}
