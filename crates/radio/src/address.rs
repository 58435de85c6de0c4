//! Radio (MAC) addresses

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::RadioError;

/// Six-byte link-layer address of a radio
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RadioAddress(pub [u8; 6]);

impl RadioAddress {
    /// Link-layer broadcast address
    pub const BROADCAST: RadioAddress = RadioAddress([0xff; 6]);

    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for RadioAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let octets: Vec<String> = self.0.iter().map(|o| hex::encode_upper([*o])).collect();
        f.write_str(&octets.join(":"))
    }
}

impl fmt::Debug for RadioAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RadioAddress({})", self)
    }
}

impl FromStr for RadioAddress {
    type Err = RadioError;

    /// Accepts `AA:BB:CC:DD:EE:FF`, `aa-bb-..` or bare `aabbccddeeff`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        let bytes = hex::decode(&compact).map_err(|e| RadioError::InvalidAddress(format!("{}: {}", s, e)))?;
        let octets: [u8; 6] = bytes
            .try_into()
            .map_err(|_| RadioError::InvalidAddress(format!("{}: expected 6 octets", s)))?;
        Ok(Self(octets))
    }
}

impl Serialize for RadioAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RadioAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_colon_separated_upper_hex() {
        let addr = RadioAddress::new([0x24, 0x0a, 0xc4, 0x00, 0x01, 0xff]);
        assert_eq!(addr.to_string(), "24:0A:C4:00:01:FF");
    }

    #[test]
    fn test_parse_accepts_common_spellings() {
        let expected = RadioAddress::new([0x24, 0x0a, 0xc4, 0x00, 0x01, 0xff]);
        assert_eq!("24:0A:C4:00:01:FF".parse::<RadioAddress>().unwrap(), expected);
        assert_eq!("24-0a-c4-00-01-ff".parse::<RadioAddress>().unwrap(), expected);
        assert_eq!("240ac40001ff".parse::<RadioAddress>().unwrap(), expected);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!("24:0A:C4".parse::<RadioAddress>().is_err());
        assert!("zz:0A:C4:00:01:FF".parse::<RadioAddress>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let addr = RadioAddress::new([1, 2, 3, 4, 5, 6]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"01:02:03:04:05:06\"");
        let back: RadioAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn test_broadcast_address() {
        assert!(RadioAddress::BROADCAST.is_broadcast());
        assert!(!RadioAddress::default().is_broadcast());
    }
}
