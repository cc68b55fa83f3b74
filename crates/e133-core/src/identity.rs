//! Device and responder identities.
//!
//! - [`Cid`] tags every envelope the device sends. It is generated once per
//!   device and never used for routing.
//! - [`Uid`] addresses an RDM responder, written as `mmmm:dddddddd` (hex
//!   manufacturer id and device id).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Component identifier carried in every root layer header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cid(Uuid);

impl Cid {
    pub const LENGTH: usize = 16;

    /// Generate a fresh random CID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// A CID as read off the wire.
    pub fn from_bytes(bytes: [u8; Self::LENGTH]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// The 16 bytes written into root layer headers.
    pub fn as_bytes(&self) -> &[u8; Self::LENGTH] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// An RDM unique id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Uid {
    manufacturer: u16,
    device: u32,
}

impl Uid {
    pub const LENGTH: usize = 6;

    /// Create a UID from its manufacturer and device parts.
    pub const fn new(manufacturer: u16, device: u32) -> Self {
        Self {
            manufacturer,
            device,
        }
    }

    /// The broadcast UID for every manufacturer.
    pub const fn all_devices() -> Self {
        Self::new(0xffff, 0xffff_ffff)
    }

    /// The ESTA manufacturer id.
    pub fn manufacturer(&self) -> u16 {
        self.manufacturer
    }

    /// The device id within the manufacturer.
    pub fn device(&self) -> u32 {
        self.device
    }

    /// Broadcast UIDs have a device id of `0xffffffff`.
    pub fn is_broadcast(&self) -> bool {
        self.device == 0xffff_ffff
    }

    /// Read a UID from its 6-byte wire form.
    pub fn from_bytes(bytes: [u8; Self::LENGTH]) -> Self {
        Self {
            manufacturer: u16::from_be_bytes([bytes[0], bytes[1]]),
            device: u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
        }
    }

    /// The 6-byte wire form.
    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        let m = self.manufacturer.to_be_bytes();
        let d = self.device.to_be_bytes();
        [m[0], m[1], d[0], d[1], d[2], d[3]]
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:08x}", self.manufacturer, self.device)
    }
}

impl FromStr for Uid {
    type Err = UidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (manufacturer, device) = s
            .split_once(':')
            .ok_or_else(|| UidParseError::MissingColon(s.to_string()))?;

        let manufacturer = u16::from_str_radix(manufacturer, 16)
            .map_err(|_| UidParseError::InvalidManufacturer(manufacturer.to_string()))?;
        let device = u32::from_str_radix(device, 16)
            .map_err(|_| UidParseError::InvalidDevice(device.to_string()))?;

        Ok(Self::new(manufacturer, device))
    }
}

impl TryFrom<String> for Uid {
    type Error = UidParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Uid> for String {
    fn from(uid: Uid) -> Self {
        uid.to_string()
    }
}

/// Error parsing a UID string.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UidParseError {
    #[error("uid must contain ':' separator, got: {0}")]
    MissingColon(String),
    #[error("invalid manufacturer id: {0}")]
    InvalidManufacturer(String),
    #[error("invalid device id: {0}")]
    InvalidDevice(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_uid() {
        let uid: Uid = "7a70:00000001".parse().unwrap();
        assert_eq!(uid.manufacturer(), 0x7a70);
        assert_eq!(uid.device(), 1);
        assert!(!uid.is_broadcast());
    }

    #[test]
    fn uid_display_roundtrip() {
        let uid = Uid::new(0x00a1, 0xdeadbeef);
        let s = uid.to_string();
        assert_eq!(s, "00a1:deadbeef");
        let uid2: Uid = s.parse().unwrap();
        assert_eq!(uid, uid2);
    }

    #[test]
    fn uid_rejects_garbage() {
        assert!(matches!(
            "7a7000000001".parse::<Uid>(),
            Err(UidParseError::MissingColon(_))
        ));
        assert!(matches!(
            "zz:00000001".parse::<Uid>(),
            Err(UidParseError::InvalidManufacturer(_))
        ));
        assert!(matches!(
            "7a70:nothex".parse::<Uid>(),
            Err(UidParseError::InvalidDevice(_))
        ));
    }

    #[test]
    fn uid_wire_bytes() {
        let uid = Uid::new(0x7a70, 0x12345678);
        assert_eq!(uid.to_bytes(), [0x7a, 0x70, 0x12, 0x34, 0x56, 0x78]);
        assert_eq!(Uid::from_bytes(uid.to_bytes()), uid);
        assert!(Uid::all_devices().is_broadcast());
    }

    #[test]
    fn cid_bytes() {
        let cid = Cid::generate();
        assert_eq!(Cid::from_bytes(*cid.as_bytes()), cid);
        assert_ne!(Cid::generate(), cid);
    }
}
