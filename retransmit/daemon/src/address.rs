//! Textual rendering of raw probe addresses
//!
//! IPv6 is rendered as eight lowercase hex groups without zero compression by
//! default, which is the text existing consumers of this probe expect.
//! [`Ipv6Style::Compressed`] opts into RFC 5952 output instead.

use crate::types::AddressFamily;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};

/// How IPv6 addresses are rendered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ipv6Style {
    /// `2001:db8:0:0:0:0:0:1`
    #[default]
    Full,
    /// `2001:db8::1` (RFC 5952)
    Compressed,
}

/// Format `raw` as an address of `family`.
///
/// `raw` must be 4 bytes for IPv4 and 16 bytes for IPv6; the decoder
/// guarantees this. `Unknown` always yields an empty string.
pub fn format_address(family: AddressFamily, raw: &[u8], style: Ipv6Style) -> String {
    match family {
        AddressFamily::Ipv4 => match <[u8; 4]>::try_from(raw) {
            Ok(octets) => format_ipv4(octets),
            Err(_) => {
                debug_assert!(false, "IPv4 address must be 4 bytes, got {}", raw.len());
                String::new()
            }
        },
        AddressFamily::Ipv6 => match <[u8; 16]>::try_from(raw) {
            Ok(octets) => format_ipv6(octets, style),
            Err(_) => {
                debug_assert!(false, "IPv6 address must be 16 bytes, got {}", raw.len());
                String::new()
            }
        },
        AddressFamily::Unknown => String::new(),
    }
}

/// Dotted-quad IPv4
pub fn format_ipv4(octets: [u8; 4]) -> String {
    Ipv4Addr::from(octets).to_string()
}

/// IPv6 in the requested style
pub fn format_ipv6(octets: [u8; 16], style: Ipv6Style) -> String {
    let addr = Ipv6Addr::from(octets);
    match style {
        Ipv6Style::Compressed => addr.to_string(),
        Ipv6Style::Full => {
            let [a, b, c, d, e, f, g, h] = addr.segments();
            format!("{a:x}:{b:x}:{c:x}:{d:x}:{e:x}:{f:x}:{g:x}:{h:x}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC_V6: [u8; 16] = [
        0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01,
    ];

    #[test]
    fn test_ipv4() {
        assert_eq!(
            format_address(AddressFamily::Ipv4, &[192, 168, 1, 1], Ipv6Style::Full),
            "192.168.1.1"
        );
        assert_eq!(format_ipv4([0, 0, 0, 0]), "0.0.0.0");
    }

    #[test]
    fn test_ipv6_full_keeps_zero_groups() {
        assert_eq!(
            format_address(AddressFamily::Ipv6, &DOC_V6, Ipv6Style::Full),
            "2001:db8:0:0:0:0:0:1"
        );

        let mut loopback = [0u8; 16];
        loopback[15] = 1;
        assert_eq!(format_ipv6(loopback, Ipv6Style::Full), "0:0:0:0:0:0:0:1");
    }

    #[test]
    fn test_ipv6_lowercase() {
        let octets = [
            0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0xAB, 0xCD, 0x00, 0xFF, 0xFE, 0x00, 0x12, 0x34,
        ];
        assert_eq!(
            format_ipv6(octets, Ipv6Style::Full),
            "fe80:0:0:0:abcd:ff:fe00:1234"
        );
    }

    #[test]
    fn test_ipv6_compressed() {
        assert_eq!(format_ipv6(DOC_V6, Ipv6Style::Compressed), "2001:db8::1");
    }

    #[test]
    fn test_unknown_family_is_empty() {
        assert_eq!(
            format_address(AddressFamily::Unknown, &[10, 0, 0, 1], Ipv6Style::Full),
            ""
        );
        assert_eq!(
            format_address(AddressFamily::Unknown, &DOC_V6, Ipv6Style::Compressed),
            ""
        );
    }

    #[test]
    fn test_pure() {
        let a = format_address(AddressFamily::Ipv6, &DOC_V6, Ipv6Style::Full);
        let b = format_address(AddressFamily::Ipv6, &DOC_V6, Ipv6Style::Full);
        assert_eq!(a, b);
    }
}
