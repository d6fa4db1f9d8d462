//! Tunnel port naming.

use std::net::Ipv4Addr;

/// Longest interface name the dataplane accepts.
pub const MAX_PORT_NAME_LEN: usize = 14;

/// Name of the GRE port from `local` to `remote`.
///
/// `gre` + the remote address as 8 hex digits + `-` + the last byte of the
/// local address, e.g. `gre0a000002-01`. Deterministic, so every pass over
/// the same pair of endpoints agrees on the name.
pub fn gre_port_name(local: Ipv4Addr, remote: Ipv4Addr) -> String {
    let local_hex = format!("{:08x}", u32::from(local));
    let mut name = format!("gre{:08x}-{}", u32::from(remote), &local_hex[6..]);
    name.truncate(MAX_PORT_NAME_LEN);
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_gre_port_name() {
        let name = gre_port_name(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(name, "gre0a000002-01");
        assert_eq!(
            gre_port_name(Ipv4Addr::new(192, 168, 1, 255), Ipv4Addr::new(172, 16, 0, 10)),
            "greac10000a-ff"
        );
    }

    proptest! {
        #[test]
        fn prop_name_fits_and_is_unique_per_remote(a in any::<u32>(), b in any::<u32>(), local in any::<u32>()) {
            let local = Ipv4Addr::from(local);
            let na = gre_port_name(local, Ipv4Addr::from(a));
            let nb = gre_port_name(local, Ipv4Addr::from(b));
            prop_assert!(na.len() <= MAX_PORT_NAME_LEN);
            prop_assert_eq!(na == nb, a == b);
        }
    }
}
