use std::net::{IpAddr, Ipv4Addr};

use if_addrs::IfAddr;

/// Returns the directed broadcast address of every usable local IPv4
/// interface, excluding loopback and link-local (169.254.x.x).
pub fn interface_broadcast_addrs() -> Vec<Ipv4Addr> {
    let mut addrs = Vec::new();

    let Ok(interfaces) = if_addrs::get_if_addrs() else {
        return addrs;
    };

    for iface in interfaces {
        if iface.is_loopback() {
            continue;
        }
        let IfAddr::V4(v4) = &iface.addr else {
            continue;
        };
        if is_link_local(v4.ip) {
            continue;
        }
        let broadcast = v4
            .broadcast
            .unwrap_or_else(|| directed_broadcast(v4.ip, v4.netmask));
        if !addrs.contains(&broadcast) {
            addrs.push(broadcast);
        }
    }

    addrs
}

/// Returns `ip | !netmask`.
pub(crate) fn directed_broadcast(ip: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) | !u32::from(netmask))
}

fn is_link_local(ip: Ipv4Addr) -> bool {
    ip.octets()[0] == 169 && ip.octets()[1] == 254
}

/// Returns the hostname in the form mDNS queries need (`name.local.`).
pub fn mdns_hostname(name: &str) -> String {
    let mut name = name.trim().trim_end_matches('.').to_string();
    if !name.ends_with(".local") {
        name.push_str(".local");
    }
    name.push('.');
    name
}

/// Picks the first IPv4 address, falling back to whatever came first.
pub(crate) fn prefer_ipv4(addrs: impl IntoIterator<Item = IpAddr>) -> Option<IpAddr> {
    let mut first = None;
    for addr in addrs {
        if addr.is_ipv4() {
            return Some(addr);
        }
        first.get_or_insert(addr);
    }
    first
}
