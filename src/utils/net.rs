// Host Address Discovery

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// Address of the interface used for outbound traffic, falling back to
/// loopback. Connecting a UDP socket only selects a route; nothing is sent.
pub fn local_ip() -> IpAddr {
    probe_outbound("8.8.8.8:80").unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

fn probe_outbound(target: &str) -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(target).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ip_is_never_unspecified() {
        assert!(!local_ip().is_unspecified());
    }

    #[test]
    fn loopback_probe_yields_loopback() {
        assert_eq!(probe_outbound("127.0.0.1:9"), Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }
}
