use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

use crate::forward::ForwardConfig;

const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Check if `ip:port` is accepting connections. Unparseable addresses fall
/// back to loopback.
pub fn check_port(ip: &str, port: u16) -> bool {
    let ip: IpAddr = ip.parse().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
    TcpStream::connect_timeout(&SocketAddr::new(ip, port), PROBE_TIMEOUT).is_ok()
}

/// Whether every local port of a forward answers. `None` when the forward
/// has no parseable ports to probe.
pub fn forward_healthy(config: &ForwardConfig) -> Option<bool> {
    let (ip, _) = config.bind_address();
    let ports = config.local_ports();
    if ports.is_empty() {
        return None;
    }
    Some(ports.iter().all(|&p| check_port(&ip, p)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn listener() -> (TcpListener, u16) {
        let l = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = l.local_addr().unwrap().port();
        (l, port)
    }

    #[test]
    fn open_port_is_healthy() {
        let (_l, port) = listener();
        assert!(check_port("127.0.0.1", port));
    }

    #[test]
    fn closed_port_is_unhealthy() {
        let (l, port) = listener();
        drop(l);
        assert!(!check_port("127.0.0.1", port));
    }

    #[test]
    fn forward_probe_uses_local_side() {
        let (_l, port) = listener();
        let cfg = ForwardConfig::kubectl("x", "c", "n", "s", vec![format!("{}:80", port)]);
        assert_eq!(forward_healthy(&cfg), Some(true));
    }

    #[test]
    fn forward_without_ports_is_unknown() {
        let cfg = ForwardConfig::kubectl("x", "c", "n", "s", vec![]);
        assert_eq!(forward_healthy(&cfg), None);
    }
}
