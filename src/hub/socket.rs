//! UDP socket setup for channel ingest
//!
//! Channels are normally IPv4 multicast groups; each socket is bound to
//! its concrete group address (not the wildcard), so the kernel only
//! delivers datagrams addressed to that group even when several groups
//! share a port. When a multicast bind fails on every candidate interface
//! the channel falls back to a plain unicast bind on the same address.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{HubError, Result};

/// Whether `ip` falls in the IPv4 multicast range (first octet 224-239)
pub(crate) fn is_ipv4_multicast(ip: Ipv4Addr) -> bool {
    (224..=239).contains(&ip.octets()[0])
}

/// Resolve a `host:port` string to an IPv4 socket address
pub(crate) fn resolve_addr(addr: &str) -> Result<SocketAddrV4> {
    let resolved = addr
        .to_socket_addrs()
        .map_err(|_| HubError::InvalidAddress(addr.to_string()))?
        .find_map(|sa| match sa {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        });

    resolved.ok_or_else(|| HubError::InvalidAddress(addr.to_string()))
}

/// Resolve an OS interface name to its IPv4 address
pub(crate) fn resolve_interface(name: &str) -> io::Result<Ipv4Addr> {
    let interfaces = local_ip_address::list_afinet_netifas()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;

    interfaces
        .into_iter()
        .find_map(|(if_name, ip)| match ip {
            IpAddr::V4(v4) if if_name == name => Some(v4),
            _ => None,
        })
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no IPv4 address on interface {}", name),
            )
        })
}

fn new_socket(recv_buffer: usize) -> io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    // Best effort; the kernel may clamp or refuse large buffers.
    let _ = socket.set_recv_buffer_size(recv_buffer);
    Ok(socket)
}

fn bind_multicast(
    addr: SocketAddrV4,
    iface: Option<Ipv4Addr>,
    recv_buffer: usize,
) -> io::Result<UdpSocket> {
    let socket = new_socket(recv_buffer)?;
    socket.bind(&SocketAddr::V4(addr).into())?;
    socket.join_multicast_v4(addr.ip(), &iface.unwrap_or(Ipv4Addr::UNSPECIFIED))?;
    Ok(socket.into())
}

fn bind_unicast(addr: SocketAddrV4, recv_buffer: usize) -> io::Result<UdpSocket> {
    let socket = new_socket(recv_buffer)?;
    socket.bind(&SocketAddr::V4(addr).into())?;
    Ok(socket.into())
}

/// Open the ingest socket for one channel address.
///
/// Multicast addresses are bound as multicast listeners, joining on the
/// default interface when `ifaces` is empty or on the first supplied
/// interface that binds successfully; if every multicast attempt fails the
/// address is re-bound as plain unicast. Non-multicast addresses go
/// straight to the unicast bind.
pub(crate) fn open_channel_socket(
    addr_str: &str,
    ifaces: &[String],
    recv_buffer: usize,
) -> Result<UdpSocket> {
    let addr = resolve_addr(addr_str)?;

    if !is_ipv4_multicast(*addr.ip()) {
        let socket = bind_unicast(addr, recv_buffer).map_err(HubError::Bind)?;
        tracing::info!(addr = %addr, "unicast listener bound");
        return Ok(socket);
    }

    let mut last_err: Option<io::Error> = None;

    if ifaces.is_empty() {
        match bind_multicast(addr, None, recv_buffer) {
            Ok(socket) => {
                tracing::info!(addr = %addr, "multicast listener bound (all interfaces)");
                return Ok(socket);
            }
            Err(e) => {
                tracing::warn!(addr = %addr, error = %e, "multicast bind failed");
                last_err = Some(e);
            }
        }
    } else {
        for name in ifaces {
            let iface_ip = match resolve_interface(name) {
                Ok(ip) => ip,
                Err(e) => {
                    tracing::warn!(addr = %addr, iface = %name, error = %e, "interface lookup failed");
                    last_err = Some(e);
                    continue;
                }
            };
            match bind_multicast(addr, Some(iface_ip), recv_buffer) {
                Ok(socket) => {
                    tracing::info!(addr = %addr, iface = %name, "multicast listener bound");
                    return Ok(socket);
                }
                Err(e) => {
                    tracing::warn!(addr = %addr, iface = %name, error = %e, "multicast bind failed");
                    last_err = Some(e);
                }
            }
        }
    }

    match bind_unicast(addr, recv_buffer) {
        Ok(socket) => {
            tracing::warn!(addr = %addr, "all multicast binds failed, fell back to unicast");
            Ok(socket)
        }
        Err(e) => Err(HubError::Bind(last_err.unwrap_or(e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_ipv4_multicast_range() {
        assert!(is_ipv4_multicast(Ipv4Addr::new(224, 0, 0, 1)));
        assert!(is_ipv4_multicast(Ipv4Addr::new(239, 255, 255, 250)));
        assert!(!is_ipv4_multicast(Ipv4Addr::new(223, 255, 255, 255)));
        assert!(!is_ipv4_multicast(Ipv4Addr::new(240, 0, 0, 1)));
        assert!(!is_ipv4_multicast(Ipv4Addr::new(127, 0, 0, 1)));
    }

    #[test]
    fn test_resolve_addr() {
        let addr = resolve_addr("127.0.0.1:1234").unwrap();
        assert_eq!(addr.ip(), &Ipv4Addr::LOCALHOST);
        assert_eq!(addr.port(), 1234);
    }

    #[test]
    fn test_resolve_addr_rejects_garbage() {
        assert!(matches!(
            resolve_addr("not an address"),
            Err(HubError::InvalidAddress(_))
        ));
        assert!(matches!(
            resolve_addr("127.0.0.1"),
            Err(HubError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_resolve_interface_unknown_name() {
        assert!(resolve_interface("definitely-not-an-interface-0").is_err());
    }

    #[test]
    fn test_open_unicast_socket() {
        let socket = open_channel_socket("127.0.0.1:0", &[], 64 * 1024).unwrap();
        let local = socket.local_addr().unwrap();
        assert_eq!(local.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_ne!(local.port(), 0);
    }

    #[test]
    fn test_open_multicast_socket_or_fallback() {
        // Succeeds either as a real multicast listener or through the
        // unicast fallback, depending on the host's interfaces.
        let socket = open_channel_socket("239.255.42.42:0", &[], 64 * 1024).unwrap();
        assert!(socket.local_addr().is_ok());
    }

    #[test]
    fn test_open_socket_bad_address() {
        assert!(open_channel_socket("nope", &[], 64 * 1024).is_err());
    }
}
