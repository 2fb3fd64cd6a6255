//! Address handling, listener setup and HTTP fetch helpers shared by the
//! router, tunnel, supervisor and content components.

use crate::error::ContentError;
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{
    IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener as StdTcpListener,
    UdpSocket as StdUdpSocket,
};
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Timeout for bulk transfers (manifests and asset files).
pub const BULK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Timeout for a single liveness probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Gap between liveness probes.
pub const PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// Splits `host:port` into its parts.
///
/// Accepts bracketed IPv6 hosts (`[::1]:27960`) and an empty host
/// (`:9090`), which is returned as an empty string.
pub fn split_host_port(addr: &str) -> Result<(String, u16), String> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| "missing port in address".to_string())?;
    let host = match host.strip_prefix('[') {
        Some(rest) => rest
            .strip_suffix(']')
            .ok_or_else(|| "unterminated IPv6 host".to_string())?,
        None if host.contains(':') => return Err("too many colons in address".to_string()),
        None => host,
    };
    let port = port
        .parse::<u16>()
        .map_err(|e| format!("invalid port {port:?}: {e}"))?;
    Ok((host.to_string(), port))
}

/// Parses a listen address, treating an empty host as all IPv4 interfaces.
pub fn parse_listen_addr(addr: &str) -> Result<SocketAddr, String> {
    let (host, port) = split_host_port(addr)?;
    let ip = if host.is_empty() {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        host.parse::<IpAddr>()
            .map_err(|e| format!("invalid host {host:?}: {e}"))?
    };
    Ok(SocketAddr::new(ip, port))
}

/// Replaces an unspecified host with the loopback address of the same
/// family, keeping the port.
pub fn resolve_loopback(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}

/// Binds a TCP listener with `SO_REUSEADDR` set.
pub fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    let std_listener: StdTcpListener = socket.into();
    let listener = TcpListener::from_std(std_listener)?;
    info!("✅ Listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Binds an unconnected datagram socket on an ephemeral port of the same
/// family as `peer`, asking the kernel for a `recv_buffer` byte receive
/// buffer.
pub fn bind_datagram(peer: SocketAddr, recv_buffer: usize) -> std::io::Result<UdpSocket> {
    let local: SocketAddr = if peer.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = Socket::new(Domain::for_address(local), Type::DGRAM, Some(Protocol::UDP))?;
    if let Err(e) = socket.set_recv_buffer_size(recv_buffer) {
        debug!("Could not set datagram receive buffer to {}: {}", recv_buffer, e);
    }
    socket.set_nonblocking(true)?;
    socket.bind(&local.into())?;

    let std_socket: StdUdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
}

/// Builds the HTTP client used for content transfers.
pub fn http_client() -> Result<reqwest::Client, ContentError> {
    reqwest::Client::builder()
        .timeout(BULK_TIMEOUT)
        .build()
        .map_err(|source| ContentError::Fetch {
            url: String::new(),
            source,
        })
}

/// Fetches `url` and returns the full response body.
///
/// A non-success status is reported as [`ContentError::Status`] carrying
/// the url.
pub async fn get_body(client: &reqwest::Client, url: &str) -> Result<Bytes, ContentError> {
    let fetch_err = |source| ContentError::Fetch {
        url: url.to_string(),
        source,
    };

    let resp = client
        .get(url)
        .timeout(BULK_TIMEOUT)
        .send()
        .await
        .map_err(fetch_err)?;
    if !resp.status().is_success() {
        return Err(ContentError::Status {
            url: url.to_string(),
            status: resp.status().to_string(),
        });
    }
    resp.bytes().await.map_err(fetch_err)
}

/// Probes `url` once with a one second timeout.
pub async fn probe(client: &reqwest::Client, url: &str) -> Result<(), ContentError> {
    let resp = client
        .get(url)
        .timeout(PROBE_TIMEOUT)
        .send()
        .await
        .map_err(|source| ContentError::Fetch {
            url: url.to_string(),
            source,
        })?;
    if !resp.status().is_success() {
        return Err(ContentError::Status {
            url: url.to_string(),
            status: resp.status().to_string(),
        });
    }
    Ok(())
}

/// Polls `url` until it answers with a success status.
///
/// Returns [`ContentError::Unavailable`] if `cancel` fires first.
pub async fn wait_until_reachable(
    client: &reqwest::Client,
    url: &str,
    cancel: &CancellationToken,
) -> Result<(), ContentError> {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ContentError::Unavailable(url.to_string())),
            result = probe(client, url) => match result {
                Ok(()) => return Ok(()),
                Err(e) => debug!("waiting for {}: {}", url, e),
            },
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ContentError::Unavailable(url.to_string())),
            _ = tokio::time::sleep(PROBE_INTERVAL) => {}
        }
    }
}
