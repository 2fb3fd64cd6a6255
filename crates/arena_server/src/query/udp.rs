use super::{GameQuery, Player, QueryKind, QueryResponse};
use crate::error::QueryError;
use crate::net::resolve_loopback;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;

/// Marker preceding every connectionless packet.
pub(crate) const OOB_PREFIX: &[u8] = b"\xff\xff\xff\xff";

const MAX_PACKET: usize = 64 * 1024;

/// Talks to the game's connectionless query port over UDP.
#[derive(Debug, Clone)]
pub struct UdpQueryClient {
    addr: SocketAddr,
    command_timeout: Duration,
}

impl UdpQueryClient {
    /// Creates a client for `addr`. An unspecified host is replaced with
    /// loopback.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr: resolve_loopback(addr),
            command_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn exchange(&self, request: &[u8], timeout: Duration) -> Result<Vec<u8>, QueryError> {
        let local = match self.addr.ip() {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.addr).await?;

        let mut packet = Vec::with_capacity(OOB_PREFIX.len() + request.len());
        packet.extend_from_slice(OOB_PREFIX);
        packet.extend_from_slice(request);

        let mut buf = vec![0u8; MAX_PACKET];
        let n = tokio::time::timeout(timeout, async {
            socket.send(&packet).await?;
            socket.recv(&mut buf).await
        })
        .await
        .map_err(|_| QueryError::Timeout(self.addr, timeout))??;

        buf.truncate(n);
        match buf.strip_prefix(OOB_PREFIX) {
            Some(body) => Ok(body.to_vec()),
            None => Err(QueryError::Malformed("missing out-of-band marker".to_string())),
        }
    }
}

#[async_trait]
impl GameQuery for UdpQueryClient {
    async fn query(&self, kind: QueryKind, timeout: Duration) -> Result<QueryResponse, QueryError> {
        let (request, expected) = match kind {
            QueryKind::Info => (&b"getinfo"[..], "infoResponse"),
            QueryKind::Status => (&b"getstatus"[..], "statusResponse"),
        };
        let body = self.exchange(request, timeout).await?;
        parse_response(&String::from_utf8_lossy(&body), expected)
    }

    async fn send_command(&self, password: &str, command: &str) -> Result<String, QueryError> {
        let request = format!("rcon {password} {command}");
        let body = self
            .exchange(request.as_bytes(), self.command_timeout)
            .await?;
        let text = String::from_utf8_lossy(&body);
        let text = text.strip_prefix("print\n").unwrap_or(&text);
        if text.starts_with("Bad rconpassword") || text.starts_with("No rconpassword set") {
            return Err(QueryError::Rejected(text.trim_end().to_string()));
        }
        Ok(text.to_string())
    }
}

/// Parses an `infoResponse`/`statusResponse` body: a header line, one
/// backslash-separated key/value line, then one `score ping "name"` line per
/// player.
pub(crate) fn parse_response(body: &str, expected: &str) -> Result<QueryResponse, QueryError> {
    let mut lines = body.split('\n');
    let header = lines.next().unwrap_or_default();
    if header.trim_end() != expected {
        return Err(QueryError::Malformed(format!(
            "expected {expected}, got {header:?}"
        )));
    }

    let values = parse_info_string(lines.next().unwrap_or_default());

    let mut players = Vec::new();
    for line in lines.filter(|l| !l.trim().is_empty()) {
        players.push(parse_player(line)?);
    }
    Ok(QueryResponse { values, players })
}

fn parse_info_string(line: &str) -> BTreeMap<String, String> {
    let mut fields = line.trim_start_matches('\\').split('\\');
    let mut values = BTreeMap::new();
    while let (Some(key), Some(value)) = (fields.next(), fields.next()) {
        if !key.is_empty() {
            values.insert(key.to_string(), value.to_string());
        }
    }
    values
}

fn parse_player(line: &str) -> Result<Player, QueryError> {
    let malformed = || QueryError::Malformed(format!("bad player line {line:?}"));
    let mut parts = line.splitn(3, ' ');
    let score = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(malformed)?;
    let ping = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(malformed)?;
    let name = parts.next().ok_or_else(malformed)?.trim().trim_matches('"');
    Ok(Player {
        name: name.to_string(),
        score,
        ping,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_info_response() {
        let body = "infoResponse\n\\mapname\\q3dm17\\clients\\2\\g_needpass\\0";
        let resp = parse_response(body, "infoResponse").unwrap();
        assert_eq!(resp.get("mapname"), Some("q3dm17"));
        assert_eq!(resp.get("clients"), Some("2"));
        assert!(resp.players.is_empty());
    }

    #[test]
    fn test_parse_status_response_with_players() {
        let body = "statusResponse\n\\mapname\\q3dm6\\sv_hostname\\arena\n12 40 \"grunt\"\n-1 999 \"big head\"\n";
        let resp = parse_response(body, "statusResponse").unwrap();
        assert_eq!(resp.get("mapname"), Some("q3dm6"));
        assert_eq!(
            resp.players,
            vec![
                Player { name: "grunt".into(), score: 12, ping: 40 },
                Player { name: "big head".into(), score: -1, ping: 999 },
            ]
        );
    }

    #[test]
    fn test_parse_rejects_wrong_header() {
        assert!(matches!(
            parse_response("print\nhello", "infoResponse"),
            Err(QueryError::Malformed(_))
        ));
        assert!(parse_response("statusResponse\n\\a\\b\nnot a player", "statusResponse").is_err());
    }

    #[tokio::test]
    async fn test_query_round_trip_over_loopback() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"\xff\xff\xff\xffgetinfo");
            server
                .send_to(b"\xff\xff\xff\xffinfoResponse\n\\hostname\\arena", peer)
                .await
                .unwrap();
        });

        let client = UdpQueryClient::new(addr);
        let resp = client.query(QueryKind::Info, Duration::from_secs(1)).await.unwrap();
        assert_eq!(resp.get("hostname"), Some("arena"));
    }

    #[tokio::test]
    async fn test_send_command_rejected_password() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"\xff\xff\xff\xffrcon wrong say hi");
            server
                .send_to(b"\xff\xff\xff\xffprint\nBad rconpassword.\n", peer)
                .await
                .unwrap();
        });

        let client = UdpQueryClient::new(addr);
        let err = client.send_command("wrong", "say hi").await.unwrap_err();
        assert!(matches!(err, QueryError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_query_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client = UdpQueryClient::new(silent.local_addr().unwrap());
        let err = client
            .query(QueryKind::Status, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Timeout(_, _)));
    }
}
