use crate::content::rpc::PREFACE;

const MAX_HEADERS: usize = 64;

/// Outcome of testing a matcher against the bytes sniffed so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    Match,
    NoMatch,
    /// The decision needs more bytes than are buffered.
    NeedMore,
}

/// Predicate over the first bytes of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// Matches every connection without reading anything.
    Any,
    /// Matches when the stream starts with these bytes.
    Prefix(Vec<u8>),
    /// Matches an HTTP/1 request carrying this header. Name and value are
    /// compared case-insensitively.
    Http1Header { name: String, value: String },
}

impl Matcher {
    pub fn any() -> Self {
        Self::Any
    }

    pub fn prefix(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Prefix(bytes.into())
    }

    pub fn http1_header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Http1Header {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Matches connections opened by the content RPC client.
    pub fn rpc_preface() -> Self {
        Self::prefix(PREFACE)
    }

    /// Matches websocket upgrade requests.
    pub fn websocket() -> Self {
        Self::http1_header("Upgrade", "websocket")
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    pub fn check(&self, buf: &[u8]) -> MatchResult {
        match self {
            Self::Any => MatchResult::Match,
            Self::Prefix(prefix) => {
                if buf.len() >= prefix.len() {
                    if buf.starts_with(prefix) {
                        MatchResult::Match
                    } else {
                        MatchResult::NoMatch
                    }
                } else if prefix.starts_with(buf) {
                    MatchResult::NeedMore
                } else {
                    MatchResult::NoMatch
                }
            }
            Self::Http1Header { name, value } => check_header(buf, name, value),
        }
    }
}

fn check_header(buf: &[u8], name: &str, value: &str) -> MatchResult {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    match req.parse(buf) {
        Ok(httparse::Status::Complete(_)) => {
            let found = req.headers.iter().any(|h| {
                h.name.eq_ignore_ascii_case(name)
                    && std::str::from_utf8(h.value)
                        .map(|v| v.trim().eq_ignore_ascii_case(value))
                        .unwrap_or(false)
            });
            if found {
                MatchResult::Match
            } else {
                MatchResult::NoMatch
            }
        }
        Ok(httparse::Status::Partial) => MatchResult::NeedMore,
        Err(_) => MatchResult::NoMatch,
    }
}
