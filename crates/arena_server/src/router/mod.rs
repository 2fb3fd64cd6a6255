//! Single-port connection router.
//!
//! One TCP listener is shared by every protocol the host speaks. Each new
//! connection is sniffed: bytes are read until the registered matchers,
//! evaluated in registration order, can pick a route. The connection is then
//! handed to that route's [`RouteListener`] with the sniffed bytes replayed,
//! so the handler sees the stream exactly as the client sent it.
//!
//! # Usage
//!
//! ```ignore
//! let mut router = Router::new(listener, cancel);
//! router.register("rpc", rpc).matches(Matcher::rpc_preface());
//! router.register("tunnel", tunnel).matches(Matcher::websocket());
//! router.register("http", http).any();
//! router.serve_and_wait().await?;
//! ```

mod listener;
mod matcher;
mod stream;

pub use listener::RouteListener;
pub use matcher::{MatchResult, Matcher};
pub use stream::SniffedStream;

use crate::error::RouterError;
use async_trait::async_trait;
use listener::Routed;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Largest number of bytes buffered while choosing a route.
pub const SNIFF_LIMIT: usize = 8 * 1024;

/// Longest time a client may take to send enough bytes to be routed.
pub const SNIFF_TIMEOUT: Duration = Duration::from_secs(10);

const ROUTE_BACKLOG: usize = 64;

/// A protocol handler that owns the connections routed to it.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Accepts from `listener` until it closes or its shutdown token fires.
    async fn serve(&self, listener: RouteListener) -> Result<(), RouterError>;
}

struct Route {
    name: String,
    service: Arc<dyn Service>,
    matcher: Option<Matcher>,
}

/// Selects the matcher for a freshly registered route.
///
/// Consumed by [`RouteHandle::matches`] or [`RouteHandle::any`], so a route
/// is matched at most once. Dropping it unmatched is reported when the router
/// starts.
#[must_use = "a route without a matcher fails at serve time"]
pub struct RouteHandle<'a> {
    route: &'a mut Route,
}

impl RouteHandle<'_> {
    pub fn matches(self, matcher: Matcher) {
        self.route.matcher = Some(matcher);
    }

    /// Catch-all. Must be the last registered route.
    pub fn any(self) {
        self.route.matcher = Some(Matcher::Any);
    }
}

struct RouteEntry {
    name: String,
    matcher: Matcher,
    tx: mpsc::Sender<Routed>,
}

pub struct Router {
    listener: TcpListener,
    cancel: CancellationToken,
    routes: Vec<Route>,
    sniff_timeout: Duration,
}

impl Router {
    /// Creates a router over an already bound listener. `cancel` stops the
    /// accept loop and every handler.
    pub fn new(listener: TcpListener, cancel: CancellationToken) -> Self {
        Self {
            listener,
            cancel,
            routes: Vec::new(),
            sniff_timeout: SNIFF_TIMEOUT,
        }
    }

    pub fn with_sniff_timeout(mut self, timeout: Duration) -> Self {
        self.sniff_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Adds a route. Routes are tried in registration order.
    pub fn register(&mut self, name: &str, service: Arc<dyn Service>) -> RouteHandle<'_> {
        self.routes.push(Route {
            name: name.to_string(),
            service,
            matcher: None,
        });
        let last = self.routes.len() - 1;
        RouteHandle {
            route: &mut self.routes[last],
        }
    }

    /// Runs the accept loop until the listener fails or the router is
    /// cancelled. Handlers are stopped without waiting for them.
    pub async fn serve(self) -> Result<(), RouterError> {
        let (dispatcher, mut handlers, handler_cancel) = self.start()?;
        let result = dispatcher.run().await;
        handler_cancel.cancel();
        handlers.abort_all();
        result
    }

    /// Like [`Router::serve`], but on exit cancels every handler and waits
    /// for each of them to return.
    pub async fn serve_and_wait(self) -> Result<(), RouterError> {
        let (dispatcher, mut handlers, handler_cancel) = self.start()?;
        let result = dispatcher.run().await;

        handler_cancel.cancel();
        while let Some(joined) = handlers.join_next().await {
            if let Err(e) = joined {
                error!("Route handler task failed: {}", e);
            }
        }
        info!("🛑 Router stopped");
        result
    }

    fn start(self) -> Result<(Dispatcher, JoinSet<()>, CancellationToken), RouterError> {
        let mut catch_all: Option<String> = None;
        for route in &self.routes {
            if let Some(any) = &catch_all {
                warn!("Route {} is shadowed by catch-all route {}", route.name, any);
                return Err(RouterError::UnreachableRoute(route.name.clone()));
            }
            match &route.matcher {
                None => return Err(RouterError::MissingMatcher(route.name.clone())),
                Some(m) if m.is_any() => catch_all = Some(route.name.clone()),
                Some(_) => {}
            }
        }

        let local_addr = self.listener.local_addr().map_err(RouterError::Accept)?;
        let handler_cancel = self.cancel.child_token();
        let mut handlers = JoinSet::new();
        let mut table = Vec::with_capacity(self.routes.len());

        for route in self.routes {
            let Some(matcher) = route.matcher else {
                return Err(RouterError::MissingMatcher(route.name));
            };
            let (tx, rx) = mpsc::channel(ROUTE_BACKLOG);
            let listener = RouteListener::new(
                route.name.clone(),
                local_addr,
                rx,
                handler_cancel.clone(),
            );

            let name = route.name.clone();
            let service = route.service;
            handlers.spawn(async move {
                match service.serve(listener).await {
                    Ok(()) | Err(RouterError::ListenerClosed) => {
                        debug!("Route {} handler stopped", name)
                    }
                    Err(e) => error!("Route {} handler failed: {}", name, e),
                }
            });

            table.push(RouteEntry {
                name: route.name,
                matcher,
                tx,
            });
        }

        info!(
            "🔀 Routing {} on {} route(s)",
            local_addr,
            table.len()
        );

        let dispatcher = Dispatcher {
            listener: self.listener,
            cancel: self.cancel,
            table: Arc::new(table),
            sniff_timeout: self.sniff_timeout,
        };
        Ok((dispatcher, handlers, handler_cancel))
    }
}

struct Dispatcher {
    listener: TcpListener,
    cancel: CancellationToken,
    table: Arc<Vec<RouteEntry>>,
    sniff_timeout: Duration,
}

impl Dispatcher {
    async fn run(self) -> Result<(), RouterError> {
        let mut sniffers = JoinSet::new();

        let result = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Ok(()),
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let table = self.table.clone();
                        let timeout = self.sniff_timeout;
                        sniffers.spawn(dispatch(stream, addr, table, timeout));
                    }
                    Err(e) if is_transient(&e) => {
                        debug!("Transient accept error: {}", e);
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        break Err(RouterError::Accept(e));
                    }
                },
                Some(_) = sniffers.join_next(), if !sniffers.is_empty() => {}
            }
        };

        // Pending sniffs are abandoned; dropping the table afterwards closes
        // every route listener.
        sniffers.shutdown().await;
        result
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        e.kind(),
        ConnectionAborted | ConnectionReset | Interrupted | WouldBlock
    )
}

async fn dispatch(
    mut stream: TcpStream,
    addr: SocketAddr,
    table: Arc<Vec<RouteEntry>>,
    timeout: Duration,
) {
    let mut sniffed = Vec::new();
    let selected = tokio::time::timeout(timeout, select_route(&mut stream, &mut sniffed, &table)).await;

    let index = match selected {
        Ok(Ok(Some(index))) => index,
        Ok(Ok(None)) => {
            debug!("No route matches connection from {}", addr);
            return;
        }
        Ok(Err(e)) => {
            debug!("Sniffing connection from {} failed: {}", addr, e);
            return;
        }
        Err(_) => {
            debug!("Connection from {} sent too little to route in {:?}", addr, timeout);
            return;
        }
    };

    let route = &table[index];
    debug!("Routing {} to {}", addr, route.name);
    if route
        .tx
        .send((SniffedStream::new(stream, sniffed), addr))
        .await
        .is_err()
    {
        debug!("Route {} is no longer accepting connections", route.name);
    }
}

/// Reads just enough of `stream` into `sniffed` for a route to be chosen.
async fn select_route(
    stream: &mut TcpStream,
    sniffed: &mut Vec<u8>,
    table: &[RouteEntry],
) -> std::io::Result<Option<usize>> {
    let mut chunk = [0u8; 1024];
    let mut exhausted = false;

    loop {
        let mut need_more = false;
        for (index, entry) in table.iter().enumerate() {
            match entry.matcher.check(sniffed) {
                MatchResult::Match => return Ok(Some(index)),
                MatchResult::NeedMore if !exhausted => {
                    need_more = true;
                    break;
                }
                MatchResult::NeedMore | MatchResult::NoMatch => {}
            }
        }
        if !need_more {
            return Ok(None);
        }

        if sniffed.len() >= SNIFF_LIMIT {
            exhausted = true;
            continue;
        }
        let want = (SNIFF_LIMIT - sniffed.len()).min(chunk.len());
        let n = stream.read(&mut chunk[..want]).await?;
        if n == 0 {
            exhausted = true;
        }
        sniffed.extend_from_slice(&chunk[..n]);
    }
}

/// Serves an axum application from a route.
pub struct HttpService {
    name: String,
    app: axum::Router,
}

impl HttpService {
    pub fn new(name: &str, app: axum::Router) -> Self {
        Self {
            name: name.to_string(),
            app,
        }
    }
}

#[async_trait]
impl Service for HttpService {
    async fn serve(&self, listener: RouteListener) -> Result<(), RouterError> {
        let shutdown = listener.shutdown_token();
        axum::serve(listener, self.app.clone())
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(|e| RouterError::service(&self.name, e))
    }
}
