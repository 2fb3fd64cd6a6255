//! # Arena Server - Single-Port Game Server Front End
//!
//! Infrastructure for hosting a real-time multiplayer game server behind one
//! TCP port that native clients, browser clients and peer content nodes all
//! share. The game engine itself runs as an external process; this crate
//! owns everything around it.
//!
//! ## Components
//!
//! * **Router** ([`router`]) - accepts on one listening socket, sniffs the first
//!   bytes of each connection and hands it to the first route whose
//!   [`Matcher`] accepts them. Sniffed bytes are replayed to the handler.
//! * **Tunnel** ([`tunnel`]) - bridges a browser websocket to the game's UDP
//!   port, one datagram socket per session, order preserved both ways.
//! * **Supervisor** ([`supervisor`]) - spawns the engine, re-renders its config
//!   and restarts it when the config file changes, respawns it after a crash
//!   and drains players before shutdown.
//! * **Content** ([`content`]) - checksummed asset manifests, mirroring of
//!   missing assets from an origin, uploads, and the HTTP/RPC surfaces that
//!   serve them.
//! * **Web** ([`web`]) - health, game info, Prometheus metrics and the asset
//!   proxy for browser clients.
//!
//! ## Wiring
//!
//! ```rust,ignore
//! let cancel = CancellationToken::new();
//! let mut router = Router::new(bind_listener(addr)?, cancel.clone());
//! router
//!     .register("rpc", Arc::new(ContentRpcService::new(root.clone())))
//!     .matches(Matcher::rpc_preface());
//! router
//!     .register("tunnel", Arc::new(WebSocketUdpProxy::open("0.0.0.0:27960").await?))
//!     .matches(Matcher::websocket());
//! router
//!     .register("web", Arc::new(HttpService::new("web", web_router(state))))
//!     .any();
//! router.serve_and_wait().await?;
//! ```
//!
//! ## Cancellation
//!
//! Every long-lived task takes a [`CancellationToken`](tokio_util::sync::CancellationToken)
//! derived from one root token. Cancelling the root stops the accept loop,
//! closes tunnel sessions with a going-away frame, drains and kills the game
//! process and stops the watch and telemetry loops.

pub mod content;
pub mod error;
pub mod metrics;
pub mod net;
pub mod query;
pub mod router;
pub mod run;
pub mod supervisor;
pub mod tunnel;
pub mod web;

pub use content::rpc::{ContentRpcService, RpcClient};
pub use error::{ContentError, QueryError, RouterError, RpcError, SupervisorError, TunnelError};
pub use metrics::ServerMetrics;
pub use query::{GameQuery, QueryKind, QueryResponse, UdpQueryClient};
pub use router::{HttpService, Matcher, RouteListener, Router, Service};
pub use supervisor::{ServerProcessState, Supervisor, SupervisorConfig};
pub use tunnel::WebSocketUdpProxy;
pub use web::{web_router, WebState};
