//! Remote-site federation: outbound links to configured peer sites and the
//! relay of local events to peers connected inbound.
//!
//! One [`SiteLink`] task per configured site owns the connect / login /
//! snapshot / relay cycle and its reconnect backoff; [`RemoteSites`] is the
//! shared view of per-site status and snapshot caches; [`PeerRelayHooks`]
//! forwards local extension and presence changes to authenticated inbound
//! peers. REST and websocket transport sit behind traits so the whole
//! machinery runs against in-memory fakes in tests.

pub mod backoff;
pub mod inbound;
pub mod link;
pub mod rest;
pub mod sites;
pub mod transport;

#[cfg(test)]
pub(crate) mod testutil;

pub use backoff::BackoffPolicy;
pub use inbound::PeerRelayHooks;
pub use link::{LinkError, LinkState, SiteLink};
pub use rest::{PeerCredentials, PeerRestApi, ReqwestPeerApi, RestError, REMOTE_MARKER_HEADER};
pub use sites::{is_client_remote, RemoteSites, SiteError, SiteSnapshots};
pub use transport::{ConnectError, PeerConnector, PeerLink, WsConnector};
