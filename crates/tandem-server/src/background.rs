//! Background tasks for the tandem server.
//!
//! Includes:
//! - The token keeper extending session tokens while connections stay up.
//! - The local event bridge fanning bus events out to clients.
//! - The peer relay mirroring bus events to connected peer sites.
//! - One reconnecting outbound link per configured peer site.

use std::sync::Arc;

use tandem_federation::{
    BackoffPolicy, PeerConnector, PeerRelayHooks, PeerRestApi, ReqwestPeerApi, SiteLink,
    WsConnector,
};
use tandem_hub::{run_token_keeper, LocalEventBridge};

use crate::AppState;

/// Spawns every long-running task of the server.
pub fn spawn_all(state: &AppState, backoff: BackoffPolicy) {
    tokio::spawn(run_token_keeper(state.hub.clone()));

    let bridge = LocalEventBridge::new(state.hub.clone());
    tokio::spawn(bridge.run(state.events.subscribe()));

    let relay = PeerRelayHooks::new(state.hub.clone());
    tokio::spawn(relay.run(state.events.subscribe()));

    spawn_site_links(state, backoff);
}

/// Starts one reconnecting link per configured peer site.
fn spawn_site_links(state: &AppState, backoff: BackoffPolicy) {
    if state.sites.is_empty() {
        tracing::info!("no peer sites configured");
        return;
    }

    let connector: Arc<dyn PeerConnector> = Arc::new(WsConnector);
    let rest: Arc<dyn PeerRestApi> = Arc::new(ReqwestPeerApi::new());

    for name in state.sites.site_names() {
        let Some(site) = state.sites.site(&name) else {
            continue;
        };
        tracing::info!(site = %name, hostname = %site.hostname, "starting peer site link");
        let link = Arc::new(SiteLink::new(
            name,
            site.clone(),
            state.hub.clone(),
            state.sites.clone(),
            connector.clone(),
            rest.clone(),
            backoff,
        ));
        tokio::spawn(link.run());
    }
}
