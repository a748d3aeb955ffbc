//! Relay of local events to inbound peer sessions.
//!
//! Peers that authenticated against our websocket endpoint follow local
//! extension and endpoint-presence changes. The payload crosses the
//! federation boundary clear: the receiving site applies its own viewer
//! redaction before anything reaches a client. What peers never see is
//! decided here — only these two event families leave the site.

use std::sync::Arc;

use tokio::sync::broadcast;

use tandem_hub::hub::Hub;
use tandem_types::wire::evt;
use tandem_types::{DomainEvent, Masking};

pub struct PeerRelayHooks {
    hub: Arc<Hub>,
}

impl PeerRelayHooks {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    /// Consumes the bus until it closes, mirroring the local bridge task.
    pub async fn run(self, mut bus: broadcast::Receiver<DomainEvent>) {
        loop {
            match bus.recv().await {
                Ok(event) => self.dispatch(event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "peer relay lagged behind the bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::info!("event bus closed, peer relay stopping");
    }

    pub async fn dispatch(&self, event: DomainEvent) {
        let authz = self.hub.authz();
        match event {
            DomainEvent::ExtenChanged(ext) => {
                self.hub
                    .relay_to_peers(evt::REMOTE_EXTEN_UPDATE, ext.to_json(Masking::Clear), |s| {
                        authz.remote_site_allowed(&s.username)
                    })
                    .await;
            }
            DomainEvent::EndpointPresenceChanged(presence) => {
                let payload = match serde_json::to_value(&presence) {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::warn!("unserializable presence event: {err}");
                        return;
                    }
                };
                self.hub
                    .relay_to_peers(evt::REMOTE_ENDPOINT_PRESENCE_UPDATE, payload, |s| {
                        authz.remote_site_allowed(&s.username)
                    })
                    .await;
            }
            _ => {}
        }
    }
}
