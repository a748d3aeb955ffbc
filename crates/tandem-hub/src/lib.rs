//! Session, room, and fan-out core shared by every transport listener.
//!
//! The hub owns who is connected ([`registry`]), which broadcast rooms each
//! connection joined ([`rooms`]), and how payloads are redacted per viewer
//! ([`redact`]). The [`bridge`] consumes the domain-event bus and drives
//! the emission helpers of [`hub::Hub`]; the [`keeper`] extends session
//! tokens while connections stay up. Backing services — token store,
//! authorization, user directory — are injected through the [`collab`]
//! traits, so any number of listeners and the federation layer share one
//! hub instance.

pub mod bridge;
pub mod collab;
pub mod hub;
pub mod keeper;
pub mod redact;
pub mod registry;
pub mod rooms;

#[cfg(test)]
pub(crate) mod testutil;

pub use bridge::LocalEventBridge;
pub use collab::{
    AuthError, Authentication, Authorization, ClientPresence, IdentityGrants, UserDirectory,
};
pub use hub::{Hub, HubEvent, LoginError, DESKTOP_ORIGIN, SEND_QUEUE_DEPTH};
pub use keeper::run_token_keeper;
pub use redact::{masking_for, redact, redact_conversations};
pub use registry::{Session, SessionRegistry};
pub use rooms::{rooms_for, Category, RoomId, RoomRouter, Variant};
