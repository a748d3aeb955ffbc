//! Shared types and constants for the Tandem notification engine.
//!
//! This crate provides the foundational types used across all Tandem crates:
//! the PBX domain objects (extensions, trunks, queues, parkings) with their
//! masking-aware JSON serialization, the `DomainEvent` union carried on the
//! in-process event bus, the websocket wire protocol, and the remote-site
//! configuration entities.
//!
//! No crate in the workspace depends on anything *except* `tandem-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

pub mod events;
pub mod site;
pub mod wire;

pub use events::{
    mask_number, CallerIdentity, CallerNote, Conversation, DialingInfo, Direction, DomainEvent,
    EndpointPresence, ExtenStatus, Extension, HangupInfo, Masking, Parking, ParkedCaller,
    PhonebookContact, PhonebookMatches, PostitMessage, Queue, QueueMember, QueueMemberKind,
    TrunkStatus, Trunk, Visibility, VoiceMessage, WaitingCaller,
};
pub use site::{RemoteSite, SiteStatus};
pub use wire::{Frame, LoginData, RemoteRelay};
