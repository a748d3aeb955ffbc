//! PBX domain objects and the in-process event union.
//!
//! Every object that can reach a client socket serializes through
//! [`to_json`](Extension::to_json) with a [`Masking`] argument, producing the
//! clear, partially redacted, or fully redacted variant of itself. The
//! masking tiers mirror the privacy model: the full tier hides the
//! counterpart number and name of every conversation, the partial tier
//! exempts queue-mediated traffic.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Redaction tier applied when serializing a domain object for a viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Masking<'a> {
    /// Unredacted output.
    Clear,
    /// Mask counterpart data only on conversations that do not traverse a
    /// queue; queue-mediated calls stay clear.
    Partial(&'a str),
    /// Mask the counterpart number and replace the counterpart name on every
    /// conversation.
    Full(&'a str),
}

/// Masks the trailing characters of a phone number with the mask token.
///
/// The leading digits are kept, the number is truncated by the token's
/// length, and the token is appended: `"0123456789"` with mask `"xxx"`
/// becomes `"0123456xxx"`. Numbers no longer than the token collapse to the
/// token alone.
pub fn mask_number(num: &str, mask: &str) -> String {
    let keep = num.chars().count().saturating_sub(mask.chars().count());
    if keep == 0 {
        return mask.to_string();
    }
    let mut out: String = num.chars().take(keep).collect();
    out.push_str(mask);
    out
}

/// Direction of a conversation relative to the local PBX.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

/// An active call leg attached to an extension or trunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Conversation identifier, unique within the owning endpoint.
    pub id: String,
    /// Extension that owns this conversation.
    pub owner: String,
    pub direction: Direction,
    /// Epoch milliseconds at call setup.
    pub start_time: u64,
    /// Elapsed seconds.
    pub duration: u64,
    pub recording: bool,
    /// True when the call was distributed by a queue.
    pub through_queue: bool,
    pub in_conference: bool,
    /// Remote party number.
    pub counterpart_num: String,
    /// Remote party display name.
    pub counterpart_name: String,
}

impl Conversation {
    /// Serializes the conversation, redacting the counterpart according to
    /// the masking tier.
    pub fn to_json(&self, masking: Masking<'_>) -> Value {
        let (num, name) = match masking {
            Masking::Clear => (self.counterpart_num.clone(), self.counterpart_name.clone()),
            Masking::Partial(_) if self.through_queue => {
                (self.counterpart_num.clone(), self.counterpart_name.clone())
            }
            Masking::Partial(mask) | Masking::Full(mask) => {
                (mask_number(&self.counterpart_num, mask), mask.to_string())
            }
        };
        json!({
            "id": self.id,
            "owner": self.owner,
            "direction": self.direction,
            "startTime": self.start_time,
            "duration": self.duration,
            "recording": self.recording,
            "throughQueue": self.through_queue,
            "inConference": self.in_conference,
            "counterpartNum": num,
            "counterpartName": name,
        })
    }
}

/// Registration/call state of an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtenStatus {
    Online,
    Offline,
    Busy,
    Ringing,
    OnHold,
    Dnd,
}

/// A PBX extension with its active conversations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    pub exten: String,
    pub name: String,
    pub status: ExtenStatus,
    /// Do-not-disturb flag.
    pub dnd: bool,
    /// Call-forward destination, empty when disabled.
    #[serde(default)]
    pub cf: String,
    #[serde(default)]
    pub conversations: HashMap<String, Conversation>,
}

impl Extension {
    pub fn to_json(&self, masking: Masking<'_>) -> Value {
        let convs: serde_json::Map<String, Value> = self
            .conversations
            .iter()
            .map(|(id, c)| (id.clone(), c.to_json(masking)))
            .collect();
        json!({
            "exten": self.exten,
            "name": self.name,
            "status": self.status,
            "dnd": self.dnd,
            "cf": self.cf,
            "conversations": convs,
        })
    }
}

/// Registration state of a trunk toward the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrunkStatus {
    Online,
    Offline,
    Busy,
}

/// An outbound/inbound trunk with its active conversations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trunk {
    pub trunk: String,
    pub name: String,
    pub status: TrunkStatus,
    pub max_channels: u32,
    #[serde(default)]
    pub conversations: HashMap<String, Conversation>,
}

impl Trunk {
    pub fn to_json(&self, masking: Masking<'_>) -> Value {
        let convs: serde_json::Map<String, Value> = self
            .conversations
            .iter()
            .map(|(id, c)| (id.clone(), c.to_json(masking)))
            .collect();
        json!({
            "trunk": self.trunk,
            "name": self.name,
            "status": self.status,
            "maxChannels": self.max_channels,
            "conversations": convs,
        })
    }
}

/// Static members are configured; dynamic members log in and out at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMemberKind {
    Static,
    Dynamic,
}

/// An agent belonging to a queue.
///
/// Carries no counterpart traffic, so its serialization is identical across
/// masking tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMember {
    pub queue: String,
    /// Extension of the member.
    pub member: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: QueueMemberKind,
    pub paused: bool,
    pub logged_in: bool,
    pub calls_taken: u32,
    /// Epoch milliseconds of the last answered call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_call_at: Option<u64>,
}

impl QueueMember {
    pub fn to_json(&self) -> Value {
        json!({
            "queue": self.queue,
            "member": self.member,
            "name": self.name,
            "type": self.kind,
            "paused": self.paused,
            "loggedIn": self.logged_in,
            "callsTaken": self.calls_taken,
            "lastCallAt": self.last_call_at,
        })
    }
}

/// A caller waiting in a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingCaller {
    pub channel: String,
    pub caller_num: String,
    pub caller_name: String,
    pub position: u32,
    /// Seconds spent waiting.
    pub waiting_time: u64,
}

impl WaitingCaller {
    /// Waiting callers are queue traffic by definition, so the partial tier
    /// leaves them clear.
    pub fn to_json(&self, masking: Masking<'_>) -> Value {
        let (num, name) = match masking {
            Masking::Clear | Masking::Partial(_) => {
                (self.caller_num.clone(), self.caller_name.clone())
            }
            Masking::Full(mask) => (mask_number(&self.caller_num, mask), mask.to_string()),
        };
        json!({
            "channel": self.channel,
            "callerNum": num,
            "callerName": name,
            "position": self.position,
            "waitingTime": self.waiting_time,
        })
    }
}

/// A call queue with its members and waiting callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Queue {
    pub queue: String,
    pub name: String,
    /// Average hold time in seconds.
    pub avg_hold_time: u64,
    #[serde(default)]
    pub members: HashMap<String, QueueMember>,
    #[serde(default)]
    pub waiting_callers: HashMap<String, WaitingCaller>,
}

impl Queue {
    pub fn to_json(&self, masking: Masking<'_>) -> Value {
        let members: serde_json::Map<String, Value> = self
            .members
            .iter()
            .map(|(id, m)| (id.clone(), m.to_json()))
            .collect();
        let waiting: serde_json::Map<String, Value> = self
            .waiting_callers
            .iter()
            .map(|(id, w)| (id.clone(), w.to_json(masking)))
            .collect();
        json!({
            "queue": self.queue,
            "name": self.name,
            "avgHoldTime": self.avg_hold_time,
            "members": members,
            "waitingCallers": waiting,
        })
    }
}

/// A caller sitting on a parking slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParkedCaller {
    pub num: String,
    pub name: String,
    /// Extension that parked the call.
    pub parker_num: String,
    /// Seconds until timeout recall.
    pub timeout_secs: u64,
}

/// A parking slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parking {
    pub parking: String,
    pub name: String,
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parked_caller: Option<ParkedCaller>,
}

impl Parking {
    pub fn to_json(&self, masking: Masking<'_>) -> Value {
        let parked = self.parked_caller.as_ref().map(|p| match masking {
            // A parked call never traverses a queue, so partial masks it too.
            Masking::Partial(mask) | Masking::Full(mask) => json!({
                "num": mask_number(&p.num, mask),
                "name": mask,
                "parkerNum": mask_number(&p.parker_num, mask),
                "timeoutSecs": p.timeout_secs,
            }),
            Masking::Clear => json!({
                "num": p.num,
                "name": p.name,
                "parkerNum": p.parker_num,
                "timeoutSecs": p.timeout_secs,
            }),
        });
        json!({
            "parking": self.parking,
            "name": self.name,
            "timeoutSecs": self.timeout_secs,
            "parkedCaller": parked,
        })
    }
}

/// Presence state of one endpoint of a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointPresence {
    pub username: String,
    /// Endpoint kind, e.g. `extension`, `cellphone`, `desktop`.
    pub endpoint_type: String,
    /// Presence value as the user component publishes it.
    pub status: String,
}

/// Visibility of a phonebook contact or caller note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

/// A phonebook entry matched against a caller number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhonebookContact {
    /// Username owning the entry; centralized entries carry an empty owner.
    #[serde(default)]
    pub owner_id: String,
    #[serde(rename = "type")]
    pub visibility: Visibility,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workphone: Option<String>,
}

/// A note a user attached to a caller number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerNote {
    pub creator: String,
    pub visibility: Visibility,
    pub text: String,
}

/// Phonebook matches for a caller, grouped by directory source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhonebookMatches {
    /// Entries from the CTI phonebook (owned by users).
    #[serde(default)]
    pub cti: Vec<PhonebookContact>,
    /// Entries from the centralized directory.
    #[serde(default)]
    pub centralized: Vec<PhonebookContact>,
}

/// Raw identity data accompanying a dialing event, before per-viewer
/// filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialingInfo {
    /// Extension being rung.
    pub dialing_exten: String,
    pub num_called: String,
    pub caller_num: String,
    pub caller_name: String,
    #[serde(default)]
    pub pb_contacts: PhonebookMatches,
    #[serde(default)]
    pub caller_notes: Vec<CallerNote>,
}

/// The caller identity a specific viewer is allowed to see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerIdentity {
    pub num_called: String,
    pub caller_num: String,
    pub caller_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pb_contact: Option<PhonebookContact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub caller_notes: Vec<CallerNote>,
}

/// Hangup data delivered to the owners of the hung-up extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HangupInfo {
    pub channel_exten: String,
    pub caller_num: String,
    pub caller_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

/// A voicemail message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceMessage {
    pub id: u64,
    pub caller_num: String,
    pub caller_name: String,
    /// Epoch milliseconds.
    pub timestamp: u64,
    /// Seconds.
    pub duration: u64,
}

/// A post-it message left for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostitMessage {
    pub creator: String,
    pub recipient: String,
    pub text: String,
    /// Epoch milliseconds.
    pub created_at: u64,
}

/// Event union produced by the PBX-proxy, voicemail, post-it, and user
/// collaborators, consumed by the event bridge and the federation relays.
///
/// Instances are transient and never mutated by consumers.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    ExtenChanged(Extension),
    TrunkChanged(Trunk),
    QueueChanged(Queue),
    ParkingChanged(Parking),
    QueueMemberChanged(QueueMember),
    ExtenDialing(DialingInfo),
    ExtenHangup(HangupInfo),
    EndpointPresenceChanged(EndpointPresence),
    NewVoicemail {
        mailbox: String,
        messages: Vec<VoiceMessage>,
    },
    NewPostit {
        recipient: String,
        messages: Vec<PostitMessage>,
    },
}

impl DomainEvent {
    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::ExtenChanged(_) => "extenChanged",
            DomainEvent::TrunkChanged(_) => "trunkChanged",
            DomainEvent::QueueChanged(_) => "queueChanged",
            DomainEvent::ParkingChanged(_) => "parkingChanged",
            DomainEvent::QueueMemberChanged(_) => "queueMemberChanged",
            DomainEvent::ExtenDialing(_) => "extenDialing",
            DomainEvent::ExtenHangup(_) => "extenHangup",
            DomainEvent::EndpointPresenceChanged(_) => "endpointPresenceChanged",
            DomainEvent::NewVoicemail { .. } => "newVoicemail",
            DomainEvent::NewPostit { .. } => "newPostit",
        }
    }
}
