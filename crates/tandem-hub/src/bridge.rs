//! Bridges the internal domain-event bus onto connected local clients.
//!
//! One bridge task consumes the bus and applies the per-event targeting
//! rules: room broadcasts for the update families, per-owner direct sends
//! for ringing/hangup, and the dual detail/counter pattern for voicemail
//! and post-it notifications.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use tandem_types::wire::{
    evt, PostitCounter, PostitList, VoicemailCounter, VoicemailList,
};
use tandem_types::{
    CallerIdentity, DialingInfo, DomainEvent, Extension, HangupInfo, Masking, PostitMessage,
    Visibility, VoiceMessage,
};

use crate::collab::Authorization;
use crate::hub::Hub;
use crate::redact::masking_for;
use crate::rooms::{Category, RoomId};

pub struct LocalEventBridge {
    hub: Arc<Hub>,
}

impl LocalEventBridge {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    /// Consumes the bus until it closes. A lagged receiver logs how many
    /// events it skipped and keeps going.
    pub async fn run(self, mut bus: broadcast::Receiver<DomainEvent>) {
        loop {
            match bus.recv().await {
                Ok(event) => self.dispatch(event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event bridge lagged behind the bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::info!("event bus closed, bridge stopping");
    }

    pub async fn dispatch(&self, event: DomainEvent) {
        tracing::debug!(kind = event.kind(), "dispatching event");
        match event {
            DomainEvent::ExtenChanged(ext) => self.exten_changed(ext).await,
            DomainEvent::TrunkChanged(trunk) => {
                self.two_room(
                    Category::Trunks,
                    evt::TRUNK_UPDATE,
                    trunk.to_json(Masking::Clear),
                    trunk.to_json(Masking::Full(self.hub.mask())),
                )
                .await;
            }
            DomainEvent::QueueChanged(queue) => {
                self.two_room(
                    Category::Queues,
                    evt::QUEUE_UPDATE,
                    queue.to_json(Masking::Clear),
                    queue.to_json(Masking::Full(self.hub.mask())),
                )
                .await;
            }
            DomainEvent::ParkingChanged(parking) => {
                self.two_room(
                    Category::Parkings,
                    evt::PARKING_UPDATE,
                    parking.to_json(Masking::Clear),
                    parking.to_json(Masking::Full(self.hub.mask())),
                )
                .await;
            }
            DomainEvent::QueueMemberChanged(member) => {
                // Member stats carry no counterpart identity; both queue
                // rooms get the same payload.
                let payload = member.to_json();
                self.two_room(
                    Category::Queues,
                    evt::QUEUE_MEMBER_UPDATE,
                    payload.clone(),
                    payload,
                )
                .await;
            }
            DomainEvent::ExtenDialing(info) => self.exten_dialing(info).await,
            DomainEvent::ExtenHangup(info) => self.exten_hangup(info).await,
            DomainEvent::EndpointPresenceChanged(presence) => {
                // Presence carries no number PII; both extension rooms get
                // the identical payload.
                let Some(payload) = encode(evt::ENDPOINT_PRESENCE_UPDATE, &presence) else {
                    return;
                };
                self.two_room(
                    Category::Extensions,
                    evt::ENDPOINT_PRESENCE_UPDATE,
                    payload.clone(),
                    payload,
                )
                .await;
            }
            DomainEvent::NewVoicemail { mailbox, messages } => {
                self.new_voicemail(mailbox, messages).await;
            }
            DomainEvent::NewPostit {
                recipient,
                messages,
            } => self.new_postit(recipient, messages).await,
        }
    }

    async fn two_room(&self, category: Category, event: &str, clear: Value, masked: Value) {
        self.hub
            .broadcast_to_room(RoomId::clear(category), event, clear)
            .await;
        self.hub
            .broadcast_to_room(RoomId::privacy(category), event, masked)
            .await;
    }

    async fn exten_changed(&self, ext: Extension) {
        if self.hub.ownership_aware() {
            let authz = self.hub.authz();
            let mask = self.hub.mask();
            self.hub
                .broadcast_per_recipient(
                    evt::EXTEN_UPDATE,
                    |s| authz.extensions_allowed(&s.username),
                    |s| {
                        let masking = masking_for(
                            mask,
                            authz.privacy_enabled(&s.username),
                            authz.admin_queues_allowed(&s.username),
                            authz.user_owns_extension(&s.username, &ext.exten),
                        );
                        Some(ext.to_json(masking))
                    },
                )
                .await;
        } else {
            self.two_room(
                Category::Extensions,
                evt::EXTEN_UPDATE,
                ext.to_json(Masking::Clear),
                ext.to_json(Masking::Full(self.hub.mask())),
            )
            .await;
        }
    }

    /// Ringing notifications go to the owners of the dialing extension
    /// only, each with the caller identity that viewer is allowed to see.
    async fn exten_dialing(&self, info: DialingInfo) {
        let owners = self.hub.users().users_by_extension(&info.dialing_exten);
        if owners.is_empty() {
            tracing::debug!(
                exten = %info.dialing_exten,
                "dialing event for an extension with no users"
            );
            return;
        }
        for owner in owners {
            let identity =
                filtered_caller_identity(self.hub.authz().as_ref(), &owner, &info);
            let Some(payload) = encode(evt::EXTEN_RINGING, &identity) else {
                continue;
            };
            self.hub
                .send_to_user(&owner, evt::EXTEN_RINGING, payload)
                .await;
        }
    }

    async fn exten_hangup(&self, info: HangupInfo) {
        let owners = self.hub.users().users_by_extension(&info.channel_exten);
        let Some(payload) = encode(evt::EXTEN_HANGUP, &info) else {
            return;
        };
        for owner in owners {
            self.hub
                .send_to_user(&owner, evt::EXTEN_HANGUP, payload.clone())
                .await;
        }
    }

    /// Dual emission: the full message list only to the mailbox owners,
    /// the counter to every session with no authorization check.
    async fn new_voicemail(&self, mailbox: String, messages: Vec<VoiceMessage>) {
        let counter = VoicemailCounter {
            voicemail: mailbox.clone(),
            counter: messages.len(),
        };
        for owner in self.hub.users().users_by_voicemail(&mailbox) {
            let list = VoicemailList {
                voicemail: mailbox.clone(),
                messages: messages.clone(),
            };
            let Some(payload) = encode(evt::UPDATE_NEW_VOICE_MESSAGES, &list) else {
                continue;
            };
            self.hub
                .send_to_user(&owner, evt::UPDATE_NEW_VOICE_MESSAGES, payload)
                .await;
        }
        if let Some(payload) = encode(evt::NEW_VOICE_MESSAGE_COUNTER, &counter) {
            self.hub
                .broadcast_filtered(evt::NEW_VOICE_MESSAGE_COUNTER, payload, |_| true)
                .await;
        }
    }

    async fn new_postit(&self, recipient: String, messages: Vec<PostitMessage>) {
        let counter = PostitCounter {
            user: recipient.clone(),
            counter: messages.len(),
        };
        let list = PostitList {
            user: recipient.clone(),
            messages,
        };
        if let Some(payload) = encode(evt::UPDATE_NEW_POSTIT, &list) {
            self.hub
                .send_to_user(&recipient, evt::UPDATE_NEW_POSTIT, payload)
                .await;
        }
        if let Some(payload) = encode(evt::NEW_POSTIT_COUNTER, &counter) {
            self.hub
                .broadcast_filtered(evt::NEW_POSTIT_COUNTER, payload, |_| true)
                .await;
        }
    }
}

/// Narrows the caller identity of a dialing event to what one viewer may
/// see: notes filtered by post-it tier, one phonebook contact by the
/// own-CTI → centralized → public-CTI precedence, gated by the phonebook
/// grant.
fn filtered_caller_identity(
    authz: &dyn Authorization,
    viewer: &str,
    info: &DialingInfo,
) -> CallerIdentity {
    let caller_notes = if authz.admin_postit_allowed(viewer) {
        info.caller_notes.clone()
    } else if authz.postit_allowed(viewer) {
        info.caller_notes
            .iter()
            .filter(|n| n.creator == viewer || n.visibility == Visibility::Public)
            .cloned()
            .collect()
    } else {
        Vec::new()
    };

    let pb_contact = if authz.phonebook_allowed(viewer) {
        let pb = &info.pb_contacts;
        pb.cti
            .iter()
            .find(|c| c.owner_id == viewer)
            .or_else(|| pb.centralized.first())
            .or_else(|| pb.cti.iter().find(|c| c.visibility == Visibility::Public))
            .cloned()
    } else {
        None
    };

    CallerIdentity {
        num_called: info.num_called.clone(),
        caller_num: info.caller_num.clone(),
        caller_name: info.caller_name.clone(),
        pb_contact,
        caller_notes,
    }
}

fn encode<T: Serialize>(event: &str, value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(event, "dropping unserializable event payload: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{login, new_hub, new_hub_with, recv_frame, Fixture};
    use serde_json::json;
    use tandem_types::{
        CallerNote, Conversation, Direction, EndpointPresence, ExtenStatus, PhonebookContact,
        PhonebookMatches,
    };

    fn exten_201() -> Extension {
        let mut ext = Extension {
            exten: "201".to_string(),
            name: "Alice Line".to_string(),
            status: ExtenStatus::Busy,
            dnd: false,
            cf: String::new(),
            conversations: Default::default(),
        };
        ext.conversations.insert(
            "c1".to_string(),
            Conversation {
                id: "c1".to_string(),
                owner: "201".to_string(),
                direction: Direction::In,
                start_time: 1_700_000_000_000,
                duration: 42,
                recording: false,
                through_queue: false,
                in_conference: false,
                counterpart_num: "0123456789".to_string(),
                counterpart_name: "Carol".to_string(),
            },
        );
        ext
    }

    fn bridge_for(hub: Hub) -> (Arc<Hub>, LocalEventBridge) {
        let hub = Arc::new(hub);
        (hub.clone(), LocalEventBridge::new(hub))
    }

    #[tokio::test]
    async fn exten_update_is_clear_in_one_room_and_masked_in_the_other() {
        let fx = Fixture::new();
        fx.grant_extensions("alice", false);
        fx.grant_extensions("bob", true);
        let (hub, bridge) = bridge_for(new_hub(&fx));

        let (_a, mut rx_alice) = login(&hub, "alice", None).await;
        let (_b, mut rx_bob) = login(&hub, "bob", None).await;

        bridge.dispatch(DomainEvent::ExtenChanged(exten_201())).await;

        let clear = recv_frame(&mut rx_alice).await.unwrap();
        assert_eq!(clear.event, evt::EXTEN_UPDATE);
        assert_eq!(
            clear.data["conversations"]["c1"]["counterpartNum"],
            json!("0123456789")
        );

        let masked = recv_frame(&mut rx_bob).await.unwrap();
        assert_eq!(
            masked.data["conversations"]["c1"]["counterpartNum"],
            json!("0123456xxx")
        );
        assert_eq!(
            masked.data["conversations"]["c1"]["counterpartName"],
            json!("xxx")
        );
    }

    #[tokio::test]
    async fn ownership_aware_exten_update_redacts_per_viewer() {
        let fx = Fixture::new();
        fx.grant("alice", |f| {
            f.extensions = true;
            f.privacy = true;
            f.owned.insert("201".to_string());
        });
        fx.grant("bob", |f| {
            f.extensions = true;
            f.privacy = true;
        });
        fx.add_local_token("carol"); // no extensions grant
        let (hub, bridge) = bridge_for(new_hub_with(&fx, "xxx", true));

        let (_a, mut rx_alice) = login(&hub, "alice", None).await;
        let (_b, mut rx_bob) = login(&hub, "bob", None).await;
        let (_c, mut rx_carol) = login(&hub, "carol", None).await;

        bridge.dispatch(DomainEvent::ExtenChanged(exten_201())).await;

        // Privacy-enabled owner still sees clear.
        let alice = recv_frame(&mut rx_alice).await.unwrap();
        assert_eq!(
            alice.data["conversations"]["c1"]["counterpartNum"],
            json!("0123456789")
        );
        // Privacy-enabled non-owner is masked.
        let bob = recv_frame(&mut rx_bob).await.unwrap();
        assert_eq!(
            bob.data["conversations"]["c1"]["counterpartNum"],
            json!("0123456xxx")
        );
        // No grant, no frame.
        assert!(recv_frame(&mut rx_carol).await.is_none());
    }

    #[tokio::test]
    async fn presence_update_reaches_both_extension_rooms_unmasked() {
        let fx = Fixture::new();
        fx.grant_extensions("alice", false);
        fx.grant_extensions("bob", true);
        let (hub, bridge) = bridge_for(new_hub(&fx));

        let (_a, mut rx_alice) = login(&hub, "alice", None).await;
        let (_b, mut rx_bob) = login(&hub, "bob", None).await;

        bridge
            .dispatch(DomainEvent::EndpointPresenceChanged(EndpointPresence {
                username: "carol".to_string(),
                endpoint_type: "cellphone".to_string(),
                status: "online".to_string(),
            }))
            .await;

        let a = recv_frame(&mut rx_alice).await.unwrap();
        let b = recv_frame(&mut rx_bob).await.unwrap();
        assert_eq!(a.event, evt::ENDPOINT_PRESENCE_UPDATE);
        assert_eq!(a.data, b.data);
    }

    #[tokio::test]
    async fn dialing_notifies_owners_with_per_viewer_notes() {
        let fx = Fixture::new();
        fx.grant("alice", |f| f.admin_postit = true);
        fx.grant("bob", |f| f.postit = true);
        fx.add_local_token("carol");
        fx.map_extension("201", &["alice", "bob"]);
        let (hub, bridge) = bridge_for(new_hub(&fx));

        let (_a, mut rx_alice) = login(&hub, "alice", None).await;
        let (_b, mut rx_bob) = login(&hub, "bob", None).await;
        let (_c, mut rx_carol) = login(&hub, "carol", None).await;

        let info = DialingInfo {
            dialing_exten: "201".to_string(),
            num_called: "201".to_string(),
            caller_num: "0123456789".to_string(),
            caller_name: "Carol".to_string(),
            pb_contacts: PhonebookMatches::default(),
            caller_notes: vec![
                CallerNote {
                    creator: "dave".to_string(),
                    visibility: Visibility::Private,
                    text: "vip".to_string(),
                },
                CallerNote {
                    creator: "eve".to_string(),
                    visibility: Visibility::Public,
                    text: "supplier".to_string(),
                },
                CallerNote {
                    creator: "bob".to_string(),
                    visibility: Visibility::Private,
                    text: "called before".to_string(),
                },
            ],
        };
        bridge.dispatch(DomainEvent::ExtenDialing(info)).await;

        let alice = recv_frame(&mut rx_alice).await.unwrap();
        assert_eq!(alice.event, evt::EXTEN_RINGING);
        assert_eq!(alice.data["callerNotes"].as_array().unwrap().len(), 3);

        let bob = recv_frame(&mut rx_bob).await.unwrap();
        let bob_notes = bob.data["callerNotes"].as_array().unwrap();
        assert_eq!(bob_notes.len(), 2);
        assert!(bob_notes.iter().all(|n| {
            n["creator"] == json!("bob") || n["type"] == json!("public")
        }));

        // Not an owner of the dialing extension.
        assert!(recv_frame(&mut rx_carol).await.is_none());
    }

    #[test]
    fn phonebook_contact_precedence() {
        let fx = Fixture::new();
        fx.grant("alice", |f| f.phonebook = true);
        fx.add_local_token("frank");

        let own = PhonebookContact {
            owner_id: "alice".to_string(),
            visibility: Visibility::Private,
            name: "My Carol".to_string(),
            company: None,
            workphone: None,
        };
        let public_cti = PhonebookContact {
            owner_id: "eve".to_string(),
            visibility: Visibility::Public,
            name: "Shared Carol".to_string(),
            company: None,
            workphone: None,
        };
        let central = PhonebookContact {
            owner_id: String::new(),
            visibility: Visibility::Public,
            name: "Carol Inc".to_string(),
            company: Some("Carol Inc".to_string()),
            workphone: None,
        };
        let mut info = DialingInfo {
            dialing_exten: "201".to_string(),
            num_called: "201".to_string(),
            caller_num: "0123456789".to_string(),
            caller_name: String::new(),
            pb_contacts: PhonebookMatches {
                cti: vec![public_cti.clone(), own.clone()],
                centralized: vec![central.clone()],
            },
            caller_notes: Vec::new(),
        };

        let id = filtered_caller_identity(fx.authz.as_ref(), "alice", &info);
        assert_eq!(id.pb_contact.as_ref().unwrap().name, "My Carol");

        // No own entry: the centralized directory wins.
        info.pb_contacts.cti = vec![public_cti.clone()];
        let id = filtered_caller_identity(fx.authz.as_ref(), "alice", &info);
        assert_eq!(id.pb_contact.as_ref().unwrap().name, "Carol Inc");

        // No centralized entry either: fall back to a public CTI entry.
        info.pb_contacts.centralized = Vec::new();
        let id = filtered_caller_identity(fx.authz.as_ref(), "alice", &info);
        assert_eq!(id.pb_contact.as_ref().unwrap().name, "Shared Carol");

        // Without the phonebook grant there is no contact at all.
        let id = filtered_caller_identity(fx.authz.as_ref(), "frank", &info);
        assert!(id.pb_contact.is_none());
    }

    #[tokio::test]
    async fn hangup_reaches_owner_sessions_verbatim() {
        let fx = Fixture::new();
        fx.add_local_token("alice");
        fx.add_local_token("bob");
        fx.map_extension("201", &["alice"]);
        let (hub, bridge) = bridge_for(new_hub(&fx));

        let (_a, mut rx_alice) = login(&hub, "alice", None).await;
        let (_b, mut rx_bob) = login(&hub, "bob", None).await;

        bridge
            .dispatch(DomainEvent::ExtenHangup(HangupInfo {
                channel_exten: "201".to_string(),
                caller_num: "0123456789".to_string(),
                caller_name: "Carol".to_string(),
                cause: Some("normal".to_string()),
            }))
            .await;

        let frame = recv_frame(&mut rx_alice).await.unwrap();
        assert_eq!(frame.event, evt::EXTEN_HANGUP);
        assert_eq!(frame.data["channelExten"], json!("201"));
        assert_eq!(frame.data["callerNum"], json!("0123456789"));
        assert!(recv_frame(&mut rx_bob).await.is_none());
    }

    #[tokio::test]
    async fn voicemail_counter_goes_everywhere_detail_to_owners_only() {
        let fx = Fixture::new();
        fx.add_local_token("alice");
        fx.add_local_token("bob");
        fx.map_voicemail("209", &["alice"]);
        let (hub, bridge) = bridge_for(new_hub(&fx));

        let (_a, mut rx_alice) = login(&hub, "alice", None).await;
        let (_b, mut rx_bob) = login(&hub, "bob", None).await;

        let messages = vec![
            VoiceMessage {
                id: 1,
                caller_num: "0123456789".to_string(),
                caller_name: "Carol".to_string(),
                timestamp: 1_700_000_000_000,
                duration: 30,
            },
            VoiceMessage {
                id: 2,
                caller_num: "0123456789".to_string(),
                caller_name: "Carol".to_string(),
                timestamp: 1_700_000_060_000,
                duration: 12,
            },
            VoiceMessage {
                id: 3,
                caller_num: "555".to_string(),
                caller_name: "Dan".to_string(),
                timestamp: 1_700_000_120_000,
                duration: 7,
            },
        ];
        bridge
            .dispatch(DomainEvent::NewVoicemail {
                mailbox: "209".to_string(),
                messages,
            })
            .await;

        let detail = recv_frame(&mut rx_alice).await.unwrap();
        assert_eq!(detail.event, evt::UPDATE_NEW_VOICE_MESSAGES);
        assert_eq!(detail.data["messages"].as_array().unwrap().len(), 3);
        let counter = recv_frame(&mut rx_alice).await.unwrap();
        assert_eq!(counter.event, evt::NEW_VOICE_MESSAGE_COUNTER);
        assert_eq!(counter.data["counter"], json!(3));

        // The non-owner sees the counter and nothing else.
        let bob = recv_frame(&mut rx_bob).await.unwrap();
        assert_eq!(bob.event, evt::NEW_VOICE_MESSAGE_COUNTER);
        assert_eq!(bob.data["voicemail"], json!("209"));
        assert!(recv_frame(&mut rx_bob).await.is_none());
    }

    #[tokio::test]
    async fn postit_detail_to_recipient_counter_to_all() {
        let fx = Fixture::new();
        fx.add_local_token("alice");
        fx.add_local_token("bob");
        let (hub, bridge) = bridge_for(new_hub(&fx));

        let (_a, mut rx_alice) = login(&hub, "alice", None).await;
        let (_b, mut rx_bob) = login(&hub, "bob", None).await;

        bridge
            .dispatch(DomainEvent::NewPostit {
                recipient: "alice".to_string(),
                messages: vec![PostitMessage {
                    creator: "bob".to_string(),
                    recipient: "alice".to_string(),
                    text: "call me back".to_string(),
                    created_at: 1_700_000_000_000,
                }],
            })
            .await;

        let detail = recv_frame(&mut rx_alice).await.unwrap();
        assert_eq!(detail.event, evt::UPDATE_NEW_POSTIT);
        let counter = recv_frame(&mut rx_alice).await.unwrap();
        assert_eq!(counter.event, evt::NEW_POSTIT_COUNTER);
        assert_eq!(counter.data["counter"], json!(1));

        let bob = recv_frame(&mut rx_bob).await.unwrap();
        assert_eq!(bob.event, evt::NEW_POSTIT_COUNTER);
        assert!(recv_frame(&mut rx_bob).await.is_none());
    }
}
