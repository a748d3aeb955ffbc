//! Viewer-dependent redaction of event payloads.
//!
//! Domain objects know how to mask themselves (`to_json(Masking)`); this
//! module decides *which* tier a viewer gets, and applies the same masking
//! to raw JSON payloads whose concrete type is unknown — peer snapshot
//! entries and relayed extension updates arrive as `serde_json::Value`.
//!
//! Everything here is pure: no I/O, no side effects, independently
//! unit-testable.

use serde_json::Value;
use tandem_types::{mask_number, Masking};

/// Selects the redaction tier for a viewer, in priority order: ownership
/// always wins, then privacy without the queue bypass masks fully, privacy
/// with the bypass masks partially, and no privacy means clear.
pub fn masking_for<'a>(
    mask: &'a str,
    privacy_enabled: bool,
    bypass_for_queues: bool,
    owns: bool,
) -> Masking<'a> {
    if owns || !privacy_enabled {
        Masking::Clear
    } else if bypass_for_queues {
        Masking::Partial(mask)
    } else {
        Masking::Full(mask)
    }
}

/// Redacts a payload for a viewer described by their flags.
///
/// The payload's embedded `conversations` map is masked according to the
/// selected tier; everything else passes through untouched.
pub fn redact(
    payload: &Value,
    mask: &str,
    privacy_enabled: bool,
    bypass_for_queues: bool,
    owns: bool,
) -> Value {
    redact_conversations(
        payload,
        masking_for(mask, privacy_enabled, bypass_for_queues, owns),
    )
}

/// Applies a masking tier to every conversation embedded in a JSON payload.
pub fn redact_conversations(payload: &Value, masking: Masking<'_>) -> Value {
    if matches!(masking, Masking::Clear) {
        return payload.clone();
    }
    let mut out = payload.clone();
    if let Some(convs) = out.get_mut("conversations").and_then(Value::as_object_mut) {
        for conv in convs.values_mut() {
            mask_conversation(conv, masking);
        }
    }
    out
}

fn mask_conversation(conv: &mut Value, masking: Masking<'_>) {
    let mask = match masking {
        Masking::Clear => return,
        Masking::Partial(m) | Masking::Full(m) => m,
    };
    if matches!(masking, Masking::Partial(_))
        && conv
            .get("throughQueue")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    {
        return;
    }
    if let Some(obj) = conv.as_object_mut() {
        if let Some(num) = obj.get("counterpartNum").and_then(Value::as_str) {
            let masked = mask_number(num, mask);
            obj.insert("counterpartNum".to_string(), Value::String(masked));
        }
        obj.insert(
            "counterpartName".to_string(),
            Value::String(mask.to_string()),
        );
    }
}
