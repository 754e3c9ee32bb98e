//! Pure extraction over upstream markup. Nothing here touches the network.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;

use crate::chain::Confidence;

/// Avatar fields, highest resolution first.
pub const AVATAR_FIELDS: [&str; 3] = ["avatarLarger", "avatarMedium", "avatarThumb"];

pub const NAME_FIELDS: [&str; 2] = ["nickname", "nickName"];

/// Script ids under which profile pages inline their client state.
const STATE_MARKERS: [&str; 2] = ["SIGI_STATE", "__UNIVERSAL_DATA_FOR_REHYDRATION__"];

const USER_DETAIL_POINTERS: [&str; 2] = [
    "/userInfo/user",
    "/__DEFAULT_SCOPE__/webapp.user-detail/userInfo/user",
];

static AVATAR_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    AVATAR_FIELDS
        .iter()
        .map(|field| {
            Regex::new(&format!(r#""{}":"([^"]+)""#, field)).expect("avatar field pattern is valid")
        })
        .collect()
});

/// A user record picked out of an embedded state blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateProfile {
    pub avatar: String,
    pub name: Option<String>,
    pub confidence: Confidence,
}

/// Parses every embedded state blob found in `html`. Blobs that fail to parse
/// are skipped.
pub fn embedded_states(html: &str) -> Vec<Value> {
    let document = Html::parse_document(html);
    let mut states = Vec::new();

    for marker in STATE_MARKERS {
        let Ok(selector) = Selector::parse(&format!("script#{}", marker)) else {
            continue;
        };
        for script in document.select(&selector) {
            let raw: String = script.text().collect();
            match serde_json::from_str::<Value>(raw.trim()) {
                Ok(state) => states.push(state),
                Err(e) => tracing::debug!(marker, error = %e, "embedded state did not parse"),
            }
        }
    }

    states
}

/// Finds the best user record for `handle` across all embedded states.
pub fn profile_from_html(html: &str, handle: &str) -> Option<StateProfile> {
    embedded_states(html)
        .iter()
        .find_map(|state| profile_from_state(state, handle))
}

/// Picks a user record by precedence and reads its avatar and name.
///
/// Precedence: exact key in `UserModule.users`, then a user-detail record whose
/// `uniqueId` matches, then the first record in `UserModule.users` (only when
/// the handle has no key there), then any user-detail record. The last two are reported as
/// [`Confidence::FirstRecordFallback`] since they may belong to someone else.
pub fn profile_from_state(state: &Value, handle: &str) -> Option<StateProfile> {
    candidate_records(state, handle)
        .into_iter()
        .find_map(|(record, confidence)| {
            let avatar = first_string(record, &AVATAR_FIELDS)?;
            Some(StateProfile {
                avatar,
                name: first_string(record, &NAME_FIELDS),
                confidence,
            })
        })
}

fn candidate_records<'a>(state: &'a Value, handle: &str) -> Vec<(&'a Value, Confidence)> {
    let users = state.pointer("/UserModule/users").and_then(Value::as_object);
    let details: Vec<&Value> = USER_DETAIL_POINTERS
        .iter()
        .filter_map(|pointer| state.pointer(pointer))
        .filter(|record| record.is_object())
        .collect();

    let matches_handle = |record: &&Value| {
        record
            .get("uniqueId")
            .and_then(Value::as_str)
            .is_some_and(|id| id.eq_ignore_ascii_case(handle))
    };

    let keyed = users.and_then(|users| {
        users.get(handle).or_else(|| {
            users
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(handle))
                .map(|(_, record)| record)
        })
    });

    let mut exact: Vec<&Value> = Vec::new();
    exact.extend(keyed);
    exact.extend(details.iter().copied().filter(matches_handle));

    // Another user's record is only considered when the handle has no key.
    let mut fallback: Vec<&Value> = Vec::new();
    if keyed.is_none() {
        fallback.extend(users.and_then(|users| users.values().next()));
    }
    fallback.extend(details.iter().copied().filter(|record| !matches_handle(record)));

    let mut out: Vec<(&Value, Confidence)> = Vec::new();
    for record in exact {
        push_unique(&mut out, record, Confidence::Exact);
    }
    for record in fallback {
        push_unique(&mut out, record, Confidence::FirstRecordFallback);
    }
    out
}

fn push_unique<'a>(out: &mut Vec<(&'a Value, Confidence)>, record: &'a Value, confidence: Confidence) {
    if !out.iter().any(|(seen, _)| std::ptr::eq(*seen, record)) {
        out.push((record, confidence));
    }
}

fn first_string(record: &Value, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| {
        record
            .get(*field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// Content of `<meta property="...">`, if present and non-empty.
pub fn meta_property(html: &str, property: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(&format!(r#"meta[property="{}"]"#, property)).ok()?;
    document
        .select(&selector)
        .filter_map(|meta| meta.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())
        .map(str::to_string)
}

/// Last-resort scan of raw markup for avatar fields, in resolution order.
/// The match is returned still JSON-escaped.
pub fn scan_avatar_fields(html: &str) -> Option<String> {
    AVATAR_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(html)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    })
}
