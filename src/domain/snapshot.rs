//! Inbound state snapshots.
//!
//! A [`Snapshot`] is one complete state payload pushed by the simulation.
//! Only the top-level shape is typed (`tick`, `timestamp`, `status`); every
//! other section is kept verbatim as JSON so that the backend owns the
//! schema. A new message always decodes into a wholly new value.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LinkError;

/// Snapshot timestamp as sent by the backend.
///
/// The simulation emits epoch seconds as a float; ISO-8601 strings are
/// accepted too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    /// Seconds since the Unix epoch.
    Epoch(f64),
    /// Textual timestamp, kept as sent.
    Text(String),
}

/// One decoded state payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Simulation tick this snapshot describes.
    pub tick: u64,

    /// Backend timestamp, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,

    /// Run status reported by the backend (e.g. `"RUNNING"`, `"PAUSED"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Remaining top-level sections (`macro`, `finance`, `politics`, ...),
    /// in the order the backend sent them.
    #[serde(flatten)]
    pub sections: Map<String, Value>,
}

impl Snapshot {
    /// Decodes a snapshot from a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Decode`] if `raw` is not a JSON object with an
    /// unsigned integer `tick`.
    pub fn decode(raw: &str) -> Result<Self, LinkError> {
        serde_json::from_str(raw).map_err(|e| LinkError::Decode(e.to_string()))
    }

    /// Returns a top-level section by name.
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&Value> {
        self.sections.get(name)
    }

    /// Looks up a nested value with a JSON pointer rooted at the sections,
    /// e.g. `"/finance/rates/base"`.
    #[must_use]
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        let rest = pointer.strip_prefix('/')?;
        let (head, tail) = match rest.split_once('/') {
            Some((head, tail)) => (head, Some(tail)),
            None => (rest, None),
        };
        let section = self.sections.get(head)?;
        match tail {
            Some(tail) => section.pointer(&format!("/{tail}")),
            None => Some(section),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    const FRAME: &str = r#"{
        "tick": 42,
        "timestamp": 1700000000.5,
        "status": "RUNNING",
        "macro": {"gdp": 1000000.0, "cpi": 101.2},
        "finance": {"rates": {"base": 0.05, "loan": 0.07}}
    }"#;

    #[test]
    fn decodes_typed_header_and_sections() {
        let Ok(snapshot) = Snapshot::decode(FRAME) else {
            panic!("frame must decode");
        };
        assert_eq!(snapshot.tick, 42);
        assert_eq!(snapshot.timestamp, Some(Timestamp::Epoch(1_700_000_000.5)));
        assert_eq!(snapshot.status.as_deref(), Some("RUNNING"));
        let keys: Vec<&str> = snapshot.sections.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["macro", "finance"]);
    }

    #[test]
    fn pointer_walks_into_sections() {
        let Ok(snapshot) = Snapshot::decode(FRAME) else {
            panic!("frame must decode");
        };
        assert_eq!(
            snapshot.pointer("/finance/rates/base").and_then(Value::as_f64),
            Some(0.05)
        );
        assert!(snapshot.pointer("/macro").is_some_and(Value::is_object));
        assert!(snapshot.pointer("/missing/x").is_none());
        assert!(snapshot.pointer("macro").is_none());
    }

    #[test]
    fn section_returns_top_level_value_only() {
        let Ok(snapshot) = Snapshot::decode(FRAME) else {
            panic!("frame must decode");
        };
        assert_eq!(
            snapshot.section("macro").and_then(|m| m.get("cpi")).and_then(Value::as_f64),
            Some(101.2)
        );
        assert!(snapshot.section("finance").is_some_and(Value::is_object));
        assert!(snapshot.section("tick").is_none());
        assert!(snapshot.section("rates").is_none());
    }

    #[test]
    fn accepts_string_timestamp() {
        let Ok(snapshot) = Snapshot::decode(r#"{"tick":1,"timestamp":"2026-01-01T00:00:00Z"}"#)
        else {
            panic!("frame must decode");
        };
        assert!(matches!(snapshot.timestamp, Some(Timestamp::Text(_))));
        assert!(snapshot.sections.is_empty());
    }

    #[test]
    fn rejects_non_json() {
        let err = Snapshot::decode("not json at all");
        assert!(matches!(err, Err(LinkError::Decode(_))));
    }

    #[test]
    fn rejects_missing_tick() {
        assert!(Snapshot::decode(r#"{"macro":{}}"#).is_err());
        assert!(Snapshot::decode(r#"{"tick":-3}"#).is_err());
        assert!(Snapshot::decode("[1,2,3]").is_err());
    }
}
