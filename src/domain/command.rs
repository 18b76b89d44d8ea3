//! Outbound operator commands.
//!
//! Wire shape is always `{"type": <string>, "payload": <object>}`. The
//! recognized kinds get typed constructors; any other kind is passed
//! through verbatim for the backend to judge.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::LinkError;

/// Which tax rate a `SET_TAX_RATE` command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxType {
    /// Personal income tax.
    Income,
    /// Corporate tax.
    Corporate,
}

impl TaxType {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Corporate => "corporate",
        }
    }
}

impl std::str::FromStr for TaxType {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "income" => Ok(Self::Income),
            "corporate" => Ok(Self::Corporate),
            other => Err(LinkError::InvalidCommand(format!(
                "unknown tax type {other}, expected income or corporate"
            ))),
        }
    }
}

/// Classification of a command's `type` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// `PAUSE {}`
    Pause,
    /// `RESUME {}`
    Resume,
    /// `STEP {}`
    Step,
    /// `SET_BASE_RATE {rate}`
    SetBaseRate,
    /// `SET_TAX_RATE {tax_type, rate}`
    SetTaxRate,
    /// Any type this crate does not know about.
    Other,
}

impl CommandKind {
    /// Classifies a wire type string.
    #[must_use]
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "PAUSE" => Self::Pause,
            "RESUME" => Self::Resume,
            "STEP" => Self::Step,
            "SET_BASE_RATE" => Self::SetBaseRate,
            "SET_TAX_RATE" => Self::SetTaxRate,
            _ => Self::Other,
        }
    }
}

/// One operator command.
///
/// Fire-and-forget: once handed to the command channel it has no further
/// lifecycle in this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Command type discriminator, e.g. `"SET_BASE_RATE"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Kind-specific payload object.
    #[serde(default = "empty_payload")]
    pub payload: Value,
}

fn empty_payload() -> Value {
    Value::Object(Map::new())
}

impl Command {
    /// Creates a command of any kind; the payload is sent as given.
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// `PAUSE {}`
    #[must_use]
    pub fn pause() -> Self {
        Self::new("PAUSE", empty_payload())
    }

    /// `RESUME {}`
    #[must_use]
    pub fn resume() -> Self {
        Self::new("RESUME", empty_payload())
    }

    /// `STEP {}`
    #[must_use]
    pub fn step() -> Self {
        Self::new("STEP", empty_payload())
    }

    /// `SET_BASE_RATE {rate}`
    #[must_use]
    pub fn set_base_rate(rate: f64) -> Self {
        Self::new("SET_BASE_RATE", json!({ "rate": rate }))
    }

    /// `SET_TAX_RATE {tax_type, rate}`
    #[must_use]
    pub fn set_tax_rate(tax_type: TaxType, rate: f64) -> Self {
        Self::new(
            "SET_TAX_RATE",
            json!({ "tax_type": tax_type.as_str(), "rate": rate }),
        )
    }

    /// Returns the classified kind of this command.
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        CommandKind::from_wire(&self.kind)
    }

    /// Serializes the command to its wire text.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Encode`] if a rate command was built from a
    /// non-finite float (`json!` maps NaN and infinities to `null`).
    pub fn encode(&self) -> Result<String, LinkError> {
        if matches!(self.kind(), CommandKind::SetBaseRate | CommandKind::SetTaxRate)
            && self.payload.get("rate").is_some_and(Value::is_null)
        {
            return Err(LinkError::Encode(format!(
                "{} rate is not a finite number",
                self.kind
            )));
        }
        serde_json::to_string(self).map_err(|e| LinkError::Encode(e.to_string()))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.payload)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn base_rate_wire_text_is_exact() {
        let Ok(text) = Command::set_base_rate(0.07).encode() else {
            panic!("encode failed");
        };
        assert_eq!(text, r#"{"type":"SET_BASE_RATE","payload":{"rate":0.07}}"#);
    }

    #[test]
    fn tax_rate_keeps_field_order_and_types() {
        let Ok(text) = Command::set_tax_rate(TaxType::Corporate, 0.25).encode() else {
            panic!("encode failed");
        };
        assert_eq!(
            text,
            r#"{"type":"SET_TAX_RATE","payload":{"tax_type":"corporate","rate":0.25}}"#
        );
    }

    #[test]
    fn control_commands_carry_empty_payload() {
        for (cmd, kind) in [
            (Command::pause(), "PAUSE"),
            (Command::resume(), "RESUME"),
            (Command::step(), "STEP"),
        ] {
            let Ok(text) = cmd.encode() else {
                panic!("encode failed");
            };
            assert_eq!(text, format!(r#"{{"type":"{kind}","payload":{{}}}}"#));
        }
    }

    #[test]
    fn unknown_kind_passes_through_verbatim() {
        let raw = r#"{"type":"UPDATE_TELEMETRY","payload":{"mask":["population.distribution"],"z":1,"a":2}}"#;
        let Ok(cmd) = serde_json::from_str::<Command>(raw) else {
            panic!("decode failed");
        };
        assert_eq!(cmd.kind(), CommandKind::Other);
        let Ok(text) = cmd.encode() else {
            panic!("encode failed");
        };
        assert_eq!(text, raw);
    }

    #[test]
    fn missing_payload_defaults_to_empty_object() {
        let Ok(cmd) = serde_json::from_str::<Command>(r#"{"type":"PAUSE"}"#) else {
            panic!("decode failed");
        };
        assert_eq!(cmd, Command::pause());
        assert_eq!(cmd.kind(), CommandKind::Pause);
    }

    #[test]
    fn non_finite_rate_is_rejected() {
        let err = Command::set_base_rate(f64::NAN).encode();
        assert!(matches!(err, Err(LinkError::Encode(_))));
    }

    #[test]
    fn unknown_kind_may_carry_nulls() {
        let cmd = Command::new("SET_PARAM", json!({ "key": "x", "value": null }));
        assert!(cmd.encode().is_ok());
    }

    #[test]
    fn tax_type_parses_case_insensitively() {
        assert_eq!("Income".parse::<TaxType>().ok(), Some(TaxType::Income));
        assert!("vat".parse::<TaxType>().is_err());
    }
}
