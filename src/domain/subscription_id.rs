//! Removal key for listener registrations.

use std::fmt;

use uuid::Uuid;

/// Identifies one registration in a listener list.
///
/// Registering the same callback twice yields two ids, so unsubscribing
/// one registration never removes the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Draws a fresh random id.
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0.simple())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn registrations_get_distinct_ids() {
        assert_ne!(SubscriptionId::generate(), SubscriptionId::generate());
    }

    #[test]
    fn display_is_prefixed_hex() {
        let shown = SubscriptionId::generate().to_string();
        let Some(hex) = shown.strip_prefix("sub-") else {
            panic!("missing prefix in {shown}");
        };
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
