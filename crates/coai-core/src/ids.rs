use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlates a chat request across logs, the usage ledger and the API
/// response. Fresh ids are `req_<uuidv7>`, so they sort by creation time.
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    const PREFIX: &'static str = "req_";

    pub fn new() -> Self {
        Self(format!("{}{}", Self::PREFIX, Uuid::now_v7()))
    }

    /// Wraps an existing id, e.g. one read back from a usage snapshot.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RequestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_prefixed_and_ordered() {
        let ids: Vec<RequestId> = (0..64).map(|_| RequestId::new()).collect();
        assert!(ids.iter().all(|id| id.as_str().starts_with("req_")));
        assert!(ids.windows(2).all(|w| w[0] < w[1]), "ids not time-ordered");
    }

    #[test]
    fn raw_ids_round_trip_as_plain_strings() {
        let id = RequestId::from_raw("req_20250101_120000_000001");
        assert_eq!(id.to_string(), "req_20250101_120000_000001");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"req_20250101_120000_000001\"");
        let back: RequestId = serde_json::from_str("\"req_x\"").unwrap();
        assert_eq!(back.as_str(), "req_x");
    }
}
