use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const WHITELIST_PATH: &str = "/get_whitelist";
pub const USER_ID_QUERY_PARAM: &str = "user_id";

pub const DEFAULT_SNAPSHOT_NAMESPACE: &str = "user_whitelist_prefs";
pub const DEFAULT_SNAPSHOT_KEY: &str = "whitelisted_chats";

#[cfg(test)]
const WHITELIST_RESPONSE_SCHEMA: &str =
    include_str!("../../../contracts/v1/whitelist-response.schema.json");

/// A user or chat id in the host messaging system. Nothing on the wire says
/// which of the two it names.
pub type Identifier = i64;

// Entries stay raw so one bad entry can reject the whole body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistResponse {
    pub whitelist: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLocation {
    pub namespace: String,
    pub key: String,
}

impl Default for SnapshotLocation {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_SNAPSHOT_NAMESPACE.to_string(),
            key: DEFAULT_SNAPSHOT_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: Identifier,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

impl CurrentUser {
    pub fn new(id: Identifier) -> Self {
        Self {
            id,
            username: None,
            first_name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> jsonschema::Validator {
        let schema: Value = serde_json::from_str(WHITELIST_RESPONSE_SCHEMA).unwrap();
        jsonschema::validator_for(&schema).unwrap()
    }

    #[test]
    fn schema_accepts_integer_entries() {
        assert!(validator().is_valid(&json!({"whitelist": [1, 2, -3]})));
    }

    #[test]
    fn schema_accepts_numeric_string_entries() {
        assert!(validator().is_valid(&json!({"whitelist": ["12", 4]})));
    }

    #[test]
    fn schema_rejects_non_numeric_entries() {
        assert!(!validator().is_valid(&json!({"whitelist": ["x"]})));
        assert!(!validator().is_valid(&json!({"whitelist": [true]})));
    }

    #[test]
    fn schema_requires_whitelist_field() {
        assert!(!validator().is_valid(&json!({"ids": [1]})));
    }

    #[test]
    fn response_keeps_raw_entries() {
        let parsed: WhitelistResponse =
            serde_json::from_str(r#"{"whitelist":[1,"x"],"extra":true}"#).unwrap();
        assert_eq!(parsed.whitelist, vec![json!(1), json!("x")]);
    }

    #[test]
    fn default_snapshot_location_uses_legacy_names() {
        let loc = SnapshotLocation::default();
        assert_eq!(loc.namespace, "user_whitelist_prefs");
        assert_eq!(loc.key, "whitelisted_chats");
    }
}
