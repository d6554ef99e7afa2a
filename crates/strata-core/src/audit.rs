//! Audit record: one logged request event.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::now_millis;

/// A persisted audit entry.
///
/// `request_id` is the unique key. Records are written once, read by id and
/// only ever removed by a bulk clear.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Request identifier (unique).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    /// Creation time in milliseconds since the Unix epoch.
    #[serde(default)]
    pub created_at: i64,
    /// Client user agent.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_agent: String,
    /// Client network address.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_address: String,
    /// Response status code.
    #[serde(default)]
    pub status_code: i32,
    /// Error text, empty on success.
    #[serde(default)]
    pub error: String,
    /// Event name (e.g. `createUser`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub event: String,
}

impl AuditRecord {
    /// Fill in fields assigned at insert time.
    ///
    /// A zero `created_at` becomes the current time in milliseconds; an empty
    /// `request_id` becomes a fresh UUIDv7. Pre-set values are kept as-is.
    pub fn pre_save(&mut self) {
        if self.created_at == 0 {
            self.created_at = now_millis();
        }
        if self.request_id.is_empty() {
            self.request_id = Uuid::now_v7().to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AuditRecord {
        AuditRecord {
            request_id: "r1".into(),
            client_agent: "curl/8.4.0".into(),
            client_address: "10.0.0.7".into(),
            status_code: 201,
            event: "createUser".into(),
            ..AuditRecord::default()
        }
    }

    #[test]
    fn pre_save_assigns_timestamp_when_zero() {
        let mut record = sample();
        record.pre_save();
        assert!(record.created_at > 0);
        assert_eq!(record.request_id, "r1");
    }

    #[test]
    fn pre_save_keeps_existing_timestamp() {
        let mut record = AuditRecord {
            created_at: 1_700_000_000_123,
            ..sample()
        };
        record.pre_save();
        assert_eq!(record.created_at, 1_700_000_000_123);
    }

    #[test]
    fn pre_save_generates_request_id_when_empty() {
        let mut record = AuditRecord {
            request_id: String::new(),
            ..sample()
        };
        record.pre_save();
        assert!(Uuid::parse_str(&record.request_id).is_ok());
    }

    #[test]
    fn serializes_with_snake_case_fields() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["request_id"], "r1");
        assert_eq!(json["status_code"], 201);
        assert_eq!(json["error"], "");
        assert!(json.get("created_at").is_some());
    }

    #[test]
    fn deserializes_sparse_json() {
        let record: AuditRecord =
            serde_json::from_str(r#"{"request_id":"r9","status_code":404}"#).unwrap();
        assert_eq!(record.request_id, "r9");
        assert_eq!(record.status_code, 404);
        assert_eq!(record.created_at, 0);
        assert!(record.event.is_empty());
    }
}
