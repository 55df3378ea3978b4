//! Partition resolution.
//!
//! A job lands on a partition through the first source that produces one:
//! an explicit override at push time, the job type's `partition_key()`
//! capability, a resolver registered on the driver, a conventional tenant
//! field in the payload, and finally the configured default.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Callable registered on the driver to derive a partition from a payload.
pub type PartitionResolver = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// Capability a job type implements to pin its own partition.
pub trait DispatchableJob: Serialize {
    fn partition_key(&self) -> Option<String> {
        None
    }
}

/// Conventional tenant fields probed in payload objects, in priority order.
pub const PARTITION_FIELDS: [&str; 4] = ["userId", "user_id", "tenantId", "tenant_id"];

/// Probe a payload for one of the conventional tenant fields. String and
/// numeric values resolve; numbers keep their literal rendering.
pub fn detect_partition_field(payload: &Value) -> Option<String> {
    for field in PARTITION_FIELDS {
        match payload.get(field) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detects_in_priority_order() {
        let payload = json!({"user_id": "u-2", "userId": "u-1", "tenantId": "t-1"});
        assert_eq!(detect_partition_field(&payload).as_deref(), Some("u-1"));

        let payload = json!({"tenant_id": "t-2", "tenantId": "t-1"});
        assert_eq!(detect_partition_field(&payload).as_deref(), Some("t-1"));
    }

    #[test]
    fn test_numeric_field_keeps_literal_rendering() {
        let payload = json!({"userId": 12345});
        assert_eq!(detect_partition_field(&payload).as_deref(), Some("12345"));
    }

    #[test]
    fn test_no_conventional_field() {
        assert_eq!(detect_partition_field(&json!({"job": "send-mail"})), None);
        assert_eq!(detect_partition_field(&json!("bare string")), None);
        assert_eq!(detect_partition_field(&json!({"userId": ""})), None);
    }
}
