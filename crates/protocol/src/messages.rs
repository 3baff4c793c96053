//! Typed views over the payloads of well-known event kinds.
//!
//! Use with [`EventEnvelope::parse_data`](crate::EventEnvelope::parse_data).

use serde::{Deserialize, Serialize};

/// Payload of `update_available`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAvailable {
    pub container: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
}

/// Payload of `container_restarted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRestarted {
    pub container: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload of `dependency_ignored`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyIgnored {
    pub container: String,
    pub dependency: String,
}

/// Payload of `status_changed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChanged {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_available_camel_case() {
        let json = r#"{"container":"db","image":"postgres","currentVersion":"15","latestVersion":"16"}"#;
        let u: UpdateAvailable = serde_json::from_str(json).unwrap();
        assert_eq!(u.container, "db");
        assert_eq!(u.image, "postgres");
        assert_eq!(u.current_version.as_deref(), Some("15"));
        assert_eq!(u.latest_version.as_deref(), Some("16"));
    }

    #[test]
    fn update_available_versions_optional() {
        let u: UpdateAvailable =
            serde_json::from_str(r#"{"container":"db","image":"postgres"}"#).unwrap();
        assert!(u.current_version.is_none());
        let json = serde_json::to_string(&u).unwrap();
        assert!(!json.contains("Version"));
    }

    #[test]
    fn status_changed_without_container() {
        let s: StatusChanged = serde_json::from_str(r#"{"status":"scanning"}"#).unwrap();
        assert!(s.container.is_none());
        assert_eq!(s.status, "scanning");
    }

    #[test]
    fn dependency_ignored_requires_fields() {
        assert!(serde_json::from_str::<DependencyIgnored>(r#"{"container":"a"}"#).is_err());
    }
}
