//! Unit tests for domain models.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Utc;
use serde_json::json;

// Note: These tests can be run with: cargo test --test model_tests

mod principal_tests {
    use super::*;
    use blade_gateway::models::Principal;

    #[test]
    fn test_principal_defaults_are_empty() {
        let principal = Principal::new("user-1");

        assert_eq!(principal.subject_id, "user-1");
        assert!(principal.email.is_empty());
        assert!(principal.roles.is_empty());
        assert!(principal.permissions.is_empty());
        assert_eq!(principal.roles_json(), "[]");
    }

    #[test]
    fn test_roles_json_is_sorted_and_deduplicated() {
        let principal = Principal::new("user-1").with_roles(["user", "admin", "user"]);

        assert_eq!(principal.roles_json(), r#"["admin","user"]"#);
        assert!(principal.has_role("admin"));
        assert!(!principal.has_role("owner"));
    }

    #[test]
    fn test_principal_deserializes_without_email() {
        let principal: Principal = serde_json::from_value(json!({
            "subject_id": "user-9",
            "roles": ["viewer"],
            "permissions": []
        }))
        .unwrap();

        assert!(principal.email.is_empty());
        assert!(principal.has_role("viewer"));
    }
}

mod health_tests {
    use super::*;
    use blade_gateway::models::{
        ApiHealthResponse, ComponentKind, HealthEntry, HealthReport, HealthStatus,
    };

    #[test]
    fn test_report_all_up() {
        let report = HealthReport::from_entries(vec![
            HealthEntry::up("disk", ComponentKind::Local),
            HealthEntry::up("expense", ComponentKind::Service),
        ]);

        assert_eq!(report.status, HealthStatus::Up);
    }

    #[test]
    fn test_report_backend_down_is_degraded() {
        let report = HealthReport::from_entries(vec![
            HealthEntry::up("disk", ComponentKind::Local),
            HealthEntry::down("expense", ComponentKind::Service, "unreachable"),
        ]);

        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.entry("expense").unwrap().status, HealthStatus::Down);
    }

    #[test]
    fn test_report_local_down_is_down() {
        let report = HealthReport::from_entries(vec![
            HealthEntry::down("memory_rss", ComponentKind::Local, "600 MiB used exceeds 512 MiB"),
            HealthEntry::up("expense", ComponentKind::Service),
        ]);

        assert_eq!(report.status, HealthStatus::Down);
    }

    #[test]
    fn test_empty_report_is_up() {
        assert_eq!(HealthReport::from_entries(vec![]).status, HealthStatus::Up);
    }

    #[test]
    fn test_entry_serialization() {
        let entry = HealthEntry::up("chat", ComponentKind::Service)
            .with_message("not configured - skipping check");

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            value,
            json!({
                "component": "chat",
                "type": "service",
                "status": "up",
                "message": "not configured - skipping check"
            })
        );
    }

    #[test]
    fn test_entry_without_message_omits_field() {
        let value = serde_json::to_value(HealthEntry::up("disk", ComponentKind::Local)).unwrap();
        assert!(value.get("message").is_none());
    }

    #[test]
    fn test_api_health_response_serialization() {
        let response = ApiHealthResponse {
            status: "ok".to_string(),
            timestamp: Utc::now(),
            services: vec!["auth".to_string(), "expense".to_string()],
        };

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["services"], json!(["auth", "expense"]));
        assert!(value["timestamp"].is_string());
    }
}
