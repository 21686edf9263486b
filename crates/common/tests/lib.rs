use serde_json::json;
use sessionguard_common::{AttemptKind, DeviceType, Metadata, MetadataValue, RevocationReason, User};

#[test]
fn test_enums_use_snake_case_names() {
    assert_eq!(
        serde_json::to_value(AttemptKind::PasswordReset).unwrap(),
        json!("password_reset")
    );
    assert_eq!(serde_json::to_value(RevocationReason::Logout).unwrap(), json!("logout"));
    assert_eq!(serde_json::to_value(DeviceType::Tablet).unwrap(), json!("tablet"));

    let kind: AttemptKind = serde_json::from_str("\"mfa\"").unwrap();
    assert_eq!(kind, AttemptKind::Mfa);
    assert_eq!(AttemptKind::Refresh.to_string(), "refresh");
}

#[test]
fn test_metadata_values_are_untagged() {
    let mut metadata = Metadata::new();
    metadata.insert("attempt".to_string(), MetadataValue::from(3i64));
    metadata.insert("source".to_string(), MetadataValue::from("web"));
    metadata.insert("mfa".to_string(), MetadataValue::from(false));

    let value = serde_json::to_value(&metadata).unwrap();
    assert_eq!(value, json!({"attempt": 3, "mfa": false, "source": "web"}));

    let parsed: Metadata = serde_json::from_value(json!({"ratio": 0.5, "note": "x"})).unwrap();
    assert_eq!(parsed["ratio"], MetadataValue::Float(0.5));
    assert_eq!(parsed["note"], MetadataValue::Text("x".to_string()));
}

#[test]
fn test_user_omits_missing_email() {
    let user = User::new("u-1", "alice");
    assert_eq!(
        serde_json::to_value(&user).unwrap(),
        json!({"id": "u-1", "username": "alice"})
    );
}
