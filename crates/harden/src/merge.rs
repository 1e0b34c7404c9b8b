//! 비파괴 병합 규칙
//!
//! 필드가 없으면 설정하고, 같은 값이면 그대로 두고, 다른 값이면 건드리지 않고
//! 충돌로 보고합니다. PSS, 리소스 요구량, RBAC의 `serviceAccountName` 주입이
//! 모두 이 규칙을 공유합니다.

use serde_json::{Map, Value};

/// [`set_if_missing`] 결과
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOutcome {
    /// 필드가 없어서 새로 설정함
    Set,
    /// 이미 같은 값이 있음
    Unchanged,
    /// 다른 값이 있어 그대로 둠 (기존 값)
    Conflict(Value),
}

/// 필드가 없을 때만 값을 설정합니다.
///
/// `eq`는 기존 값과 원하는 값을 비교합니다. 기존 값이 다르면 맵을 수정하지 않고
/// [`FieldOutcome::Conflict`]로 기존 값을 돌려줍니다.
pub fn set_if_missing<F>(
    map: &mut Map<String, Value>,
    key: &str,
    desired: &Value,
    eq: F,
) -> FieldOutcome
where
    F: Fn(&Value, &Value) -> bool,
{
    match map.get(key) {
        None => {
            map.insert(key.to_owned(), desired.clone());
            FieldOutcome::Set
        }
        Some(actual) if eq(actual, desired) => FieldOutcome::Unchanged,
        Some(actual) => FieldOutcome::Conflict(actual.clone()),
    }
}

/// 깊은 비교 (`serde_json::Value` 동등성)
pub fn deep_eq(actual: &Value, desired: &Value) -> bool {
    actual == desired
}

/// 값이 비어 있는지 확인합니다 (`null` 또는 빈 문자열).
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// 충돌 경고 메시지를 만듭니다.
pub fn conflict_warning(resource: &str, field_path: &str, actual: &Value, expected: &Value) -> String {
    format!("{resource}: {field_path} is {actual}, expected {expected} (left unchanged)")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sets_absent_field() {
        let mut map = Map::new();
        let outcome = set_if_missing(&mut map, "runAsNonRoot", &json!(true), deep_eq);
        assert_eq!(outcome, FieldOutcome::Set);
        assert_eq!(map["runAsNonRoot"], json!(true));
    }

    #[test]
    fn equal_value_is_noop() {
        let mut map = Map::new();
        map.insert("seccompProfile".to_owned(), json!({"type": "RuntimeDefault"}));
        let outcome = set_if_missing(
            &mut map,
            "seccompProfile",
            &json!({"type": "RuntimeDefault"}),
            deep_eq,
        );
        assert_eq!(outcome, FieldOutcome::Unchanged);
    }

    #[test]
    fn different_value_is_conflict_and_untouched() {
        let mut map = Map::new();
        map.insert("runAsNonRoot".to_owned(), json!(false));
        let outcome = set_if_missing(&mut map, "runAsNonRoot", &json!(true), deep_eq);
        assert_eq!(outcome, FieldOutcome::Conflict(json!(false)));
        assert_eq!(map["runAsNonRoot"], json!(false));
    }

    #[test]
    fn custom_equality_is_honoured() {
        let mut map = Map::new();
        map.insert("cpu".to_owned(), json!("500m"));
        let outcome = set_if_missing(&mut map, "cpu", &json!("1"), |_, _| true);
        assert_eq!(outcome, FieldOutcome::Unchanged);
        assert_eq!(map["cpu"], json!("500m"));
    }

    #[test]
    fn blank_values() {
        assert!(is_blank(None));
        assert!(is_blank(Some(&Value::Null)));
        assert!(is_blank(Some(&json!(""))));
        assert!(is_blank(Some(&json!("  "))));
        assert!(!is_blank(Some(&json!("1"))));
        assert!(!is_blank(Some(&json!(0))));
    }

    #[test]
    fn conflict_warning_names_field_and_values() {
        let msg = conflict_warning(
            "Deployment/web",
            "spec.template.spec.securityContext.runAsNonRoot",
            &json!(false),
            &json!(true),
        );
        assert!(msg.contains("Deployment/web"));
        assert!(msg.contains("runAsNonRoot"));
        assert!(msg.contains("false"));
        assert!(msg.contains("true"));
    }
}
