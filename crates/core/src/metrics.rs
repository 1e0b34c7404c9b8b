//! 메트릭 상수 및 설명 등록
//!
//! 모든 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::histogram!()`
//! 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `chartguard_`
//! - 모듈명: `harden_`, `registry_`
//! - 접미어: `_total` (counter), `_seconds` (histogram)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(chartguard_core::metrics::HARDEN_RUNS_TOTAL).increment(1);
//! ```

use metrics::{describe_counter, describe_histogram};

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 정책 이름 레이블 키 (pod-security-standards, rbac-generator 등)
pub const LABEL_POLICY: &str = "policy";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

// ─── Harden 파이프라인 메트릭 ─────────────────────────────────────

/// Harden: 실행 횟수 (counter, label: result)
pub const HARDEN_RUNS_TOTAL: &str = "chartguard_harden_runs_total";

/// Harden: 기록된 변경 수 (counter, label: policy)
pub const HARDEN_CHANGES_TOTAL: &str = "chartguard_harden_changes_total";

/// Harden: 발생한 경고 수 (counter, label: policy)
pub const HARDEN_WARNINGS_TOTAL: &str = "chartguard_harden_warnings_total";

/// Harden: 정책 실패 수 (counter, label: policy)
pub const HARDEN_POLICY_FAILURES_TOTAL: &str = "chartguard_harden_policy_failures_total";

/// Harden: 전체 실행 시간 (histogram, 초)
pub const HARDEN_DURATION_SECONDS: &str = "chartguard_harden_duration_seconds";

// ─── Registry 메트릭 ─────────────────────────────────────────────

/// Registry: 다이제스트 조회 요청 수 (counter, label: result)
pub const REGISTRY_REQUESTS_TOTAL: &str = "chartguard_registry_requests_total";

/// Registry: 재시도 횟수 (counter)
pub const REGISTRY_RETRIES_TOTAL: &str = "chartguard_registry_retries_total";

/// 모든 메트릭의 설명을 등록합니다.
///
/// 레코더가 설치되지 않았어도 안전하게 호출할 수 있습니다.
pub fn describe_all() {
    describe_counter!(HARDEN_RUNS_TOTAL, "Number of hardening runs by result");
    describe_counter!(
        HARDEN_CHANGES_TOTAL,
        "Number of changes recorded, labelled by policy"
    );
    describe_counter!(
        HARDEN_WARNINGS_TOTAL,
        "Number of warnings emitted, labelled by policy"
    );
    describe_counter!(
        HARDEN_POLICY_FAILURES_TOTAL,
        "Number of fatal policy failures, labelled by policy"
    );
    describe_histogram!(
        HARDEN_DURATION_SECONDS,
        "Wall-clock duration of a hardening run in seconds"
    );
    describe_counter!(
        REGISTRY_REQUESTS_TOTAL,
        "Number of registry digest lookups by result"
    );
    describe_counter!(
        REGISTRY_RETRIES_TOTAL,
        "Number of registry lookup retries"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        HARDEN_RUNS_TOTAL,
        HARDEN_CHANGES_TOTAL,
        HARDEN_WARNINGS_TOTAL,
        HARDEN_POLICY_FAILURES_TOTAL,
        HARDEN_DURATION_SECONDS,
        REGISTRY_REQUESTS_TOTAL,
        REGISTRY_RETRIES_TOTAL,
    ];

    #[test]
    fn all_metrics_start_with_chartguard_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("chartguard_"),
                "Metric '{}' does not start with 'chartguard_' prefix",
                name
            );
        }
    }

    #[test]
    fn counters_end_with_total() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.ends_with("_total") || name.ends_with("_seconds"),
                "Metric '{}' has no unit suffix",
                name
            );
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        describe_all();
    }

    #[test]
    fn label_keys_are_lowercase() {
        for label in [LABEL_POLICY, LABEL_RESULT] {
            assert_eq!(label.to_lowercase(), label);
        }
    }
}
