//! 하드닝 정책
//!
//! 각 정책은 [`Policy`] trait을 구현하며 파이프라인이 정해진 순서로 실행합니다.
//! 정책은 [`PolicyContext`]를 통해 호출자 소유의 리소스를 제자리에서 수정하고
//! [`Recorder`]로 변경/경고를 기록합니다.
//!
//! # 정책 목록 (실행 순서)
//!
//! 1. [`PodSecurityStandardsPolicy`] - PSS baseline/restricted
//! 2. [`ResourceRequirementsPolicy`] - 리소스 요구량 주입
//! 3. [`ImagePolicy`] - 이미지 권고 검사 (수정 없음)
//! 4. [`DigestResolverPolicy`] - 태그를 다이제스트로 고정
//! 5. [`NetworkPolicyGenerator`] - 기본 거부 NetworkPolicy 생성
//! 6. [`RbacGenerator`] - 최소 권한 RBAC 생성

pub mod digest;
pub mod image;
pub mod network;
pub mod pod_security;
pub mod rbac;
pub mod resources;

use std::collections::HashMap;
use std::future::Future;

use metrics::counter;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use chartguard_core::metrics as m;
use chartguard_core::types::{Change, HardenReport, Resource};

use crate::error::HardenError;
use crate::merge::{self, FieldOutcome};

pub use digest::DigestResolverPolicy;
pub use image::ImagePolicy;
pub use network::NetworkPolicyGenerator;
pub use pod_security::PodSecurityStandardsPolicy;
pub use rbac::RbacGenerator;
pub use resources::ResourceRequirementsPolicy;

/// 하드닝 정책
///
/// 정책은 공유 리소스 집합을 순서대로 변경합니다.
/// 에러를 반환하면 파이프라인 전체가 중단되며 이미 적용된 변경은 되돌리지 않습니다.
pub trait Policy: Send + Sync {
    /// 정책 이름 (에러 메시지, 메트릭 레이블)
    fn name(&self) -> &'static str;

    /// 정책을 적용합니다.
    fn apply(
        &self,
        ctx: &mut PolicyContext<'_>,
    ) -> impl Future<Output = Result<(), HardenError>> + Send;
}

/// 한 번의 `harden` 호출 동안 정책 사이에 전달되는 상태
pub struct PolicyContext<'a> {
    /// 호출자 소유 리소스 (생성된 리소스가 뒤에 추가됨)
    pub resources: &'a mut Vec<Resource>,
    /// 누적 결과
    pub report: &'a mut HardenReport,
    /// `Kind/Name` -> 사전 할당된 리소스 ID
    pub resource_ids: &'a HashMap<String, String>,
    /// 취소 토큰
    pub cancel: &'a CancellationToken,
}

impl<'a> PolicyContext<'a> {
    /// 리소스와 기록기를 분리해 동시에 빌릴 수 있게 합니다.
    pub fn split(&mut self, policy: &'static str) -> (&mut Vec<Resource>, Recorder<'_>) {
        let recorder = Recorder {
            report: &mut *self.report,
            resource_ids: self.resource_ids,
            policy,
        };
        (&mut *self.resources, recorder)
    }
}

/// 변경/경고 기록기
pub struct Recorder<'a> {
    report: &'a mut HardenReport,
    resource_ids: &'a HashMap<String, String>,
    policy: &'static str,
}

impl Recorder<'_> {
    /// 리소스 ID를 반환합니다. 매핑이 없으면 `Kind/Name`입니다.
    pub fn id_for(&self, kind: &str, name: &str) -> String {
        let key = format!("{kind}/{name}");
        self.resource_ids.get(&key).cloned().unwrap_or(key)
    }

    /// 변경을 기록합니다.
    pub fn record(&mut self, change: Change) {
        debug!(
            policy = self.policy,
            resource = %change.resource_id,
            field = %change.field_path,
            "change recorded"
        );
        counter!(m::HARDEN_CHANGES_TOTAL, m::LABEL_POLICY => self.policy).increment(1);
        self.report.changes.push(change);
    }

    /// 경고를 기록합니다.
    pub fn warn(&mut self, message: String) {
        debug!(policy = self.policy, warning = %message, "warning recorded");
        counter!(m::HARDEN_WARNINGS_TOTAL, m::LABEL_POLICY => self.policy).increment(1);
        self.report.warnings.push(message);
    }

    /// 생성된 리소스를 변경으로 기록합니다 (빈 경로, 객체 전체가 새 값).
    pub fn record_generated(&mut self, resource: &Resource, reason: String) {
        let resource_id = self.id_for(&resource.kind, &resource.name);
        self.record(Change {
            resource_id,
            field_path: String::new(),
            old_value: None,
            new_value: resource.object.clone(),
            reason,
        });
    }

    /// 필드가 없으면 설정하고 기록합니다. 다른 값이 있으면 경고만 남깁니다.
    pub fn set_if_missing(
        &mut self,
        resource_id: &str,
        parent_path: &str,
        map: &mut Map<String, Value>,
        key: &str,
        desired: Value,
        reason: &str,
    ) -> FieldOutcome {
        let field_path = join_path(parent_path, key);
        let outcome = merge::set_if_missing(map, key, &desired, merge::deep_eq);
        match &outcome {
            FieldOutcome::Set => self.record(Change {
                resource_id: resource_id.to_owned(),
                field_path,
                old_value: None,
                new_value: desired,
                reason: reason.to_owned(),
            }),
            FieldOutcome::Unchanged => {}
            FieldOutcome::Conflict(actual) => {
                self.warn(merge::conflict_warning(
                    resource_id,
                    &field_path,
                    actual,
                    &desired,
                ));
            }
        }
        outcome
    }
}

/// 점으로 구분된 필드 경로를 잇습니다.
pub fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_owned()
    } else {
        format!("{parent}.{key}")
    }
}

/// 정책 하나를 빈 ID 맵으로 실행합니다 (단위 테스트용).
#[cfg(test)]
pub(crate) async fn run_policy<P: Policy>(
    policy: &P,
    resources: &mut Vec<Resource>,
) -> Result<HardenReport, HardenError> {
    let mut report = HardenReport::new();
    let ids = HashMap::new();
    let cancel = CancellationToken::new();
    let mut ctx = PolicyContext {
        resources,
        report: &mut report,
        resource_ids: &ids,
        cancel: &cancel,
    };
    policy.apply(&mut ctx).await?;
    Ok(report)
}
