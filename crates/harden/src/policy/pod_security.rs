//! Pod Security Standards 정책
//!
//! - `baseline`: 호스트 네임스페이스 공유와 privileged 컨테이너를 경고하고,
//!   위험한 capability를 `capabilities.add`에서 제거합니다.
//! - `restricted`: pod/컨테이너 보안 컨텍스트를 필드가 없을 때만 주입합니다.
//!
//! 두 수준은 독립된 분기이며 restricted가 baseline 검사를 포함하지 않습니다.

use serde_json::{Value, json};

use chartguard_core::types::{Change, Resource, SecurityLevel};

use super::{Policy, PolicyContext, Recorder};
use crate::error::HardenError;
use crate::podspec::{child_object_mut, containers_mut, pod_spec_field_path, pod_spec_mut};

/// baseline에서 제거하는 capability
pub const DANGEROUS_CAPABILITIES: &[&str] = &[
    "ALL",
    "SYS_ADMIN",
    "NET_ADMIN",
    "SYS_PTRACE",
    "SYS_RAWIO",
    "SYS_MODULE",
    "SYS_BOOT",
    "DAC_READ_SEARCH",
    "NET_RAW",
    "MKNOD",
];

/// 호스트 네임스페이스 공유 필드
const HOST_NAMESPACE_FIELDS: &[&str] = &["hostNetwork", "hostPID", "hostIPC"];

const RESTRICTED_REASON: &str = "pod security standards (restricted)";

/// capability가 위험 목록에 있는지 확인합니다.
///
/// 대소문자를 구분하지 않으며 `CAP_` 접두어를 허용합니다.
pub fn is_dangerous_capability(cap: &str) -> bool {
    let upper = cap.trim().to_ascii_uppercase();
    let name = upper.strip_prefix("CAP_").unwrap_or(&upper);
    DANGEROUS_CAPABILITIES.contains(&name)
}

/// PSS 정책
#[derive(Debug, Clone)]
pub struct PodSecurityStandardsPolicy {
    level: SecurityLevel,
}

impl PodSecurityStandardsPolicy {
    /// 적용 수준으로 정책을 생성합니다.
    pub fn new(level: SecurityLevel) -> Self {
        Self { level }
    }

    /// 적용 수준
    pub fn level(&self) -> SecurityLevel {
        self.level
    }

    fn apply_baseline(resources: &mut [Resource], rec: &mut Recorder<'_>) {
        for resource in resources.iter_mut() {
            let Some(base) = pod_spec_field_path(&resource.kind) else {
                continue;
            };
            let id = rec.id_for(&resource.kind, &resource.name);
            let Some(pod) = pod_spec_mut(resource) else {
                continue;
            };

            for field in HOST_NAMESPACE_FIELDS {
                if pod.get(*field) == Some(&Value::Bool(true)) {
                    rec.warn(format!(
                        "{id}: {base}.{field}=true violates the baseline pod security standard"
                    ));
                }
            }

            for (slot, container) in containers_mut(pod) {
                let Some(sc) = container
                    .get_mut("securityContext")
                    .and_then(Value::as_object_mut)
                else {
                    continue;
                };

                if sc.get("privileged") == Some(&Value::Bool(true)) {
                    rec.warn(format!(
                        "{id}: container '{}' sets securityContext.privileged=true, \
                         which violates the baseline pod security standard",
                        slot.name
                    ));
                }

                let Some(add) = sc
                    .get_mut("capabilities")
                    .and_then(Value::as_object_mut)
                    .and_then(|caps| caps.get_mut("add"))
                    .and_then(Value::as_array_mut)
                else {
                    continue;
                };

                let (removed, kept): (Vec<Value>, Vec<Value>) = add
                    .iter()
                    .cloned()
                    .partition(|cap| cap.as_str().is_some_and(is_dangerous_capability));
                if removed.is_empty() {
                    continue;
                }

                for cap in &removed {
                    rec.warn(format!(
                        "{id}: container '{}': removed dangerous capability {} \
                         from securityContext.capabilities.add",
                        slot.name,
                        cap.as_str().unwrap_or_default()
                    ));
                }

                let old = Value::Array(std::mem::replace(add, kept.clone()));
                rec.record(Change {
                    resource_id: id.clone(),
                    field_path: format!(
                        "{base}.{}.securityContext.capabilities.add",
                        slot.field_path()
                    ),
                    old_value: Some(old),
                    new_value: Value::Array(kept),
                    reason: "removed dangerous capabilities (baseline)".to_owned(),
                });
            }
        }
    }

    fn apply_restricted(resources: &mut [Resource], rec: &mut Recorder<'_>) {
        let runtime_default = json!({"type": "RuntimeDefault"});

        for resource in resources.iter_mut() {
            let Some(base) = pod_spec_field_path(&resource.kind) else {
                continue;
            };
            let id = rec.id_for(&resource.kind, &resource.name);
            let Some(pod) = pod_spec_mut(resource) else {
                continue;
            };

            if let Some(pod_sc) = child_object_mut(pod, "securityContext") {
                let path = format!("{base}.securityContext");
                rec.set_if_missing(&id, &path, pod_sc, "runAsNonRoot", json!(true), RESTRICTED_REASON);
                rec.set_if_missing(
                    &id,
                    &path,
                    pod_sc,
                    "seccompProfile",
                    runtime_default.clone(),
                    RESTRICTED_REASON,
                );
            }
            rec.set_if_missing(
                &id,
                &base,
                pod,
                "automountServiceAccountToken",
                json!(false),
                RESTRICTED_REASON,
            );

            for (slot, container) in containers_mut(pod) {
                let Some(sc) = child_object_mut(container, "securityContext") else {
                    continue;
                };
                let path = format!("{base}.{}.securityContext", slot.field_path());

                rec.set_if_missing(&id, &path, sc, "runAsNonRoot", json!(true), RESTRICTED_REASON);
                rec.set_if_missing(
                    &id,
                    &path,
                    sc,
                    "readOnlyRootFilesystem",
                    json!(true),
                    RESTRICTED_REASON,
                );
                rec.set_if_missing(
                    &id,
                    &path,
                    sc,
                    "allowPrivilegeEscalation",
                    json!(false),
                    RESTRICTED_REASON,
                );

                // 기존 drop 목록에는 병합하지 않음
                if let Some(caps) = child_object_mut(sc, "capabilities") {
                    if !caps.contains_key("drop") {
                        rec.set_if_missing(
                            &id,
                            &format!("{path}.capabilities"),
                            caps,
                            "drop",
                            json!(["ALL"]),
                            RESTRICTED_REASON,
                        );
                    }
                }

                rec.set_if_missing(
                    &id,
                    &path,
                    sc,
                    "seccompProfile",
                    runtime_default.clone(),
                    RESTRICTED_REASON,
                );
            }
        }
    }
}

impl Policy for PodSecurityStandardsPolicy {
    fn name(&self) -> &'static str {
        "pod-security-standards"
    }

    async fn apply(&self, ctx: &mut PolicyContext<'_>) -> Result<(), HardenError> {
        let (resources, mut rec) = ctx.split(self.name());
        match self.level {
            SecurityLevel::None => {}
            SecurityLevel::Baseline => Self::apply_baseline(resources, &mut rec),
            SecurityLevel::Restricted => Self::apply_restricted(resources, &mut rec),
        }
        Ok(())
    }
}
