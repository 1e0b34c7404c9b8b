//! 리소스 요구량 정책
//!
//! 설정된 기본값 중 비어 있지 않은 항목만 컨테이너별로 주입합니다.
//! 이미 설정된 필드는 덮어쓰지 않으며 경고도 남기지 않습니다.
//!
//! `require_limits`가 켜져 있으면 주입 전에 모든 워크로드를 먼저 검사합니다.
//! 컨테이너에 limit이 없고 기본값도 없으면 리소스를 건드리지 않은 채 실패합니다.

use serde_json::{Map, Value};

use chartguard_core::types::{Change, Resource, ResourceDefaultsConfig};

use super::{Policy, PolicyContext, Recorder};
use crate::error::HardenError;
use crate::merge::{self, FieldOutcome, is_blank};
use crate::podspec::{
    child_object_mut, containers, containers_mut, lookup, pod_spec, pod_spec_field_path,
    pod_spec_mut,
};

/// `(섹션, 항목)` 순서. limit 검사는 cpu를 먼저 봅니다.
const FIELDS: [(&str, &str); 4] = [
    ("requests", "cpu"),
    ("requests", "memory"),
    ("limits", "cpu"),
    ("limits", "memory"),
];

const REASON: &str = "default resource requirements";

/// `resources`와 `resources.limits`가 없거나 `null`이거나 객체일 때만 기본값을 넣을 수 있습니다.
fn accepts_defaults(container: &Map<String, Value>) -> bool {
    let shape_ok = |value: Option<&Value>| value.is_none_or(|v| v.is_null() || v.is_object());
    let resources = container.get("resources");
    shape_ok(resources) && shape_ok(resources.and_then(|r| r.get("limits")))
}

/// 리소스 요구량 정책
#[derive(Debug, Clone)]
pub struct ResourceRequirementsPolicy {
    defaults: ResourceDefaultsConfig,
}

impl ResourceRequirementsPolicy {
    /// 기본값 설정으로 정책을 생성합니다.
    pub fn new(defaults: ResourceDefaultsConfig) -> Self {
        Self { defaults }
    }

    fn default_for(&self, section: &str, quantity: &str) -> &str {
        match (section, quantity) {
            ("requests", "cpu") => &self.defaults.cpu_request,
            ("requests", "memory") => &self.defaults.memory_request,
            ("limits", "cpu") => &self.defaults.cpu_limit,
            ("limits", "memory") => &self.defaults.memory_limit,
            _ => "",
        }
    }

    /// requireLimits 검사 (변경 없음)
    fn check_limits(&self, resources: &[Resource], rec: &Recorder<'_>) -> Result<(), HardenError> {
        for resource in resources {
            let Some(pod) = pod_spec(resource) else {
                continue;
            };
            for (slot, container) in containers(pod) {
                let injectable = accepts_defaults(container);
                for quantity in ["cpu", "memory"] {
                    let existing = lookup(container, &["resources", "limits", quantity]);
                    let fillable = injectable && !self.default_for("limits", quantity).is_empty();
                    if is_blank(existing) && !fillable {
                        return Err(HardenError::MissingLimit {
                            resource: rec.id_for(&resource.kind, &resource.name),
                            container: slot.name,
                            quantity,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn inject(&self, resources: &mut [Resource], rec: &mut Recorder<'_>) {
        for resource in resources.iter_mut() {
            let Some(base) = pod_spec_field_path(&resource.kind) else {
                continue;
            };
            let id = rec.id_for(&resource.kind, &resource.name);
            let Some(pod) = pod_spec_mut(resource) else {
                continue;
            };

            for (slot, container) in containers_mut(pod) {
                for (section, quantity) in FIELDS {
                    let value = self.default_for(section, quantity);
                    if value.is_empty() {
                        continue;
                    }
                    let Some(requirements) = child_object_mut(container, "resources") else {
                        break;
                    };
                    let Some(map) = child_object_mut(requirements, section) else {
                        continue;
                    };

                    // 빈 문자열/null은 값이 없는 것으로 봄
                    let old_value = if is_blank(map.get(quantity)) {
                        map.remove(quantity)
                    } else {
                        None
                    };

                    let desired = Value::String(value.to_owned());
                    if merge::set_if_missing(map, quantity, &desired, |_, _| true)
                        == FieldOutcome::Set
                    {
                        rec.record(Change {
                            resource_id: id.clone(),
                            field_path: format!(
                                "{base}.{}.resources.{section}.{quantity}",
                                slot.field_path()
                            ),
                            old_value,
                            new_value: desired,
                            reason: REASON.to_owned(),
                        });
                    }
                }
            }
        }
    }
}

impl Policy for ResourceRequirementsPolicy {
    fn name(&self) -> &'static str {
        "resource-requirements"
    }

    async fn apply(&self, ctx: &mut PolicyContext<'_>) -> Result<(), HardenError> {
        let (resources, mut rec) = ctx.split(self.name());
        if self.defaults.require_limits {
            self.check_limits(resources.as_slice(), &rec)?;
        }
        self.inject(resources, &mut rec);
        Ok(())
    }
}
