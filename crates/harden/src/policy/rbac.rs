//! 최소 권한 RBAC 생성
//!
//! 1. 워크로드의 컨테이너 env/envFrom과 volumes를 훑어 참조하는 리소스 종류를 모읍니다.
//! 2. 워크로드마다 ServiceAccount, Role, RoleBinding을 만듭니다.
//!    Role 규칙은 API 그룹별로 하나씩, 동사는 `get`/`list`/`watch`로 고정합니다.
//!    참조가 없으면 워크로드 자신의 종류로 한정된 규칙 하나를 만듭니다.
//!
//! `serviceAccountName`은 비어 있을 때만 설정합니다.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value, json};

use chartguard_core::types::Resource;

use super::{Policy, PolicyContext, Recorder};
use crate::error::HardenError;
use crate::podspec::{containers, is_workload, pod_spec, pod_spec_field_path, pod_spec_mut};

const RBAC_API_VERSION: &str = "rbac.authorization.k8s.io/v1";
const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";
const READ_VERBS: [&str; 3] = ["get", "list", "watch"];

/// `env[].valueFrom` 참조 키
const ENV_VALUE_REFS: &[(&str, &str)] = &[
    ("secretKeyRef", "Secret"),
    ("configMapKeyRef", "ConfigMap"),
];

/// `envFrom[]` 참조 키
const ENV_FROM_REFS: &[(&str, &str)] = &[("secretRef", "Secret"), ("configMapRef", "ConfigMap")];

/// `volumes[]` 참조 키
const VOLUME_REFS: &[(&str, &str)] = &[
    ("secret", "Secret"),
    ("configMap", "ConfigMap"),
    ("persistentVolumeClaim", "PersistentVolumeClaim"),
];

/// Kind -> (API 그룹, 리소스 이름)
///
/// 표에 없는 종류는 core 그룹의 `lowercase(kind) + "s"`입니다.
pub fn kind_resource(kind: &str) -> (&'static str, String) {
    let (group, resource) = match kind {
        "Secret" => ("", "secrets"),
        "ConfigMap" => ("", "configmaps"),
        "PersistentVolumeClaim" => ("", "persistentvolumeclaims"),
        "Service" => ("", "services"),
        "ServiceAccount" => ("", "serviceaccounts"),
        "Pod" => ("", "pods"),
        "Deployment" => ("apps", "deployments"),
        "StatefulSet" => ("apps", "statefulsets"),
        "DaemonSet" => ("apps", "daemonsets"),
        "ReplicaSet" => ("apps", "replicasets"),
        "Job" => ("batch", "jobs"),
        "CronJob" => ("batch", "cronjobs"),
        "Ingress" => ("networking.k8s.io", "ingresses"),
        "NetworkPolicy" => ("networking.k8s.io", "networkpolicies"),
        other => return ("", format!("{}s", other.to_lowercase())),
    };
    (group, resource.to_owned())
}

/// pod spec에서 참조하는 리소스 종류를 수집합니다.
pub fn referenced_kinds(pod: &Map<String, Value>) -> BTreeSet<&'static str> {
    let mut kinds = BTreeSet::new();

    for (_, container) in containers(pod) {
        let env = container.get("env").and_then(Value::as_array);
        for entry in env.into_iter().flatten() {
            let Some(value_from) = entry.get("valueFrom") else {
                continue;
            };
            for (key, kind) in ENV_VALUE_REFS {
                if value_from.get(*key).is_some() {
                    kinds.insert(*kind);
                }
            }
        }

        let env_from = container.get("envFrom").and_then(Value::as_array);
        for entry in env_from.into_iter().flatten() {
            for (key, kind) in ENV_FROM_REFS {
                if entry.get(*key).is_some() {
                    kinds.insert(*kind);
                }
            }
        }
    }

    let volumes = pod.get("volumes").and_then(Value::as_array);
    for volume in volumes.into_iter().flatten() {
        for (key, kind) in VOLUME_REFS {
            if volume.get(*key).is_some() {
                kinds.insert(*kind);
            }
        }
    }

    kinds
}

/// Role 규칙을 만듭니다. 참조가 없으면 워크로드 자신의 종류로 대체합니다.
pub fn role_rules(workload_kind: &str, kinds: &BTreeSet<&'static str>) -> Vec<Value> {
    let mut groups: BTreeMap<&'static str, BTreeSet<String>> = BTreeMap::new();
    if kinds.is_empty() {
        let (group, resource) = kind_resource(workload_kind);
        groups.entry(group).or_default().insert(resource);
    }
    for kind in kinds {
        let (group, resource) = kind_resource(kind);
        groups.entry(group).or_default().insert(resource);
    }

    groups
        .into_iter()
        .map(|(group, resources)| {
            json!({
                "apiGroups": [group],
                "resources": resources,
                "verbs": READ_VERBS,
            })
        })
        .collect()
}

fn metadata(name: &str, namespace: Option<&str>) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("name".to_owned(), Value::String(name.to_owned()));
    if let Some(namespace) = namespace {
        metadata.insert("namespace".to_owned(), Value::String(namespace.to_owned()));
    }
    metadata
}

/// RBAC 생성기
#[derive(Debug, Clone, Default)]
pub struct RbacGenerator;

impl RbacGenerator {
    /// 생성기를 만듭니다.
    pub fn new() -> Self {
        Self
    }

    /// 워크로드 하나에 대한 ServiceAccount, Role, RoleBinding
    fn build(
        workload: &Resource,
        kinds: &BTreeSet<&'static str>,
    ) -> (Resource, Resource, Resource) {
        let namespace = workload.namespace();
        let sa_name = format!("{}-sa", workload.name);
        let role_name = format!("{}-role", workload.name);
        let binding_name = format!("{}-rolebinding", workload.name);

        let service_account = json!({
            "apiVersion": "v1",
            "kind": "ServiceAccount",
            "metadata": metadata(&sa_name, namespace),
        });

        let role = json!({
            "apiVersion": RBAC_API_VERSION,
            "kind": "Role",
            "metadata": metadata(&role_name, namespace),
            "rules": role_rules(&workload.kind, kinds),
        });

        let mut subject = Map::new();
        subject.insert("kind".to_owned(), json!("ServiceAccount"));
        subject.insert("name".to_owned(), json!(sa_name));
        if let Some(namespace) = namespace {
            subject.insert("namespace".to_owned(), json!(namespace));
        }
        let binding = json!({
            "apiVersion": RBAC_API_VERSION,
            "kind": "RoleBinding",
            "metadata": metadata(&binding_name, namespace),
            "subjects": [subject],
            "roleRef": {
                "apiGroup": RBAC_API_GROUP,
                "kind": "Role",
                "name": role_name,
            },
        });

        (
            Resource::new("ServiceAccount", sa_name, service_account),
            Resource::new("Role", role_name, role),
            Resource::new("RoleBinding", binding_name, binding),
        )
    }

    fn bind_service_account(workload: &mut Resource, sa_name: &str, rec: &mut Recorder<'_>) {
        let Some(base) = pod_spec_field_path(&workload.kind) else {
            return;
        };
        let id = rec.id_for(&workload.kind, &workload.name);
        if let Some(pod) = pod_spec_mut(workload) {
            rec.set_if_missing(
                &id,
                &base,
                pod,
                "serviceAccountName",
                Value::String(sa_name.to_owned()),
                "bind workload to its least-privilege service account",
            );
        }
    }
}

impl Policy for RbacGenerator {
    fn name(&self) -> &'static str {
        "rbac-generator"
    }

    async fn apply(&self, ctx: &mut PolicyContext<'_>) -> Result<(), HardenError> {
        let (resources, mut rec) = ctx.split(self.name());

        // 이름 색인 (같은 이름은 처음 위치에서 뒤의 리소스로 교체)
        let mut indexed: Vec<(String, usize, BTreeSet<&'static str>)> = Vec::new();
        for (index, resource) in resources.iter().enumerate() {
            if !is_workload(&resource.kind) {
                continue;
            }
            let kinds = pod_spec(resource).map(referenced_kinds).unwrap_or_default();
            match indexed.iter_mut().find(|(name, _, _)| *name == resource.name) {
                Some(slot) => {
                    slot.1 = index;
                    slot.2 = kinds;
                }
                None => indexed.push((resource.name.clone(), index, kinds)),
            }
        }

        let mut generated = Vec::with_capacity(indexed.len() * 3);
        for (_, index, kinds) in &indexed {
            let Some(workload) = resources.get_mut(*index) else {
                continue;
            };
            let (service_account, role, binding) = Self::build(workload, kinds);
            let origin = workload.key();

            Self::bind_service_account(workload, &service_account.name, &mut rec);

            for resource in [service_account, role, binding] {
                rec.record_generated(
                    &resource,
                    format!("generated least-privilege {} for {origin}", resource.kind),
                );
                generated.push(resource);
            }
        }

        resources.extend(generated);
        Ok(())
    }
}
