//! 기본 거부 NetworkPolicy 생성
//!
//! 워크로드마다 `<name>-netpol`을 만듭니다. 워크로드의 pod selector와 겹치는
//! Service의 포트만 ingress로 허용하고, egress는 DNS(UDP/TCP 53)만 허용합니다.
//!
//! 워크로드와 Service는 이름으로 색인합니다. 같은 이름이 다시 나오면 처음 위치에서
//! 뒤의 리소스로 교체됩니다 (종류가 달라도 같은 이름이면 충돌).

use serde_json::{Map, Value, json};

use chartguard_core::types::Resource;

use super::{Policy, PolicyContext};
use crate::error::HardenError;
use crate::podspec::{is_workload, lookup};

const NETWORK_POLICY_API_VERSION: &str = "networking.k8s.io/v1";
const DNS_PORT: u16 = 53;
const DEFAULT_PROTOCOL: &str = "TCP";

/// 색인된 워크로드
#[derive(Debug, Clone)]
struct Workload {
    kind: String,
    namespace: Option<String>,
    pod_selector: Map<String, Value>,
}

/// 색인된 Service
#[derive(Debug, Clone)]
struct Service {
    selector: Map<String, Value>,
    ports: Vec<Value>,
}

impl Service {
    /// selector가 워크로드 pod selector의 부분집합이고 포트가 있는지 확인합니다.
    ///
    /// selector가 비어 있는 Service는 어떤 pod도 선택하지 않으므로 겹치지 않습니다.
    fn overlaps(&self, pod_selector: &Map<String, Value>) -> bool {
        !self.selector.is_empty()
            && !self.ports.is_empty()
            && self
                .selector
                .iter()
                .all(|(key, value)| pod_selector.get(key) == Some(value))
    }
}

/// 이름 색인. 같은 이름은 처음 위치에서 교체합니다.
fn upsert<T>(entries: &mut Vec<(String, T)>, name: &str, value: T) {
    match entries.iter_mut().find(|(existing, _)| existing == name) {
        Some(slot) => slot.1 = value,
        None => entries.push((name.to_owned(), value)),
    }
}

/// 워크로드 pod selector: `spec.selector.matchLabels`, 없으면 `{app: <name>}`
fn pod_selector(resource: &Resource) -> Map<String, Value> {
    resource
        .object
        .as_object()
        .and_then(|obj| lookup(obj, &["spec", "selector", "matchLabels"]))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_else(|| {
            let mut labels = Map::new();
            labels.insert("app".to_owned(), Value::String(resource.name.clone()));
            labels
        })
}

/// Service 포트를 ingress 포트로 변환합니다. `port`가 없는 항목은 제외합니다.
fn service_ports(resource: &Resource) -> Vec<Value> {
    resource
        .object
        .get("spec")
        .and_then(|spec| spec.get("ports"))
        .and_then(Value::as_array)
        .map(|ports| {
            ports
                .iter()
                .filter_map(|port| {
                    let number = port.get("port")?.clone();
                    let protocol = port
                        .get("protocol")
                        .and_then(Value::as_str)
                        .unwrap_or(DEFAULT_PROTOCOL);
                    Some(json!({"port": number, "protocol": protocol}))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// NetworkPolicy 생성기
#[derive(Debug, Clone, Default)]
pub struct NetworkPolicyGenerator;

impl NetworkPolicyGenerator {
    /// 생성기를 만듭니다.
    pub fn new() -> Self {
        Self
    }

    fn build(name: &str, workload: &Workload, services: &[(String, Service)]) -> Resource {
        let policy_name = format!("{name}-netpol");

        let mut metadata = Map::new();
        metadata.insert("name".to_owned(), Value::String(policy_name.clone()));
        if let Some(namespace) = &workload.namespace {
            metadata.insert("namespace".to_owned(), Value::String(namespace.clone()));
        }

        let ingress: Vec<Value> = services
            .iter()
            .filter(|(_, service)| service.overlaps(&workload.pod_selector))
            .map(|(_, service)| json!({"ports": service.ports}))
            .collect();

        let mut spec = Map::new();
        spec.insert(
            "podSelector".to_owned(),
            json!({"matchLabels": workload.pod_selector}),
        );
        spec.insert("policyTypes".to_owned(), json!(["Ingress", "Egress"]));
        if !ingress.is_empty() {
            spec.insert("ingress".to_owned(), Value::Array(ingress));
        }
        spec.insert(
            "egress".to_owned(),
            json!([{
                "ports": [
                    {"port": DNS_PORT, "protocol": "UDP"},
                    {"port": DNS_PORT, "protocol": "TCP"}
                ]
            }]),
        );

        let object = json!({
            "apiVersion": NETWORK_POLICY_API_VERSION,
            "kind": "NetworkPolicy",
            "metadata": metadata,
            "spec": spec,
        });
        Resource::new("NetworkPolicy", policy_name, object)
    }
}

impl Policy for NetworkPolicyGenerator {
    fn name(&self) -> &'static str {
        "network-policy-generator"
    }

    async fn apply(&self, ctx: &mut PolicyContext<'_>) -> Result<(), HardenError> {
        let (resources, mut rec) = ctx.split(self.name());

        let mut workloads: Vec<(String, Workload)> = Vec::new();
        let mut services: Vec<(String, Service)> = Vec::new();
        for resource in resources.iter() {
            if is_workload(&resource.kind) {
                let workload = Workload {
                    kind: resource.kind.clone(),
                    namespace: resource.namespace().map(str::to_owned),
                    pod_selector: pod_selector(resource),
                };
                upsert(&mut workloads, &resource.name, workload);
            } else if resource.kind == "Service" {
                let service = Service {
                    selector: resource
                        .object
                        .get("spec")
                        .and_then(|spec| spec.get("selector"))
                        .and_then(Value::as_object)
                        .cloned()
                        .unwrap_or_default(),
                    ports: service_ports(resource),
                };
                upsert(&mut services, &resource.name, service);
            }
        }

        for (name, workload) in &workloads {
            let generated = Self::build(name, workload, &services);
            rec.record_generated(
                &generated,
                format!(
                    "generated default-deny NetworkPolicy for {}/{name}",
                    workload.kind
                ),
            );
            resources.push(generated);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::run_policy;

    fn deployment(name: &str, labels: Option<Value>) -> Resource {
        let mut spec = json!({"template": {"spec": {"containers": []}}});
        if let Some(labels) = labels {
            spec["selector"] = json!({"matchLabels": labels});
        }
        Resource::new(
            "Deployment",
            name,
            json!({"kind": "Deployment", "metadata": {"name": name, "namespace": "prod"}, "spec": spec}),
        )
    }

    fn service(name: &str, selector: Value, ports: Value) -> Resource {
        Resource::new(
            "Service",
            name,
            json!({"kind": "Service", "metadata": {"name": name}, "spec": {"selector": selector, "ports": ports}}),
        )
    }

    fn generated<'a>(resources: &'a [Resource], name: &str) -> &'a Value {
        &resources
            .iter()
            .find(|r| r.kind == "NetworkPolicy" && r.name == name)
            .unwrap()
            .object
    }

    #[tokio::test]
    async fn overlapping_service_opens_its_ports() {
        let mut resources = vec![
            deployment("web", Some(json!({"app": "web"}))),
            service("web", json!({"app": "web"}), json!([{"port": 8080, "protocol": "TCP"}])),
        ];

        let report = run_policy(&NetworkPolicyGenerator::new(), &mut resources)
            .await
            .unwrap();

        assert_eq!(resources.len(), 3);
        let netpol = generated(&resources, "web-netpol");
        assert_eq!(netpol["apiVersion"], json!("networking.k8s.io/v1"));
        assert_eq!(netpol["metadata"]["namespace"], json!("prod"));
        let ingress = netpol["spec"]["ingress"].as_array().unwrap();
        assert_eq!(ingress.len(), 1);
        assert_eq!(ingress[0]["ports"], json!([{"port": 8080, "protocol": "TCP"}]));
        assert_eq!(
            netpol["spec"]["egress"][0]["ports"],
            json!([{"port": 53, "protocol": "UDP"}, {"port": 53, "protocol": "TCP"}])
        );
        assert_eq!(netpol["spec"]["policyTypes"], json!(["Ingress", "Egress"]));

        assert_eq!(report.changes.len(), 1);
        assert_eq!(report.changes[0].resource_id, "NetworkPolicy/web-netpol");
        assert!(report.changes[0].field_path.is_empty());
        assert_eq!(&report.changes[0].new_value, netpol);
    }

    #[tokio::test]
    async fn service_without_selector_never_overlaps() {
        let mut resources = vec![
            deployment("web", Some(json!({"app": "web"}))),
            service("external", json!({}), json!([{"port": 443}])),
            Resource::new(
                "Service",
                "manual",
                json!({"kind": "Service", "metadata": {"name": "manual"}, "spec": {"ports": [{"port": 80}]}}),
            ),
        ];

        run_policy(&NetworkPolicyGenerator::new(), &mut resources)
            .await
            .unwrap();

        let netpol = generated(&resources, "web-netpol");
        assert!(netpol["spec"].get("ingress").is_none());
    }

    #[tokio::test]
    async fn no_overlap_means_no_ingress_key() {
        let mut resources = vec![
            deployment("web", Some(json!({"app": "web"}))),
            service("other", json!({"app": "other"}), json!([{"port": 80}])),
        ];

        run_policy(&NetworkPolicyGenerator::new(), &mut resources)
            .await
            .unwrap();

        let netpol = generated(&resources, "web-netpol");
        assert!(netpol["spec"].get("ingress").is_none());
        assert_eq!(netpol["spec"]["policyTypes"], json!(["Ingress", "Egress"]));
    }

    #[tokio::test]
    async fn default_selector_and_protocol() {
        let mut resources = vec![
            deployment("api", None),
            service("api", json!({"app": "api"}), json!([{"port": 9000}])),
        ];

        run_policy(&NetworkPolicyGenerator::new(), &mut resources)
            .await
            .unwrap();

        let netpol = generated(&resources, "api-netpol");
        assert_eq!(
            netpol["spec"]["podSelector"]["matchLabels"],
            json!({"app": "api"})
        );
        assert_eq!(
            netpol["spec"]["ingress"][0]["ports"],
            json!([{"port": 9000, "protocol": "TCP"}])
        );
    }

    #[tokio::test]
    async fn subset_match_is_one_directional() {
        let mut resources = vec![
            deployment("web", Some(json!({"app": "web", "tier": "frontend"}))),
            service("broad", json!({"app": "web"}), json!([{"port": 80}])),
            service("narrow", json!({"app": "web", "tier": "frontend", "x": "y"}), json!([{"port": 81}])),
            service("empty", json!({}), json!([{"port": 82}])),
            service("portless", json!({"app": "web"}), json!([])),
        ];

        run_policy(&NetworkPolicyGenerator::new(), &mut resources)
            .await
            .unwrap();

        let ingress = generated(&resources, "web-netpol")["spec"]["ingress"]
            .as_array()
            .unwrap()
            .clone();
        assert_eq!(ingress.len(), 1);
        assert_eq!(ingress[0]["ports"][0]["port"], json!(80));
    }

    #[tokio::test]
    async fn later_workload_with_same_name_replaces_earlier() {
        let mut resources = vec![
            deployment("web", Some(json!({"app": "one"}))),
            deployment("db", None),
            Resource::new(
                "StatefulSet",
                "web",
                json!({"spec": {"selector": {"matchLabels": {"app": "two"}}}}),
            ),
        ];

        let report = run_policy(&NetworkPolicyGenerator::new(), &mut resources)
            .await
            .unwrap();

        let names: Vec<&str> = resources[3..].iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["web-netpol", "db-netpol"]);
        assert_eq!(
            generated(&resources, "web-netpol")["spec"]["podSelector"]["matchLabels"],
            json!({"app": "two"})
        );
        assert!(generated(&resources, "web-netpol")["metadata"].get("namespace").is_none());
        assert!(report.changes[0].reason.contains("StatefulSet/web"));
    }
}
