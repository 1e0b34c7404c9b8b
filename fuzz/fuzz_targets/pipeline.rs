#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use serde_json::{Value, json};

use chartguard_core::types::{ImagePolicyConfig, Resource, ResourceDefaultsConfig, SecurityLevel};
use chartguard_harden::{HardenConfigBuilder, Hardener};
use tokio_util::sync::CancellationToken;

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    /// 워크로드 목록 (최대 8개로 제한)
    workloads: Vec<FuzzWorkload>,
    level: u8,
    network_policies: bool,
    rbac: bool,
    allowed_registry: String,
}

#[derive(Arbitrary, Debug)]
struct FuzzWorkload {
    kind: FuzzKind,
    name: String,
    images: Vec<String>,
    secret_ref: Option<String>,
    service_port: Option<u16>,
    privileged: bool,
}

#[derive(Arbitrary, Debug)]
enum FuzzKind {
    Deployment,
    StatefulSet,
    DaemonSet,
    Job,
    CronJob,
}

impl FuzzKind {
    fn as_str(&self) -> &str {
        match self {
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::DaemonSet => "DaemonSet",
            Self::Job => "Job",
            Self::CronJob => "CronJob",
        }
    }
}

fn workload(w: &FuzzWorkload) -> Vec<Resource> {
    let containers: Vec<Value> = w
        .images
        .iter()
        .take(4)
        .enumerate()
        .map(|(i, image)| {
            let mut container = json!({
                "name": format!("c{i}"),
                "image": image,
                "securityContext": {"privileged": w.privileged},
            });
            if let Some(secret) = &w.secret_ref {
                container["env"] =
                    json!([{"name": "S", "valueFrom": {"secretKeyRef": {"name": secret}}}]);
            }
            container
        })
        .collect();

    let pod = json!({
        "metadata": {"labels": {"app": w.name}},
        "spec": {"containers": containers},
    });
    let spec = match w.kind {
        FuzzKind::CronJob => json!({"jobTemplate": {"spec": {"template": pod}}}),
        _ => json!({"template": pod}),
    };

    let mut out = vec![Resource::new(
        w.kind.as_str(),
        w.name.clone(),
        json!({"kind": w.kind.as_str(), "metadata": {"name": w.name}, "spec": spec}),
    )];
    if let Some(port) = w.service_port {
        out.push(Resource::new(
            "Service",
            w.name.clone(),
            json!({
                "kind": "Service",
                "metadata": {"name": w.name},
                "spec": {"selector": {"app": w.name}, "ports": [{"port": port}]}
            }),
        ));
    }
    out
}

fuzz_target!(|input: FuzzInput| {
    let level = match input.level % 3 {
        0 => SecurityLevel::None,
        1 => SecurityLevel::Baseline,
        _ => SecurityLevel::Restricted,
    };
    let config = HardenConfigBuilder::new()
        .security_level(level)
        .generate_network_policies(input.network_policies)
        .generate_rbac(input.rbac)
        .image_policy(ImagePolicyConfig {
            deny_latest_tag: true,
            allowed_registries: vec![input.allowed_registry],
            require_digests: true,
        })
        .resource_defaults(ResourceDefaultsConfig {
            cpu_request: "100m".to_owned(),
            memory_request: "64Mi".to_owned(),
            cpu_limit: "1".to_owned(),
            memory_limit: "128Mi".to_owned(),
            require_limits: false,
        })
        .build()
        .unwrap();
    let hardener = Hardener::from_config(config).unwrap();

    let mut resources: Vec<Resource> = input
        .workloads
        .iter()
        .take(8)
        .flat_map(workload)
        .collect();
    let input_count = resources.len();

    let Ok(runtime) = tokio::runtime::Builder::new_current_thread().build() else {
        return;
    };
    runtime.block_on(async {
        let report = hardener
            .harden(&mut resources, &CancellationToken::new())
            .await
            .unwrap();
        // 생성된 리소스는 입력 뒤에만 추가됨
        assert!(resources.len() >= input_count);
        assert!(report.changes.iter().all(|c| !c.resource_id.is_empty()));
    });
});
