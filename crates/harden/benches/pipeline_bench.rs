//! 하드닝 파이프라인 벤치마크
//!
//! 워크로드 수에 따른 전체 파이프라인과 이미지 참조 파싱 성능을 측정합니다.

use criterion::{
    BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main,
};
use chartguard_core::types::{ImagePolicyConfig, Resource, ResourceDefaultsConfig, SecurityLevel};
use chartguard_harden::{HardenConfigBuilder, Hardener, parse_image_ref};
use serde_json::json;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

fn create_deployment(i: usize) -> Resource {
    let name = format!("svc-{i}");
    Resource::from_object(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": name, "namespace": "bench"},
        "spec": {
            "template": {
                "metadata": {"labels": {"app": name}},
                "spec": {
                    "containers": [{
                        "name": "app",
                        "image": format!("ghcr.io/acme/{name}:1.{i}"),
                        "env": [{"name": "PW", "valueFrom": {"secretKeyRef": {"name": "db", "key": "pw"}}}]
                    }],
                    "volumes": [{"name": "cfg", "configMap": {"name": name}}]
                }
            }
        }
    }))
    .unwrap()
}

fn create_service(i: usize) -> Resource {
    let name = format!("svc-{i}");
    Resource::from_object(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {"name": name, "namespace": "bench"},
        "spec": {"selector": {"app": name}, "ports": [{"port": 8080}]}
    }))
    .unwrap()
}

fn create_resources(count: usize) -> Vec<Resource> {
    (0..count)
        .flat_map(|i| [create_deployment(i), create_service(i)])
        .collect()
}

fn full_hardener() -> Hardener {
    let config = HardenConfigBuilder::new()
        .security_level(SecurityLevel::Restricted)
        .generate_network_policies(true)
        .generate_rbac(true)
        .image_policy(ImagePolicyConfig {
            deny_latest_tag: true,
            allowed_registries: vec!["ghcr.io/acme".to_owned()],
            require_digests: true,
        })
        .resource_defaults(ResourceDefaultsConfig {
            cpu_request: "100m".to_owned(),
            memory_request: "64Mi".to_owned(),
            cpu_limit: "500m".to_owned(),
            memory_limit: "256Mi".to_owned(),
            require_limits: false,
        })
        .build()
        .unwrap();
    Hardener::from_config(config).unwrap()
}

fn bench_pipeline_scaling(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let hardener = full_hardener();
    let cancel = CancellationToken::new();

    let mut group = c.benchmark_group("pipeline_scaling");
    for count in &[1usize, 10, 100, 500] {
        let resources = create_resources(*count);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &resources, |b, input| {
            b.iter_batched(
                || input.clone(),
                |mut resources| {
                    rt.block_on(async {
                        let report = hardener.harden(&mut resources, &cancel).await.unwrap();
                        black_box(report);
                    })
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_pod_security_only(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let config = HardenConfigBuilder::new()
        .security_level(SecurityLevel::Restricted)
        .build()
        .unwrap();
    let hardener = Hardener::from_config(config).unwrap();
    let cancel = CancellationToken::new();
    let resources = create_resources(100);

    let mut group = c.benchmark_group("pod_security");
    group.throughput(Throughput::Elements(100));
    group.bench_function("restricted_100_workloads", |b| {
        b.iter_batched(
            || resources.clone(),
            |mut resources| {
                rt.block_on(async {
                    black_box(hardener.harden(&mut resources, &cancel).await.unwrap());
                })
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

fn bench_image_ref_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("image_ref");
    group.throughput(Throughput::Elements(1));

    group.bench_function("docker_hub_short", |b| {
        b.iter(|| parse_image_ref(black_box("nginx:1.25")))
    });

    group.bench_function("registry_with_port_and_digest", |b| {
        b.iter(|| {
            parse_image_ref(black_box(
                "localhost:5000/team/app:v2@sha256:0123456789abcdef0123456789abcdef",
            ))
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_pipeline_scaling,
    bench_pod_security_only,
    bench_image_ref_parsing
);
criterion_main!(benches);
