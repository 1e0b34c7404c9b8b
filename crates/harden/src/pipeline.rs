//! 하드닝 파이프라인
//!
//! [`Hardener`]는 설정에서 활성화된 정책만 고정된 순서로 구성하고,
//! 호출자의 리소스 집합에 차례로 적용합니다.
//!
//! # 실행 순서
//!
//! ```text
//! PSS -> ResourceRequirements -> ImagePolicy -> DigestResolver
//!     -> NetworkPolicyGenerator -> RBACGenerator
//! ```
//!
//! 각 정책은 앞 정책이 수정한 결과를 그대로 봅니다. 첫 에러에서 전체 실행이
//! 중단되며, 이미 적용된 변경은 되돌리지 않습니다.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use chartguard_core::error::ConfigError;
use chartguard_core::metrics as m;
use chartguard_core::types::{HardenReport, Resource, SecurityLevel};

use crate::config::HardenConfig;
use crate::error::HardenError;
use crate::policy::{
    DigestResolverPolicy, ImagePolicy, NetworkPolicyGenerator, PodSecurityStandardsPolicy, Policy,
    PolicyContext, RbacGenerator, ResourceRequirementsPolicy,
};
use crate::registry::{HttpRegistryClient, RegistryClient};

/// 파이프라인 단계
///
/// 정책 집합이 닫혀 있으므로 trait 객체 대신 enum으로 디스패치합니다.
pub enum PolicyStage<R: RegistryClient> {
    /// Pod Security Standards
    PodSecurity(PodSecurityStandardsPolicy),
    /// 리소스 요구량
    Resources(ResourceRequirementsPolicy),
    /// 이미지 권고 검사
    Images(ImagePolicy),
    /// 다이제스트 고정
    Digests(DigestResolverPolicy<R>),
    /// NetworkPolicy 생성
    NetworkPolicies(NetworkPolicyGenerator),
    /// RBAC 생성
    Rbac(RbacGenerator),
}

impl<R: RegistryClient> Policy for PolicyStage<R> {
    fn name(&self) -> &'static str {
        match self {
            Self::PodSecurity(p) => p.name(),
            Self::Resources(p) => p.name(),
            Self::Images(p) => p.name(),
            Self::Digests(p) => p.name(),
            Self::NetworkPolicies(p) => p.name(),
            Self::Rbac(p) => p.name(),
        }
    }

    async fn apply(&self, ctx: &mut PolicyContext<'_>) -> Result<(), HardenError> {
        match self {
            Self::PodSecurity(p) => p.apply(ctx).await,
            Self::Resources(p) => p.apply(ctx).await,
            Self::Images(p) => p.apply(ctx).await,
            Self::Digests(p) => p.apply(ctx).await,
            Self::NetworkPolicies(p) => p.apply(ctx).await,
            Self::Rbac(p) => p.apply(ctx).await,
        }
    }
}

/// 하드닝 파이프라인
pub struct Hardener<R: RegistryClient = HttpRegistryClient> {
    stages: Vec<PolicyStage<R>>,
    config: HardenConfig,
}

impl Hardener {
    /// 새 빌더를 생성합니다.
    pub fn builder() -> HardenerBuilder {
        HardenerBuilder::new()
    }

    /// 설정만으로 파이프라인을 생성합니다.
    ///
    /// 다이제스트 고정이 켜져 있으면 기본 HTTP 레지스트리 클라이언트를 만듭니다.
    pub fn from_config(config: HardenConfig) -> Result<Self, HardenError> {
        let mut builder = HardenerBuilder::new();
        if config.resolve_digests {
            let client = HttpRegistryClient::new(config.registry.clone())?;
            builder = builder.registry_client(Arc::new(client));
        }
        builder.config(config).build()
    }
}

impl<R: RegistryClient> Hardener<R> {
    /// 구성된 정책 이름을 실행 순서대로 반환합니다.
    pub fn policy_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// 활성화된 정책이 없는지 확인합니다.
    pub fn is_noop(&self) -> bool {
        self.stages.is_empty()
    }

    /// 파이프라인 설정
    pub fn config(&self) -> &HardenConfig {
        &self.config
    }

    /// 리소스 집합에 모든 정책을 순서대로 적용합니다.
    ///
    /// 정책이 생성한 리소스는 `resources` 뒤에 추가됩니다.
    ///
    /// # Errors
    ///
    /// 첫 번째로 실패한 정책의 에러를 정책 이름으로 감싸 반환합니다.
    /// 실행 전에 취소되었으면 [`HardenError::Cancelled`]를 반환합니다.
    pub async fn harden(
        &self,
        resources: &mut Vec<Resource>,
        cancel: &CancellationToken,
    ) -> Result<HardenReport, HardenError> {
        let started = Instant::now();
        info!(
            policies = ?self.policy_names(),
            resources = resources.len(),
            "hardening started"
        );

        let mut report = HardenReport::new();
        for stage in &self.stages {
            let policy = stage.name();
            if cancel.is_cancelled() {
                error!(policy = policy, "hardening cancelled before policy");
                Self::record_run(started, "cancelled");
                return Err(HardenError::Cancelled);
            }

            debug!(policy = policy, "applying policy");
            let mut ctx = PolicyContext {
                resources: &mut *resources,
                report: &mut report,
                resource_ids: &self.config.resource_ids,
                cancel,
            };

            if let Err(e) = stage.apply(&mut ctx).await {
                error!(policy = policy, error = %e, "policy failed");
                counter!(m::HARDEN_POLICY_FAILURES_TOTAL, m::LABEL_POLICY => policy).increment(1);
                Self::record_run(started, "failure");
                return Err(e.in_policy(policy));
            }
        }

        Self::record_run(started, "success");
        info!(
            changes = report.changes.len(),
            warnings = report.warnings.len(),
            resources = resources.len(),
            "hardening finished"
        );
        Ok(report)
    }

    fn record_run(started: Instant, result: &'static str) {
        counter!(m::HARDEN_RUNS_TOTAL, m::LABEL_RESULT => result).increment(1);
        histogram!(m::HARDEN_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    }
}

/// 하드닝 파이프라인 빌더
///
/// 다이제스트 고정을 켜려면 레지스트리 클라이언트가 필요합니다.
pub struct HardenerBuilder<R: RegistryClient = HttpRegistryClient> {
    config: HardenConfig,
    registry: Option<Arc<R>>,
}

impl HardenerBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: HardenConfig::default(),
            registry: None,
        }
    }
}

impl Default for HardenerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RegistryClient> HardenerBuilder<R> {
    /// 파이프라인 설정을 지정합니다.
    pub fn config(mut self, config: HardenConfig) -> Self {
        self.config = config;
        self
    }

    /// 레지스트리 클라이언트를 설정합니다.
    pub fn registry_client<C: RegistryClient>(self, client: Arc<C>) -> HardenerBuilder<C> {
        HardenerBuilder {
            config: self.config,
            registry: Some(client),
        }
    }

    /// 파이프라인을 빌드합니다.
    ///
    /// 설정에서 활성화된 정책만 고정된 순서로 구성합니다.
    pub fn build(self) -> Result<Hardener<R>, HardenError> {
        self.config.validate()?;
        let config = self.config;
        let mut stages = Vec::new();

        if config.security_level != SecurityLevel::None {
            stages.push(PolicyStage::PodSecurity(PodSecurityStandardsPolicy::new(
                config.security_level,
            )));
        }

        if let Some(defaults) = &config.resource_defaults {
            stages.push(PolicyStage::Resources(ResourceRequirementsPolicy::new(
                defaults.clone(),
            )));
        }

        if let Some(image_policy) = &config.image_policy {
            stages.push(PolicyStage::Images(ImagePolicy::new(image_policy)));
        }

        if config.resolve_digests {
            let client = self.registry.ok_or_else(|| ConfigError::InvalidValue {
                field: "registry_client".to_owned(),
                reason: "a registry client is required when resolve_digests is enabled".to_owned(),
            })?;
            stages.push(PolicyStage::Digests(DigestResolverPolicy::new(
                client,
                config.registry.max_concurrent_resolutions,
            )));
        }

        if config.generate_network_policies {
            stages.push(PolicyStage::NetworkPolicies(NetworkPolicyGenerator::new()));
        }

        if config.generate_rbac {
            stages.push(PolicyStage::Rbac(RbacGenerator::new()));
        }

        debug!(policies = stages.len(), "hardening pipeline built");
        Ok(Hardener { stages, config })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HardenConfigBuilder;
    use crate::registry::MockRegistryClient;
    use chartguard_core::types::{ImagePolicyConfig, ResourceDefaultsConfig};
    use serde_json::json;

    fn all_enabled() -> HardenConfig {
        HardenConfigBuilder::new()
            .security_level(SecurityLevel::Restricted)
            .resource_defaults(ResourceDefaultsConfig {
                cpu_limit: "500m".to_owned(),
                ..ResourceDefaultsConfig::default()
            })
            .image_policy(ImagePolicyConfig {
                deny_latest_tag: true,
                ..ImagePolicyConfig::default()
            })
            .resolve_digests(true)
            .generate_network_policies(true)
            .generate_rbac(true)
            .build()
            .unwrap()
    }

    fn deployment() -> Resource {
        Resource::new(
            "Deployment",
            "web",
            json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {"name": "web"},
                "spec": {
                    "selector": {"matchLabels": {"app": "web"}},
                    "template": {"spec": {"containers": [{"name": "app", "image": "nginx:1.25"}]}}
                }
            }),
        )
    }

    #[test]
    fn empty_config_builds_noop_pipeline() {
        let hardener = Hardener::builder().build().unwrap();
        assert!(hardener.is_noop());
        assert!(hardener.policy_names().is_empty());
    }

    #[test]
    fn stages_follow_fixed_order() {
        let hardener = Hardener::builder()
            .config(all_enabled())
            .registry_client(Arc::new(MockRegistryClient::new()))
            .build()
            .unwrap();
        assert_eq!(
            hardener.policy_names(),
            vec![
                "pod-security-standards",
                "resource-requirements",
                "image-policy",
                "digest-resolver",
                "network-policy-generator",
                "rbac-generator",
            ]
        );
    }

    #[test]
    fn only_enabled_stages_are_built() {
        let config = HardenConfigBuilder::new()
            .generate_rbac(true)
            .security_level(SecurityLevel::Baseline)
            .build()
            .unwrap();
        let hardener = Hardener::builder().config(config).build().unwrap();
        assert_eq!(
            hardener.policy_names(),
            vec!["pod-security-standards", "rbac-generator"]
        );
    }

    #[test]
    fn digests_without_client_is_config_error() {
        let config = HardenConfigBuilder::new().resolve_digests(true).build().unwrap();
        let err = Hardener::builder().config(config).build().err().unwrap();
        assert!(matches!(err, HardenError::Config(_)));
    }

    #[test]
    fn from_config_creates_http_client() {
        let config = HardenConfigBuilder::new().resolve_digests(true).build().unwrap();
        let hardener = Hardener::from_config(config).unwrap();
        assert_eq!(hardener.policy_names(), vec!["digest-resolver"]);
    }

    #[tokio::test]
    async fn noop_pipeline_leaves_resources_untouched() {
        let hardener = Hardener::builder().build().unwrap();
        let mut resources = vec![deployment()];
        let snapshot = resources.clone();

        let report = hardener
            .harden(&mut resources, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.is_empty());
        assert_eq!(resources, snapshot);
    }

    #[tokio::test]
    async fn full_pipeline_runs_every_stage() {
        let mock = Arc::new(MockRegistryClient::new().with_digest("nginx:1.25", "sha256:abc"));
        let hardener = Hardener::builder()
            .config(all_enabled())
            .registry_client(Arc::clone(&mock))
            .build()
            .unwrap();
        let mut resources = vec![deployment()];

        let report = hardener
            .harden(&mut resources, &CancellationToken::new())
            .await
            .unwrap();

        let container = &resources[0].object["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["image"], json!("nginx@sha256:abc"));
        assert_eq!(container["resources"]["limits"]["cpu"], json!("500m"));
        assert_eq!(container["securityContext"]["runAsNonRoot"], json!(true));

        let kinds: Vec<&str> = resources[1..].iter().map(|r| r.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec!["NetworkPolicy", "ServiceAccount", "Role", "RoleBinding"]
        );
        // 이미지 정책은 다이제스트 고정 전에 실행되므로 경고 없음 (명시적 태그)
        assert!(report.warnings.is_empty());
        assert!(!report.changes.is_empty());
    }

    #[tokio::test]
    async fn failure_is_wrapped_with_policy_name_and_not_rolled_back() {
        let config = HardenConfigBuilder::new()
            .security_level(SecurityLevel::Restricted)
            .resolve_digests(true)
            .build()
            .unwrap();
        let hardener = Hardener::builder()
            .config(config)
            .registry_client(Arc::new(MockRegistryClient::new()))
            .build()
            .unwrap();
        let mut resources = vec![deployment()];

        let err = hardener
            .harden(&mut resources, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("policy digest-resolver:"));
        // PSS 변경은 유지됨
        assert_eq!(
            resources[0].object["spec"]["template"]["spec"]["automountServiceAccountToken"],
            json!(false)
        );
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_stage() {
        let config = HardenConfigBuilder::new()
            .security_level(SecurityLevel::Restricted)
            .build()
            .unwrap();
        let hardener = Hardener::builder().config(config).build().unwrap();
        let mut resources = vec![deployment()];
        let snapshot = resources.clone();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = hardener.harden(&mut resources, &cancel).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(resources, snapshot);
    }

    #[tokio::test]
    async fn resource_ids_are_used_in_changes() {
        let config = HardenConfigBuilder::new()
            .security_level(SecurityLevel::Restricted)
            .resource_id("Deployment/web", "templates/deployment.yaml")
            .build()
            .unwrap();
        let hardener = Hardener::builder().config(config).build().unwrap();
        let mut resources = vec![deployment()];

        let report = hardener
            .harden(&mut resources, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report
            .changes
            .iter()
            .all(|c| c.resource_id == "templates/deployment.yaml"));
    }
}
