//! 하드닝 런타임 설정
//!
//! [`HardenConfig`]는 core의 [`HardenSection`](chartguard_core::config::HardenSection)을
//! 기반으로 파이프라인이 사용하는 검증된 설정을 제공합니다.
//!
//! # 사용 예시
//! ```ignore
//! use chartguard_core::config::ChartguardConfig;
//! use chartguard_harden::config::HardenConfig;
//!
//! let core_config = ChartguardConfig::default();
//! let config = HardenConfig::from_core(&core_config.harden)?;
//! ```

use std::collections::HashMap;

use chartguard_core::config::HardenSection;
use chartguard_core::error::ConfigError;
use chartguard_core::types::{ImagePolicyConfig, ResourceDefaultsConfig, SecurityLevel};

use crate::registry::RegistryClientConfig;

/// 하드닝 파이프라인 설정
///
/// 기본값은 아무 정책도 켜지 않은 no-op 설정입니다.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HardenConfig {
    /// PSS 수준
    pub security_level: SecurityLevel,
    /// 워크로드별 NetworkPolicy 생성
    pub generate_network_policies: bool,
    /// 워크로드별 RBAC 생성
    pub generate_rbac: bool,
    /// 이미지 다이제스트 고정
    pub resolve_digests: bool,
    /// 이미지 정책 (있을 때만 활성화)
    pub image_policy: Option<ImagePolicyConfig>,
    /// 리소스 기본값 (있을 때만 활성화)
    pub resource_defaults: Option<ResourceDefaultsConfig>,
    /// `Kind/Name` -> 사전 할당된 리소스 ID
    pub resource_ids: HashMap<String, String>,
    /// 레지스트리 클라이언트 설정
    pub registry: RegistryClientConfig,
}

impl HardenConfig {
    /// core의 `[harden]` 섹션에서 설정을 생성합니다.
    ///
    /// `enabled = false`이면 레지스트리 설정만 유지한 no-op 설정을 반환합니다.
    pub fn from_core(section: &HardenSection) -> Result<Self, ConfigError> {
        section.validate()?;

        let registry = RegistryClientConfig::from(&section.registry);
        if !section.enabled {
            return Ok(Self {
                registry,
                ..Self::default()
            });
        }

        Ok(Self {
            security_level: section.security_level()?,
            generate_network_policies: section.generate_network_policies,
            generate_rbac: section.generate_rbac,
            resolve_digests: section.resolve_digests,
            image_policy: section.images.as_ref().map(ImagePolicyConfig::from),
            resource_defaults: section.resources.as_ref().map(ResourceDefaultsConfig::from),
            resource_ids: HashMap::new(),
            registry,
        })
    }

    /// 활성화되는 정책이 하나도 없는지 확인합니다.
    pub fn is_noop(&self) -> bool {
        self.security_level == SecurityLevel::None
            && !self.generate_network_policies
            && !self.generate_rbac
            && !self.resolve_digests
            && self.image_policy.is_none()
            && self.resource_defaults.is_none()
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "registry.timeout_secs".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        if self.registry.max_concurrent_resolutions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "registry.max_concurrent_resolutions".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        if self.resolve_digests && self.registry.auth_endpoint.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "registry.auth_endpoint".to_owned(),
                reason: "must not be empty when resolve_digests is enabled".to_owned(),
            });
        }

        Ok(())
    }
}

/// 하드닝 설정 빌더
#[derive(Default)]
pub struct HardenConfigBuilder {
    config: HardenConfig,
}

impl HardenConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// PSS 수준을 설정합니다.
    pub fn security_level(mut self, level: SecurityLevel) -> Self {
        self.config.security_level = level;
        self
    }

    /// NetworkPolicy 생성 여부를 설정합니다.
    pub fn generate_network_policies(mut self, enabled: bool) -> Self {
        self.config.generate_network_policies = enabled;
        self
    }

    /// RBAC 생성 여부를 설정합니다.
    pub fn generate_rbac(mut self, enabled: bool) -> Self {
        self.config.generate_rbac = enabled;
        self
    }

    /// 다이제스트 고정 여부를 설정합니다.
    pub fn resolve_digests(mut self, enabled: bool) -> Self {
        self.config.resolve_digests = enabled;
        self
    }

    /// 이미지 정책을 설정합니다.
    pub fn image_policy(mut self, policy: ImagePolicyConfig) -> Self {
        self.config.image_policy = Some(policy);
        self
    }

    /// 리소스 기본값을 설정합니다.
    pub fn resource_defaults(mut self, defaults: ResourceDefaultsConfig) -> Self {
        self.config.resource_defaults = Some(defaults);
        self
    }

    /// 리소스 ID 하나를 등록합니다.
    pub fn resource_id(mut self, key: impl Into<String>, id: impl Into<String>) -> Self {
        self.config.resource_ids.insert(key.into(), id.into());
        self
    }

    /// 리소스 ID 맵 전체를 설정합니다.
    pub fn resource_ids(mut self, ids: HashMap<String, String>) -> Self {
        self.config.resource_ids = ids;
        self
    }

    /// 레지스트리 클라이언트 설정을 지정합니다.
    pub fn registry(mut self, registry: RegistryClientConfig) -> Self {
        self.config.registry = registry;
        self
    }

    /// 설정을 검증하고 빌드합니다.
    pub fn build(self) -> Result<HardenConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
