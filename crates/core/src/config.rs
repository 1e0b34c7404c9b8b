//! 설정 관리 — chartguard.toml 파싱 및 런타임 설정
//!
//! [`ChartguardConfig`]는 모든 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. 환경변수 (`CHARTGUARD_HARDEN_SECURITY_LEVEL=restricted` 형식)
//! 2. 설정 파일 (`chartguard.toml`)
//! 3. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), chartguard_core::error::ChartguardError> {
//! use chartguard_core::config::ChartguardConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = ChartguardConfig::load("chartguard.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = ChartguardConfig::parse("[harden]\nsecurity-level = \"restricted\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ChartguardError, ConfigError};
use crate::types::{ImagePolicyConfig, ResourceDefaultsConfig, SecurityLevel};

/// chartguard 통합 설정
///
/// `chartguard.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChartguardConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 하드닝 설정
    #[serde(default)]
    pub harden: HardenSection,
}

impl ChartguardConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ChartguardError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ChartguardError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ChartguardError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                ChartguardError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, ChartguardError> {
        toml::from_str(toml_str).map_err(|e| {
            ChartguardError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `CHARTGUARD_{SECTION}_{FIELD}`, 하위 섹션은
    /// 경로를 이어 붙입니다 (`harden.registry.timeout-secs` ->
    /// `CHARTGUARD_HARDEN_REGISTRY_TIMEOUT_SECS`).
    ///
    /// `[harden.images]`/`[harden.resources]`는 해당 접두어의 변수가 하나라도
    /// 있으면 기본값으로 섹션을 만든 뒤 덮어씁니다 (정책이 활성화됨).
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "CHARTGUARD_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "CHARTGUARD_GENERAL_LOG_FORMAT");

        // Harden
        let harden = &mut self.harden;
        override_bool(&mut harden.enabled, "CHARTGUARD_HARDEN_ENABLED");
        override_string(&mut harden.security_level, "CHARTGUARD_HARDEN_SECURITY_LEVEL");
        override_bool(
            &mut harden.generate_network_policies,
            "CHARTGUARD_HARDEN_GENERATE_NETWORK_POLICIES",
        );
        override_bool(&mut harden.generate_rbac, "CHARTGUARD_HARDEN_GENERATE_RBAC");
        override_bool(&mut harden.resolve_digests, "CHARTGUARD_HARDEN_RESOLVE_DIGESTS");

        // Images
        if harden.images.is_some() || any_env_set(&IMAGES_ENV) {
            let images = harden.images.get_or_insert_with(ImagesSection::default);
            override_bool(&mut images.deny_latest_tag, IMAGES_ENV[0]);
            override_csv(&mut images.allowed_registries, IMAGES_ENV[1]);
            override_bool(&mut images.require_digests, IMAGES_ENV[2]);
        }

        // Resources
        if harden.resources.is_some() || any_env_set(&RESOURCES_ENV) {
            let resources = harden.resources.get_or_insert_with(ResourcesSection::default);
            override_string(&mut resources.cpu_request, RESOURCES_ENV[0]);
            override_string(&mut resources.memory_request, RESOURCES_ENV[1]);
            override_string(&mut resources.cpu_limit, RESOURCES_ENV[2]);
            override_string(&mut resources.memory_limit, RESOURCES_ENV[3]);
            override_bool(&mut resources.require_limits, RESOURCES_ENV[4]);
        }

        // Registry
        let registry = &mut harden.registry;
        override_u64(&mut registry.timeout_secs, "CHARTGUARD_HARDEN_REGISTRY_TIMEOUT_SECS");
        override_u32(&mut registry.max_retries, "CHARTGUARD_HARDEN_REGISTRY_MAX_RETRIES");
        override_u64(
            &mut registry.retry_backoff_base_ms,
            "CHARTGUARD_HARDEN_REGISTRY_RETRY_BACKOFF_BASE_MS",
        );
        override_usize(
            &mut registry.max_concurrent_resolutions,
            "CHARTGUARD_HARDEN_REGISTRY_MAX_CONCURRENT_RESOLUTIONS",
        );
        override_string(
            &mut registry.auth_endpoint,
            "CHARTGUARD_HARDEN_REGISTRY_AUTH_ENDPOINT",
        );
        override_csv(
            &mut registry.insecure_registries,
            "CHARTGUARD_HARDEN_REGISTRY_INSECURE_REGISTRIES",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ChartguardError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log-level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log-format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        self.harden.validate()?;
        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// `[harden]` 섹션
///
/// `images`, `resources` 하위 섹션은 파일에 있을 때만 해당 정책이 활성화됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HardenSection {
    /// 하드닝 활성화 여부 (false면 아무 정책도 실행하지 않음)
    pub enabled: bool,
    /// PSS 수준 (none, baseline, restricted)
    pub security_level: String,
    /// 워크로드별 NetworkPolicy 생성
    pub generate_network_policies: bool,
    /// 워크로드별 최소 권한 RBAC 생성
    pub generate_rbac: bool,
    /// 이미지 태그를 다이제스트로 고정
    pub resolve_digests: bool,
    /// 이미지 정책
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<ImagesSection>,
    /// 리소스 요구량 기본값
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesSection>,
    /// 레지스트리 클라이언트 설정
    pub registry: RegistrySection,
}

impl Default for HardenSection {
    fn default() -> Self {
        Self {
            enabled: true,
            security_level: String::new(),
            generate_network_policies: false,
            generate_rbac: false,
            resolve_digests: false,
            images: None,
            resources: None,
            registry: RegistrySection::default(),
        }
    }
}

impl HardenSection {
    /// 설정 문자열의 PSS 수준을 파싱합니다.
    pub fn security_level(&self) -> Result<SecurityLevel, ConfigError> {
        SecurityLevel::parse(&self.security_level)
    }

    /// 섹션 값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.security_level()?;

        if let Some(images) = &self.images {
            if images
                .allowed_registries
                .iter()
                .any(|r| r.trim_end_matches('/').trim().is_empty())
            {
                return Err(ConfigError::InvalidValue {
                    field: "harden.images.allowed-registries".to_owned(),
                    reason: "registry prefixes must not be empty".to_owned(),
                });
            }
        }

        self.registry.validate()
    }
}

/// `[harden.images]` 섹션
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ImagesSection {
    /// 태그 없음 / `latest` 태그 경고
    pub deny_latest_tag: bool,
    /// 허용 레지스트리 접두어
    pub allowed_registries: Vec<String>,
    /// 다이제스트 고정 요구
    pub require_digests: bool,
}

impl From<&ImagesSection> for ImagePolicyConfig {
    fn from(section: &ImagesSection) -> Self {
        Self {
            deny_latest_tag: section.deny_latest_tag,
            allowed_registries: section.allowed_registries.clone(),
            require_digests: section.require_digests,
        }
    }
}

/// `[harden.resources]` 섹션
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ResourcesSection {
    /// 기본 CPU request
    pub cpu_request: String,
    /// 기본 메모리 request
    pub memory_request: String,
    /// 기본 CPU limit
    pub cpu_limit: String,
    /// 기본 메모리 limit
    pub memory_limit: String,
    /// limit 누락 시 에러
    pub require_limits: bool,
}

impl From<&ResourcesSection> for ResourceDefaultsConfig {
    fn from(section: &ResourcesSection) -> Self {
        Self {
            cpu_request: section.cpu_request.trim().to_owned(),
            memory_request: section.memory_request.trim().to_owned(),
            cpu_limit: section.cpu_limit.trim().to_owned(),
            memory_limit: section.memory_limit.trim().to_owned(),
            require_limits: section.require_limits,
        }
    }
}

/// 레지스트리 설정 상한값 상수
const MAX_REGISTRY_TIMEOUT_SECS: u64 = 300;
const MAX_REGISTRY_RETRIES: u32 = 10;
const MAX_RETRY_BACKOFF_BASE_MS: u64 = 30_000;
const MAX_CONCURRENT_RESOLUTIONS: usize = 64;

/// `[harden.registry]` 섹션
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RegistrySection {
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
    /// 일시적 실패 시 재시도 최대 횟수
    pub max_retries: u32,
    /// 재시도 백오프 기본 간격 (밀리초)
    pub retry_backoff_base_ms: u64,
    /// 동시 다이제스트 조회 최대 수
    pub max_concurrent_resolutions: usize,
    /// Docker Hub 토큰 엔드포인트
    pub auth_endpoint: String,
    /// 평문 HTTP로 접근할 레지스트리 호스트
    pub insecure_registries: Vec<String>,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 2,
            retry_backoff_base_ms: 250,
            max_concurrent_resolutions: 4,
            auth_endpoint: "https://auth.docker.io/token".to_owned(),
            insecure_registries: Vec::new(),
        }
    }
}

impl RegistrySection {
    /// 레지스트리 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 || self.timeout_secs > MAX_REGISTRY_TIMEOUT_SECS {
            return Err(ConfigError::InvalidValue {
                field: "harden.registry.timeout-secs".to_owned(),
                reason: format!("must be 1-{MAX_REGISTRY_TIMEOUT_SECS}"),
            });
        }

        if self.max_retries > MAX_REGISTRY_RETRIES {
            return Err(ConfigError::InvalidValue {
                field: "harden.registry.max-retries".to_owned(),
                reason: format!("must be 0-{MAX_REGISTRY_RETRIES}"),
            });
        }

        if self.retry_backoff_base_ms > MAX_RETRY_BACKOFF_BASE_MS {
            return Err(ConfigError::InvalidValue {
                field: "harden.registry.retry-backoff-base-ms".to_owned(),
                reason: format!("must be 0-{MAX_RETRY_BACKOFF_BASE_MS}"),
            });
        }

        if self.max_concurrent_resolutions == 0
            || self.max_concurrent_resolutions > MAX_CONCURRENT_RESOLUTIONS
        {
            return Err(ConfigError::InvalidValue {
                field: "harden.registry.max-concurrent-resolutions".to_owned(),
                reason: format!("must be 1-{MAX_CONCURRENT_RESOLUTIONS}"),
            });
        }

        if !self.auth_endpoint.starts_with("https://") && !self.auth_endpoint.starts_with("http://")
        {
            return Err(ConfigError::InvalidValue {
                field: "harden.registry.auth-endpoint".to_owned(),
                reason: "must be an http(s) URL".to_owned(),
            });
        }

        Ok(())
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

/// `[harden.images]` 환경변수 (필드 순서대로)
const IMAGES_ENV: [&str; 3] = [
    "CHARTGUARD_HARDEN_IMAGES_DENY_LATEST_TAG",
    "CHARTGUARD_HARDEN_IMAGES_ALLOWED_REGISTRIES",
    "CHARTGUARD_HARDEN_IMAGES_REQUIRE_DIGESTS",
];

/// `[harden.resources]` 환경변수 (필드 순서대로)
const RESOURCES_ENV: [&str; 5] = [
    "CHARTGUARD_HARDEN_RESOURCES_CPU_REQUEST",
    "CHARTGUARD_HARDEN_RESOURCES_MEMORY_REQUEST",
    "CHARTGUARD_HARDEN_RESOURCES_CPU_LIMIT",
    "CHARTGUARD_HARDEN_RESOURCES_MEMORY_LIMIT",
    "CHARTGUARD_HARDEN_RESOURCES_REQUIRE_LIMITS",
];

fn any_env_set(keys: &[&str]) -> bool {
    keys.iter().any(|key| std::env::var_os(key).is_some())
}

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_u32(target: &mut u32, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u32 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
