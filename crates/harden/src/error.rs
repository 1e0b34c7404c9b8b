//! 하드닝 에러 타입
//!
//! [`HardenError`]는 하드닝 파이프라인 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<HardenError> for ChartguardError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use chartguard_core::error::{ChartguardError, ConfigError, PolicyError, RegistryError};

/// 하드닝 도메인 에러
///
/// 설정 에러, 정책 실행 중단(RequireLimits 위반, 레지스트리 실패, 취소)을 포괄합니다.
#[derive(Debug, thiserror::Error)]
pub enum HardenError {
    /// 설정 에러 (파이프라인 실행 전)
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 정책 실행 실패 -- 실패한 정책 이름으로 감싼 에러
    #[error("policy {policy}: {source}")]
    Policy {
        /// 실패한 정책 이름
        policy: String,
        /// 원인 에러
        #[source]
        source: Box<HardenError>,
    },

    /// requireLimits 모드에서 limit 누락
    #[error("{resource}: container '{container}': missing {quantity} limit (requireLimits=true)")]
    MissingLimit {
        /// 리소스 ID
        resource: String,
        /// 컨테이너 이름
        container: String,
        /// 누락된 항목 (cpu, memory)
        quantity: &'static str,
    },

    /// 이미지 다이제스트 조회 실패
    #[error("{resource}: failed to resolve digest for image '{image}': {source}")]
    DigestResolution {
        /// 이미지를 참조한 리소스 ID
        resource: String,
        /// 조회 대상 이미지
        image: String,
        /// 레지스트리 에러
        #[source]
        source: RegistryError,
    },

    /// 다이제스트 조회 태스크 비정상 종료
    #[error("digest lookup task failed: {0}")]
    TaskFailed(String),

    /// 호출자에 의해 취소됨
    #[error("hardening cancelled")]
    Cancelled,
}

impl HardenError {
    /// 정책 이름으로 에러를 감쌉니다.
    pub fn in_policy(self, policy: &str) -> Self {
        Self::Policy {
            policy: policy.to_owned(),
            source: Box::new(self),
        }
    }

    /// 감싼 정책 이름을 벗겨낸 원인 에러를 반환합니다.
    pub fn root(&self) -> &HardenError {
        match self {
            Self::Policy { source, .. } => source.root(),
            other => other,
        }
    }

    /// 취소로 인한 에러인지 확인합니다.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled)
    }
}

impl From<HardenError> for ChartguardError {
    fn from(err: HardenError) -> Self {
        match err {
            HardenError::Config(e) => ChartguardError::Config(e),
            HardenError::Cancelled => ChartguardError::Policy(PolicyError::Cancelled),
            HardenError::Policy { source, .. } if source.is_cancelled() => {
                ChartguardError::Policy(PolicyError::Cancelled)
            }
            HardenError::Policy { policy, source } => {
                ChartguardError::Policy(PolicyError::Failed {
                    policy,
                    reason: source.to_string(),
                })
            }
            other @ (HardenError::MissingLimit { .. }
            | HardenError::DigestResolution { .. }
            | HardenError::TaskFailed(_)) => {
                ChartguardError::Policy(PolicyError::Failed {
                    policy: "unknown".to_owned(),
                    reason: other.to_string(),
                })
            }
        }
    }
}
