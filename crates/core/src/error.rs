//! 에러 타입 — 도메인별 에러 정의

/// chartguard 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum ChartguardError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 정책 실행 에러 (하드닝 중단)
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    /// 레지스트리 통신 에러
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 정책 실행 에러
///
/// 하드닝 파이프라인이 중단된 원인을 정책 이름과 함께 전달합니다.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// 정책 실행 실패
    #[error("policy '{policy}' failed: {reason}")]
    Failed { policy: String, reason: String },

    /// 호출자에 의해 취소됨
    #[error("hardening cancelled")]
    Cancelled,
}

/// 레지스트리 통신 에러
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// 이미지 참조 형식 오류
    #[error("invalid image reference '{image}': {reason}")]
    InvalidReference { image: String, reason: String },

    /// HTTP 전송 실패 (연결, 타임아웃 등)
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// 예상하지 못한 HTTP 상태 코드
    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    /// 토큰 발급 실패
    #[error("token request for '{repository}' failed: {reason}")]
    Auth { repository: String, reason: String },

    /// 응답에 다이제스트 헤더 없음
    #[error("registry response for '{image}' has no content digest")]
    MissingDigest { image: String },
}

impl RegistryError {
    /// 재시도할 가치가 있는 에러인지 판단합니다.
    ///
    /// 전송 실패와 5xx/429 응답만 일시적인 에러로 취급합니다.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::InvalidReference { .. } | Self::Auth { .. } | Self::MissingDigest { .. } => {
                false
            }
        }
    }
}
