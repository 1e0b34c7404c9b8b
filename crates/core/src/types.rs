//! 도메인 타입 — 하드닝 파이프라인 전역에서 사용되는 공통 타입
//!
//! 모든 정책이 공유하는 데이터 구조를 정의합니다.
//! 리소스 트리는 `serde_json::Value`로 표현되며, 정책은 이 트리를 제자리에서 수정합니다.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// Kubernetes 형태의 리소스
///
/// `apiVersion`/`kind`/`metadata`/`spec` 트리를 그대로 담습니다.
/// 식별자는 `Kind/Name`입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// 리소스 종류 (예: Deployment)
    pub kind: String,
    /// 리소스 이름 (`metadata.name`)
    pub name: String,
    /// 리소스 전체 트리
    pub object: Value,
}

impl Resource {
    /// kind, name, 트리로 리소스를 생성합니다.
    pub fn new(kind: impl Into<String>, name: impl Into<String>, object: Value) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            object,
        }
    }

    /// 트리의 `kind`와 `metadata.name`을 읽어 리소스를 생성합니다.
    ///
    /// 둘 중 하나라도 없으면 `None`을 반환합니다.
    pub fn from_object(object: Value) -> Option<Self> {
        let kind = object.get("kind")?.as_str()?.to_owned();
        let name = object.get("metadata")?.get("name")?.as_str()?.to_owned();
        Some(Self { kind, name, object })
    }

    /// `Kind/Name` 형식의 식별자를 반환합니다.
    pub fn key(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }

    /// `metadata.namespace` 값을 반환합니다.
    pub fn namespace(&self) -> Option<&str> {
        self.object.get("metadata")?.get("namespace")?.as_str()
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// 변경 기록
///
/// 정책이 수행한 모든 변경(필드 주입, 리소스 생성)에 대한 감사 기록입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// 대상 리소스 ID (사전 할당된 ID 또는 `Kind/Name`)
    pub resource_id: String,
    /// 변경된 필드 경로 (리소스 생성 시 빈 문자열)
    pub field_path: String,
    /// 이전 값 (없었으면 `None`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    /// 새 값
    pub new_value: Value,
    /// 변경 사유
    pub reason: String,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field_path.is_empty() {
            write!(f, "{}: {}", self.resource_id, self.reason)
        } else {
            write!(f, "{} {}: {}", self.resource_id, self.field_path, self.reason)
        }
    }
}

/// 하드닝 실행 결과
///
/// 한 번의 `harden` 호출 동안 변경 기록과 경고는 추가만 됩니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardenReport {
    /// 변경 기록 (발생 순서)
    pub changes: Vec<Change>,
    /// 경고 메시지 (발생 순서)
    pub warnings: Vec<String>,
}

impl HardenReport {
    /// 빈 결과를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 변경도 경고도 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.warnings.is_empty()
    }
}

/// Pod Security Standards 적용 수준
///
/// baseline과 restricted는 서로 독립된 정책 분기입니다.
/// restricted가 baseline의 검사를 포함하지 않습니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// 적용 안 함
    #[default]
    None,
    /// baseline: 위험 설정 경고, 위험 capability 제거
    Baseline,
    /// restricted: 보안 컨텍스트 기본값 주입
    Restricted,
}

impl SecurityLevel {
    /// 설정 문자열에서 수준을 파싱합니다.
    ///
    /// 대소문자를 구분하지 않으며, 빈 문자열은 `None`입니다.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "baseline" => Ok(Self::Baseline),
            "restricted" => Ok(Self::Restricted),
            other => Err(ConfigError::InvalidValue {
                field: "harden.security-level".to_owned(),
                reason: format!("unknown security level '{other}', expected none, baseline or restricted"),
            }),
        }
    }

    /// 설정 문자열 형태를 반환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Baseline => "baseline",
            Self::Restricted => "restricted",
        }
    }
}

impl FromStr for SecurityLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 이미지 정책 설정
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePolicyConfig {
    /// 태그 없음 / `latest` 태그 경고
    pub deny_latest_tag: bool,
    /// 허용 레지스트리 접두어 (비어있으면 검사 안 함)
    pub allowed_registries: Vec<String>,
    /// 다이제스트 고정 요구
    pub require_digests: bool,
}

/// 리소스 요구량 기본값 설정
///
/// 빈 문자열인 항목은 주입하지 않습니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDefaultsConfig {
    /// 기본 CPU request
    pub cpu_request: String,
    /// 기본 메모리 request
    pub memory_request: String,
    /// 기본 CPU limit
    pub cpu_limit: String,
    /// 기본 메모리 limit
    pub memory_limit: String,
    /// limit이 없는 컨테이너를 에러로 처리
    pub require_limits: bool,
}
