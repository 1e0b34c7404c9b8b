//! 빌드 프로비넌스 주석
//!
//! 하드닝 결과물에 붙일 `chartguard.io/*` 주석과 SLSA 빌드 프로비넌스
//! predicate를 생성합니다. 파이프라인과 독립된 순수 함수이며, 시각을 인자로 받는
//! [`generate_at`]은 같은 입력에 항상 같은 출력을 냅니다.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value, json};

use chartguard_core::types::{Resource, SecurityLevel};

use crate::podspec::child_object_mut;

/// 생성기 버전
pub const GENERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// 주석 키 접두어
pub const ANNOTATION_PREFIX: &str = "chartguard.io/";

/// SLSA predicate 타입
pub const SLSA_PREDICATE_TYPE: &str = "https://slsa.dev/provenance/v0.2";

/// SLSA buildType
pub const BUILD_TYPE: &str = "https://chartguard.io/harden@v1";

/// 다이제스트 알고리즘이 없을 때의 기본값
const DEFAULT_DIGEST_ALGORITHM: &str = "sha256";

/// 프로비넌스 입력
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvenanceConfig {
    /// 차트/소스 참조
    pub source: String,
    /// 콘텐츠 다이제스트 (`algo:hex` 또는 hex)
    pub chart_digest: Option<String>,
    /// 프로파일 이름
    pub profile: Option<String>,
    /// 적용된 PSS 수준
    pub hardening_level: SecurityLevel,
    /// 제외된 서브차트
    pub excluded_subcharts: Vec<String>,
    /// 생성 시각 포함 여부
    pub embed_timestamp: bool,
}

/// 생성된 프로비넌스
#[derive(Debug, Clone, PartialEq)]
pub struct Provenance {
    /// 전체 키(`chartguard.io/...`) -> 값
    pub annotations: BTreeMap<String, String>,
    /// SLSA predicate
    pub predicate: Value,
}

impl Provenance {
    /// predicate를 JSON 문자열로 반환합니다.
    pub fn predicate_json(&self) -> String {
        self.predicate.to_string()
    }

    /// 리소스의 `metadata.annotations`에 주석을 병합합니다.
    ///
    /// 리소스 트리나 `metadata`/`annotations`가 객체가 아니면 아무것도 하지 않고
    /// `false`를 반환합니다.
    pub fn apply_to(&self, resource: &mut Resource) -> bool {
        let Some(root) = resource.object.as_object_mut() else {
            return false;
        };
        let Some(annotations) =
            child_object_mut(root, "metadata").and_then(|m| child_object_mut(m, "annotations"))
        else {
            return false;
        };
        for (key, value) in &self.annotations {
            annotations.insert(key.clone(), Value::String(value.clone()));
        }
        true
    }
}

/// `algo:hex` 다이제스트를 `{algo: hex}`로 변환합니다. 알고리즘이 없으면 sha256입니다.
pub fn digest_map(digest: &str) -> Map<String, Value> {
    let (algorithm, hex) = digest
        .split_once(':')
        .unwrap_or((DEFAULT_DIGEST_ALGORITHM, digest));
    let mut map = Map::new();
    map.insert(algorithm.to_owned(), Value::String(hex.to_owned()));
    map
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.trim().is_empty())
}

/// 주어진 시각으로 프로비넌스를 생성합니다.
pub fn generate_at(config: &ProvenanceConfig, now: DateTime<Utc>) -> Provenance {
    let digest = non_empty(config.chart_digest.as_ref());
    let profile = non_empty(config.profile.as_ref());
    let timestamp = config
        .embed_timestamp
        .then(|| now.to_rfc3339_opts(SecondsFormat::Secs, true));

    let mut annotations = BTreeMap::new();
    let mut annotate = |key: &str, value: String| {
        annotations.insert(format!("{ANNOTATION_PREFIX}{key}"), value);
    };
    annotate("source", config.source.clone());
    annotate("generator-version", GENERATOR_VERSION.to_owned());
    if let Some(digest) = digest {
        annotate("chart-digest", digest.to_owned());
    }
    if let Some(profile) = profile {
        annotate("profile", profile.to_owned());
    }
    if config.hardening_level != SecurityLevel::None {
        annotate("hardening-level", config.hardening_level.as_str().to_owned());
    }
    if !config.excluded_subcharts.is_empty() {
        annotate("excluded-subcharts", config.excluded_subcharts.join(","));
    }
    if let Some(ts) = &timestamp {
        annotate("generated-at", ts.clone());
    }

    let mut config_source = Map::new();
    config_source.insert("uri".to_owned(), Value::String(config.source.clone()));
    let mut materials = Vec::new();
    if let Some(digest) = digest {
        config_source.insert("digest".to_owned(), Value::Object(digest_map(digest)));
        materials.push(json!({"uri": config.source, "digest": digest_map(digest)}));
    }

    let mut parameters = Map::new();
    parameters.insert(
        "hardening-level".to_owned(),
        Value::String(config.hardening_level.as_str().to_owned()),
    );
    if let Some(profile) = profile {
        parameters.insert("profile".to_owned(), Value::String(profile.to_owned()));
    }

    let mut metadata = Map::new();
    metadata.insert(
        "reproducible".to_owned(),
        Value::Bool(!config.embed_timestamp),
    );
    if let Some(ts) = timestamp {
        metadata.insert("buildStartedOn".to_owned(), Value::String(ts));
    }

    let predicate = json!({
        "buildType": BUILD_TYPE,
        "builder": {"id": format!("https://chartguard.io/builder@v{GENERATOR_VERSION}")},
        "invocation": {
            "configSource": config_source,
            "parameters": parameters,
        },
        "materials": materials,
        "metadata": metadata,
    });

    Provenance {
        annotations,
        predicate,
    }
}

/// 현재 시각으로 프로비넌스를 생성합니다.
pub fn generate(config: &ProvenanceConfig) -> Provenance {
    generate_at(config, Utc::now())
}
