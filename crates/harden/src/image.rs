//! 이미지 참조 파싱
//!
//! `registry/repository:tag@digest` 형식의 이미지 참조를 다룹니다.
//! 태그는 마지막 `/` 이후에 나오는 마지막 `:` 뒤의 부분으로 해석하므로
//! `localhost:5000/app` 같은 포트 표기를 태그로 오인하지 않습니다.

use std::fmt;

use chartguard_core::error::RegistryError;

/// Docker Hub 레지스트리 호스트
pub const DOCKER_HUB_REGISTRY: &str = "registry-1.docker.io";

/// Docker Hub로 정규화되는 별칭 호스트
const DOCKER_HUB_ALIASES: &[&str] = &["docker.io", "index.docker.io", DOCKER_HUB_REGISTRY];

/// 태그가 없을 때 사용하는 기본 태그
pub const DEFAULT_TAG: &str = "latest";

/// 파싱된 이미지 참조
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// 레지스트리 호스트 (포트 포함 가능)
    pub registry: String,
    /// 저장소 경로 (Docker Hub 공식 이미지는 `library/` 접두어)
    pub repository: String,
    /// 태그 (없으면 `latest`)
    pub tag: String,
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

/// 이미지 참조를 `(registry, repository, tag)`로 분리합니다.
///
/// - 다이제스트(`@...`)는 먼저 제거합니다.
/// - 이름만 있으면 Docker Hub의 `library/<name>`입니다.
/// - 첫 세그먼트에 `.`이나 `:`가 있거나 `localhost`이면 레지스트리 호스트로 봅니다.
/// - 그 외의 `user/name`은 Docker Hub 저장소입니다.
pub fn parse_image_ref(image: &str) -> Result<ImageRef, RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidReference {
        image: image.to_owned(),
        reason: reason.to_owned(),
    };

    let trimmed = image.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty reference"));
    }

    let name = strip_digest(trimmed);
    let tag = explicit_tag(name).unwrap_or(DEFAULT_TAG);
    let path = strip_tag(name);
    if path.is_empty() {
        return Err(invalid("missing repository name"));
    }
    if tag.is_empty() {
        return Err(invalid("empty tag"));
    }

    let (registry, repository) = match path.split_once('/') {
        None => (DOCKER_HUB_REGISTRY.to_owned(), format!("library/{path}")),
        Some((first, rest)) if looks_like_registry_host(first) => {
            if rest.is_empty() {
                return Err(invalid("missing repository name"));
            }
            if DOCKER_HUB_ALIASES.contains(&first.to_lowercase().as_str()) {
                let repository = if rest.contains('/') {
                    rest.to_owned()
                } else {
                    format!("library/{rest}")
                };
                (DOCKER_HUB_REGISTRY.to_owned(), repository)
            } else {
                (first.to_owned(), rest.to_owned())
            }
        }
        Some(_) => (DOCKER_HUB_REGISTRY.to_owned(), path.to_owned()),
    };

    if repository.split('/').any(str::is_empty) {
        return Err(invalid("empty path segment"));
    }

    Ok(ImageRef {
        registry,
        repository,
        tag: tag.to_owned(),
    })
}

/// 첫 경로 세그먼트가 레지스트리 호스트처럼 보이는지 확인합니다.
fn looks_like_registry_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

/// `@` 이후의 다이제스트를 제거합니다.
pub fn strip_digest(image: &str) -> &str {
    image.split_once('@').map_or(image, |(name, _)| name)
}

/// 명시적 태그를 반환합니다 (다이제스트 제거 후).
///
/// 마지막 `:` 뒤에 `/`가 있으면 포트 표기이므로 태그가 아닙니다.
pub fn explicit_tag(image: &str) -> Option<&str> {
    let name = strip_digest(image);
    let (_, after) = name.rsplit_once(':')?;
    if after.contains('/') {
        None
    } else {
        Some(after)
    }
}

/// 태그를 제거한 저장소 부분을 반환합니다 (포트 인식).
///
/// 다이제스트가 없는 참조에 사용합니다.
pub fn strip_tag(image: &str) -> &str {
    match image.rsplit_once(':') {
        Some((head, tail)) if !tail.contains('/') => head,
        _ => image,
    }
}

/// 다이제스트로 고정된 참조인지 확인합니다.
pub fn is_digest_pinned(image: &str) -> bool {
    image.contains('@')
}

/// `@sha256:` 다이제스트를 포함하는지 확인합니다.
pub fn has_sha256_digest(image: &str) -> bool {
    image.contains("@sha256:")
}

/// 태그를 다이제스트로 바꾼 참조를 만듭니다 (`<repo-without-tag>@<digest>`).
pub fn pin_to_digest(image: &str, digest: &str) -> String {
    format!("{}@{}", strip_tag(image), digest)
}
