//! 이미지 정책 (권고 전용)
//!
//! 컨테이너 이미지마다 세 가지 검사를 독립적으로 수행하며 리소스를 수정하지 않습니다.
//!
//! - `deny_latest_tag`: 태그가 없거나 `latest`
//! - `allowed_registries`: 허용 접두어 밖의 레지스트리
//! - `require_digests`: `@sha256:` 다이제스트 없음

use serde_json::Value;

use chartguard_core::types::{ImagePolicyConfig, Resource};

use super::{Policy, PolicyContext, Recorder};
use crate::error::HardenError;
use crate::image::{DEFAULT_TAG, explicit_tag, has_sha256_digest, is_digest_pinned};
use crate::podspec::{containers, pod_spec};

/// 이미지 정책
#[derive(Debug, Clone)]
pub struct ImagePolicy {
    deny_latest_tag: bool,
    require_digests: bool,
    /// 소문자, 끝의 `/` 제거
    allowed_prefixes: Vec<String>,
}

impl ImagePolicy {
    /// 설정으로 정책을 생성합니다.
    pub fn new(config: &ImagePolicyConfig) -> Self {
        let allowed_prefixes = config
            .allowed_registries
            .iter()
            .map(|p| p.trim().trim_end_matches('/').to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self {
            deny_latest_tag: config.deny_latest_tag,
            require_digests: config.require_digests,
            allowed_prefixes,
        }
    }

    /// 허용 레지스트리에 속하는지 확인합니다. 목록이 비어 있으면 항상 허용합니다.
    pub fn is_allowed_registry(&self, image: &str) -> bool {
        if self.allowed_prefixes.is_empty() {
            return true;
        }
        let image = image.to_lowercase();
        self.allowed_prefixes.iter().any(|prefix| {
            image == *prefix
                || image
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/') || rest.starts_with(':'))
        })
    }

    fn check(&self, id: &str, container: &str, image: &str, rec: &mut Recorder<'_>) {
        if self.deny_latest_tag {
            match explicit_tag(image) {
                Some(DEFAULT_TAG) => rec.warn(format!(
                    "{id}: container '{container}' uses image '{image}' with the mutable latest tag"
                )),
                None if !is_digest_pinned(image) => rec.warn(format!(
                    "{id}: container '{container}' uses image '{image}' without an explicit tag"
                )),
                _ => {}
            }
        }

        if !self.is_allowed_registry(image) {
            rec.warn(format!(
                "{id}: container '{container}' uses image '{image}' from a registry outside allowedRegistries"
            ));
        }

        if self.require_digests && !has_sha256_digest(image) {
            rec.warn(format!(
                "{id}: container '{container}' uses image '{image}' which is not pinned to a sha256 digest"
            ));
        }
    }

    fn scan(&self, resources: &[Resource], rec: &mut Recorder<'_>) {
        for resource in resources {
            let Some(pod) = pod_spec(resource) else {
                continue;
            };
            let id = rec.id_for(&resource.kind, &resource.name);
            for (slot, container) in containers(pod) {
                let Some(image) = container.get("image").and_then(Value::as_str) else {
                    continue;
                };
                self.check(&id, &slot.name, image, rec);
            }
        }
    }
}

impl Policy for ImagePolicy {
    fn name(&self) -> &'static str {
        "image-policy"
    }

    async fn apply(&self, ctx: &mut PolicyContext<'_>) -> Result<(), HardenError> {
        let (resources, mut rec) = ctx.split(self.name());
        self.scan(resources.as_slice(), &mut rec);
        Ok(())
    }
}
