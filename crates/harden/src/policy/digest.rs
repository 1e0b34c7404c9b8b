//! 다이제스트 고정 정책
//!
//! 다이제스트로 고정되지 않은 모든 컨테이너 이미지를 레지스트리에서 조회해
//! `<repo-without-tag>@<digest>`로 바꿉니다.
//!
//! 같은 이미지는 한 번만 조회하고, 서로 다른 이미지는 세마포어로 제한된
//! `JoinSet`에서 동시에 조회합니다. 변경 기록은 조회가 끝난 뒤
//! 리소스, 컨테이너 순서로 남깁니다. 조회 실패나 취소는 실행 전체를 중단합니다.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use chartguard_core::error::RegistryError;
use chartguard_core::types::{Change, Resource};

use super::{Policy, PolicyContext};
use crate::error::HardenError;
use crate::image::{is_digest_pinned, pin_to_digest};
use crate::podspec::{ContainerSlot, containers, pod_spec, pod_spec_field_path, pod_spec_mut};
use crate::registry::RegistryClient;

/// 다이제스트 조회 대상 컨테이너
#[derive(Debug)]
struct Target {
    resource_index: usize,
    resource_id: String,
    field_path: String,
    slot: ContainerSlot,
    image: String,
}

/// 다이제스트 고정 정책
pub struct DigestResolverPolicy<R> {
    client: Arc<R>,
    max_concurrent: usize,
}

impl<R: RegistryClient> DigestResolverPolicy<R> {
    /// 레지스트리 클라이언트와 동시 조회 한도로 정책을 생성합니다.
    pub fn new(client: Arc<R>, max_concurrent: usize) -> Self {
        Self {
            client,
            max_concurrent: max_concurrent.max(1),
        }
    }

    fn collect_targets(resources: &[Resource], ids: impl Fn(&Resource) -> String) -> Vec<Target> {
        let mut targets = Vec::new();
        for (resource_index, resource) in resources.iter().enumerate() {
            let (Some(base), Some(pod)) = (pod_spec_field_path(&resource.kind), pod_spec(resource))
            else {
                continue;
            };
            for (slot, container) in containers(pod) {
                let Some(image) = container.get("image").and_then(Value::as_str) else {
                    continue;
                };
                if image.trim().is_empty() || is_digest_pinned(image) {
                    continue;
                }
                targets.push(Target {
                    resource_index,
                    resource_id: ids(resource),
                    field_path: format!("{base}.{}.image", slot.field_path()),
                    slot,
                    image: image.to_owned(),
                });
            }
        }
        targets
    }

    /// 서로 다른 이미지를 동시에 조회합니다.
    ///
    /// 첫 실패 또는 취소 시 나머지 조회는 `JoinSet` drop으로 중단됩니다.
    async fn resolve_all(
        &self,
        targets: &[Target],
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, String>, HardenError> {
        let mut first_reference: HashMap<&str, &str> = HashMap::new();
        for target in targets {
            first_reference
                .entry(target.image.as_str())
                .or_insert(target.resource_id.as_str());
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut lookups = JoinSet::new();
        for image in first_reference.keys() {
            let client = Arc::clone(&self.client);
            let semaphore = Arc::clone(&semaphore);
            let image = (*image).to_owned();
            lookups.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = client.resolve_digest(&image).await;
                (image, result)
            });
        }

        let mut resolved = HashMap::with_capacity(first_reference.len());
        loop {
            let joined = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(HardenError::Cancelled),
                joined = lookups.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };

            match joined {
                Ok((image, Ok(digest))) => {
                    debug!(image = %image, digest = %digest, "digest resolved");
                    resolved.insert(image, digest);
                }
                Ok((image, Err(source))) => {
                    let resource = first_reference
                        .get(image.as_str())
                        .map_or_else(String::new, |id| (*id).to_owned());
                    return Err(HardenError::DigestResolution {
                        resource,
                        image,
                        source,
                    });
                }
                Err(e) => return Err(HardenError::TaskFailed(e.to_string())),
            }
        }
        Ok(resolved)
    }
}

impl<R: RegistryClient> Policy for DigestResolverPolicy<R> {
    fn name(&self) -> &'static str {
        "digest-resolver"
    }

    async fn apply(&self, ctx: &mut PolicyContext<'_>) -> Result<(), HardenError> {
        let cancel = ctx.cancel;
        let (resources, mut rec) = ctx.split(self.name());

        let targets = Self::collect_targets(resources.as_slice(), |r| rec.id_for(&r.kind, &r.name));
        if targets.is_empty() {
            return Ok(());
        }

        let digests = self.resolve_all(&targets, cancel).await?;

        for target in targets {
            let Some(digest) = digests.get(&target.image) else {
                return Err(HardenError::DigestResolution {
                    resource: target.resource_id,
                    image: target.image.clone(),
                    source: RegistryError::MissingDigest {
                        image: target.image,
                    },
                });
            };
            let pinned = pin_to_digest(&target.image, digest);

            let container = resources
                .get_mut(target.resource_index)
                .and_then(pod_spec_mut)
                .and_then(|pod| pod.get_mut(target.slot.list.field()))
                .and_then(Value::as_array_mut)
                .and_then(|items| items.get_mut(target.slot.index))
                .and_then(Value::as_object_mut);
            let Some(container) = container else {
                continue;
            };
            container.insert("image".to_owned(), Value::String(pinned.clone()));

            rec.record(Change {
                resource_id: target.resource_id,
                field_path: target.field_path,
                old_value: Some(Value::String(target.image)),
                new_value: Value::String(pinned),
                reason: "pinned image to registry digest".to_owned(),
            });
        }
        Ok(())
    }
}
