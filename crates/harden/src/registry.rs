//! 레지스트리 다이제스트 조회
//!
//! [`RegistryClient`] trait은 이미지 참조를 콘텐츠 다이제스트로 변환하는 기능을
//! 추상화합니다. 운영 환경에서는 [`HttpRegistryClient`]를, 테스트에서는
//! `MockRegistryClient`를 사용합니다.
//!
//! # 프로토콜
//!
//! ```text
//! (Docker Hub만)  GET  <auth-endpoint>?service=registry.docker.io&scope=repository:<repo>:pull
//!                 HEAD https://<registry>/v2/<repo>/manifests/<tag>
//!                      Accept: OCI/Docker manifest + manifest list
//!                 <- Docker-Content-Digest: sha256:...
//! ```
//!
//! 취소는 반환된 future를 drop하는 것으로 표현합니다.

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::{debug, warn};

use chartguard_core::config::RegistrySection;
use chartguard_core::error::{ConfigError, RegistryError};
use chartguard_core::metrics as m;

use crate::image::{DOCKER_HUB_REGISTRY, ImageRef, parse_image_ref};

/// manifest 조회 시 수락하는 미디어 타입
pub const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.index.v1+json, \
application/vnd.oci.image.manifest.v1+json, \
application/vnd.docker.distribution.manifest.list.v2+json, \
application/vnd.docker.distribution.manifest.v2+json";

/// 다이제스트 응답 헤더
pub const DIGEST_HEADER: &str = "Docker-Content-Digest";

/// Docker Hub 토큰 서비스 이름
const DOCKER_HUB_SERVICE: &str = "registry.docker.io";

/// 이미지 참조를 다이제스트로 변환하는 기능
///
/// `Send + Sync + 'static`이므로 여러 tokio 태스크에서 공유할 수 있습니다.
pub trait RegistryClient: Send + Sync + 'static {
    /// 이미지 참조의 콘텐츠 다이제스트(`sha256:...`)를 조회합니다.
    ///
    /// # Errors
    ///
    /// - `RegistryError::InvalidReference`: 참조 파싱 실패
    /// - `RegistryError::Status`: 200이 아닌 응답
    /// - `RegistryError::MissingDigest`: 다이제스트 헤더 없음
    /// - `RegistryError::Transport`: 연결/타임아웃 실패
    fn resolve_digest(
        &self,
        image: &str,
    ) -> impl Future<Output = Result<String, RegistryError>> + Send;
}

/// HTTP 레지스트리 클라이언트 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryClientConfig {
    /// 요청 시도당 타임아웃 (초)
    pub timeout_secs: u64,
    /// 일시적 실패 시 재시도 횟수
    pub max_retries: u32,
    /// 선형 백오프 기본 간격 (밀리초)
    pub retry_backoff_base_ms: u64,
    /// 동시 다이제스트 조회 최대 수
    pub max_concurrent_resolutions: usize,
    /// Docker Hub 토큰 엔드포인트
    pub auth_endpoint: String,
    /// 평문 HTTP로 접근할 레지스트리 호스트
    pub insecure_registries: Vec<String>,
}

impl Default for RegistryClientConfig {
    fn default() -> Self {
        Self::from(&RegistrySection::default())
    }
}

impl From<&RegistrySection> for RegistryClientConfig {
    fn from(section: &RegistrySection) -> Self {
        Self {
            timeout_secs: section.timeout_secs,
            max_retries: section.max_retries,
            retry_backoff_base_ms: section.retry_backoff_base_ms,
            max_concurrent_resolutions: section.max_concurrent_resolutions,
            auth_endpoint: section.auth_endpoint.clone(),
            insecure_registries: section.insecure_registries.clone(),
        }
    }
}

impl RegistryClientConfig {
    fn is_insecure(&self, registry: &str) -> bool {
        self.insecure_registries
            .iter()
            .any(|r| r.eq_ignore_ascii_case(registry))
    }
}

/// 토큰 엔드포인트 응답
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// reqwest 기반 레지스트리 클라이언트
///
/// 전송 실패와 5xx/429 응답은 `retry_backoff_base_ms * attempt` 간격으로
/// 최대 `max_retries`번 재시도합니다. 그 외 상태 코드는 즉시 실패합니다.
pub struct HttpRegistryClient {
    client: reqwest::Client,
    config: RegistryClientConfig,
    /// 토큰 발급이 필요한 레지스트리 호스트
    token_registry: String,
}

impl HttpRegistryClient {
    /// 설정으로 클라이언트를 생성합니다.
    ///
    /// # Errors
    ///
    /// HTTP 클라이언트를 초기화할 수 없으면 `ConfigError::InvalidValue`를 반환합니다.
    pub fn new(config: RegistryClientConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "harden.registry".to_owned(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            config,
            token_registry: DOCKER_HUB_REGISTRY.to_owned(),
        })
    }

    /// 익명 pull 토큰을 받아야 하는 레지스트리 호스트를 지정합니다.
    ///
    /// 기본값은 Docker Hub(`registry-1.docker.io`)입니다.
    pub fn with_token_registry(mut self, registry: impl Into<String>) -> Self {
        self.token_registry = registry.into();
        self
    }

    /// 클라이언트 설정을 반환합니다.
    pub fn config(&self) -> &RegistryClientConfig {
        &self.config
    }

    /// manifest 조회 URL을 만듭니다.
    pub fn manifest_url(&self, image: &ImageRef) -> String {
        let scheme = if self.config.is_insecure(&image.registry) {
            "http"
        } else {
            "https"
        };
        format!(
            "{scheme}://{}/v2/{}/manifests/{}",
            image.registry, image.repository, image.tag
        )
    }

    /// Docker Hub 익명 pull 토큰을 발급받습니다.
    pub(crate) async fn fetch_token(&self, repository: &str) -> Result<String, RegistryError> {
        let url = format!(
            "{}?service={DOCKER_HUB_SERVICE}&scope=repository:{repository}:pull",
            self.config.auth_endpoint
        );

        let response =
            self.client
                .get(&url)
                .send()
                .await
                .map_err(|e| RegistryError::Transport {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body: TokenResponse = response.json().await.map_err(|e| RegistryError::Auth {
            repository: repository.to_owned(),
            reason: format!("invalid token response: {e}"),
        })?;

        body.token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RegistryError::Auth {
                repository: repository.to_owned(),
                reason: "token response has no token".to_owned(),
            })
    }

    /// 재시도 없이 한 번 조회합니다.
    async fn lookup_once(&self, image: &str, parsed: &ImageRef) -> Result<String, RegistryError> {
        let token = if parsed.registry.eq_ignore_ascii_case(&self.token_registry) {
            Some(self.fetch_token(&parsed.repository).await?)
        } else {
            None
        };

        let url = self.manifest_url(parsed);
        let mut request = self.client.head(&url).header(ACCEPT, MANIFEST_ACCEPT);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| RegistryError::Transport {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        if response.status() != StatusCode::OK {
            return Err(RegistryError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        response
            .headers()
            .get(DIGEST_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| RegistryError::MissingDigest {
                image: image.to_owned(),
            })
    }

    /// 재시도 로직을 포함한 조회
    async fn lookup_with_retry(&self, image: &str) -> Result<String, RegistryError> {
        let parsed = parse_image_ref(image)?;
        let attempt_timeout = Duration::from_secs(self.config.timeout_secs);
        let backoff_base = Duration::from_millis(self.config.retry_backoff_base_ms);
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = backoff_base * attempt;
                warn!(
                    image = image,
                    attempt = attempt,
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    "retrying digest lookup"
                );
                counter!(m::REGISTRY_RETRIES_TOTAL).increment(1);
                tokio::time::sleep(backoff).await;
            }

            match tokio::time::timeout(attempt_timeout, self.lookup_once(image, &parsed)).await {
                Ok(Ok(digest)) => return Ok(digest),
                Ok(Err(e)) if e.is_transient() => {
                    debug!(image = image, error = %e, "transient registry error");
                    last_error = Some(e);
                }
                Ok(Err(e)) => return Err(e),
                Err(_elapsed) => {
                    last_error = Some(RegistryError::Transport {
                        url: self.manifest_url(&parsed),
                        reason: "request timed out".to_owned(),
                    });
                }
            }
        }

        Err(last_error.unwrap_or_else(|| RegistryError::Transport {
            url: self.manifest_url(&parsed),
            reason: "unknown error".to_owned(),
        }))
    }
}

impl RegistryClient for HttpRegistryClient {
    async fn resolve_digest(&self, image: &str) -> Result<String, RegistryError> {
        debug!(image = image, "resolving image digest");
        let result = self.lookup_with_retry(image).await;
        let label = if result.is_ok() { "success" } else { "failure" };
        counter!(m::REGISTRY_REQUESTS_TOTAL, m::LABEL_RESULT => label).increment(1);
        match &result {
            Ok(digest) => debug!(image = image, digest = %digest, "image digest resolved"),
            Err(e) => warn!(image = image, error = %e, "image digest lookup failed"),
        }
        result
    }
}

/// 테스트용 Mock 레지스트리 클라이언트
#[cfg(test)]
#[derive(Default)]
pub struct MockRegistryClient {
    /// 이미지 참조 -> 다이제스트
    pub digests: std::collections::HashMap<String, String>,
    /// 조회 요청 기록
    pub calls: std::sync::Mutex<Vec<String>>,
    /// 조회 지연 (취소 테스트용)
    pub delay: Option<Duration>,
}

#[cfg(test)]
impl MockRegistryClient {
    /// 빈 mock 클라이언트를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 이미지 다이제스트를 등록합니다.
    pub fn with_digest(mut self, image: &str, digest: &str) -> Self {
        self.digests.insert(image.to_owned(), digest.to_owned());
        self
    }

    /// 조회마다 지연을 추가합니다.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 지금까지의 조회 요청을 반환합니다.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
impl RegistryClient for MockRegistryClient {
    async fn resolve_digest(&self, image: &str) -> Result<String, RegistryError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(image.to_owned());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.digests
            .get(image)
            .cloned()
            .ok_or_else(|| RegistryError::Status {
                url: format!("mock://{image}"),
                status: 404,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// 응답을 순서대로 돌려주는 최소 HTTP/1.1 서버 (마지막 응답 반복)
    async fn serve(responses: Vec<&'static str>) -> (SocketAddr, Arc<Mutex<Vec<String>>>, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);

        let handle = tokio::spawn(async move {
            let mut served = 0usize;
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                recorded
                    .lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&buf).to_lowercase());

                let response = responses[served.min(responses.len() - 1)];
                served += 1;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (addr, requests, handle)
    }

    fn client_for(addr: SocketAddr) -> HttpRegistryClient {
        HttpRegistryClient::new(RegistryClientConfig {
            timeout_secs: 5,
            max_retries: 2,
            retry_backoff_base_ms: 1,
            max_concurrent_resolutions: 4,
            auth_endpoint: format!("http://{addr}/token"),
            insecure_registries: vec![addr.to_string()],
        })
        .unwrap()
    }

    const DIGEST_OK: &str = "HTTP/1.1 200 OK\r\nDocker-Content-Digest: sha256:abc\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const NO_DIGEST: &str = "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const NOT_FOUND: &str = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const UNAVAILABLE: &str = "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

    #[test]
    fn config_from_section() {
        let section = RegistrySection::default();
        let config = RegistryClientConfig::from(&section);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.max_concurrent_resolutions, 4);
        assert_eq!(config.auth_endpoint, "https://auth.docker.io/token");
    }

    #[test]
    fn manifest_url_uses_https_by_default() {
        let client = HttpRegistryClient::new(RegistryClientConfig::default()).unwrap();
        let parsed = parse_image_ref("nginx:1.25").unwrap();
        assert_eq!(
            client.manifest_url(&parsed),
            "https://registry-1.docker.io/v2/library/nginx/manifests/1.25"
        );
    }

    #[test]
    fn manifest_url_uses_http_for_insecure_registry() {
        let client = HttpRegistryClient::new(RegistryClientConfig {
            insecure_registries: vec!["localhost:5000".to_owned()],
            ..RegistryClientConfig::default()
        })
        .unwrap();
        let parsed = parse_image_ref("localhost:5000/team/app:2").unwrap();
        assert_eq!(
            client.manifest_url(&parsed),
            "http://localhost:5000/v2/team/app/manifests/2"
        );
    }

    #[tokio::test]
    async fn resolves_digest_from_header() {
        let (addr, requests, handle) = serve(vec![DIGEST_OK]).await;
        let client = client_for(addr);

        let digest = client
            .resolve_digest(&format!("{addr}/team/app:1.0"))
            .await
            .unwrap();
        assert_eq!(digest, "sha256:abc");

        let requests = requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("head /v2/team/app/manifests/1.0 http/1.1"));
        assert!(requests[0].contains("application/vnd.oci.image.index.v1+json"));
        assert!(requests[0].contains("application/vnd.docker.distribution.manifest.v2+json"));
        assert!(!requests[0].contains("authorization"));
        handle.abort();
    }

    #[tokio::test]
    async fn not_found_fails_without_retry() {
        let (addr, requests, handle) = serve(vec![NOT_FOUND]).await;
        let client = client_for(addr);

        let err = client
            .resolve_digest(&format!("{addr}/team/app:1.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Status { status: 404, .. }));
        assert_eq!(requests.lock().unwrap().len(), 1);
        handle.abort();
    }

    #[tokio::test]
    async fn server_error_is_retried() {
        let (addr, requests, handle) = serve(vec![UNAVAILABLE, DIGEST_OK]).await;
        let client = client_for(addr);

        let digest = client
            .resolve_digest(&format!("{addr}/team/app:1.0"))
            .await
            .unwrap();
        assert_eq!(digest, "sha256:abc");
        assert_eq!(requests.lock().unwrap().len(), 2);
        handle.abort();
    }

    #[tokio::test]
    async fn persistent_server_error_exhausts_retries() {
        let (addr, requests, handle) = serve(vec![UNAVAILABLE]).await;
        let client = client_for(addr);

        let err = client
            .resolve_digest(&format!("{addr}/team/app:1.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Status { status: 503, .. }));
        // 최초 1회 + 재시도 2회
        assert_eq!(requests.lock().unwrap().len(), 3);
        handle.abort();
    }

    #[tokio::test]
    async fn missing_digest_header_is_error() {
        let (addr, _requests, handle) = serve(vec![NO_DIGEST]).await;
        let client = client_for(addr);

        let err = client
            .resolve_digest(&format!("{addr}/team/app:1.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::MissingDigest { .. }));
        handle.abort();
    }

    #[tokio::test]
    async fn invalid_reference_is_rejected_before_network() {
        let client = HttpRegistryClient::new(RegistryClientConfig::default()).unwrap();
        let err = client.resolve_digest("").await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidReference { .. }));
    }

    #[tokio::test]
    async fn fetches_docker_hub_token() {
        const TOKEN: &str = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 22\r\nConnection: close\r\n\r\n{\"token\":\"secret-tok\"}";
        let (addr, requests, handle) = serve(vec![TOKEN]).await;
        let client = client_for(addr);

        let token = client.fetch_token("library/nginx").await.unwrap();
        assert_eq!(token, "secret-tok");

        let requests = requests.lock().unwrap().clone();
        assert!(requests[0].starts_with(
            "get /token?service=registry.docker.io&scope=repository:library/nginx:pull"
        ));
        handle.abort();
    }

    #[tokio::test]
    async fn token_registry_sends_bearer_on_manifest_head() {
        const TOKEN: &str = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 22\r\nConnection: close\r\n\r\n{\"token\":\"secret-tok\"}";
        let (addr, requests, handle) = serve(vec![TOKEN, DIGEST_OK]).await;
        let client = client_for(addr).with_token_registry(addr.to_string());

        let digest = client
            .resolve_digest(&format!("{addr}/library/nginx:1.25"))
            .await
            .unwrap();
        assert_eq!(digest, "sha256:abc");

        let requests = requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].starts_with(
            "get /token?service=registry.docker.io&scope=repository:library/nginx:pull"
        ));
        assert!(requests[1].starts_with("head /v2/library/nginx/manifests/1.25 http/1.1"));
        assert!(requests[1].contains("authorization: bearer secret-tok"));
        handle.abort();
    }

    #[tokio::test]
    async fn token_failure_aborts_manifest_lookup() {
        let (addr, requests, handle) = serve(vec![NOT_FOUND]).await;
        let client = client_for(addr).with_token_registry(addr.to_string());

        let err = client
            .resolve_digest(&format!("{addr}/library/nginx:1.25"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Status { status: 404, ref url } if url.contains("/token")));
        // HEAD 요청은 보내지 않음
        let requests = requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("get /token"));
        handle.abort();
    }

    #[tokio::test]
    async fn token_response_without_token_is_auth_error() {
        const EMPTY: &str = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}";
        let (addr, _requests, handle) = serve(vec![EMPTY]).await;
        let client = client_for(addr);

        let err = client.fetch_token("library/nginx").await.unwrap_err();
        assert!(matches!(err, RegistryError::Auth { .. }));
        handle.abort();
    }

    #[tokio::test]
    async fn mock_records_calls() {
        let mock = MockRegistryClient::new().with_digest("nginx:1.25", "sha256:abc");
        assert_eq!(mock.resolve_digest("nginx:1.25").await.unwrap(), "sha256:abc");
        assert!(mock.resolve_digest("redis:7").await.is_err());
        assert_eq!(mock.calls(), vec!["nginx:1.25", "redis:7"]);
    }
}
