#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`error`]: 도메인 에러 타입 (`HardenError`)
//! - [`config`]: 파이프라인 설정 (`HardenConfig`, 빌더)
//! - [`image`]: 이미지 참조 파싱 (`parse_image_ref`, `pin_to_digest`)
//! - [`podspec`]: 워크로드 pod spec 접근자
//! - [`merge`]: 필드가 없을 때만 설정하는 병합 규칙
//! - [`registry`]: 레지스트리 추상화 (`RegistryClient` trait, `HttpRegistryClient`)
//! - [`policy`]: 하드닝 정책 (`Policy` trait과 6개 구현)
//! - [`pipeline`]: 오케스트레이터 (`Hardener`, `HardenerBuilder`)
//! - [`provenance`]: 빌드 프로비넌스 주석
//!
//! # Architecture
//!
//! ```text
//! HardenConfig --> HardenerBuilder --> Hardener
//!                                         |
//!            Vec<Resource> --harden()--> PSS -> Resources -> Images
//!                                         -> Digests (RegistryClient)
//!                                         -> NetworkPolicy -> RBAC
//!                                         |
//!                                    HardenReport { changes, warnings }
//! ```

pub mod config;
pub mod error;
pub mod image;
pub mod merge;
pub mod pipeline;
pub mod podspec;
pub mod policy;
pub mod provenance;
pub mod registry;

// --- Public API Re-exports ---

// Pipeline (main orchestrator)
pub use pipeline::{Hardener, HardenerBuilder, PolicyStage};

// Configuration
pub use config::{HardenConfig, HardenConfigBuilder};

// Error
pub use error::HardenError;

// Registry
pub use registry::{HttpRegistryClient, RegistryClient, RegistryClientConfig};

// Image references
pub use image::{ImageRef, parse_image_ref, pin_to_digest};

// Policies
pub use policy::{
    DigestResolverPolicy, ImagePolicy, NetworkPolicyGenerator, PodSecurityStandardsPolicy, Policy,
    PolicyContext, RbacGenerator, Recorder, ResourceRequirementsPolicy,
};

// Provenance
pub use provenance::{Provenance, ProvenanceConfig};
