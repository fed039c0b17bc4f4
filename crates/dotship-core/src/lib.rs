//! dotship-core: build, publish and release stages
//!
//! Turns a .NET desktop project into a draft release:
//!
//! 1. **Build** compiles the project in a fresh container from a pinned
//!    toolchain image, never seeing stale `bin/`/`obj/` output.
//! 2. **Publish** produces a self-contained distributable plus ClickOnce
//!    manifests, versioned from the release tag.
//! 3. **Release** bundles the artifacts and creates one draft release
//!    bound to the tag.
//!
//! [`ReleasePipeline`] runs the stages in order and stops at the first
//! failure.
//!
//! ## Layer 2 - Pipeline
//!
//! ## Key Components
//!
//! - `BuildStage` / `BuildEnvironment`: compile and hand over the live container
//! - `PublishStage` / `ManifestChain`: publish strategies and the mage steps
//! - `ReleaseStage`: archive, describe, submit
//! - `ReleasePipeline`: orchestration and `PipelineReport`
//! - `PipelineConfig`: serde config with `DOTSHIP_*` overrides

pub mod archive;
pub mod build;
pub mod config;
pub mod error;
pub mod obs;
pub mod pipeline;
pub mod publish;
pub mod release;
pub mod stage;
pub mod telemetry;
pub mod version;

pub use build::{BuildEnvironment, BuildReport, BuildStage};
pub use config::{
    ManifestSettings, PipelineConfig, PublishConfig, PublishStrategy, ReleaseConfig,
};
pub use error::{PipelineError, Result};
pub use pipeline::{PipelineReport, ReleasePipeline};
pub use publish::{ArtifactSet, ManifestChain, ManifestPaths, PublishStage};
pub use release::ReleaseStage;
pub use stage::{StageKind, StageResult};
pub use version::Version;
