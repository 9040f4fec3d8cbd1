//! Clone orchestration engine.
//!
//! [`orchestrator::run`] is the single public entry point: given a
//! [`cloneforge_types::CloneConfig`], it drives mirroring, optional dynamic
//! prerendering, JavaScript stripping, container scaffolding (and
//! optionally building/running it), integrity checksums + verification,
//! incremental diffing, and the plugin lifecycle, emitting a structured
//! event stream throughout and returning a [`cloneforge_types::CloneResult`]
//! with a stable exit code.
//!
//! Everything else in this crate is a module the orchestrator composes;
//! each is independently testable and documented where it lives.

pub mod build;
pub mod integrity;
pub mod mirror;
pub mod orchestrator;
pub mod plugin;
pub mod postproc;
pub mod regex_warn;
pub mod renderer;
pub mod repro;

pub use orchestrator::run;
