//! puresignd — signature verification HTTP service.
//!
//! Wires the detect → clean → verify pipeline to an object store and a
//! record store behind a small REST API.

pub mod api;
pub mod config;
pub mod engine;
pub mod pipeline;
pub mod records;
pub mod shutdown;
pub mod storage;
pub mod supabase;

pub use api::{router, AppState};
pub use config::{Backend, Config};
pub use engine::{spawn_engine, EngineHandle, Models};
pub use pipeline::InferencePipeline;
