//! Resolves messy media file paths into canonical media-server names.
//!
//! Paths are analyzed locally, matched against a metadata catalog (TMDB) and,
//! when configured, a generative model; the result is a rename suggestion per
//! file. Applying suggestions is left to a [`executor::RenameExecutor`].

pub mod batch;
pub mod catalog;
pub mod config;
pub mod error;
pub mod executor;
pub mod hybrid;
pub mod llm;
pub mod matching;
pub mod model;
pub mod parser;
pub mod pathgen;
pub mod pipeline;
pub mod ratelimit;
pub mod resolver;
pub mod scanner;
pub mod tmdb;

pub use config::Config;
pub use error::{ResolveError, Result};
pub use hybrid::HybridStrategy;
pub use model::{BatchResolution, HybridResolution, MediaInfo, MediaType, Suggestion};
pub use resolver::Resolver;
