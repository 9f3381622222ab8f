//! CLI command implementations.

pub(crate) mod build;
pub(crate) mod cache;

pub(crate) use build::BuildArgs;
pub(crate) use cache::CacheCommand;
