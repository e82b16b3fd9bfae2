//! CLI commands

mod build;
mod cache;
mod check;

pub use build::BuildCommand;
pub use cache::CacheCommand;
pub use check::CheckCommand;
