//! Sandyard: workspace lifecycle and sandboxed execution for agent-driven
//! repository editing.
//!
//! A workspace is a checkout of a project repository on its own branch. It
//! moves through a guarded lifecycle (`workspace`), gets cloned and
//! bootstrapped (`setup`), has agent commands run against it inside
//! containers (`sandbox`, `tools`) under a per-turn context (`context`), and
//! has its edits committed, pushed and proposed as pull requests (`git`).

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod git;
pub mod projects;
pub mod sandbox;
pub mod setup;
pub mod tools;
pub mod workspace;

pub use config::Config;
pub use error::{Error, Result};
