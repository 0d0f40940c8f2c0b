//! Hierarchical template rendering.
//!
//! Configuration trees under the config directory (`system/`, `kernel/`,
//! `repos-sync/`) are materialized into sandboxes with [`render_tree`]:
//! `*.tmpl` files are rendered against a [`Context`], other files copied
//! verbatim, and a `.clean` entry resets the destination directory first.

pub mod context;
mod engine;
mod parser;
mod tree;

pub use context::Context;
pub use engine::{render_file, write_file, Template};
pub use tree::{render_tree, CLEAN_SENTINEL, TEMPLATE_SUFFIX};
