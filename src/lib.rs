//! stagebuild library.
//!
//! Builds Gentoo stage3/stage4 tarballs and binary kernel packages for
//! several architectures from one declarative configuration. The binary in
//! `main.rs` is a thin CLI over [`builder::Builder`]; everything is exported
//! here so the integration tests can drive it against a recording host.

pub mod builder;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod gcc_compare;
pub mod host;
pub mod notify;
pub mod phase;
pub mod preflight;
pub mod process;
pub mod repository;
pub mod sandbox;
pub mod sync;
pub mod template;
pub mod timing;

pub use builder::Builder;
pub use error::BuildError;
