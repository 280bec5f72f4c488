//! Error handling using `thiserror` and `anyhow`.
//!
//! Domain errors live next to the code raising them and are aggregated in
//! [`PlayerError`]. The binary propagates them with `anyhow` context and
//! reports them through [`ErrorReporter`].

pub mod domain;
pub mod operational;

pub use {
    domain::PlayerError,
    operational::{ErrorReporter, ResultExt},
};
