//! Generation backend implementations for Companion.
//!
//! All backends implement the `companion_core::Generator` trait.
//! The router builds the one selected by configuration.

pub mod hosted;
pub mod local;
pub mod prompt;
pub mod retry;
pub mod router;

pub use hosted::HostedGenerator;
pub use local::LocalGenerator;
pub use retry::RetryPolicy;
pub use router::{build_from_config, build_generator};
