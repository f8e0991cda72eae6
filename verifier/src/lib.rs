#![deny(
    clippy::expect_used,
    clippy::panic,
    clippy::print_stdout,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used
)]

pub mod config;
pub mod loader;
pub mod sigchain;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
