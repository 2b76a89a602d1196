//! Testing utilities and mock implementations
//!
//! Provides a mock session engine so the controller's state machine can be
//! exercised without a broker or a network.

pub mod mocks;

pub use mocks::*;
