//! Frame controller library.
//!
//! The binary is a thin CLI wrapper; everything it does goes through
//! these modules so the integration tests can drive the same code paths.

pub mod alarm;
pub mod config;
pub mod net;
pub mod orchestrator;
pub mod power;
pub mod telemetry;
pub mod transport;
pub mod update_loop;
