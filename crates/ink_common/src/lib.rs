//! Shared building blocks for the inkframe binaries: error taxonomy,
//! retry combinator, image acquisition, and the EPD abstraction.

pub mod display;
pub mod error;
pub mod image_source;
pub mod retry;

pub use error::FrameError;
pub use retry::{retry, retry_with, RetryPolicy};
