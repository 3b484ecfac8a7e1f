//! Shared request/result shapes, the provider error taxonomy and the
//! prompt-to-provider selection policy. Nothing in this crate performs I/O.

pub mod error;
pub mod providers;
pub mod types;
pub mod usecases;

pub use error::ProviderError;
pub use types::{EditInput, GenerateInput, GeneratedImage, ProviderResult};
