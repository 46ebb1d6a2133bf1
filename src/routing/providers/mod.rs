//! Concrete provider backends.

pub mod openai_compat;

use std::sync::Arc;

pub use openai_compat::OpenAiCompatProvider;

use super::provider::CapabilityProvider;
use super::types::ProviderDescriptor;
use crate::error::Result;

/// Construct the backend described by `descriptor`.
///
/// Every provider kind currently speaks the OpenAI-compatible chat API; the
/// kind only changes how the router and mode gate treat it.
///
/// # Errors
/// Returns [`KestrelError::Configuration`](crate::KestrelError::Configuration)
/// when required options are missing.
pub fn build_provider(descriptor: &ProviderDescriptor) -> Result<Arc<dyn CapabilityProvider>> {
    Ok(Arc::new(OpenAiCompatProvider::from_descriptor(descriptor)?))
}
