//! Language model backends for PagePilot.
//!
//! Every backend implements `pagepilot_core::Provider`. The router resolves
//! the configured `ProviderKind` once at startup; nothing downstream looks
//! at which backend it got.

pub mod openai_compat;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use router::{base_url_for, build_provider};
