//! Resolver set and dispatcher: raw user input to a canonical manifest.
//!
//! # Architecture
//!
//! - [`Resolver`] - async trait each library signature implements
//! - [`ResolverRegistry`] - priority-ordered list; first match wins, no fallthrough
//! - [`VaticanResolver`] - BAV shelfmarks and `digi.vatlib.it` URLs
//! - [`GallicaResolver`] - BnF ARK identifiers and `gallica.bnf.fr` URLs
//! - [`OxfordResolver`] - Bodleian UUIDs and `digital.bodleian.ox.ac.uk` URLs
//! - [`GenericResolver`] - any http(s) URL, treated as a direct manifest URL
//!
//! Matching is pure and cheap; only [`Resolver::resolve`] touches the network,
//! through the shared [`Transport`] carried by [`ResolveContext`].
//!
//! # Example
//!
//! ```no_run
//! use acquire_core::resolver::{ResolveContext, build_default_registry};
//! use acquire_core::transport::{RetryPolicy, Transport, TransportSettings};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = build_default_registry();
//! let ctx = ResolveContext::new(Transport::new(&TransportSettings::default())?, RetryPolicy::default());
//! let resolved = registry.dispatch("Urb. lat. 1779", &ctx).await?;
//! println!("{} pages", resolved.manifest.pages().len());
//! # Ok(())
//! # }
//! ```

mod error;
mod fetch;
mod generic;
mod gallica;
mod oxford;
mod registry;
mod utils;
mod vatican;

pub use error::ResolutionError;
pub use generic::GenericResolver;
pub use gallica::GallicaResolver;
pub use oxford::OxfordResolver;
pub use registry::ResolverRegistry;
pub use utils::{derive_identifier, normalize_input};
pub use vatican::VaticanResolver;

use async_trait::async_trait;

use crate::manifest::{CanonicalManifestReference, Manifest};
use crate::transport::{RetryPolicy, Transport};

/// Builds the registry used by the engine.
///
/// Order is deterministic: site-specific resolvers first, generic URL last.
#[must_use]
pub fn build_default_registry() -> ResolverRegistry {
    let mut registry = ResolverRegistry::new();
    registry.register(Box::new(VaticanResolver::new()));
    registry.register(Box::new(GallicaResolver::new()));
    registry.register(Box::new(OxfordResolver::new()));
    registry.register(Box::new(GenericResolver::new()));
    registry
}

/// Priority level for resolver ordering.
///
/// Derives `Ord` so that `Specialized < Fallback` when sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResolverPriority {
    /// Library-specific signatures.
    Specialized = 0,
    /// Catch-all URL handling.
    Fallback = 1,
}

/// Where a matched input points, before any network access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestLocation {
    /// Canonical manifest URL.
    pub manifest_url: String,
    /// Normalized library identifier.
    pub document_id: String,
}

/// A resolved reference together with the manifest it was built from.
///
/// The parsed manifest travels with the reference so the controller never
/// fetches it a second time.
#[derive(Debug, Clone)]
pub struct ResolvedManifest {
    /// Immutable canonical reference.
    pub reference: CanonicalManifestReference,
    /// Parsed manifest.
    pub manifest: Manifest,
}

/// Network dependencies handed to resolvers.
#[derive(Debug, Clone)]
pub struct ResolveContext {
    /// Shared transport.
    pub transport: Transport,
    /// Policy applied to manifest fetches.
    pub retry_policy: RetryPolicy,
}

impl ResolveContext {
    /// Creates a context from an existing transport.
    #[must_use]
    pub fn new(transport: Transport, retry_policy: RetryPolicy) -> Self {
        Self {
            transport,
            retry_policy,
        }
    }
}

/// One library signature.
///
/// # Object Safety
///
/// Uses `async_trait` so the registry can hold `Box<dyn Resolver>`.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Stable source id reported in references (`"vatican"`, ...).
    fn name(&self) -> &'static str;

    /// Ordering class within the registry.
    fn priority(&self) -> ResolverPriority;

    /// True if this resolver claims `input`. Must not perform I/O.
    fn matches(&self, input: &str) -> bool;

    /// Resolves a claimed input into a reference and its parsed manifest.
    async fn resolve(
        &self,
        input: &str,
        ctx: &ResolveContext,
    ) -> Result<ResolvedManifest, ResolutionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolver_priority_ordering() {
        assert!(ResolverPriority::Specialized < ResolverPriority::Fallback);
    }

    #[test]
    fn test_default_registry_order() {
        let registry = build_default_registry();
        assert_eq!(
            registry.resolver_names(),
            vec!["vatican", "gallica", "oxford", "generic"]
        );
    }
}
