//! Resolver registry and dispatch.

use tracing::{debug, info, instrument};

use super::utils::normalize_input;
use super::{ResolutionError, ResolveContext, ResolvedManifest, Resolver};

/// A priority-ordered collection of resolvers.
///
/// Resolvers are kept sorted by priority (Specialized before Fallback);
/// within one priority, registration order is preserved.
pub struct ResolverRegistry {
    resolvers: Vec<Box<dyn Resolver>>,
}

impl ResolverRegistry {
    /// Creates an empty resolver registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            resolvers: Vec::new(),
        }
    }

    /// Registers a resolver with the registry.
    #[instrument(skip(self, resolver), fields(resolver_name = resolver.name()))]
    pub fn register(&mut self, resolver: Box<dyn Resolver>) {
        debug!(priority = ?resolver.priority(), "Registering resolver");
        self.resolvers.push(resolver);
        // Stable sort keeps registration order within a priority.
        self.resolvers.sort_by_key(|r| r.priority());
    }

    /// Returns the number of registered resolvers.
    #[must_use]
    pub fn resolver_count(&self) -> usize {
        self.resolvers.len()
    }

    /// Returns true if no resolvers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Resolver names in dispatch order.
    #[must_use]
    pub fn resolver_names(&self) -> Vec<&'static str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    /// Returns the resolver that would claim `raw_input`, without any I/O.
    #[must_use]
    pub fn find_resolver(&self, raw_input: &str) -> Option<&dyn Resolver> {
        let input = normalize_input(raw_input);
        if input.is_empty() {
            return None;
        }
        self.resolvers
            .iter()
            .find(|r| r.matches(&input))
            .map(AsRef::as_ref)
    }

    /// Resolves `raw_input` with the first matching resolver.
    ///
    /// A matched resolver's failure is returned as-is; dispatch never falls
    /// through to a lower-priority resolver.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::Unrecognized`] when nothing matches, or
    /// the chosen resolver's error.
    #[instrument(skip(self, ctx))]
    pub async fn dispatch(
        &self,
        raw_input: &str,
        ctx: &ResolveContext,
    ) -> Result<ResolvedManifest, ResolutionError> {
        let input = normalize_input(raw_input);
        let Some(resolver) = self.find_resolver(&input) else {
            return Err(ResolutionError::unrecognized(raw_input.trim()));
        };

        info!(resolver = resolver.name(), input = %input, "Resolver matched");
        resolver.resolve(&input, ctx).await
    }
}

impl std::fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("resolver_count", &self.resolvers.len())
            .field("resolvers", &self.resolver_names())
            .finish()
    }
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::resolver::{ResolverPriority, build_default_registry};
    use crate::transport::{RetryPolicy, Transport, TransportSettings};

    struct FailingResolver {
        name: &'static str,
        priority: ResolverPriority,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Resolver for FailingResolver {
        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> ResolverPriority {
            self.priority
        }

        fn matches(&self, _input: &str) -> bool {
            true
        }

        async fn resolve(
            &self,
            input: &str,
            _ctx: &ResolveContext,
        ) -> Result<ResolvedManifest, ResolutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ResolutionError::network_failure(input, "https://x", "boom"))
        }
    }

    fn ctx() -> ResolveContext {
        ResolveContext::new(
            Transport::new(&TransportSettings::default()).unwrap(),
            RetryPolicy::with_max_attempts(1),
        )
    }

    #[test]
    fn test_register_sorts_by_priority_keeping_registration_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ResolverRegistry::new();
        for (name, priority) in [
            ("fallback", ResolverPriority::Fallback),
            ("first", ResolverPriority::Specialized),
            ("second", ResolverPriority::Specialized),
        ] {
            registry.register(Box::new(FailingResolver {
                name,
                priority,
                calls: Arc::clone(&calls),
            }));
        }
        assert_eq!(registry.resolver_names(), vec!["first", "second", "fallback"]);
        assert_eq!(registry.resolver_count(), 3);
    }

    #[tokio::test]
    async fn test_dispatch_does_not_fall_through_after_failure() {
        let first_calls = Arc::new(AtomicUsize::new(0));
        let fallback_calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ResolverRegistry::new();
        registry.register(Box::new(FailingResolver {
            name: "first",
            priority: ResolverPriority::Specialized,
            calls: Arc::clone(&first_calls),
        }));
        registry.register(Box::new(FailingResolver {
            name: "fallback",
            priority: ResolverPriority::Fallback,
            calls: Arc::clone(&fallback_calls),
        }));

        let result = registry.dispatch("anything", &ctx()).await;

        assert!(matches!(result, Err(ResolutionError::NetworkFailure { .. })));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dispatch_unrecognized_input() {
        let registry = build_default_registry();
        for input in ["", "   ", "hello", "just some words"] {
            let result = registry.dispatch(input, &ctx()).await;
            assert!(
                matches!(result, Err(ResolutionError::Unrecognized { .. })),
                "input {input:?} gave {result:?}"
            );
        }
    }

    #[test]
    fn test_find_resolver_is_deterministic() {
        let registry = build_default_registry();
        let cases = [
            ("Urb. lat. 1779", "vatican"),
            ("urb lat 1779", "vatican"),
            ("https://digi.vatlib.it/view/MSS_Urb.lat.1779", "vatican"),
            ("https://gallica.bnf.fr/ark:/12148/btv1b8452439z", "gallica"),
            ("btv1b8452439z", "gallica"),
            ("080f88f5-7586-4b8a-8064-63ab3495393c", "oxford"),
            (
                "https://digital.bodleian.ox.ac.uk/objects/080f88f5-7586-4b8a-8064-63ab3495393c/",
                "oxford",
            ),
            ("https://example.org/iiif/book/manifest.json", "generic"),
        ];
        for (input, expected) in cases {
            for _ in 0..2 {
                let found = registry.find_resolver(input).map(|r| r.name());
                assert_eq!(found, Some(expected), "input {input:?}");
            }
        }
        assert!(registry.find_resolver("hello").is_none());
    }

    #[test]
    fn test_registry_debug_lists_names() {
        let debug = format!("{:?}", build_default_registry());
        assert!(debug.contains("vatican"));
        assert!(debug.contains("resolver_count: 4"));
    }
}
