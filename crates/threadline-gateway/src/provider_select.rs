//! Resolves the configured `ProviderKind` (spec §6 environment-variable
//! rules) to a concrete `Provider`. The wire format for each backend is out
//! of scope for this core (spec §1/§9); this module only owns the selection
//! policy, falling back to `MockProvider` for every kind until a real
//! streaming transport is plugged in for that backend.

use std::sync::Arc;

use threadline_core::config::ProviderKind;
use threadline_turn::{MockProvider, Provider};
use tracing::warn;

/// Build the provider this process will drive turns with, per `kind`.
///
/// Only `ProviderKind::Mock` is fully real today; the other variants are
/// recognised (so config/env selection round-trips and logs the right
/// name) but not yet backed by a live transport, so they also resolve to
/// `MockProvider` with a warning. Swap the relevant arm in for a real
/// implementation without touching any caller.
pub fn build_provider(kind: ProviderKind) -> Arc<dyn Provider> {
    match kind {
        ProviderKind::Mock => Arc::new(MockProvider {
            reply: "mock response".to_string(),
        }),
        ProviderKind::GeminiDirect | ProviderKind::VertexAi | ProviderKind::CloudShell | ProviderKind::UserOAuth => {
            warn!(?kind, "no live transport wired for this provider kind yet, using MockProvider");
            Arc::new(MockProvider {
                reply: String::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_kind_builds_a_provider() {
        let provider = build_provider(ProviderKind::Mock);
        assert_eq!(provider.name(), "mock");
    }
}
