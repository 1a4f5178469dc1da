//! The `Provider` trait -- the adapter interface agent runtimes implement.
//!
//! The trait is intentionally object-safe so adapters can be stored as
//! `Box<dyn Provider>` in the [`super::registry::ProviderRegistry`].

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::types::{PhaseRunError, ProviderEvent, ProviderOptions};

/// Adapter interface for running one node's phase against an agent
/// runtime. A call to [`Provider::run`] returns a lazy, finite,
/// non-restartable stream of [`ProviderEvent`]s -- lazy because no work
/// happens until the stream is polled, finite because the stream always
/// ends (in a `Result` event or an error), non-restartable because a
/// consumed stream cannot be replayed; a retry calls `run` again.
///
/// # Object Safety
///
/// Every method returns a concrete type or a boxed trait object, so
/// `Box<dyn Provider>` can be stored in the registry.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable name for this provider (e.g. "codex", "claude-code").
    fn name(&self) -> &str;

    /// Run `prompt` against the agent runtime with the given options,
    /// returning a stream of events. Cancellation is cooperative: callers
    /// observe `options.timeout` and their own deadline between polls
    /// rather than the provider enforcing one internally.
    async fn run(
        &self,
        prompt: &str,
        options: ProviderOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = ProviderEvent> + Send>>, PhaseRunError>;
}

// Compile-time assertion: Provider must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Provider) {}
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::fake::FakeProvider;

    #[tokio::test]
    async fn provider_is_object_safe_and_runs() {
        use futures::StreamExt;

        let provider: Box<dyn Provider> = Box::new(FakeProvider::scripted(vec![ProviderEvent::Result {
            report: "ok".to_owned(),
            metadata: serde_json::json!({}),
        }]));

        let options = ProviderOptions {
            working_directory: std::path::PathBuf::from("/tmp"),
            timeout: None,
            context: vec![],
            execution_permissions: Default::default(),
            model: None,
        };

        let stream = provider.run("prompt", options).await.unwrap();
        let events: Vec<ProviderEvent> = stream.collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_result());
    }
}
