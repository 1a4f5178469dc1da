//! A scripted, in-memory provider used by engine-level scenario tests.
//!
//! Mirrors the role of `NoopHarness`/`FakeHarness` in the harness module:
//! a trivial adapter that proves the trait is usable and, unlike those,
//! replays a fixed transcript of [`ProviderEvent`]s instead of doing
//! nothing, so scenario tests can drive the executor against a real store
//! without a real agent runtime.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::trait_def::Provider;
use super::types::{PhaseRunError, ProviderErrorKind, ProviderEvent, ProviderOptions};

pub struct FakeProvider {
    name: String,
    default_transcript: Result<Vec<ProviderEvent>, (ProviderErrorKind, String)>,
    scripted_by_key: HashMap<String, Vec<ProviderEvent>>,
}

impl FakeProvider {
    /// A provider registered under `name` whose default transcript is a
    /// single bare `Result` event reporting `report`.
    pub fn named(name: &str) -> Self {
        Self::scripted(vec![ProviderEvent::Result {
            report: format!("{name} ok"),
            metadata: serde_json::json!({}),
        }])
        .with_name(name)
    }

    /// A provider named `"fake"` whose default transcript is `events`.
    pub fn scripted(events: Vec<ProviderEvent>) -> Self {
        Self {
            name: "fake".to_owned(),
            default_transcript: Ok(events),
            scripted_by_key: HashMap::new(),
        }
    }

    /// A provider whose default invocation fails with `kind`/`message`
    /// instead of returning events.
    pub fn failing(kind: ProviderErrorKind, message: &str) -> Self {
        Self {
            name: "fake".to_owned(),
            default_transcript: Err((kind, message.to_owned())),
            scripted_by_key: HashMap::new(),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_owned();
        self
    }

    /// Script a transcript for any prompt containing `key` as a substring
    /// -- prompts rendered from run-node markdown embed `# Node: <key>`,
    /// so scenario tests key their scripts by node key.
    pub fn with_script_for_key(mut self, key: &str, events: Vec<ProviderEvent>) -> Self {
        self.scripted_by_key.insert(key.to_owned(), events);
        self
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        prompt: &str,
        _options: ProviderOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = ProviderEvent> + Send>>, PhaseRunError> {
        let matched = self
            .scripted_by_key
            .iter()
            .find(|(key, _)| prompt.contains(key.as_str()))
            .map(|(_, events)| events.clone());

        if let Some(events) = matched {
            return Ok(Box::pin(futures::stream::iter(events)));
        }

        match &self.default_transcript {
            Ok(events) => Ok(Box::pin(futures::stream::iter(events.clone()))),
            Err((kind, message)) => Err(PhaseRunError {
                kind: *kind,
                message: message.clone(),
                partial_events: vec![],
                tokens_used: 0,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn options() -> ProviderOptions {
        ProviderOptions {
            working_directory: std::path::PathBuf::from("/tmp"),
            timeout: None,
            context: vec![],
            execution_permissions: Default::default(),
            model: None,
        }
    }

    #[tokio::test]
    async fn default_transcript_replays_in_order() {
        let provider = FakeProvider::scripted(vec![
            ProviderEvent::System { message: "start".to_owned() },
            ProviderEvent::Result {
                report: "done".to_owned(),
                metadata: serde_json::json!({}),
            },
        ]);
        let events: Vec<ProviderEvent> = provider.run("anything", options()).await.unwrap().collect().await;
        assert_eq!(events.len(), 2);
        assert!(events[1].is_result());
    }

    #[tokio::test]
    async fn scripted_by_key_overrides_default() {
        let provider = FakeProvider::scripted(vec![ProviderEvent::Result {
            report: "default".to_owned(),
            metadata: serde_json::json!({}),
        }])
        .with_script_for_key(
            "review",
            vec![ProviderEvent::Result {
                report: "decision: approved".to_owned(),
                metadata: serde_json::json!({}),
            }],
        );

        let events: Vec<ProviderEvent> = provider
            .run("# Node: review\nattempt 1", options())
            .await
            .unwrap()
            .collect()
            .await;
        let ProviderEvent::Result { report, .. } = &events[0] else {
            panic!("expected result event");
        };
        assert_eq!(report, "decision: approved");
    }

    #[tokio::test]
    async fn failing_provider_returns_error() {
        let provider = FakeProvider::failing(ProviderErrorKind::Timeout, "timed out");
        let err = match provider.run("anything", options()).await {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert_eq!(err.kind, ProviderErrorKind::Timeout);
        assert!(err.retryable());
    }
}
