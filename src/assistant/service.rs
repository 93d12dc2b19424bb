//! Conversational entry point: gatekeeper → snapshot → confidence → completion.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;

use crate::db::SharedDb;
use crate::error::AssistantError;
use crate::weather::gatekeeper::WeatherSyncGate;

use super::completion::{CompletionClient, CompletionConfig, CompletionProvider};
use super::confidence::{confidence_tier, estimate_confidence};
use super::context::{build_context, SourceList};
use super::prompt::build_system_instruction;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAnswer {
    pub answer: String,
    pub sources: Vec<String>,
    pub confidence: f64,
    pub explanation: String,
}

pub struct AgronomistAssistant {
    db: SharedDb,
    provider: Option<Arc<dyn CompletionProvider>>,
    weather_gate: Option<Arc<WeatherSyncGate>>,
}

impl AgronomistAssistant {
    pub fn new(db: SharedDb, provider: Option<Arc<dyn CompletionProvider>>) -> Self {
        Self {
            db,
            provider,
            weather_gate: None,
        }
    }

    /// Build from configuration. Without an API key the assistant is
    /// created disabled; `chat` then returns `AssistantError::Disabled`.
    pub fn from_config(db: SharedDb, config: &CompletionConfig) -> Self {
        let provider: Option<Arc<dyn CompletionProvider>> = match config.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => {
                match CompletionClient::new(config, key.trim().to_string()) {
                    Ok(client) => Some(Arc::new(client)),
                    Err(e) => {
                        log::warn!("Completion client unavailable: {}", e);
                        None
                    }
                }
            }
            _ => {
                log::info!("No completion API key configured; assistant disabled");
                None
            }
        };
        Self::new(db, provider)
    }

    /// Refresh the organization's forecast before each answer.
    pub fn with_weather_gate(mut self, gate: Arc<WeatherSyncGate>) -> Self {
        self.weather_gate = Some(gate);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    pub async fn chat(
        &self,
        question: &str,
        plot_id: Option<&str>,
        organization_id: &str,
    ) -> Result<ChatAnswer, AssistantError> {
        self.chat_on(question, plot_id, organization_id, Utc::now().date_naive())
            .await
    }

    pub async fn chat_on(
        &self,
        question: &str,
        plot_id: Option<&str>,
        organization_id: &str,
        today: NaiveDate,
    ) -> Result<ChatAnswer, AssistantError> {
        let provider = self.provider.as_ref().ok_or(AssistantError::Disabled)?;

        if let Some(gate) = &self.weather_gate {
            // Outcome is logged by the gate; a failed sync still answers.
            gate.ensure_fresh(organization_id).await;
        }

        let (snapshot, sources) = {
            let db = self.db.lock();
            build_context(&db, organization_id, plot_id, today)
        };
        let confidence = estimate_confidence(&snapshot, &sources);
        let system = build_system_instruction(&snapshot, &sources);

        let answer = provider.complete(&system, question).await.map_err(|e| {
            log::warn!(
                "Completion failed for organization {}: {}",
                organization_id,
                e
            );
            AssistantError::Unavailable(e.to_string())
        })?;

        Ok(ChatAnswer {
            answer,
            explanation: explain(confidence, &sources),
            sources: sources.into_vec(),
            confidence,
        })
    }
}

fn explain(confidence: f64, sources: &SourceList) -> String {
    let tier = confidence_tier(confidence);
    if sources.is_empty() {
        return format!(
            "Confidence {} ({:.2}): no farm data was available for this question.",
            tier, confidence
        );
    }
    format!(
        "Confidence {} ({:.2}): based on {}.",
        tier,
        confidence,
        sources.iter().collect::<Vec<_>>().join(", ")
    )
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::assistant::completion::CompletionError;
    use crate::db::test_utils::*;
    use crate::weather::sync::tests::{seeded_db, FakeForecast};
    use crate::weather::WeatherSyncConfig;

    /// Records every call and answers from a fixed script.
    struct FakeCompletion {
        reply: Result<String, String>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl FakeCompletion {
        fn answering(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err("upstream 500".to_string()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionProvider for FakeCompletion {
        async fn complete(&self, system: &str, user: &str) -> Result<String, CompletionError> {
            self.calls.lock().push((system.to_string(), user.to_string()));
            self.reply.clone().map_err(|message| CompletionError::Api {
                status: 500,
                message,
            })
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    #[tokio::test]
    async fn test_chat_returns_answer_with_sources() {
        let db = test_db();
        seed_org(&db);
        insert_plot(&db, "p1", "Talhao A", 3.0, None);
        insert_ndvi(&db, "p1", 0.55, "2026-10-10");
        let fake = FakeCompletion::answering("Talhao A is stable.");
        let assistant = AgronomistAssistant::new(db.into_shared(), Some(fake.clone()));

        let answer = assistant
            .chat_on("How is Talhao A?", Some("p1"), "org1", today())
            .await
            .unwrap();

        assert_eq!(answer.answer, "Talhao A is stable.");
        assert_eq!(
            answer.sources,
            vec!["organization data", "plot detail", "vegetation index statistics"]
        );
        // 40 + 10 + 15 + 5 (plot vegetation) + 5 (stats) + 9 (3 sources)
        assert_eq!(answer.confidence, 0.84);
        assert!(answer.explanation.starts_with("Confidence high (0.84)"));

        let calls = fake.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "How is Talhao A?");
        assert!(calls[0].0.contains("\"name\": \"Talhao A\""));
    }

    #[tokio::test]
    async fn test_chat_disabled_without_provider() {
        let assistant =
            AgronomistAssistant::from_config(test_db().into_shared(), &CompletionConfig::default());
        assert!(!assistant.is_enabled());
        let result = assistant.chat("hello", None, "org1").await;
        assert!(matches!(result, Err(AssistantError::Disabled)));
    }

    #[tokio::test]
    async fn test_completion_failure_maps_to_unavailable() {
        let assistant =
            AgronomistAssistant::new(test_db().into_shared(), Some(FakeCompletion::failing()));
        let result = assistant.chat_on("hello", None, "org1", today()).await;
        match result {
            Err(AssistantError::Unavailable(message)) => assert!(message.contains("upstream 500")),
            other => panic!("expected Unavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chat_refreshes_weather_first() {
        let db = seeded_db();
        let source = Arc::new(FakeForecast::new());
        let gate = Arc::new(WeatherSyncGate::new(
            db.clone(),
            source.clone(),
            &WeatherSyncConfig::default(),
        ));
        let assistant = AgronomistAssistant::new(db, Some(FakeCompletion::answering("ok")))
            .with_weather_gate(gate.clone());

        let answer = assistant.chat_on("rain?", None, "org1", today()).await.unwrap();
        assert_eq!(source.calls(), 1);
        assert!(gate.state("org1").is_some());
        assert!(answer.sources.contains(&"weather forecast".to_string()));
    }

    #[tokio::test]
    async fn test_failed_weather_refresh_still_answers() {
        let db = seeded_db();
        let mut fake = FakeForecast::new();
        fake.fail_stations = true;
        let gate = Arc::new(WeatherSyncGate::new(
            db.clone(),
            Arc::new(fake),
            &WeatherSyncConfig::default(),
        ));
        let assistant = AgronomistAssistant::new(db, Some(FakeCompletion::answering("ok")))
            .with_weather_gate(gate);

        let answer = assistant.chat_on("rain?", None, "org1", today()).await.unwrap();
        assert_eq!(answer.answer, "ok");
        assert!(!answer.sources.contains(&"weather forecast".to_string()));
    }
}
