//! Natural-language planning layer sitting between user input and executor
//! dispatch: classify intent, decompose into a task graph, drive the graph
//! to completion.

pub mod decompose;
pub mod graph;
pub mod intent;

/// Confidence below which a parsed intent is routed to clarification
/// instead of decomposition, regardless of what the classifier itself
/// reported for `needs_clarification`.
pub const AMBIGUITY_THRESHOLD: f64 = 0.4;

/// Upper bound on the number of tasks a single decomposition may produce.
/// Additional tasks returned by the model are dropped, not merged.
pub const MAX_TASKS_PER_REQUEST: usize = 5;

/// Per-task timeout applied when the decomposer's output omits one.
pub const DEFAULT_TASK_TIMEOUT_SECONDS: u32 = 300;

/// Step budget given to every dispatched task; the decomposer has no notion
/// of step count, so the graph executor applies this uniformly.
pub const DEFAULT_MAX_STEPS: u32 = 20;

/// Result of the planning phase, before any task is dispatched.
#[derive(Debug, Clone)]
pub enum PlanOutcome {
    /// A task graph is ready for execution.
    Graph(crate::types::TaskGraph),
    /// The input requires a follow-up question before planning can proceed.
    NeedsClarification(String),
    /// The input was chitchat; no task graph is constructed.
    Chitchat(String),
    /// Planning failed outright (e.g. decomposition produced nothing usable).
    Failed(String),
}

/// Entry point tying intent classification and task decomposition together:
/// the natural-language front door to the planning pipeline.
pub struct Planner {
    intent_parser: intent::IntentParser,
    decomposer: decompose::TaskDecomposer,
}

impl Planner {
    /// Build a planner whose intent classification and decomposition both
    /// run against `provider`/`model`.
    #[must_use]
    pub fn new(provider: std::sync::Arc<dyn crate::providers::ModelProvider>, model: String) -> Self {
        Self {
            intent_parser: intent::IntentParser::new(provider.clone(), model.clone()),
            decomposer: decompose::TaskDecomposer::new(provider, model),
        }
    }

    /// Classify `user_input` and, unless it is chitchat or needs
    /// clarification, decompose it into a validated [`crate::types::TaskGraph`].
    pub async fn plan(&self, request_id: String, user_input: &str) -> PlanOutcome {
        let parsed_intent = self.intent_parser.parse(user_input).await;

        if parsed_intent.intent_type == crate::types::IntentType::Chitchat {
            return PlanOutcome::Chitchat(intent::chitchat_response(&parsed_intent));
        }
        if parsed_intent.needs_clarification || parsed_intent.confidence < AMBIGUITY_THRESHOLD {
            let question = parsed_intent
                .clarification_question
                .clone()
                .unwrap_or_else(|| "Could you say a bit more about what you'd like?".to_owned());
            return PlanOutcome::NeedsClarification(question);
        }

        let tasks = self.decomposer.decompose(&parsed_intent).await;
        if tasks.is_empty() {
            return PlanOutcome::Failed("decomposition produced no tasks".to_owned());
        }

        match crate::types::TaskGraph::new(request_id, tasks, parsed_intent, user_input.to_owned(), chrono::Utc::now())
        {
            Ok(graph) => PlanOutcome::Graph(graph),
            Err(err) => PlanOutcome::Failed(err.to_string()),
        }
    }

    /// Run [`Self::plan`] and, if it produced a graph, drive it to
    /// completion via `graph_executor`. Chitchat and clarification outcomes
    /// are returned as-is without ever reaching the executor.
    pub async fn plan_and_execute(
        &self,
        request_id: String,
        user_input: &str,
        graph_executor: &graph::TaskGraphExecutor,
        credentials: Option<crate::types::ScopedCredentials>,
    ) -> PlanAndExecuteOutcome {
        match self.plan(request_id, user_input).await {
            PlanOutcome::Graph(mut task_graph) => {
                let result = graph_executor.execute(&mut task_graph, credentials).await;
                PlanAndExecuteOutcome::Executed(result)
            }
            other => PlanAndExecuteOutcome::Planned(other),
        }
    }
}

/// Outcome of [`Planner::plan_and_execute`]: either the input never reached
/// execution, or it did and produced an [`graph::ExecutionResult`].
#[derive(Debug, Clone)]
pub enum PlanAndExecuteOutcome {
    /// Planning stopped short of execution (chitchat, clarification, or failure).
    Planned(PlanOutcome),
    /// The plan was executed to completion.
    Executed(graph::ExecutionResult),
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::providers::{Message, ModelProvider, ProviderError};

    /// Returns a fixed JSON object regardless of input, for exercising the
    /// planner without a real model call.
    struct ScriptedProvider {
        json: Value,
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        async fn complete(
            &self,
            _messages: &[Message],
            _model: &str,
            _system: Option<&str>,
            _temperature: f64,
            _max_tokens: u32,
        ) -> Result<String, ProviderError> {
            Ok(self.json.to_string())
        }

        async fn complete_json(
            &self,
            _messages: &[Message],
            _model: &str,
            _system: Option<&str>,
            _schema: Option<&Value>,
            _temperature: f64,
            _max_tokens: u32,
        ) -> Result<HashMap<String, Value>, ProviderError> {
            match self.json.as_object() {
                Some(obj) => Ok(obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
                None => Ok(HashMap::new()),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn plan_short_circuits_on_chitchat_without_decomposing() {
        let provider = Arc::new(ScriptedProvider {
            json: json!({
                "intent_type": "chitchat",
                "confidence": 0.95,
                "subject": "greeting",
                "needs_clarification": false,
            }),
        });
        let planner = Planner::new(provider, "scripted-model".to_owned());
        let outcome = planner.plan("req-1".to_owned(), "hey there").await;
        assert!(matches!(outcome, PlanOutcome::Chitchat(_)));
    }

    #[tokio::test]
    async fn plan_asks_for_clarification_below_the_ambiguity_threshold() {
        let provider = Arc::new(ScriptedProvider {
            json: json!({
                "intent_type": "research",
                "confidence": 0.1,
                "subject": "something vague",
                "needs_clarification": false,
            }),
        });
        let planner = Planner::new(provider, "scripted-model".to_owned());
        let outcome = planner.plan("req-2".to_owned(), "do the thing").await;
        assert!(matches!(outcome, PlanOutcome::NeedsClarification(_)));
    }

    #[tokio::test]
    async fn plan_produces_a_graph_for_a_confident_intent() {
        let provider = Arc::new(ScriptedProvider {
            json: json!({
                "intent_type": "research",
                "confidence": 0.9,
                "subject": "EV charging competitors",
                "needs_clarification": false,
                "tasks": [
                    {"task_type": "web_research", "prompt": "research competitors"},
                ],
            }),
        });
        let planner = Planner::new(provider, "scripted-model".to_owned());
        let outcome = planner.plan("req-3".to_owned(), "research my competitors").await;
        match outcome {
            PlanOutcome::Graph(graph) => assert_eq!(graph.tasks.len(), 1),
            other => panic!("expected a graph, got {other:?}"),
        }
    }
}
