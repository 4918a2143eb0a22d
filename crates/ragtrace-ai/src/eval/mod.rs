//! Offline evaluation of agent turns.
//!
//! Runs a question dataset through the agent, one fresh thread per item,
//! and scores the finished transcripts with rule-based evaluators.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{AgentRunner, TurnRequest};
use crate::llm::{Message, Role, ToolCall};

/// A single evaluation question with its expectations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetItem {
    pub question: String,
    /// Document id expected to appear in retrieved search results.
    #[serde(default)]
    pub expected_doc_id: Option<String>,
    /// Substring expected in the final assistant answer.
    #[serde(default)]
    pub expected_answer: Option<String>,
}

/// Evaluation dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    pub items: Vec<DatasetItem>,
}

impl Dataset {
    /// Load dataset from JSON
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Score plus the reason it was given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    /// Between 0.0 and 1.0.
    pub score: f64,
    pub rationale: String,
}

impl Feedback {
    pub fn pass(rationale: impl Into<String>) -> Self {
        Self {
            score: 1.0,
            rationale: rationale.into(),
        }
    }

    pub fn fail(rationale: impl Into<String>) -> Self {
        Self {
            score: 0.0,
            rationale: rationale.into(),
        }
    }
}

/// Scores one finished turn transcript against a dataset item.
///
/// Returning `Ok(None)` means the evaluator does not apply to this item
/// (e.g. the item carries no expectation for it) and is excluded from
/// aggregation.
#[async_trait]
pub trait TurnEvaluator: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(
        &self,
        item: &DatasetItem,
        transcript: &[Message],
    ) -> anyhow::Result<Option<Feedback>>;
}

/// Pair each assistant tool call with its tool response by `tool_call_id`.
pub fn paired_tool_calls<'a>(
    transcript: &'a [Message],
) -> Vec<(&'a ToolCall, Option<&'a Message>)> {
    let mut pairs = Vec::new();
    for message in transcript {
        if message.role != Role::Assistant {
            continue;
        }
        let Some(calls) = &message.tool_calls else {
            continue;
        };
        for call in calls {
            let response = transcript.iter().find(|m| {
                m.role == Role::Tool && m.tool_call_id.as_deref() == Some(call.id.as_str())
            });
            pairs.push((call, response));
        }
    }
    pairs
}

fn final_assistant_answer(transcript: &[Message]) -> Option<&Message> {
    transcript
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant && m.tool_calls.is_none())
}

/// Passes when the expected document id appears in a search response.
pub struct RetrievalEvaluator;

#[async_trait]
impl TurnEvaluator for RetrievalEvaluator {
    fn name(&self) -> &str {
        "retrieval"
    }

    async fn evaluate(
        &self,
        item: &DatasetItem,
        transcript: &[Message],
    ) -> anyhow::Result<Option<Feedback>> {
        let Some(expected) = &item.expected_doc_id else {
            return Ok(None);
        };

        let found = paired_tool_calls(transcript)
            .iter()
            .filter(|(call, _)| call.name == "search")
            .filter_map(|(_, response)| response.as_ref())
            .any(|response| response.content.contains(expected.as_str()));

        Ok(Some(if found {
            Feedback::pass(format!("document {expected} retrieved"))
        } else {
            Feedback::fail(format!("document {expected} not in any search response"))
        }))
    }
}

/// Passes when the turn used at most one tool call.
pub struct MinimalToolCallsEvaluator;

#[async_trait]
impl TurnEvaluator for MinimalToolCallsEvaluator {
    fn name(&self) -> &str {
        "minimal_tool_calls"
    }

    async fn evaluate(
        &self,
        _item: &DatasetItem,
        transcript: &[Message],
    ) -> anyhow::Result<Option<Feedback>> {
        let count = paired_tool_calls(transcript).len();
        Ok(Some(if count <= 1 {
            Feedback::pass(format!("{count} tool call(s)"))
        } else {
            Feedback::fail(format!("{count} tool calls, expected at most 1"))
        }))
    }
}

/// Passes when the expected answer appears in the final assistant message.
pub struct AnswerContainsEvaluator;

#[async_trait]
impl TurnEvaluator for AnswerContainsEvaluator {
    fn name(&self) -> &str {
        "answer_contains"
    }

    async fn evaluate(
        &self,
        item: &DatasetItem,
        transcript: &[Message],
    ) -> anyhow::Result<Option<Feedback>> {
        let Some(expected) = &item.expected_answer else {
            return Ok(None);
        };

        let Some(answer) = final_assistant_answer(transcript) else {
            return Ok(Some(Feedback::fail("no assistant answer in transcript")));
        };

        let found = answer
            .content
            .to_lowercase()
            .contains(&expected.to_lowercase());
        Ok(Some(if found {
            Feedback::pass("expected answer present")
        } else {
            Feedback::fail(format!("answer does not contain {expected:?}"))
        }))
    }
}

/// One evaluator's feedback for one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredFeedback {
    pub evaluator: String,
    pub feedback: Feedback,
}

/// Per-item evaluation outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemReport {
    pub question: String,
    pub feedback: Vec<ScoredFeedback>,
}

/// Aggregated evaluation outcome for one dataset run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalReport {
    pub dataset: String,
    pub generated_at: DateTime<Utc>,
    pub items: Vec<ItemReport>,
    /// Mean score per evaluator, over the items it applied to.
    pub means: HashMap<String, f64>,
}

impl EvalReport {
    fn from_items(dataset: &str, items: Vec<ItemReport>) -> Self {
        let mut sums: HashMap<String, (f64, usize)> = HashMap::new();
        for item in &items {
            for scored in &item.feedback {
                let entry = sums.entry(scored.evaluator.clone()).or_insert((0.0, 0));
                entry.0 += scored.feedback.score;
                entry.1 += 1;
            }
        }

        let means = sums
            .into_iter()
            .map(|(name, (sum, count))| (name, sum / count as f64))
            .collect();

        Self {
            dataset: dataset.to_string(),
            generated_at: Utc::now(),
            items,
            means,
        }
    }
}

/// Runs a dataset through the agent and scores every transcript.
pub struct EvalRunner {
    runner: AgentRunner,
    evaluators: Vec<Box<dyn TurnEvaluator>>,
}

impl EvalRunner {
    pub fn new(runner: AgentRunner, evaluators: Vec<Box<dyn TurnEvaluator>>) -> Self {
        Self { runner, evaluators }
    }

    /// The default rule-based scorer set.
    pub fn with_default_evaluators(runner: AgentRunner) -> Self {
        Self::new(
            runner,
            vec![
                Box::new(RetrievalEvaluator),
                Box::new(MinimalToolCallsEvaluator),
                Box::new(AnswerContainsEvaluator),
            ],
        )
    }

    pub async fn run(&self, dataset: &Dataset) -> anyhow::Result<EvalReport> {
        let mut items = Vec::with_capacity(dataset.len());

        for item in &dataset.items {
            // Fresh thread per item so turns cannot contaminate each other.
            let thread_id = format!("eval-{}", uuid::Uuid::new_v4());
            let transcript = self
                .runner
                .invoke(TurnRequest::new(&item.question, thread_id))
                .await?;

            let mut feedback = Vec::new();
            for evaluator in &self.evaluators {
                if let Some(result) = evaluator.evaluate(item, &transcript).await? {
                    feedback.push(ScoredFeedback {
                        evaluator: evaluator.name().to_string(),
                        feedback: result,
                    });
                }
            }

            tracing::info!(
                question = %item.question,
                scores = ?feedback
                    .iter()
                    .map(|f| (f.evaluator.as_str(), f.feedback.score))
                    .collect::<Vec<_>>(),
                "Evaluated item"
            );
            items.push(ItemReport {
                question: item.question.clone(),
                feedback,
            });
        }

        Ok(EvalReport::from_items(&dataset.name, items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_turn_transcript() -> Vec<Message> {
        vec![
            Message::user("Where do plans live?"),
            Message::assistant_with_tool_calls(
                None,
                vec![ToolCall {
                    id: "call-1".into(),
                    name: "search".into(),
                    arguments: serde_json::json!({"query": "plans"}),
                }],
            ),
            Message::tool_result(
                "call-1",
                "{\"result\":\"success\",\"documents\":[\"kb-17: plans live in the wiki\"]}",
            ),
            Message::assistant("Plans live in the wiki."),
        ]
    }

    #[test]
    fn pairing_matches_calls_to_responses_by_id() {
        let transcript = tool_turn_transcript();
        let pairs = paired_tool_calls(&transcript);

        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0.id, "call-1");
        assert!(pairs[0].1.unwrap().content.contains("kb-17"));
    }

    #[tokio::test]
    async fn retrieval_evaluator_finds_expected_document() {
        let item = DatasetItem {
            question: "Where do plans live?".into(),
            expected_doc_id: Some("kb-17".into()),
            expected_answer: None,
        };

        let feedback = RetrievalEvaluator
            .evaluate(&item, &tool_turn_transcript())
            .await
            .unwrap()
            .expect("evaluator applies");
        assert_eq!(feedback.score, 1.0);
    }

    #[tokio::test]
    async fn retrieval_evaluator_skips_items_without_expectation() {
        let item = DatasetItem {
            question: "q".into(),
            expected_doc_id: None,
            expected_answer: None,
        };

        let feedback = RetrievalEvaluator
            .evaluate(&item, &tool_turn_transcript())
            .await
            .unwrap();
        assert!(feedback.is_none());
    }

    #[tokio::test]
    async fn minimal_tool_calls_fails_on_two_calls() {
        let mut transcript = tool_turn_transcript();
        transcript.insert(
            2,
            Message::assistant_with_tool_calls(
                None,
                vec![ToolCall {
                    id: "call-2".into(),
                    name: "search".into(),
                    arguments: serde_json::json!({"query": "again"}),
                }],
            ),
        );

        let item = DatasetItem {
            question: "q".into(),
            expected_doc_id: None,
            expected_answer: None,
        };
        let feedback = MinimalToolCallsEvaluator
            .evaluate(&item, &transcript)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(feedback.score, 0.0);
    }

    #[tokio::test]
    async fn answer_evaluator_is_case_insensitive() {
        let item = DatasetItem {
            question: "q".into(),
            expected_doc_id: None,
            expected_answer: Some("THE WIKI".into()),
        };

        let feedback = AnswerContainsEvaluator
            .evaluate(&item, &tool_turn_transcript())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(feedback.score, 1.0);
    }

    #[test]
    fn report_means_average_only_applicable_items() {
        let items = vec![
            ItemReport {
                question: "a".into(),
                feedback: vec![ScoredFeedback {
                    evaluator: "retrieval".into(),
                    feedback: Feedback::pass("ok"),
                }],
            },
            ItemReport {
                question: "b".into(),
                feedback: vec![],
            },
            ItemReport {
                question: "c".into(),
                feedback: vec![ScoredFeedback {
                    evaluator: "retrieval".into(),
                    feedback: Feedback::fail("missing"),
                }],
            },
        ];

        let report = EvalReport::from_items("demo", items);
        assert_eq!(report.means["retrieval"], 0.5);
    }

    #[test]
    fn dataset_parses_optional_expectations() {
        let dataset = Dataset::from_json(
            r#"{
                "name": "demo",
                "items": [
                    { "question": "q1", "expected_doc_id": "kb-1" },
                    { "question": "q2", "expected_answer": "wiki" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.items[0].expected_doc_id.as_deref(), Some("kb-1"));
        assert!(dataset.items[0].expected_answer.is_none());
    }
}
