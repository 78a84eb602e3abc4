//! Answer quality grading.
//!
//! Two rubric calls (relevance, completeness) go to the completion service
//! concurrently. Each asks for a JSON object under a strict schema; the
//! reply is parsed and range-checked here regardless. A rubric that cannot
//! be scored counts as `0.0` and carries the reason, so [`QualityEvaluator::evaluate`]
//! always produces a report.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::completion::{CompletionRequest, CompletionService};

const RELEVANCE_WEIGHT: f64 = 0.6;
const COMPLETENESS_WEIGHT: f64 = 0.4;

/// Why a rubric could not be scored.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationFailure {
    #[error("completion failed: {0}")]
    Completion(String),
    #[error("completion timed out after {0}s")]
    Timeout(u64),
    #[error("malformed reply: {0}")]
    Malformed(String),
    #[error("score {0} outside [0, 1]")]
    ScoreOutOfRange(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityBand {
    High,
    Moderate,
    Low,
    Poor,
}

impl QualityBand {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            QualityBand::High
        } else if score >= 0.6 {
            QualityBand::Moderate
        } else if score >= 0.4 {
            QualityBand::Low
        } else {
            QualityBand::Poor
        }
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            QualityBand::High => "High quality context - suitable for use",
            QualityBand::Moderate => "Moderate quality - may need additional context",
            QualityBand::Low => "Low quality - consider refining query or adding more sources",
            QualityBand::Poor => "Poor quality - context may not be relevant or complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelevanceScore {
    pub relevance_score: f64,
    pub explanation: String,
    pub key_points: Vec<String>,
    pub failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletenessScore {
    pub completeness_score: f64,
    pub explanation: String,
    pub missing_aspects: Vec<String>,
    pub failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub overall_quality_score: f64,
    pub relevance: RelevanceScore,
    pub completeness: CompletenessScore,
    pub band: QualityBand,
    pub recommendation: String,
}

impl QualityReport {
    fn from_parts(relevance: RelevanceScore, completeness: CompletenessScore) -> Self {
        let overall = RELEVANCE_WEIGHT * relevance.relevance_score
            + COMPLETENESS_WEIGHT * completeness.completeness_score;
        let band = QualityBand::from_score(overall);
        Self {
            overall_quality_score: overall,
            relevance,
            completeness,
            band,
            recommendation: band.recommendation().to_string(),
        }
    }

    /// Report for an empty answer. No completion calls are made for it.
    pub fn empty() -> Self {
        let explanation = "No response to evaluate".to_string();
        Self::from_parts(
            RelevanceScore {
                relevance_score: 0.0,
                explanation: explanation.clone(),
                key_points: Vec::new(),
                failed: false,
                error: None,
            },
            CompletenessScore {
                completeness_score: 0.0,
                explanation,
                missing_aspects: Vec::new(),
                failed: false,
                error: None,
            },
        )
    }
}

#[derive(Debug, Clone, Copy)]
enum Rubric {
    Relevance,
    Completeness,
}

impl Rubric {
    fn name(&self) -> &'static str {
        match self {
            Rubric::Relevance => "relevance",
            Rubric::Completeness => "completeness",
        }
    }

    fn list_field(&self) -> &'static str {
        match self {
            Rubric::Relevance => "key_points",
            Rubric::Completeness => "missing_aspects",
        }
    }

    fn prompt(&self, query: &str, response: &str) -> String {
        let scale = match self {
            Rubric::Relevance => {
                "- 1.0 = highly relevant, directly answers the query\n\
                 - 0.5 = somewhat relevant, partially addresses the query\n\
                 - 0.0 = not relevant, does not address the query"
            }
            Rubric::Completeness => {
                "- 1.0 = complete answer, all aspects covered\n\
                 - 0.5 = partial answer, some aspects missing\n\
                 - 0.0 = incomplete answer, major aspects missing"
            }
        };
        let list_hint = match self {
            Rubric::Relevance => "key points taken from the response",
            Rubric::Completeness => "aspects of the query the response does not cover",
        };
        format!(
            "Evaluate the {name} of the following response to the query.\n\n\
             Query: {query}\n\n\
             Response: {response}\n\n\
             Rate the {name} on a scale of 0.0 to 1.0, where:\n{scale}\n\n\
             Reply with a JSON object with fields \"score\" (number between 0.0 and 1.0), \
             \"explanation\" (short string) and \"{field}\" (list of {list_hint}).",
            name = self.name(),
            field = self.list_field(),
        )
    }

    fn schema(&self) -> Value {
        let field = self.list_field();
        json!({
            "type": "object",
            "properties": {
                "score": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                "explanation": { "type": "string" },
                field: { "type": "array", "items": { "type": "string" } }
            },
            "required": ["score", "explanation", field],
            "additionalProperties": false
        })
    }
}

/// A parsed and validated rubric reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RubricReply {
    pub score: f64,
    pub explanation: String,
    #[serde(default, alias = "key_points", alias = "missing_aspects")]
    pub points: Vec<String>,
}

/// Parses a rubric reply. Accepts bare JSON or a single fenced block.
pub fn parse_rubric_reply(text: &str) -> Result<RubricReply, EvaluationFailure> {
    let body = strip_fence(text);
    let reply: RubricReply =
        serde_json::from_str(body).map_err(|e| EvaluationFailure::Malformed(e.to_string()))?;
    if !reply.score.is_finite() || !(0.0..=1.0).contains(&reply.score) {
        return Err(EvaluationFailure::ScoreOutOfRange(reply.score));
    }
    Ok(reply)
}

fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

pub struct QualityEvaluator {
    completion: Arc<dyn CompletionService>,
    timeout: Duration,
}

impl QualityEvaluator {
    pub fn new(completion: Arc<dyn CompletionService>, timeout: Duration) -> Self {
        Self {
            completion,
            timeout,
        }
    }

    /// Grades `response` as an answer to `query`. Never fails.
    pub async fn evaluate(&self, query: &str, response: &str) -> QualityReport {
        if response.trim().is_empty() {
            return QualityReport::empty();
        }

        let (relevance, completeness) = tokio::join!(
            self.score(Rubric::Relevance, query, response),
            self.score(Rubric::Completeness, query, response),
        );

        let relevance = match relevance {
            Ok(r) => RelevanceScore {
                relevance_score: r.score,
                explanation: r.explanation,
                key_points: r.points,
                failed: false,
                error: None,
            },
            Err(e) => RelevanceScore {
                relevance_score: 0.0,
                explanation: format!("Evaluation error: {}", e),
                key_points: Vec::new(),
                failed: true,
                error: Some(e.to_string()),
            },
        };
        let completeness = match completeness {
            Ok(r) => CompletenessScore {
                completeness_score: r.score,
                explanation: r.explanation,
                missing_aspects: r.points,
                failed: false,
                error: None,
            },
            Err(e) => CompletenessScore {
                completeness_score: 0.0,
                explanation: format!("Evaluation error: {}", e),
                missing_aspects: Vec::new(),
                failed: true,
                error: Some(e.to_string()),
            },
        };

        let report = QualityReport::from_parts(relevance, completeness);
        tracing::debug!(
            overall = report.overall_quality_score,
            band = ?report.band,
            "answer evaluated"
        );
        report
    }

    async fn score(
        &self,
        rubric: Rubric,
        query: &str,
        response: &str,
    ) -> Result<RubricReply, EvaluationFailure> {
        let request = CompletionRequest::new(rubric.prompt(query, response))
            .with_system("You are a strict grader. Reply with JSON only.")
            .with_schema(format!("{}_rubric", rubric.name()), rubric.schema());

        let reply = match tokio::time::timeout(self.timeout, self.completion.complete(&request)).await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                tracing::warn!(rubric = rubric.name(), error = %e, "rubric completion failed");
                return Err(EvaluationFailure::Completion(format!("{:#}", e)));
            }
            Err(_) => {
                tracing::warn!(rubric = rubric.name(), "rubric completion timed out");
                return Err(EvaluationFailure::Timeout(self.timeout.as_secs()));
            }
        };

        parse_rubric_reply(&reply).inspect_err(|e| {
            tracing::warn!(rubric = rubric.name(), error = %e, "rubric reply rejected");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies by rubric: the schema name tells the two calls apart.
    struct Scripted {
        relevance: Option<String>,
        completeness: Option<String>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(relevance: Option<&str>, completeness: Option<&str>) -> Self {
            Self {
                relevance: relevance.map(String::from),
                completeness: completeness.map(String::from),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionService for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = request.json_schema.as_ref().map(|(n, _)| n.as_str());
            let reply = match name {
                Some("relevance_rubric") => self.relevance.clone(),
                _ => self.completeness.clone(),
            };
            reply.ok_or_else(|| anyhow::anyhow!("provider down"))
        }
    }

    fn evaluator(service: Arc<Scripted>) -> QualityEvaluator {
        QualityEvaluator::new(service, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_empty_response_scores_zero_without_calls() {
        let service = Arc::new(Scripted::new(None, None));
        let report = evaluator(service.clone()).evaluate("q", "   ").await;
        assert_eq!(report.overall_quality_score, 0.0);
        assert_eq!(report.band, QualityBand::Poor);
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_weighted_overall_and_band() {
        let service = Arc::new(Scripted::new(
            Some(r#"{"score": 1.0, "explanation": "on topic", "key_points": ["a"]}"#),
            Some(r#"{"score": 0.75, "explanation": "partial", "missing_aspects": ["b"]}"#),
        ));
        let report = evaluator(service.clone()).evaluate("q", "answer").await;

        assert!((report.overall_quality_score - 0.9).abs() < 1e-9);
        assert_eq!(report.band, QualityBand::High);
        assert_eq!(report.recommendation, "High quality context - suitable for use");
        assert_eq!(report.relevance.key_points, vec!["a"]);
        assert_eq!(report.completeness.missing_aspects, vec!["b"]);
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_rubric_scores_zero() {
        let service = Arc::new(Scripted::new(
            Some(r#"{"score": 0.9, "explanation": "good", "key_points": []}"#),
            None,
        ));
        let report = evaluator(service).evaluate("q", "answer").await;

        assert!(!report.relevance.failed);
        assert!(report.completeness.failed);
        assert_eq!(report.completeness.completeness_score, 0.0);
        assert!(report.completeness.error.as_deref().unwrap().contains("provider down"));
        assert!((report.overall_quality_score - 0.54).abs() < 1e-9);
        assert_eq!(report.band, QualityBand::Low);
    }

    #[test]
    fn test_parse_accepts_fenced_json() {
        let reply = parse_rubric_reply(
            "```json\n{\"score\": 0.7, \"explanation\": \"ok\", \"key_points\": [\"x\"]}\n```",
        )
        .unwrap();
        assert_eq!(reply.score, 0.7);
        assert_eq!(reply.points, vec!["x"]);
    }

    #[test]
    fn test_parse_rejects_prose_and_out_of_range() {
        assert!(matches!(
            parse_rubric_reply("The score is 0.8"),
            Err(EvaluationFailure::Malformed(_))
        ));
        assert_eq!(
            parse_rubric_reply(r#"{"score": 1.5, "explanation": "x"}"#),
            Err(EvaluationFailure::ScoreOutOfRange(1.5))
        );
    }

    #[test]
    fn test_band_boundaries() {
        assert_eq!(QualityBand::from_score(0.8), QualityBand::High);
        assert_eq!(QualityBand::from_score(0.6), QualityBand::Moderate);
        assert_eq!(QualityBand::from_score(0.4), QualityBand::Low);
        assert_eq!(QualityBand::from_score(0.39), QualityBand::Poor);
    }
}
