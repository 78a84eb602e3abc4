//! Question answering over the indexed documents.
//!
//! Retrieves context from the index, asks the completion service under the
//! task type's system prompt and optionally grades the answer.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::completion::{CompletionRequest, CompletionService};
use crate::evaluator::{QualityEvaluator, QualityReport};
use crate::index::VectorIndex;
use crate::prompts::{template_for, TaskType};

#[derive(Debug, Error)]
pub enum AskError {
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("retrieval failed: {0}")]
    Retrieval(String),
    #[error("completion failed: {0}")]
    Completion(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub response: String,
    pub task_type: TaskType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<QualityReport>,
}

pub struct Assistant {
    index: Arc<dyn VectorIndex>,
    completion: Arc<dyn CompletionService>,
    evaluator: QualityEvaluator,
    top_k: usize,
    timeout: Duration,
}

impl Assistant {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        completion: Arc<dyn CompletionService>,
        top_k: usize,
        timeout: Duration,
    ) -> Self {
        let evaluator = QualityEvaluator::new(completion.clone(), timeout);
        Self {
            index,
            completion,
            evaluator,
            top_k,
            timeout,
        }
    }

    pub async fn ask(
        &self,
        message: &str,
        task_type: TaskType,
        evaluate: bool,
    ) -> Result<Answer, AskError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(AskError::EmptyMessage);
        }

        let context = match tokio::time::timeout(self.timeout, self.index.query(message, self.top_k)).await {
            Ok(Ok(context)) => context,
            Ok(Err(e)) => return Err(AskError::Retrieval(format!("{:#}", e))),
            Err(_) => return Err(AskError::Retrieval("index query timed out".to_string())),
        };

        let request = CompletionRequest::new(build_prompt(message, &context))
            .with_system(template_for(task_type));
        let response = match tokio::time::timeout(self.timeout, self.completion.complete(&request)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Err(AskError::Completion(format!("{:#}", e))),
            Err(_) => return Err(AskError::Completion("completion timed out".to_string())),
        };

        tracing::info!(
            task_type = %task_type,
            model = self.completion.model_name(),
            context_chars = context.len(),
            "question answered"
        );

        let evaluation = if evaluate {
            Some(self.evaluator.evaluate(message, &response).await)
        } else {
            None
        };

        Ok(Answer {
            response,
            task_type,
            evaluation,
        })
    }
}

fn build_prompt(message: &str, context: &str) -> String {
    if context.trim().is_empty() {
        format!(
            "No documents matched this question.\n\nQuestion: {}",
            message
        )
    } else {
        format!(
            "Answer using the document excerpts below.\n\n{}\n\nQuestion: {}",
            context, message
        )
    }
}
