//! System prompt templates per task type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    Default,
    DocumentAnalysis,
    Research,
    Calculation,
    General,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::Default,
        TaskType::DocumentAnalysis,
        TaskType::Research,
        TaskType::Calculation,
        TaskType::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Default => "default",
            TaskType::DocumentAnalysis => "document_analysis",
            TaskType::Research => "research",
            TaskType::Calculation => "calculation",
            TaskType::General => "general",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = TaskType::ALL.iter().map(|t| t.as_str()).collect();
                anyhow::anyhow!("invalid task_type '{}': expected one of {}", s, valid.join(", "))
            })
    }
}

/// The system prompt for `task_type`.
pub fn template_for(task_type: TaskType) -> &'static str {
    match task_type {
        TaskType::Default => {
            "You are a helpful assistant that answers questions about uploaded documents \
             and can perform calculations. Base your answer on the retrieved document \
             context when the question is about specific files."
        }
        TaskType::DocumentAnalysis => {
            "You are a document analysis assistant. Analyze the retrieved documents \
             thoroughly, extract key information and themes, summarize and compare them, \
             and answer with specific references to document content. Prioritize accuracy \
             and cite the sections you rely on."
        }
        TaskType::Research => {
            "You are a research assistant. Synthesize the retrieved document context into \
             a well-structured answer, cite the sources you use, and state your confidence \
             level when the context is thin."
        }
        TaskType::Calculation => {
            "You are a calculation assistant. Perform accurate arithmetic, explain each \
             step, and verify the result before answering."
        }
        TaskType::General => {
            "You are an assistant with access to a document knowledge base and a calculator. \
             Use whichever fits the question and give a clear, accurate answer."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_names() {
        for t in TaskType::ALL {
            assert_eq!(t.as_str().parse::<TaskType>().unwrap(), t);
        }
    }

    #[test]
    fn test_unknown_task_type_is_rejected() {
        let err = "poetry".parse::<TaskType>().unwrap_err();
        assert!(err.to_string().contains("document_analysis"));
    }

    #[test]
    fn test_templates_are_distinct() {
        let mut seen: Vec<&str> = TaskType::ALL.iter().map(|t| template_for(*t)).collect();
        seen.dedup();
        assert_eq!(seen.len(), TaskType::ALL.len());
        assert!(template_for(TaskType::Calculation).contains("calculation"));
    }
}
