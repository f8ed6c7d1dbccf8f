use crate::backend::QueryBackend;
use crate::session::history::{HistoryLogger, HistoryTicket};
use crate::session::{ContextId, GeneratedQuery, ValidationError, WorkflowError};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tracing::{debug, info};

static SQL_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:sql)?\s*(.*?)\s*```").unwrap());

/// What the user asked: a typed question and/or picked recommendations.
#[derive(Debug, Clone, Default)]
pub struct QuestionInput {
    pub question: String,
    pub recommendations: Vec<String>,
}

impl QuestionInput {
    pub fn typed(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            recommendations: Vec::new(),
        }
    }

    /// The text sent for generation. Picked recommendations take precedence
    /// and are joined with a blank line.
    pub fn compose(&self) -> Result<String, ValidationError> {
        let picked: Vec<&str> = self
            .recommendations
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .collect();

        let text = if picked.is_empty() {
            self.question.trim().to_string()
        } else {
            picked.join("\n\n")
        };

        if text.is_empty() {
            return Err(ValidationError::BlankQuestion);
        }
        Ok(text)
    }
}

/// Unwrap SQL the model returned inside a markdown code block.
fn clean_sql(raw: &str) -> String {
    match SQL_FENCE.captures(raw).and_then(|c| c.get(1)) {
        Some(sql) => {
            debug!("Stripped code fence from generated SQL");
            sql.as_str().to_string()
        }
        None => raw.trim().to_string(),
    }
}

pub struct QueryGenerationCoordinator {
    backend: Arc<dyn QueryBackend>,
    history: HistoryLogger,
}

impl QueryGenerationCoordinator {
    pub fn new(backend: Arc<dyn QueryBackend>, history: HistoryLogger) -> Self {
        Self { backend, history }
    }

    /// Generate SQL for `text` within `context`. The history insert runs in
    /// the background; the returned ticket resolves to its id.
    pub async fn generate(
        &self,
        user_id: &str,
        context: &ContextId,
        text: &str,
    ) -> Result<(GeneratedQuery, HistoryTicket), WorkflowError> {
        let question = text.trim();
        if question.is_empty() {
            return Err(ValidationError::BlankQuestion.into());
        }

        let started = Instant::now();
        let output = self.backend.generate_query(context, question).await?;
        let sql = clean_sql(&output.sql);
        info!(
            "Generated SQL in {:?} for context {} ({} source tables)",
            started.elapsed(),
            context,
            output.source_tables.len()
        );
        debug!("Generated SQL: {}", sql);

        let ticket = self.history.spawn_record_generated(
            user_id.to_string(),
            question.to_string(),
            sql.clone(),
        );

        let generated = GeneratedQuery {
            sql,
            explanation: output.explanation,
            source_tables: output.source_tables,
            question: question.to_string(),
        };
        Ok((generated, ticket))
    }
}
