//! Response Composer
//!
//! Turns the final rows into a conversational answer. Only a bounded slice of
//! the rows is rendered into the prompt.

use crate::error::{AgentError, Result};
use crate::executor::{display_value, RowSet, SqlCandidate};
use crate::llm::LanguageModel;
use crate::prompts::compose_answer_prompt;
use std::sync::Arc;
use tracing::{debug, error};

pub const DEFAULT_MAX_PROMPT_ROWS: usize = 20;
pub const MAX_CELL_CHARS: usize = 200;

#[derive(Clone)]
pub struct ResponseComposer {
    llm: Arc<dyn LanguageModel>,
    max_prompt_rows: usize,
}

impl ResponseComposer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            llm,
            max_prompt_rows: DEFAULT_MAX_PROMPT_ROWS,
        }
    }

    pub fn with_max_prompt_rows(mut self, max_prompt_rows: usize) -> Self {
        self.max_prompt_rows = max_prompt_rows.max(1);
        self
    }

    /// `review` is the reviewer's narrative when `sql` is a corrected statement.
    pub async fn compose(
        &self,
        question: &str,
        sql: &SqlCandidate,
        review: Option<&str>,
        rows: &RowSet,
    ) -> Result<String> {
        let summary = summarize_rows(rows, self.max_prompt_rows);
        let prompt = compose_answer_prompt(question, sql.as_str(), review, &summary, rows.is_empty());

        let answer = self.llm.complete(&prompt).await.map_err(|e| {
            error!("Error generating natural language response: {}", e);
            e
        })?;

        let answer = answer
            .trim()
            .trim_start_matches("Natural Language Response:")
            .trim()
            .to_string();
        if answer.is_empty() {
            return Err(AgentError::Llm(
                "Language model returned an empty answer".to_string(),
            ));
        }

        debug!(answer_chars = answer.len(), "Composed answer");
        Ok(answer)
    }
}

/// Compact pipe-delimited rendering of at most `max_rows` rows.
pub fn summarize_rows(rows: &RowSet, max_rows: usize) -> String {
    if rows.is_empty() {
        return "No rows returned.".to_string();
    }

    let columns: Vec<String> = if rows.columns.is_empty() {
        rows.rows[0].keys().cloned().collect()
    } else {
        rows.columns.clone()
    };

    let mut lines = Vec::with_capacity(max_rows.min(rows.len()) + 3);
    lines.push(format!(
        "Total rows: {}. Columns: {}",
        rows.len(),
        columns.join(", ")
    ));
    lines.push(columns.join(" | "));
    for record in rows.rows.iter().take(max_rows) {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| {
                let text = record.get(c).map(display_value).unwrap_or_default();
                truncate_cell(&text.replace('\n', " "))
            })
            .collect();
        lines.push(cells.join(" | "));
    }
    if rows.len() > max_rows {
        lines.push(format!(
            "({} more rows not shown)",
            rows.len() - max_rows
        ));
    }
    lines.join("\n")
}

fn truncate_cell(text: &str) -> String {
    if text.chars().count() <= MAX_CELL_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(MAX_CELL_CHARS).collect();
        format!("{}...", cut)
    }
}
