//! SQL Generator
//!
//! Asks the language model for one statement answering the question.

use crate::db::{Dialect, SchemaDescription};
use crate::error::Result;
use crate::executor::SqlCandidate;
use crate::extract::extract_sql;
use crate::llm::LanguageModel;
use crate::prompts::generate_sql_prompt;
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Clone)]
pub struct SqlGenerator {
    llm: Arc<dyn LanguageModel>,
    dialect: Dialect,
}

impl SqlGenerator {
    pub fn new(llm: Arc<dyn LanguageModel>, dialect: Dialect) -> Self {
        Self { llm, dialect }
    }

    /// One LLM call; no validation beyond extracting a single statement.
    pub async fn generate_sql(&self, question: &str, schema: &SchemaDescription) -> Result<SqlCandidate> {
        let prompt = generate_sql_prompt(self.dialect, schema.as_str(), question);

        let response = self.llm.complete(&prompt).await.map_err(|e| {
            error!("Error generating SQL query: {}", e);
            e
        })?;

        let sql = extract_sql(self.dialect, &response).map_err(|e| {
            error!("Unusable SQL generation response: {}", e);
            e
        })?;

        debug!("Generated SQL query: {}", sql);
        Ok(sql)
    }
}
