//! Query Reviewer
//!
//! Diagnoses a statement the database rejected and proposes a corrected one.

use crate::db::{Dialect, SchemaDescription};
use crate::error::Result;
use crate::executor::SqlCandidate;
use crate::extract::parse_review;
use crate::llm::LanguageModel;
use crate::prompts::review_sql_prompt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Diagnostic narrative plus the corrected candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewResult {
    pub narrative: String,
    pub corrected_sql: SqlCandidate,
}

#[derive(Clone)]
pub struct QueryReviewer {
    llm: Arc<dyn LanguageModel>,
    dialect: Dialect,
}

impl QueryReviewer {
    pub fn new(llm: Arc<dyn LanguageModel>, dialect: Dialect) -> Self {
        Self { llm, dialect }
    }

    pub async fn review(
        &self,
        question: &str,
        failed_sql: &SqlCandidate,
        error: &str,
        schema: &SchemaDescription,
    ) -> Result<ReviewResult> {
        let prompt = review_sql_prompt(
            self.dialect,
            schema.as_str(),
            question,
            failed_sql.as_str(),
            error,
        );

        info!("Sending failed SQL query for review");
        let response = self.llm.complete(&prompt).await.map_err(|e| {
            error!("Error reviewing SQL query: {}", e);
            e
        })?;

        let review = parse_review(self.dialect, &response).map_err(|e| {
            error!("Unusable review response: {}", e);
            e
        })?;

        debug!(
            narrative = %review.narrative,
            corrected = %review.corrected_sql,
            "SQL review complete"
        );
        Ok(review)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::extract::ExtractionError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingModel {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for RecordingModel {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    fn reviewer(reply: &str) -> (QueryReviewer, Arc<RecordingModel>) {
        let model = Arc::new(RecordingModel {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        (QueryReviewer::new(model.clone(), Dialect::MySql), model)
    }

    #[tokio::test]
    async fn test_review_parses_narrative_and_correction() {
        let (reviewer, model) = reviewer(
            r#"{"review": "column name misspelled", "corrected_query": "SELECT region, SUM(sale) FROM sales GROUP BY region;"}"#,
        );
        let failed = SqlCandidate::new("SELECT region, SUM(sale) FROM sales GROUP BY regoin;");

        let review = reviewer
            .review(
                "List sales by region",
                &failed,
                "Unknown column 'regoin'",
                &SchemaDescription::from("Table: sales"),
            )
            .await
            .unwrap();

        assert_eq!(review.narrative, "column name misspelled");
        assert_eq!(
            review.corrected_sql.as_str(),
            "SELECT region, SUM(sale) FROM sales GROUP BY region;"
        );
        let prompt = &model.prompts.lock().unwrap()[0];
        assert!(prompt.contains("List sales by region"));
        assert!(prompt.contains("GROUP BY regoin"));
        assert!(prompt.contains("Unknown column 'regoin'"));
        assert!(prompt.contains("Table: sales"));
    }

    #[tokio::test]
    async fn test_missing_correction_is_fatal() {
        let (reviewer, _) = reviewer(r#"{"review": "cannot fix", "corrected_query": ""}"#);
        let err = reviewer
            .review("q", &SqlCandidate::new("SELECT x"), "err", &SchemaDescription::from("s"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::Extraction(ExtractionError::MissingCorrection)
        ));
    }
}
