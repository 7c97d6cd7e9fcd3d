//! Orchestration Loop
//!
//! Generating -> Executing -> (Success | Reviewing) -> Executing -> (Success | Terminal Failure)
//!
//! A cycle reviews at most once, so it executes at most twice. A failed answer
//! composition leaves the retrieved rows intact.

use crate::composer::ResponseComposer;
use crate::db::{Dialect, SchemaDescription};
use crate::executor::{ExecutionOutcome, QueryExecutor, RowSet, SqlCandidate};
use crate::generator::SqlGenerator;
use crate::llm::LanguageModel;
use crate::reviewer::QueryReviewer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Where in the cycle something happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStage {
    Generating,
    Executing,
    Reviewing,
    Composing,
}

impl CycleStage {
    pub fn label(&self) -> &'static str {
        match self {
            CycleStage::Generating => "SQL generation",
            CycleStage::Executing => "SQL execution",
            CycleStage::Reviewing => "SQL review",
            CycleStage::Composing => "answer composition",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Answered,
    Failed,
}

/// What the reviewer changed, for display next to the final result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewReport {
    pub narrative: String,
    pub original_sql: SqlCandidate,
    pub original_error: String,
    pub corrected_sql: SqlCandidate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleFailure {
    pub stage: CycleStage,
    pub message: String,
    /// Database diagnostic that led here, when there was one
    pub database_error: Option<String>,
}

/// Caller-facing result of one question-answering cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub cycle_id: Uuid,
    pub question: String,
    pub status: CycleStatus,
    pub answer: Option<String>,
    /// Statement that succeeded, or the last one attempted
    pub sql: Option<SqlCandidate>,
    pub rows: Option<RowSet>,
    pub review: Option<ReviewReport>,
    pub failure: Option<CycleFailure>,
    pub composition_error: Option<String>,
    pub executions: u8,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AgentResponse {
    pub fn is_success(&self) -> bool {
        self.status == CycleStatus::Answered
    }

    /// Answer text with a fallback for when no narrative was produced.
    pub fn display_answer(&self) -> String {
        if let Some(answer) = &self.answer {
            return answer.clone();
        }
        match (&self.failure, &self.rows) {
            (Some(failure), _) => format!(
                "I encountered an error while processing your question during {}: {}",
                failure.stage.label(),
                failure.message
            ),
            (None, Some(rows)) if rows.is_empty() => {
                "I found no results for your question in the database.".to_string()
            }
            (None, Some(rows)) => format!(
                "I found {} results, but encountered an error formatting the response.",
                rows.len()
            ),
            (None, None) => "No answer was produced.".to_string(),
        }
    }
}

enum Step {
    Generating,
    Executing { sql: SqlCandidate },
    Reviewing { failed_sql: SqlCandidate, error: String },
}

enum Terminal {
    Succeeded { sql: SqlCandidate, rows: RowSet },
    Failed { sql: Option<SqlCandidate>, failure: CycleFailure },
}

/// Natural-language question answering over one database
pub struct SqlAgent {
    generator: SqlGenerator,
    executor: Arc<dyn QueryExecutor>,
    reviewer: QueryReviewer,
    composer: ResponseComposer,
    schema: SchemaDescription,
}

impl SqlAgent {
    pub fn new(
        generator: SqlGenerator,
        executor: Arc<dyn QueryExecutor>,
        reviewer: QueryReviewer,
        composer: ResponseComposer,
        schema: SchemaDescription,
    ) -> Self {
        Self {
            generator,
            executor,
            reviewer,
            composer,
            schema,
        }
    }

    /// Wire generator, reviewer and composer to one language model.
    pub fn with_model(
        llm: Arc<dyn LanguageModel>,
        executor: Arc<dyn QueryExecutor>,
        dialect: Dialect,
        schema: SchemaDescription,
    ) -> Self {
        Self::new(
            SqlGenerator::new(Arc::clone(&llm), dialect),
            executor,
            QueryReviewer::new(Arc::clone(&llm), dialect),
            ResponseComposer::new(llm),
            schema,
        )
    }

    pub fn with_max_prompt_rows(mut self, max_prompt_rows: usize) -> Self {
        self.composer = self.composer.with_max_prompt_rows(max_prompt_rows);
        self
    }

    pub fn schema(&self) -> &SchemaDescription {
        &self.schema
    }

    pub async fn ask(&self, question: &str) -> AgentResponse {
        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(cycle = %cycle_id, "Question: {}", question);

        let mut review: Option<ReviewReport> = None;
        let mut executions: u8 = 0;
        let mut step = Step::Generating;

        let terminal = loop {
            step = match step {
                Step::Generating => match self.generator.generate_sql(question, &self.schema).await {
                    Ok(sql) => Step::Executing { sql },
                    Err(e) => {
                        break Terminal::Failed {
                            sql: None,
                            failure: CycleFailure {
                                stage: CycleStage::Generating,
                                message: e.to_string(),
                                database_error: None,
                            },
                        }
                    }
                },
                Step::Executing { sql } => {
                    executions += 1;
                    info!(cycle = %cycle_id, attempt = executions, "Executing SQL: {}", sql);
                    match self.executor.execute(&sql).await {
                        ExecutionOutcome::Success { rows } => break Terminal::Succeeded { sql, rows },
                        ExecutionOutcome::Failure { error_message } if review.is_none() => {
                            warn!(
                                cycle = %cycle_id,
                                "Initial SQL query failed: {}. Attempting review and correction.",
                                error_message
                            );
                            Step::Reviewing {
                                failed_sql: sql,
                                error: error_message,
                            }
                        }
                        ExecutionOutcome::Failure { error_message } => {
                            error!(cycle = %cycle_id, "Corrected SQL query also failed: {}", error_message);
                            break Terminal::Failed {
                                sql: Some(sql),
                                failure: CycleFailure {
                                    stage: CycleStage::Executing,
                                    message: error_message.clone(),
                                    database_error: Some(error_message),
                                },
                            };
                        }
                    }
                }
                Step::Reviewing { failed_sql, error } => {
                    match self
                        .reviewer
                        .review(question, &failed_sql, &error, &self.schema)
                        .await
                    {
                        Ok(result) => {
                            info!(cycle = %cycle_id, "Re-executing with corrected SQL");
                            let corrected_sql = result.corrected_sql.clone();
                            review = Some(ReviewReport {
                                narrative: result.narrative,
                                original_sql: failed_sql,
                                original_error: error,
                                corrected_sql: result.corrected_sql,
                            });
                            Step::Executing { sql: corrected_sql }
                        }
                        Err(e) => {
                            break Terminal::Failed {
                                sql: Some(failed_sql),
                                failure: CycleFailure {
                                    stage: CycleStage::Reviewing,
                                    message: e.to_string(),
                                    database_error: Some(error),
                                },
                            }
                        }
                    }
                }
            };
        };

        let mut response = AgentResponse {
            cycle_id,
            question: question.to_string(),
            status: CycleStatus::Failed,
            answer: None,
            sql: None,
            rows: None,
            review,
            failure: None,
            composition_error: None,
            executions,
            started_at,
            finished_at: started_at,
        };

        match terminal {
            Terminal::Succeeded { sql, rows } => {
                info!(cycle = %cycle_id, rows = rows.len(), "Query succeeded");
                let narrative = response.review.as_ref().map(|r| r.narrative.as_str());
                match self.composer.compose(question, &sql, narrative, &rows).await {
                    Ok(answer) => response.answer = Some(answer),
                    Err(e) => {
                        warn!(cycle = %cycle_id, "Answer composition failed, returning raw rows: {}", e);
                        response.composition_error = Some(e.to_string());
                    }
                }
                response.status = CycleStatus::Answered;
                response.sql = Some(sql);
                response.rows = Some(rows);
            }
            Terminal::Failed { sql, failure } => {
                error!(
                    cycle = %cycle_id,
                    "Cycle failed during {}: {}",
                    failure.stage.label(),
                    failure.message
                );
                response.sql = sql;
                response.failure = Some(failure);
            }
        }

        response.finished_at = Utc::now();
        response
    }
}
