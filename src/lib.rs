pub mod agent;
pub mod composer;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod extract;
pub mod generator;
pub mod llm;
pub mod prompts;
pub mod render;
pub mod reviewer;
pub mod server;

pub use agent::{AgentResponse, CycleFailure, CycleStage, CycleStatus, ReviewReport, SqlAgent};
pub use config::AgentConfig;
pub use db::{Dialect, SchemaDescription, SchemaDescriptor, SqlDatabase};
pub use error::{AgentError, Result};
pub use executor::{ExecutionOutcome, QueryExecutor, Record, RowSet, SqlCandidate};
pub use llm::{LanguageModel, LlmClient};
