pub mod agent;
pub mod agent_prompts;
pub mod config;
pub mod db;
pub mod error;
pub mod execution_loop;
pub mod fuzzy_matcher;
pub mod llm;
pub mod observability;
pub mod schema;
pub mod service;
pub mod session;
pub mod sql;

pub use agent::{GenerationAgent, GenerationEvent, GenerationOutput, PromptContext};
pub use config::NlqConfig;
pub use error::{NlqError, Result};
pub use execution_loop::{
    DiagnosisKind, ErrorDiagnosis, ExecutionLoop, PipelineRequest, PipelineResponse,
};
pub use schema::{SchemaCache, SchemaProvider, SchemaSnapshot};
pub use service::NlqService;
