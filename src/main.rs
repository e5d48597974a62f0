use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use spyne_nlq::db::{
    ConnectionLifecycleManager, DatabaseKind, DbError, SqlxConnectionProvider, TenantRegistry,
};
use spyne_nlq::execution_loop::{ErrorClassifier, ExecutionLoop, PipelineRequest};
use spyne_nlq::llm::{LlmAgent, LlmClient};
use spyne_nlq::session::{spawn_session_sweeper, InMemorySessionStore};
use spyne_nlq::sql::{sanitize, FallbackCatalog, SqlExtractor};
use spyne_nlq::{NlqConfig, NlqService, SchemaCache};
use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nlq")]
#[command(about = "Resilient natural-language query execution")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question against a tenant database and print the JSON response
    Ask {
        /// The question in natural language
        query: String,

        /// Tenant id from the tenant registry
        #[arg(short, long)]
        tenant: String,

        /// Session id, to carry conversation context between turns
        #[arg(long)]
        session: Option<String>,

        /// Tenant registry JSON (or set NLQ_TENANTS_FILE)
        #[arg(long)]
        tenants: Option<PathBuf>,

        /// Directory of <tenant>.json schema snapshots (or set NLQ_SCHEMA_DIR)
        #[arg(long)]
        schema_dir: Option<PathBuf>,

        /// Fallback catalog JSON (or set NLQ_FALLBACK_CATALOG)
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Maximum number of attempts (or set NLQ_MAX_ATTEMPTS)
        #[arg(long)]
        max_attempts: Option<u32>,

        /// OpenAI API key (or set OPENAI_API_KEY env var)
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Print the sanitized form of a statement (argument or stdin)
    Sanitize {
        sql: Option<String>,
    },
    /// Classify a database error message against an optional schema snapshot
    Classify {
        /// The raw error message
        message: String,

        /// Engine that produced the message: postgres or mysql
        #[arg(long, default_value = "postgres")]
        engine: String,

        /// The statement that failed
        #[arg(long, default_value = "")]
        sql: String,

        /// Schema snapshot JSON
        #[arg(long)]
        schema: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Ask {
            query,
            tenant,
            session,
            tenants,
            schema_dir,
            catalog,
            max_attempts,
            api_key,
        } => {
            let mut config = NlqConfig::from_env()?;
            config.tenants_file = tenants.or(config.tenants_file);
            config.schema_dir = schema_dir.or(config.schema_dir);
            config.fallback_catalog = catalog.or(config.fallback_catalog);
            config.max_attempts = max_attempts.unwrap_or(config.max_attempts);
            config.openai_api_key = api_key.or(config.openai_api_key);
            run_ask(config, &query, &tenant, session.as_deref()).await
        }
        Commands::Sanitize { sql } => {
            let raw = match sql {
                Some(sql) => sql,
                None => {
                    let mut buffer = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buffer)
                        .context("reading statement from stdin")?;
                    buffer
                }
            };
            let cleaned = sanitize(&raw);
            if cleaned.is_empty() {
                bail!("statement rejected or empty after sanitization");
            }
            println!("{}", cleaned);
            Ok(())
        }
        Commands::Classify {
            message,
            engine,
            sql,
            schema,
        } => {
            let kind: DatabaseKind = engine.parse().map_err(anyhow::Error::msg)?;
            let snapshot = schema
                .map(|path| SchemaCache::load_file(&path))
                .transpose()?;
            let diagnosis = ErrorClassifier::default().classify(
                &DbError::query(message, None),
                kind,
                &sql,
                snapshot.as_ref(),
            );
            println!("{}", serde_json::to_string_pretty(&diagnosis)?);
            Ok(())
        }
    }
}

async fn run_ask(config: NlqConfig, query: &str, tenant: &str, session: Option<&str>) -> Result<()> {
    let Some(tenants_file) = &config.tenants_file else {
        bail!("no tenant registry: pass --tenants or set NLQ_TENANTS_FILE");
    };
    let Some(api_key) = config.openai_api_key.clone() else {
        bail!("no API key: pass --api-key or set OPENAI_API_KEY");
    };

    let registry = TenantRegistry::load(tenants_file)
        .with_context(|| format!("loading {}", tenants_file.display()))?;
    let catalog = match &config.fallback_catalog {
        Some(path) => FallbackCatalog::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => FallbackCatalog::healthcare(),
    };
    let dialects: HashMap<String, DatabaseKind> = registry
        .tenants
        .iter()
        .map(|(id, t)| (id.clone(), t.kind))
        .collect();

    let schema = Arc::new(SchemaCache::new(config.schema_dir.clone()));
    let provider = SqlxConnectionProvider::new(registry, config.query_timeout);
    let connections = Arc::new(ConnectionLifecycleManager::new(Arc::new(provider)));
    let agent = LlmAgent::new(
        LlmClient::new(api_key, config.openai_model.clone(), config.openai_base_url.clone()),
        schema.clone(),
    )
    .with_dialects(dialects);

    let pipeline = ExecutionLoop::new(Arc::new(agent), schema, connections, SqlExtractor::new(catalog))
        .with_max_attempts(config.max_attempts)
        .with_retry_on_zero_rows(config.retry_on_zero_rows);

    let sessions = Arc::new(InMemorySessionStore::new());
    let sweeper = spawn_session_sweeper(sessions.clone(), config.session_ttl, Duration::from_secs(60));
    let service = NlqService::new(Arc::new(pipeline), sessions, config.history_turns);

    info!("Asking tenant {}: {}", tenant, query);
    let response = service
        .ask(session, PipelineRequest::new(query, tenant))
        .await;
    sweeper.abort();

    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.success {
        std::process::exit(2);
    }
    Ok(())
}
