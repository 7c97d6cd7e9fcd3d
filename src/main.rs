use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sql_agent::config::AgentConfig;
use sql_agent::db::{SchemaDescriptor, SqlDatabase};
use sql_agent::llm::LlmClient;
use sql_agent::render::render_text;
use sql_agent::{server, SchemaDescription, SqlAgent};
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sql-agent")]
#[command(about = "Answer natural-language questions against a SQL database")]
#[command(version)]
struct Cli {
    /// Database URL, mysql://... or postgres://... (or set DATABASE_URL / SQL_* env vars)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// OpenAI API key (or set OPENAI_API_KEY env var)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Chat model name (or set OPENAI_MODEL env var)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Base URL of an OpenAI-compatible API (or set OPENAI_BASE_URL env var)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Verbose logging and per-cycle details
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question
    Ask {
        question: String,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask questions interactively
    Repl,
    /// Print the schema description given to the model
    Schema,
    /// Serve the question form and JSON API over HTTP
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mut config = AgentConfig::from_env()?;
    if let Some(url) = cli.database_url.clone() {
        config.database.url = Some(url);
    }
    if let Some(key) = cli.api_key.clone() {
        config.llm.api_key = Some(key);
    }
    if let Some(model) = cli.model.clone() {
        config.llm.model = model;
    }
    if let Some(base_url) = cli.base_url.clone() {
        config.llm.base_url = base_url.trim_end_matches('/').to_string();
    }

    match cli.command {
        Commands::Schema => {
            let database = SqlDatabase::connect(&config.database).await?;
            let schema = database.describe().await?;
            println!("{}", schema);
            database.close().await;
            Ok(())
        }
        command => run_agent(command, config, cli.debug).await,
    }
}

async fn run_agent(command: Commands, config: AgentConfig, debug: bool) -> Result<()> {
    config.validate()?;
    let database = Arc::new(SqlDatabase::connect(&config.database).await?);
    let schema = load_schema(database.as_ref()).await?;
    let llm = Arc::new(LlmClient::from_settings(&config.llm)?);
    info!("Using model {}", llm.model());

    let agent = SqlAgent::with_model(llm, database.clone(), database.dialect(), schema)
        .with_max_prompt_rows(config.max_prompt_rows);

    match command {
        Commands::Ask { question, json } => {
            let response = agent.ask(&question).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{}", render_text(&response, debug));
            }
        }
        Commands::Repl => run_repl(&agent, debug).await?,
        Commands::Serve { addr } => {
            server::serve(Arc::new(agent), &addr)
                .await
                .with_context(|| format!("HTTP server on {} stopped", addr))?;
        }
        Commands::Schema => println!("{}", agent.schema()),
    }

    database.close().await;
    Ok(())
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("info,sql_agent=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Describe the database once for the whole session.
async fn load_schema(database: &SqlDatabase) -> Result<SchemaDescription> {
    let schema = database
        .describe()
        .await
        .context("Failed to read database schema")?;
    if schema.is_empty() {
        warn!("Database has no tables; generated SQL will have nothing to refer to");
    }
    Ok(schema)
}

async fn run_repl(agent: &SqlAgent, mut debug: bool) -> Result<()> {
    println!("SQL Agent. Ask a question about your data.");
    println!("Commands: 'debug on', 'debug off', 'quit'");

    loop {
        print!("\nQuestion: ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        match input.to_lowercase().as_str() {
            "" => continue,
            "quit" | "exit" | "q" => break,
            "debug on" => {
                debug = true;
                println!("Debug mode enabled");
                continue;
            }
            "debug off" => {
                debug = false;
                println!("Debug mode disabled");
                continue;
            }
            _ => {}
        }

        let response = agent.ask(input).await;
        println!("\n{}", render_text(&response, debug));
    }

    println!("Goodbye!");
    Ok(())
}
