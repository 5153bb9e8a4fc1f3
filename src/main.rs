use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use sprout::auth::{hash_token, mint_token, token_salt_from_env};
use sprout::client::OpenAiClient;
use sprout::config::SproutToml;
use sprout::orchestrator::{Orchestrator, OrchestratorConfig};
use sprout::request::{CurriculumStyle, EnergyLevel, GenerateRequest};
use sprout::server::{start_server, AppState, ServerConfig};
use sprout::store::MemoryStore;

#[derive(Parser)]
#[command(name = "sprout")]
#[command(version, about = "Schema-validated activity generation for early childhood classrooms")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "sprout.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
        /// Bind all interfaces and allow permissive CORS
        #[arg(long)]
        dev: bool,
    },
    /// Run one generation from the command line and print the result
    Generate {
        #[arg(long)]
        age_group: String,
        #[arg(long)]
        duration_minutes: u32,
        #[arg(long)]
        theme: String,
        #[arg(long)]
        group_size: u32,
        /// calm | medium | active
        #[arg(long)]
        energy_level: Option<String>,
        /// Play-based | Montessori-inspired | Reggio-inspired | Mixed
        #[arg(long)]
        curriculum_style: Option<String>,
        /// Ask for a concept diverging from --avoid entries
        #[arg(long)]
        regenerate: bool,
        /// Recent concept to avoid (repeatable)
        #[arg(long)]
        avoid: Vec<String>,
    },
    /// Mint a pilot token and print the hash plus a config seed snippet
    MintToken {
        #[arg(long)]
        institution_id: String,
        #[arg(long, default_value = "14")]
        expires_in_days: u32,
    },
    /// Parse the configuration file and report warnings
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config = SproutToml::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve { port, dev } => serve(config, port, dev).await,
        Commands::Generate {
            age_group,
            duration_minutes,
            theme,
            group_size,
            energy_level,
            curriculum_style,
            regenerate,
            avoid,
        } => {
            let request = GenerateRequest {
                // The CLI path runs without auth; the placeholder only has to
                // satisfy the shape check.
                pilot_token: mint_token(),
                age_group,
                duration_minutes,
                theme,
                group_size,
                energy_level: energy_level
                    .map(|value| parse_wire_enum::<EnergyLevel>("energy_level", &value))
                    .transpose()?,
                curriculum_style: curriculum_style
                    .map(|value| parse_wire_enum::<CurriculumStyle>("curriculum_style", &value))
                    .transpose()?,
                regenerate,
            };
            generate_once(config, request, avoid).await
        }
        Commands::MintToken {
            institution_id,
            expires_in_days,
        } => mint_token_cmd(&institution_id, expires_in_days),
        Commands::CheckConfig => check_config(&cli.config, &config),
    }
}

fn init_tracing(verbose: bool, json: bool) {
    use tracing_subscriber::EnvFilter;

    let default_filter = if verbose { "sprout=debug" } else { "sprout=info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Parse a CLI string through the same serde names the API accepts.
fn parse_wire_enum<T: serde::de::DeserializeOwned>(field: &str, value: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .with_context(|| format!("Invalid {}: '{}'", field, value))
}

async fn serve(config: SproutToml, port_override: Option<u16>, dev: bool) -> Result<()> {
    let warnings = config.validate();
    for warning in &warnings {
        tracing::warn!(%warning, "config warning");
    }

    let token_salt = token_salt_from_env()?;
    let generator = OpenAiClient::from_env(&config.generation.model)
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    let store = MemoryStore::with_seed_tokens(&config.pilot_tokens);
    let port = port_override.unwrap_or(config.server.port);

    let state = AppState {
        store: Arc::new(store),
        generator: Arc::new(generator),
        config,
        token_salt,
        admin_secret: std::env::var("ADMIN_SECRET").ok().filter(|s| !s.is_empty()),
    };

    start_server(state, ServerConfig { port, dev_mode: dev }).await
}

async fn generate_once(
    config: SproutToml,
    request: GenerateRequest,
    avoid: Vec<String>,
) -> Result<()> {
    request
        .validate(&config.domain)
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;

    let generator = OpenAiClient::from_env(&config.generation.model)
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    let orchestrator = Orchestrator::new(
        Arc::new(generator),
        OrchestratorConfig::from_generation(&config.generation),
    );

    match orchestrator.run(&request, &config.domain, &avoid).await {
        Ok(outcome) => {
            let output = serde_json::json!({
                "schema_version": outcome.activity.schema_version,
                "activity": outcome.activity.activity,
                "outline": outcome.outline,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(err) => {
            let output = serde_json::json!({
                "error": {
                    "code": err.code(),
                    "message": err.to_string(),
                    "retryable": err.retryable(),
                }
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            std::process::exit(1);
        }
    }
}

fn mint_token_cmd(institution_id: &str, expires_in_days: u32) -> Result<()> {
    let token_salt = token_salt_from_env()?;
    let token = mint_token();
    let token_hash = hash_token(&token_salt, &token);
    let expires_at = chrono::Utc::now() + chrono::Duration::days(expires_in_days as i64);

    println!("pilot_token: {}", token);
    println!("token_hash:  {}", token_hash);
    println!("expires_at:  {}", expires_at.to_rfc3339());
    println!();
    println!("Add to sprout.toml to seed this token at startup:");
    println!();
    println!("[[pilot_tokens]]");
    println!("token_hash = \"{}\"", token_hash);
    println!("institution_id = \"{}\"", institution_id);
    println!("expires_at = \"{}\"", expires_at.to_rfc3339());
    Ok(())
}

fn check_config(path: &PathBuf, config: &SproutToml) -> Result<()> {
    let warnings = config.validate();
    if warnings.is_empty() {
        println!("{}: OK", path.display());
    } else {
        println!("{}: {} warning(s)", path.display(), warnings.len());
        for warning in warnings {
            println!("  - {}", warning);
        }
    }
    Ok(())
}
