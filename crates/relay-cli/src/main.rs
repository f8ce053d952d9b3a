//! CLI binary driving the Relay gateway.

use std::io::Write;

use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use relay_llm::{
    AdapterRegistry, BatchRequest, Credentials, Gateway, GatewayEvent, GenerationRequest, RelayConfig,
};

#[derive(Parser)]
#[command(name = "relay", version, about = "Provider-agnostic LLM gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Per-request timeout in seconds (overrides RELAY_TIMEOUT_SECS)
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a single response and print it as JSON
    Generate(PromptArgs),

    /// Stream a response as server-sent event frames
    Stream(PromptArgs),

    /// Run the same prompt several times concurrently
    Batch {
        /// Number of concurrent generations
        #[arg(short = 'n', long, default_value_t = 1)]
        iterations: usize,

        #[command(flatten)]
        prompt: PromptArgs,
    },

    /// List models whose provider has an API key configured
    Models {
        /// Show the full catalog with availability flags
        #[arg(long)]
        all: bool,
    },

    /// Print the service health payload
    Health,
}

#[derive(Args)]
struct PromptArgs {
    /// Model id, e.g. gpt-4o, claude-sonnet-4-20250514, gemini-2.5-flash
    #[arg(short, long)]
    model: String,

    /// System prompt
    #[arg(short, long)]
    system: Option<String>,

    #[arg(long, default_value_t = 1.0)]
    temperature: f32,

    #[arg(long, default_value_t = 1.0)]
    top_p: f32,

    #[arg(long, default_value_t = 2048)]
    max_tokens: u32,

    /// User prompt
    prompt: String,
}

impl PromptArgs {
    fn into_request(self, stream: bool) -> GenerationRequest {
        let mut request = GenerationRequest::new(self.model, self.prompt)
            .with_temperature(self.temperature)
            .with_top_p(self.top_p)
            .with_max_tokens(self.max_tokens)
            .with_stream(stream);
        if let Some(system) = self.system {
            request = request.with_system_prompt(system);
        }
        request
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup tracing; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = RelayConfig::from_env()?;
    if let Some(secs) = cli.timeout_secs {
        config = config.with_timeout_secs(secs);
    }
    tracing::debug!(
        timeout_secs = config.timeout_secs,
        max_attempts = config.max_attempts,
        "Loaded configuration"
    );
    let gateway = Gateway::new(AdapterRegistry::new(Credentials::from_env(), config)?);

    match cli.command {
        Commands::Generate(prompt) => cmd_generate(&gateway, prompt).await?,
        Commands::Stream(prompt) => cmd_stream(&gateway, prompt).await?,
        Commands::Batch { iterations, prompt } => {
            let batch = BatchRequest::new(prompt.into_request(false), iterations);
            cmd_batch(&gateway, &batch).await?;
        }
        Commands::Models { all } => cmd_models(&gateway, all)?,
        Commands::Health => println!("{}", gateway.health()),
    }

    Ok(())
}

async fn cmd_generate(gateway: &Gateway, prompt: PromptArgs) -> anyhow::Result<()> {
    let response = gateway.generate(&prompt.into_request(false)).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if !response.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_stream(gateway: &Gateway, prompt: PromptArgs) -> anyhow::Result<()> {
    let mut events = gateway.stream(&prompt.into_request(true))?;

    while let Some(event) = events.next().await {
        // Lock per frame; never held across an await.
        write_frame(&mut std::io::stdout().lock(), &event)?;
    }
    Ok(())
}

fn write_frame(out: &mut impl Write, event: &GatewayEvent) -> std::io::Result<()> {
    out.write_all(event.to_sse().as_bytes())?;
    out.flush()
}

async fn cmd_batch(gateway: &Gateway, batch: &BatchRequest) -> anyhow::Result<()> {
    let response = gateway.batch(&batch.request, batch.iterations).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    let failed = response
        .results
        .iter()
        .filter(|r| r.error_message.is_some())
        .count();
    if failed > 0 {
        eprintln!("{failed} of {} iterations failed", response.results.len());
    }
    Ok(())
}

fn cmd_models(gateway: &Gateway, all: bool) -> anyhow::Result<()> {
    let body = if all {
        serde_json::json!({ "models": gateway.list_models() })
    } else {
        serde_json::json!({ "models": gateway.available_models() })
    };
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
