//! CLI binary for routing name-generation requests across providers.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use nameforge_llm::{
    GenerateRequest, GenerateResponse, GenerationOptions, Orchestrator, RoutingContext, Settings,
};

#[derive(Parser)]
#[command(name = "nameforge", version, about = "Multi-provider name generation router")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON settings file (environment variables still apply on top)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(clap::Args)]
struct RouteArgs {
    /// Provider to try first
    #[arg(short, long)]
    provider: Option<String>,

    /// Providers to skip when the capability strategy is active (comma separated)
    #[arg(long, value_delimiter = ',')]
    avoid: Vec<String>,

    /// Prefer providers that can stream
    #[arg(long)]
    streaming: bool,
}

#[derive(clap::Args)]
struct GenerateArgs {
    /// Number of items to return
    #[arg(short = 'n', long, default_value = "5")]
    count: usize,

    #[command(flatten)]
    route: RouteArgs,

    /// Skip the result cache
    #[arg(long)]
    no_cache: bool,

    /// Report failure instead of synthesizing placeholder items
    #[arg(long)]
    no_fallback: bool,

    #[arg(long)]
    temperature: Option<f64>,

    #[arg(long)]
    max_tokens: Option<u32>,

    /// Model override for the chosen provider
    #[arg(long)]
    model: Option<String>,
}

impl GenerateArgs {
    fn request(&self, prompt: &str) -> GenerateRequest {
        let mut options = GenerationOptions::default();
        options.temperature = self.temperature;
        options.max_tokens = self.max_tokens;
        options.model = self.model.clone();

        let mut request = GenerateRequest::new(prompt, self.count)
            .with_options(options)
            .avoiding(self.route.avoid.iter().cloned());
        request.preferred_provider = self.route.provider.clone();
        request.use_cache = !self.no_cache;
        request.allow_fallback = !self.no_fallback;
        request.needs_streaming = self.route.streaming;
        request
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Generate items for a prompt
    Generate {
        /// Prompt text
        prompt: String,

        #[command(flatten)]
        args: GenerateArgs,
    },

    /// Show the candidate order for a request without calling anything
    Route {
        #[command(flatten)]
        route: RouteArgs,
    },

    /// List configured providers with their call counters
    Providers,

    /// List models per provider
    Models,

    /// Send a short test request to one provider
    Test {
        /// Provider name
        provider: String,
    },

    /// Generate for every line of a file, then report cache statistics
    Batch {
        /// File with one prompt per line
        file: PathBuf,

        #[command(flatten)]
        args: GenerateArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing (stderr keeps stdout clean for JSON)
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .with_writer(std::io::stderr)
        .init();

    let settings = load_settings(cli.config.as_deref())?;
    let orchestrator = Orchestrator::from_settings(&settings);

    match cli.command {
        Commands::Generate { prompt, args } => {
            cmd_generate(&orchestrator, &prompt, &args).await?;
        }
        Commands::Route { route } => {
            cmd_route(&orchestrator, &route)?;
        }
        Commands::Providers => {
            print_json(&orchestrator.provider_status())?;
        }
        Commands::Models => {
            print_json(&orchestrator.list_models().await)?;
        }
        Commands::Test { provider } => {
            cmd_test(&orchestrator, &provider).await?;
        }
        Commands::Batch { file, args } => {
            cmd_batch(&orchestrator, &file, &args).await?;
        }
    }

    Ok(())
}

/// `RUST_LOG` when set, otherwise `debug` with `--verbose` and `info` without.
fn log_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }))
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let settings = match path {
        Some(path) => Settings::from_file(path)?,
        None => Settings::from_env(),
    };
    if settings.enabled_providers().next().is_none() {
        tracing::warn!("No provider has an API key; requests will use the fallback");
    }
    Ok(settings)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_generate(
    orchestrator: &Orchestrator,
    prompt: &str,
    args: &GenerateArgs,
) -> anyhow::Result<()> {
    let result = orchestrator.generate(&args.request(prompt)).await;
    print_json(&GenerateResponse::from(&result))?;
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_route(orchestrator: &Orchestrator, route: &RouteArgs) -> anyhow::Result<()> {
    let context = RoutingContext {
        avoid: route.avoid.iter().cloned().collect(),
        needs_streaming: route.streaming,
    };
    let order = orchestrator.route(route.provider.as_deref(), &context);
    print_json(&serde_json::json!({
        "strategy": orchestrator.strategy_name(),
        "order": order,
    }))
}

async fn cmd_test(orchestrator: &Orchestrator, provider: &str) -> anyhow::Result<()> {
    let result = orchestrator.test_provider(provider).await;
    print_json(&GenerateResponse::from(&result))?;
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

fn read_prompts(path: &Path) -> anyhow::Result<Vec<String>> {
    let source = std::fs::read_to_string(path)?;
    Ok(source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

async fn cmd_batch(orchestrator: &Orchestrator, file: &Path, args: &GenerateArgs) -> anyhow::Result<()> {
    let prompts = read_prompts(file)?;
    tracing::info!(prompts = prompts.len(), file = %file.display(), "Running batch");

    let mut results = Vec::with_capacity(prompts.len());
    for prompt in &prompts {
        let result = orchestrator.generate(&args.request(prompt)).await;
        results.push(serde_json::json!({
            "prompt": prompt,
            "response": GenerateResponse::from(&result),
        }));
    }

    print_json(&serde_json::json!({
        "results": results,
        "cache": orchestrator.cache_stats(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn generate_args_build_request() {
        let cli = Cli::parse_from([
            "nameforge",
            "generate",
            "一位公主",
            "-n",
            "3",
            "--provider",
            "aliyun",
            "--avoid",
            "baidu,paiou",
            "--no-cache",
            "--temperature",
            "0.9",
        ]);
        let Commands::Generate { prompt, args } = cli.command else {
            panic!("expected generate");
        };
        let request = args.request(&prompt);
        assert_eq!(request.prompt, "一位公主");
        assert_eq!(request.count, 3);
        assert_eq!(request.preferred_provider.as_deref(), Some("aliyun"));
        assert_eq!(request.avoid, vec!["baidu", "paiou"]);
        assert!(!request.use_cache);
        assert!(request.allow_fallback);
        assert_eq!(request.options.temperature, Some(0.9));
        assert_eq!(request.options.max_tokens, None);
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::parse_from(["nameforge", "providers", "--verbose", "--config", "nf.json"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("nf.json")));
    }

    #[test]
    fn log_filter_defaults_follow_verbosity() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert_eq!(log_filter(true).to_string(), "debug");
        assert_eq!(log_filter(false).to_string(), "info");
    }

    #[test]
    fn read_prompts_skips_blank_and_comment_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# warriors\n一位勇敢的战士\n\n  a wise scholar  ").unwrap();
        let prompts = read_prompts(file.path()).unwrap();
        assert_eq!(prompts, vec!["一位勇敢的战士", "a wise scholar"]);
    }
}
