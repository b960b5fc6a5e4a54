//! Alert triage CLI - analyze Elastic Security alerts and annotate them in Kibana.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use alert_triage::config::{
    DEFAULT_ANALYST_URL, DEFAULT_MODEL, DEFAULT_PAGE_SIZE, DEFAULT_RULES_PAGE_SIZE, DEFAULT_SPACE,
    DEFAULT_TEMPERATURE, DEFAULT_WINDOW_DAYS,
};
use alert_triage::{
    AlertOutcome, AnalystConfig, ChatAnalyst, Credentials, ElasticsearchAlertSource, KibanaClient,
    Pipeline, PipelineConfig, RunSummary, StackConfig, TriageError,
};

/// Alert triage - AI analysis notes for Elastic Security alerts.
#[derive(Parser)]
#[command(name = "alert-triage")]
#[command(about = "AI triage for Elastic Security alerts")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true, env = "TRIAGE_JSON_LOGS")]
    json_logs: bool,

    #[command(flatten)]
    stack: StackArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StackArgs {
    /// Elasticsearch URL
    #[arg(long, global = true, env = "ELASTIC_URL")]
    elastic_url: Option<String>,

    /// Kibana URL
    #[arg(long, global = true, env = "KIBANA_URL")]
    kibana_url: Option<String>,

    /// Elastic API key
    #[arg(long, global = true, env = "ELASTIC_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Elastic username (with --password)
    #[arg(long, global = true, env = "ELASTIC_USERNAME")]
    username: Option<String>,

    /// Elastic password (with --username)
    #[arg(long, global = true, env = "ELASTIC_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Kibana space holding the alerts
    #[arg(long, global = true, env = "KIBANA_SPACE", default_value = DEFAULT_SPACE)]
    space: String,

    /// Verify TLS certificates
    #[arg(long, global = true, env = "TRIAGE_VERIFY_TLS", default_value_t = true, action = ArgAction::Set)]
    verify_tls: bool,

    /// Detection rules per `_find` page
    #[arg(long, global = true, env = "TRIAGE_RULES_PAGE_SIZE", default_value_t = DEFAULT_RULES_PAGE_SIZE)]
    rules_page_size: usize,
}

impl StackArgs {
    /// Validate connection settings. The Elasticsearch URL is checked later,
    /// by the commands that read alerts.
    fn into_config(self) -> Result<StackConfig, TriageError> {
        let elastic_url = self.elastic_url.unwrap_or_default();
        let kibana_url = self
            .kibana_url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| TriageError::Configuration("KIBANA_URL is required".to_string()))?;

        Ok(StackConfig {
            elastic_url,
            kibana_url,
            space: self.space,
            credentials: Credentials::resolve(self.api_key, self.username, self.password)?,
            verify_tls: self.verify_tls,
        })
    }
}

#[derive(Args)]
struct AnalystArgs {
    /// Chat-completions API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Chat-completions endpoint
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_ANALYST_URL)]
    openai_base_url: String,

    /// Model to use
    #[arg(long, env = "TRIAGE_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Sampling temperature (0.0-2.0)
    #[arg(long, env = "TRIAGE_TEMPERATURE", default_value_t = DEFAULT_TEMPERATURE)]
    temperature: f32,

    /// Completion length cap
    #[arg(long, env = "TRIAGE_MAX_TOKENS")]
    max_tokens: Option<u32>,

    /// Append prompts and responses to this NDJSON file
    #[arg(long, env = "TRIAGE_TRANSCRIPT")]
    transcript: Option<PathBuf>,

    /// Alerts processed at once
    #[arg(long, env = "TRIAGE_CONCURRENCY", default_value = "1")]
    concurrency: usize,

    /// Analysis attempts per alert
    #[arg(long, env = "TRIAGE_MAX_ATTEMPTS", default_value = "1")]
    max_attempts: u32,
}

impl AnalystArgs {
    fn config(&self) -> Result<AnalystConfig, TriageError> {
        let mut config = AnalystConfig::new(self.openai_api_key.clone().unwrap_or_default())?;
        config.endpoint.clone_from(&self.openai_base_url);
        config.model.clone_from(&self.model);
        config.temperature = self.temperature;
        config.max_tokens = self.max_tokens;
        config.transcript.clone_from(&self.transcript);
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List rules, fetch the window's alerts, analyze and annotate each one
    Run {
        /// Trailing window in days
        #[arg(long, env = "TRIAGE_WINDOW_DAYS", default_value_t = DEFAULT_WINDOW_DAYS)]
        days: u32,

        /// Alerts per scroll page
        #[arg(long, env = "TRIAGE_PAGE_SIZE", default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,

        #[command(flatten)]
        analyst: AnalystArgs,
    },

    /// List detection rules (read-only)
    Rules,

    /// Analyze and annotate specific alerts by id
    Reprocess {
        /// Alert id (repeatable)
        #[arg(long = "id", required = true)]
        ids: Vec<String>,

        #[command(flatten)]
        analyst: AnalystArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let rules_page_size = cli.stack.rules_page_size;
    let stack = cli.stack.into_config()?;
    let kibana = Arc::new(KibanaClient::new(&stack)?.with_rules_page_size(rules_page_size)?);

    match cli.command {
        Commands::Run {
            days,
            page_size,
            analyst,
        } => {
            let pipeline = build_pipeline(&stack, kibana, &analyst, days, page_size)?;
            let summary = pipeline.run().await.context("Triage run aborted")?;
            print_summary(&summary);
        }
        Commands::Rules => {
            let rules = kibana.list_rules().await?;
            println!("{} {}", "Rules found:".bold(), rules.len());
            for rule in &rules {
                let state = if rule.enabled {
                    "enabled".green()
                } else {
                    "disabled".dimmed()
                };
                println!("  {}  {}  [{state}]", rule.rule_id.cyan(), rule.name);
            }
        }
        Commands::Reprocess { ids, analyst } => {
            let pipeline =
                build_pipeline(&stack, kibana, &analyst, DEFAULT_WINDOW_DAYS, DEFAULT_PAGE_SIZE)?;
            let summary = pipeline.reprocess(&ids).await.context("Reprocessing aborted")?;
            print_summary(&summary);
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("alert_triage=debug,info")
        } else {
            EnvFilter::new("alert_triage=info,warn")
        }
    });

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn build_pipeline(
    stack: &StackConfig,
    kibana: Arc<KibanaClient>,
    analyst: &AnalystArgs,
    window_days: u32,
    page_size: usize,
) -> Result<Pipeline> {
    if stack.elastic_url.is_empty() {
        return Err(TriageError::Configuration("ELASTIC_URL is required".to_string()).into());
    }
    let source = Arc::new(ElasticsearchAlertSource::new(stack)?);
    let chat = Arc::new(ChatAnalyst::new(analyst.config()?)?);

    let config = PipelineConfig {
        window_days,
        page_size,
        concurrency: analyst.concurrency,
        max_attempts: analyst.max_attempts,
        retry_delay: Duration::from_secs(2),
    };

    Ok(Pipeline::new(kibana.clone(), source, chat, kibana, config))
}

fn print_summary(summary: &RunSummary) {
    println!();
    match summary.rules_found {
        Some(count) => println!("{} {count}", "Rules found:".bold()),
        None => println!("{} {}", "Rules found:".bold(), "unavailable".yellow()),
    }
    println!("{} {}", "Alerts found:".bold(), summary.alerts_found);

    for outcome in &summary.outcomes {
        match outcome {
            AlertOutcome::Annotated { alert_id } => {
                println!("  {} {alert_id}", "✓".green());
            }
            AlertOutcome::Failed(failure) => {
                println!("  {} {} - {}", "✗".red(), failure.alert_id, failure.reason);
            }
        }
    }

    let failures = summary.failures();
    println!(
        "{} {}/{}",
        "Annotated:".bold(),
        summary.annotated(),
        summary.outcomes.len()
    );
    if !failures.is_empty() {
        println!(
            "{} {} (re-run with `reprocess --id <ID>`)",
            "Failed:".bold().red(),
            failures.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("alert-triage").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_rules_needs_only_kibana() {
        let cli = parse(&["--kibana-url", "http://kibana:5601", "--api-key", "k", "rules"]);
        let stack = cli.stack.into_config().unwrap();

        assert_eq!(stack.kibana_api_root(), "http://kibana:5601/api");
        assert!(KibanaClient::new(&stack).is_ok());
    }

    #[test]
    fn test_run_requires_elasticsearch_url() {
        let cli = parse(&[
            "--kibana-url", "http://kibana:5601", "--api-key", "k",
            "run", "--openai-api-key", "sk-test",
        ]);
        let Commands::Run { analyst, .. } = cli.command else {
            panic!("expected run");
        };
        let stack = cli.stack.into_config().unwrap();
        let kibana = Arc::new(KibanaClient::new(&stack).unwrap());

        let err = build_pipeline(&stack, kibana, &analyst, 30, 100).err().unwrap();
        assert!(err.to_string().contains("ELASTIC_URL"));
    }

    #[test]
    fn test_missing_credentials_rejected_before_connectors() {
        let cli = parse(&["--kibana-url", "http://kibana:5601", "rules"]);
        let err = cli.stack.into_config().unwrap_err();
        assert!(matches!(err, TriageError::Configuration(_)));
    }

    #[test]
    fn test_analyst_settings_from_flags() {
        let cli = parse(&[
            "--kibana-url", "http://kibana:5601", "--api-key", "k",
            "reprocess", "--id", "a1", "--id", "a2",
            "--openai-api-key", "sk-test", "--temperature", "0.5", "--max-tokens", "800",
        ]);
        let Commands::Reprocess { ids, analyst } = cli.command else {
            panic!("expected reprocess");
        };
        assert_eq!(ids, ["a1", "a2"]);

        let config = analyst.config().unwrap();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_tokens, Some(800));
        assert!((config.temperature - 0.5).abs() < f32::EPSILON);
    }
}
