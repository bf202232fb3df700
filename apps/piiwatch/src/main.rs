use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use piiwatch_detect::{run_detection, HttpEntityModel, Matcher};
use piiwatch_judge::{run_verification, LlmJudge, LlmJudgeConfig};
use piiwatch_train::{run_training, HttpTuner, HttpTunerConfig};

mod config;
mod sources;

use config::Config;

/// Staged PII leak pipeline: detect candidates, verify them through the
/// judgment oracle, and fine-tune the entity model on confirmed leaks.
#[derive(Parser)]
#[command(name = "piiwatch", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "piiwatch.toml")]
    config: String,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Scan configured sources and queue truly-new candidates.
    Detect,
    /// Drain the pending queue through the judgment oracle.
    Verify,
    /// Fine-tune the entity model on confirmed leaks.
    Train,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let client = reqwest::Client::builder()
        .timeout(cfg.http_timeout())
        .build()
        .context("building http client")?;

    match cli.cmd {
        Cmd::Detect => detect(&cfg, client).await?,
        Cmd::Verify => verify(&cfg, client).await?,
        Cmd::Train => train(&cfg, client).await?,
    }
    info!(
        finished = %chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "stage complete"
    );
    Ok(())
}

async fn detect(cfg: &Config, client: reqwest::Client) -> Result<()> {
    let base_url = cfg
        .model
        .base_url
        .clone()
        .context("model.base_url is not configured")?;
    let model = HttpEntityModel::new(
        client.clone(),
        base_url,
        cfg.model.max_chunk_bytes.unwrap_or(4000),
    );
    let matcher = Matcher::new(Arc::new(model));
    // No detector without a working model: probe before fetching anything.
    matcher
        .model()
        .ready()
        .await
        .context("entity runtime readiness probe failed")?;
    let pages = sources::gather(&cfg.sources, &client, cfg.fetch_delay()).await;
    if pages.is_empty() {
        info!("no readable sources configured; nothing to scan");
        return Ok(());
    }
    run_detection(&cfg.store_paths(), &matcher, pages).await?;
    Ok(())
}

async fn verify(cfg: &Config, client: reqwest::Client) -> Result<()> {
    let base_url = cfg
        .oracle
        .base_url
        .clone()
        .context("oracle.base_url is not configured")?;
    let key_env = cfg
        .oracle
        .api_key_env
        .clone()
        .unwrap_or_else(|| "PIIWATCH_ORACLE_API_KEY".to_string());
    let api_key = std::env::var(&key_env)
        .with_context(|| format!("oracle bearer key missing: set {key_env}"))?;
    let judge = LlmJudge::new(
        client,
        LlmJudgeConfig {
            base_url,
            api_key,
            model: cfg.oracle.model.clone().unwrap_or_else(|| "judge-1".to_string()),
            max_tokens: cfg.oracle.max_tokens.unwrap_or(120),
        },
    );
    run_verification(&cfg.store_paths(), &judge, cfg.oracle_delay()).await?;
    Ok(())
}

async fn train(cfg: &Config, client: reqwest::Client) -> Result<()> {
    let base_url = cfg
        .trainer
        .base_url
        .clone()
        .context("trainer.base_url is not configured")?;
    let tuner = HttpTuner::new(
        client,
        HttpTunerConfig {
            base_url,
            checkpoint_dir: cfg.checkpoint_dir(),
            base_model: cfg
                .trainer
                .base_model
                .clone()
                .unwrap_or_else(|| "roberta-base".to_string()),
        },
    );
    run_training(&cfg.store_paths(), &tuner).await?;
    Ok(())
}
