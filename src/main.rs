use anyhow::{Context, Result};
use fgjscraper::{acquire, config::Config};
use reqwest::Client;
use std::{env, fs, path::PathBuf, time::Duration};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env_filter).init();
    info!("startup");

    // ─── 2) load settings ────────────────────────────────────────────
    let mut args = env::args().skip(1);
    let config_path = args
        .next()
        .unwrap_or_else(|| "config/settings.yaml".to_string());
    let limit_per_year: Option<usize> = match args.next() {
        Some(raw) => Some(
            raw.parse()
                .with_context(|| format!("per-year row cap `{raw}` is not a number"))?,
        ),
        None => None,
    };
    let cfg = Config::load(&config_path)?;
    info!(
        config = %config_path,
        years = cfg.api.resources.len(),
        ?limit_per_year,
        "configured"
    );

    // ─── 3) acquire & consolidate ────────────────────────────────────
    let client = Client::builder()
        .timeout(Duration::from_secs(120))
        .build()?;
    let dataset = acquire::acquire_all_years(&client, &cfg, limit_per_year).await;
    info!(
        rows = dataset.len(),
        columns = dataset.columns().len(),
        "consolidated dataset ready"
    );

    // ─── 4) hand off to downstream analysis ──────────────────────────
    let out_dir = PathBuf::from("data/processed");
    fs::create_dir_all(&out_dir)?;
    let out_path = out_dir.join("carpetas_consolidado.csv");
    let file = fs::File::create(&out_path)
        .with_context(|| format!("creating `{}`", out_path.display()))?;
    dataset.write_csv(file)?;
    info!("wrote {}", out_path.display());

    Ok(())
}
