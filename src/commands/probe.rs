use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;

use jobharvest::config::Config;
use jobharvest::crawler::RunContext;
use jobharvest::ingest::IngestClient;
use jobharvest::models::{CrawlTarget, PriorityTier};

use super::BrowserHandle;

async fn probe_context(mut config: Config) -> Result<(Arc<RunContext>, BrowserHandle)> {
    // Probing never pushes records
    config.ingest.secret = None;
    let browser = BrowserHandle::launch(&config).await;
    let context = RunContext::from_config(config, browser.driver(), Utc::now().date_naive())?;
    Ok((Arc::new(context), browser))
}

pub async fn resolve(config: Config, origin: String, id: Option<String>) -> Result<()> {
    let mut target = CrawlTarget::new("", origin.trim_end_matches('/'), PriorityTier::Medium);
    target.id = id.unwrap_or_else(|| target.domain());

    let (context, browser) = probe_context(config).await?;

    println!("Resolving {} ({})", target.origin, target.id);
    let urls = context.discovery.resolve(&target).await;
    if urls.is_empty() {
        println!("  No working URLs found");
    }
    for url in &urls {
        println!("  {url}");
    }

    let details = context.discovery.detail_urls(&target);
    if !details.is_empty() {
        println!("  {} detail URLs buffered", details.len());
    }

    if let Err(e) = context.persist_state() {
        tracing::warn!(error = %e, "Failed to persist discovery state");
    }
    drop(context);
    browser.shutdown().await;
    Ok(())
}

pub async fn fetch(config: Config, url: String, budget: Option<u32>) -> Result<()> {
    let (context, browser) = probe_context(config).await?;

    let result = match budget {
        Some(budget) => context.orchestrator.fetch(&url, budget).await,
        None => context.orchestrator.fetch_default(&url).await,
    };
    drop(context);
    browser.shutdown().await;

    let page = result.with_context(|| format!("Fetch failed: {url}"))?;
    println!("URL:      {}", page.final_url);
    println!("Status:   {}", page.status);
    println!("Strategy: {}", page.strategy);
    println!("Bytes:    {}", page.body.len());
    Ok(())
}

pub async fn auth(config: Config) -> Result<()> {
    let client = IngestClient::new(&config.ingest).context("Ingest client unavailable")?;
    if client.test_auth().await? {
        println!("Ingest API accepted the secret");
        Ok(())
    } else {
        anyhow::bail!("Ingest API rejected the secret")
    }
}
