use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;

use jobharvest::config::Config;
use jobharvest::crawler::{CrawlPipeline, RunContext, StructuredDataAdapter};
use jobharvest::metrics;
use jobharvest::scheduler::RotationScheduler;
use jobharvest::storage::StateFile;

use super::BrowserHandle;

/// Command-line overrides for a run
#[derive(Debug, Default)]
pub struct RunOptions {
    pub slot: Option<i64>,
    pub backlog: bool,
    pub fresh_only: bool,
    pub test_mode: bool,
    pub max_urls: Option<usize>,
    pub dry_run: bool,
    pub metrics_out: Option<PathBuf>,
}

fn apply_options(config: &mut Config, options: &RunOptions) {
    if options.slot.is_some() {
        config.run.run_slot_override = options.slot;
    }
    if options.backlog {
        config.run.force_backlog = true;
        config.run.force_fresh_only = false;
    }
    if options.fresh_only {
        config.run.force_fresh_only = true;
        config.run.force_backlog = false;
    }
    if options.test_mode {
        config.run.test_mode = true;
    }
    if options.max_urls.is_some() {
        config.run.max_urls = options.max_urls;
    }
    if options.dry_run {
        config.ingest.secret = None;
        config.run.dry_run = true;
    }
}

pub async fn run(mut config: Config, options: RunOptions) -> Result<()> {
    apply_options(&mut config, &options);
    if !config.run.dry_run {
        config.require_ingest_secret()?;
    }
    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed");
    }

    println!("Starting harvest run");
    println!("====================");

    let now = Utc::now().naive_utc();
    let plan = RotationScheduler::new().plan_run(now, &config.run)?;
    println!(
        "Slot {} ({}), backlog: {}, targets: {}",
        plan.slot.index,
        plan.slot.definition.name,
        plan.backlog,
        plan.targets().len()
    );

    let browser = BrowserHandle::launch(&config).await;
    let state_dir = config.run.state_dir.clone();
    let context = Arc::new(RunContext::from_config(config, browser.driver(), now.date())?);
    println!("Fetch cascade: {}", context.orchestrator.strategy_names().join(" -> "));

    // Ctrl-C stops new fetches; workers drain and state is still saved
    let interrupt = {
        let context = Arc::clone(&context);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, finishing in-flight work");
                context.shutdown();
            }
        })
    };

    let pipeline = CrawlPipeline::new(Arc::clone(&context));
    let result = pipeline.run(&plan, Arc::new(StructuredDataAdapter)).await;
    interrupt.abort();
    let _ = interrupt.await;

    // Save state whatever happened to the run
    if let Err(e) = context.persist_state() {
        tracing::error!(error = %e, "Failed to persist run state");
    }

    let unsent = pipeline.take_unsent();
    if !unsent.is_empty() {
        let name = format!("unsent-{}.json", Utc::now().format("%Y%m%dT%H%M%S"));
        let file = StateFile::in_dir(&state_dir, &name);
        file.save(&unsent)
            .with_context(|| format!("Failed to save unsent records to {}", file.path().display()))?;
        println!("Saved {} unsent records to {}", unsent.len(), file.path().display());
    }

    let usage = context.usage();
    drop(pipeline);
    drop(context);
    browser.shutdown().await;

    if let Some(path) = &options.metrics_out {
        match metrics::encode_metrics() {
            Ok(text) => std::fs::write(path, text)
                .with_context(|| format!("Failed to write metrics to {}", path.display()))?,
            Err(e) => tracing::warn!(error = %e, "Failed to encode metrics"),
        }
    }

    let stats = result?;
    println!("\nRun complete");
    println!("============");
    println!("  Targets done:    {}", stats.targets);
    println!("  Unresolved:      {}", stats.unresolved);
    println!("  Skipped:         {}", stats.skipped);
    println!("  URLs fetched:    {}", stats.urls_fetched);
    println!("  Fetch failures:  {}", stats.failures);
    println!("  New postings:    {}", stats.records_emitted);
    println!("  Duplicates:      {}", stats.duplicates);
    println!("  Outside window:  {}", stats.out_of_window);
    println!("  Ingested:        {}", stats.ingested);
    println!("  Ingest failures: {}", stats.ingest_failures);
    println!("  Invalid records: {}", stats.invalid);
    println!("  Not yet due:     {}", stats.not_due);
    for meter in usage {
        match meter.limit {
            Some(limit) => println!("  {:<16} {}/{}", format!("{}:", meter.name), meter.used, limit),
            None => println!("  {:<16} {}", format!("{}:", meter.name), meter.used),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_options() {
        let mut config = Config::default();
        config.run.force_fresh_only = true;
        config.ingest.secret = Some("s".into());

        let options = RunOptions {
            slot: Some(-1),
            backlog: true,
            max_urls: Some(10),
            dry_run: true,
            ..Default::default()
        };
        apply_options(&mut config, &options);

        assert_eq!(config.run.run_slot_override, Some(-1));
        assert!(config.run.force_backlog);
        assert!(!config.run.force_fresh_only);
        assert_eq!(config.run.max_urls, Some(10));
        assert!(config.ingest.secret.is_none());
        assert!(config.run.dry_run);
    }
}
