use anyhow::{Context, Result};
use chrono::Utc;

use jobharvest::config::Config;
use jobharvest::scheduler::{weekly_schedule, RotationScheduler};

pub fn plan(mut config: Config, slot: Option<i64>, json: bool) -> Result<()> {
    if slot.is_some() {
        config.run.run_slot_override = slot;
    }

    let scheduler = RotationScheduler::new();
    let now = Utc::now().naive_utc();
    let plan = scheduler.plan_run(now, &config.run)?;

    if json {
        let out = serde_json::to_string_pretty(&plan).context("Failed to serialize plan")?;
        println!("{out}");
        return Ok(());
    }

    println!("{}", scheduler.format_schedule());

    println!("Company buckets by day of week");
    println!("{:=<72}", "");
    for (day, buckets) in weekly_schedule() {
        let names: Vec<&str> = buckets.iter().map(|b| b.name).collect();
        println!("  day {day}: {}", names.join(", "));
    }

    let targets = plan.targets();
    println!("\nCurrent run ({})", plan.date);
    println!("{:=<72}", "");
    println!(
        "  Slot:        {} ({}{})",
        plan.slot.index,
        plan.slot.definition.name,
        if plan.slot.pinned { ", pinned" } else { "" }
    );
    println!("  Backlog:     {}", plan.backlog);
    match plan.posted_cutoff() {
        Some(cutoff) => println!("  Posted from: {cutoff}"),
        None => println!("  Posted from: any date"),
    }
    println!("  Queries:     {}", plan.query_space.len());
    println!("  Targets:     {}", targets.len());
    for target in targets.iter().take(20) {
        println!("    - {:<24} {:?} {}", target.id, target.priority, target.origin);
    }
    if targets.len() > 20 {
        println!("    ... and {} more", targets.len() - 20);
    }

    Ok(())
}
