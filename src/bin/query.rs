use clap::Parser;
use healthwatch::collectors::MetricRecord;
use healthwatch::health::HealthEvaluator;
use healthwatch::storage::{MetricRepository, SqliteMetricStore};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Query stored metrics from a Healthwatch SQLite database", long_about = None)]
struct Args {
    /// Database file (defaults to ~/.healthwatch/metrics.db)
    #[arg(long)]
    db: Option<String>,

    /// Show health of this application
    #[arg(short, long, conflicts_with = "resource")]
    app: Option<String>,

    /// Show the latest value of this resource's metric (requires --metric)
    #[arg(short, long, requires = "metric")]
    resource: Option<String>,

    #[arg(short, long)]
    metric: Option<String>,

    /// Output format: compact (one line) or verbose (with tags)
    #[arg(short, long, default_value = "compact")]
    format: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let verbose = match args.format.as_str() {
        "compact" => false,
        "verbose" => true,
        other => {
            eprintln!("Error: Invalid format '{}'. Use 'compact' or 'verbose'", other);
            std::process::exit(1);
        }
    };

    let store = Arc::new(SqliteMetricStore::new(args.db)?);

    if let Some(app) = &args.app {
        let evaluator = HealthEvaluator::new(store);
        let health = evaluator.application_health(app)?;
        if verbose {
            println!("Application: {}", health.application);
            println!("Overall: {}", health.overall_status.as_str());
            for (metric, status) in &health.metrics {
                println!("  {}: {}", metric, status.as_str());
            }
        } else {
            let parts: Vec<String> = health
                .metrics
                .iter()
                .map(|(metric, status)| format!("{}={}", metric, status.as_str()))
                .collect();
            println!("{} {} {}", health.application, health.overall_status.as_str(), parts.join(","));
        }
        return Ok(());
    }

    if let (Some(resource), Some(metric)) = (&args.resource, &args.metric) {
        match store.find_latest(resource, metric)? {
            Some(record) => print_record(&record, verbose),
            None => {
                eprintln!("No data for {}:{}", resource, metric);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let stats = store.stats()?;
    println!("📁 {}", store.db_path());
    println!("  Total metrics: {}", stats.total_metrics);
    println!("  Series: {}", stats.total_series);
    if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
        println!(
            "  Range: {} .. {}",
            oldest.format("%Y-%m-%d %H:%M:%S UTC"),
            newest.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}

fn print_record(record: &MetricRecord, verbose: bool) {
    if !verbose {
        println!("{} {}", record.value(), record.unit());
        return;
    }
    println!("Resource: {} ({})", record.resource_id(), record.resource().resource_type);
    println!("Metric: {}", record.metric_name());
    println!("Value: {} {}", record.value(), record.unit());
    println!("Timestamp: {}", record.timestamp().format("%Y-%m-%d %H:%M:%S UTC"));
    let mut tags: Vec<_> = record.tags().iter().collect();
    tags.sort();
    for (key, value) in tags {
        println!("  {} = {}", key, value);
    }
}
