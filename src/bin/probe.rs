use clap::Parser;
use healthwatch::collection::CollectionService;
use healthwatch::collectors::{tags, MetricRecord};
use healthwatch::config::Config;
use healthwatch::health::HealthEvaluator;
use healthwatch::setup;
use healthwatch::storage::{InMemoryMetricStore, MetricRepository};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run every configured collector once and print what it returns", long_about = None)]
struct Args {
    /// Path to the TOML config (falls back to $HEALTHWATCH_CONFIG, then healthwatch.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Print records as JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("healthwatch=warn".parse()?))
        .init();

    let args = Args::parse();
    let config = Config::load(Path::new(&Config::resolve_path(args.config.as_deref())))?;

    // Probing never touches the configured store.
    let store: Arc<dyn MetricRepository> = Arc::new(InMemoryMetricStore::new());
    let collection = CollectionService::new(setup::build_collectors(&config)?, Arc::clone(&store));

    println!("Healthwatch Probe");
    println!("=================");
    println!("Collectors: {}\n", collection.collector_names().join(", "));

    let round = collection.run_cycle().await;
    let records = store.find_all()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        display_records(&records);
    }

    println!(
        "\n{} metrics collected (round {})",
        round.metrics_count,
        &round.id[..8]
    );
    for failed in &round.failed_collectors {
        println!("❌ {} failed, see log output", failed);
    }

    let applications: BTreeSet<&str> = records.iter().filter_map(|m| m.tag(tags::APPLICATION)).collect();
    if !applications.is_empty() {
        println!("\nApplication health:");
        let evaluator = HealthEvaluator::new(Arc::clone(&store));
        for app in applications {
            let health = evaluator.application_health(app)?;
            println!("  {:<20} {}", app, health.overall_status.as_str());
            for (metric, status) in &health.metrics {
                println!("    {:<24} {}", metric, status.as_str());
            }
        }
    }

    Ok(())
}

fn display_records(records: &[MetricRecord]) {
    let mut by_resource: BTreeMap<&str, Vec<&MetricRecord>> = BTreeMap::new();
    for record in records {
        by_resource.entry(record.resource_id()).or_default().push(record);
    }

    for (resource_id, records) in by_resource {
        let resource = records[0].resource();
        println!(
            "📊 {} ({}, {})",
            resource_id,
            resource.resource_type,
            resource.monitoring_system()
        );
        for m in records {
            let source = m.tag(tags::VALUE_SOURCE).map(|s| format!(" [{}]", s)).unwrap_or_default();
            println!("  {:<24} {:>14.2} {}{}", m.metric_name(), m.value(), m.unit(), source);
        }
    }
}
