//! Hierarchy Engine CLI
//!
//! Benchmark and diagnostics front end for the hierarchy engine.
//!
//! ```text
//! hierarchy-engine bench   seed a synthetic hierarchy, warm it, time resolves
//! hierarchy-engine config  print the effective configuration as YAML
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hierarchy_engine::adapters::{InMemoryHierarchyStore, InMemoryNetworkCache};
use hierarchy_engine::domain::MaterializedViews;
use hierarchy_engine::{
    BenchmarkHarness, EngineConfig, EntityType, GeoPoint, HierarchyEngine, HierarchyNode,
    ViewScope,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Hierarchy Engine - tiered entity cache and resolution
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "HIERARCHY_CONFIG")]
    config: Option<PathBuf>,

    /// L1 entry capacity (overrides the file)
    #[arg(long, env = "HIERARCHY_L1_CAPACITY")]
    l1_capacity: Option<usize>,

    /// L2 time-to-live in seconds (overrides the file)
    #[arg(long, env = "HIERARCHY_L2_TTL_SECONDS")]
    l2_ttl_seconds: Option<u64>,

    /// Store/view timeout in milliseconds (overrides the file)
    #[arg(long, env = "HIERARCHY_L3_TIMEOUT_MS")]
    l3_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Time resolves against a synthetic, warmed hierarchy
    Bench {
        /// Timed iterations
        #[arg(long, default_value = "1000")]
        iterations: usize,

        /// Resolves issued per iteration
        #[arg(long, default_value = "10")]
        lookups_per_iteration: u64,

        /// Untimed iterations before measuring
        #[arg(long, default_value = "10")]
        warmup: usize,

        /// Countries generated under each continent
        #[arg(long, default_value = "10")]
        countries: usize,

        /// Cities generated under each country
        #[arg(long, default_value = "20")]
        cities: usize,

        /// Skip the Prometheus dump
        #[arg(long)]
        no_metrics: bool,
    },

    /// Print the effective configuration
    Config,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;

    match args.command {
        Command::Config => {
            print!("{}", config.to_yaml()?);
        }
        Command::Bench {
            iterations,
            lookups_per_iteration,
            warmup,
            countries,
            cities,
            no_metrics,
        } => {
            run_bench(
                config,
                BenchOptions {
                    iterations,
                    lookups_per_iteration,
                    warmup,
                    countries,
                    cities,
                    print_metrics: !no_metrics,
                },
            )
            .await?;
        }
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(capacity) = args.l1_capacity {
        config.l1_capacity = capacity;
    }
    if let Some(ttl) = args.l2_ttl_seconds {
        config.l2_ttl_seconds = ttl;
    }
    if let Some(timeout) = args.l3_timeout_ms {
        config.l3_timeout_ms = timeout;
    }
    config.validate()?;
    Ok(config)
}

// =============================================================================
// Benchmark
// =============================================================================

struct BenchOptions {
    iterations: usize,
    lookups_per_iteration: u64,
    warmup: usize,
    countries: usize,
    cities: usize,
    print_metrics: bool,
}

const CONTINENTS: [(&str, f64, f64); 5] = [
    ("africa", 0.0, 20.0),
    ("asia", 35.0, 100.0),
    ("europe", 50.0, 10.0),
    ("north_america", 45.0, -100.0),
    ("south_america", -15.0, -60.0),
];

async fn run_bench(config: EngineConfig, options: BenchOptions) -> Result<()> {
    let store = Arc::new(InMemoryHierarchyStore::new());
    let ids = seed(&store, options.countries, options.cities)?;
    store.refresh(ViewScope::All).await?;
    info!(nodes = store.len(), "synthetic hierarchy seeded");

    let target = config.slo_p95_target();
    let engine = HierarchyEngine::start(
        config,
        store.clone(),
        store.clone(),
        Arc::new(InMemoryNetworkCache::new()),
    )?;

    // working set sized to the L1 so the timed loop measures the hit path
    let working_set: Vec<String> = ids
        .into_iter()
        .take(engine.config().l1_capacity)
        .collect();
    anyhow::ensure!(!working_set.is_empty(), "nothing to resolve");
    for id in &working_set {
        engine.resolve(id).await?;
    }

    let per_iteration = options.lookups_per_iteration;
    let report = BenchmarkHarness::new(options.iterations)
        .with_warmup(options.warmup)
        .run(|i| {
            let engine = &engine;
            let working_set = &working_set;
            async move {
                for n in 0..per_iteration {
                    let idx = (i as u64 * per_iteration + n) as usize % working_set.len();
                    engine.resolve(&working_set[idx]).await?;
                }
                Ok(per_iteration)
            }
        })
        .await?;

    println!("{}", report);
    println!("{}", engine.metrics().slo_report(target));
    println!("health: {}", engine.health().status);
    if options.print_metrics {
        println!();
        print!("{}", engine.metrics().render()?);
    }

    engine.shutdown().await;
    Ok(())
}

/// Continents, then countries, then cities; returns the city ids.
fn seed(
    store: &InMemoryHierarchyStore,
    countries: usize,
    cities: usize,
) -> hierarchy_engine::Result<Vec<String>> {
    let mut city_ids = Vec::with_capacity(CONTINENTS.len() * countries * cities);
    for (continent, lat, lon) in CONTINENTS {
        let root = HierarchyNode::root(continent, continent, continent)?;
        for c in 0..countries {
            let country_segment = format!("country_{}", c);
            let country = HierarchyNode::child_of(
                &root,
                format!("{}:{}", continent, country_segment),
                country_segment.as_str(),
                EntityType::Geographic,
                &country_segment,
            )?;
            for k in 0..cities {
                let city_segment = format!("city_{}", k);
                let offset = (c * cities + k) as f64 * 0.01;
                let city = HierarchyNode::child_of(
                    &country,
                    format!("{}:{}", country.entity_id, city_segment),
                    city_segment.as_str(),
                    EntityType::Geographic,
                    &city_segment,
                )?
                .with_coordinates(GeoPoint::new(lat + offset.min(10.0), lon + offset.min(10.0))?);
                city_ids.push(city.entity_id.clone());
                store.insert(city);
            }
            store.insert(country);
        }
        store.insert(root);
    }
    Ok(city_ids)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
