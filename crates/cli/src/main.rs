use std::io::Read;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kagami_api::{ApiError, MockApi, MockAssets};
use kagami_browse::{BrowseConfig, BrowsePage, QueryOrchestrator, ScrollCoordinator};
use kagami_codec::FilterCodec;
use kagami_core::{FilterState, QueryKey, SelectedFacet};
use kagami_persist::{DurableStore, SqliteStore};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

mod script;

use script::Step;

#[derive(Parser, Debug)]
#[command(name = "kagamictl", version, about = "Kagami browsing core CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode a shareable query string into filter state and facets
    Decode {
        /// Query string or full URL, e.g. "q=fate&facets=tag%3Ag1"
        query: String,
    },
    /// Encode {"state": .., "facets": [..]} JSON from stdin into a query string
    Encode,
    /// Print the cache key of a query string
    Key { query: String },
    /// Replay an orchestrator script against the in-process mock catalog
    Replay {
        /// Script file; one action per line
        script: String,
        #[arg(long = "catalog-size", default_value_t = 1000)]
        catalog_size: u64,
        #[arg(long = "delay-ms", default_value_t = 50)]
        delay_ms: u64,
    },
    /// Whole-catalog count through the durable aggregate cache
    Total {
        #[arg(long = "db", env = "KAGAMI_DB_PATH")]
        db: Option<String>,
    },
    /// Dump the durable store
    Inspect {
        #[arg(long = "db", env = "KAGAMI_DB_PATH")]
        db: Option<String>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct Encoded {
    state: FilterState,
    #[serde(default)]
    facets: Vec<SelectedFacet>,
}

#[derive(Debug, Serialize)]
struct ViewOut<'a> {
    page: u32,
    total_pages: u32,
    total: u64,
    phase: String,
    searching: bool,
    is_swapping: bool,
    empty: bool,
    error: Option<&'a str>,
    url: &'a str,
    titles: Vec<&'a str>,
}

fn init_tracing() {
    let env = std::env::var("KAGAMI_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KAGAMI_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KAGAMI_METRICS_ADDR; expected host:port");
        }
    }
}

fn open_store(db: Option<&str>) -> Result<SqliteStore> {
    match db {
        Some(path) => SqliteStore::open(path),
        None => SqliteStore::open_default(),
    }
}

fn print_view(orch: &QueryOrchestrator, output: Output) -> Result<()> {
    let v = orch.view();
    let out = ViewOut {
        page: v.page,
        total_pages: v.total_pages,
        total: v.total,
        phase: format!("{:?}", v.phase),
        searching: v.searching,
        is_swapping: v.is_swapping,
        empty: v.empty,
        error: v.error,
        url: orch.url(),
        titles: v.items.iter().take(5).map(|i| i.title.as_str()).collect(),
    };
    match output {
        Output::Human => {
            println!("page {}/{} • {} results • {}", out.page, out.total_pages, out.total, out.phase);
            if let Some(e) = out.error {
                println!("error: {e}");
            } else if out.empty {
                println!("(no results)");
            }
            for t in &out.titles {
                println!("  {t}");
            }
            println!("url: ?{}", out.url);
        }
        Output::Json => println!("{}", serde_json::to_string(&out)?),
    }
    Ok(())
}

async fn replay(steps: Vec<Step>, api: Arc<MockApi>, output: Output) -> Result<()> {
    let mut orch = QueryOrchestrator::new(api.clone(), Arc::new(MockAssets::default()), BrowseConfig::from_env());
    for step in steps {
        info!(step = ?step, "replay: step");
        match step {
            Step::Mount(q) => orch.mount(&q),
            Step::Query(q) => orch.set_query(&q),
            Step::Page(p) => orch.set_page(p),
            Step::Sort(k, d) => orch.set_sort(k, d),
            Step::Facet(f) => orch.add_facet(f),
            Step::Unfacet(kind, id) => orch.remove_facet(kind, &id),
            Step::Clear => orch.clear_filters(),
            Step::Retry => orch.retry(),
            Step::Density(d) => orch.set_density(d),
            Step::Fail(status) => api.fail_next(ApiError::Remote { status, message: format!("injected {status}") }),
            Step::Wait(d) => tokio::time::sleep(d).await,
            Step::Settle => orch.settle().await,
            Step::View => print_view(&orch, output)?,
        }
        orch.process_updates();
    }
    orch.settle().await;
    print_view(&orch, output)?;
    info!(requests = api.calls(), names = api.name_calls(), "replay: done");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let cfg = BrowseConfig::from_env();
    let codec = FilterCodec::new(cfg.filter_defaults());

    match cli.command {
        Commands::Decode { query } => {
            let decoded = codec.decode(&query);
            let canonical = codec.encode(&decoded.state, &decoded.facets);
            match cli.output {
                Output::Human => {
                    println!("canonical: ?{canonical}");
                    println!("filters:   {}", decoded.state.active_filters());
                    for f in &decoded.facets {
                        println!("  {:?} {} {}", f.mode, f.kind.as_str(), f.label());
                    }
                    if decoded.needs_names() {
                        println!("(some facets have no display name yet)");
                    }
                }
                Output::Json => {
                    let out = Encoded { state: decoded.state, facets: decoded.facets };
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
            }
        }
        Commands::Encode => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            let input: Encoded = serde_json::from_str(&buf).context("expected {\"state\": .., \"facets\": [..]}")?;
            let state = input.state.normalized(codec.defaults());
            println!("{}", codec.encode(&state, &input.facets));
        }
        Commands::Key { query } => {
            let decoded = codec.decode(&query);
            println!("{}", QueryKey::derive(&decoded.state, codec.defaults()));
        }
        Commands::Replay { script, catalog_size, delay_ms } => {
            let text = std::fs::read_to_string(&script).with_context(|| format!("reading {script}"))?;
            let steps = script::parse(&text)?;
            info!(script = %script, steps = steps.len(), "replay invoked");
            let api = Arc::new(
                MockApi::new().with_catalog_size(catalog_size).with_delay(Duration::from_millis(delay_ms)),
            );
            replay(steps, api, cli.output).await?;
        }
        Commands::Total { db } => {
            let store: Arc<dyn DurableStore> = Arc::new(open_store(db.as_deref())?);
            let orch = QueryOrchestrator::new(Arc::new(MockApi::new()), Arc::new(MockAssets::default()), cfg.clone());
            let page = BrowsePage::new("/browse", orch, ScrollCoordinator::global())
                .with_aggregates(store, cfg.aggregate_ttl);
            match page.catalog_total().await {
                Some(total) => println!("{total}"),
                None => anyhow::bail!("catalog total unavailable"),
            }
        }
        Commands::Inspect { db } => {
            let store = open_store(db.as_deref())?;
            let entries = store.entries()?;
            match cli.output {
                Output::Human => {
                    println!("KEY                          TS          BYTES");
                    for (k, v) in &entries {
                        println!("{:<28} {:<11} {}", k, v.ts, v.json.len());
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
            }
        }
    }
    Ok(())
}
