use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use wpup_stats::config::Config;
use wpup_stats::models::CombinationSummary;
use wpup_stats::report::{report_chart_options, AreaChart, PieChart, Report};
use wpup_stats::storage;
use wpup_stats::DateRange;

#[derive(Parser)]
#[command(name = "wpup-report")]
#[command(about = "Query aggregated update statistics as JSON", long_about = None)]
struct Cli {
    /// Configuration file (default: ./wpup-stats.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every known slug
    Slugs,
    /// Area and pie chart data for one metric
    Chart {
        #[arg(long)]
        slug: String,
        #[arg(long)]
        metric: String,
        /// First day (YYYY-MM-DD), default 31 days before --to
        #[arg(long)]
        from: Option<String>,
        /// Last day (YYYY-MM-DD), default yesterday
        #[arg(long)]
        to: Option<String>,
    },
    /// Headline numbers for a slug
    Summary {
        #[arg(long)]
        slug: String,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
    /// Percentiles of metric2 per metric1 value on the last day
    Combinations {
        #[arg(long)]
        slug: String,
        #[arg(long, default_value = "cms_version_aggregate")]
        metric1: String,
        #[arg(long, default_value = "installed_version")]
        metric2: String,
        #[arg(long, default_value_t = 10)]
        limit: i64,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
}

#[derive(Serialize)]
struct ChartOutput {
    slug: String,
    metric: String,
    range: DateRange,
    area: AreaChart,
    pie: PieChart,
}

#[derive(Serialize)]
struct SummaryOutput {
    slug: String,
    range: DateRange,
    active_installs: f64,
    installs_per_day: f64,
    total_requests: u64,
    requests_per_site: f64,
}

#[derive(Serialize)]
struct CombinationsOutput {
    slug: String,
    metric1: String,
    metric2: String,
    rows: Vec<CombinationSummary>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let store = storage::connect(&config.database).await?;

    let json = match cli.command {
        Commands::Slugs => serde_json::to_string_pretty(&store.list_slugs().await?)?,
        Commands::Chart {
            slug,
            metric,
            from,
            to,
        } => {
            let range = DateRange::parse(from.as_deref(), to.as_deref())?;
            let report = Report::new(store, slug.clone(), range);
            let chart = report.chart(&metric, report_chart_options()).await?;
            serde_json::to_string_pretty(&ChartOutput {
                slug,
                metric,
                range,
                area: chart.area_chart(),
                pie: chart.pie_chart("Value", -1),
            })?
        }
        Commands::Summary { slug, from, to } => {
            let range = DateRange::parse(from.as_deref(), to.as_deref())?;
            let report = Report::new(store, slug.clone(), range);
            serde_json::to_string_pretty(&SummaryOutput {
                slug,
                range,
                active_installs: report.active_installs(7).await?,
                installs_per_day: report.installs_per_day().await?,
                total_requests: report.total_requests().await?,
                requests_per_site: report.requests_per_site().await?,
            })?
        }
        Commands::Combinations {
            slug,
            metric1,
            metric2,
            limit,
            from,
            to,
        } => {
            let range = DateRange::parse(from.as_deref(), to.as_deref())?;
            let report = Report::new(store, slug.clone(), range);
            let rows = report
                .version_combinations(&metric1, &metric2, limit)
                .await
                .with_context(|| format!("loading combinations for {slug}"))?;
            serde_json::to_string_pretty(&CombinationsOutput {
                slug,
                metric1,
                metric2,
                rows,
            })?
        }
    };

    println!("{json}");
    Ok(())
}
