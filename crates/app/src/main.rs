use anyhow::{anyhow, Context};
use chrono::Utc;
use clap::builder::FalseyValueParser;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use patent_search_core::config::{
    DEFAULT_BIGQUERY_ENDPOINT, DEFAULT_KNOWLEDGE_GRAPH_TABLE, DEFAULT_LOCATION,
};
use patent_search_core::{
    distribution_histogram, format_outlier_data_for_display, format_search_results,
    sanitize_for_sql, AppController, BigQueryStore, QueryBuilder, Settings,
    Statement, VisualizationResult, DEFAULT_DISTANCE_THRESHOLD, DEFAULT_PATENTS_LIMIT,
    DEFAULT_PER_URI_LIMIT, DEFAULT_TOP_K,
};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "patent-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Application title shown in the boot log
    #[arg(long, env = "APP_TITLE", default_value = "AI Patent Analyst")]
    app_title: String,

    /// Google Cloud project that owns the dataset and pays for queries
    #[arg(long, env = "GOOGLE_CLOUD_PROJECT_ID")]
    project_id: Option<String>,

    /// BigQuery dataset holding the index, models and tables
    #[arg(long, env = "BQ_DATASET_ID")]
    dataset_id: Option<String>,

    /// BigQuery job location
    #[arg(long, env = "BQ_LOCATION", default_value = DEFAULT_LOCATION)]
    location: String,

    /// Knowledge graph table name
    #[arg(long, env = "BQ_TABLE_PATENT_KNOWLEDGE_GRAPH", default_value = DEFAULT_KNOWLEDGE_GRAPH_TABLE)]
    knowledge_graph_table: String,

    /// OAuth access token, e.g. from `gcloud auth print-access-token`
    #[arg(long, env = "GCP_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// BigQuery REST endpoint
    #[arg(long, env = "BIGQUERY_ENDPOINT", default_value = DEFAULT_BIGQUERY_ENDPOINT)]
    endpoint: String,

    /// Run the technical-query classifier before searching
    #[arg(long, default_value_t = false)]
    classify: bool,

    /// Print results as JSON
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, env = "DEBUG_MODE", action = ArgAction::SetTrue, value_parser = FalseyValueParser::new())]
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Semantic search over patent components.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = DEFAULT_DISTANCE_THRESHOLD)]
        distance_threshold: f64,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: u32,
    },
    /// Search grouped by patent with the closest components per patent.
    Grouped {
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = DEFAULT_DISTANCE_THRESHOLD)]
        distance_threshold: f64,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: u32,
        #[arg(long, default_value_t = DEFAULT_PATENTS_LIMIT)]
        patents_limit: u32,
        #[arg(long, default_value_t = DEFAULT_PER_URI_LIMIT)]
        per_uri_limit: u32,
    },
    /// Every matching component of one patent.
    Detail {
        #[arg(long)]
        query: String,
        #[arg(long)]
        uri: String,
        #[arg(long, default_value_t = DEFAULT_DISTANCE_THRESHOLD)]
        distance_threshold: f64,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: u32,
    },
    /// Patents with an unusually high number of components.
    Outliers,
    /// Component-count distribution across patents.
    Distribution,
    /// Applicant portfolio breadth and complexity.
    Portfolio,
    /// Environment and warehouse connectivity check.
    Status,
    /// Patent and component counts.
    Stats,
    /// Print the statement a search would run, without running it.
    Sql {
        #[arg(value_enum)]
        kind: StatementKind,
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "")]
        uri: String,
        #[arg(long, default_value_t = DEFAULT_DISTANCE_THRESHOLD)]
        distance_threshold: f64,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: u32,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StatementKind {
    Vector,
    Grouped,
    Detail,
    Classification,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            app_title: self.app_title.clone(),
            project_id: self.project_id.clone(),
            dataset_id: self.dataset_id.clone(),
            access_token: self.access_token.clone(),
            location: self.location.clone(),
            knowledge_graph_table: self.knowledge_graph_table.clone(),
            endpoint: self.endpoint.clone(),
            debug: self.debug,
        }
    }
}

fn build_store(settings: &Settings) -> Option<BigQueryStore> {
    let project_id = settings.project_id.as_deref()?;
    let token = settings.access_token.as_deref()?;
    Some(
        BigQueryStore::new(project_id)
            .with_endpoint(&settings.endpoint)
            .with_location(&settings.location)
            .with_access_token(token),
    )
}

fn print_failure<T>(result: &VisualizationResult<T>) -> bool {
    if !result.success {
        println!("error: {}", result.message);
    }
    !result.success
}

fn print_statement(statement: &Statement, as_json: bool) -> anyhow::Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(statement)?);
        return Ok(());
    }
    println!("-- fingerprint {}", statement.fingerprint());
    for parameter in statement.parameters() {
        println!(
            "-- @{} {} = {}",
            parameter.name,
            parameter.value.type_name(),
            parameter.value.wire_value()
        );
    }
    println!("{}", statement.inline_sql());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");
    let cli = Cli::parse();
    let settings = cli.settings();

    let default_level = if settings.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer())
        .init();

    info!(
        title = %settings.app_title,
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "patent-search boot"
    );
    if let Err(error) = settings.validate() {
        warn!(%error, "configuration is incomplete");
    }

    let controller = AppController::new(settings.clone(), build_store(&settings))
        .with_classification(cli.classify);

    match cli.command {
        Command::Search {
            query,
            distance_threshold,
            top_k,
        } => {
            let service = controller
                .search_service()
                .ok_or_else(|| anyhow!("Semantic search service not available"))?;
            let outcome = service
                .run_semantic_search(Some(query.trim()), distance_threshold, top_k)
                .await;
            let rows = outcome
                .results
                .as_deref()
                .map(format_search_results)
                .unwrap_or_default();

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "success": outcome.success,
                        "message": outcome.message,
                        "results": rows,
                    }))?
                );
            } else {
                println!("{}", outcome.message);
                for row in rows {
                    println!(
                        "[{:>3}%] {} | {} | {}",
                        row.similarity, row.patent_uri, row.component, row.function
                    );
                }
            }
        }
        Command::Grouped {
            query,
            distance_threshold,
            top_k,
            patents_limit,
            per_uri_limit,
        } => {
            let service = controller
                .search_service()
                .ok_or_else(|| anyhow!("Semantic search service not available"))?;
            let sanitized = sanitize_for_sql(Some(query.trim()));
            let groups = service
                .perform_grouped_search(
                    &sanitized,
                    distance_threshold,
                    top_k,
                    patents_limit,
                    per_uri_limit,
                )
                .await
                .map_err(|error| anyhow!(error.to_string()))?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&groups)?);
            } else {
                for group in groups {
                    println!(
                        "{} best_distance={:.4} hits={}",
                        group.uri, group.best_distance, group.hit_count
                    );
                    for component in group.top_components {
                        println!(
                            "  {:.4} {} | {}",
                            component.distance, component.component_name, component.component_function
                        );
                    }
                }
            }
        }
        Command::Detail {
            query,
            uri,
            distance_threshold,
            top_k,
        } => {
            let service = controller
                .search_service()
                .ok_or_else(|| anyhow!("Semantic search service not available"))?;
            let hits = service
                .get_components_for_uri(
                    &sanitize_for_sql(Some(query.trim())),
                    &sanitize_for_sql(Some(uri.trim())),
                    distance_threshold,
                    top_k,
                )
                .await
                .map_err(|error| anyhow!(error.to_string()))?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else {
                for row in format_search_results(&hits) {
                    println!("[{:>3}%] {} | {}", row.similarity, row.component, row.function);
                }
            }
        }
        Command::Outliers => {
            let result = controller.component_outliers().await;
            if !print_failure(&result) {
                let rows = format_outlier_data_for_display(result.data.as_deref().unwrap_or_default());
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                } else {
                    println!("{}", result.message);
                    for row in rows {
                        println!("{} components={}", row.patent_id, row.component_count);
                    }
                }
            }
        }
        Command::Distribution => {
            let result = controller.component_distribution().await;
            if !print_failure(&result) {
                let bins = distribution_histogram(result.data.as_deref().unwrap_or_default());
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&bins)?);
                } else {
                    println!("{}", result.message);
                    for (components, patents) in bins {
                        println!("{components:>4} components: {patents} patents");
                    }
                }
            }
        }
        Command::Portfolio => {
            let result = controller.portfolio_analysis().await;
            if !print_failure(&result) {
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                } else {
                    println!("{}", result.message);
                    for row in result.data.unwrap_or_default() {
                        println!(
                            "{} breadth={} density={:.2} patents={}",
                            row.applican,
                            row.innovation_breadth,
                            row.average_connection_density,
                            row.total_patents
                        );
                    }
                }
            }
        }
        Command::Status => {
            let status = controller.connection_status().await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("environment: {}", status.env_message);
                println!("warehouse: {}", status.gcp_message);
            }
        }
        Command::Stats => {
            let stats = controller.app_stats().await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!(
                    "patents={} components={} ({})",
                    stats.patent_count, stats.component_count, stats.connection_status
                );
            }
        }
        Command::Sql {
            kind,
            query,
            uri,
            distance_threshold,
            top_k,
        } => {
            let config = settings
                .search_config()
                .context("a project id is needed to name the index and models")?;
            let builder = QueryBuilder::new(&config);
            let sanitized = sanitize_for_sql(Some(query.trim()));
            let statement = match kind {
                StatementKind::Vector => {
                    builder.build_vector_search_query(&sanitized, distance_threshold, top_k)
                }
                StatementKind::Grouped => builder.build_grouped_search_query(
                    &sanitized,
                    distance_threshold,
                    top_k,
                    DEFAULT_PATENTS_LIMIT,
                    DEFAULT_PER_URI_LIMIT,
                ),
                StatementKind::Detail => builder.build_detail_query(
                    &sanitized,
                    &sanitize_for_sql(Some(uri.trim())),
                    distance_threshold,
                    top_k,
                ),
                StatementKind::Classification => builder.build_classification_query(&sanitized),
            };
            print_statement(&statement, cli.json)?;
        }
    }

    Ok(())
}
