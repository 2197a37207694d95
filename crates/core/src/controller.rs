use crate::config::Settings;
use crate::format::format_search_results;
use crate::models::{
    AppStats, ConnectionStatus, DistributionRow, OutlierRow, PortfolioRow, SearchResponse,
    StatsRow, VisualizationResult,
};
use crate::orchestrator::{SemanticSearchService, DEFAULT_DISTANCE_THRESHOLD, DEFAULT_TOP_K};
use crate::query::Statement;
use crate::traits::Warehouse;
use crate::visualization::VisualizationService;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_PATENT_COUNT: u64 = 403;
const DEFAULT_COMPONENT_COUNT: u64 = 1000;

/// Groups thousands with commas from 1000 upwards.
pub fn format_number(value: u64) -> String {
    let digits = value.to_string();
    if value < 1000 {
        return digits;
    }

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}

/// Entry point for a presentation layer: owns the warehouse handle and the
/// services built on top of it.
pub struct AppController<W> {
    settings: Settings,
    client: Option<Arc<W>>,
    search: Option<SemanticSearchService<Arc<W>>>,
    visualization: Option<VisualizationService<Arc<W>>>,
}

impl<W> AppController<W>
where
    W: Warehouse + Send + Sync,
{
    pub fn new(settings: Settings, client: Option<W>) -> Self {
        let client = client.map(Arc::new);
        let config = match settings.search_config() {
            Ok(config) => Some(config),
            Err(error) => {
                warn!(%error, "search configuration is incomplete");
                None
            }
        };

        let (search, visualization) = match (&client, config) {
            (Some(client), Some(config)) => (
                Some(SemanticSearchService::new(config.clone(), Arc::clone(client))),
                Some(VisualizationService::new(config, Arc::clone(client))),
            ),
            _ => (None, None),
        };

        Self {
            settings,
            client,
            search,
            visualization,
        }
    }

    pub fn with_classification(mut self, enabled: bool) -> Self {
        self.search = self
            .search
            .map(|service| service.with_classification(enabled));
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn search_service(&self) -> Option<&SemanticSearchService<Arc<W>>> {
        self.search.as_ref()
    }

    pub async fn connection_status(&self) -> ConnectionStatus {
        let (env_valid, env_message) = match self.settings.validate() {
            Ok(()) => (true, "Environment configuration is valid".to_string()),
            Err(error) => (false, error.to_string()),
        };

        let (gcp_connected, gcp_message) = match &self.client {
            None => (false, "Failed to authenticate with GCP".to_string()),
            Some(client) => match client.execute(&Statement::new("SELECT 1 AS test")).await {
                Ok(_) => (true, "GCP connection successful".to_string()),
                Err(error) => (false, format!("GCP connection failed: {error}")),
            },
        };

        ConnectionStatus {
            env_valid,
            env_message,
            gcp_connected,
            gcp_message,
            checked_at: Utc::now(),
        }
    }

    /// Patent and component counts; falls back to fixed defaults whenever the
    /// warehouse cannot answer.
    pub async fn app_stats(&self) -> AppStats {
        match self.fetch_stats().await {
            Some(row) => AppStats {
                patent_count: format_number(row.patent_count),
                component_count: format_number(row.component_count),
                connection_status: "Connected to BigQuery".to_string(),
            },
            None => AppStats {
                patent_count: format_number(DEFAULT_PATENT_COUNT),
                component_count: format_number(DEFAULT_COMPONENT_COUNT),
                connection_status: "Using default values".to_string(),
            },
        }
    }

    async fn fetch_stats(&self) -> Option<StatsRow> {
        let client = self.client.as_ref()?;
        let config = self.search.as_ref()?.config();
        let statement = Statement::new(format!(
            "SELECT\n  COUNT(DISTINCT patent_id) AS patent_count,\n  COUNT(*) AS component_count\nFROM `{}`",
            config.knowledge_graph_table()
        ));

        match client.execute(&statement).await.and_then(|rows| rows.decode::<StatsRow>()) {
            Ok(rows) => rows.into_iter().next(),
            Err(error) => {
                warn!(%error, "falling back to default stats");
                None
            }
        }
    }

    pub async fn search_patents(&self, query: &str) -> SearchResponse {
        let query = query.trim();
        let Some(search) = &self.search else {
            return SearchResponse {
                success: false,
                message: "Semantic search service not available".to_string(),
                results: Vec::new(),
                query: query.to_string(),
            };
        };

        let outcome = search
            .run_semantic_search(Some(query), DEFAULT_DISTANCE_THRESHOLD, DEFAULT_TOP_K)
            .await;
        info!(query, success = outcome.success, "search completed");

        let results = match (outcome.success, &outcome.results) {
            (true, Some(hits)) => format_search_results(hits),
            _ => Vec::new(),
        };

        SearchResponse {
            success: outcome.success,
            message: outcome.message,
            results,
            query: query.to_string(),
        }
    }

    pub async fn component_outliers(&self) -> VisualizationResult<OutlierRow> {
        match &self.visualization {
            Some(service) => service.detect_component_outliers().await,
            None => unavailable(),
        }
    }

    pub async fn component_distribution(&self) -> VisualizationResult<DistributionRow> {
        match &self.visualization {
            Some(service) => service.get_component_distribution_data().await,
            None => unavailable(),
        }
    }

    pub async fn portfolio_analysis(&self) -> VisualizationResult<PortfolioRow> {
        match &self.visualization {
            Some(service) => service.get_portfolio_analysis_data().await,
            None => unavailable(),
        }
    }
}

fn unavailable<T>() -> VisualizationResult<T> {
    VisualizationResult {
        success: false,
        message: "Visualization service not available".to_string(),
        data: None,
        error_type: None,
    }
}
