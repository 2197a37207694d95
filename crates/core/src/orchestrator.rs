use crate::config::SearchConfig;
use crate::error::{SearchError, WarehouseError};
use crate::models::{ComponentHit, GroupedResult, SearchOutcome};
use crate::query::{QueryBuilder, Statement};
use crate::traits::{ResultSet, Warehouse};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

pub const DEFAULT_DISTANCE_THRESHOLD: f64 = 0.8;
pub const DEFAULT_TOP_K: u32 = 70;
pub const CLIENT_RESOURCE: &str = "BigQuery client";
pub const NOT_TECHNICAL_MESSAGE: &str =
    "Query is not technical. Please enter a query related to a technical component or function.";

/// Escapes single quotes for use inside a SQL string literal. `None` stands for
/// input that was not text at all and yields an empty string.
///
/// Not idempotent: a second pass turns `\'` into `\\'`, so callers sanitize
/// exactly once.
pub fn sanitize_for_sql(input: Option<&str>) -> String {
    match input {
        Some(text) => text.replace('\'', "\\'"),
        None => String::new(),
    }
}

/// `sanitize_for_sql` for loosely typed input such as a JSON request body.
pub fn sanitize_value(input: &Value) -> String {
    sanitize_for_sql(input.as_str())
}

#[derive(Debug, Deserialize)]
struct ClassificationRow {
    #[serde(default)]
    ml_generate_text_llm_result: Option<String>,
}

/// Sanitize, build, execute and shape for every search flow.
pub struct SemanticSearchService<W> {
    config: SearchConfig,
    client: Option<W>,
    classify: bool,
}

impl<W> SemanticSearchService<W>
where
    W: Warehouse + Send + Sync,
{
    pub fn new(config: SearchConfig, client: W) -> Self {
        Self {
            config,
            client: Some(client),
            classify: false,
        }
    }

    /// A service without a warehouse handle; every call reports the client as
    /// unavailable.
    pub fn detached(config: SearchConfig) -> Self {
        Self {
            config,
            client: None,
            classify: false,
        }
    }

    /// Runs the technical-query classifier before the vector search.
    pub fn with_classification(mut self, enabled: bool) -> Self {
        self.classify = enabled;
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn queries(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(&self.config)
    }

    async fn execute(&self, statement: &Statement) -> Result<ResultSet, ExecuteError> {
        let client = self.client.as_ref().ok_or(ExecuteError::Unavailable)?;
        debug!(fingerprint = %statement.fingerprint(), sql = %statement.inline_sql(), "executing statement");
        client.execute(statement).await.map_err(ExecuteError::Warehouse)
    }

    pub async fn is_query_technical(&self, sanitized_query: &str) -> Result<bool, SearchError> {
        let statement = self.queries().build_classification_query(sanitized_query);
        let rows = self
            .execute(&statement)
            .await
            .map_err(|error| error.into_search_error(SearchError::Classification))?
            .decode::<ClassificationRow>()
            .map_err(SearchError::Classification)?;

        Ok(rows.into_iter().any(|row| {
            row.ml_generate_text_llm_result
                .map(|text| text.trim().to_lowercase().contains("yes"))
                .unwrap_or(false)
        }))
    }

    pub async fn perform_vector_search(
        &self,
        sanitized_query: &str,
        distance_threshold: f64,
        top_k: u32,
    ) -> Result<Vec<ComponentHit>, SearchError> {
        let statement = self
            .queries()
            .build_vector_search_query(sanitized_query, distance_threshold, top_k);
        let mut hits = self
            .execute(&statement)
            .await
            .map_err(|error| error.into_search_error(SearchError::failed("Vector search")))?
            .decode::<ComponentHit>()
            .map_err(SearchError::failed("Vector search"))?;

        hits.retain(|hit| hit.distance < distance_threshold);
        Ok(hits)
    }

    pub async fn perform_grouped_search(
        &self,
        sanitized_query: &str,
        distance_threshold: f64,
        top_k: u32,
        patents_limit: u32,
        per_uri_limit: u32,
    ) -> Result<Vec<GroupedResult>, SearchError> {
        if self.client.is_none() {
            return Err(SearchError::NotReady(CLIENT_RESOURCE.to_string()));
        }
        if sanitized_query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }

        let statement = self.queries().build_grouped_search_query(
            sanitized_query,
            distance_threshold,
            top_k,
            patents_limit,
            per_uri_limit,
        );
        let rows = self
            .execute(&statement)
            .await
            .map_err(|error| error.into_search_error(SearchError::failed("Grouped search")))?
            .decode::<GroupedResult>()
            .map_err(SearchError::failed("Grouped search"))?;

        Ok(shape_grouped(rows, distance_threshold, patents_limit, per_uri_limit))
    }

    pub async fn get_components_for_uri(
        &self,
        sanitized_query: &str,
        sanitized_uri: &str,
        distance_threshold: f64,
        top_k: u32,
    ) -> Result<Vec<ComponentHit>, SearchError> {
        if self.client.is_none() {
            return Err(SearchError::NotReady(CLIENT_RESOURCE.to_string()));
        }
        if sanitized_query.is_empty() || sanitized_uri.is_empty() {
            return Err(SearchError::InvalidDetailInput);
        }

        let statement = self.queries().build_detail_query(
            sanitized_query,
            sanitized_uri,
            distance_threshold,
            top_k,
        );
        let mut hits = self
            .execute(&statement)
            .await
            .map_err(|error| error.into_search_error(SearchError::failed("Detail fetch")))?
            .decode::<ComponentHit>()
            .map_err(SearchError::failed("Detail fetch"))?;

        hits.retain(|hit| hit.distance < distance_threshold);
        hits.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        Ok(hits)
    }

    /// Full flow behind the search box. Failures come back as an unsuccessful
    /// outcome, never as an error.
    pub async fn run_semantic_search(
        &self,
        raw_query: Option<&str>,
        distance_threshold: f64,
        top_k: u32,
    ) -> SearchOutcome {
        let sanitized_query = sanitize_for_sql(raw_query);
        if sanitized_query.is_empty() {
            return SearchOutcome::failure(SearchError::EmptyQuery.to_string());
        }
        let raw_query = raw_query.unwrap_or_default();

        if self.classify {
            match self.is_query_technical(&sanitized_query).await {
                Ok(true) => {}
                Ok(false) => return SearchOutcome::failure(NOT_TECHNICAL_MESSAGE),
                Err(error) => {
                    warn!(%error, "query classification failed");
                    return SearchOutcome::failure(format!("Classification failed: {error}"));
                }
            }
        }

        match self
            .perform_vector_search(&sanitized_query, distance_threshold, top_k)
            .await
        {
            Ok(hits) if hits.is_empty() => SearchOutcome::found(
                format!("No results found for '{raw_query}'. Try a different query."),
                hits,
            ),
            Ok(hits) => SearchOutcome::found(
                format!("Found {} results for '{raw_query}'.", hits.len()),
                hits,
            ),
            Err(error) => {
                warn!(%error, "semantic search failed");
                SearchOutcome::failure(error.to_string())
            }
        }
    }
}

enum ExecuteError {
    Unavailable,
    Warehouse(WarehouseError),
}

impl ExecuteError {
    fn into_search_error(self, wrap: impl FnOnce(WarehouseError) -> SearchError) -> SearchError {
        match self {
            Self::Unavailable => SearchError::NotReady(CLIENT_RESOURCE.to_string()),
            Self::Warehouse(error) => wrap(error),
        }
    }
}

/// Re-applies the grouped query's ordering and limits to whatever the
/// warehouse returned. `best_distance` is left as aggregated since it covers
/// hits beyond the truncated component list.
fn shape_grouped(
    mut rows: Vec<GroupedResult>,
    distance_threshold: f64,
    patents_limit: u32,
    per_uri_limit: u32,
) -> Vec<GroupedResult> {
    rows.retain(|row| row.best_distance < distance_threshold);
    for row in &mut rows {
        row.top_components
            .retain(|component| component.distance < distance_threshold);
        row.top_components
            .sort_by(|left, right| left.distance.total_cmp(&right.distance));
        row.top_components.truncate(per_uri_limit as usize);
    }
    rows.sort_by(|left, right| left.best_distance.total_cmp(&right.best_distance));
    rows.truncate(patents_limit as usize);
    rows
}
