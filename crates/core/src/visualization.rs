//! Precomputed knowledge-graph analytics: component-count outliers, the
//! component-count distribution and the applicant portfolio aggregate.

use crate::config::SearchConfig;
use crate::models::{
    DistributionRow, OutlierDisplayRow, OutlierRow, PortfolioRow, VisualizationErrorKind,
    VisualizationResult,
};
use crate::query::Statement;
use crate::traits::Warehouse;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tracing::warn;

/// Patents whose component count is more than three standard deviations
/// above the mean.
pub fn outlier_detection_query(config: &SearchConfig) -> Statement {
    Statement::new(format!(
        r#"WITH component_stats AS (
  SELECT
    uri,
    ARRAY_LENGTH(components) AS num_components,
    AVG(ARRAY_LENGTH(components)) OVER() AS avg_components,
    STDDEV(ARRAY_LENGTH(components)) OVER() AS stddev_components
  FROM
    `{table}`
)
SELECT
  uri,
  num_components
FROM
  component_stats
WHERE
  num_components > avg_components + (3 * stddev_components)"#,
        table = config.knowledge_graph_table(),
    ))
}

pub fn component_distribution_query(config: &SearchConfig) -> Statement {
    Statement::new(format!(
        r#"SELECT
  ARRAY_LENGTH(components) AS num_components
FROM
  `{table}`
WHERE
  ARRAY_LENGTH(components) > 0"#,
        table = config.knowledge_graph_table(),
    ))
}

/// Per applicant: distinct invention domains, average connections per patent
/// and patent count. Patents without connections and single-patent
/// applicants are left out.
pub fn portfolio_analysis_query(config: &SearchConfig) -> Statement {
    Statement::new(format!(
        r#"WITH
  patent_connection_stats AS (
    SELECT
      T1.uri,
      T1.applican,
      T2.invention_domain,
      (
        SELECT SUM(ARRAY_LENGTH(c.connected_to))
        FROM UNNEST(T2.components) AS c
        WHERE c.connected_to IS NOT NULL
      ) AS total_connections
    FROM
      `{extraction}` AS T1
    JOIN
      `{graph}` AS T2
    ON
      T1.uri = T2.uri
    WHERE
      T1.applican IS NOT NULL AND T2.invention_domain IS NOT NULL
  )
SELECT
  applican,
  COUNT(DISTINCT invention_domain) AS innovation_breadth,
  ROUND(AVG(total_connections), 2) AS average_connection_density,
  COUNT(uri) AS total_patents
FROM
  patent_connection_stats
WHERE
  total_connections > 0
GROUP BY
  applican
HAVING
  COUNT(uri) > 1
ORDER BY
  total_patents DESC"#,
        extraction = config.extraction_table(),
        graph = config.knowledge_graph_table(),
    ))
}

pub struct VisualizationService<W> {
    config: SearchConfig,
    client: Option<W>,
}

impl<W> VisualizationService<W>
where
    W: Warehouse + Send + Sync,
{
    pub fn new(config: SearchConfig, client: W) -> Self {
        Self {
            config,
            client: Some(client),
        }
    }

    pub fn detached(config: SearchConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    async fn execute_query<T: DeserializeOwned>(
        &self,
        statement: Statement,
        operation_name: &str,
    ) -> VisualizationResult<T> {
        let Some(client) = &self.client else {
            return VisualizationResult {
                success: false,
                message: "BigQuery client not available".to_string(),
                data: None,
                error_type: Some(VisualizationErrorKind::ClientUnavailable),
            };
        };

        let rows = match client.execute(&statement).await {
            Ok(result) => result.decode::<T>(),
            Err(error) => Err(error),
        };

        match rows {
            Ok(rows) if rows.is_empty() => VisualizationResult {
                success: true,
                message: format!("No data found for {operation_name}"),
                data: Some(rows),
                error_type: None,
            },
            Ok(rows) => VisualizationResult {
                success: true,
                message: format!("Retrieved {operation_name} data for {} records", rows.len()),
                data: Some(rows),
                error_type: None,
            },
            Err(error) => {
                warn!(operation = operation_name, %error, "analytics query failed");
                VisualizationResult {
                    success: false,
                    message: format!("{operation_name} failed: {error}"),
                    data: None,
                    error_type: Some(VisualizationErrorKind::QueryExecutionError),
                }
            }
        }
    }

    pub async fn detect_component_outliers(&self) -> VisualizationResult<OutlierRow> {
        let mut result = self
            .execute_query(outlier_detection_query(&self.config), "outlier detection")
            .await;
        if let (true, Some(rows)) = (result.success, &result.data) {
            result.message = if rows.is_empty() {
                "No significant outliers found in component counts.".to_string()
            } else {
                format!(
                    "Found {} patents with unusually high number of components.",
                    rows.len()
                )
            };
        }
        result
    }

    pub async fn get_component_distribution_data(&self) -> VisualizationResult<DistributionRow> {
        let mut result = self
            .execute_query(
                component_distribution_query(&self.config),
                "component distribution",
            )
            .await;
        if let (true, Some(rows)) = (result.success, &result.data) {
            if !rows.is_empty() {
                result.message =
                    format!("Retrieved component distribution for {} patents.", rows.len());
            }
        }
        result
    }

    pub async fn get_portfolio_analysis_data(&self) -> VisualizationResult<PortfolioRow> {
        let mut result = self
            .execute_query(portfolio_analysis_query(&self.config), "portfolio analysis")
            .await;
        if let (true, Some(rows)) = (result.success, &result.data) {
            if !rows.is_empty() {
                result.message =
                    format!("Retrieved portfolio analysis for {} applicants.", rows.len());
            }
        }
        result
    }
}

/// Patent id is the last path segment of the uri; highest counts first.
pub fn format_outlier_data_for_display(rows: &[OutlierRow]) -> Vec<OutlierDisplayRow> {
    let mut display: Vec<OutlierDisplayRow> = rows
        .iter()
        .map(|row| OutlierDisplayRow {
            patent_id: row
                .uri
                .rsplit('/')
                .next()
                .unwrap_or(row.uri.as_str())
                .to_string(),
            component_count: row.num_components,
        })
        .collect();
    display.sort_by(|left, right| right.component_count.cmp(&left.component_count));
    display
}

/// `(num_components, patents)` bins in ascending component order.
pub fn distribution_histogram(rows: &[DistributionRow]) -> Vec<(u64, usize)> {
    let mut bins = BTreeMap::<u64, usize>::new();
    for row in rows {
        *bins.entry(row.num_components).or_default() += 1;
    }
    bins.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WarehouseError;
    use crate::traits::ResultSet;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct FixedWarehouse {
        result: Result<Vec<Value>, String>,
    }

    #[async_trait]
    impl Warehouse for FixedWarehouse {
        async fn execute(&self, _statement: &Statement) -> Result<ResultSet, WarehouseError> {
            match &self.result {
                Ok(rows) => Ok(ResultSet::from_rows(rows.clone())),
                Err(message) => Err(WarehouseError::Connection(message.clone())),
            }
        }
    }

    fn service(result: Result<Vec<Value>, String>) -> VisualizationService<FixedWarehouse> {
        let config = SearchConfig::new("acme-research").expect("valid project id");
        VisualizationService::new(config, FixedWarehouse { result })
    }

    #[test]
    fn queries_target_configured_tables() {
        let config = SearchConfig::new("acme-research").expect("valid project id");

        let outliers = outlier_detection_query(&config);
        assert!(outliers
            .sql()
            .contains("`acme-research.patent_analysis.patent_knowledge_graph`"));
        assert!(outliers.sql().contains("avg_components + (3 * stddev_components)"));

        let portfolio = portfolio_analysis_query(&config);
        assert!(portfolio
            .sql()
            .contains("`acme-research.patent_analysis.ai_text_extraction` AS T1"));
        assert!(portfolio.sql().contains("HAVING\n  COUNT(uri) > 1"));
        assert!(portfolio.parameters().is_empty());
    }

    #[tokio::test]
    async fn outliers_report_count() {
        let service = service(Ok(vec![
            json!({"uri": "gs://patents/US1.pdf", "num_components": "41"}),
            json!({"uri": "gs://patents/US2.pdf", "num_components": "57"}),
        ]));

        let result = service.detect_component_outliers().await;
        assert!(result.success);
        assert_eq!(
            result.message,
            "Found 2 patents with unusually high number of components."
        );
    }

    #[tokio::test]
    async fn no_outliers_is_success() {
        let result = service(Ok(Vec::new())).detect_component_outliers().await;
        assert!(result.success);
        assert_eq!(result.message, "No significant outliers found in component counts.");
        assert_eq!(result.data, Some(Vec::new()));
    }

    #[tokio::test]
    async fn empty_distribution_keeps_generic_message() {
        let result = service(Ok(Vec::new())).get_component_distribution_data().await;
        assert_eq!(result.message, "No data found for component distribution");
    }

    #[tokio::test]
    async fn portfolio_rows_decode() {
        let result = service(Ok(vec![json!({
            "applican": "Acme Corp",
            "innovation_breadth": "4",
            "average_connection_density": "12.5",
            "total_patents": "9"
        })]))
        .get_portfolio_analysis_data()
        .await;

        assert_eq!(result.message, "Retrieved portfolio analysis for 1 applicants.");
        let rows = result.data.unwrap_or_default();
        assert_eq!(rows[0].average_connection_density, 12.5);
        assert_eq!(rows[0].total_patents, 9);
    }

    #[tokio::test]
    async fn failures_carry_operation_and_kind() {
        let result = service(Err("access denied".to_string()))
            .get_portfolio_analysis_data()
            .await;

        assert!(!result.success);
        assert_eq!(result.message, "portfolio analysis failed: access denied");
        assert_eq!(result.error_type, Some(VisualizationErrorKind::QueryExecutionError));
    }

    #[tokio::test]
    async fn detached_service_is_unavailable() {
        let config = SearchConfig::new("acme-research").expect("valid project id");
        let service = VisualizationService::<FixedWarehouse>::detached(config);

        let result = service.get_component_distribution_data().await;
        assert_eq!(result.message, "BigQuery client not available");
        assert_eq!(result.error_type, Some(VisualizationErrorKind::ClientUnavailable));
    }

    #[test]
    fn outlier_display_uses_last_uri_segment() {
        let rows = format_outlier_data_for_display(&[
            OutlierRow {
                uri: "gs://patents/US1.pdf".to_string(),
                num_components: 41,
            },
            OutlierRow {
                uri: "US2".to_string(),
                num_components: 57,
            },
        ]);

        assert_eq!(rows[0].patent_id, "US2");
        assert_eq!(rows[0].component_count, 57);
        assert_eq!(rows[1].patent_id, "US1.pdf");
    }

    #[test]
    fn histogram_counts_patents_per_size() {
        let rows: Vec<DistributionRow> = [3, 5, 3, 8]
            .into_iter()
            .map(|num_components| DistributionRow { num_components })
            .collect();
        assert_eq!(distribution_histogram(&rows), vec![(3, 2), (5, 1), (8, 1)]);
    }
}
