use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull, DisplayFromStr, PickFirst};

/// One raw vector-search row. BigQuery hands numerics back as strings, so
/// numeric fields accept both encodings.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHit {
    pub uri: String,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub component_name: String,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub component_function: String,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub distance: f64,
}

/// A component entry inside a grouped row; the uri lives on the parent.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentMatch {
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub component_name: String,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    pub component_function: String,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub distance: f64,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedResult {
    pub uri: String,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub best_distance: f64,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub hit_count: u64,
    #[serde(default)]
    pub top_components: Vec<ComponentMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub success: bool,
    pub message: String,
    pub results: Option<Vec<ComponentHit>>,
}

impl SearchOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            results: None,
        }
    }

    pub fn found(message: impl Into<String>, results: Vec<ComponentHit>) -> Self {
        Self {
            success: true,
            message: message.into(),
            results: Some(results),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResultRow {
    #[serde(rename = "Patent URI")]
    pub patent_uri: String,
    #[serde(rename = "Component")]
    pub component: String,
    #[serde(rename = "Function")]
    pub function: String,
    #[serde(rename = "Similarity")]
    pub similarity: u8,
}

/// What the controller hands to a presentation layer after a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub success: bool,
    pub message: String,
    pub results: Vec<SearchResultRow>,
    pub query: String,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierRow {
    pub uri: String,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub num_components: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlierDisplayRow {
    #[serde(rename = "Patent ID")]
    pub patent_id: String,
    #[serde(rename = "Component Count")]
    pub component_count: u64,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionRow {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub num_components: u64,
}

/// Applicant-level aggregate behind the portfolio bubble chart. The column is
/// spelled `applican` in the extraction table.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRow {
    pub applican: String,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub innovation_breadth: u64,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub average_connection_density: f64,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub total_patents: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualizationErrorKind {
    ClientUnavailable,
    QueryExecutionError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationResult<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<Vec<T>>,
    pub error_type: Option<VisualizationErrorKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub env_valid: bool,
    pub env_message: String,
    pub gcp_connected: bool,
    pub gcp_message: String,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStats {
    pub patent_count: String,
    pub component_count: String,
    pub connection_status: String,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StatsRow {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub patent_count: u64,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub component_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hit_accepts_string_encoded_distance() -> Result<(), serde_json::Error> {
        let hit: ComponentHit = serde_json::from_value(json!({
            "uri": "gs://patents/US123.pdf",
            "component_name": "battery cell",
            "component_function": null,
            "distance": "0.25"
        }))?;

        assert_eq!(hit.distance, 0.25);
        assert_eq!(hit.component_function, "");
        Ok(())
    }

    #[test]
    fn result_row_uses_display_column_names() -> Result<(), serde_json::Error> {
        let row = SearchResultRow {
            patent_uri: "gs://patents/US123.pdf".to_string(),
            component: "rotor".to_string(),
            function: "spins".to_string(),
            similarity: 80,
        };

        let value = serde_json::to_value(row)?;
        assert_eq!(value["Patent URI"], "gs://patents/US123.pdf");
        assert_eq!(value["Similarity"], 80);
        Ok(())
    }
}
