//! SQL statements for the patent search flows.
//!
//! Builders are pure: they never touch the network and the same inputs always
//! yield the same [`Statement`]. Free text (query, uri, prompt) and the
//! distance threshold travel as named parameters; integer knobs are typed and
//! rendered as literals; warehouse identifiers come from a validated
//! [`SearchConfig`].

use crate::config::SearchConfig;
use regex::{Captures, Regex};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

pub const EMBEDDING_PREFIX: &str = "Represent this technical patent component for semantic search: ";
pub const DEFAULT_PATENTS_LIMIT: u32 = 20;
pub const DEFAULT_PER_URI_LIMIT: u32 = 5;

const PLACEHOLDER_PATTERN: &str = r"@([A-Za-z_][A-Za-z0-9_]*)";
static PLACEHOLDER: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum ParameterValue {
    #[serde(rename = "STRING")]
    String(String),
    #[serde(rename = "FLOAT64")]
    Float64(f64),
}

impl ParameterValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "STRING",
            Self::Float64(_) => "FLOAT64",
        }
    }

    /// Wire form used by the BigQuery REST API, which takes every scalar as a
    /// string.
    pub fn wire_value(&self) -> String {
        match self {
            Self::String(value) => value.clone(),
            Self::Float64(value) => value.to_string(),
        }
    }

    fn literal(&self) -> String {
        match self {
            Self::String(value) => format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'")),
            Self::Float64(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryParameter {
    pub name: &'static str,
    pub value: ParameterValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    sql: String,
    parameters: Vec<QueryParameter>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            parameters: Vec::new(),
        }
    }

    pub fn bind(mut self, name: &'static str, value: ParameterValue) -> Self {
        self.parameters.push(QueryParameter { name, value });
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn parameters(&self) -> &[QueryParameter] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterValue> {
        self.parameters
            .iter()
            .find(|parameter| parameter.name == name)
            .map(|parameter| &parameter.value)
    }

    /// Stable hex key over the SQL text and its bound values.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sql.as_bytes());
        for parameter in &self.parameters {
            hasher.update([0u8]);
            hasher.update(parameter.name.as_bytes());
            hasher.update([0u8]);
            hasher.update(parameter.value.type_name().as_bytes());
            hasher.update([0u8]);
            hasher.update(parameter.value.wire_value().as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// The statement with every parameter replaced by a SQL literal. Meant for
    /// logs and the `sql` subcommand, not for execution.
    ///
    /// Placeholders are matched in a single pass over the template, so text
    /// inside a substituted literal is never rewritten. Unknown `@names` stay
    /// as they are.
    pub fn inline_sql(&self) -> String {
        let Ok(pattern) = PLACEHOLDER.get_or_init(|| Regex::new(PLACEHOLDER_PATTERN)) else {
            return self.sql.clone();
        };
        pattern
            .replace_all(&self.sql, |captures: &Captures<'_>| {
                match self.parameter(&captures[1]) {
                    Some(value) => value.literal(),
                    None => captures[0].to_string(),
                }
            })
            .into_owned()
    }
}

/// Undoes the quote escaping applied by `sanitize_for_sql`. The escape only
/// means something inside a SQL literal; bound values carry the plain text.
pub fn unescape_quotes(sanitized: &str) -> String {
    sanitized.replace("\\'", "'")
}

#[derive(Debug, Clone, Copy)]
pub struct QueryBuilder<'a> {
    config: &'a SearchConfig,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(config: &'a SearchConfig) -> Self {
        Self { config }
    }

    fn search_results_cte(&self, top_k: u32) -> String {
        format!(
            r#"WITH search_results AS (
  SELECT
    base.uri, base.component_name, base.component_function, distance
  FROM
    VECTOR_SEARCH(
      TABLE `{index}`,
      'combined_vector',
      (
        SELECT ml_generate_embedding_result
        FROM ML.GENERATE_EMBEDDING(
          MODEL `{model}`,
          (SELECT CONCAT('{prefix}', @query_text) AS content)
        )
      ),
      top_k => {top_k},
      distance_type => 'COSINE'
    )
)"#,
            index = self.config.search_index(),
            model = self.config.embedding_model(),
            prefix = EMBEDDING_PREFIX,
        )
    }

    fn search_statement(&self, sql: String, sanitized_query: &str, distance_threshold: f64) -> Statement {
        Statement::new(sql)
            .bind("query_text", ParameterValue::String(unescape_quotes(sanitized_query)))
            .bind("distance_threshold", ParameterValue::Float64(distance_threshold))
    }

    pub fn build_vector_search_query(
        &self,
        sanitized_query: &str,
        distance_threshold: f64,
        top_k: u32,
    ) -> Statement {
        let sql = format!(
            "{cte}\nSELECT uri, component_name, component_function, distance\nFROM search_results\nWHERE distance < @distance_threshold",
            cte = self.search_results_cte(top_k),
        );
        self.search_statement(sql, sanitized_query, distance_threshold)
    }

    /// One row per uri: `MIN(distance)` over every hit, the hit count, and the
    /// `per_uri_limit` closest components.
    pub fn build_grouped_search_query(
        &self,
        sanitized_query: &str,
        distance_threshold: f64,
        top_k: u32,
        patents_limit: u32,
        per_uri_limit: u32,
    ) -> Statement {
        let sql = format!(
            r#"{cte}
SELECT
  uri,
  MIN(distance) AS best_distance,
  COUNT(1) AS hit_count,
  ARRAY_AGG(STRUCT(component_name, component_function, distance) ORDER BY distance ASC LIMIT {per_uri_limit}) AS top_components
FROM search_results
WHERE distance < @distance_threshold
GROUP BY uri
ORDER BY best_distance ASC
LIMIT {patents_limit}"#,
            cte = self.search_results_cte(top_k),
        );
        self.search_statement(sql, sanitized_query, distance_threshold)
    }

    pub fn build_detail_query(
        &self,
        sanitized_query: &str,
        sanitized_uri: &str,
        distance_threshold: f64,
        top_k: u32,
    ) -> Statement {
        let sql = format!(
            r#"{cte}
SELECT uri, component_name, component_function, distance
FROM search_results
WHERE distance < @distance_threshold AND uri = @uri
ORDER BY distance ASC"#,
            cte = self.search_results_cte(top_k),
        );
        self.search_statement(sql, sanitized_query, distance_threshold)
            .bind("uri", ParameterValue::String(unescape_quotes(sanitized_uri)))
    }

    pub fn build_classification_query(&self, sanitized_query: &str) -> Statement {
        let prompt = format!(
            "Is the following user query related to a technical, scientific, or engineering topic? Answer with only 'Yes' or 'No'. Query: {}",
            unescape_quotes(sanitized_query)
        );
        let sql = format!(
            r#"SELECT ml_generate_text_llm_result
FROM ML.GENERATE_TEXT(
  MODEL `{model}`,
  (SELECT @prompt AS prompt),
  STRUCT(
    0.0 AS temperature,
    TRUE AS flatten_json_output,
    1024 AS max_output_tokens
  )
)"#,
            model = self.config.classification_model(),
        );
        Statement::new(sql).bind("prompt", ParameterValue::String(prompt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SearchConfig {
        SearchConfig::new("acme-research").expect("valid project id")
    }

    #[test]
    fn vector_search_is_deterministic() {
        let config = config();
        let builder = QueryBuilder::new(&config);

        let first = builder.build_vector_search_query("lithium anode", 0.8, 70);
        let second = builder.build_vector_search_query("lithium anode", 0.8, 70);

        assert_eq!(first, second);
        assert_eq!(first.sql(), second.sql());
        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn vector_search_binds_text_and_threshold() {
        let config = config();
        let statement =
            QueryBuilder::new(&config).build_vector_search_query("gear'); DROP TABLE x; --", 0.8, 70);

        assert!(!statement.sql().contains("DROP TABLE"));
        assert!(statement.sql().contains("CONCAT('Represent this technical patent component for semantic search: ', @query_text)"));
        assert!(statement.sql().contains("WHERE distance < @distance_threshold"));
        assert!(statement.sql().contains("top_k => 70"));
        assert!(statement.sql().contains("TABLE `acme-research.patent_analysis.component_search_index`"));
        assert!(statement.sql().contains("MODEL `acme-research.patent_analysis.embedding_model`"));
        assert_eq!(
            statement.parameter("distance_threshold"),
            Some(&ParameterValue::Float64(0.8))
        );
    }

    #[test]
    fn bound_text_drops_the_sql_escape() {
        let config = config();
        let statement = QueryBuilder::new(&config).build_vector_search_query("driver\\'s seat", 0.5, 10);
        assert_eq!(
            statement.parameter("query_text"),
            Some(&ParameterValue::String("driver's seat".to_string()))
        );
    }

    #[test]
    fn grouped_search_aggregates_per_uri() {
        let config = config();
        let statement = QueryBuilder::new(&config).build_grouped_search_query("pump", 0.7, 100, 20, 5);
        let sql = statement.sql();

        assert!(sql.contains("MIN(distance) AS best_distance"));
        assert!(sql.contains("COUNT(1) AS hit_count"));
        assert!(sql.contains("ORDER BY distance ASC LIMIT 5) AS top_components"));
        assert!(sql.contains("GROUP BY uri"));
        assert!(sql.contains("ORDER BY best_distance ASC\nLIMIT 20"));
        assert!(sql.contains("top_k => 100"));
    }

    #[test]
    fn detail_query_filters_one_uri() {
        let config = config();
        let statement = QueryBuilder::new(&config).build_detail_query(
            "pump",
            "gs://patents/US9\\'1.pdf",
            0.8,
            70,
        );

        assert!(statement.sql().contains("AND uri = @uri"));
        assert!(statement.sql().ends_with("ORDER BY distance ASC"));
        assert_eq!(
            statement.parameter("uri"),
            Some(&ParameterValue::String("gs://patents/US9'1.pdf".to_string()))
        );
    }

    #[test]
    fn classification_asks_for_yes_or_no() {
        let config = config();
        let statement = QueryBuilder::new(&config).build_classification_query("heat sink");

        assert!(statement
            .sql()
            .contains("MODEL `acme-research.patent_analysis.gemini_vision_analyzer`"));
        assert!(statement.sql().contains("0.0 AS temperature"));
        match statement.parameter("prompt") {
            Some(ParameterValue::String(prompt)) => {
                assert!(prompt.contains("Answer with only 'Yes' or 'No'."));
                assert!(prompt.ends_with("Query: heat sink"));
            }
            other => panic!("unexpected prompt parameter: {other:?}"),
        }
    }

    #[test]
    fn non_positive_threshold_still_builds() {
        let config = config();
        let statement = QueryBuilder::new(&config).build_vector_search_query("valve", 0.0, 70);
        assert_eq!(
            statement.parameter("distance_threshold"),
            Some(&ParameterValue::Float64(0.0))
        );
    }

    #[test]
    fn inline_sql_renders_escaped_literals() {
        let config = config();
        let statement = QueryBuilder::new(&config).build_detail_query("driver\\'s seat", "gs://b/o", 0.25, 7);
        let inline = statement.inline_sql();

        assert!(inline.contains("CONCAT('Represent this technical patent component for semantic search: ', 'driver\\'s seat')"));
        assert!(inline.contains("distance < 0.25 AND uri = 'gs://b/o'"));
        assert!(!inline.contains('@'));
    }

    #[test]
    fn inline_sql_leaves_placeholder_text_inside_literals() {
        let config = config();
        let statement =
            QueryBuilder::new(&config).build_detail_query("mail @uri handler", "gs://b/o", 0.5, 7);
        let inline = statement.inline_sql();

        assert!(inline.contains("CONCAT('Represent this technical patent component for semantic search: ', 'mail @uri handler')"));
        assert!(inline.contains("distance < 0.5 AND uri = 'gs://b/o'"));
        assert!(!inline.contains("'mail 'gs://b/o' handler'"));
    }

    #[test]
    fn inline_sql_keeps_unknown_placeholders() {
        let statement = Statement::new("SELECT @known, @unknown, @known_suffix")
            .bind("known", ParameterValue::Float64(1.5));
        assert_eq!(statement.inline_sql(), "SELECT 1.5, @unknown, @known_suffix");
    }

    #[test]
    fn fingerprint_tracks_bound_values() {
        let config = config();
        let builder = QueryBuilder::new(&config);
        let near = builder.build_vector_search_query("valve", 0.5, 70);
        let far = builder.build_vector_search_query("valve", 0.9, 70);
        assert_ne!(near.fingerprint(), far.fingerprint());
    }
}
