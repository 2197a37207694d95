use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use url::Url;

pub const DEFAULT_DATASET: &str = "patent_analysis";
pub const DEFAULT_EMBEDDING_MODEL: &str = "embedding_model";
pub const DEFAULT_CLASSIFICATION_MODEL: &str = "gemini_vision_analyzer";
pub const DEFAULT_SEARCH_INDEX: &str = "component_search_index";
pub const DEFAULT_KNOWLEDGE_GRAPH_TABLE: &str = "patent_knowledge_graph";
pub const DEFAULT_EXTRACTION_TABLE: &str = "ai_text_extraction";
pub const DEFAULT_LOCATION: &str = "US";
pub const DEFAULT_BIGQUERY_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2";

const IDENTIFIER_PATTERN: &str = r"^[A-Za-z0-9_.\-]+$";

fn identifier_pattern() -> Result<&'static Regex, ConfigError> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    if let Some(pattern) = PATTERN.get() {
        return Ok(pattern);
    }
    let compiled = Regex::new(IDENTIFIER_PATTERN)?;
    Ok(PATTERN.get_or_init(|| compiled))
}

fn check_identifier(pattern: &Regex, field: &'static str, value: &str) -> Result<(), ConfigError> {
    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier {
            field,
            value: value.to_string(),
        })
    }
}

/// Warehouse object names a search service targets.
///
/// Identifiers are spliced into SQL between backticks (they cannot be bound as
/// parameters), so every name is checked against `[A-Za-z0-9_.-]+` when the
/// config is built and the struct exposes no setters afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    project_id: String,
    dataset_id: String,
    embedding_model: String,
    classification_model: String,
    search_index: String,
    knowledge_graph_table: String,
    extraction_table: String,
}

impl SearchConfig {
    pub fn new(project_id: impl Into<String>) -> Result<Self, ConfigError> {
        SearchConfigBuilder::new(project_id).build()
    }

    pub fn builder(project_id: impl Into<String>) -> SearchConfigBuilder {
        SearchConfigBuilder::new(project_id)
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    pub fn embedding_model(&self) -> String {
        self.qualified(&self.embedding_model)
    }

    pub fn classification_model(&self) -> String {
        self.qualified(&self.classification_model)
    }

    pub fn search_index(&self) -> String {
        self.qualified(&self.search_index)
    }

    pub fn knowledge_graph_table(&self) -> String {
        self.qualified(&self.knowledge_graph_table)
    }

    pub fn extraction_table(&self) -> String {
        self.qualified(&self.extraction_table)
    }

    fn qualified(&self, name: &str) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset_id, name)
    }
}

#[derive(Debug, Clone)]
pub struct SearchConfigBuilder {
    config: SearchConfig,
}

impl SearchConfigBuilder {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            config: SearchConfig {
                project_id: project_id.into(),
                dataset_id: DEFAULT_DATASET.to_string(),
                embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
                classification_model: DEFAULT_CLASSIFICATION_MODEL.to_string(),
                search_index: DEFAULT_SEARCH_INDEX.to_string(),
                knowledge_graph_table: DEFAULT_KNOWLEDGE_GRAPH_TABLE.to_string(),
                extraction_table: DEFAULT_EXTRACTION_TABLE.to_string(),
            },
        }
    }

    pub fn dataset_id(mut self, value: impl Into<String>) -> Self {
        self.config.dataset_id = value.into();
        self
    }

    pub fn embedding_model(mut self, value: impl Into<String>) -> Self {
        self.config.embedding_model = value.into();
        self
    }

    pub fn classification_model(mut self, value: impl Into<String>) -> Self {
        self.config.classification_model = value.into();
        self
    }

    pub fn search_index(mut self, value: impl Into<String>) -> Self {
        self.config.search_index = value.into();
        self
    }

    pub fn knowledge_graph_table(mut self, value: impl Into<String>) -> Self {
        self.config.knowledge_graph_table = value.into();
        self
    }

    pub fn extraction_table(mut self, value: impl Into<String>) -> Self {
        self.config.extraction_table = value.into();
        self
    }

    pub fn build(self) -> Result<SearchConfig, ConfigError> {
        let config = self.config;
        let pattern = identifier_pattern()?;
        check_identifier(pattern, "project", &config.project_id)?;
        check_identifier(pattern, "dataset", &config.dataset_id)?;
        check_identifier(pattern, "embedding model", &config.embedding_model)?;
        check_identifier(pattern, "classification model", &config.classification_model)?;
        check_identifier(pattern, "search index", &config.search_index)?;
        check_identifier(pattern, "knowledge graph table", &config.knowledge_graph_table)?;
        check_identifier(pattern, "extraction table", &config.extraction_table)?;
        Ok(config)
    }
}

/// Process-level settings, normally filled from flags or environment variables
/// by the CLI.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub app_title: String,
    pub project_id: Option<String>,
    pub dataset_id: Option<String>,
    pub access_token: Option<String>,
    pub location: String,
    pub knowledge_graph_table: String,
    pub endpoint: String,
    pub debug: bool,
}

impl Settings {
    /// Reports every missing required variable at once, in declaration order.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("GOOGLE_CLOUD_PROJECT_ID", &self.project_id),
            ("GCP_ACCESS_TOKEN", &self.access_token),
            ("BQ_DATASET_ID", &self.dataset_id),
        ];

        let missing: Vec<&'static str> = required
            .into_iter()
            .filter(|(_, value)| value.as_deref().map_or(true, |value| value.trim().is_empty()))
            .map(|(name, _)| name)
            .collect();

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        Url::parse(&self.endpoint)?;
        Ok(())
    }

    pub fn search_config(&self) -> Result<SearchConfig, ConfigError> {
        let project_id = self
            .project_id
            .clone()
            .ok_or(ConfigError::Missing(vec!["GOOGLE_CLOUD_PROJECT_ID"]))?;

        let mut builder = SearchConfig::builder(project_id)
            .knowledge_graph_table(self.knowledge_graph_table.clone());
        if let Some(dataset) = &self.dataset_id {
            builder = builder.dataset_id(dataset.clone());
        }
        builder.build()
    }
}
