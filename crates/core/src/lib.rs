pub mod config;
pub mod controller;
pub mod error;
pub mod format;
pub mod models;
pub mod orchestrator;
pub mod query;
pub mod stores;
pub mod traits;
pub mod visualization;

pub use config::{SearchConfig, SearchConfigBuilder, Settings};
pub use controller::{format_number, AppController};
pub use error::{ConfigError, SearchError, WarehouseError};
pub use format::{format_search_result, format_search_results, similarity_percent};
pub use models::{
    AppStats, ComponentHit, ComponentMatch, ConnectionStatus, DistributionRow, GroupedResult,
    OutlierDisplayRow, OutlierRow, PortfolioRow, SearchOutcome, SearchResponse, SearchResultRow,
    VisualizationErrorKind, VisualizationResult,
};
pub use orchestrator::{
    sanitize_for_sql, sanitize_value, SemanticSearchService, DEFAULT_DISTANCE_THRESHOLD,
    DEFAULT_TOP_K,
};
pub use query::{
    ParameterValue, QueryBuilder, QueryParameter, Statement, DEFAULT_PATENTS_LIMIT,
    DEFAULT_PER_URI_LIMIT,
};
pub use stores::BigQueryStore;
pub use traits::{ResultSet, Warehouse};
pub use visualization::{
    distribution_histogram, format_outlier_data_for_display, VisualizationService,
};
