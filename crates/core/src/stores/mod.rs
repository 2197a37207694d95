pub mod bigquery;

pub use bigquery::BigQueryStore;
