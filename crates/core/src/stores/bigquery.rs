use crate::config::{DEFAULT_BIGQUERY_ENDPOINT, DEFAULT_LOCATION};
use crate::error::WarehouseError;
use crate::query::Statement;
use crate::traits::{ResultSet, Warehouse};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Map, Number, Value};
use tracing::debug;
use url::Url;
use uuid::Uuid;

const BACKEND: &str = "bigquery";
const DEFAULT_POLL_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 30;

/// [`Warehouse`] over the BigQuery REST API (`jobs.query` plus
/// `jobs.getQueryResults` for slow jobs and further pages).
pub struct BigQueryStore {
    client: Client,
    endpoint: String,
    project_id: String,
    location: String,
    access_token: Option<String>,
    poll_timeout_ms: u64,
    max_poll_attempts: u32,
}

impl BigQueryStore {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: DEFAULT_BIGQUERY_ENDPOINT.to_string(),
            project_id: project_id.into(),
            location: DEFAULT_LOCATION.to_string(),
            access_token: None,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_polling(mut self, poll_timeout_ms: u64, max_poll_attempts: u32) -> Self {
        self.poll_timeout_ms = poll_timeout_ms;
        self.max_poll_attempts = max_poll_attempts;
        self
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn query_url(&self) -> String {
        format!("{}/projects/{}/queries", self.endpoint, self.project_id)
    }

    fn results_url(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<Url, WarehouseError> {
        let mut url = Url::parse(&format!("{}/{}", self.query_url(), job.job_id))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("timeoutMs", &self.poll_timeout_ms.to_string());
            pairs.append_pair(
                "location",
                job.location.as_deref().unwrap_or(&self.location),
            );
            if let Some(token) = page_token {
                pairs.append_pair("pageToken", token);
            }
        }
        Ok(url)
    }

    fn request_body(&self, statement: &Statement) -> Value {
        let parameters: Vec<Value> = statement
            .parameters()
            .iter()
            .map(|parameter| {
                json!({
                    "name": parameter.name,
                    "parameterType": { "type": parameter.value.type_name() },
                    "parameterValue": { "value": parameter.value.wire_value() },
                })
            })
            .collect();

        json!({
            "query": statement.sql(),
            "useLegacySql": false,
            "parameterMode": "NAMED",
            "queryParameters": parameters,
            "location": self.location,
            "requestId": Uuid::new_v4().to_string(),
            "timeoutMs": self.poll_timeout_ms,
        })
    }

    async fn fetch_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse, WarehouseError> {
        let url = self.results_url(job, page_token)?;
        let response = self.authorized(self.client.get(url)).send().await?;
        parse_response(response).await
    }
}

#[async_trait]
impl Warehouse for BigQueryStore {
    async fn execute(&self, statement: &Statement) -> Result<ResultSet, WarehouseError> {
        let response = self
            .authorized(self.client.post(self.query_url()))
            .json(&self.request_body(statement))
            .send()
            .await?;
        let mut page = parse_response(response).await?;

        let mut attempts = 0;
        while !page.job_complete {
            let job = page
                .job_reference
                .clone()
                .ok_or_else(|| WarehouseError::Incomplete("<unknown>".to_string()))?;
            if attempts >= self.max_poll_attempts {
                return Err(WarehouseError::Incomplete(job.job_id));
            }
            attempts += 1;
            debug!(job_id = %job.job_id, attempts, "waiting for bigquery job");
            page = self.fetch_results(&job, None).await?;
            if page.job_reference.is_none() {
                page.job_reference = Some(job);
            }
        }

        let schema = page.schema.take().unwrap_or_default();
        let mut rows = convert_rows(&schema.fields, std::mem::take(&mut page.rows));

        while let Some(token) = page.page_token.take() {
            let job = page
                .job_reference
                .clone()
                .ok_or_else(|| WarehouseError::Incomplete("<unknown>".to_string()))?;
            page = self.fetch_results(&job, Some(&token)).await?;
            if page.job_reference.is_none() {
                page.job_reference = Some(job);
            }
            rows.extend(convert_rows(&schema.fields, std::mem::take(&mut page.rows)));
        }

        let columns = schema.fields.iter().map(|field| field.name.clone()).collect();
        Ok(ResultSet::new(columns, rows))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<TableField>,
}

#[derive(Debug, Deserialize)]
struct TableField {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    mode: Option<String>,
    #[serde(default)]
    fields: Vec<TableField>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

async fn parse_response(response: Response) -> Result<QueryResponse, WarehouseError> {
    let status = response.status();
    if !status.is_success() {
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let details = body
            .pointer("/error/message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| status.to_string());
        return Err(WarehouseError::BackendResponse {
            backend: BACKEND.to_string(),
            details,
        });
    }

    let body: Value = response.json().await?;
    Ok(serde_json::from_value(body)?)
}

fn convert_rows(fields: &[TableField], rows: Vec<TableRow>) -> Vec<Map<String, Value>> {
    rows.into_iter()
        .map(|row| convert_record(fields, row.f))
        .collect()
}

fn convert_record(fields: &[TableField], cells: Vec<TableCell>) -> Map<String, Value> {
    fields
        .iter()
        .zip(cells)
        .map(|(field, cell)| (field.name.clone(), convert_cell(field, cell.v)))
        .collect()
}

fn convert_cell(field: &TableField, value: Value) -> Value {
    if field.mode.as_deref() == Some("REPEATED") {
        return match value {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| {
                        let inner = match item {
                            Value::Object(mut wrapper) => wrapper.remove("v").unwrap_or(Value::Null),
                            other => other,
                        };
                        convert_single(field, inner)
                    })
                    .collect(),
            ),
            Value::Null => Value::Array(Vec::new()),
            other => other,
        };
    }
    convert_single(field, value)
}

fn convert_single(field: &TableField, value: Value) -> Value {
    match (field.field_type.as_str(), value) {
        (_, Value::Null) => Value::Null,
        ("RECORD" | "STRUCT", Value::Object(mut record)) => {
            let cells = match record.remove("f") {
                Some(Value::Array(cells)) => cells
                    .into_iter()
                    .map(|cell| match cell {
                        Value::Object(mut wrapper) => TableCell {
                            v: wrapper.remove("v").unwrap_or(Value::Null),
                        },
                        other => TableCell { v: other },
                    })
                    .collect(),
                _ => Vec::new(),
            };
            Value::Object(convert_record(&field.fields, cells))
        }
        ("INTEGER" | "INT64", Value::String(text)) => text
            .parse::<i64>()
            .map(|number| Value::Number(number.into()))
            .unwrap_or(Value::String(text)),
        ("FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC", Value::String(text)) => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::String(text)),
        ("BOOLEAN" | "BOOL", Value::String(text)) => match text.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(text),
        },
        (_, other) => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ComponentHit, GroupedResult};
    use crate::query::ParameterValue;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> BigQueryStore {
        BigQueryStore::new("acme-research")
            .with_endpoint(server.uri())
            .with_access_token("test-token")
    }

    fn flat_schema() -> Value {
        json!({
            "fields": [
                {"name": "uri", "type": "STRING", "mode": "NULLABLE"},
                {"name": "component_name", "type": "STRING", "mode": "NULLABLE"},
                {"name": "component_function", "type": "STRING", "mode": "NULLABLE"},
                {"name": "distance", "type": "FLOAT", "mode": "NULLABLE"}
            ]
        })
    }

    fn flat_row(uri: &str, name: &str, distance: &str) -> Value {
        json!({"f": [{"v": uri}, {"v": name}, {"v": "moves fluid"}, {"v": distance}]})
    }

    fn statement() -> Statement {
        Statement::new("SELECT uri FROM t WHERE distance < @distance_threshold")
            .bind("distance_threshold", ParameterValue::Float64(0.8))
            .bind("query_text", ParameterValue::String("pump".to_string()))
    }

    #[tokio::test]
    async fn sends_named_parameters_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects/acme-research/queries"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_partial_json(json!({
                "useLegacySql": false,
                "parameterMode": "NAMED",
                "location": "US",
                "queryParameters": [
                    {"name": "distance_threshold", "parameterType": {"type": "FLOAT64"}, "parameterValue": {"value": "0.8"}},
                    {"name": "query_text", "parameterType": {"type": "STRING"}, "parameterValue": {"value": "pump"}}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobComplete": true,
                "jobReference": {"projectId": "acme-research", "jobId": "job-1", "location": "US"},
                "schema": flat_schema(),
                "rows": [flat_row("gs://p/1", "impeller", "0.125")]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = store(&server).execute(&statement()).await.expect("query succeeds");
        assert_eq!(result.columns().len(), 4);

        let hits = result.decode::<ComponentHit>().expect("rows decode");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].component_name, "impeller");
        assert_eq!(hits[0].distance, 0.125);
    }

    #[tokio::test]
    async fn converts_nested_repeated_records() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects/acme-research/queries"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobComplete": true,
                "jobReference": {"jobId": "job-2"},
                "schema": {"fields": [
                    {"name": "uri", "type": "STRING"},
                    {"name": "best_distance", "type": "FLOAT"},
                    {"name": "hit_count", "type": "INTEGER"},
                    {"name": "top_components", "type": "RECORD", "mode": "REPEATED", "fields": [
                        {"name": "component_name", "type": "STRING"},
                        {"name": "component_function", "type": "STRING"},
                        {"name": "distance", "type": "FLOAT"}
                    ]}
                ]},
                "rows": [{"f": [
                    {"v": "gs://p/7"},
                    {"v": "0.2"},
                    {"v": "3"},
                    {"v": [
                        {"v": {"f": [{"v": "valve"}, {"v": "regulates"}, {"v": "0.2"}]}},
                        {"v": {"f": [{"v": "seal"}, {"v": null}, {"v": "0.4"}]}}
                    ]}
                ]}]
            })))
            .mount(&server)
            .await;

        let result = store(&server).execute(&statement()).await.expect("query succeeds");
        let rows = result.decode::<GroupedResult>().expect("rows decode");

        assert_eq!(rows[0].hit_count, 3);
        assert_eq!(rows[0].best_distance, 0.2);
        assert_eq!(rows[0].top_components.len(), 2);
        assert_eq!(rows[0].top_components[1].component_name, "seal");
        assert_eq!(rows[0].top_components[1].component_function, "");
    }

    #[tokio::test]
    async fn polls_incomplete_jobs_and_follows_pages() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects/acme-research/queries"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobComplete": false,
                "jobReference": {"jobId": "job-3", "location": "EU"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/acme-research/queries/job-3"))
            .and(query_param("pageToken", "page-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobComplete": true,
                "schema": flat_schema(),
                "rows": [flat_row("gs://p/2", "rotor", "0.3")]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/acme-research/queries/job-3"))
            .and(query_param("location", "EU"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobComplete": true,
                "schema": flat_schema(),
                "rows": [flat_row("gs://p/1", "stator", "0.1")],
                "pageToken": "page-2"
            })))
            .mount(&server)
            .await;

        let result = store(&server).execute(&statement()).await.expect("query succeeds");
        let hits = result.decode::<ComponentHit>().expect("rows decode");

        let names: Vec<&str> = hits.iter().map(|hit| hit.component_name.as_str()).collect();
        assert_eq!(names, ["stator", "rotor"]);
    }

    #[tokio::test]
    async fn gives_up_after_poll_budget() {
        let server = MockServer::start().await;
        let pending = json!({"jobComplete": false, "jobReference": {"jobId": "job-4"}});
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(pending.clone()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(pending))
            .mount(&server)
            .await;

        let error = store(&server)
            .with_polling(10, 2)
            .execute(&statement())
            .await
            .expect_err("job never completes");
        assert!(matches!(error, WarehouseError::Incomplete(job) if job == "job-4"));
    }

    #[tokio::test]
    async fn surfaces_backend_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": 400, "message": "Syntax error: Unexpected keyword"}
            })))
            .mount(&server)
            .await;

        let error = store(&server).execute(&statement()).await.expect_err("bad sql");
        assert_eq!(
            error.to_string(),
            "invalid response from bigquery: Syntax error: Unexpected keyword"
        );
    }
}
