use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{config::Config, table::RowSet};

/// Response envelope of the CKAN `datastore_search_sql` action.
#[derive(Debug, Deserialize)]
struct SqlEnvelope {
    success: bool,
    #[serde(default)]
    result: Option<SqlResult>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SqlResult {
    #[serde(default)]
    records: Vec<Map<String, Value>>,
}

/// Outcome of one query against the datastore. Transport errors, bad
/// statuses, unparseable bodies, and `success: false` all land in `Failed`;
/// nothing in this module returns `Err`, so the caller can fall back without
/// unwinding the pipeline.
#[derive(Debug)]
pub enum SqlOutcome {
    Rows(RowSet),
    Empty,
    Failed(String),
}

/// The one query shape the portal needs: every column of a resource, capped.
pub fn select_query(resource_id: &str, limit: usize) -> String {
    format!(r#"SELECT * FROM "{}" LIMIT {}"#, resource_id, limit)
}

/// GET the SQL endpoint with `query` in the `sql` parameter and classify the
/// response.
pub async fn run_query(client: &Client, cfg: &Config, query: &str) -> SqlOutcome {
    let url = cfg.sql_url();
    debug!(%url, query, "datastore SQL query");

    let resp = match client.get(&url).query(&[("sql", query)]).send().await {
        Ok(resp) => resp,
        Err(e) => return SqlOutcome::Failed(format!("request to {url} failed: {e}")),
    };
    let resp = match resp.error_for_status() {
        Ok(resp) => resp,
        Err(e) => return SqlOutcome::Failed(format!("bad status from {url}: {e}")),
    };
    let body = match resp.text().await {
        Ok(body) => body,
        Err(e) => return SqlOutcome::Failed(format!("reading body from {url}: {e}")),
    };
    parse_envelope(&body)
}

fn parse_envelope(body: &str) -> SqlOutcome {
    let envelope: SqlEnvelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(e) => return SqlOutcome::Failed(format!("malformed envelope: {e}")),
    };
    if !envelope.success {
        let reason = envelope
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no error detail".to_string());
        return SqlOutcome::Failed(format!("API reported failure: {reason}"));
    }
    let records = envelope.result.map(|r| r.records).unwrap_or_default();
    if records.is_empty() {
        return SqlOutcome::Empty;
    }
    SqlOutcome::Rows(RowSet::from_records(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_quotes_resource_and_caps() {
        assert_eq!(
            select_query("aaaa-1111", 500),
            r#"SELECT * FROM "aaaa-1111" LIMIT 500"#
        );
    }

    #[test]
    fn success_with_records_yields_rows() {
        let body = r#"{
            "success": true,
            "result": { "records": [
                { "delito": "robo", "anio_hecho": 2019 },
                { "delito": "fraude", "anio_hecho": 2019 }
            ]}
        }"#;
        match parse_envelope(body) {
            SqlOutcome::Rows(rows) => {
                assert_eq!(rows.len(), 2);
                assert_eq!(rows.value(0, "delito"), Some(&json!("robo")));
            }
            other => panic!("expected rows, got {other:?}"),
        }
    }

    #[test]
    fn success_with_no_records_is_empty_not_failed() {
        let body = r#"{ "success": true, "result": { "records": [] } }"#;
        assert!(matches!(parse_envelope(body), SqlOutcome::Empty));

        // some portal responses omit `result` entirely
        let body = r#"{ "success": true }"#;
        assert!(matches!(parse_envelope(body), SqlOutcome::Empty));
    }

    #[test]
    fn api_failure_carries_the_reason() {
        let body = r#"{ "success": false, "error": { "info": "resource not found" } }"#;
        match parse_envelope(body) {
            SqlOutcome::Failed(reason) => assert!(reason.contains("resource not found")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn malformed_body_is_a_failure() {
        assert!(matches!(
            parse_envelope("<html>gateway timeout</html>"),
            SqlOutcome::Failed(_)
        ));
    }
}
