use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time;

use reqwest::header;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

pub const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";

/// Enumeration of errors raised while querying a SPARQL endpoint.
#[derive(Error, Debug)]
pub enum SparqlError {
    #[error("failed to build SPARQL http client: {0}")]
    ClientBuildError(reqwest::Error),
    #[error("SPARQL request could not be completed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("SPARQL endpoint responded with status {0}: {1}")]
    StatusError(u16, String),
    #[error("SPARQL response is not a valid results document: {0}")]
    DecodeError(#[from] serde_json::Error),
    #[error("failed to read query file {path}: {error}")]
    QueryFileError { path: String, error: std::io::Error },
}

/// The `type` tag of a single binding, as defined by the SPARQL 1.1 JSON results format.
/// `typed-literal` is not part of the recommendation but some endpoints still emit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BindingKind {
    Uri,
    Literal,
    TypedLiteral,
    Bnode,
    #[serde(other)]
    Unknown,
}

/// One cell of a query result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawBinding {
    #[serde(rename = "type")]
    pub kind: BindingKind,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub datatype: Option<String>,
}

impl RawBinding {
    pub fn literal(value: &str, datatype: Option<&str>) -> Self {
        Self {
            kind: BindingKind::Literal,
            value: Some(value.to_owned()),
            datatype: datatype.map(str::to_owned),
        }
    }

    pub fn uri(value: &str) -> Self {
        Self {
            kind: BindingKind::Uri,
            value: Some(value.to_owned()),
            datatype: None,
        }
    }
}

/// A row of bindings. Variables left unbound by the query are simply absent.
pub type BindingRow = HashMap<String, RawBinding>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultsHead {
    #[serde(default)]
    pub vars: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultsBody {
    #[serde(default)]
    pub bindings: Vec<BindingRow>,
}

/// A decoded `application/sparql-results+json` document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SparqlResults {
    #[serde(default)]
    pub head: ResultsHead,
    #[serde(default)]
    pub results: ResultsBody,
}

impl SparqlResults {
    pub fn columns(&self) -> &[String] {
        &self.head.vars
    }

    pub fn rows(&self) -> &[BindingRow] {
        &self.results.bindings
    }
}

/// HTTP basic auth credentials for the endpoint.
#[derive(Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Runs SELECT queries against a triple-store endpoint.
pub struct SparqlClient {
    endpoint: String,
    auth: Option<BasicAuth>,
    client: reqwest::Client,
}

impl SparqlClient {
    pub fn new(
        endpoint: &str,
        auth: Option<BasicAuth>,
        request_timeout: time::Duration,
    ) -> Result<Self, SparqlError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static(SPARQL_RESULTS_JSON),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(request_timeout)
            .build()
            .map_err(SparqlError::ClientBuildError)?;

        Ok(Self {
            endpoint: endpoint.to_owned(),
            auth,
            client,
        })
    }

    /// Post `query` as a form parameter and decode the JSON results.
    pub async fn query(&self, query: &str) -> Result<SparqlResults, SparqlError> {
        let mut request = self.client.post(&self.endpoint).form(&[("query", query)]);

        if let Some(auth) = &self.auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        let response = request.send().await?;
        let status = response.status();

        info!(status = status.as_u16(), "received SPARQL response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SparqlError::StatusError(status.as_u16(), body));
        }

        let body = response.text().await?;
        let results: SparqlResults = serde_json::from_str(&body)?;

        debug!(
            columns = ?results.columns(),
            rows = results.rows().len(),
            "decoded SPARQL results"
        );

        Ok(results)
    }
}

/// Read a query from disk, folding line breaks into spaces.
pub fn read_query_file(path: impl AsRef<Path>) -> Result<String, SparqlError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|error| SparqlError::QueryFileError {
        path: path.display().to_string(),
        error,
    })?;

    Ok(contents.replace("\r\n", " ").replace('\n', " "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method, MockServer};
    use std::io::Write;

    const RESULTS: &str = r#"{
        "head": {"vars": ["patient", "age", "sex"]},
        "results": {"bindings": [
            {
                "patient": {"type": "uri", "value": "http://example.org/p/1"},
                "age": {"type": "literal", "datatype": "http://www.w3.org/2001/XMLSchema#integer", "value": "42"},
                "sex": {"type": "literal", "value": "f", "xml:lang": "en"}
            },
            {
                "patient": {"type": "bnode", "value": "b0"}
            }
        ]}
    }"#;

    #[test]
    fn test_decode_results_document() {
        let results: SparqlResults = serde_json::from_str(RESULTS).unwrap();

        assert_eq!(results.columns(), ["patient", "age", "sex"]);
        assert_eq!(results.rows().len(), 2);

        let first = &results.rows()[0];
        assert_eq!(first["patient"].kind, BindingKind::Uri);
        assert_eq!(
            first["age"].datatype.as_deref(),
            Some("http://www.w3.org/2001/XMLSchema#integer")
        );
        assert_eq!(first["sex"].value.as_deref(), Some("f"));

        let second = &results.rows()[1];
        assert_eq!(second["patient"].kind, BindingKind::Bnode);
        assert!(!second.contains_key("age"));
    }

    #[test]
    fn test_decode_unknown_binding_kind() {
        let binding: RawBinding =
            serde_json::from_str(r#"{"type": "triple", "value": "x"}"#).unwrap();

        assert_eq!(binding.kind, BindingKind::Unknown);
    }

    #[test]
    fn test_decode_empty_document() {
        let results: SparqlResults =
            serde_json::from_str(r#"{"head": {"vars": ["a"]}, "results": {"bindings": []}}"#)
                .unwrap();

        assert_eq!(results.columns(), ["a"]);
        assert!(results.rows().is_empty());
    }

    #[tokio::test]
    async fn test_query_posts_form_with_basic_auth() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(Method::POST)
                .path("/sparql")
                .header("accept", SPARQL_RESULTS_JSON)
                .header_exists("authorization")
                .body_contains("query=SELECT");
            then.status(200)
                .header("content-type", SPARQL_RESULTS_JSON)
                .body(RESULTS);
        });

        let auth = BasicAuth {
            username: "station".to_owned(),
            password: "secret".to_owned(),
        };
        let client = SparqlClient::new(
            &server.url("/sparql"),
            Some(auth),
            time::Duration::from_secs(5),
        )
        .unwrap();

        let results = client
            .query("SELECT ?patient ?age ?sex WHERE { ?patient ?p ?o }")
            .await
            .expect("query failed");

        mock.assert_hits(1);
        assert_eq!(results.rows().len(), 2);
    }

    #[tokio::test]
    async fn test_query_reports_error_status() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(Method::POST).path("/sparql");
            then.status(500).body("endpoint unavailable");
        });

        let client =
            SparqlClient::new(&server.url("/sparql"), None, time::Duration::from_secs(5)).unwrap();

        match client.query("SELECT * WHERE { ?s ?p ?o }").await {
            Err(SparqlError::StatusError(status, body)) => {
                assert_eq!(status, 500);
                assert_eq!(body, "endpoint unavailable");
            }
            other => panic!("expected a status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_query_reports_undecodable_body() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(Method::POST).path("/sparql");
            then.status(200).body("<html>not json</html>");
        });

        let client =
            SparqlClient::new(&server.url("/sparql"), None, time::Duration::from_secs(5)).unwrap();

        assert!(matches!(
            client.query("SELECT * WHERE { ?s ?p ?o }").await,
            Err(SparqlError::DecodeError(_))
        ));
    }

    #[test]
    fn test_read_query_file_folds_lines() {
        let path = std::env::temp_dir().join(format!("lc-common-query-{}.rq", std::process::id()));
        let mut file = fs::File::create(&path).unwrap();
        write!(file, "SELECT ?s\nWHERE {{\r\n  ?s ?p ?o\n}}").unwrap();

        let query = read_query_file(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(query, "SELECT ?s WHERE {   ?s ?p ?o }");
    }

    #[test]
    fn test_read_query_file_missing() {
        assert!(matches!(
            read_query_file("/nonexistent/query.rq"),
            Err(SparqlError::QueryFileError { .. })
        ));
    }
}
