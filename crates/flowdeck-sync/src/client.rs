use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use flowdeck_core::config::RuntimeConfig;
use flowdeck_core::error::{FlowdeckError, Result};
use flowdeck_core::traits::RuntimeClient;
use flowdeck_core::types::*;

/// Reject names that could escape the runtime's workflow directory.
pub fn validate_workflow_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(FlowdeckError::InvalidWorkflowName(name.to_string()));
    }
    if !(name.ends_with(".yaml") || name.ends_with(".yml")) {
        return Err(FlowdeckError::InvalidWorkflowName(name.to_string()));
    }
    Ok(())
}

#[derive(Serialize)]
struct SaveRequest<'a> {
    name: &'a str,
    definition: &'a WorkflowDefinition,
}

#[derive(Serialize)]
struct ApproveRequest<'a> {
    request_id: &'a str,
}

/// [`RuntimeClient`] over the runtime's HTTP API.
pub struct HttpRuntimeClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpRuntimeClient {
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| FlowdeckError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        match self.api_key {
            Some(ref key) => req.header("Authorization", key),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder, what: &str) -> Result<T> {
        let response = req
            .send()
            .await
            .map_err(|e| FlowdeckError::Transport(format!("{what}: {e}")))?;
        let response = check_status(response, what).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| FlowdeckError::Transport(format!("{what}: invalid response body: {e}")))
    }
}

async fn check_status(response: Response, what: &str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Err(FlowdeckError::Transport(format!(
        "{what}: HTTP {status}: {body}"
    )))
}

impl RuntimeClient for HttpRuntimeClient {
    fn fetch_definition(&self, name: &str) -> BoxFuture<'_, Result<WorkflowDefinition>> {
        let name = name.to_string();
        Box::pin(async move {
            validate_workflow_name(&name)?;
            let url = self.url(&format!(
                "/api/workflows/definition/{}",
                urlencoding::encode(&name)
            ));
            debug!(url = %url, "Fetching definition");
            self.send(self.http.get(url), "fetch definition").await
        })
    }

    fn fetch_active(&self) -> BoxFuture<'_, Result<Vec<ActiveInstance>>> {
        Box::pin(async move {
            let raw: Value = self
                .send(self.http.get(self.url("/api/workflows/active")), "fetch active")
                .await?;
            ActiveInstance::parse_all(raw)
        })
    }

    fn fetch_history(&self, limit: usize) -> BoxFuture<'_, Result<Vec<RunSummary>>> {
        Box::pin(async move {
            let req = self
                .http
                .get(self.url("/api/workflows/history"))
                .query(&[("limit", limit)]);
            self.send(req, "fetch history").await
        })
    }

    fn fetch_run(&self, run_id: &str) -> BoxFuture<'_, Result<HistoricalRun>> {
        let run_id = run_id.to_string();
        Box::pin(async move {
            let url = self.url(&format!(
                "/api/workflows/history/{}",
                urlencoding::encode(&run_id)
            ));
            self.send(self.http.get(url), "fetch run").await
        })
    }

    fn save_definition(
        &self,
        name: &str,
        definition: &WorkflowDefinition,
    ) -> BoxFuture<'_, Result<Acknowledgement>> {
        let name = name.to_string();
        let definition = definition.clone();
        Box::pin(async move {
            validate_workflow_name(&name)?;
            let body = SaveRequest {
                name: &name,
                definition: &definition,
            };
            let req = self
                .authorized(self.http.post(self.url("/api/workflows/save")))
                .json(&body);
            self.send(req, "save definition").await
        })
    }

    fn approve_gate(&self, request_id: &str) -> BoxFuture<'_, Result<Acknowledgement>> {
        let request_id = request_id.to_string();
        Box::pin(async move {
            let body = ApproveRequest {
                request_id: &request_id,
            };
            let req = self
                .authorized(self.http.post(self.url("/api/gate/approve")))
                .json(&body);
            self.send(req, "approve gate").await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, api_key: Option<&str>) -> HttpRuntimeClient {
        HttpRuntimeClient::new(&RuntimeConfig {
            base_url: format!("{}/", server.uri()),
            api_key: api_key.map(String::from),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_workflow_name_validation() {
        assert!(validate_workflow_name("default_agent_loop.yaml").is_ok());
        assert!(validate_workflow_name("flow.yml").is_ok());
        for bad in ["../etc/passwd.yaml", "flow.json", "", "a/b.yaml", "..yaml"] {
            assert!(matches!(
                validate_workflow_name(bad),
                Err(FlowdeckError::InvalidWorkflowName(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_fetch_definition() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/workflows/definition/flow.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "nodes": [{"id": "in", "type": "InputNode"}]
            })))
            .mount(&server)
            .await;

        let def = client(&server, None).fetch_definition("flow.yaml").await.unwrap();
        assert_eq!(def.nodes.len(), 1);
        assert_eq!(def.nodes[0].node_type, "InputNode");
    }

    #[tokio::test]
    async fn test_invalid_name_never_sent() {
        let server = MockServer::start().await;
        let err = client(&server, None)
            .fetch_definition("../secret.yaml")
            .await
            .unwrap_err();
        assert!(matches!(err, FlowdeckError::InvalidWorkflowName(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_active_keeps_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/workflows/active"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"req-b": {"node_outputs": {"x": 1}}, "req-a": {"node_outputs": null}}"#,
            ))
            .mount(&server)
            .await;

        let active = client(&server, None).fetch_active().await.unwrap();
        let ids: Vec<&str> = active.iter().map(|a| a.request_id.as_str()).collect();
        assert_eq!(ids, vec!["req-b", "req-a"]);
        assert!(active[1].snapshot.node_outputs.is_empty());
    }

    #[tokio::test]
    async fn test_server_error_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/workflows/active"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let err = client(&server, None).fetch_active().await.unwrap_err();
        match err {
            FlowdeckError::Transport(msg) => assert!(msg.contains("503")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_history_and_run() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/workflows/history"))
            .and(query_param("limit", "5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": "run-1",
                "workflow_name": "flow.yaml",
                "start_time": 1700000000.5,
                "end_time": null,
                "status": "FAILED",
                "error": "boom"
            }])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/workflows/history/run-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "run-1",
                "workflow_name": "flow.yaml",
                "final_state": {"node_outputs": {"in": "hi"}},
                "status": "FAILED",
                "error": "boom"
            })))
            .mount(&server)
            .await;

        let c = client(&server, None);
        let runs = c.fetch_history(5).await.unwrap();
        assert_eq!(runs[0].id, "run-1");
        let run = c.fetch_run("run-1").await.unwrap();
        assert!(run.is_failed());
        assert_eq!(run.final_state.executed_ids(), vec!["in"]);
    }

    #[tokio::test]
    async fn test_approve_sends_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/gate/approve"))
            .and(header("Authorization", "secret-key"))
            .and(body_json(json!({"request_id": "req-1"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"message": "approved"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let ack = client(&server, Some("secret-key"))
            .approve_gate("req-1")
            .await
            .unwrap();
        assert_eq!(ack.message, "approved");
    }

    #[tokio::test]
    async fn test_save_posts_definition() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/workflows/save"))
            .and(body_json(json!({
                "name": "flow.yaml",
                "definition": {"nodes": [{"id": "in", "type": "InputNode"}]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "saved"})))
            .expect(1)
            .mount(&server)
            .await;

        let def = WorkflowDefinition::new(vec![NodeDescriptor::new("in", "InputNode")]);
        let ack = client(&server, None)
            .save_definition("flow.yaml", &def)
            .await
            .unwrap();
        assert_eq!(ack.message, "saved");
    }
}
