//! `web_fetcher` tool (§ Glossary tool group `web`): HTTP GET/POST against an
//! arbitrary URL, returning the response body truncated to a fixed budget.

use async_trait::async_trait;
use serde_json::json;

use crate::tool_source::{ToolCallContent, ToolCallContext, ToolSourceError};
use crate::tools::Tool;

pub const TOOL_WEB_FETCHER: &str = "web_fetcher";

const MAX_BODY_CHARS: usize = 20_000;

pub struct WebFetcherTool {
    client: reqwest::Client,
}

impl WebFetcherTool {
    pub fn new() -> Self {
        Self { client: reqwest::Client::new() }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for WebFetcherTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebFetcherTool {
    fn name(&self) -> &str {
        TOOL_WEB_FETCHER
    }

    fn spec(&self) -> crate::tool_source::ToolSpec {
        crate::tool_source::ToolSpec {
            name: TOOL_WEB_FETCHER.to_string(),
            description: Some("Fetch or post to a URL over HTTP and return the response body.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string" },
                    "method": { "type": "string", "enum": ["GET", "POST"] },
                    "body": { "type": "string" }
                },
                "required": ["url"]
            }),
        }
    }

    async fn call(
        &self,
        args: serde_json::Value,
        _ctx: Option<&ToolCallContext>,
    ) -> Result<ToolCallContent, ToolSourceError> {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolSourceError::InvalidInput("missing 'url'".to_string()))?;
        let method = args.get("method").and_then(|v| v.as_str()).unwrap_or("GET");
        let body = args.get("body").and_then(|v| v.as_str()).map(str::to_string);

        let request = match method.to_ascii_uppercase().as_str() {
            "POST" => {
                let mut req = self.client.post(url);
                if let Some(body) = body {
                    req = req.body(body);
                }
                req
            }
            "GET" => self.client.get(url),
            other => return Err(ToolSourceError::InvalidInput(format!("unsupported method '{other}'"))),
        };

        let response =
            request.send().await.map_err(|e| ToolSourceError::Transport(format!("request failed: {e}")))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| ToolSourceError::Transport(format!("read body: {e}")))?;
        let truncated: String = text.chars().take(MAX_BODY_CHARS).collect();

        if status.is_success() {
            Ok(ToolCallContent::text(truncated))
        } else {
            Ok(ToolCallContent::error(format!("HTTP {status}\n{truncated}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_requires_url() {
        let tool = WebFetcherTool::new();
        let spec = tool.spec();
        assert_eq!(spec.name, TOOL_WEB_FETCHER);
        assert_eq!(spec.input_schema["required"][0], "url");
    }

    #[tokio::test]
    async fn missing_url_is_invalid_input() {
        let tool = WebFetcherTool::new();
        let err = tool.call(json!({}), None).await.unwrap_err();
        assert!(matches!(err, ToolSourceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unsupported_method_is_invalid_input() {
        let tool = WebFetcherTool::new();
        let err = tool.call(json!({"url": "http://example.com", "method": "DELETE"}), None).await.unwrap_err();
        assert!(matches!(err, ToolSourceError::InvalidInput(_)));
    }
}
