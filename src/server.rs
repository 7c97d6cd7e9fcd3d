//! HTTP front end
//! Minimal HTTP server on a tokio TcpListener: an HTML question form plus a JSON API.
//! Each connection runs its own cycle against the shared agent.

use crate::agent::SqlAgent;
use crate::error::Result;
use crate::render::{render_error_page, render_form_page, render_html};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

const MAX_REQUEST_BYTES: usize = 1_000_000;

const CONTENT_JSON: &str = "application/json";
const CONTENT_HTML: &str = "text/html; charset=utf-8";

#[derive(Debug, Deserialize)]
struct AskRequest {
    question: String,
}

pub async fn serve(agent: Arc<SqlAgent>, addr: &str) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Server listening on http://{}", listener.local_addr()?);
    serve_listener(listener, agent).await
}

/// Accept loop over an already-bound listener.
pub async fn serve_listener(listener: TcpListener, agent: Arc<SqlAgent>) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("New connection from: {}", peer);
        let agent = Arc::clone(&agent);
        tokio::spawn(async move { handle_connection(stream, agent).await });
    }
}

async fn handle_connection(mut stream: TcpStream, agent: Arc<SqlAgent>) {
    let mut buffer = Vec::new();
    let mut temp_buf = [0; 8192];

    let read_result = timeout(Duration::from_secs(5), async {
        loop {
            match stream.read(&mut temp_buf).await {
                Ok(0) => break,
                Ok(n) => {
                    buffer.extend_from_slice(&temp_buf[..n]);
                    if let Some(headers_end) = find_headers_end(&buffer) {
                        let head = String::from_utf8_lossy(&buffer[..headers_end]);
                        match extract_content_length(&head) {
                            Some(content_length) => {
                                if buffer.len() >= headers_end + content_length {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    if buffer.len() > MAX_REQUEST_BYTES {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read from stream: {}", e);
                    return Err(e);
                }
            }
        }
        Ok(())
    })
    .await;

    match read_result {
        Err(_) => {
            warn!("Request read timeout");
            return;
        }
        Ok(Err(_)) => return,
        Ok(Ok(())) => {}
    }
    if buffer.is_empty() {
        return;
    }

    let response = match String::from_utf8(buffer) {
        Ok(request) => handle_request(&agent, &request).await,
        Err(e) => {
            warn!("Failed to parse request as UTF-8: {}", e);
            create_response(400, "Bad Request", CONTENT_JSON, r#"{"error":"request is not valid UTF-8"}"#)
        }
    };
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        error!("Failed to write response: {}", e);
    }
}

/// Route one raw HTTP request to its handler and return the raw response.
pub async fn handle_request(agent: &SqlAgent, request: &str) -> String {
    let mut lines = request.lines();
    let request_line = match lines.next() {
        Some(line) => line,
        None => return create_response(400, "Bad Request", CONTENT_JSON, "{}"),
    };

    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return create_response(400, "Bad Request", CONTENT_JSON, "{}");
    }
    let method = parts[0];
    let full_path = parts[1];
    let path_str = full_path.split('?').next().unwrap_or("/");
    let path = match path_str.trim_end_matches('/') {
        "" => "/",
        p => p,
    };

    debug!("Request: {} {}", method, path);

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }
    let body = request
        .find("\r\n\r\n")
        .map(|i| &request[i + 4..])
        .unwrap_or("");

    match (method, path) {
        ("OPTIONS", _) => create_response(204, "No Content", CONTENT_JSON, ""),
        ("GET", "/") => create_response(200, "OK", CONTENT_HTML, &render_form_page()),
        ("GET", "/api/health") => create_response(200, "OK", CONTENT_JSON, r#"{"status":"ok"}"#),
        ("POST", "/ask") => {
            let form = parse_form(body);
            match form.get("question").map(|q| q.trim()).filter(|q| !q.is_empty()) {
                Some(question) => {
                    let response = agent.ask(question).await;
                    create_response(200, "OK", CONTENT_HTML, &render_html(&response))
                }
                None => create_response(
                    400,
                    "Bad Request",
                    CONTENT_HTML,
                    &render_error_page("Please enter a question."),
                ),
            }
        }
        ("POST", "/api/ask") => {
            if let Some(content_type) = headers.get("content-type") {
                if !content_type.starts_with(CONTENT_JSON) {
                    warn!("Unexpected content type for /api/ask: {}", content_type);
                }
            }
            let ask: AskRequest = match serde_json::from_str(body) {
                Ok(ask) => ask,
                Err(e) => {
                    return create_response(
                        400,
                        "Bad Request",
                        CONTENT_JSON,
                        &error_json(&format!("Invalid request body: {}", e)),
                    )
                }
            };
            let question = ask.question.trim();
            if question.is_empty() {
                return create_response(
                    400,
                    "Bad Request",
                    CONTENT_JSON,
                    &error_json("question must not be empty"),
                );
            }
            let response = agent.ask(question).await;
            match serde_json::to_string(&response) {
                Ok(json) => create_response(200, "OK", CONTENT_JSON, &json),
                Err(e) => create_response(
                    500,
                    "Internal Server Error",
                    CONTENT_JSON,
                    &error_json(&e.to_string()),
                ),
            }
        }
        _ => create_response(404, "Not Found", CONTENT_JSON, r#"{"error":"Not found"}"#),
    }
}

fn find_headers_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn extract_content_length(request: &str) -> Option<usize> {
    for line in request.lines() {
        if line.to_lowercase().starts_with("content-length:") {
            if let Some(value) = line.split(':').nth(1) {
                return value.trim().parse().ok();
            }
        }
    }
    None
}

fn error_json(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}

/// Decode an `application/x-www-form-urlencoded` body.
fn parse_form(body: &str) -> HashMap<String, String> {
    body.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (url_decode(key), url_decode(value))
        })
        .collect()
}

fn url_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit() =>
            {
                out.push(hex_value(bytes[i + 1]) << 4 | hex_value(bytes[i + 2]));
                i += 2;
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

fn create_response(status: u16, status_text: &str, content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: {}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text,
        content_type,
        body.len(),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Dialect, SchemaDescription};
    use crate::executor::{ExecutionOutcome, QueryExecutor, Record, RowSet, SqlCandidate};
    use crate::llm::LanguageModel;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    /// Generates one fixed query and answers with markup in the text
    struct FixedModel;

    #[async_trait]
    impl LanguageModel for FixedModel {
        async fn complete(&self, prompt: &str) -> Result<String> {
            if prompt.contains("explains database query results") {
                Ok("There are <b>42</b> employees & counting.".to_string())
            } else {
                Ok("```sql\nSELECT COUNT(*) AS n FROM employees\n```".to_string())
            }
        }
    }

    struct FixedExecutor;

    #[async_trait]
    impl QueryExecutor for FixedExecutor {
        async fn execute(&self, _sql: &SqlCandidate) -> ExecutionOutcome {
            let mut record = Record::new();
            record.insert("n".to_string(), json!(42));
            ExecutionOutcome::Success {
                rows: RowSet::new(vec!["n".to_string()], vec![record]),
            }
        }
    }

    fn agent() -> SqlAgent {
        SqlAgent::with_model(
            Arc::new(FixedModel),
            Arc::new(FixedExecutor),
            Dialect::MySql,
            SchemaDescription::from("Table: employees\nColumns: id INT, name VARCHAR(100)"),
        )
    }

    fn post(path: &str, content_type: &str, body: &str) -> String {
        format!(
            "POST {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n{}",
            path,
            content_type,
            body.len(),
            body
        )
    }

    fn body_of(response: &str) -> &str {
        response
            .split_once("\r\n\r\n")
            .map(|(_, body)| body)
            .unwrap_or("")
    }

    #[tokio::test]
    async fn test_api_ask_returns_agent_response_json() {
        let request = post("/api/ask", CONTENT_JSON, r#"{"question":"How many employees?"}"#);
        let response = handle_request(&agent(), &request).await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Type: application/json\r\n"));

        let parsed: Value = serde_json::from_str(body_of(&response)).unwrap();
        assert_eq!(parsed["status"], "answered");
        assert_eq!(parsed["question"], "How many employees?");
        assert_eq!(parsed["sql"], "SELECT COUNT(*) AS n FROM employees");
        assert_eq!(parsed["executions"], 1);
        assert_eq!(parsed["answer"], "There are <b>42</b> employees & counting.");
    }

    #[tokio::test]
    async fn test_api_ask_rejects_empty_question() {
        let request = post("/api/ask", CONTENT_JSON, r#"{"question":"   "}"#);
        let response = handle_request(&agent(), &request).await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        let parsed: Value = serde_json::from_str(body_of(&response)).unwrap();
        assert_eq!(parsed["error"], "question must not be empty");
    }

    #[tokio::test]
    async fn test_api_ask_rejects_malformed_json() {
        let request = post("/api/ask", CONTENT_JSON, r#"{"question": "#);
        let response = handle_request(&agent(), &request).await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        let parsed: Value = serde_json::from_str(body_of(&response)).unwrap();
        assert!(parsed["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid request body:"));
    }

    #[tokio::test]
    async fn test_form_ask_renders_escaped_answer() {
        let request = post(
            "/ask",
            "application/x-www-form-urlencoded",
            "question=How+many+employees%3F",
        );
        let response = handle_request(&agent(), &request).await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Type: text/html; charset=utf-8\r\n"));

        let page = body_of(&response);
        assert!(page.contains("There are &lt;b&gt;42&lt;/b&gt; employees &amp; counting."));
        assert!(!page.contains("<b>42</b>"));
        assert!(page.contains("How many employees?"));
    }

    #[tokio::test]
    async fn test_form_ask_without_question_is_rejected() {
        let request = post("/ask", "application/x-www-form-urlencoded", "question=");
        let response = handle_request(&agent(), &request).await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.contains("Please enter a question."));
    }

    #[tokio::test]
    async fn test_health_and_unknown_routes() {
        let agent = agent();
        let health = handle_request(&agent, "GET /api/health HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        assert!(health.starts_with("HTTP/1.1 200 OK\r\n"));
        assert_eq!(body_of(&health), r#"{"status":"ok"}"#);

        let missing = handle_request(&agent, "GET /api/nothing HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        assert!(missing.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert_eq!(body_of(&missing), r#"{"error":"Not found"}"#);

        let form = handle_request(&agent, "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await;
        assert!(form.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(body_of(&form).contains("<form"));
    }

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode("How+many%20employees%3F"), "How many employees?");
        assert_eq!(url_decode("caf%C3%A9"), "café");
        assert_eq!(url_decode("100%"), "100%");
        assert_eq!(url_decode("%zz"), "%zz");
    }

    #[test]
    fn test_parse_form() {
        let form = parse_form("question=Top+5+customers&extra=");
        assert_eq!(form.get("question").unwrap(), "Top 5 customers");
        assert_eq!(form.get("extra").unwrap(), "");
    }

    #[test]
    fn test_extract_content_length() {
        let head = "POST /api/ask HTTP/1.1\r\nHost: x\r\nContent-Length: 27\r\n\r\n";
        assert_eq!(extract_content_length(head), Some(27));
        assert_eq!(extract_content_length("GET / HTTP/1.1\r\n\r\n"), None);
    }

    #[test]
    fn test_create_response_sets_length() {
        let response = create_response(200, "OK", CONTENT_JSON, r#"{"status":"ok"}"#);
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Length: 15\r\n"));
        assert!(response.ends_with("\r\n\r\n{\"status\":\"ok\"}"));
    }
}
