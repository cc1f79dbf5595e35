//! Built-in tools served by a [`LocalSession`](crate::local::LocalSession)
//!
//! | name          | effect                                          |
//! |---------------|-------------------------------------------------|
//! | `datetime`    | current UTC time                                |
//! | `calculate`   | arithmetic expression evaluation                |
//! | `list_files`  | files in a directory, optionally recursive      |
//! | `read_file`   | UTF-8 contents of a file                        |
//! | `write_file`  | write a file, creating parent directories       |
//! | `fetch_url`   | HTTP GET, returns status and body               |
//! | `fetch_json`  | HTTP GET, returns the parsed JSON body          |
//!
//! Expected failures (missing file, bad expression, HTTP error) are returned
//! as error results so the model can react to them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use conduit_core::error::{AgentError, Result};
use conduit_core::tool::{ParameterSchema, Tool, ToolResult, ToolSchema};
use futures::StreamExt;
use serde_json::json;
use tokio_stream::wrappers::ReadDirStream;

/// Names accepted in a `builtin:` provider list
pub const BUILTIN_TOOLS: &[&str] = &[
    "datetime",
    "calculate",
    "list_files",
    "read_file",
    "write_file",
    "fetch_url",
    "fetch_json",
];

/// Instantiate a built-in tool by name
pub fn builtin_tool(name: &str) -> Result<Arc<dyn Tool>> {
    let tool: Arc<dyn Tool> = match name {
        "datetime" => Arc::new(DateTimeTool),
        "calculate" => Arc::new(CalculatorTool),
        "list_files" => Arc::new(ListFilesTool),
        "read_file" => Arc::new(ReadFileTool),
        "write_file" => Arc::new(WriteFileTool),
        "fetch_url" => Arc::new(FetchUrlTool::new()),
        "fetch_json" => Arc::new(FetchJsonTool::new()),
        other => {
            return Err(AgentError::Config(format!(
                "Unknown builtin tool '{other}' (available: {})",
                BUILTIN_TOOLS.join(", ")
            )));
        }
    };
    Ok(tool)
}

fn string_arg<'a>(arguments: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    arguments
        .get(key)
        .and_then(serde_json::Value::as_str)
        .filter(|value| !value.trim().is_empty())
}

// ============================================================================
// Time and math
// ============================================================================

/// DateTime tool - returns current time
pub struct DateTimeTool;

#[async_trait]
impl Tool for DateTimeTool {
    fn schema(&self) -> ToolSchema {
        let mut format = ParameterSchema::optional(
            "format",
            "string",
            "Output format: 'iso', 'human', or 'unix'",
        );
        format.default = Some(json!("human"));
        format.enum_values = Some(vec![json!("iso"), json!("human"), json!("unix")]);

        ToolSchema {
            name: "datetime".into(),
            description: "Get the current date and time (UTC)".into(),
            parameters: vec![format],
        }
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<ToolResult> {
        let now = chrono::Utc::now();
        let rendered = match string_arg(arguments, "format").unwrap_or("human") {
            "iso" => now.to_rfc3339(),
            "unix" => now.timestamp().to_string(),
            _ => now.format("%A, %B %d, %Y at %H:%M:%S UTC").to_string(),
        };
        Ok(ToolResult::success(json!({ "datetime": rendered })))
    }
}

/// Calculator tool - evaluates arithmetic expressions
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "calculate".into(),
            description: "Evaluate an arithmetic expression with + - * / ^ and parentheses"
                .into(),
            parameters: vec![ParameterSchema::required(
                "expression",
                "string",
                "Expression to evaluate (e.g., '2 + 2', '(3 - 1) * 4')",
            )],
        }
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<ToolResult> {
        let Some(expression) = string_arg(arguments, "expression") else {
            return Ok(ToolResult::failure("Expression cannot be empty"));
        };

        Ok(match evaluate(expression) {
            Ok(value) => ToolResult::success(json!({ "expression": expression, "result": value })),
            Err(message) => ToolResult::failure(message),
        })
    }
}

/// Evaluate `expr` with the usual precedence; `^` is right associative
fn evaluate(expr: &str) -> std::result::Result<f64, String> {
    let tokens: Vec<char> = expr.chars().filter(|c| !c.is_whitespace()).collect();
    let mut parser = ExprParser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.sum()?;
    match parser.peek() {
        None => Ok(value),
        Some(c) => Err(format!("Unexpected '{c}' at position {}", parser.pos)),
    }
}

/// Deepest nesting of parentheses, signs and exponents accepted
const MAX_NESTING: usize = 256;

struct ExprParser {
    tokens: Vec<char>,
    pos: usize,
    depth: usize,
}

impl ExprParser {
    fn descend(&mut self) -> std::result::Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err("Expression nested too deeply".into());
        }
        Ok(())
    }

    const fn ascend(&mut self) {
        self.depth -= 1;
    }

    fn peek(&self) -> Option<char> {
        self.tokens.get(self.pos).copied()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn sum(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.product()?;
        loop {
            if self.eat('+') {
                value += self.product()?;
            } else if self.eat('-') {
                value -= self.product()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn product(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.power()?;
        loop {
            if self.eat('*') {
                value *= self.power()?;
            } else if self.eat('/') {
                let divisor = self.power()?;
                if divisor == 0.0 {
                    return Err("Division by zero".into());
                }
                value /= divisor;
            } else {
                return Ok(value);
            }
        }
    }

    fn power(&mut self) -> std::result::Result<f64, String> {
        let base = self.unary()?;
        if self.eat('^') {
            self.descend()?;
            let exponent = self.power()?;
            self.ascend();
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn unary(&mut self) -> std::result::Result<f64, String> {
        let negate = if self.eat('-') {
            true
        } else if self.eat('+') {
            false
        } else {
            return self.atom();
        };
        self.descend()?;
        let value = self.unary()?;
        self.ascend();
        Ok(if negate { -value } else { value })
    }

    fn atom(&mut self) -> std::result::Result<f64, String> {
        if self.eat('(') {
            self.descend()?;
            let value = self.sum()?;
            if !self.eat(')') {
                return Err("Missing closing parenthesis".into());
            }
            self.ascend();
            return Ok(value);
        }

        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '.')
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(match self.peek() {
                Some(c) => format!("Unexpected '{c}' at position {start}"),
                None => "Unexpected end of expression".into(),
            });
        }
        let literal: String = self.tokens[start..self.pos].iter().collect();
        literal
            .parse::<f64>()
            .map_err(|e| format!("Parse error: {e}"))
    }
}

// ============================================================================
// Filesystem
// ============================================================================

/// Lists files in a directory
pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn schema(&self) -> ToolSchema {
        let mut recursive =
            ParameterSchema::optional("recursive", "boolean", "Descend into subdirectories");
        recursive.default = Some(json!(false));

        ToolSchema {
            name: "list_files".into(),
            description: "List the files in a directory".into(),
            parameters: vec![
                ParameterSchema::required("directory_path", "string", "Directory to list"),
                recursive,
            ],
        }
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<ToolResult> {
        let Some(directory) = string_arg(arguments, "directory_path") else {
            return Ok(ToolResult::failure("Directory path cannot be empty"));
        };
        let recursive = arguments
            .get("recursive")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        let root = Path::new(directory);
        match tokio::fs::metadata(root).await {
            Err(_) => return Ok(ToolResult::failure(format!("Directory not found: {directory}"))),
            Ok(meta) if !meta.is_dir() => {
                return Ok(ToolResult::failure(format!("Path is not a directory: {directory}")));
            }
            Ok(_) => {}
        }

        let mut files = collect_files(root, recursive).await?;
        files.sort();
        Ok(ToolResult::success(json!({ "files": files })))
    }
}

/// File paths under `root`, relative to it
async fn collect_files(root: &Path, recursive: bool) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let reader = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("reading {}", dir.display()))?;
        let mut entries = ReadDirStream::new(reader);

        while let Some(entry) = entries.next().await {
            let entry = entry?;
            let file_type = entry.file_type().await?;
            let path = entry.path();
            if file_type.is_file() {
                let relative = path.strip_prefix(root).unwrap_or(&path);
                files.push(relative.to_string_lossy().into_owned());
            } else if file_type.is_dir() && recursive {
                pending.push(path);
            }
        }
    }

    Ok(files)
}

/// Reads a UTF-8 file
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "read_file".into(),
            description: "Read the contents of a text file".into(),
            parameters: vec![ParameterSchema::required("file_path", "string", "File to read")],
        }
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<ToolResult> {
        let Some(file_path) = string_arg(arguments, "file_path") else {
            return Ok(ToolResult::failure("File path cannot be empty"));
        };

        match tokio::fs::metadata(file_path).await {
            Err(_) => return Ok(ToolResult::failure(format!("File not found: {file_path}"))),
            Ok(meta) if !meta.is_file() => {
                return Ok(ToolResult::failure(format!("Path is not a file: {file_path}")));
            }
            Ok(_) => {}
        }

        Ok(match tokio::fs::read_to_string(file_path).await {
            Ok(content) => ToolResult::success(json!({ "content": content })),
            Err(e) => ToolResult::failure(format!("Could not read {file_path}: {e}")),
        })
    }
}

/// Writes a file, creating missing parent directories
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "write_file".into(),
            description: "Write text to a file, creating parent directories as needed".into(),
            parameters: vec![
                ParameterSchema::required("file_path", "string", "File to write"),
                ParameterSchema::required("content", "string", "Text to write"),
            ],
        }
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<ToolResult> {
        let Some(file_path) = string_arg(arguments, "file_path") else {
            return Ok(ToolResult::failure("File path cannot be empty"));
        };
        let content = arguments
            .get("content")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();

        let path = Path::new(file_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolResult::failure(format!(
                    "Could not create {}: {e}",
                    parent.display()
                )));
            }
        }

        Ok(match tokio::fs::write(path, content).await {
            Ok(()) => {
                tracing::debug!(path = %file_path, bytes = content.len(), "Wrote file");
                ToolResult::success(json!({ "path": file_path, "bytes_written": content.len() }))
            }
            Err(e) => ToolResult::failure(format!("Could not write {file_path}: {e}")),
        })
    }
}

// ============================================================================
// Web
// ============================================================================

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .user_agent(concat!("conduit/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

/// Fetches a URL as text
pub struct FetchUrlTool {
    client: reqwest::Client,
}

impl FetchUrlTool {
    pub fn new() -> Self {
        Self { client: http_client() }
    }
}

impl Default for FetchUrlTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "fetch_url".into(),
            description: "Fetch a URL with HTTP GET and return the status and body".into(),
            parameters: vec![ParameterSchema::required("url", "string", "URL to fetch")],
        }
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<ToolResult> {
        let Some(url) = string_arg(arguments, "url") else {
            return Ok(ToolResult::failure("URL cannot be empty"));
        };

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return Ok(ToolResult::failure(e.to_string())),
        };
        let status = response.status().as_u16();
        Ok(match response.text().await {
            Ok(content) => ToolResult::success(json!({ "status": status, "content": content })),
            Err(e) => ToolResult::failure(e.to_string()),
        })
    }
}

/// Fetches a URL and parses the body as JSON
pub struct FetchJsonTool {
    client: reqwest::Client,
}

impl FetchJsonTool {
    pub fn new() -> Self {
        Self { client: http_client() }
    }
}

impl Default for FetchJsonTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FetchJsonTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "fetch_json".into(),
            description: "Fetch a URL and return its JSON body".into(),
            parameters: vec![ParameterSchema::required("url", "string", "URL to fetch")],
        }
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<ToolResult> {
        let Some(url) = string_arg(arguments, "url") else {
            return Ok(ToolResult::failure("URL cannot be empty"));
        };

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return Ok(ToolResult::failure(e.to_string())),
        };
        if !response.status().is_success() {
            return Ok(ToolResult::failure(format!("HTTP error: {}", response.status().as_u16())));
        }
        Ok(match response.json::<serde_json::Value>().await {
            Ok(data) => ToolResult::success(json!({ "data": data })),
            Err(e) => ToolResult::failure(format!("Invalid JSON: {e}")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculator() {
        let close = |expr: &str, expected: f64| {
            let value = evaluate(expr).unwrap();
            assert!((value - expected).abs() < f64::EPSILON, "{expr} = {value}");
        };
        close("2 + 2", 4.0);
        close("10 * 5", 50.0);
        close("(2 + 3) * 4", 20.0);
        close("2 ^ 8", 256.0);
        close("2 ^ 3 ^ 2", 512.0);
        close("10 - 4 - 3", 3.0);
        close("-3 * -2", 6.0);
        close("7 / 2", 3.5);

        assert!(evaluate("1 / 0").is_err());
        assert!(evaluate("(1 + 2").is_err());
        assert!(evaluate("2 +").is_err());
        assert!(evaluate("abc").is_err());
    }

    #[test]
    fn test_calculator_rejects_deep_nesting() {
        let parens = "(".repeat(20_000);
        assert_eq!(evaluate(&parens).unwrap_err(), "Expression nested too deeply");

        let signs = format!("{}1", "-".repeat(200_000));
        assert_eq!(evaluate(&signs).unwrap_err(), "Expression nested too deeply");

        let tower = vec!["2"; 1_000].join("^");
        assert_eq!(evaluate(&tower).unwrap_err(), "Expression nested too deeply");

        let nested = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert!((evaluate(&nested).unwrap() - 1.0).abs() < f64::EPSILON);
        assert!((evaluate("--1").unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_calculate_tool_reports_errors_as_results() {
        let ok = CalculatorTool.execute(&json!({"expression": "6 * 7"})).await.unwrap();
        assert_eq!(ok.payload["result"], json!(42.0));

        let bad = CalculatorTool.execute(&json!({"expression": "6 *"})).await.unwrap();
        assert!(!bad.is_success());

        let deep = CalculatorTool
            .execute(&json!({"expression": "(".repeat(20_000)}))
            .await
            .unwrap();
        assert!(!deep.is_success());
    }

    #[tokio::test]
    async fn test_list_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("b.txt"), "b").unwrap();
        let directory = dir.path().to_string_lossy().into_owned();

        let flat = ListFilesTool
            .execute(&json!({"directory_path": directory}))
            .await
            .unwrap();
        assert_eq!(flat.payload["files"], json!(["a.txt"]));

        let deep = ListFilesTool
            .execute(&json!({"directory_path": directory, "recursive": true}))
            .await
            .unwrap();
        let nested = Path::new("nested").join("b.txt").to_string_lossy().into_owned();
        assert_eq!(deep.payload["files"], json!(["a.txt", nested]));

        let missing = ListFilesTool
            .execute(&json!({"directory_path": dir.path().join("nope")}))
            .await
            .unwrap();
        assert!(!missing.is_success());
    }

    #[tokio::test]
    async fn test_write_then_read_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("deep").join("er").join("note.md");
        let target_str = target.to_string_lossy().into_owned();

        let written = WriteFileTool
            .execute(&json!({"file_path": target_str, "content": "# hello"}))
            .await
            .unwrap();
        assert!(written.is_success());
        assert_eq!(written.payload["bytes_written"], json!(7));

        let read = ReadFileTool
            .execute(&json!({"file_path": target_str}))
            .await
            .unwrap();
        assert_eq!(read.payload["content"], "# hello");

        let not_a_file = ReadFileTool
            .execute(&json!({"file_path": dir.path()}))
            .await
            .unwrap();
        assert!(not_a_file.payload["error"].as_str().unwrap().contains("not a file"));
    }

    #[tokio::test]
    async fn test_fetch_rejects_empty_url() {
        let result = FetchUrlTool::new().execute(&json!({"url": "  "})).await.unwrap();
        assert!(!result.is_success());
    }

    #[test]
    fn test_builtin_lookup() {
        for name in BUILTIN_TOOLS {
            assert_eq!(builtin_tool(name).unwrap().schema().name, *name);
        }
        assert!(matches!(builtin_tool("rm_rf"), Err(AgentError::Config(_))));
    }
}
