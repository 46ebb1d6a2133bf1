//! Built-in tools.
//!
//! | Tool | Class | Requirements |
//! |------|-------|--------------|
//! | `read_file` | Always | filesystem |
//! | `list_dir` | Always | filesystem |
//! | `write_file` | DegradedPlus | filesystem |
//! | `run_command` | AutonomousPlus | filesystem, thermal-safe |
//! | `fetch_status` | FullOnly | network |
//! | `system_status` | Always | none |
//!
//! Paths are resolved against the context's working directory and may not
//! escape it.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::registry::ToolCapabilityRegistry;
use super::types::{
    AvailabilityClass, DEFAULT_MAX_BYTES, Tool, ToolCategory, ToolContext, ToolDescriptor,
    ToolResult, truncate_output,
};
use crate::config::ToolSettings;
use crate::error::{KestrelError, Result};

/// Register every built-in tool.
///
/// # Errors
/// Returns [`KestrelError::Internal`] if the registry lock is poisoned.
pub fn register_builtins(registry: &ToolCapabilityRegistry, settings: &ToolSettings) -> Result<()> {
    let max_bytes = settings.max_output_bytes;
    let tools: [Arc<dyn Tool>; 6] = [
        Arc::new(ReadFileTool::with_max_bytes(max_bytes)),
        Arc::new(ListDirTool::with_max_bytes(max_bytes)),
        Arc::new(WriteFileTool::new()),
        Arc::new(RunCommandTool::with_max_bytes(max_bytes)),
        Arc::new(FetchStatusTool::new()),
        Arc::new(SystemStatusTool::new()),
    ];
    for tool in tools {
        registry.register(tool)?;
    }
    Ok(())
}

fn required_str<'a>(tool: &str, args: &'a serde_json::Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| KestrelError::tool(tool, format!("missing required argument: {key}")))
}

/// Lexically normalise `path`, failing if `..` climbs above the root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}

/// Resolve `raw` against `root`, rejecting paths outside it.
fn resolve_in_workspace(tool: &str, root: &Path, raw: &str) -> Result<PathBuf> {
    let candidate = Path::new(raw);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };
    let escape = || KestrelError::tool(tool, format!("path '{raw}' is outside the working directory"));
    let resolved = normalize(&joined).ok_or_else(escape)?;
    let root = normalize(root).ok_or_else(escape)?;
    if !resolved.starts_with(&root) {
        return Err(escape());
    }
    Ok(resolved)
}

/// Reads a text file, optionally paginated by line.
///
/// Arguments: `path` (required), `offset` (1-based line), `limit` (lines).
pub struct ReadFileTool {
    descriptor: ToolDescriptor,
    max_bytes: usize,
}

impl ReadFileTool {
    pub fn new() -> Self {
        Self::with_max_bytes(DEFAULT_MAX_BYTES)
    }

    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "read_file",
                ToolCategory::Filesystem,
                AvailabilityClass::Always,
            )
            .with_description("Read a text file with optional line offset and limit")
            .with_priority(10)
            .requires_filesystem(),
            max_bytes,
        }
    }
}

impl Default for ReadFileTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, context: &ToolContext, args: serde_json::Value) -> Result<ToolResult> {
        let name = self.descriptor.name.as_str();
        let raw = required_str(name, &args, "path")?;
        let path = resolve_in_workspace(name, &context.working_directory, raw)?;

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| KestrelError::tool(name, format!("failed to read {raw}: {e}")))?;

        let offset = args
            .get("offset")
            .and_then(|v| v.as_u64())
            .map_or(1, |v| usize::try_from(v.max(1)).unwrap_or(usize::MAX));
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|v| usize::try_from(v).unwrap_or(usize::MAX));

        let lines: Vec<&str> = content.lines().collect();
        let start = offset - 1;
        if start >= lines.len() {
            return Ok(ToolResult::success(String::new()));
        }
        let end = limit.map_or(lines.len(), |l| start.saturating_add(l).min(lines.len()));

        Ok(ToolResult::bounded(&lines[start..end].join("\n"), self.max_bytes))
    }
}

/// Lists a directory. Subdirectories carry a trailing `/`.
pub struct ListDirTool {
    descriptor: ToolDescriptor,
    max_bytes: usize,
}

impl ListDirTool {
    pub fn new() -> Self {
        Self::with_max_bytes(DEFAULT_MAX_BYTES)
    }

    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "list_dir",
                ToolCategory::Filesystem,
                AvailabilityClass::Always,
            )
            .with_description("List directory entries")
            .with_priority(10)
            .requires_filesystem(),
            max_bytes,
        }
    }
}

impl Default for ListDirTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, context: &ToolContext, args: serde_json::Value) -> Result<ToolResult> {
        let name = self.descriptor.name.as_str();
        let raw = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let path = resolve_in_workspace(name, &context.working_directory, raw)?;

        let read_err = |e: std::io::Error| KestrelError::tool(name, format!("failed to list {raw}: {e}"));
        let mut dir = tokio::fs::read_dir(&path).await.map_err(read_err)?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(read_err)? {
            let mut label = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                label.push('/');
            }
            entries.push(label);
        }
        entries.sort_unstable();
        Ok(ToolResult::bounded(&entries.join("\n"), self.max_bytes))
    }
}

/// Writes or appends a text file, creating parent directories.
///
/// Arguments: `path`, `content` (both required), `append` (bool).
pub struct WriteFileTool {
    descriptor: ToolDescriptor,
}

impl WriteFileTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "write_file",
                ToolCategory::Filesystem,
                AvailabilityClass::DegradedPlus,
            )
            .with_description("Write or append text to a file")
            .with_priority(20)
            .requires_filesystem(),
        }
    }
}

impl Default for WriteFileTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, context: &ToolContext, args: serde_json::Value) -> Result<ToolResult> {
        let name = self.descriptor.name.as_str();
        let raw = required_str(name, &args, "path")?;
        let content = required_str(name, &args, "content")?;
        let append = args.get("append").and_then(|v| v.as_bool()).unwrap_or(false);
        let path = resolve_in_workspace(name, &context.working_directory, raw)?;

        let io_err = |e: std::io::Error| KestrelError::tool(name, format!("failed to write {raw}: {e}"));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        if append {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(io_err)?;
            file.write_all(content.as_bytes()).await.map_err(io_err)?;
            file.flush().await.map_err(io_err)?;
        } else {
            tokio::fs::write(&path, content).await.map_err(io_err)?;
        }

        Ok(ToolResult::success(format!(
            "wrote {} bytes to {raw}",
            content.len()
        )))
    }
}

/// Runs a program (no shell) in the working directory.
///
/// Arguments: `program` (required), `args` (array of strings).
/// A non-zero exit status yields an unsuccessful result carrying the output.
pub struct RunCommandTool {
    descriptor: ToolDescriptor,
    max_bytes: usize,
}

impl RunCommandTool {
    pub fn new() -> Self {
        Self::with_max_bytes(DEFAULT_MAX_BYTES)
    }

    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "run_command",
                ToolCategory::Command,
                AvailabilityClass::AutonomousPlus,
            )
            .with_description("Run a program in the working directory")
            .with_priority(30)
            .requires_filesystem()
            .requires_thermal_safe()
            .with_max_exec(Duration::from_secs(30)),
            max_bytes,
        }
    }
}

impl Default for RunCommandTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, context: &ToolContext, args: serde_json::Value) -> Result<ToolResult> {
        let name = self.descriptor.name.as_str();
        let program = required_str(name, &args, "program")?;
        if program.trim().is_empty() {
            return Err(KestrelError::tool(name, "program cannot be empty"));
        }
        let argv: Vec<String> = match args.get("args") {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(String::from)
                        .ok_or_else(|| KestrelError::tool(name, "args must be strings"))
                })
                .collect::<Result<_>>()?,
            Some(_) => return Err(KestrelError::tool(name, "args must be an array")),
        };

        let output = tokio::process::Command::new(program)
            .args(&argv)
            .current_dir(&context.working_directory)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| KestrelError::tool(name, format!("failed to spawn {program}: {e}")))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }
        let (content, truncated) = truncate_output(&combined, self.max_bytes);

        let mut result = if output.status.success() {
            ToolResult::success(content)
        } else {
            let mut failed = ToolResult::failure(format!("{program} exited with {}", output.status));
            failed.content = content;
            failed
        };
        result.truncated = truncated;
        Ok(result)
    }
}

/// Reports the HTTP status of a URL.
///
/// Arguments: `url` (required, http or https).
pub struct FetchStatusTool {
    descriptor: ToolDescriptor,
    client: reqwest::Client,
}

impl FetchStatusTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "fetch_status",
                ToolCategory::Network,
                AvailabilityClass::FullOnly,
            )
            .with_description("Fetch a URL and report its HTTP status")
            .with_priority(40)
            .requires_network()
            .with_max_exec(Duration::from_secs(10)),
            client: reqwest::Client::new(),
        }
    }
}

impl Default for FetchStatusTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FetchStatusTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _context: &ToolContext, args: serde_json::Value) -> Result<ToolResult> {
        let name = self.descriptor.name.as_str();
        let raw = required_str(name, &args, "url")?;
        let url = reqwest::Url::parse(raw)
            .map_err(|e| KestrelError::tool(name, format!("invalid url '{raw}': {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(KestrelError::tool(
                name,
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| KestrelError::tool(name, format!("request failed: {e}")))?;
        let status = response.status();
        Ok(ToolResult::success(format!(
            "HTTP {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )
        .trim_end()
        .to_string()))
    }
}

/// Reports the mode and safety snapshots the caller supplied.
pub struct SystemStatusTool {
    descriptor: ToolDescriptor,
}

impl SystemStatusTool {
    pub fn new() -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "system_status",
                ToolCategory::Diagnostics,
                AvailabilityClass::Always,
            )
            .with_description("Report operational mode, network, and thermal state")
            .with_priority(0),
        }
    }
}

impl Default for SystemStatusTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SystemStatusTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, context: &ToolContext, _args: serde_json::Value) -> Result<ToolResult> {
        let status = json!({
            "mode": context.mode,
            "network": context.network,
            "thermal": context.thermal,
            "working_directory": context.working_directory,
            "session_id": context.session_id,
        });
        let rendered = serde_json::to_string_pretty(&status)
            .map_err(|e| KestrelError::tool(&self.descriptor.name, e.to_string()))?;
        Ok(ToolResult::success(rendered))
    }
}
