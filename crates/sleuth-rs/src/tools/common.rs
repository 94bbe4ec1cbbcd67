//! The built-in inspection tools: `read_file`, `list_files`, `grep`, and
//! `run_command`.
//!
//! Every tool takes a workspace root and refuses to touch paths that resolve
//! outside it. `run_command` additionally routes each command line through
//! [`validate_command`](crate::tools::validate_command) before it reaches
//! the shell.
//!
//! # Example
//!
//! ```ignore
//! use sleuth_rs::tools::ToolExecutor;
//!
//! let tools = ToolExecutor::new()
//!     .with_inspection_tools("/my/project", Some(vec!["ps".into(), "grep".into()]));
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use tokio::fs;
use tokio::process::Command;

use crate::tools::core::{ToolError, ToolExecutor, ToolFuture, ToolHandler};
use crate::tools::validate::validate_command;
use crate::{ToolDef, json_schema_for};

/// Wall-clock limit for one `run_command` invocation.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(45);

/// Default maximum grep matches per file.
pub const DEFAULT_MAX_GREP_MATCHES: u32 = 200;

// ── Typed argument structs ──────────────────────────────────────────

/// Typed arguments for `read_file`.
#[derive(Deserialize, JsonSchema)]
pub struct ReadFileArgs {
    /// File path relative to the workspace root (e.g. 'logs/app.log').
    pub path: String,
}

/// Typed arguments for `list_files`.
#[derive(Deserialize, JsonSchema)]
pub struct ListFilesArgs {
    /// Directory path relative to the workspace root (default '.').
    #[serde(default)]
    pub path: Option<String>,
}

/// Typed arguments for `grep`.
#[derive(Deserialize, JsonSchema)]
pub struct GrepArgs {
    /// Regex pattern to search for.
    pub pattern: String,
    /// Directory or file to search in (relative to the workspace root, default '.').
    #[serde(default)]
    pub path: Option<String>,
    /// Case-insensitive search (default false).
    #[serde(default)]
    pub case_insensitive: Option<bool>,
}

/// Typed arguments for `run_command`.
#[derive(Deserialize, JsonSchema)]
pub struct RunCommandArgs {
    /// Shell command to execute (e.g. 'df -h', 'ps aux | grep nginx').
    pub command: String,
}

// ── ReadFile ────────────────────────────────────────────────────────

/// Read a single file inside the workspace.
pub struct ReadFile {
    root: PathBuf,
}

impl ReadFile {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ToolHandler for ReadFile {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "read_file",
            "Read a file from the workspace and return its text content",
            json_schema_for::<ReadFileArgs>(),
        )
    }

    fn execute<'a>(&'a self, arguments: &'a str) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: ReadFileArgs = serde_json::from_str(arguments)
                .map_err(|_| ToolError::Failed("'path' argument is required".to_string()))?;
            let full_path = resolve_in_workspace(&self.root, &args.path).await?;

            // Catch directories early so the model gets an actionable hint
            // instead of the raw OS error.
            if let Ok(meta) = fs::metadata(&full_path).await
                && meta.is_dir()
            {
                return Err(ToolError::Failed(format!(
                    "'{}' is a directory, not a file. Use list_files to browse directories.",
                    args.path
                )));
            }

            fs::read_to_string(&full_path)
                .await
                .map_err(|e| ToolError::Failed(format!("reading '{}': {e}", args.path)))
        })
    }
}

// ── ListFiles ───────────────────────────────────────────────────────

/// List a directory inside the workspace. One entry per line, sorted,
/// directories marked with a trailing `/`.
pub struct ListFiles {
    root: PathBuf,
}

impl ListFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ToolHandler for ListFiles {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "list_files",
            "List a workspace directory. Directories end with '/'",
            json_schema_for::<ListFilesArgs>(),
        )
    }

    fn execute<'a>(&'a self, arguments: &'a str) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: ListFilesArgs = serde_json::from_str(arguments)
                .map_err(|_| ToolError::Failed("invalid arguments".to_string()))?;
            let path = args.path.as_deref().unwrap_or(".");
            let full_path = resolve_in_workspace(&self.root, path).await?;

            let mut reader = fs::read_dir(&full_path)
                .await
                .map_err(|e| ToolError::Failed(format!("listing '{path}': {e}")))?;
            let mut entries = Vec::new();
            while let Ok(Some(entry)) = reader.next_entry().await {
                let mut name = entry.file_name().to_string_lossy().to_string();
                if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                    name.push('/');
                }
                entries.push(name);
            }
            entries.sort();
            Ok(entries.join("\n"))
        })
    }
}

// ── Grep ────────────────────────────────────────────────────────────

/// Regex search in file contents inside the workspace. Shells out to the
/// system `grep`.
pub struct Grep {
    root: PathBuf,
    max_matches: u32,
}

impl Grep {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_matches: DEFAULT_MAX_GREP_MATCHES,
        }
    }

    pub fn max_matches(mut self, max: u32) -> Self {
        self.max_matches = max;
        self
    }
}

impl ToolHandler for Grep {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "grep",
            "Search file contents for a regex pattern. Matches come back as file:line:text",
            json_schema_for::<GrepArgs>(),
        )
    }

    fn execute<'a>(&'a self, arguments: &'a str) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: GrepArgs = serde_json::from_str(arguments)
                .map_err(|_| ToolError::Failed("'pattern' argument is required".to_string()))?;
            let search_path = args.path.as_deref().unwrap_or(".");
            let full_path = resolve_in_workspace(&self.root, search_path).await?;

            let mut cmd_args = vec![
                "-rn".to_string(),
                "--color=never".to_string(),
                format!("--max-count={}", self.max_matches),
            ];
            if args.case_insensitive.unwrap_or(false) {
                cmd_args.push("-i".to_string());
            }
            cmd_args.push(args.pattern.clone());
            cmd_args.push(full_path.to_string_lossy().to_string());

            let arg_refs: Vec<&str> = cmd_args.iter().map(|s| s.as_str()).collect();
            // grep exits 1 for "no matches", which is not an error here.
            let output = run_argv("grep", &arg_refs, &[1]).await?;
            if output.trim().is_empty() {
                Ok(format!("No matches for '{}'", args.pattern))
            } else {
                Ok(output)
            }
        })
    }
}

// ── RunCommand ──────────────────────────────────────────────────────

/// Execute a validated shell command with the workspace root as the working
/// directory.
///
/// Validation happens first, so denied commands never spawn a process. The
/// optional allowlist restricts the leading executable of every pipe
/// segment.
pub struct RunCommand {
    root: PathBuf,
    allowlist: Option<Vec<String>>,
    timeout: Duration,
}

impl RunCommand {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            allowlist: None,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Restrict executables to this list.
    pub fn allowlist(mut self, allowed: Vec<String>) -> Self {
        self.allowlist = Some(allowed);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl ToolHandler for RunCommand {
    fn definition(&self) -> ToolDef {
        ToolDef::new(
            "run_command",
            "Run a shell command in the workspace and return its output. \
             Chaining with ';' or '&&' and command substitution are not allowed; \
             pipes are fine",
            json_schema_for::<RunCommandArgs>(),
        )
    }

    fn execute<'a>(&'a self, arguments: &'a str) -> ToolFuture<'a> {
        Box::pin(async move {
            let args: RunCommandArgs = serde_json::from_str(arguments)
                .map_err(|_| ToolError::Failed("'command' argument is required".to_string()))?;
            validate_command(&args.command, self.allowlist.as_deref())
                .map_err(ToolError::Denied)?;

            let child = Command::new("sh")
                .arg("-c")
                .arg(&args.command)
                .current_dir(&self.root)
                .output();
            match tokio::time::timeout(self.timeout, child).await {
                Ok(Ok(output)) => {
                    let formatted = format_output(output, &[]);
                    if formatted.is_empty() {
                        Ok("(no output)".to_string())
                    } else {
                        Ok(formatted)
                    }
                }
                Ok(Err(e)) => Err(ToolError::Failed(format!("running command: {e}"))),
                Err(_) => Err(ToolError::Failed(format!(
                    "command timed out after {}s",
                    self.timeout.as_secs()
                ))),
            }
        })
    }
}

// ── Registration ────────────────────────────────────────────────────

impl ToolExecutor {
    /// Register the four built-in inspection tools rooted at `root`.
    ///
    /// `allowlist`, when given, restricts which executables `run_command`
    /// accepts.
    pub fn with_inspection_tools(
        self,
        root: impl Into<PathBuf>,
        allowlist: Option<Vec<String>>,
    ) -> Self {
        let root = root.into();
        let mut run = RunCommand::new(root.clone());
        if let Some(allowed) = allowlist {
            run = run.allowlist(allowed);
        }
        self.register(Box::new(ReadFile::new(root.clone())))
            .register(Box::new(ListFiles::new(root.clone())))
            .register(Box::new(Grep::new(root)))
            .register(Box::new(run))
    }
}

// ── Shared helpers ──────────────────────────────────────────────────

/// Resolve a requested path against the workspace root and verify the
/// result stays inside it. Symlinks are followed before the check, so a
/// link pointing outside the workspace is caught too.
async fn resolve_in_workspace(root: &Path, requested: &str) -> Result<PathBuf, ToolError> {
    let joined = if Path::new(requested).is_absolute() {
        PathBuf::from(requested)
    } else {
        root.join(requested)
    };
    let resolved = fs::canonicalize(&joined)
        .await
        .map_err(|e| ToolError::Failed(format!("cannot resolve '{requested}': {e}")))?;
    let root = fs::canonicalize(root)
        .await
        .map_err(|e| ToolError::Failed(format!("cannot resolve workspace root: {e}")))?;
    if !resolved.starts_with(&root) {
        return Err(ToolError::Failed(format!(
            "'{requested}' resolves outside the workspace root"
        )));
    }
    Ok(resolved)
}

/// Format process output into a result string. Exit codes listed in
/// `lenient_exit_codes` are treated as success.
fn format_output(output: std::process::Output, lenient_exit_codes: &[i32]) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let ok = output.status.success()
        || output
            .status
            .code()
            .is_some_and(|c| lenient_exit_codes.contains(&c));
    if ok {
        if stderr.is_empty() {
            stdout
        } else {
            format!("{stdout}\n[stderr]\n{stderr}")
        }
    } else {
        format!("Command failed ({}):\n{stdout}\n{stderr}", output.status)
    }
}

/// Run a command with an argument vector (no shell).
async fn run_argv(cmd: &str, args: &[&str], lenient_exit_codes: &[i32]) -> Result<String, ToolError> {
    match Command::new(cmd).args(args).output().await {
        Ok(output) => Ok(format_output(output, lenient_exit_codes)),
        Err(e) => Err(ToolError::Failed(format!("running {cmd}: {e}"))),
    }
}

// ── Tests ───────────────────────────────────────────────────────────
