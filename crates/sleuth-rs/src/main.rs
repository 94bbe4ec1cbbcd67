//! Interactive host-inspection agent.
//!
//! Starts a REPL wired to either the offline heuristic backend or an
//! OpenAI-format chat completions API. The agent answers questions about the
//! local machine by reading files, listing directories, grepping, and
//! running validated shell commands inside the workspace root.
//!
//! # Examples
//!
//! ```sh
//! # Offline, no keys needed
//! sleuth --backend local
//!
//! # Against an API, restricted to a few executables
//! SLEUTH_API_KEY=sk-... sleuth --backend api --model gpt-4o \
//!     --workspace-root /var/log --allow ps --allow grep --allow df
//! ```

use std::io::Write as _;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use sleuth_rs::agent::Session;
use sleuth_rs::backend::{ApiBackend, Backend, LocalBackend, TurnError};
use sleuth_rs::tools::ToolExecutor;

const SYSTEM_PROMPT: &str = "You are sleuth, a careful host-inspection assistant. \
    You answer questions about the local machine using the provided tools: \
    read_file, list_files, grep, and run_command. Commands are read-only \
    inspection; destructive operations are denied by the validator. \
    When you form a working theory, state it inline as [HYPOTHESIS: ...] so it \
    is tracked across the conversation. Prefer small, targeted tool calls.";

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// Offline keyword heuristics, no network.
    Local,
    /// OpenAI-format chat completions over HTTP.
    Api,
}

/// Conversational host-inspection agent.
#[derive(Parser)]
#[command(name = "sleuth", version)]
struct Cli {
    /// Which backend answers the conversation.
    #[arg(long, value_enum, default_value = "local")]
    backend: BackendKind,

    /// Model name for the API backend.
    #[arg(long, default_value = "gpt-4o-mini")]
    model: String,

    /// API key for the API backend (falls back to $SLEUTH_API_KEY, then
    /// $OPENAI_API_KEY).
    #[arg(long)]
    api_key: Option<String>,

    /// Base URL for the API backend.
    #[arg(long)]
    base_url: Option<String>,

    /// Directory the tools operate in; paths outside it are refused.
    #[arg(long, default_value = ".")]
    workspace_root: String,

    /// Restrict run_command to these executables (repeatable). No flag
    /// means any validated command runs.
    #[arg(long = "allow")]
    allow: Vec<String>,

    /// Byte cap on tool output fed back to the model.
    #[arg(long, default_value_t = sleuth_rs::tools::MAX_OUTPUT_BYTES)]
    max_output_bytes: usize,

    /// Verbose logging to stderr.
    #[arg(long)]
    debug: bool,

    /// Disable ANSI colors.
    #[arg(long)]
    no_color: bool,
}

struct Palette {
    prompt: &'static str,
    reply: &'static str,
    dim: &'static str,
    error: &'static str,
    reset: &'static str,
}

impl Palette {
    fn new(enabled: bool) -> Self {
        if enabled {
            Self {
                prompt: "\x1b[1;36m",
                reply: "\x1b[1;32m",
                dim: "\x1b[2m",
                error: "\x1b[1;31m",
                reset: "\x1b[0m",
            }
        } else {
            Self {
                prompt: "",
                reply: "",
                dim: "",
                error: "",
                reset: "",
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("sleuth_rs=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sleuth_rs=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Resolve the workspace root to an absolute path up front so the
    // boundary checks compare like with like.
    let root = match std::fs::canonicalize(&cli.workspace_root) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: cannot open workspace root '{}': {e}", cli.workspace_root);
            std::process::exit(1);
        }
    };

    let backend: Box<dyn Backend> = match cli.backend {
        BackendKind::Local => Box::new(LocalBackend::new()),
        BackendKind::Api => {
            let key = cli
                .api_key
                .clone()
                .or_else(|| std::env::var("SLEUTH_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
            let Some(key) = key else {
                eprintln!(
                    "Error: the api backend needs a key (--api-key, $SLEUTH_API_KEY, \
                     or $OPENAI_API_KEY)"
                );
                std::process::exit(1);
            };
            let mut api = ApiBackend::new(key, &cli.model);
            if let Some(url) = &cli.base_url {
                api = api.base_url(url);
            }
            Box::new(api)
        }
    };

    let palette = Palette::new(!cli.no_color);
    let allowlist = if cli.allow.is_empty() {
        None
    } else {
        Some(cli.allow.clone())
    };

    let notify_dim = palette.dim.to_string();
    let notify_reset = palette.reset.to_string();
    let tools = ToolExecutor::new()
        .with_inspection_tools(root.clone(), allowlist)
        .max_output_bytes(cli.max_output_bytes)
        .notifier(Box::new(move |name, detail| {
            println!("{notify_dim}  -> {name}: {detail}{notify_reset}");
        }));

    let session = Session::new(backend, tools).system_prompt(SYSTEM_PROMPT);

    repl(session, root, palette).await;
}

async fn repl(mut session: Session, root: PathBuf, palette: Palette) {
    println!("sleuth — host inspection agent");
    println!(
        "backend: {} | workspace: {}",
        session.backend_name(),
        root.display()
    );
    println!("type 'exit' to quit, '/state' or '/context' to inspect the session\n");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        let Some(mut input) = read_line(&mut lines, &palette, ">>> ").await else {
            break;
        };
        // Trailing backslash continues on the next line.
        while input.ends_with('\\') {
            input.pop();
            let Some(more) = read_line(&mut lines, &palette, "... ").await else {
                break;
            };
            input.push('\n');
            input.push_str(&more);
        }

        let trimmed = input.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "exit" || trimmed == "quit" {
            break;
        }
        if let Some(handled) = slash_command(trimmed, &session) {
            println!("{handled}");
            continue;
        }

        let result = tokio::select! {
            result = session.run_turn(trimmed) => result,
            _ = tokio::signal::ctrl_c() => Err(TurnError::Cancelled),
        };
        match result {
            Ok(reply) => {
                println!("{}sleuth>{} {reply}\n", palette.reply, palette.reset);
            }
            Err(TurnError::Cancelled) => {
                println!("{}(turn cancelled){}", palette.dim, palette.reset);
            }
            Err(TurnError::Backend(e)) => {
                println!("{}error:{} {e}", palette.error, palette.reset);
            }
        }
    }

    println!("bye");
}

/// Print a prompt and read one line. `None` on EOF; Ctrl-C at the prompt
/// clears the line and re-prompts.
async fn read_line(
    lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>,
    palette: &Palette,
    prompt: &str,
) -> Option<String> {
    loop {
        print!("{}{prompt}{}", palette.prompt, palette.reset);
        std::io::stdout().flush().ok();
        tokio::select! {
            line = lines.next_line() => {
                return match line {
                    Ok(Some(line)) => Some(line),
                    _ => None,
                };
            }
            _ = tokio::signal::ctrl_c() => {
                println!("^C");
                continue;
            }
        }
    }
}

/// Handle `/state` and `/context`. Returns the text to print, or `None`
/// when the input is a normal message.
fn slash_command(input: &str, session: &Session) -> Option<String> {
    match input {
        "/state" => {
            let snapshot = session.state().snapshot();
            Some(
                serde_json::to_string_pretty(&snapshot)
                    .unwrap_or_else(|e| format!("error rendering state: {e}")),
            )
        }
        "/context" => {
            let store = session.store();
            Some(format!(
                "messages: {} | turns: {} | est. tokens: {} | summary: {}",
                store.len(),
                store.turn_count(),
                store.estimated_tokens(),
                if store.summary().is_some() { "yes" } else { "no" },
            ))
        }
        _ => None,
    }
}
