//! ctxc - command-line client for the Context Cache backend.
//!
//! A thin HTTP wrapper: every command maps to one API call and prints the
//! JSON response. Exit codes: 0 success, 2 usage error (clap), 3 backend
//! unreachable, 4 server-side error.

use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};

const DEFAULT_HOST: &str = "http://127.0.0.1:5173";

const EXIT_UNREACHABLE: u8 = 3;
const EXIT_SERVER_ERROR: u8 = 4;

#[derive(Parser)]
#[command(name = "ctxc", about = "Context Cache command-line interface")]
struct Cli {
    /// Backend base URL (falls back to CTXC_HOST, then the default).
    #[arg(long, global = true)]
    host: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage registered sources.
    Sources {
        #[command(subcommand)]
        command: SourcesCommand,
    },
    /// Trigger the ingest pipeline.
    Ingest(IngestArgs),
    /// Query the retrieval index.
    Query(QueryArgs),
    /// Replay a recorded query's frozen result set.
    Why {
        /// Query identifier returned by a previous query.
        query_id: String,
    },
    /// Stream all live documents with provenance and chunks as JSON lines.
    Export,
}

#[derive(Subcommand)]
enum SourcesCommand {
    /// Register a folder or file source.
    Add {
        /// Filesystem path or URI.
        uri: String,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        include: Option<String>,
        #[arg(long)]
        exclude: Option<String>,
    },
    /// List registered sources.
    List,
    /// Remove a registered source.
    Remove {
        /// Source identifier.
        source_id: String,
    },
}

#[derive(Args)]
struct IngestArgs {
    /// Ingest every registered source.
    #[arg(long)]
    all: bool,
    /// Ingest a specific source ID.
    #[arg(long)]
    source: Option<String>,
    /// Ingest material at this path.
    #[arg(long)]
    path: Option<String>,
}

#[derive(Args)]
struct QueryArgs {
    /// Query text.
    text: String,
    /// Number of results to return.
    #[arg(long, default_value_t = 8)]
    k: usize,
    /// Disable hybrid (dense + sparse) retrieval.
    #[arg(long)]
    no_hybrid: bool,
    /// Disable cross-encoder reranking.
    #[arg(long)]
    no_rerank: bool,
    /// Restrict to documents carrying this tag (repeatable).
    #[arg(long = "filter")]
    filters: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let host = resolve_host(cli.host);
    let client = match reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            eprintln!("failed to build HTTP client: {e}");
            return ExitCode::from(EXIT_UNREACHABLE);
        }
    };

    let result = match cli.command {
        Command::Sources { command } => match command {
            SourcesCommand::Add {
                uri,
                label,
                include,
                exclude,
            } => request(
                &client,
                "POST",
                &format!("{host}/sources"),
                Some(json!({
                    "kind": "folder",
                    "uri": uri,
                    "label": label,
                    "include_glob": include,
                    "exclude_glob": exclude,
                })),
            ),
            SourcesCommand::List => request(&client, "GET", &format!("{host}/sources"), None),
            SourcesCommand::Remove { source_id } => request(
                &client,
                "DELETE",
                &format!("{host}/sources/{source_id}"),
                None,
            ),
        },
        Command::Ingest(args) => {
            let mut body = json!({});
            if let Some(source) = args.source {
                body["sources"] = json!([source]);
            }
            if let Some(path) = args.path {
                body["paths"] = json!([path]);
            }
            request(&client, "POST", &format!("{host}/ingest"), Some(body))
        }
        Command::Query(args) => request(
            &client,
            "POST",
            &format!("{host}/query"),
            Some(json!({
                "query": args.text,
                "k": args.k,
                "hybrid": !args.no_hybrid,
                "rerank": !args.no_rerank,
                "filters": if args.filters.is_empty() {
                    Value::Null
                } else {
                    json!({ "tags": args.filters })
                },
            })),
        ),
        Command::Why { query_id } => {
            request(&client, "GET", &format!("{host}/why/{query_id}"), None)
        }
        Command::Export => {
            // NDJSON stream: pass the lines through instead of re-encoding
            // the whole payload as one JSON value.
            return match export_lines(&client, &host) {
                Ok(()) => ExitCode::SUCCESS,
                Err(code) => ExitCode::from(code),
            };
        }
    };

    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
            ExitCode::SUCCESS
        }
        Err(code) => ExitCode::from(code),
    }
}

fn resolve_host(override_host: Option<String>) -> String {
    let host = override_host
        .or_else(|| std::env::var("CTXC_HOST").ok())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let host = host.trim_end_matches('/').to_string();
    if host.starts_with("http://") || host.starts_with("https://") {
        host
    } else {
        format!("http://{host}")
    }
}

/// Fetch the export stream and print it one JSON line at a time.
fn export_lines(client: &reqwest::blocking::Client, host: &str) -> Result<(), u8> {
    let url = format!("{host}/export");
    let response = client.get(&url).send().map_err(|e| {
        eprintln!("backend unreachable at {url}: {e}");
        EXIT_UNREACHABLE
    })?;

    let status = response.status();
    let body = response.text().unwrap_or_default();
    if !status.is_success() {
        let detail = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("detail").and_then(Value::as_str).map(String::from))
            .unwrap_or_else(|| "unknown error".to_string());
        eprintln!("request failed ({status}): {detail}");
        return Err(EXIT_SERVER_ERROR);
    }

    for line in body.lines() {
        if !line.trim().is_empty() {
            println!("{line}");
        }
    }
    Ok(())
}

fn request(
    client: &reqwest::blocking::Client,
    method: &str,
    url: &str,
    body: Option<Value>,
) -> Result<Value, u8> {
    let mut builder = match method {
        "GET" => client.get(url),
        "POST" => client.post(url),
        "DELETE" => client.delete(url),
        other => client.request(other.parse().expect("valid method"), url),
    };
    if let Some(body) = body {
        builder = builder.json(&body);
    }

    let response = builder.send().map_err(|e| {
        eprintln!("backend unreachable at {url}: {e}");
        EXIT_UNREACHABLE
    })?;

    let status = response.status();
    let value: Value = response.json().unwrap_or(Value::Null);
    if !status.is_success() {
        eprintln!(
            "request failed ({status}): {}",
            value
                .get("detail")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
        );
        return Err(EXIT_SERVER_ERROR);
    }
    Ok(value)
}
