use anyhow::Result;
use clap::{Parser, Subcommand};

mod mcp;

use mcp::tools::{self, EconomicSearchArgs};

#[derive(Parser, Debug)]
#[command(name = "econpipe")]
#[command(about = "Deduplicated, memoized economic search (CLI + MCP stdio server)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as an MCP stdio server.
    #[cfg(feature = "stdio")]
    McpStdio,
    /// Run one or more searches through a single dedup service (json).
    Search(SearchCmd),
    /// Diagnose configuration/launch issues (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct SearchCmd {
    /// Query (repeatable). Queries run in order against the same service.
    #[arg(long, required = true)]
    query: Vec<String>,
    /// Logical tool name used to namespace cache keys.
    #[arg(long, default_value = tools::DEFAULT_TOOL)]
    tool: String,
    /// Session id; enables memoization across queries and repeats.
    #[arg(long, env = "ECONPIPE_SESSION_ID")]
    session_id: Option<String>,
    /// Request id; a record is printed at most once across all queries.
    #[arg(long)]
    request_id: Option<String>,
    #[arg(long)]
    max_results: Option<usize>,
    /// Restrict to a source (repeatable).
    #[arg(long = "source")]
    sources: Vec<String>,
    #[arg(long)]
    search_type: Option<String>,
    #[arg(long)]
    relevance_threshold: Option<f64>,
    /// Run each query this many times.
    #[arg(long, default_value_t = 1)]
    repeat: usize,
    /// Search endpoint override.
    #[arg(long, env = "ECONPIPE_ENDPOINT")]
    endpoint: Option<String>,
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
    /// Attempt a local stdio MCP handshake (list_tools) to prove a client can start the server.
    ///
    /// Spawns a child `econpipe mcp-stdio` process. It performs no search and prints no secrets.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    check_stdio: bool,
    /// Timeout for the stdio handshake (ms).
    #[arg(long, default_value_t = 3000)]
    timeout_ms: u64,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

fn has_env(k: &str) -> bool {
    std::env::var(k).ok().is_some_and(|v| !v.trim().is_empty())
}

/// Load `KEY=VALUE` lines from `ECONPIPE_ENV_FILE` without overriding the process environment.
fn load_env_file() {
    let Ok(p) = std::env::var("ECONPIPE_ENV_FILE") else {
        return;
    };
    let p = p.trim();
    if p.is_empty() {
        return;
    }
    let Ok(txt) = std::fs::read_to_string(p) else {
        return;
    };
    for raw in txt.lines() {
        let s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let Some((k, v)) = s.split_once('=') else {
            continue;
        };
        let k = k.trim();
        let v = v.trim();
        if k.is_empty() {
            continue;
        }
        if std::env::var_os(k).is_none() {
            std::env::set_var(k, v);
        }
    }
}

/// Logs go to stderr; stdout carries JSON (and MCP framing in stdio mode).
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = std::env::var("ECONPIPE_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run_search(args: SearchCmd) -> Result<()> {
    let t0 = std::time::Instant::now();
    let service = tools::build_service(args.endpoint.clone());
    let repeat = args.repeat.max(1);

    let mut runs: Vec<serde_json::Value> = Vec::new();
    let mut results: Vec<serde_json::Value> = Vec::new();
    let mut all_ok = true;
    let mut any_found = false;
    let mut first_error: Option<serde_json::Value> = None;

    for q in &args.query {
        for i in 0..repeat {
            let call = EconomicSearchArgs {
                query: Some(q.clone()),
                session_id: args.session_id.clone(),
                request_id: args.request_id.clone(),
                tool: Some(args.tool.clone()),
                max_num_results: args.max_results,
                included_sources: Some(args.sources.clone()),
                search_type: args.search_type.clone(),
                relevance_threshold: args.relevance_threshold,
            };
            let v = tools::economic_search(&service, call).await;
            let ok = v["ok"].as_bool().unwrap_or(false);
            all_ok &= ok;
            any_found |= v["found"].as_bool().unwrap_or(false);
            if !ok && first_error.is_none() {
                first_error = Some(v["error"].clone());
            }
            if let Some(rs) = v["results"].as_array() {
                results.extend(rs.iter().cloned());
            }
            runs.push(serde_json::json!({
                "query": q,
                "repeat_index": i,
                "ok": ok,
                "found": v["found"],
                "result_count": v["result_count"],
                "elapsed_ms": v["elapsed_ms"],
                "error": v.get("error").cloned().unwrap_or(serde_json::Value::Null),
            }));
        }
    }

    let stats = service
        .as_ref()
        .ok()
        .map(|s| serde_json::to_value(s.stats()).unwrap_or_default())
        .unwrap_or(serde_json::Value::Null);
    let mut payload = serde_json::json!({
        "ok": all_ok,
        "found": any_found,
        "request": {
            "queries": args.query,
            "tool": args.tool,
            "session_id": args.session_id,
            "request_id": args.request_id,
            "repeat": repeat,
        },
        "runs": runs,
        "results": results,
        "stats": stats,
    });
    if let Some(e) = first_error.as_ref() {
        payload["error"] = e.clone();
    }
    mcp::envelope::add_envelope_fields(&mut payload, "search", t0.elapsed().as_millis());

    match args.output.to_ascii_lowercase().as_str() {
        "text" => {
            for r in &results {
                println!(
                    "{}\t{}\t{}",
                    r["id"].as_str().unwrap_or(""),
                    r["title"].as_str().unwrap_or(""),
                    r["url"].as_str().unwrap_or("")
                );
            }
        }
        _ => println!("{payload}"),
    }

    if !all_ok {
        let code = first_error
            .as_ref()
            .and_then(|e| e["code"].as_str())
            .unwrap_or("unexpected_error")
            .to_string();
        anyhow::bail!("search failed: {code}");
    }
    Ok(())
}

async fn run_doctor(args: DoctorCmd) -> Result<()> {
    let t0 = std::time::Instant::now();
    let config = econpipe_local::ServiceConfig::from_env();
    let api_key_configured = has_env("ECONPIPE_API_KEY") || has_env("VALYU_API_KEY");
    let endpoint_overridden = has_env("ECONPIPE_ENDPOINT");

    let mut checks: Vec<serde_json::Value> = Vec::new();
    checks.push(serde_json::json!({
        "name": "api_key_present",
        "ok": api_key_configured,
        "message": if api_key_configured { "api key is set" } else { "api key is missing" },
        "hint": if api_key_configured { "" } else { "Set ECONPIPE_API_KEY (or VALYU_API_KEY), or point ECONPIPE_ENV_FILE at a file that sets it." },
    }));

    let mut stdio_ok: Option<bool> = None;
    let mut stdio_tool_count: Option<usize> = None;
    let mut stdio_error: Option<serde_json::Value> = None;
    let mut stdio_elapsed_ms: Option<u128> = None;

    #[cfg(feature = "stdio")]
    if args.check_stdio {
        use rmcp::service::ServiceExt;
        use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};
        use tokio::process::Command;

        let exe = std::env::current_exe().unwrap_or_else(|_| std::path::PathBuf::from("econpipe"));
        let child = TokioChildProcess::new(Command::new(exe).configure(|cmd| {
            cmd.args(["mcp-stdio"]);
            // The probe never searches; keep keys out of the child anyway.
            cmd.env_remove("ECONPIPE_API_KEY");
            cmd.env_remove("VALYU_API_KEY");
            cmd.env_remove("ECONPIPE_ENV_FILE");
            cmd.env("ECONPIPE_LOG", "error");
        }))?;

        let check_t0 = std::time::Instant::now();
        let res = async {
            let service = ().serve(child).await?;
            let listed = tokio::time::timeout(
                std::time::Duration::from_millis(args.timeout_ms),
                service.list_tools(Default::default()),
            )
            .await;
            let _ = service.cancel().await;
            Ok::<_, anyhow::Error>(listed)
        }
        .await;
        stdio_elapsed_ms = Some(check_t0.elapsed().as_millis());
        match res {
            Ok(Ok(Ok(listed))) => {
                stdio_ok = Some(true);
                stdio_tool_count = Some(listed.tools.len());
            }
            Ok(Ok(Err(e))) => {
                stdio_ok = Some(false);
                stdio_error = Some(serde_json::json!({"message": e.to_string()}));
            }
            Ok(Err(_)) => {
                stdio_ok = Some(false);
                stdio_error = Some(serde_json::json!({"message": "stdio handshake timed out"}));
            }
            Err(e) => {
                stdio_ok = Some(false);
                stdio_error = Some(serde_json::json!({"message": e.to_string()}));
            }
        }
    }

    let skipped = stdio_ok.is_none();
    checks.push(serde_json::json!({
        "name": "mcp_stdio_handshake",
        "ok": stdio_ok.unwrap_or(true),
        "skipped": skipped,
        "tool_count": stdio_tool_count,
        "elapsed_ms": stdio_elapsed_ms,
        "error": stdio_error,
    }));

    let all_ok = checks
        .iter()
        .filter(|c| !c["skipped"].as_bool().unwrap_or(false))
        .all(|c| c["ok"].as_bool().unwrap_or(false));
    let payload = serde_json::json!({
        "schema_version": mcp::SCHEMA_VERSION,
        "kind": "doctor",
        "ok": all_ok,
        "name": "econpipe",
        "version": env!("CARGO_PKG_VERSION"),
        "elapsed_ms": t0.elapsed().as_millis(),
        "features": { "stdio": cfg!(feature = "stdio") },
        "configured": {
            "api_key": api_key_configured,
            "endpoint_overridden": endpoint_overridden,
            "env_file": has_env("ECONPIPE_ENV_FILE"),
        },
        "limits": {
            "memo_capacity": config.memo_capacity,
            "max_sessions": config.max_sessions,
            "max_requests": config.max_requests,
            "timeout_ms": config.retry.timeout.as_millis() as u64,
            "max_retries": config.retry.max_retries,
        },
        "checks": checks,
    });

    match args.output.to_ascii_lowercase().as_str() {
        "text" => {
            println!("econpipe {}", env!("CARGO_PKG_VERSION"));
            println!("api_key: {}", if api_key_configured { "set" } else { "missing" });
            println!("checks:");
            if let Some(arr) = payload["checks"].as_array() {
                for c in arr {
                    let name = c["name"].as_str().unwrap_or("?");
                    if c["skipped"].as_bool().unwrap_or(false) {
                        println!("- {name}: skipped");
                    } else {
                        let ok = c["ok"].as_bool().unwrap_or(false);
                        println!("- {name}: {}", if ok { "ok" } else { "fail" });
                    }
                }
            }
        }
        _ => println!("{payload}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        #[cfg(feature = "stdio")]
        Commands::McpStdio => {
            mcp::serve_stdio()
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }
        Commands::Search(args) => run_search(args).await?,
        Commands::Doctor(args) => run_doctor(args).await?,
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": mcp::SCHEMA_VERSION,
                "kind": "version",
                "ok": true,
                "name": "econpipe",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("econpipe {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{v}"),
            }
        }
    }
    Ok(())
}
