use std::sync::Arc;

use huge_ai_search::app::AppState;
use huge_ai_search::core::config::CoreConfig;
use huge_ai_search::mcp;
use huge_ai_search::setup;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // VS Code MCP host may probe stdio servers with `--version`/`--help`.
    // If we ignore args and start JSON-RPC transport instead, the host can
    // fail compatibility detection and cancel the session.
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!(
            "huge-ai-search-mcp (MCP stdio server); usage: huge-ai-search-mcp [--version|--help|--setup [--json]]"
        );
        return Ok(());
    }

    if args.iter().any(|a| a == "--setup") {
        let cfg = CoreConfig::resolve();
        let report = setup::check_all(&cfg).await;
        let is_json = args.iter().any(|a| a == "--json");
        if is_json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report)
                    .unwrap_or_else(|e| format!(r#"{{"error":"failed_to_serialize","details":"{}"}}"#, e))
            );
        } else {
            print!("{}", report);
        }
        if report.has_failures() {
            std::process::exit(2);
        }
        return Ok(());
    }

    let cfg = CoreConfig::resolve();
    let _log_guard = huge_ai_search::logging::init(&cfg.log_dir)?;

    let state = Arc::new(AppState::new(cfg).await);
    mcp::run(state).await
}
