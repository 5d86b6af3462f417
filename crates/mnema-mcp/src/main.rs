//! Mnema server - persistent fragment memory for stateless agents
//!
//! Exposes the eleven memory operations over JSON-RPC: newline-delimited
//! stdio as the primary framing, with an optional HTTP framing for
//! sidecar deployments. The process owns one memory facade, one
//! background evaluator and a periodic consolidation loop.
//!
//! Environment:
//! - `RUST_LOG` - log filter (stderr)
//! - `MNEMA_LLM_URL` / `MNEMA_LLM_API_KEY` / `MNEMA_LLM_MODEL` - LLM provider
//! - `MNEMA_NLI_URL` - remote NLI classifier
//! - `MNEMA_HTTP_PORT` - enable the HTTP framing
//! - `MNEMA_CONSOLIDATION_INTERVAL_HOURS` - periodic maintenance cadence

mod protocol;
mod server;
mod tools;

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use mnema_core::{
    ActivityTracker, AgentScope, AutoReflector, DisabledLlm, DisabledNli, Embedder, Evaluator,
    FragmentStore, HttpLlm, HttpNli, LlmClient, MemoryConfig, MemoryIndex, MemoryManager,
    NliModel,
};

use crate::protocol::stdio::StdioTransport;
use crate::server::McpServer;

struct CliOptions {
    data_dir: Option<PathBuf>,
    http_port: Option<u16>,
}

/// Parse command-line arguments. Exits for --help/--version and on
/// unknown arguments.
fn parse_args() -> CliOptions {
    let args: Vec<String> = std::env::args().collect();
    let mut options = CliOptions {
        data_dir: None,
        http_port: std::env::var("MNEMA_HTTP_PORT")
            .ok()
            .and_then(|p| p.parse().ok()),
    };
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                println!("Mnema Server v{}", env!("CARGO_PKG_VERSION"));
                println!();
                println!("Persistent fragment memory for agents over JSON-RPC.");
                println!();
                println!("USAGE:");
                println!("    mnema-mcp [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help              Print help information");
                println!("    -V, --version           Print version information");
                println!("    --data-dir <PATH>       Custom data directory");
                println!("    --http-port <PORT>      Also serve the HTTP framing");
                println!();
                println!("ENVIRONMENT:");
                println!("    RUST_LOG                Log level filter (debug, info, warn, error)");
                println!("    MNEMA_LLM_URL           OpenAI-compatible endpoint for evaluation and reflect");
                println!("    MNEMA_NLI_URL           Remote NLI classifier endpoint");
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("mnema-mcp {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--data-dir" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --data-dir requires a path argument");
                    std::process::exit(1);
                }
                options.data_dir = Some(PathBuf::from(&args[i]));
            }
            "--http-port" => {
                i += 1;
                let port = args.get(i).and_then(|p| p.parse().ok());
                match port {
                    Some(port) => options.http_port = Some(port),
                    None => {
                        eprintln!("error: --http-port requires a port number");
                        std::process::exit(1);
                    }
                }
            }
            arg => {
                eprintln!("error: unknown argument '{}'", arg);
                eprintln!("Try 'mnema-mcp --help' for more information.");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    options
}

fn build_embedder() -> Arc<dyn Embedder> {
    #[cfg(feature = "embeddings")]
    {
        let embedder = mnema_core::LocalEmbedder::new();
        if let Err(e) = embedder.init() {
            error!("Embedding model unavailable: {}", e);
            error!("Fragments will be stored without embeddings; the semantic tier is off until it loads");
        } else {
            info!("Embedding model ready");
        }
        Arc::new(embedder)
    }
    #[cfg(not(feature = "embeddings"))]
    {
        warn!("Built without the embeddings feature; semantic tier disabled");
        Arc::new(mnema_core::DisabledEmbedder)
    }
}

fn build_nli(config: &MemoryConfig) -> Arc<dyn NliModel> {
    if let Some(http) = HttpNli::from_env(config.nli_timeout) {
        info!("NLI: remote classifier configured");
        return Arc::new(http);
    }
    #[cfg(feature = "local-nli")]
    {
        info!("NLI: in-process model (loads on first use)");
        return Arc::new(mnema_core::nli::local::LocalNli::new());
    }
    #[allow(unreachable_code)]
    {
        warn!("NLI: no classifier configured; contradiction detection falls back to the LLM");
        Arc::new(DisabledNli)
    }
}

fn build_llm() -> Arc<dyn LlmClient> {
    match HttpLlm::from_env() {
        Some(llm) => {
            info!("LLM: provider configured");
            Arc::new(llm)
        }
        None => {
            warn!("LLM: no provider configured; evaluation and structured reflect disabled");
            Arc::new(DisabledLlm)
        }
    }
}

#[tokio::main]
async fn main() {
    let options = parse_args();

    // Logging to stderr; stdout carries JSON-RPC
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    info!("Mnema server v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = MemoryConfig::from_env();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let embedder = build_embedder();
    let store = match FragmentStore::new(options.data_dir, embedder, config.embedding_dims) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to initialise storage: {}", e);
            std::process::exit(1);
        }
    };
    info!("Storage initialised");

    let index = Arc::new(MemoryIndex::new(config.wm_max_tokens));
    let activity = Arc::new(ActivityTracker::new());
    let nli = build_nli(&config);
    let llm = build_llm();

    let manager = Arc::new(MemoryManager::new(
        store.clone(),
        index.clone(),
        activity,
        nli,
        llm.clone(),
        config.clone(),
    ));

    // Background quality evaluator with a graceful shutdown handle
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let evaluator = Evaluator::new(store, index, llm, &config);
    let evaluator_handle = evaluator.spawn(shutdown_rx);

    // Periodic maintenance: consolidation plus an auto-reflect sweep over
    // idle sessions
    {
        let manager = manager.clone();
        tokio::spawn(async move {
            let interval_hours: u64 = std::env::var("MNEMA_CONSOLIDATION_INTERVAL_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(6);
            // Small delay so startup and the stdio handshake come first
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;

            loop {
                let reflector = AutoReflector::new(manager.clone());
                let reflected = reflector
                    .reflect_idle_sessions(10, &AgentScope::maintenance())
                    .await;
                if reflected > 0 {
                    info!("Auto-reflected {} idle session(s)", reflected);
                }

                let report = manager.consolidate().await;
                info!(
                    tier_transitions = report.tier_transitions,
                    decayed = report.decayed,
                    expired = report.expired,
                    contradictions = report.contradictions_found,
                    duration_ms = report.duration_ms,
                    "Periodic consolidation complete"
                );

                tokio::time::sleep(std::time::Duration::from_secs(interval_hours * 3600)).await;
            }
        });
    }

    // Optional HTTP framing alongside stdio
    #[cfg(feature = "http")]
    if let Some(port) = options.http_port {
        let http_server = McpServer::new(manager.clone());
        tokio::spawn(async move {
            if let Err(e) = protocol::http::serve(http_server, port).await {
                warn!("HTTP framing stopped: {}", e);
            }
        });
    }

    let server = McpServer::new(manager.clone());
    let transport = StdioTransport::new();
    info!("Serving JSON-RPC on stdio...");
    if let Err(e) = transport.run(server).await {
        error!("Server error: {}", e);
    }

    // stdin closed: reflect what is left, stop the worker, drain
    info!("Shutting down...");
    let reflector = AutoReflector::new(manager);
    let reflected = reflector
        .reflect_idle_sessions(usize::MAX, &AgentScope::maintenance())
        .await;
    if reflected > 0 {
        info!("Auto-reflected {} session(s) at shutdown", reflected);
    }
    let _ = shutdown_tx.send(true);
    let _ = evaluator_handle.await;

    info!("Mnema server stopped");
}
