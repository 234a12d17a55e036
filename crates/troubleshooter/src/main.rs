mod cache;
mod catalog;
mod config;
mod error;
mod graph;
mod model;
mod pipeline;
mod ranker;
mod search;
mod server;

use std::sync::Arc;

use rmcp::{ServiceExt, transport::stdio};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cache::DiagnosticCache;
use config::Config;
use diag_common::agent::{AgentChat, AgentClient, AgentClientConfig};
use graph::ErrorGraph;
use pipeline::DiagnosticPipeline;
use ranker::{AgentRanker, Ranker};
use search::SymptomSearch;
use server::TroubleshooterServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries MCP JSON-RPC
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("starting troubleshooter MCP server");

    let config = Config::from_env()?;
    info!(
        default_machine = %config.default_machine,
        top_k = config.top_k,
        redis = config.redis_url.is_some(),
        catalog = ?config.catalog_path,
        "configuration loaded"
    );

    let agent_config = AgentClientConfig::from_env()?;
    info!(
        chat_url = %agent_config.chat_url,
        feedback = agent_config.feedback_url.is_some(),
        "agent client configured"
    );
    let agent: Arc<dyn AgentChat> = Arc::new(AgentClient::new(agent_config)?);

    let redis_cache = diag_common::redis::RedisCache::new(config.redis_url.as_deref());
    if redis_cache.is_available().await {
        info!("redis connected");
    } else {
        info!("redis unavailable, sessions kept in memory only");
    }
    let cache = Arc::new(DiagnosticCache::new(redis_cache, config.session_ttl_secs));

    let machines = match &config.catalog_path {
        Some(path) => catalog::load_from_file(path)?,
        None => {
            let builtin = catalog::builtin_catalog();
            catalog::validate(&builtin)?;
            builtin
        }
    };
    let graph = Arc::new(ErrorGraph::new(machines));
    info!(machines = graph.machines().count(), "error catalog loaded");

    let ranker: Arc<dyn Ranker> = Arc::new(AgentRanker::new(
        Arc::clone(&agent),
        config.agents.knowledge_graph.clone(),
    ));
    let search = Arc::new(SymptomSearch::new(graph, ranker, Arc::clone(&cache)));
    let pipeline = Arc::new(DiagnosticPipeline::new(
        agent,
        config.agents.clone(),
        Arc::clone(&search),
        cache,
        config.default_machine.clone(),
        config.top_k,
    ));

    let server = TroubleshooterServer::new(
        search,
        pipeline,
        config.default_machine.clone(),
        config.top_k,
    );

    if let Some(addr) = &config.tcp_listen_addr {
        let listener = TcpListener::bind(addr).await?;
        info!(listen_addr = %addr, "MCP server ready, serving on TCP");
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = server.clone();
            tokio::spawn(async move {
                info!(peer = %peer, "MCP client connected");
                let service = server.serve(stream).await.inspect_err(|e| {
                    tracing::error!(error = %e, "MCP server error");
                })?;
                service.waiting().await?;
                info!(peer = %peer, "MCP client disconnected");
                Ok::<(), anyhow::Error>(())
            });
        }
    } else {
        info!("MCP server ready, serving on stdio");
        let service = server.serve(stdio()).await.inspect_err(|e| {
            tracing::error!(error = %e, "MCP server error");
        })?;
        service.waiting().await?;
        info!("MCP server shut down");
    }
    Ok(())
}
