//! SAP Gateway OData MCP Server
//!
//! Entry point for the MCP server binary.
//! Implements MCP protocol over stdio using JSON-RPC 2.0.

use futures::StreamExt;
use sap_odata_mcp::config::{AppConfig, ServicesConfig};
use sap_odata_mcp::mcp::{
    register_sap_tools, JsonRpcResponse, SapMcpServer, ToolContext, ToolRegistry,
};
use sap_odata_mcp::odata::SapClient;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load_default()?;

    // Logs go to stderr; stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.tracing_level())),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting SAP OData MCP Server...");

    let connection = Arc::new(config.connection()?);
    let services = match &config.server.services_config_path {
        Some(path) => ServicesConfig::load(path)?,
        None => {
            tracing::warn!("No services configuration given, tools will see an empty catalog");
            ServicesConfig::default()
        }
    };

    tracing::info!(
        "Configured for {} (client {}), {} services",
        connection.base_url(),
        connection.client(),
        services.services.len()
    );

    let client = Arc::new(SapClient::from_config(connection, &services)?);
    let registry = Arc::new(ToolRegistry::new());
    register_sap_tools(
        &registry,
        ToolContext::new(client.clone(), Arc::new(services)),
    );

    let server = SapMcpServer::new(registry);

    tracing::info!("MCP Server ready, listening on stdio...");

    let result = run_stdio_loop(&server).await;
    client.close().await;
    result
}

async fn run_stdio_loop(server: &SapMcpServer) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        tracing::debug!("Received: {}", line);

        if let Some(response) = server.handle_line(&line).await {
            send_response(&mut stdout, &response).await?;
        }
    }

    tracing::info!("stdin closed, shutting down");
    Ok(())
}

async fn send_response(
    stdout: &mut Stdout,
    response: &JsonRpcResponse,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut json = serde_json::to_string(response)?;
    tracing::debug!("Sending: {}", json);
    json.push('\n');
    stdout.write_all(json.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}
