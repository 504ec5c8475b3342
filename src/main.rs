use block_cluster::balancer::handlers as balancer_handlers;
use block_cluster::balancer::{BalancerService, HttpNodeTransport};
use block_cluster::config::{BalancerConfig, NodeConfig};
use block_cluster::node::NodeAgent;
use block_cluster::node::handlers as node_handlers;
use block_cluster::node::registration::register_with_balancer;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("balancer") => run_balancer(&args[2..]).await,
        Some("node") => run_node(&args[2..]).await,
        _ => {
            print_usage(&args[0]);
            std::process::exit(1);
        }
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} balancer --bind <addr:port> [--block-size <bytes>]", program);
    eprintln!(
        "       {} node --bind <addr:port> --balancer <url> [--root <dir>] [--name <node>] [--advertise <url>] [--keep-data]",
        program
    );
    eprintln!("Example: {} balancer --bind 127.0.0.1:7000", program);
    eprintln!(
        "Example: {} node --bind 127.0.0.1:7101 --balancer http://127.0.0.1:7000",
        program
    );
}

fn flag_value<'a>(args: &'a [String], i: usize) -> anyhow::Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("{} requires a value", args[i]))
}

async fn run_balancer(args: &[String]) -> anyhow::Result<()> {
    let mut config = BalancerConfig::from_env()?;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                config.bind_addr = flag_value(args, i)?.parse()?;
                i += 2;
            }
            "--block-size" => {
                config.block_size = flag_value(args, i)?.parse()?;
                i += 2;
            }
            other => {
                tracing::warn!("Ignoring unknown argument {}", other);
                i += 1;
            }
        }
    }
    config.validate()?;

    let transport = Arc::new(HttpNodeTransport::new(&config)?);
    let service = Arc::new(BalancerService::new(&config, transport)?);
    let app = balancer_handlers::router(service);

    tracing::info!(
        "Balancer listening on {} (block size {} bytes)",
        config.bind_addr,
        config.block_size
    );
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn run_node(args: &[String]) -> anyhow::Result<()> {
    let mut config = NodeConfig::from_env()?;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                let addr: SocketAddr = flag_value(args, i)?.parse()?;
                config = config.with_bind_addr(addr);
                i += 2;
            }
            "--balancer" => {
                config.balancer_url = flag_value(args, i)?.to_string();
                i += 2;
            }
            "--root" => {
                config.root_path = PathBuf::from(flag_value(args, i)?);
                i += 2;
            }
            "--name" => {
                config.node_name = flag_value(args, i)?.to_string();
                i += 2;
            }
            "--advertise" => {
                config.advertised_url = flag_value(args, i)?.to_string();
                i += 2;
            }
            "--keep-data" => {
                config.clear_on_start = false;
                i += 1;
            }
            other => {
                tracing::warn!("Ignoring unknown argument {}", other);
                i += 1;
            }
        }
    }

    tracing::info!("Starting node {} on {}", config.node_name, config.bind_addr);
    let agent = Arc::new(NodeAgent::open(&config).await?);

    // The balancer may push blocks as soon as we register, so listen first.
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let app = node_handlers::router(agent.clone());
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    let client = reqwest::Client::new();
    let ack = register_with_balancer(&client, &config, &agent).await?;
    tracing::info!(
        "Node {} ready, advertised as {} ({} nodes in cluster)",
        config.node_name,
        config.advertised_url,
        ack.known_nodes
    );

    server.await??;
    Ok(())
}
