// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! topic-rpc CLI
//!
//! Configuration tooling and an in-process request/reply demo.
//!
//! # Usage
//!
//! ```bash
//! # Generate an example configuration
//! topic-rpc gen-config -o rpc.toml
//!
//! # Validate a configuration file
//! topic-rpc validate -c rpc.toml
//!
//! # Single call against the configured echo servers
//! topic-rpc demo -c rpc.toml --routing-key testRoutingKey.15 --payload '{"message":"OurMessage"}'
//!
//! # Collect every reply until the timeout
//! topic-rpc demo --many --timeout-ms 2000
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use topic_rpc::{
    BrokerChannel, CallOptions, ClientConfig, MemoryBroker, Payload, Replier, ResponseContains,
    ResponseView, RouteConfig, RouteHandle, RpcClient, RpcConfig, RpcServer,
};
use tracing_subscriber::EnvFilter;

/// Request/reply over topic exchanges
#[derive(Parser, Debug)]
#[command(name = "topic-rpc")]
#[command(about = "topic-rpc - Request/reply over topic-based message brokers")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "rpc.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Run echo servers for every route and call them in-process
    Demo {
        /// Configuration file path (example configuration when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Exchange to publish the request to
        #[arg(long, default_value = "testExchange")]
        exchange: String,

        /// Routing key of the request
        #[arg(long, default_value = "testRoutingKey.15")]
        routing_key: String,

        /// Request payload (JSON, or plain text when not valid JSON)
        #[arg(long, default_value = r#"{"message":"OurMessage"}"#)]
        payload: String,

        /// Collect every reply until the timeout
        #[arg(long)]
        many: bool,

        /// Call timeout in milliseconds
        #[arg(long, default_value = "2000")]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match args.command {
        Commands::GenConfig { output } => cmd_gen_config(output),
        Commands::Validate { config } => cmd_validate(config),
        Commands::Demo {
            config,
            exchange,
            routing_key,
            payload,
            many,
            timeout_ms,
        } => {
            let config = match config {
                Some(path) => RpcConfig::from_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => example_config(),
            };
            let options = CallOptions::new(exchange, routing_key)
                .timeout(Duration::from_millis(timeout_ms))
                .response_contains(config.client.response_contains);
            cmd_demo(config, options, parse_payload(payload), many).await
        }
    }
}

/// Configuration written by `gen-config` and used by `demo` without `-c`.
fn example_config() -> RpcConfig {
    let mut config = RpcConfig {
        client: ClientConfig::builder()
            .name("example-client")
            .default_timeout(Duration::from_millis(2000))
            .response_contains(ResponseContains::all())
            .build(),
        ..Default::default()
    };
    config.add_route(
        RouteConfig::new("testExchange", "testServerQueue", "testRoutingKey.*").signature("server-1"),
    );
    config.add_route(
        RouteConfig::new("testExchange", "complete-different-queue", "testRoutingKey.*")
            .signature("server-2"),
    );
    config.add_route(
        RouteConfig::new("testExchange", "complete-different-queue-123", "#.15")
            .signature("server-3"),
    );
    config
}

fn parse_payload(raw: String) -> Payload {
    match serde_json::from_str(&raw) {
        Ok(value) => Payload::Json(value),
        Err(_) => Payload::Text(raw),
    }
}

fn cmd_gen_config(output: PathBuf) -> anyhow::Result<()> {
    let toml_str = toml::to_string_pretty(&example_config())?;

    // Add comments
    let content = format!(
        r#"# topic-rpc Configuration
# Generated by topic-rpc gen-config

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> anyhow::Result<()> {
    match RpcConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!(
                "Client: {} (timeout {} ms)",
                config.client.name, config.client.default_timeout_ms
            );
            println!("Routes: {}", config.routes.len());
            for (i, route) in config.routes.iter().enumerate() {
                println!(
                    "  [{}] {} --{}--> {} (signature '{}')",
                    i, route.exchange, route.routing_key, route.queue, route.signature
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

async fn cmd_demo(
    config: RpcConfig,
    options: CallOptions,
    payload: Payload,
    many: bool,
) -> anyhow::Result<()> {
    let broker = Arc::new(MemoryBroker::new());
    let routes = start_echo_servers(&broker, &config.routes).await?;

    println!("topic-rpc demo v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    for route in &config.routes {
        println!(
            "Server '{}': {} --{}--> {}",
            route.signature, route.exchange, route.routing_key, route.queue
        );
    }
    println!(
        "Request: {} / {} ({})",
        options.exchange,
        options.routing_key,
        payload.payload_type()
    );
    println!();

    let client = RpcClient::new(broker.clone(), config.client);
    if many {
        let replies = client
            .call_many_with(payload, options, |reply| {
                println!("<- reply from {}", reply.signature().unwrap_or("?"));
                async {}
            })
            .await?;
        println!("{}", serde_json::to_string_pretty(&replies)?);
    } else {
        let reply = client.call(payload, options).await?;
        println!("{}", serde_json::to_string_pretty(&reply)?);
    }

    client.shutdown().await;
    broker.close().await?;

    println!();
    print_stats(&routes);
    Ok(())
}

async fn start_echo_servers(
    broker: &Arc<MemoryBroker>,
    routes: &[RouteConfig],
) -> anyhow::Result<Vec<RouteHandle>> {
    let mut handles = Vec::with_capacity(routes.len());
    for route in routes {
        let server = RpcServer::new(broker.clone(), route.signature.as_str());
        let handle = server
            .register_rpc_route(
                |request: ResponseView, reply: Replier| async move {
                    tracing::info!("{} handling request", reply.signature());
                    let content = request.content.unwrap_or(Payload::Binary(Vec::new()));
                    reply.reply(content).await?;
                    anyhow::Ok(())
                },
                route.clone(),
            )
            .await
            .with_context(|| format!("registering route on '{}'", route.queue))?;
        handles.push(handle);
    }
    Ok(handles)
}

fn print_stats(routes: &[RouteHandle]) {
    println!("--- Route Statistics ---");
    for route in routes {
        let stat = route.stats();
        println!(
            "  {}: {} requests, {} replies, {} reply failures, {} handler errors",
            stat.queue,
            stat.requests_received,
            stat.replies_sent,
            stat.reply_failures,
            stat.handler_errors
        );
    }
}
