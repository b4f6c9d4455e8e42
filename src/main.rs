use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use rpc_token_graph::logging::init_logging;
use rpc_token_graph::server::{self, TokenServiceConfig};
use rpc_token_graph::{
    ClusterSet, DataType, ExecutionGraph, Executor, OpNode, OpRegistry, Place, RpcClientConfig,
    RpcContext, Scope, Tensor, export_clusters, load_runtime_graph,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "rpc-token-graph", version, about = "Cluster export and remote token calls")]
struct Cli {
    #[arg(long, global = true, value_enum, default_value = "info")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Device {
    Cpu,
    Gpu,
}

#[derive(Subcommand)]
enum Command {
    /// Save a cluster partition of a graph.
    Export {
        /// Graph description (JSON).
        #[arg(long)]
        graph: PathBuf,
        /// Clusters as a JSON array of {ops, inputs, outputs, interval}.
        #[arg(long)]
        clusters: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Print a saved partition as JSON.
    Inspect {
        #[arg(long)]
        dir: PathBuf,
    },
    /// Run rpc_token_call followed by rpc_result once.
    Call {
        #[arg(long, value_delimiter = ',', required = true)]
        url_list: Vec<String>,
        #[arg(long, default_value_t = 0)]
        url_id: i64,
        #[arg(long, value_delimiter = ',', required = true, allow_negative_numbers = true)]
        ids: Vec<i64>,
        #[arg(long, default_value = "")]
        vocab: String,
        #[arg(long, action = ArgAction::Set, default_value_t = true)]
        use_ids: bool,
        #[arg(long, default_value_t = rpc_token_graph::config::DEFAULT_TIMEOUT_SECS)]
        timeout: u64,
        #[arg(long, value_enum, default_value = "cpu")]
        device: Device,
    },
    /// Run the loopback token service.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8090)]
        port: u16,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.into());

    match cli.command {
        Command::Export {
            graph,
            clusters,
            out,
        } => {
            let graph = ExecutionGraph::from_json_file(&graph)
                .with_context(|| format!("loading graph {}", graph.display()))?;
            let raw = std::fs::read_to_string(&clusters)
                .with_context(|| format!("reading {}", clusters.display()))?;
            let clusters: ClusterSet = serde_json::from_str(&raw)?;
            let summary = export_clusters(&graph, &clusters, &out)?;
            println!(
                "Saved {} clusters to {} ({} bytes)",
                summary.clusters,
                summary.path.display(),
                summary.bytes_written
            );
        }
        Command::Inspect { dir } => {
            let clusters = load_runtime_graph(&dir)?;
            println!("{}", serde_json::to_string_pretty(&clusters)?);
        }
        Command::Call {
            url_list,
            url_id,
            ids,
            vocab,
            use_ids,
            timeout,
            device,
        } => {
            let place = match device {
                Device::Cpu => Place::Cpu,
                Device::Gpu => Place::Gpu(0),
            };
            let mut graph = ExecutionGraph::new();
            graph.add_var("ids", DataType::Int64, vec![ids.len() as i64]);
            graph.add_var("url_id", DataType::Int64, vec![1]);
            graph.add_op(
                OpNode::new("call", "rpc_token_call")
                    .with_input("X", "ids")
                    .with_input("url_id", "url_id")
                    .with_output("Out", "request_id")
                    .with_attrs(json!({
                        "url_list": url_list,
                        "vocab_path": vocab,
                        "use_ids": use_ids,
                    })),
            );
            graph.add_op(
                OpNode::new("fetch", "rpc_result")
                    .with_input("X", "request_id")
                    .with_output("Out", "body")
                    .with_output("Status", "status"),
            );

            let registry = Arc::new(OpRegistry::with_builtin_ops()?);
            let rpc = Arc::new(RpcContext::new(
                RpcClientConfig::default().with_timeout_secs(timeout),
            )?);
            let executor = Executor::new(registry, rpc, place);
            let mut scope = Scope::new();
            scope.set("ids", Tensor::from_i64(ids).with_place(place));
            scope.set("url_id", Tensor::scalar_i64(url_id).with_place(place));
            executor.run_graph(&graph, &mut scope)?;

            let request_id = scope
                .get("request_id")
                .and_then(Tensor::as_i64_vec)
                .unwrap_or_default();
            let status = scope
                .get("status")
                .and_then(Tensor::as_i64_vec)
                .unwrap_or_default();
            let body = scope
                .get("body")
                .and_then(Tensor::as_u8_slice)
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            println!("request_id={:?} status={:?}", request_id, status);
            println!("{}", body);
        }
        Command::Serve { host, port } => {
            actix_web::rt::System::new().block_on(server::startup(TokenServiceConfig { host, port }))?;
        }
    }
    Ok(())
}
