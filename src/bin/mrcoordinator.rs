use clap::Parser;
use futures::StreamExt;
use mapreduce_rs::mr::coordinator::{Coordinator, Paths, Server};
use mapreduce_rs::mr::{config, liveness, straggler};
use tarpc::{server::Channel, tokio_serde::formats::Json};
use tracing::info;

/// MapReduce coordinator: splits jobs, dispatches map/reduce tasks, and
/// detects stragglers.
#[derive(Parser, Debug)]
#[command(name = "mrcoordinator")]
struct Args {
    /// Directory for intermediate (shuffle) files.
    #[arg(long, default_value = "/intermediate")]
    intermediate_dir: String,

    /// Directory for final reduce output.
    #[arg(long, default_value = "/output")]
    output_dir: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::init_tracing();
    let args = Args::parse();

    let paths = Paths {
        intermediate_dir: args.intermediate_dir.into(),
        output_dir: args.output_dir.into(),
    };
    let coordinator = Coordinator::new(paths);

    let cfg = config::CoordinatorConfig::default();
    let server_transport = tarpc::serde_transport::tcp::listen(cfg.bind_addr, Json::default).await?;
    info!(addr = %cfg.bind_addr, "coordinator RPC server listening");

    let coordinator_for_serve = coordinator.clone();
    tokio::spawn(
        server_transport
            .filter_map(|r| async { r.ok() })
            .map(tarpc::server::BaseChannel::with_defaults)
            .map(|channel| channel.execute(coordinator_for_serve.clone().serve()).for_each(|f| async move { tokio::spawn(f); }))
            .buffer_unordered(16)
            .for_each(|_| async {}),
    );

    straggler::spawn(coordinator.state_handle());
    liveness::spawn(coordinator.state_handle());

    info!("coordinator ready, waiting for jobs (Ctrl-C to stop)");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
