use clap::Parser;
use mapreduce_rs::mr::coordinator::{Paths, ServerClient};
use mapreduce_rs::mr::{config, worker::Worker};
use tarpc::{client, context, tokio_serde::formats::Json};
use tracing::{error, info};

/// MapReduce worker: long-polls the coordinator for map/reduce tasks and
/// executes them.
#[derive(Parser, Debug)]
#[command(name = "mrworker")]
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
    let cfg = config::WorkerConfig::default();

    info!(worker_id = %cfg.worker_id, addr = %cfg.coordinator_addr, simulate_straggler = cfg.simulate_straggler, "worker starting");

    let client_transport = match tarpc::serde_transport::tcp::connect(cfg.coordinator_addr, Json::default).await {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "failed to connect to coordinator");
            return Ok(());
        }
    };
    let client = ServerClient::new(client::Config::default(), client_transport).spawn();

    let paths = Paths {
        intermediate_dir: args.intermediate_dir.into(),
        output_dir: args.output_dir.into(),
    };
    let worker = Worker::new(cfg.worker_id.clone(), paths, cfg.simulate_straggler);

    worker.spawn_heartbeats(client.clone());

    // Report liveness once up front so GetJobStatus/operator tooling sees
    // this worker immediately, before the first scheduled heartbeat fires.
    let _ = client.heartbeat(context::current(), cfg.worker_id.clone(), String::new()).await;

    worker.run(client).await
}
