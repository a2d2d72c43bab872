use clap::{Parser, ValueEnum};
use log::info;
use maelstrom_crdt::{GCounter, GSet, PNCounter};
use maelstrom_node::workloads::{BroadcastWorkload, CrdtServer, EchoWorkload, Transactor};
use std::sync::Arc;

#[derive(Debug, Clone, ValueEnum)]
#[value(rename_all = "snake_case")]
enum WorkloadKind {
    Echo,
    Broadcast,
    Datomic,
    GCounter,
    GSet,
    PnCounter,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "A Maelstrom workload node", long_about = None)]
struct Cli {
    /// Which workload this node hosts.
    #[arg(short = 'w', long = "workload", value_enum)]
    workload: WorkloadKind,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = tokio::select! {
        result = run(cli.workload) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("fatal: {e}");
        std::process::exit(1);
    }
}

async fn run(workload: WorkloadKind) -> maelstrom_node::NodeResult<()> {
    match workload {
        WorkloadKind::Echo => maelstrom_node::run(Arc::new(EchoWorkload::new())).await,
        WorkloadKind::Broadcast => maelstrom_node::run(Arc::new(BroadcastWorkload::new())).await,
        WorkloadKind::Datomic => maelstrom_node::run(Arc::new(Transactor::new())).await,
        WorkloadKind::GCounter => maelstrom_node::run(Arc::new(CrdtServer::<GCounter>::new())).await,
        WorkloadKind::GSet => maelstrom_node::run(Arc::new(CrdtServer::<GSet>::new())).await,
        WorkloadKind::PnCounter => maelstrom_node::run(Arc::new(CrdtServer::<PNCounter>::new())).await,
    }
}
