use anyhow::anyhow;
use bytes::Bytes;
use clap::Parser;
use clap_derive::Parser;
use relaynet::node_config::NodeConfig;
use relaynet::sim::{LinkSpec, SimNetwork};
use relaynet::topology::{LinkInfo, NodeAddr, NodeKind};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, Level};

/// Two hosts connected through a chain of routers over lossy links. Each host sends a number of
///  messages to the other, and the run ends when all of them were delivered.
#[derive(Parser)]
struct Args {
    #[clap(long, default_value_t = 10)]
    messages: usize,

    #[clap(long, default_value_t = 1)]
    routers: u32,

    #[clap(long, default_value_t = 1_000_000)]
    bandwidth: u64,

    #[clap(long, default_value_t = 2)]
    delay_millis: u64,

    #[clap(long, default_value_t = 0.1)]
    loss_rate: f64,

    #[clap(long, default_value_t = 0.05)]
    corruption_rate: f64,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let link = LinkSpec {
        info: LinkInfo {
            bandwidth_bits_per_sec: args.bandwidth,
            propagation_delay: Duration::from_millis(args.delay_millis),
        },
        loss_rate: args.loss_rate,
        corruption_rate: args.corruption_rate,
    };

    let first = NodeAddr(1);
    let last = NodeAddr(args.routers + 2);

    let mut sim = SimNetwork::new();
    sim.add_node(first, NodeConfig::new(NodeKind::Host))?;
    for n in 0..args.routers {
        sim.add_node(NodeAddr(n + 2), NodeConfig::new(NodeKind::Router))?;
    }
    sim.add_node(last, NodeConfig::new(NodeKind::Host))?;
    for n in 1..last.0 {
        sim.connect(NodeAddr(n), NodeAddr(n + 1), link)?;
    }

    let mut running = sim.start()?;
    let mut a = running.take_handle(first).ok_or_else(|| anyhow!("no handle for {}", first))?;
    let mut b = running.take_handle(last).ok_or_else(|| anyhow!("no handle for {}", last))?;

    let started = Instant::now();
    let num_messages = args.messages;
    let to_b = (0..num_messages).map(|i| Bytes::from(format!("from {} #{}", first, i))).collect::<Vec<_>>();
    let to_a = (0..num_messages).map(|i| Bytes::from(format!("from {} #{}", last, i))).collect::<Vec<_>>();

    let a_task = tokio::spawn(async move {
        a.send_all(last, to_b).await?;
        a.receive(num_messages).await
    });
    let b_task = tokio::spawn(async move {
        b.send_all(first, to_a).await?;
        b.receive(num_messages).await
    });

    for (addr, received) in [(first, a_task.await??), (last, b_task.await??)] {
        for (from, payload) in received {
            info!("{} received from {}: {}", addr, from, String::from_utf8_lossy(&payload));
        }
    }
    info!("all {} messages delivered in both directions after {:?}", num_messages, started.elapsed());

    running.dump_state();
    running.shutdown().await
}
