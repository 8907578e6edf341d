//! ClockConf binary: a transient operator tool that proposes one Clock
//! change and exits once ClockManager echoes it back (§4.6, §8).

use clap::Parser;
use mrcs_messages::ClockWire;

use mrcs::broker::lapin_client::LapinBroker;
use mrcs::broker::Broker;
use mrcs::cli::{init_tracing, CommonArgs};
use mrcs::clock_conf::{self, ClockConfHandler};
use mrcs::node::run_subscriber;

#[derive(Parser)]
#[command(about = "ClockConf: propose a Clock change and wait for ClockManager to confirm it")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long)]
    is_running: bool,
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
    speed: u8,
    #[arg(long)]
    year: i32,
    #[arg(long)]
    month: u32,
    #[arg(long)]
    day: u32,
    #[arg(long)]
    hour: u32,
    #[arg(long)]
    minute: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    cli.common.validate()?;

    let mode = cli.common.mode();
    let descriptor = clock_conf::descriptor(mode.exchange_name());
    let mut broker = LapinBroker::new(cli.common.amqp_uri.clone(), mode.exchange_name());

    if cli.common.clean {
        broker.connect().await?;
        broker.teardown(&descriptor.queue).await?;
        return Ok(());
    }

    let proposal = ClockWire {
        is_running: cli.is_running,
        speed: cli.speed,
        year: cli.year,
        month: cli.month,
        day: cli.day,
        hour: cli.hour,
        minute: cli.minute,
    };
    let handler = ClockConfHandler::new(proposal);
    run_subscriber(broker, descriptor, handler).await
}
