//! ClockManager binary: the fleet's single authority for virtual-clock
//! configuration (§4.6, §8).

use clap::Parser;

use mrcs::broker::lapin_client::LapinBroker;
use mrcs::broker::Broker;
use mrcs::clock_manager::{self, ClockManagerHandler};
use mrcs::cli::{init_tracing, CommonArgs};
use mrcs::db::{DbHandle, DbName};
use mrcs::node::run_subscriber;

#[derive(Parser)]
#[command(about = "ClockManager: the fleet's single authority for the virtual clock")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    cli.common.validate()?;

    let mode = cli.common.mode();
    let descriptor = clock_manager::descriptor(mode.exchange_name());
    let mut broker = LapinBroker::new(cli.common.amqp_uri.clone(), mode.exchange_name());

    if cli.common.clean {
        broker.connect().await?;
        broker.teardown(&descriptor.queue).await?;
        return Ok(());
    }

    let db = DbHandle::open(&cli.common.base_dir, DbName::Cron, mode)?;
    let handler = ClockManagerHandler::new(db, cli.common.host.clone());
    run_subscriber(broker, descriptor, handler).await
}
