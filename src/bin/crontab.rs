//! Crontab binary: accepts schedule requests and persists them as cronjobs
//! (§4.7, §8).

use clap::Parser;

use mrcs::broker::lapin_client::LapinBroker;
use mrcs::broker::Broker;
use mrcs::cli::{init_tracing, CommonArgs};
use mrcs::crontab::{self, CrontabHandler};
use mrcs::db::{DbHandle, DbName};
use mrcs::node::run_subscriber;

#[derive(Parser)]
#[command(about = "Crontab: accepts schedule requests and persists them as cronjobs")]
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
    let descriptor = crontab::descriptor(mode.exchange_name());
    let mut broker = LapinBroker::new(cli.common.amqp_uri.clone(), mode.exchange_name());

    if cli.common.clean {
        broker.connect().await?;
        broker.teardown(&descriptor.queue).await?;
        return Ok(());
    }

    let db = DbHandle::open(&cli.common.base_dir, DbName::Cron, mode)?;
    let handler = CrontabHandler::new(db);
    run_subscriber(broker, descriptor, handler).await
}
