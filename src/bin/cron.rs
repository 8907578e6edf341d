//! Cron binary: watches virtual time advance and fires due cronjobs (§4.7,
//! §8).

use clap::Parser;

use mrcs::broker::lapin_client::LapinBroker;
use mrcs::broker::Broker;
use mrcs::cli::{init_tracing, CommonArgs};
use mrcs::cron::{self, CronConfig};
use mrcs::db::{DbHandle, DbName};

#[derive(Parser)]
#[command(about = "Cron: watches virtual time advance and fires due cronjobs")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Persist model time on every distinct tick and resume from it on
    /// restart, instead of starting fresh each run.
    #[arg(long)]
    save_model_time: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    cli.common.validate()?;

    let mode = cli.common.mode();
    let descriptor = cron::descriptor(mode.exchange_name());
    let mut broker = LapinBroker::new(cli.common.amqp_uri.clone(), mode.exchange_name());

    if cli.common.clean {
        broker.connect().await?;
        broker.teardown(&descriptor.queue).await?;
        return Ok(());
    }

    let db = DbHandle::open(&cli.common.base_dir, DbName::Cron, mode)?;
    let config = CronConfig {
        save_model_time: cli.save_model_time,
        host: cli.common.host.clone(),
    };
    cron::run(broker, descriptor, db, config).await
}
