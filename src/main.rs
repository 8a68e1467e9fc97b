mod command;
mod database;
mod service;
mod traits;
mod ui;
mod utils;
mod wireguard;

use clap::Parser;
use database::Database;
use service::Gateway;
use tracing::warn;

#[derive(Debug, Parser)]
struct Config {
    #[clap(long, short, env = "DB", value_parser, default_value = "sqlite://wirebot.db")]
    db: String,
    #[clap(flatten)]
    service: service::Config,

    #[clap(flatten)]
    bot: ui::telegram::Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    pretty_env_logger::init();

    let config = Config::parse();

    let database = Database::new(&config.db).await?;

    let service = Gateway::new(config.service, database).await?;

    service.init().await?;

    for f in ui::run(config.bot, service) {
        f.await??;

        warn!("frontend stopped")
    }

    Ok(())
}
