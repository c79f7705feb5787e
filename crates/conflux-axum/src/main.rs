//! `conflux` - capability aggregation gateway server.

use clap::Parser;

use conflux_axum::cli::{Cli, init_tracing};
use conflux_axum::start_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    start_server(cli.server_config()).await
}
