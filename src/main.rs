//! Rollup CLI entry point.

use rollup_lib::cli::{self, Cli};
use rollup_lib::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli::execute(cli).await
}
