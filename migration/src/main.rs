//! Standalone migration runner for the local mirror-cache file, e.g.
//! `DATABASE_URL=sqlite://cache.sqlite?mode=rwc cargo run -p migration`.

use sea_orm_migration::prelude::*;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    cli::run_cli(migration::Migrator).await;
}
