use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

use stocksense::api;
use stocksense::chat::contracts::UnifiedResponse;
use stocksense::seed;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = cli::Cli::parse();
    match cli.command {
        cli::Command::Api { host, port, data_dir } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(api::serve(&host, port, &data_dir))
        }
        cli::Command::Seed { data_dir } => {
            std::fs::create_dir_all(&data_dir)?;
            let db = api::db::open(&data_dir.join("stocksense.db"))?;
            let rt = tokio::runtime::Runtime::new()?;
            let seeded = rt.block_on(async {
                let conn = db.lock().await;
                seed::seed_demo_org(&conn)
            })?;
            println!("Seeded demo org {}", seeded.org_id);
            println!("  login: {} / {}", seeded.admin_email, seeded.admin_password);
            Ok(())
        }
        cli::Command::Schema => {
            let schema = schemars::schema_for!(UnifiedResponse);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
    }
}
