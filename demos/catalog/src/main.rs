mod migrations;
mod product;

use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};
use docmigrate::{
    CancellationToken, ExecutionOutcome, MemoryStore, Migrator, PgStore, RollbackOutcome, Store,
};
use sqlx::PgPool;
use tracing_subscriber::{
    prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

#[derive(Parser)]
#[command(name = "catalog")]
#[command(about = "Applies and reverts the product catalog change units")]
struct Args {
    /// PostgreSQL connection string. Without it an in-memory store is used,
    /// which only lives for this command.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute pending change units
    Run {
        /// Stop after the unit with this order
        #[arg(long)]
        until: Option<String>,
    },
    /// Roll back executed change units
    Rollback {
        /// Keep units up to this order, roll back the newer ones
        #[arg(long, required_unless_present = "all", conflicts_with = "all")]
        to: Option<String>,

        /// Roll back every executed unit
        #[arg(long)]
        all: bool,
    },
    /// List change units and their recorded state
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::from_str("info,docmigrate=debug"))?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let args = Args::parse();

    let store = match &args.database_url {
        Some(dsn) => PgStore::new(&PgPool::connect(dsn).await?),
        None => MemoryStore::new(),
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let migrator = Migrator::new(&store, &migrations::registry()?).cancellation(cancel);

    match args.command {
        Command::Run { until } => {
            let report = match until {
                Some(order) => migrator.run_until(&order).await?,
                None => migrator.run().await?,
            };

            for unit in report.units.iter() {
                let outcome = match &unit.outcome {
                    ExecutionOutcome::Skipped => "skipped".to_owned(),
                    ExecutionOutcome::Executed => "executed".to_owned(),
                    ExecutionOutcome::Failed(reason) => format!("failed: {reason}"),
                    ExecutionOutcome::Blocked => "blocked".to_owned(),
                };
                println!("{} {:<36} {outcome}", unit.order, unit.id);
            }

            report.into_result()?;
            print_products(&store).await?;
        }
        Command::Rollback { to, all } => {
            let report = match (to, all) {
                (_, true) => migrator.rollback_all().await?,
                (Some(order), false) => migrator.rollback_to(&order).await?,
                (None, false) => anyhow::bail!("either --to or --all is required"),
            };

            for unit in report.units.iter() {
                let outcome = match &unit.outcome {
                    RollbackOutcome::RolledBack => "rolled back".to_owned(),
                    RollbackOutcome::Failed(reason) => format!("failed: {reason}"),
                    RollbackOutcome::Irreversible => "irreversible".to_owned(),
                    RollbackOutcome::Untouched => "untouched".to_owned(),
                };
                println!("{} {:<36} {outcome}", unit.order, unit.id);
            }

            report.into_result()?;
        }
        Command::Status => {
            let status = migrator.status().await?;

            for unit in status.units.iter() {
                let state = match &unit.record {
                    Some(record) if unit.checksum_mismatch => format!("{:?} (drifted)", record.state),
                    Some(record) => format!("{:?}", record.state),
                    None => "not applied".to_owned(),
                };
                println!("{} {:<36} {state}", unit.order, unit.id);
            }

            for record in status.orphans.iter() {
                println!(
                    "{} {:<36} {:?} (no longer registered)",
                    record.order, record.change_unit_id, record.state
                );
            }
        }
    }

    Ok(())
}

async fn print_products(store: &Store) -> Result<()> {
    let products = store
        .find_as::<product::Product>(product::PRODUCTS, &docmigrate::Filter::all())
        .await?;

    println!();
    for product in products {
        println!(
            "{:<14} {:<12} {:>9.2} stock {:>4}",
            product.name, product.category, product.price, product.stock_quantity
        );
    }

    Ok(())
}
