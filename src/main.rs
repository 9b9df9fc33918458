//! db-access - command-line front end for the access layer.
//!
//! Runs a single ping, select or execute against the configured database.
//! Writes and locking reads run inside a transaction.

use clap::Parser;
use db_access::config::{Command, Config};
use db_access::db::{AccessService, Context, DbPool};
use db_access::models::QueryParam;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    config.db.validate()?;
    info!(
        url = %config.db.masked_url(),
        "Starting db-access v{}",
        env!("CARGO_PKG_VERSION")
    );

    let pool = DbPool::connect(&config.db).await?;
    let service = AccessService::new(pool.clone(), &config.db);

    let result = run(&service, &pool, config.command).await;
    pool.close().await;

    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result
}

async fn run(
    service: &AccessService<DbPool>,
    pool: &DbPool,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Ping => {
            let mut ctx = service.connection().await?;
            service.test_connection(&mut ctx).await?;
            service.close(&mut ctx).await?;
            let version = pool.server_version().await?;
            let status = serde_json::json!({
                "status": "ok",
                "db_type": pool.db_type(),
                "server_version": version,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Select {
            sql,
            params,
            for_update,
            unique,
        } => {
            let params = parse_params(&params);
            let mut ctx = service.context();
            let result = if for_update {
                // Row locks only hold for the lifetime of a transaction.
                service
                    .with_transaction(&mut ctx, async |ctx: &mut Context<DbPool>| {
                        service.select(ctx, &sql, true, &params).await
                    })
                    .await?
            } else {
                service.select(&mut ctx, &sql, false, &params).await?
            };

            if unique {
                println!("{}", serde_json::to_string_pretty(&result.into_unique()?)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&result.rows)?);
            }
        }
        Command::Execute {
            sql,
            params,
            expect_one,
        } => {
            let params = parse_params(&params);
            let mut ctx = service.context();
            let result = service
                .with_transaction(&mut ctx, async |ctx: &mut Context<DbPool>| {
                    if expect_one {
                        service
                            .execute_ensuring_one_affected_row(ctx, &sql, &params)
                            .await
                    } else {
                        service.execute(ctx, &sql, &params).await
                    }
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }
    Ok(())
}

fn parse_params(raw: &[String]) -> Vec<QueryParam> {
    raw.iter().map(|p| QueryParam::parse_literal(p)).collect()
}
