//! Simulated connection pool driven by a configuration file.
//!
//! Spawns a number of clients that repeatedly acquire and release connections, and prints
//! pool state snapshots as JSON lines.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use clap::Parser;
use stockpile::{Error, Pool, PoolConfig, ResourceFactory};
use tracing::{info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "demos/basic_pool/basic_pool.yaml",
        env = "BASIC_POOL_CONFIG_FILE"
    )]
    config_file: String,
    /// Number of concurrent clients.
    #[arg(long, default_value_t = 8)]
    clients: usize,
    /// Number of acquisitions made by each client.
    #[arg(long, default_value_t = 20)]
    rounds: usize,
}

/// Simulated connection error.
#[derive(Debug, thiserror::Error)]
#[error("connection {0} refused")]
struct ConnectError(u64);

/// Simulated connection.
#[derive(Debug)]
struct Connection {
    id: u64,
    uses: u32,
}

/// Factory opening simulated connections.
///
/// Every seventh connection attempt fails, and connections wear out after a few uses.
#[derive(Default)]
struct Connector {
    next_id: AtomicU64,
}

#[async_trait::async_trait]
impl ResourceFactory for Connector {
    type Resource = Connection;
    type Error = ConnectError;

    async fn create(&self) -> Result<Connection, ConnectError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(20)).await;
        if id % 7 == 6 {
            return Err(ConnectError(id));
        }
        info!(id, "connection opened");
        Ok(Connection { id, uses: 0 })
    }

    fn can_destroy(&self) -> bool {
        true
    }

    async fn destroy(&self, conn: Connection) -> Result<bool, ConnectError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        info!(id = conn.id, uses = conn.uses, "connection closed");
        Ok(true)
    }

    fn test(&self, conn: &Connection) -> bool {
        conn.uses < 5
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();
    let config: PoolConfig = PoolConfig::builder()
        .with_optional_file(&args.config_file)
        .with_env("BASIC_POOL")
        .build()?;
    info!(?config, "starting pool");

    let pool = Pool::with_config(Connector::default(), config)?;
    let clients: Vec<_> = (0..args.clients)
        .map(|client| {
            let pool = pool.clone();
            let rounds = args.rounds;
            tokio::spawn(
                async move {
                    for _ in 0..rounds {
                        let mut conn = match pool.acquire().await {
                            Ok(conn) => conn,
                            Err(Error::Create(err)) => {
                                warn!(%err, "no connection this round");
                                continue;
                            }
                            Err(err) => return Err(err),
                        };
                        conn.uses += 1;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        pool.release(conn);
                    }
                    Ok::<_, Error>(())
                }
                .instrument(info_span!("client", client)),
            )
        })
        .collect();

    let reporter = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(100));
            loop {
                interval.tick().await;
                if let Ok(line) = serde_json::to_string(&pool.state()) {
                    println!("{line}");
                }
            }
        })
    };

    for client in clients {
        client.await??;
    }
    reporter.abort();
    println!("{}", serde_json::to_string(&pool.state())?);
    Ok(())
}
