pub mod clock;
pub mod commands;
pub mod config;
pub mod error;
pub mod pairing;
pub mod store;
pub mod user;

pub use error::{PairingError, PairingResult, StoreError, StoreResult};

use commands::{Settings, Task};
use config::PairingConfig;
use pairing::PairingManager;
use store::MemoryStore;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("duet=debug")))
        .init();
}

/// 开发任务入口：加载快照 → 执行任务 → 写回快照
pub async fn run(args: Vec<String>) -> PairingResult<()> {
    init_tracing();

    let task = Task::parse(&args)?;
    let settings = Settings::from_env();

    let config = match &settings.config_path {
        Some(path) => PairingConfig::load(path).await?,
        None => PairingConfig::default(),
    };

    let store = MemoryStore::load(&settings.store_path).await?;
    let manager = PairingManager::new(store.clone(), config)?;

    let output = commands::execute(&manager, task).await?;

    store.save(&settings.store_path).await?;
    println!("{output}");
    Ok(())
}
