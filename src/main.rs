use std::sync::Arc;

use wa_courier::actuator::{BrowserActuator, SysinfoReaper};
use wa_courier::config::WorkerConfig;
use wa_courier::lifecycle::{self, StopFlag};
use wa_courier::queue::TaskQueue;
use wa_courier::session::SessionManager;
use wa_courier::worker::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = WorkerConfig::from_env();

    eprintln!("wa-courier v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Queue:    {}", config.queue_root.display());
    eprintln!("   Profile:  {}", config.profile_path.display());
    eprintln!("   Headless: {}", config.headless);
    eprintln!(
        "   Recycle after {} deliveries; poll every {}s\n",
        config.max_operations,
        config.poll_interval.as_secs()
    );

    let queue = TaskQueue::new(&config.queue_root);
    queue.ensure_dirs().await?;

    let actuator = BrowserActuator::new(
        config.profile_path.clone(),
        config.headless,
        config.ready_timeout,
    );
    let session = SessionManager::new(
        Box::new(actuator),
        Arc::new(SysinfoReaper::new()),
        config.profile_path.clone(),
        config.max_operations,
    );

    let stop = StopFlag::new();
    let signals = lifecycle::spawn_signal_listener(stop.clone());

    let mut worker = Worker::new(queue, session, config, stop);
    worker.run().await;

    signals.abort();
    Ok(())
}
