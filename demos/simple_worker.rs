use async_trait::async_trait;
use rabbitmq_trail_worker::{
    EventType, StopHandle, Task, TaskClass, TaskError, TrailContext, Worker, WorkerConfig,
};
use serde::Deserialize;
use serde_json::{json, Map};

// 1. Define your task; it is deserialized straight from the message body
#[derive(Deserialize, Debug, Clone)]
struct SendInvoice {
    customer: String,
    id: u32,
}

// 2. Implement the `Task` trait for your logic
#[async_trait]
impl Task for SendInvoice {
    async fn run(&mut self, trail: &TrailContext) -> Result<(), TaskError> {
        log::info!(
            "Sending invoice {} to '{}' (trail {:?})",
            self.id,
            self.customer,
            trail.get_id()
        );

        if self.id % 2 != 0 {
            log::warn!("Simulating a processing failure for invoice {}", self.id);
            return Err(format!("Failed to send invoice with odd ID: {}", self.id).into());
        }

        let mut data = Map::new();
        data.insert("invoice".to_string(), json!(self.id));
        trail.trace(EventType::TaskFinished, data).await?;
        Ok(())
    }
}

// 3. Configure and run the worker
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = WorkerConfig::from_env("invoices".to_string())?;
    log::info!("Using RabbitMQ at {}", config.rabbitmq_url);

    let stop = StopHandle::new();
    let mut worker = Worker::new(TaskClass::<SendInvoice>::new(), config).with_stop_handle(stop.clone());

    // The stop flag is checked between messages; an in-flight task finishes first.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Ctrl+C received. Stopping after the current message.");
            stop.stop();
        }
    });

    worker.run().await?;
    log::info!("Application has shut down.");
    Ok(())
}
