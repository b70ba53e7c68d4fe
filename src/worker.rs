//! The worker run loop: fetch, validate, build, run, acknowledge, and restart
//! with backoff after a crash.

use crate::backoff::{Backoff, Sleeper, TokioSleeper};
use crate::config::WorkerConfig;
use crate::error::{TaskError, WorkerError};
use crate::garbage::GarbageRoute;
use crate::queue::{AckHandle, Connector, Message, Queue};
use crate::rabbit::RabbitConnector;
use crate::task::{Task, WorkerHandler};
use crate::trail::{TraceSettings, TrailContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag that ends `Worker::run` once set.
///
/// Checked before every attempt and after a crash; a running task is never
/// interrupted.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a processing attempt ended, when it did not crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// No message arrived within the queue's wait.
    Idle,
    /// The task ran and the message was acknowledged.
    Processed,
    /// The message was rejected, quarantined and acknowledged.
    Garbage,
}

/// A queue consumer that runs one task per message.
pub struct Worker<H: WorkerHandler> {
    config: WorkerConfig,
    handler: H,
    connector: Arc<dyn Connector>,
    queue: Option<Arc<dyn Queue>>,
    // Injected queues belong to the caller and are never closed or replaced.
    injected_queue: bool,
    sleeper: Arc<dyn Sleeper>,
    stop: StopHandle,
    garbage: GarbageRoute,
    trace_settings: Arc<TraceSettings>,
    trail: TrailContext,
}

impl<H: WorkerHandler> Worker<H> {
    /// Creates a new worker. The queue is connected on first use, and again
    /// after every crash, unless one is injected with `with_queue`.
    pub fn new(handler: H, config: WorkerConfig) -> Self {
        let trace_settings = Arc::new(config.trace_settings());
        Self {
            garbage: GarbageRoute::new(&config.queue_name),
            trail: TrailContext::new(trace_settings.clone()),
            trace_settings,
            handler,
            connector: Arc::new(RabbitConnector),
            queue: None,
            injected_queue: false,
            sleeper: Arc::new(TokioSleeper),
            stop: StopHandle::new(),
            config,
        }
    }

    pub fn with_queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.queue = Some(queue);
        self.injected_queue = true;
        self
    }

    /// Replaces the RabbitMQ connector used to open the queue.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Uses an existing stop flag, so hooks or tasks created before the
    /// worker can stop it.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn queue_name(&self) -> &str {
        &self.config.queue_name
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// The trail of the current attempt, or of the last one once it has ended.
    pub fn trail(&self) -> &TrailContext {
        &self.trail
    }

    /// Processes messages until stopped.
    ///
    /// A crashing attempt is traced, then retried after a delay that grows with
    /// each consecutive crash, on a freshly connected queue. Handling a message
    /// resets the delay.
    pub async fn run(&mut self) -> Result<(), WorkerError> {
        let mut backoff = Backoff::new(self.config.backoff.clone());
        log::info!("Worker for queue '{}' started", self.config.queue_name);

        while !self.is_stopped() {
            match self.protected_run().await {
                Ok(Attempt::Idle) => {}
                Ok(_) => backoff.reset(),
                Err(e) => {
                    log::error!(
                        "Worker for queue '{}' crashed (trail {:?}): {}",
                        self.config.queue_name,
                        self.trail.get_id(),
                        e
                    );
                    self.trail.trace_exception(&e).await;
                    self.discard_queue().await;

                    if self.is_stopped() {
                        break;
                    }
                    let delay = backoff.next_delay();
                    log::info!(
                        "Restarting after crash #{} in {:?}",
                        backoff.consecutive_crashes(),
                        delay
                    );
                    self.sleeper.sleep(delay).await;
                }
            }
        }

        log::info!("Worker for queue '{}' stopped", self.config.queue_name);
        Ok(())
    }

    /// Runs one attempt: fetches a message and processes it.
    ///
    /// Bad messages are quarantined and acknowledged here. Queue and task
    /// failures are returned; a message whose task failed is handed back to
    /// the queue unacknowledged.
    pub async fn protected_run(&mut self) -> Result<Attempt, WorkerError> {
        self.trail = TrailContext::new(self.trace_settings.clone());
        let queue = self.queue().await?;
        self.trail.set_queue(queue.clone());

        let Some(delivery) = queue.get().await? else {
            return Ok(Attempt::Idle);
        };

        let (trail_id, live) = match delivery.trail {
            Some(t) => (Some(t.id), t.live),
            None => (None, false),
        };
        self.trail.set_trail(trail_id, live);

        let message = delivery.message;
        let ack = delivery.ack;

        if let Err(e) = self.validate_message(&message) {
            self.send_message_to_garbage(&message, ack, &e).await;
            return Ok(Attempt::Garbage);
        }

        let mut task = match self.get_task(&message) {
            Ok(task) => task,
            Err(e) => {
                self.send_message_to_garbage(&message, ack, &e).await;
                return Ok(Attempt::Garbage);
            }
        };

        if let Err(e) = task.run(&self.trail).await {
            if let Err(reject_err) = queue.reject(ack).await {
                log::error!("Failed to hand back message {:?}: {}", ack, reject_err);
            }
            return Err(WorkerError::Task(e));
        }

        queue.ack(ack).await?;
        log::info!(
            "Message processed successfully. Tag: {}, trail: {:?}",
            ack.0,
            self.trail.get_id()
        );
        Ok(Attempt::Processed)
    }

    pub fn validate_message(&self, message: &Message) -> Result<(), TaskError> {
        self.handler.validate_message(message)
    }

    pub fn get_task(&self, message: &Message) -> Result<Box<dyn Task>, TaskError> {
        self.handler.get_task(message)
    }

    /// Publishes `reason` to `<queue_name>_garbage` and acknowledges the message.
    /// Never fails.
    pub async fn send_message_to_garbage(&self, message: &Message, ack: AckHandle, reason: &TaskError) {
        let Some(queue) = self.queue.as_deref() else {
            log::error!("No queue bound; cannot quarantine message {:?}", ack);
            return;
        };
        let reason = reason.to_string();
        self.garbage
            .send(queue, message, ack, &reason, self.trail.trail())
            .await;
    }

    async fn queue(&mut self) -> Result<Arc<dyn Queue>, WorkerError> {
        if let Some(queue) = &self.queue {
            return Ok(queue.clone());
        }
        let queue = self.connector.connect(&self.config).await?;
        self.queue = Some(queue.clone());
        Ok(queue)
    }

    /// Closes a queue this worker connected itself, so the next attempt
    /// reconnects and the broker takes back anything left unacknowledged.
    async fn discard_queue(&mut self) {
        if self.injected_queue {
            return;
        }
        if let Some(queue) = self.queue.take() {
            if let Err(e) = queue.close().await {
                log::warn!("Failed to close queue '{}': {}", self.config.queue_name, e);
            }
        }
    }
}
