//! In-memory queue and sleeper used by the unit tests.

use crate::backoff::Sleeper;
use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::queue::{AckHandle, Connector, Delivery, Message, Queue};
use crate::trail::Trail;
use crate::worker::StopHandle;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One recorded `put` call.
#[derive(Debug, Clone)]
pub(crate) struct Published {
    pub message: Message,
    pub routing_key: String,
    pub exchange: String,
    pub trail: Option<Trail>,
}

/// Scripted `get` results; records every `put` and `ack`.
///
/// Once the script runs out, `get` stops the attached worker (if any) and
/// reports an idle wait.
#[derive(Default)]
pub(crate) struct RecordingQueue {
    script: Mutex<VecDeque<Result<Delivery, WorkerError>>>,
    puts: Mutex<Vec<Published>>,
    acks: Mutex<Vec<AckHandle>>,
    rejects: Mutex<Vec<AckHandle>>,
    closed: AtomicBool,
    fail_puts: AtomicBool,
    fail_garbage_puts: AtomicBool,
    stop_when_drained: Mutex<Option<StopHandle>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_delivery(&self, delivery: Delivery) {
        self.script.lock().unwrap().push_back(Ok(delivery));
    }

    pub fn push_error(&self, error: WorkerError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn stop_when_drained(&self, stop: StopHandle) {
        *self.stop_when_drained.lock().unwrap() = Some(stop);
    }

    pub fn fail_puts(&self) {
        self.fail_puts.store(true, Ordering::SeqCst);
    }

    pub fn fail_garbage_puts(&self) {
        self.fail_garbage_puts.store(true, Ordering::SeqCst);
    }

    pub fn puts(&self) -> Vec<Published> {
        self.puts.lock().unwrap().clone()
    }

    pub fn acks(&self) -> Vec<AckHandle> {
        self.acks.lock().unwrap().clone()
    }

    pub fn rejects(&self) -> Vec<AckHandle> {
        self.rejects.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Queue for RecordingQueue {
    async fn get(&self) -> Result<Option<Delivery>, WorkerError> {
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result.map(Some),
            None => {
                if let Some(stop) = self.stop_when_drained.lock().unwrap().as_ref() {
                    stop.stop();
                }
                Ok(None)
            }
        }
    }

    async fn put(
        &self,
        message: &Message,
        routing_key: &str,
        exchange: &str,
        trail: Option<&Trail>,
    ) -> Result<(), WorkerError> {
        if self.fail_puts.load(Ordering::SeqCst)
            || (self.fail_garbage_puts.load(Ordering::SeqCst) && routing_key.ends_with("_garbage"))
        {
            return Err(WorkerError::from("publish refused"));
        }
        self.puts.lock().unwrap().push(Published {
            message: message.clone(),
            routing_key: routing_key.to_string(),
            exchange: exchange.to_string(),
            trail: trail.cloned(),
        });
        Ok(())
    }

    async fn ack(&self, ack: AckHandle) -> Result<(), WorkerError> {
        self.acks.lock().unwrap().push(ack);
        Ok(())
    }

    async fn reject(&self, ack: AckHandle) -> Result<(), WorkerError> {
        self.rejects.lock().unwrap().push(ack);
        Ok(())
    }

    async fn close(&self) -> Result<(), WorkerError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out prepared queues in order, one per `connect`.
pub(crate) struct ScriptedConnector {
    queues: Mutex<VecDeque<Arc<RecordingQueue>>>,
    connects: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(queues: Vec<Arc<RecordingQueue>>) -> Self {
        Self {
            queues: Mutex::new(queues.into()),
            connects: AtomicUsize::new(0),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _config: &WorkerConfig) -> Result<Arc<dyn Queue>, WorkerError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self.queues.lock().unwrap().pop_front();
        match next {
            Some(queue) => Ok(queue as Arc<dyn Queue>),
            None => Err(WorkerError::from("connection refused")),
        }
    }
}

/// Records requested sleeps instead of waiting.
#[derive(Default)]
pub(crate) struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}
