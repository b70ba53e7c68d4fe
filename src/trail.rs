//! Trail context: the correlation id and liveness flag carried by one unit of
//! work, and the trace events emitted under it.

use crate::error::WorkerError;
use crate::queue::{Message, Queue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::error::Error;
use std::sync::Arc;

/// Exchange trace events are published to.
pub const TRAIL_EXCHANGE: &str = "trail";
/// Routing key of every trace event.
pub const TRACE_ROUTING_KEY: &str = "trace";

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Returns a fresh, globally unique trail id.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Correlation id plus the marker separating real traffic from synthetic traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trail {
    pub id: String,
    pub live: bool,
}

impl Trail {
    /// Builds a trail, generating an id when `id` is missing or empty.
    pub fn new(id: Option<String>, live: bool) -> Self {
        let id = id.filter(|id| !id.is_empty()).unwrap_or_else(generate_id);
        Self { id, live }
    }
}

/// Process-wide tracing switches shared by every context.
#[derive(Debug, Clone)]
pub struct TraceSettings {
    pub enabled: bool,
    pub process_name: String,
}

impl TraceSettings {
    pub fn new(enabled: bool, process_name: impl Into<String>) -> Self {
        Self {
            enabled,
            process_name: process_name.into(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, default_process_name())
    }
}

/// Name of the running executable, used when no process name is configured.
pub fn default_process_name() -> String {
    std::env::args()
        .next()
        .as_deref()
        .map(std::path::Path::new)
        .and_then(|path| path.file_stem())
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| "worker".to_string())
}

/// Kinds of trace events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Exception,
    TaskStarted,
    TaskFinished,
    Log,
}

/// One record published to the trail exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub time: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub process: String,
    pub data: Map<String, Value>,
}

impl TraceEvent {
    pub fn new(
        at: DateTime<Utc>,
        event_type: EventType,
        process: impl Into<String>,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            time: at.format(TIME_FORMAT).to_string(),
            event_type,
            process: process.into(),
            data,
        }
    }
}

/// What became of a best-effort trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceOutcome {
    Sent,
    Disabled,
    /// The event was discarded; the reason is kept for inspection only.
    Dropped(String),
}

/// Trail state for one unit of work.
///
/// The worker builds a new context for every message it consumes and hands it
/// to the task, so ids never leak from one message to the next.
#[derive(Clone)]
pub struct TrailContext {
    trail: Option<Trail>,
    queue: Option<Arc<dyn Queue>>,
    settings: Arc<TraceSettings>,
}

impl TrailContext {
    pub fn new(settings: Arc<TraceSettings>) -> Self {
        Self {
            trail: None,
            queue: None,
            settings,
        }
    }

    /// The active trail id, if one has been set.
    pub fn get_id(&self) -> Option<&str> {
        self.trail.as_ref().map(|trail| trail.id.as_str())
    }

    pub fn is_live(&self) -> bool {
        self.trail.as_ref().is_some_and(|trail| trail.live)
    }

    pub fn trail(&self) -> Option<&Trail> {
        self.trail.as_ref()
    }

    /// Makes `id` (or a fresh one, if `id` is missing or empty) the active trail.
    pub fn set_trail(&mut self, id: Option<String>, live: bool) {
        self.trail = Some(Trail::new(id, live));
    }

    /// Binds the sink used by `trace` and `trace_exception`.
    pub fn set_queue(&mut self, queue: Arc<dyn Queue>) {
        self.queue = Some(queue);
    }

    pub fn settings(&self) -> &TraceSettings {
        &self.settings
    }

    /// Publishes one trace event under the active trail.
    ///
    /// Does nothing when tracing is disabled. Sink failures are returned to the caller.
    pub async fn trace(&self, event_type: EventType, data: Map<String, Value>) -> Result<(), WorkerError> {
        if !self.settings.enabled {
            return Ok(());
        }
        let queue = self.queue.as_ref().ok_or(WorkerError::NoTraceSink)?;
        let event = TraceEvent::new(Utc::now(), event_type, self.settings.process_name.as_str(), data);
        let record: Message = serde_json::to_value(&event)?;
        queue
            .put(&record, TRACE_ROUTING_KEY, TRAIL_EXCHANGE, self.trail.as_ref())
            .await
    }

    /// Traces `error` together with its chain of causes.
    ///
    /// This never fails: any error raised while tracing is logged and discarded.
    pub async fn trace_exception(&self, error: &(dyn Error + Send + Sync + 'static)) -> TraceOutcome {
        if !self.settings.enabled {
            return TraceOutcome::Disabled;
        }
        let mut data = Map::new();
        data.insert("exc".to_string(), json!(error.to_string()));
        data.insert("stack".to_string(), json!(error_stack(error)));

        match self.trace(EventType::Exception, data).await {
            Ok(()) => TraceOutcome::Sent,
            Err(e) => {
                log::warn!("Dropping exception trace for trail {:?}: {}", self.get_id(), e);
                TraceOutcome::Dropped(e.to_string())
            }
        }
    }
}

/// Display text of every error in the `source()` chain, outermost first.
fn error_stack(error: &(dyn Error + 'static)) -> Vec<String> {
    let mut stack = Vec::new();
    let mut current = Some(error);
    while let Some(err) = current {
        stack.push(err.to_string());
        current = err.source();
    }
    stack
}
