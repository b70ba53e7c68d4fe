//! Defines the units of work a worker runs and the hooks that build them.

use crate::error::TaskError;
use crate::queue::Message;
use crate::trail::TrailContext;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::marker::PhantomData;

/// A unit of work built from exactly one message.
#[async_trait]
pub trait Task: Send {
    /// Runs the task. Returning an error counts as a crash: the message is not
    /// acknowledged and the worker restarts after a backoff delay.
    async fn run(&mut self, trail: &TrailContext) -> Result<(), TaskError>;
}

/// The application side of a worker: validates incoming messages and turns
/// them into tasks.
///
/// An error from either hook marks the message as garbage; its `Display` text
/// becomes the `garbage_reason`.
pub trait WorkerHandler: Send + Sync {
    /// Checks a message before a task is built from it.
    ///
    /// By default a message must be a JSON object.
    fn validate_message(&self, message: &Message) -> Result<(), TaskError> {
        if message.is_object() {
            Ok(())
        } else {
            Err("message body is not a JSON object".into())
        }
    }

    /// Builds the task for a valid message.
    fn get_task(&self, message: &Message) -> Result<Box<dyn Task>, TaskError>;
}

/// Builds tasks by deserializing the message into `T`.
pub struct TaskClass<T> {
    _task: PhantomData<fn() -> T>,
}

impl<T> TaskClass<T> {
    pub fn new() -> Self {
        Self { _task: PhantomData }
    }
}

impl<T> Default for TaskClass<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkerHandler for TaskClass<T>
where
    T: Task + DeserializeOwned + 'static,
{
    fn get_task(&self, message: &Message) -> Result<Box<dyn Task>, TaskError> {
        let task = T::deserialize(message)?;
        Ok(Box::new(task))
    }
}

/// Builds tasks with a constructor function.
pub struct TaskFn<F> {
    constructor: F,
}

impl<F> TaskFn<F> {
    pub fn new(constructor: F) -> Self {
        Self { constructor }
    }
}

impl<F, T> WorkerHandler for TaskFn<F>
where
    F: Fn(&Message) -> Result<T, TaskError> + Send + Sync,
    T: Task + 'static,
{
    fn get_task(&self, message: &Message) -> Result<Box<dyn Task>, TaskError> {
        let task = (self.constructor)(message)?;
        Ok(Box::new(task))
    }
}
