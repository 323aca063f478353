//! Job-kind registry: queue name → typed handler (4.J).

use super::model::Job;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type Handler = Box<dyn Fn(Job) -> HandlerFuture + Send + Sync>;

#[derive(Default)]
pub struct JobRegistry {
    handlers: HashMap<String, Handler>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    pub fn register<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.handlers.insert(name.to_string(), Box::new(move |job| Box::pin(handler(job))));
    }

    /// Runs the handler on its own task so a panic inside it is caught by
    /// `tokio::spawn` rather than unwinding the worker loop that called us.
    pub async fn dispatch(&self, job: &Job) -> Result<()> {
        match self.handlers.get(&job.queue) {
            Some(handler) => match tokio::spawn(handler(job.clone())).await {
                Ok(result) => result,
                Err(join_err) => Err(Error::Infrastructural(format!("handler panicked: {join_err}"))),
            },
            None => Err(Error::Infrastructural(format!("no handler registered for queue '{}'", job.queue))),
        }
    }
}
