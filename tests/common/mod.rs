//! Shared test utilities and fixtures for the Drover test suite.
//!
//! This module provides:
//! - [`MockRunner`], a command runner that records calls and fails on demand
//! - [`MockInstances`], an in-memory resource client
//! - [`Timeline`], an ordered event log for hook and task ordering assertions
//! - [`LogCapture`], a tracing layer that keeps every emitted record
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use drover::cloud::{Identity, Readiness, Resource, ResourceClient};
use drover::connection::{CommandResult, CommandRunner, ConnectionResult, ExecuteOptions};
use drover::error::{Error, Result};
use drover::executor::task::{task, Hook, Task, TaskCall};
use drover::handlers::{self, DeferredAction};

// ============================================================================
// Mock Command Runner
// ============================================================================

/// One call seen by [`MockRunner`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub target: String,
    pub command: String,
    pub escalate: bool,
    pub password: Option<String>,
}

/// Records every command and answers with success unless told otherwise.
#[derive(Default)]
pub struct MockRunner {
    calls: Mutex<Vec<RecordedCall>>,
    failures: Mutex<HashMap<String, (i32, String)>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `command` with a non-zero exit
    pub fn fail_on(self, command: &str, exit_code: i32, stderr: &str) -> Self {
        self.failures
            .lock()
            .insert(command.to_string(), (exit_code, stderr.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.command.clone()).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(
        &self,
        target: &str,
        command: &str,
        options: &ExecuteOptions,
    ) -> ConnectionResult<CommandResult> {
        self.calls.lock().push(RecordedCall {
            target: target.to_string(),
            command: command.to_string(),
            escalate: options.escalate,
            password: options.escalate_password.clone(),
        });

        match self.failures.lock().get(command) {
            Some((code, stderr)) => Ok(CommandResult::failure(*code, "", stderr.clone())),
            None => Ok(CommandResult::success("ok", "")),
        }
    }
}

// ============================================================================
// Mock Resource Client
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub id: String,
    pub ip: Option<String>,
    pub state: String,
}

impl Resource for Instance {
    fn id(&self) -> &str {
        &self.id
    }

    fn address(&self) -> Option<&str> {
        self.ip.as_deref()
    }

    fn is_live(&self) -> bool {
        self.state != "terminated"
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstanceSpec {
    pub ami: String,
}

/// In-memory instances; new ones get an address once they are ready.
#[derive(Default)]
pub struct MockInstances {
    instances: Mutex<Vec<(IndexMap<String, String>, Instance)>>,
    creates: Mutex<usize>,
    tag_calls: Mutex<Vec<IndexMap<String, String>>>,
}

impl MockInstances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an instance carrying `tags`
    pub fn with_existing(self, tags: &[(&str, &str)], instance: Instance) -> Self {
        let tags = tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.instances.lock().push((tags, instance));
        self
    }

    pub fn create_count(&self) -> usize {
        *self.creates.lock()
    }

    pub fn tag_calls(&self) -> Vec<IndexMap<String, String>> {
        self.tag_calls.lock().clone()
    }
}

#[async_trait]
impl ResourceClient for MockInstances {
    type Resource = Instance;
    type Spec = InstanceSpec;

    fn kind(&self) -> &str {
        "instance"
    }

    async fn find(&self, identity: &Identity) -> Result<Vec<Instance>> {
        Ok(self
            .instances
            .lock()
            .iter()
            .filter(|(tags, _)| identity.matches(tags))
            .map(|(_, instance)| instance.clone())
            .collect())
    }

    async fn create(&self, spec: &InstanceSpec) -> Result<Instance> {
        if spec.ami.is_empty() {
            return Err(Error::resource_client("instance", "create", "missing ami"));
        }
        let mut creates = self.creates.lock();
        *creates += 1;
        Ok(Instance {
            id: format!("i-{:04}", *creates),
            ip: None,
            state: "pending".to_string(),
        })
    }

    async fn tag(&self, resource: &Instance, tags: &IndexMap<String, String>) -> Result<()> {
        self.tag_calls.lock().push(tags.clone());
        self.instances.lock().push((tags.clone(), resource.clone()));
        Ok(())
    }

    async fn wait_ready(&self, mut resource: Instance, readiness: &Readiness) -> Result<Instance> {
        readiness
            .wait(self.kind(), &resource.id, || async { Ok::<_, Error>(true) })
            .await?;

        let n = resource.id.trim_start_matches("i-").parse::<u32>().unwrap_or(0);
        resource.ip = Some(format!("10.0.0.{}", n));
        resource.state = "running".to_string();
        for (_, stored) in self.instances.lock().iter_mut() {
            if stored.id == resource.id {
                *stored = resource.clone();
            }
        }
        Ok(resource)
    }
}

// ============================================================================
// Timeline
// ============================================================================

/// Ordered record of what ran.
#[derive(Clone, Default)]
pub struct Timeline {
    events: Arc<Mutex<Vec<String>>>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events.lock().iter().position(|e| e == event)
    }

    /// A deferred action that records `label`
    pub fn action(&self, label: &str) -> Arc<dyn DeferredAction> {
        let timeline = self.clone();
        let label = label.to_string();
        handlers::action(label.clone(), move |_ctx, _args| {
            let timeline = timeline.clone();
            let label = label.clone();
            async move {
                timeline.push(label);
                Ok::<_, Error>(JsonValue::Null)
            }
        })
    }

    /// A hook that records `label`
    pub fn hook(&self, label: &str) -> Hook {
        Hook::new(self.action(label), vec![])
    }

    /// A task that records `name(target)` and returns the target
    pub fn task(&self, name: &str) -> impl Task + 'static {
        let timeline = self.clone();
        let label = name.to_string();
        task(name.to_string(), move |call: TaskCall| {
            let timeline = timeline.clone();
            let label = label.clone();
            async move {
                timeline.push(format!("{}({})", label, call.target));
                Ok::<_, Error>(JsonValue::String(call.target))
            }
        })
    }
}

// ============================================================================
// Log Capture
// ============================================================================

/// Keeps every event emitted while installed.
#[derive(Clone, Default)]
pub struct LogCapture {
    records: Arc<Mutex<Vec<(Level, String)>>>,
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.records.lock().push((*event.metadata().level(), visitor.0));
    }
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture on the current thread until the guard drops
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::registry().with(self.clone());
        tracing::subscriber::set_default(subscriber)
    }

    pub fn records(&self) -> Vec<(Level, String)> {
        self.records.lock().clone()
    }

    /// Whether a record at `level` contains `needle`
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.records
            .lock()
            .iter()
            .any(|(l, message)| *l == level && message.contains(needle))
    }
}

/// `n` target names: `host1`, `host2`, ...
pub fn hosts(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("host{}", i)).collect()
}
