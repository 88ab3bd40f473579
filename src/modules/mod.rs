//! Built-in modules for Drover
//!
//! Modules are helpers task bodies call to act on a target. They go through
//! [`crate::connection::run`] so the scoped flags apply, and queue deferred
//! work on the hook queues where repeated requests should coalesce.

pub mod service;

pub use service::{
    service_ensure, service_is_running, service_reload, service_restart, service_start,
    service_stop, ServiceAction,
};
