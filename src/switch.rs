//! Scoped flags
//!
//! A [`Switch`] names a context key and the value it holds while switched on.
//! Entering it installs the value and returns a [`FlagGuard`]; dropping the
//! guard puts back whatever was there before (or removes the key if nothing
//! was). Restoration happens on every exit path, including early `?` returns
//! and panics.
//!
//! ```rust,ignore
//! use drover::switch::{is_local, MODE_LOCAL};
//!
//! {
//!     let _local = MODE_LOCAL.enter(&ctx);
//!     assert!(is_local(&ctx));
//! }
//! assert!(!is_local(&ctx));
//! ```
//!
//! # Restoration is single-slot
//!
//! Each guard remembers the one value it replaced. Properly nested guards
//! (inner dropped before outer) restore correctly. Guards on the same key that
//! are released out of order, which is what two concurrent tasks toggling the
//! same flag produce, clobber each other: the first guard to drop restores
//! its snapshot over the later guard's value, and the last one to drop
//! resurrects a value no scope owns any more. Use distinct keys, or serialize
//! the scopes with [`crate::executor::throttle::with_lock`].

use serde_json::Value as JsonValue;
use tracing::trace;

use crate::executor::runtime::{ExecutionContext, SUDO_PASSWORD_KEY};

/// A named flag and its "on" value.
#[derive(Debug, Clone, PartialEq)]
pub struct Switch {
    pub key: &'static str,
    pub on: JsonValue,
}

/// Run commands on the local machine instead of the targets.
pub const MODE_LOCAL: Switch = Switch::flag("mode_local");

/// Run commands with privilege escalation.
pub const MODE_SUDO: Switch = Switch::flag("sudo_mode");

impl Switch {
    /// A switch whose "on" value is `true`
    pub const fn flag(key: &'static str) -> Self {
        Self {
            key,
            on: JsonValue::Bool(true),
        }
    }

    /// A switch with an arbitrary "on" value
    pub fn new(key: &'static str, on: impl Into<JsonValue>) -> Self {
        Self { key, on: on.into() }
    }

    /// Install the "on" value until the guard drops
    pub fn enter<'a>(&self, ctx: &'a ExecutionContext) -> FlagGuard<'a> {
        FlagGuard::install(ctx, self.key, self.on.clone())
    }

    /// Install an explicit override value until the guard drops
    pub fn enter_with<'a>(
        &self,
        ctx: &'a ExecutionContext,
        value: impl Into<JsonValue>,
    ) -> FlagGuard<'a> {
        FlagGuard::install(ctx, self.key, value.into())
    }

    /// Current value of any flag, by key
    pub fn value_of(ctx: &ExecutionContext, key: &str) -> Option<JsonValue> {
        ctx.current_flag(key)
    }

    /// Whether this switch currently holds a truthy value
    pub fn is_on(&self, ctx: &ExecutionContext) -> bool {
        Self::value_of(ctx, self.key).is_some_and(|v| truthy(&v))
    }
}

/// Restores a flag's previous value when dropped.
#[must_use = "the flag is restored as soon as the guard is dropped"]
pub struct FlagGuard<'a> {
    ctx: &'a ExecutionContext,
    key: String,
    previous: Option<JsonValue>,
}

impl<'a> FlagGuard<'a> {
    /// Set `key` to `value`, remembering the value it replaces
    pub fn install(ctx: &'a ExecutionContext, key: impl Into<String>, value: JsonValue) -> Self {
        let key = key.into();
        let previous = ctx.set(key.clone(), value).filter(|v| !v.is_null());
        trace!("Entering flag scope {} (previous: {:?})", key, previous);
        Self { ctx, key, previous }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The value this guard will restore
    pub fn previous(&self) -> Option<&JsonValue> {
        self.previous.as_ref()
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        trace!("Leaving flag scope {}", self.key);
        match self.previous.take() {
            Some(value) => {
                self.ctx.set(self.key.clone(), value);
            }
            None => {
                self.ctx.delete(&self.key);
            }
        }
    }
}

fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
    }
}

/// True while commands run on the local machine
pub fn is_local(ctx: &ExecutionContext) -> bool {
    MODE_LOCAL.is_on(ctx)
}

/// True while commands target the remote hosts
pub fn is_remote(ctx: &ExecutionContext) -> bool {
    !is_local(ctx)
}

/// True while commands run escalated
pub fn is_sudo(ctx: &ExecutionContext) -> bool {
    MODE_SUDO.is_on(ctx)
}

/// The configured sudo password, if any
pub fn sudo_password(ctx: &ExecutionContext) -> Option<String> {
    ctx.get(SUDO_PASSWORD_KEY)
        .and_then(|v| v.as_str().map(String::from))
}

/// Set the sudo password; an empty string forgets it
pub fn set_sudo_password(ctx: &ExecutionContext, password: &str) {
    if password.is_empty() {
        ctx.delete(SUDO_PASSWORD_KEY);
    } else {
        ctx.set(SUDO_PASSWORD_KEY, password);
    }
}
