//! Idempotent resource reconciliation
//!
//! [`ensure`] makes a declared resource exist exactly once. It looks the
//! resource up by its [`Identity`] (a set of tags), reuses a single live
//! match, creates and tags one when nothing matches, and refuses to guess
//! when several do. Calling it twice with the same identity creates at most
//! one resource.
//!
//! Provider specifics live behind [`ResourceClient`]; this module only owns
//! the decision.
//!
//! ```rust,ignore
//! let web = ensure(&ctx, &instances, &Identity::named("web"), &spec, EnsureOptions::default()).await?;
//! if web.created {
//!     info!("new instance {}", web.resource.id());
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::config::{CloudConfig, Config};
use crate::error::{Error, Result};
use crate::executor::runtime::ExecutionContext;

pub use crate::config::Credentials;

/// Role that reconciled resources are registered under by default.
pub const DEFAULT_ROLE: &str = "drover";

/// Tag that names a resource.
pub const NAME_TAG: &str = "Name";

/// Declarative identity of a resource: the tags that pick it out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    tags: IndexMap<String, String>,
}

impl Identity {
    pub fn new() -> Self {
        Self::default()
    }

    /// `{Name: name}`
    pub fn named(name: impl Into<String>) -> Self {
        Self::new().with_tag(NAME_TAG, name)
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn tags(&self) -> &IndexMap<String, String> {
        &self.tags
    }

    pub fn name(&self) -> Option<&str> {
        self.tags.get(NAME_TAG).map(String::as_str)
    }

    /// Whether every identity tag is present with the same value in `tags`
    pub fn matches(&self, tags: &IndexMap<String, String>) -> bool {
        self.tags.iter().all(|(k, v)| tags.get(k) == Some(v))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self.tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{{{}}}", pairs.join(", "))
    }
}

/// A provisioned resource.
pub trait Resource: Send + Sync {
    fn id(&self) -> &str;

    /// Reachable address, once the resource has one
    fn address(&self) -> Option<&str> {
        None
    }

    /// False for resources on their way out (terminated, deleting)
    fn is_live(&self) -> bool {
        true
    }
}

/// Outcome of a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<R> {
    Missing,
    Found(R),
    Ambiguous(Vec<R>),
}

impl<R: Resource> Lookup<R> {
    /// Classify raw matches, ignoring resources that are no longer live
    pub fn from_matches(matches: Vec<R>) -> Self {
        let mut live: Vec<R> = matches.into_iter().filter(|r| r.is_live()).collect();
        match live.len() {
            0 => Lookup::Missing,
            1 => live.pop().map_or(Lookup::Missing, Lookup::Found),
            _ => Lookup::Ambiguous(live),
        }
    }
}

/// Provider operations for one kind of resource.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    type Resource: Resource;
    type Spec: Send + Sync;

    /// Resource kind, used in logs and errors
    fn kind(&self) -> &str;

    /// Every resource carrying the identity's tags
    async fn find(&self, identity: &Identity) -> Result<Vec<Self::Resource>>;

    async fn create(&self, spec: &Self::Spec) -> Result<Self::Resource>;

    async fn tag(&self, resource: &Self::Resource, tags: &IndexMap<String, String>) -> Result<()>;

    /// Block until the resource is usable, polling as `readiness` says. The
    /// default returns it as is.
    async fn wait_ready(
        &self,
        resource: Self::Resource,
        _readiness: &Readiness,
    ) -> Result<Self::Resource> {
        Ok(resource)
    }
}

/// How often and how long to poll a new resource for readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for Readiness {
    fn default() -> Self {
        Self::from_config(&CloudConfig::default())
    }
}

impl Readiness {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// `ready_poll_interval` and `ready_timeout`, in seconds
    pub fn from_config(cloud: &CloudConfig) -> Self {
        Self {
            interval: Duration::from_secs(cloud.ready_poll_interval),
            timeout: Duration::from_secs(cloud.ready_timeout),
        }
    }

    /// [`wait_until`] with this interval and timeout
    pub async fn wait<F, Fut>(&self, kind: &str, id: &str, is_ready: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        wait_until(kind, id, self.interval, self.timeout, is_ready).await
    }
}

/// Knobs for [`ensure`].
#[derive(Debug, Clone)]
pub struct EnsureOptions {
    /// Create even if a matching resource exists
    pub force: bool,
    /// Wait for a new resource to become ready
    pub wait: bool,
    /// Role the resource's address is registered under
    pub role: String,
    /// Tags applied to a new resource on top of the identity
    pub tags: IndexMap<String, String>,
    /// Polling used while waiting for a new resource
    pub readiness: Readiness,
}

impl Default for EnsureOptions {
    fn default() -> Self {
        Self {
            force: false,
            wait: true,
            role: DEFAULT_ROLE.to_string(),
            tags: IndexMap::new(),
            readiness: Readiness::default(),
        }
    }
}

impl EnsureOptions {
    /// Role and readiness polling taken from configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            role: config.defaults.role.clone(),
            readiness: Readiness::from_config(&config.cloud),
            ..Self::default()
        }
    }

    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn without_wait(mut self) -> Self {
        self.wait = false;
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Result of [`ensure`].
#[derive(Debug, Clone)]
pub struct Ensured<R> {
    pub resource: R,
    /// True if this call created the resource
    pub created: bool,
}

/// Make sure exactly one resource with `identity` exists.
///
/// An existing live match is reused unless `force` is set. A new resource is
/// tagged with the identity and any extra tags, then awaited when `wait` is
/// set. Either way its address, if it has one, joins `options.role` and the
/// context's target list.
pub async fn ensure<C>(
    ctx: &ExecutionContext,
    client: &C,
    identity: &Identity,
    spec: &C::Spec,
    options: EnsureOptions,
) -> Result<Ensured<C::Resource>>
where
    C: ResourceClient + ?Sized,
{
    let kind = client.kind().to_string();

    if !options.force {
        match Lookup::from_matches(client.find(identity).await?) {
            Lookup::Found(resource) => {
                info!(
                    "use existent {}: {} [{}]",
                    kind,
                    resource.id(),
                    resource.address().unwrap_or("no address found")
                );
                register(ctx, &options.role, &resource);
                return Ok(Ensured {
                    resource,
                    created: false,
                });
            }
            Lookup::Ambiguous(matches) => {
                return Err(Error::ambiguous(kind, identity.to_string(), matches.len()));
            }
            Lookup::Missing => debug!("No {} matches {}", kind, identity),
        }
    }

    let resource = client.create(spec).await?;
    let mut tags = identity.tags().clone();
    tags.extend(options.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
    client.tag(&resource, &tags).await?;

    let resource = if options.wait {
        debug!("Waiting for {} {} to become ready", kind, resource.id());
        client.wait_ready(resource, &options.readiness).await?
    } else {
        resource
    };

    match resource.address() {
        Some(address) => info!("created {}: {} [{}]", kind, resource.id(), address),
        None => info!("created {}: {} [<unassigned address>]", kind, resource.id()),
    }
    register(ctx, &options.role, &resource);

    Ok(Ensured {
        resource,
        created: true,
    })
}

fn register<R: Resource>(ctx: &ExecutionContext, role: &str, resource: &R) {
    if let Some(address) = resource.address().filter(|a| !a.is_empty()) {
        ctx.add_target_to_role(role, address);
    }
}

/// Poll `is_ready` every `interval` until it reports ready or `timeout` passes.
///
/// Helper for [`ResourceClient::wait_ready`] implementations; see also
/// [`Readiness::wait`].
pub async fn wait_until<F, Fut>(
    kind: &str,
    id: &str,
    interval: Duration,
    timeout: Duration,
    mut is_ready: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if is_ready().await? {
            return Ok(());
        }
        if tokio::time::Instant::now() + interval > deadline {
            warn!("{} {} not ready after {:?}", kind, id, timeout);
            return Err(Error::resource_client(
                kind,
                "wait",
                format!("{} not ready after {:?}", id, timeout),
            ));
        }
        debug!("waiting {:?} for {} {} initialization...", interval, kind, id);
        tokio::time::sleep(interval).await;
    }
}
