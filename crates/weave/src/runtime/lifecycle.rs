//! The container runtime seam.

use async_trait::async_trait;
use futures::stream::BoxStream;

use weave_common::WeaveResult;

use super::{ContainerInfo, ImageInfo, LifecycleEvent, RunSpec};

/// Lifecycle events as they arrive. Ends when the runtime closes the feed.
pub type EventStream = BoxStream<'static, WeaveResult<LifecycleEvent>>;

/// Operations weave needs from the container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Look up a container by name or id. `None` if the runtime has no
    /// record of it.
    async fn inspect(&self, name: &str) -> WeaveResult<Option<ContainerInfo>>;

    /// Remove a stopped container.
    async fn remove(&self, name: &str) -> WeaveResult<()>;

    /// Start a detached container and return its id.
    async fn run(&self, spec: &RunSpec) -> WeaveResult<String>;

    /// Look up an image by reference. `None` if it is not present locally.
    async fn image(&self, reference: &str) -> WeaveResult<Option<ImageInfo>>;

    /// Subscribe to container lifecycle events from now on.
    async fn events(&self) -> WeaveResult<EventStream>;
}
