//! In-memory container runtime for tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;

use weave_common::{WeaveError, WeaveResult};

use crate::runtime::{
    ContainerInfo, ContainerRuntime, EventStream, ImageInfo, LifecycleEvent, RunSpec,
};

/// What happens to the next container started through [`FakeRuntime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// It keeps running as `pid`.
    Running {
        /// Host pid reported by inspect.
        pid: u32,
    },
    /// It exits straight away and reports pid 0.
    Exited,
    /// The runtime forgets it as soon as it is started.
    Vanished,
}

#[derive(Debug)]
struct State {
    containers: Vec<ContainerInfo>,
    images: BTreeMap<String, ImageInfo>,
    runs: Vec<RunSpec>,
    ops: Vec<String>,
    next_run: RunOutcome,
    events: Vec<WeaveResult<LifecycleEvent>>,
    started: u32,
}

/// In-memory container runtime. Containers are looked up by name or id.
#[derive(Debug)]
pub struct FakeRuntime {
    state: Mutex<State>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    /// A runtime with no containers whose next run keeps running as pid 4321.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                containers: Vec::new(),
                images: BTreeMap::new(),
                runs: Vec::new(),
                ops: Vec::new(),
                next_run: RunOutcome::Running { pid: 4321 },
                events: Vec::new(),
                started: 0,
            }),
        }
    }

    /// Register an existing container.
    pub fn add_container(&self, info: ContainerInfo) {
        self.state.lock().containers.push(info);
    }

    /// Mark a container as exited.
    pub fn stop(&self, name: &str) {
        let mut state = self.state.lock();
        if let Some(info) = state
            .containers
            .iter_mut()
            .find(|c| c.name == name || c.id == name)
        {
            info.running = false;
            info.pid = 0;
        }
    }

    /// Register a local image.
    pub fn add_image(&self, reference: &str, info: ImageInfo) {
        self.state.lock().images.insert(reference.to_string(), info);
    }

    /// Decide what the next `run` produces.
    pub fn set_next_run(&self, outcome: RunOutcome) {
        self.state.lock().next_run = outcome;
    }

    /// Queue events for the next subscription.
    pub fn set_events(&self, events: Vec<WeaveResult<LifecycleEvent>>) {
        self.state.lock().events = events;
    }

    /// Every container started, in order.
    #[must_use]
    pub fn runs(&self) -> Vec<RunSpec> {
        self.state.lock().runs.clone()
    }

    /// Containers currently named `name`.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.state.lock().containers.iter().filter(|c| c.name == name).count()
    }

    /// Every mutating call, in order (`remove weave`, `run weave zettio/weave`).
    #[must_use]
    pub fn ops(&self) -> Vec<String> {
        self.state.lock().ops.clone()
    }
}

/// Build a container record.
#[must_use]
pub fn container(id: &str, name: &str, image: &str, pid: u32, ip: Option<&str>) -> ContainerInfo {
    ContainerInfo {
        id: id.to_string(),
        name: name.to_string(),
        image: image.to_string(),
        running: pid != 0,
        pid,
        ip_address: ip.map(str::to_string),
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn inspect(&self, name: &str) -> WeaveResult<Option<ContainerInfo>> {
        Ok(self
            .state
            .lock()
            .containers
            .iter()
            .find(|c| c.name == name || c.id == name)
            .cloned())
    }

    async fn remove(&self, name: &str) -> WeaveResult<()> {
        let mut state = self.state.lock();
        let index = state
            .containers
            .iter()
            .position(|c| c.name == name || c.id == name)
            .ok_or_else(|| WeaveError::RuntimeCommand {
                message: format!("No such container: {name}"),
            })?;
        if state.containers[index].running {
            return Err(WeaveError::RuntimeCommand {
                message: format!("You cannot remove a running container {name}"),
            });
        }
        state.containers.remove(index);
        state.ops.push(format!("remove {name}"));
        Ok(())
    }

    async fn run(&self, spec: &RunSpec) -> WeaveResult<String> {
        let mut state = self.state.lock();
        if state.containers.iter().any(|c| c.name == spec.name) {
            return Err(WeaveError::RuntimeCommand {
                message: format!("Conflict. The container name \"/{}\" is already in use", spec.name),
            });
        }

        state.started += 1;
        let id = format!("{:064x}", state.started);
        match state.next_run {
            RunOutcome::Running { pid } => {
                let info = container(&id, &spec.name, &spec.image, pid, None);
                state.containers.push(info);
            }
            RunOutcome::Exited => {
                let info = container(&id, &spec.name, &spec.image, 0, None);
                state.containers.push(info);
            }
            RunOutcome::Vanished => {}
        }
        state.runs.push(spec.clone());
        state.ops.push(format!("run {} {}", spec.name, spec.image));
        Ok(id)
    }

    async fn image(&self, reference: &str) -> WeaveResult<Option<ImageInfo>> {
        Ok(self.state.lock().images.get(reference).cloned())
    }

    async fn events(&self) -> WeaveResult<EventStream> {
        let events = std::mem::take(&mut self.state.lock().events);
        Ok(futures::stream::iter(events).boxed())
    }
}
