//! Instance type - one VM handle plus its registry mirror.

use crate::config::{Params, ResolvedConfig};
use crate::error::CoreError;
use crate::registry::{InstanceRecord, InstanceRegistry};
use chrono::{DateTime, Utc};
use cunik_vm::{VmBackend, VmBuilder, VmHandle};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Create a new random instance ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for InstanceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for InstanceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state of an instance.
///
/// Destruction is not a state: a destroyed instance is simply gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    /// VM created, never booted.
    NotStarted,
    /// VM is running.
    Running,
    /// VM was stopped and may be started again.
    Stopped,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "Not started"),
            Self::Running => write!(f, "Running"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// A managed instance.
///
/// Owns exactly one VM handle. Every public method that changes state writes
/// the new snapshot to the instance registry before returning, so the
/// registry never lags behind a successful call.
pub struct Instance {
    id: InstanceId,
    created_at: DateTime<Utc>,
    config: ResolvedConfig,
    params: Params,
    state: InstanceState,
    vm: Box<dyn VmHandle>,
    registry: Arc<dyn InstanceRegistry>,
}

impl Instance {
    /// Create the VM for `config` and register the new instance.
    ///
    /// The instance is `NotStarted` and already visible through the registry
    /// when this returns. `params` are the caller's original parameters,
    /// kept on the record for inspection.
    pub async fn construct(
        config: ResolvedConfig,
        params: Params,
        backend: &dyn VmBackend,
        registry: Arc<dyn InstanceRegistry>,
    ) -> Result<Self, CoreError> {
        Self::construct_as(InstanceId::new(), config, params, backend, registry).await
    }

    /// [`construct`](Self::construct) under an id chosen by the caller.
    pub(crate) async fn construct_as(
        id: InstanceId,
        config: ResolvedConfig,
        params: Params,
        backend: &dyn VmBackend,
        registry: Arc<dyn InstanceRegistry>,
    ) -> Result<Self, CoreError> {
        tracing::info!(
            instance_id = %id,
            name = %config.name,
            hypervisor = %config.hypervisor,
            memory_kb = config.memory_kb,
            "Creating instance"
        );

        let vm = VmBuilder::new(config.name.clone())
            .image(config.image_path.clone())
            .cmdline(config.cmdline.clone())
            .hypervisor(config.hypervisor)
            .memory_kb(config.memory_kb)
            .with_optional_disk(config.data_volume_path.clone())
            .with_optional_network(config.nic.clone())
            .build(backend)
            .await
            .map_err(|e| {
                tracing::error!(instance_id = %id, error = %e, "VM creation failed");
                CoreError::from(e)
            })?;

        let instance = Self {
            id,
            created_at: Utc::now(),
            config,
            params,
            state: InstanceState::NotStarted,
            vm,
            registry,
        };

        let registered = instance.registry.register(instance.record()).await;
        if let Err(e) = registered {
            tracing::error!(instance_id = %id, error = %e, "Registration failed, releasing VM");
            release(id, instance.vm).await;
            return Err(e);
        }

        tracing::debug!(instance_id = %id, "Instance registered");
        Ok(instance)
    }

    /// Get the instance ID.
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Get the instance name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the current state.
    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// Get the creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the resolved configuration.
    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Snapshot of this instance as stored in the registry.
    pub fn record(&self) -> InstanceRecord {
        InstanceRecord {
            id: self.id,
            name: self.config.name.clone(),
            created_at: self.created_at,
            state: self.state,
            config: self.config.clone(),
            params: self.params.clone(),
        }
    }

    /// Boot the VM.
    ///
    /// On failure the state is unchanged and the registry is not touched.
    pub async fn start(&mut self) -> Result<(), CoreError> {
        tracing::info!(instance_id = %self.id, from = %self.state, "Starting instance");
        if let Err(e) = self.vm.start().await {
            tracing::error!(instance_id = %self.id, error = %e, "VM start failed");
            return Err(e.into());
        }
        self.transition(InstanceState::Running).await
    }

    /// Stop the VM.
    ///
    /// On failure the state is unchanged and the registry is not touched.
    pub async fn stop(&mut self) -> Result<(), CoreError> {
        tracing::info!(instance_id = %self.id, from = %self.state, "Stopping instance");
        if let Err(e) = self.vm.stop().await {
            tracing::error!(instance_id = %self.id, error = %e, "VM stop failed");
            return Err(e.into());
        }
        self.transition(InstanceState::Stopped).await
    }

    /// Release the VM and drop the registry record.
    ///
    /// Backend failures while releasing are logged, not returned: the record
    /// must go regardless.
    pub async fn destroy(self) -> Result<(), CoreError> {
        let start = std::time::Instant::now();
        tracing::info!(instance_id = %self.id, state = %self.state, "Destroying instance");

        let Self {
            id, vm, registry, ..
        } = self;
        release(id, vm).await;

        registry.remove(id).await?;
        tracing::info!(
            instance_id = %id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Instance destroyed"
        );
        Ok(())
    }

    /// Record `state` in the registry, then adopt it.
    ///
    /// If the registry write fails the previous state is kept, so the
    /// in-memory state never runs ahead of the registry.
    async fn transition(&mut self, state: InstanceState) -> Result<(), CoreError> {
        let previous = self.state;
        self.state = state;
        if let Err(e) = self.registry.populate(self.record()).await {
            tracing::error!(instance_id = %self.id, state = %state, error = %e, "Registry update failed");
            self.state = previous;
            return Err(e);
        }
        tracing::debug!(instance_id = %self.id, state = %state, "Instance state updated");
        Ok(())
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("state", &self.state)
            .finish()
    }
}

/// Best-effort VM teardown.
async fn release(id: InstanceId, mut vm: Box<dyn VmHandle>) {
    if let Err(e) = vm.destroy().await {
        tracing::warn!(instance_id = %id, vm = %vm.name(), error = %e, "Failed to release VM");
    }
}
