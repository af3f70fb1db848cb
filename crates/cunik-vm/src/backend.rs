//! Backend seam between the orchestration layer and a concrete hypervisor.

use crate::config::VmConfig;
use crate::error::Result;
use async_trait::async_trait;

/// Something that can turn a [`VmConfig`] into a VM handle.
#[async_trait]
pub trait VmBackend: Send + Sync {
    /// Create a VM for `config` without booting it.
    async fn create(&self, config: VmConfig) -> Result<Box<dyn VmHandle>>;
}

/// A single VM owned by exactly one caller.
#[async_trait]
pub trait VmHandle: Send {
    /// Name the VM was created with.
    fn name(&self) -> &str;

    /// Boot (or resume) the VM.
    async fn start(&mut self) -> Result<()>;

    /// Stop the VM.
    async fn stop(&mut self) -> Result<()>;

    /// Tear the VM down and release its resources.
    ///
    /// The handle must not be used afterwards.
    async fn destroy(&mut self) -> Result<()>;
}
