//! Builder pattern for ergonomic VmConfig construction.

use crate::backend::{VmBackend, VmHandle};
use crate::config::{Hypervisor, VmConfig};
use crate::error::Result;
use std::path::PathBuf;

/// Fluent builder for configuring and creating VM handles.
///
/// # Example
///
/// ```no_run
/// use cunik_vm::{FirecrackerBackend, FirecrackerConfig, Hypervisor, VmBuilder};
///
/// # async fn example() -> cunik_vm::Result<()> {
/// let backend = FirecrackerBackend::new(FirecrackerConfig::default());
/// let mut vm = VmBuilder::new("nginx1")
///     .image("/var/lib/cunik/images/nginx/nginx.img")
///     .cmdline("--ip=10.0.20.2")
///     .hypervisor(Hypervisor::Firecracker)
///     .memory_kb(65536)
///     .with_network("tap-nginx-1")
///     .build(&backend)
///     .await?;
/// vm.start().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct VmBuilder {
    config: VmConfig,
}

impl VmBuilder {
    /// Create a new builder for a VM with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: VmConfig {
                name: name.into(),
                ..Default::default()
            },
        }
    }

    /// Set the path to the bootable image.
    pub fn image(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.image_path = path.into();
        self
    }

    /// Set the boot command line.
    pub fn cmdline(mut self, cmdline: impl Into<String>) -> Self {
        self.config.cmdline = cmdline.into();
        self
    }

    /// Set the hypervisor kind.
    pub fn hypervisor(mut self, hypervisor: Hypervisor) -> Self {
        self.config.hypervisor = hypervisor;
        self
    }

    /// Set the memory size in KB.
    pub fn memory_kb(mut self, kb: u64) -> Self {
        self.config.memory_kb = kb;
        self
    }

    /// Attach a data disk if one is given.
    pub fn with_optional_disk(mut self, path: Option<PathBuf>) -> Self {
        self.config.vdisk_path = path;
        self
    }

    /// Configure network interface with the given tap device.
    pub fn with_network(mut self, host_dev: &str) -> Self {
        self.config.nic = Some(host_dev.to_string());
        self
    }

    /// Configure network interface if a tap device is given.
    pub fn with_optional_network(mut self, host_dev: Option<String>) -> Self {
        self.config.nic = host_dev;
        self
    }

    /// Build and return the configuration without creating a VM.
    ///
    /// Useful for testing or inspecting the configuration.
    pub fn build_config(self) -> VmConfig {
        self.config
    }

    /// Validate the configuration and create a VM handle on `backend`.
    ///
    /// The returned handle is not started yet.
    ///
    /// # Errors
    /// Returns an error if validation or VM creation fails.
    pub async fn build(self, backend: &dyn VmBackend) -> Result<Box<dyn VmHandle>> {
        self.config.validate()?;
        backend.create(self.config).await
    }
}
