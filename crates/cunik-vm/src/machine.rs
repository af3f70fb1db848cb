//! Firecracker backend built on firepilot.

use crate::backend::{VmBackend, VmHandle};
use crate::config::{FirecrackerConfig, Hypervisor, VmConfig};
use crate::error::{Result, VmError};
use crate::machine_config::configure_machine;
use async_trait::async_trait;
use firepilot::builder::drive::DriveBuilder;
use firepilot::builder::executor::FirecrackerExecutorBuilder;
use firepilot::builder::kernel::KernelBuilder;
use firepilot::builder::network_interface::NetworkInterfaceBuilder;
use firepilot::builder::{Builder, Configuration};
use firepilot::machine::Machine;
use std::path::PathBuf;
use uuid::Uuid;

/// Drive id used for the optional data volume.
const DATA_DRIVE_ID: &str = "data";

/// Interface id used for the optional tap device.
const IFACE_ID: &str = "eth0";

/// Current state of a Firecracker VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// Firecracker process is up, guest not booted
    Created,
    /// VM is running
    Running,
    /// VM is stopped
    Stopped,
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VmState::Created => write!(f, "created"),
            VmState::Running => write!(f, "running"),
            VmState::Stopped => write!(f, "stopped"),
        }
    }
}

/// [`VmBackend`] that runs images as Firecracker microVMs.
///
/// The image is booted as the kernel, the command line becomes the boot
/// arguments, the data volume is attached as a non-root drive and the tap
/// device as `eth0`.
#[derive(Debug, Clone, Default)]
pub struct FirecrackerBackend {
    config: FirecrackerConfig,
}

impl FirecrackerBackend {
    /// Create a backend with the given settings.
    pub fn new(config: FirecrackerConfig) -> Self {
        Self { config }
    }

    /// Get the backend settings.
    pub fn config(&self) -> &FirecrackerConfig {
        &self.config
    }

    fn firepilot_config(&self, id: Uuid, config: &VmConfig) -> Result<Configuration> {
        let kernel = KernelBuilder::new()
            .with_kernel_image_path(config.image_path.to_string_lossy().to_string())
            .with_boot_args(config.cmdline.clone())
            .try_build()
            .map_err(|e| VmError::Config(format!("kernel config: {:?}", e)))?;

        let executor = FirecrackerExecutorBuilder::new()
            .with_chroot(self.config.chroot_path.to_string_lossy().to_string())
            .with_exec_binary(self.config.firecracker_path.clone())
            .try_build()
            .map_err(|e| VmError::Config(format!("executor config: {:?}", e)))?;

        let mut fp_config = Configuration::new(id.to_string())
            .with_kernel(kernel)
            .with_executor(executor);

        if let Some(vdisk) = &config.vdisk_path {
            let drive = DriveBuilder::new()
                .with_drive_id(DATA_DRIVE_ID.to_string())
                .with_path_on_host(vdisk.clone())
                .try_build()
                .map_err(|e| VmError::Config(format!("data drive config: {:?}", e)))?;
            fp_config = fp_config.with_drive(drive);
        }

        if let Some(nic) = &config.nic {
            let iface = NetworkInterfaceBuilder::new()
                .with_iface_id(IFACE_ID.to_string())
                .with_host_dev_name(nic.clone())
                .try_build()
                .map_err(|e| VmError::Config(format!("network config: {:?}", e)))?;
            fp_config = fp_config.with_interface(iface);
        }

        Ok(fp_config)
    }
}

#[async_trait]
impl VmBackend for FirecrackerBackend {
    async fn create(&self, config: VmConfig) -> Result<Box<dyn VmHandle>> {
        config.validate()?;
        if config.hypervisor != Hypervisor::Firecracker {
            return Err(VmError::Unsupported(config.hypervisor.to_string()));
        }

        let id = Uuid::new_v4();
        tracing::info!(%id, name = %config.name, "Creating Firecracker VM");

        let fp_config = self.firepilot_config(id, &config)?;

        // Spawns the Firecracker process and its API socket
        let mut machine = Machine::new();
        machine
            .create(fp_config)
            .await
            .map_err(|e| VmError::Create(format!("{:?}", e)))?;

        let socket_path = self
            .config
            .chroot_path
            .join(id.to_string())
            .join("firecracker.socket");

        // Machine resources can only be set before the first boot
        if let Err(e) =
            configure_machine(&socket_path, self.config.vcpu_count, config.memory_mib()).await
        {
            if let Err(kill_err) = machine.kill().await {
                tracing::warn!(%id, error = ?kill_err, "Failed to kill half-configured VM");
            }
            return Err(e);
        }

        Ok(Box::new(FirecrackerVm {
            id,
            config,
            state: VmState::Created,
            machine: Some(machine),
            socket_path,
        }))
    }
}

/// A Firecracker microVM created by [`FirecrackerBackend`].
pub struct FirecrackerVm {
    id: Uuid,
    config: VmConfig,
    state: VmState,
    /// `None` once destroyed
    machine: Option<Machine>,
    socket_path: PathBuf,
}

impl FirecrackerVm {
    /// Get the unique ID of this VM.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Get the current state of the VM.
    pub fn state(&self) -> VmState {
        self.state
    }

    /// Get the configuration used to create this VM.
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Get the path to the Firecracker API socket.
    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    fn machine_mut(&mut self) -> Result<&mut Machine> {
        self.machine.as_mut().ok_or_else(|| VmError::InvalidState {
            expected: "created, running or stopped".into(),
            actual: "destroyed".into(),
        })
    }
}

#[async_trait]
impl VmHandle for FirecrackerVm {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn start(&mut self) -> Result<()> {
        if self.state == VmState::Running {
            return Err(VmError::InvalidState {
                expected: "created or stopped".into(),
                actual: self.state.to_string(),
            });
        }

        tracing::info!(id = %self.id, "Starting VM");
        self.machine_mut()?
            .start()
            .await
            .map_err(|e| VmError::Start(format!("{:?}", e)))?;

        self.state = VmState::Running;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if self.state != VmState::Running {
            return Err(VmError::InvalidState {
                expected: "running".into(),
                actual: self.state.to_string(),
            });
        }

        tracing::info!(id = %self.id, "Stopping VM");
        self.machine_mut()?
            .stop()
            .await
            .map_err(|e| VmError::Stop(format!("{:?}", e)))?;

        self.state = VmState::Stopped;
        Ok(())
    }

    async fn destroy(&mut self) -> Result<()> {
        tracing::info!(id = %self.id, "Destroying VM");

        let Some(mut machine) = self.machine.take() else {
            return Ok(());
        };
        self.state = VmState::Stopped;

        // Dropping the machine alone leaves the process behind
        machine
            .kill()
            .await
            .map_err(|e| VmError::Stop(format!("kill failed: {:?}", e)))?;
        Ok(())
    }
}
