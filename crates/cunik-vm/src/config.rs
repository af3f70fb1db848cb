//! Configuration types for VM backends.

use crate::error::{Result, VmError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Hypervisor a VM should run under.
///
/// The tag is opaque to the orchestration layer; each backend decides which
/// kinds it can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Hypervisor {
    /// Plain KVM (qemu-kvm / libvirt style)
    Kvm,
    /// Xen
    Xen,
    /// Firecracker microVM monitor
    Firecracker,
}

impl Hypervisor {
    /// Tag as it appears in image configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Hypervisor::Kvm => "kvm",
            Hypervisor::Xen => "xen",
            Hypervisor::Firecracker => "firecracker",
        }
    }
}

impl fmt::Display for Hypervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Hypervisor {
    type Err = VmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "kvm" => Ok(Hypervisor::Kvm),
            "xen" => Ok(Hypervisor::Xen),
            "firecracker" => Ok(Hypervisor::Firecracker),
            other => Err(VmError::UnknownHypervisor(other.to_string())),
        }
    }
}

/// Fully resolved launch configuration handed to a [`VmBackend`](crate::VmBackend).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmConfig {
    /// VM name
    pub name: String,
    /// Path to the bootable image on the host
    pub image_path: PathBuf,
    /// Command line passed to the image at boot
    pub cmdline: String,
    /// Optional data disk attached to the VM
    pub vdisk_path: Option<PathBuf>,
    /// Hypervisor kind
    pub hypervisor: Hypervisor,
    /// Tap device on the host (optional)
    pub nic: Option<String>,
    /// Memory size in KB
    pub memory_kb: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            image_path: PathBuf::new(),
            cmdline: String::new(),
            vdisk_path: None,
            hypervisor: Hypervisor::Kvm,
            nic: None,
            memory_kb: 64 * 1024,
        }
    }
}

impl VmConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(VmError::Config("name is required".into()));
        }
        if self.image_path.as_os_str().is_empty() {
            return Err(VmError::Config("image_path is required".into()));
        }
        if self.memory_kb == 0 {
            return Err(VmError::Config("memory_kb must be > 0".into()));
        }
        if let Some(nic) = &self.nic {
            if nic.is_empty() {
                return Err(VmError::Config("nic must not be empty".into()));
            }
        }
        Ok(())
    }

    /// Memory rounded up to whole MiB.
    pub fn memory_mib(&self) -> u64 {
        self.memory_kb.div_ceil(1024)
    }
}

/// Settings for the Firecracker backend.
#[derive(Debug, Clone)]
pub struct FirecrackerConfig {
    /// Path to Firecracker binary
    pub firecracker_path: PathBuf,
    /// Working directory for VM sockets and state
    pub chroot_path: PathBuf,
    /// vCPUs given to every VM
    pub vcpu_count: u8,
}

impl Default for FirecrackerConfig {
    fn default() -> Self {
        Self {
            firecracker_path: PathBuf::from("/usr/local/bin/firecracker"),
            chroot_path: PathBuf::from("/tmp/cunik"),
            vcpu_count: 1,
        }
    }
}

impl FirecrackerConfig {
    /// Load settings from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `CUNIK_FIRECRACKER` | `/usr/local/bin/firecracker` |
    /// | `CUNIK_CHROOT` | `/tmp/cunik` |
    /// | `CUNIK_VCPUS` | `1` |
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            firecracker_path: std::env::var("CUNIK_FIRECRACKER")
                .map(PathBuf::from)
                .unwrap_or(default.firecracker_path),
            chroot_path: std::env::var("CUNIK_CHROOT")
                .map(PathBuf::from)
                .unwrap_or(default.chroot_path),
            vcpu_count: std::env::var("CUNIK_VCPUS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.vcpu_count),
        }
    }
}
