//! # cunik-vm
//!
//! VM backend layer for cunik instances.
//!
//! The orchestration layer only sees the [`VmBackend`] / [`VmHandle`] seam and
//! a fully resolved [`VmConfig`]. [`FirecrackerBackend`] is the bundled
//! implementation, driving Firecracker through firepilot.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cunik_vm::{FirecrackerBackend, FirecrackerConfig, Hypervisor, VmBuilder};
//!
//! # async fn example() -> cunik_vm::Result<()> {
//! let backend = FirecrackerBackend::new(FirecrackerConfig::from_env());
//!
//! let mut vm = VmBuilder::new("nginx1")
//!     .image("/var/lib/cunik/images/nginx/nginx.img")
//!     .hypervisor(Hypervisor::Firecracker)
//!     .memory_kb(65536)
//!     .build(&backend)
//!     .await?;
//!
//! vm.start().await?;
//! vm.stop().await?;
//! vm.destroy().await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod builder;
mod config;
mod error;
mod machine;
mod machine_config;

pub use backend::{VmBackend, VmHandle};
pub use builder::VmBuilder;
pub use config::{FirecrackerConfig, Hypervisor, VmConfig};
pub use error::{Result, VmError};
pub use machine::{FirecrackerBackend, FirecrackerVm, VmState};
