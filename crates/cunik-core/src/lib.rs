//! # cunik-core
//!
//! Lifecycle orchestration for cunik unikernel instances.
//!
//! Turns an image name plus caller parameters into a running VM, tracks each
//! instance through its states and mirrors every change into an instance
//! registry.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        cunik-core                        │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐    │
//! │  │    CunikApi     │────▶│  NameCounter             │    │
//! │  │   - create()    │     │  HostNetwork (tap)       │    │
//! │  │   - list()      │     └──────────────────────────┘    │
//! │  │   - stop()      │                                     │
//! │  │   - remove()    │     ┌──────────────────────────┐    │
//! │  └─────────────────┘────▶│  ConfigResolver          │    │
//! │           │              │  (images/<name>/...)     │    │
//! │           ▼              └──────────────────────────┘    │
//! │  ┌─────────────────┐     ┌──────────────────────────┐    │
//! │  │    Instance     │────▶│  InstanceRegistry        │    │
//! │  │  - start()      │     └──────────────────────────┘    │
//! │  │  - stop()       │                                     │
//! │  │  - destroy()    │                                     │
//! │  └─────────────────┘                                     │
//! │           │                                              │
//! └───────────┼──────────────────────────────────────────────┘
//!             ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │              cunik-vm (VmBackend / VmHandle)             │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use cunik_core::{CunikApi, ManagerConfig, MemoryImageRegistry, Params};
//! use cunik_vm::{FirecrackerBackend, FirecrackerConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> cunik_core::Result<()> {
//! let images = Arc::new(MemoryImageRegistry::new());
//! images.add_image_path("nginx", "/var/lib/cunik/images/nginx/nginx.img").await;
//!
//! let backend = Arc::new(FirecrackerBackend::new(FirecrackerConfig::from_env()));
//! let api = CunikApi::new(ManagerConfig::from_env(), backend).with_image_registry(images);
//!
//! let mut params = Params::new();
//! params.insert("ipv4_addr".into(), "10.0.20.1".into());
//! let id = api.create("nginx", params).await?;
//!
//! for summary in api.list().await? {
//!     println!("{} {} {}", summary.id, summary.name, summary.state);
//! }
//!
//! api.stop(id).await?;
//! api.remove(id).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod instance;
mod manager;
mod naming;
mod network;
mod registry;
mod template;

pub use config::{ConfigResolver, Params, ResolvedConfig, OPTIONAL_KEYS, REQUIRED_KEYS};
pub use error::{ConfigError, CoreError, ErrorKind, ResourceKind, Result};
pub use instance::{Instance, InstanceId, InstanceState};
pub use manager::{
    CunikApi, ManagerConfig, CMDLINE_FILE, CONFIG_FILE, IMAGES_DIR, IPV4_ADDR_KEY, PARAMS_FILE,
};
pub use naming::{InstanceNames, NameCounter};
pub use network::{host_address, HostNetwork, IpCommandNetwork, HOST_OCTET, PREFIX_LEN};
pub use registry::{
    ImageRegistry, InstanceRecord, InstanceRegistry, InstanceSummary, MemoryImageRegistry,
    MemoryInstanceRegistry, MemoryVolumeRegistry, VolumeRegistry,
};
pub use template::substitute;
