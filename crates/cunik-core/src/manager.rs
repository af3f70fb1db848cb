//! Lifecycle API: create, inspect, stop and remove instances.

use crate::config::{read_json_object, ConfigResolver, Params};
use crate::error::{ConfigError, CoreError, Result};
use crate::instance::{Instance, InstanceId};
use crate::naming::NameCounter;
use crate::network::{host_address, HostNetwork, IpCommandNetwork};
use crate::registry::{
    ImageRegistry, InstanceRecord, InstanceRegistry, InstanceSummary, MemoryImageRegistry,
    MemoryInstanceRegistry, MemoryVolumeRegistry, VolumeRegistry,
};
use cunik_vm::VmBackend;
use serde_json::Value;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Directory under the root holding one sub-directory per image.
pub const IMAGES_DIR: &str = "images";

/// Per-image default launch parameters.
pub const CONFIG_FILE: &str = "config.json";

/// Per-image command-line template.
pub const CMDLINE_FILE: &str = "cmdline";

/// Per-image default template parameters.
pub const PARAMS_FILE: &str = "params.json";

/// Caller parameter that requests a tap device.
pub const IPV4_ADDR_KEY: &str = "ipv4_addr";

/// Keys the manager derives per instance; image defaults may not set them.
const DERIVED_KEYS: [&str; 4] = ["cmdline", "image", "name", "nic"];

/// Configuration for [`CunikApi`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Root directory holding `images/<name>/{config.json,cmdline,params.json}`.
    pub root: PathBuf,
    /// `ip` binary used to provision tap devices.
    pub ip_path: PathBuf,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/lib/cunik"),
            ip_path: PathBuf::from("ip"),
        }
    }
}

impl ManagerConfig {
    /// Create a configuration rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `CUNIK_ROOT` | `/var/lib/cunik` |
    /// | `CUNIK_IP_BIN` | `ip` |
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            root: std::env::var("CUNIK_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.root),
            ip_path: std::env::var("CUNIK_IP_BIN")
                .map(PathBuf::from)
                .unwrap_or(default.ip_path),
        }
    }

    /// Directory holding the files of `image`.
    pub fn image_dir(&self, image: &str) -> PathBuf {
        self.root.join(IMAGES_DIR).join(image)
    }

    /// Check that the image directory exists.
    pub fn validate(&self) -> Result<()> {
        let images = self.root.join(IMAGES_DIR);
        if !images.is_dir() {
            return Err(CoreError::Io {
                path: images,
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "image directory not found",
                ),
            });
        }
        Ok(())
    }

    /// Validate configuration but only log warnings instead of failing.
    pub fn validate_warn(&self) {
        if let Err(e) = self.validate() {
            tracing::warn!(root = %self.root.display(), error = %e, "Invalid cunik root");
        }
    }
}

type Slot = Arc<Mutex<Option<Instance>>>;

/// Entry point for managing instances.
///
/// Owns the per-image name counters and the table of live instances; the
/// instance registry, image and volume registries, VM backend and host
/// network are injected.
///
/// # Thread Safety
///
/// Each live instance sits behind its own mutex, so a state change and the
/// registry write that mirrors it are never interleaved with another
/// operation on the same instance. The slot is published and locked before
/// the instance is registered and dropped only after its record is removed,
/// so an id the registry reports is always reachable through `start`, `stop`
/// and `remove`. Operations on different instances run concurrently.
///
/// Locks are always taken slot first, then the instance table.
pub struct CunikApi {
    config: ManagerConfig,
    images: Arc<dyn ImageRegistry>,
    volumes: Arc<dyn VolumeRegistry>,
    registry: Arc<dyn InstanceRegistry>,
    backend: Arc<dyn VmBackend>,
    network: Arc<dyn HostNetwork>,
    counter: NameCounter,
    instances: RwLock<HashMap<InstanceId, Slot>>,
}

impl CunikApi {
    /// Create a manager with in-memory registries and `ip`-based networking.
    pub fn new(config: ManagerConfig, backend: Arc<dyn VmBackend>) -> Self {
        tracing::info!(root = %config.root.display(), "Creating cunik manager");
        let network = Arc::new(IpCommandNetwork::new(config.ip_path.clone()));
        Self {
            config,
            images: Arc::new(MemoryImageRegistry::new()),
            volumes: Arc::new(MemoryVolumeRegistry::new()),
            registry: Arc::new(MemoryInstanceRegistry::new()),
            backend,
            network,
            counter: NameCounter::new(),
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Use `images` to resolve image names.
    pub fn with_image_registry(mut self, images: Arc<dyn ImageRegistry>) -> Self {
        self.images = images;
        self
    }

    /// Use `volumes` to resolve data-volume names.
    pub fn with_volume_registry(mut self, volumes: Arc<dyn VolumeRegistry>) -> Self {
        self.volumes = volumes;
        self
    }

    /// Mirror instance state into `registry`.
    pub fn with_instance_registry(mut self, registry: Arc<dyn InstanceRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Provision tap devices through `network`.
    pub fn with_network(mut self, network: Arc<dyn HostNetwork>) -> Self {
        self.network = network;
        self
    }

    /// Get the manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Get the per-image name counters.
    pub fn counter(&self) -> &NameCounter {
        &self.counter
    }

    fn resolver(&self) -> ConfigResolver {
        ConfigResolver::new(
            self.config.root.clone(),
            Arc::clone(&self.images),
            Arc::clone(&self.volumes),
        )
    }

    /// Create and start a new instance of `image_name`.
    ///
    /// `params` override the image's template parameters. If they carry
    /// `ipv4_addr`, a tap device is provisioned for the instance first.
    ///
    /// Either the instance ends up running and registered, or nothing is left
    /// behind: a failed start destroys the instance and any tap device created
    /// for it is deleted again.
    pub async fn create(&self, image_name: &str, params: Params) -> Result<InstanceId> {
        let start = std::time::Instant::now();
        tracing::info!(image = %image_name, "Creating instance");

        validate_image_name(image_name)?;
        let tap_address = guest_address(&params)?.map(host_address);
        let mut launch = self.load_defaults(image_name).await?;

        let names = self.counter.next(image_name).await;
        tracing::debug!(image = %image_name, name = %names.name, tap = %names.tap_device, "Names derived");

        let resolver = self.resolver();
        let image_dir = Path::new(IMAGES_DIR).join(image_name);
        let cmdline = resolver
            .fill(image_dir.join(CMDLINE_FILE), image_dir.join(PARAMS_FILE), &params)
            .await?;

        launch.insert("name".into(), Value::String(names.name.clone()));
        launch.insert("image".into(), Value::String(image_name.to_string()));
        launch.insert("cmdline".into(), Value::String(cmdline));
        if tap_address.is_some() {
            launch.insert("nic".into(), Value::String(names.tap_device.clone()));
        }
        let config = resolver.resolve(&launch).await?;

        if let Some(address) = tap_address {
            if let Err(e) = self.network.create_tap(&names.tap_device, address).await {
                self.release_tap(Some(&names.tap_device)).await;
                return Err(e);
            }
        }
        let nic = config.nic.clone();

        // The live slot is published, locked, before the record is registered,
        // so any caller that finds the id in the registry waits on this create.
        let id = InstanceId::new();
        let slot: Slot = Arc::new(Mutex::new(None));
        let mut guard = slot.lock().await;
        self.instances.write().await.insert(id, Arc::clone(&slot));

        let constructed = Instance::construct_as(
            id,
            config,
            params,
            self.backend.as_ref(),
            Arc::clone(&self.registry),
        )
        .await;
        let mut instance = match constructed {
            Ok(instance) => instance,
            Err(e) => {
                self.instances.write().await.remove(&id);
                drop(guard);
                self.release_tap(nic.as_deref()).await;
                return Err(e);
            }
        };

        if let Err(e) = instance.start().await {
            tracing::error!(instance_id = %id, error = %e, "Start failed, destroying instance");
            if let Err(destroy_err) = instance.destroy().await {
                tracing::warn!(instance_id = %id, error = %destroy_err, "Cleanup after failed start incomplete");
            }
            self.instances.write().await.remove(&id);
            drop(guard);
            self.release_tap(nic.as_deref()).await;
            return Err(e);
        }

        *guard = Some(instance);
        drop(guard);

        tracing::info!(
            instance_id = %id,
            name = %names.name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Instance running"
        );
        Ok(id)
    }

    /// Summary of every tracked instance, as the registry currently has it.
    pub async fn list(&self) -> Result<Vec<InstanceSummary>> {
        let ids = self.registry.id_list().await?;
        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            match self.registry.query(id).await {
                Ok(record) => summaries.push(record.summary()),
                // Removed between id_list and query
                Err(CoreError::NotFound(_)) => {
                    tracing::trace!(instance_id = %id, "Instance vanished while listing");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summaries)
    }

    /// Full registry record for `id`.
    pub async fn info(&self, id: InstanceId) -> Result<InstanceRecord> {
        self.registry.query(id).await
    }

    /// Start a stopped instance again.
    pub async fn start(&self, id: InstanceId) -> Result<()> {
        let slot = self.slot(id).await?;
        let mut guard = slot.lock().await;
        let instance = guard.as_mut().ok_or(CoreError::NotFound(id))?;
        instance.start().await
    }

    /// Stop a running instance.
    pub async fn stop(&self, id: InstanceId) -> Result<()> {
        let slot = self.slot(id).await?;
        let mut guard = slot.lock().await;
        let instance = guard.as_mut().ok_or(CoreError::NotFound(id))?;
        instance.stop().await
    }

    /// Destroy an instance and delete its tap device.
    ///
    /// Not idempotent: removing an id twice fails with
    /// [`CoreError::NotFound`] the second time.
    pub async fn remove(&self, id: InstanceId) -> Result<()> {
        let slot = self.slot(id).await?;
        let mut guard = slot.lock().await;
        let instance = guard.take().ok_or(CoreError::NotFound(id))?;

        let nic = instance.config().nic.clone();
        let result = instance.destroy().await;
        // Registry record and live entry go while the slot is still held
        self.instances.write().await.remove(&id);
        drop(guard);

        self.release_tap(nic.as_deref()).await;
        result
    }

    /// Destroy every live instance.
    ///
    /// This is useful for cleanup during shutdown. Errors during individual
    /// teardown are logged but do not stop the process.
    pub async fn destroy_all(&self) -> Result<()> {
        let slots = {
            let mut guard = self.instances.write().await;
            std::mem::take(&mut *guard)
        };

        let count = slots.len();
        tracing::info!(count, "Destroying all instances");

        for (id, slot) in slots {
            let Some(instance) = slot.lock().await.take() else {
                continue;
            };
            let nic = instance.config().nic.clone();
            if let Err(e) = instance.destroy().await {
                tracing::error!(instance_id = %id, error = %e, "Failed to destroy instance");
            }
            self.release_tap(nic.as_deref()).await;
        }

        Ok(())
    }

    /// Number of live instances held by this manager.
    pub async fn count(&self) -> usize {
        self.instances.read().await.len()
    }

    async fn slot(&self, id: InstanceId) -> Result<Slot> {
        self.instances
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound(id))
    }

    /// Read `config.json` for `image_name`, registering its data volume.
    async fn load_defaults(&self, image_name: &str) -> Result<Params> {
        let image_dir = self.config.image_dir(image_name);
        let mut defaults = read_json_object(&image_dir.join(CONFIG_FILE)).await?;

        if let Some(key) = DERIVED_KEYS.iter().find(|k| defaults.contains_key(**k)) {
            return Err(ConfigError::ReservedKey((*key).to_string()).into());
        }

        let volume = match defaults.get("data_volume") {
            Some(Value::String(file)) if !file.is_empty() => Some(file.clone()),
            _ => None,
        };
        if let Some(file) = volume {
            self.volumes
                .add_volume_path(image_name, image_dir.join(file))
                .await?;
            defaults.insert("data_volume".into(), Value::String(image_name.to_string()));
        }

        Ok(defaults)
    }

    /// Best-effort tap removal.
    async fn release_tap(&self, tap: Option<&str>) {
        let Some(tap) = tap else {
            return;
        };
        if let Err(e) = self.network.remove_tap(tap).await {
            tracing::warn!(tap = %tap, error = %e, "Failed to remove tap device");
        }
    }
}

/// Image names map to a single directory under `images/`.
fn validate_image_name(name: &str) -> std::result::Result<(), ConfigError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(ConfigError::InvalidValue {
            key: "image".into(),
            expected: "a plain image name",
        });
    }
    Ok(())
}

/// Guest address requested through `ipv4_addr`, if any.
fn guest_address(params: &Params) -> std::result::Result<Option<Ipv4Addr>, ConfigError> {
    match params.get(IPV4_ADDR_KEY) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidAddress(s.clone())),
        Some(other) => Err(ConfigError::InvalidAddress(other.to_string())),
    }
}
