//! Launch configuration resolution.
//!
//! [`ConfigResolver`] turns a sparse parameter map into a [`ResolvedConfig`]:
//! key-set validation, registry lookups for the image and data volume, and
//! memory parsing. It also fills command-line templates from the image root.

use crate::error::{ConfigError, CoreError, Result};
use crate::registry::{ImageRegistry, VolumeRegistry};
use crate::template::{render, substitute};
use cunik_vm::Hypervisor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Named launch parameters. Ordered, so key checks report offenders lexically.
pub type Params = BTreeMap<String, Value>;

/// Keys every launch request must carry, in lexical order.
pub const REQUIRED_KEYS: [&str; 5] = ["cmdline", "hypervisor", "image", "memory", "name"];

/// Keys a launch request may additionally carry.
pub const OPTIONAL_KEYS: [&str; 2] = ["data_volume", "nic"];

/// Fully validated launch configuration for one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    /// Instance name.
    pub name: String,
    /// On-disk image path.
    pub image_path: PathBuf,
    /// Placeholder-free command line.
    pub cmdline: String,
    /// Hypervisor kind.
    pub hypervisor: Hypervisor,
    /// Memory size in KB, always > 0.
    pub memory_kb: u64,
    /// Pre-provisioned tap device.
    pub nic: Option<String>,
    /// On-disk data volume path.
    pub data_volume_path: Option<PathBuf>,
}

/// Builds [`ResolvedConfig`]s against the image and data-volume registries.
#[derive(Clone)]
pub struct ConfigResolver {
    root: PathBuf,
    images: Arc<dyn ImageRegistry>,
    volumes: Arc<dyn VolumeRegistry>,
}

impl ConfigResolver {
    /// Create a resolver reading template files relative to `root`.
    pub fn new(
        root: impl Into<PathBuf>,
        images: Arc<dyn ImageRegistry>,
        volumes: Arc<dyn VolumeRegistry>,
    ) -> Self {
        Self {
            root: root.into(),
            images,
            volumes,
        }
    }

    /// Root directory template paths are relative to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate `params` and resolve symbolic names.
    ///
    /// Unexpected keys are reported before missing ones, each in lexical
    /// order. Nothing is written anywhere, so a failure leaves no trace.
    pub async fn resolve(&self, params: &Params) -> Result<ResolvedConfig> {
        check_keys(params)?;

        let name = string_param(params, "name")?.to_string();

        let image = string_param(params, "image")?;
        let image_path = self.images.image_path(image).await?;

        let cmdline = string_param(params, "cmdline")?.to_string();

        let hypervisor_tag = string_param(params, "hypervisor")?;
        let hypervisor: Hypervisor = hypervisor_tag
            .parse()
            .map_err(|_| ConfigError::UnknownHypervisor(hypervisor_tag.to_string()))?;

        let nic = optional_string_param(params, "nic")?.map(str::to_string);

        let memory_kb = parse_memory(&params["memory"])?;

        let data_volume_path = match optional_string_param(params, "data_volume")? {
            Some(volume) => Some(self.volumes.volume_path(volume).await?),
            None => None,
        };

        tracing::debug!(
            name = %name,
            image = %image,
            hypervisor = %hypervisor,
            memory_kb,
            nic = ?nic,
            "Launch configuration resolved"
        );

        Ok(ResolvedConfig {
            name,
            image_path,
            cmdline,
            hypervisor,
            memory_kb,
            nic,
            data_volume_path,
        })
    }

    /// Fill the command-line template at `cmdline_path` with the JSON object
    /// at `params_path`, both relative to the root. `overrides` win over file
    /// values.
    pub async fn fill(
        &self,
        cmdline_path: impl AsRef<Path>,
        params_path: impl AsRef<Path>,
        overrides: &Params,
    ) -> Result<String> {
        let cmdline_path = self.root.join(cmdline_path);
        let params_path = self.root.join(params_path);

        let template = read_file(&cmdline_path).await?;
        let mut params = read_json_object(&params_path).await?;
        params.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

        let cmdline = substitute(&template, &params)?;
        tracing::trace!(path = %cmdline_path.display(), cmdline = %cmdline, "Command line filled");
        Ok(cmdline)
    }
}

/// Read a whole file, naming it in the error.
pub(crate) async fn read_file(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CoreError::Io {
            path: path.to_path_buf(),
            source,
        })
}

/// Read a JSON object file into [`Params`].
pub(crate) async fn read_json_object(path: &Path) -> Result<Params> {
    let text = read_file(path).await?;
    serde_json::from_str(&text).map_err(|source| CoreError::Format {
        path: path.to_path_buf(),
        source,
    })
}

fn check_keys(params: &Params) -> std::result::Result<(), ConfigError> {
    if let Some(key) = params
        .keys()
        .find(|k| !REQUIRED_KEYS.contains(&k.as_str()) && !OPTIONAL_KEYS.contains(&k.as_str()))
    {
        return Err(ConfigError::UnexpectedKey(key.clone()));
    }
    if let Some(key) = REQUIRED_KEYS.iter().find(|k| !params.contains_key(**k)) {
        return Err(ConfigError::MissingKey((*key).to_string()));
    }
    Ok(())
}

fn string_param<'a>(params: &'a Params, key: &str) -> std::result::Result<&'a str, ConfigError> {
    match params.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            expected: "a string",
        }),
        None => Err(ConfigError::MissingKey(key.to_string())),
    }
}

/// Absent, `null` and empty values all mean "not set".
fn optional_string_param<'a>(
    params: &'a Params,
    key: &str,
) -> std::result::Result<Option<&'a str>, ConfigError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            expected: "a string",
        }),
    }
}

/// Parse a memory size given as a JSON integer or a numeric string.
fn parse_memory(value: &Value) -> std::result::Result<u64, ConfigError> {
    let parsed: Option<i128> = match value {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    let memory = parsed.ok_or_else(|| ConfigError::InvalidMemory(render(value)))?;

    if memory <= 0 {
        return Err(ConfigError::NonPositiveMemory(
            i64::try_from(memory).unwrap_or(i64::MIN),
        ));
    }
    u64::try_from(memory).map_err(|_| ConfigError::InvalidMemory(render(value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MemoryImageRegistry, MemoryVolumeRegistry};
    use crate::ErrorKind;
    use serde_json::json;

    fn params(value: Value) -> Params {
        serde_json::from_value(value).unwrap()
    }

    fn base() -> Params {
        params(json!({
            "name": "nginx1",
            "image": "nginx",
            "cmdline": "\"10.0.20.1\"",
            "hypervisor": "kvm",
            "memory": 65536,
        }))
    }

    async fn resolver() -> ConfigResolver {
        let images = MemoryImageRegistry::new();
        images.add_image_path("nginx", "/var/lib/cunik/images/nginx/nginx.img").await;
        let volumes = MemoryVolumeRegistry::new();
        volumes
            .add_volume_path("nginx", PathBuf::from("/var/lib/cunik/images/nginx/data.img"))
            .await
            .unwrap();
        ConfigResolver::new("/var/lib/cunik", Arc::new(images), Arc::new(volumes))
    }

    fn config_err(err: CoreError) -> ConfigError {
        match err {
            CoreError::Config(e) => e,
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_required_keys() {
        let config = resolver().await.resolve(&base()).await.unwrap();
        assert_eq!(config.name, "nginx1");
        assert_eq!(
            config.image_path,
            PathBuf::from("/var/lib/cunik/images/nginx/nginx.img")
        );
        assert_eq!(config.cmdline, "\"10.0.20.1\"");
        assert_eq!(config.hypervisor, Hypervisor::Kvm);
        assert_eq!(config.memory_kb, 65536);
        assert!(config.nic.is_none());
        assert!(config.data_volume_path.is_none());
    }

    #[tokio::test]
    async fn test_resolve_optional_keys() {
        let mut p = base();
        p.insert("nic".into(), json!("tap-nginx-1"));
        p.insert("data_volume".into(), json!("nginx"));

        let config = resolver().await.resolve(&p).await.unwrap();
        assert_eq!(config.nic.as_deref(), Some("tap-nginx-1"));
        assert_eq!(
            config.data_volume_path,
            Some(PathBuf::from("/var/lib/cunik/images/nginx/data.img"))
        );
    }

    #[tokio::test]
    async fn test_unexpected_key_lexical_order() {
        let mut p = base();
        p.insert("zeta".into(), json!(1));
        p.insert("alpha".into(), json!(1));

        let err = resolver().await.resolve(&p).await.unwrap_err();
        assert_eq!(config_err(err), ConfigError::UnexpectedKey("alpha".into()));
    }

    #[tokio::test]
    async fn test_unexpected_key_reported_before_missing() {
        let mut p = base();
        p.remove("name");
        p.insert("vcpus".into(), json!(2));

        let err = resolver().await.resolve(&p).await.unwrap_err();
        assert_eq!(config_err(err), ConfigError::UnexpectedKey("vcpus".into()));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let resolver = resolver().await;
        for key in REQUIRED_KEYS {
            let mut p = base();
            p.remove(key);
            let err = resolver.resolve(&p).await.unwrap_err();
            assert_eq!(config_err(err), ConfigError::MissingKey(key.into()));
        }

        let mut p = base();
        p.remove("memory");
        p.remove("cmdline");
        let err = resolver.resolve(&p).await.unwrap_err();
        assert_eq!(config_err(err), ConfigError::MissingKey("cmdline".into()));
    }

    #[tokio::test]
    async fn test_memory_values() {
        let resolver = resolver().await;
        let cases = [
            (json!("abc"), Some(ConfigError::InvalidMemory("abc".into()))),
            (json!(-1), Some(ConfigError::NonPositiveMemory(-1))),
            (json!(0), Some(ConfigError::NonPositiveMemory(0))),
            (json!("-1"), Some(ConfigError::NonPositiveMemory(-1))),
            (json!(1.5), Some(ConfigError::InvalidMemory("1.5".into()))),
            (json!(5), None),
            (json!("5"), None),
        ];

        for (value, expected) in cases {
            let mut p = base();
            p.insert("memory".into(), value.clone());
            match (resolver.resolve(&p).await, expected) {
                (Ok(config), None) => assert_eq!(config.memory_kb, 5, "value {value}"),
                (Err(err), Some(expected)) => assert_eq!(config_err(err), expected),
                (result, expected) => {
                    panic!("value {value}: got {result:?}, expected {expected:?}")
                }
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_image() {
        let mut p = base();
        p.insert("image".into(), json!("redis"));

        let err = resolver().await.resolve(&p).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("redis"));
    }

    #[tokio::test]
    async fn test_unknown_volume() {
        let mut p = base();
        p.insert("data_volume".into(), json!("postgres"));

        let err = resolver().await.resolve(&p).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::UnknownResource { kind: crate::ResourceKind::Volume, ref name } if name == "postgres"
        ));
    }

    #[tokio::test]
    async fn test_empty_volume_is_unset() {
        let mut p = base();
        p.insert("data_volume".into(), json!(""));
        p.insert("nic".into(), Value::Null);

        let config = resolver().await.resolve(&p).await.unwrap();
        assert!(config.data_volume_path.is_none());
        assert!(config.nic.is_none());
    }

    #[tokio::test]
    async fn test_unknown_hypervisor() {
        let mut p = base();
        p.insert("hypervisor".into(), json!("vmware"));

        let err = resolver().await.resolve(&p).await.unwrap_err();
        assert_eq!(
            config_err(err),
            ConfigError::UnknownHypervisor("vmware".into())
        );
    }

    #[tokio::test]
    async fn test_non_string_name() {
        let mut p = base();
        p.insert("name".into(), json!(7));

        let err = resolver().await.resolve(&p).await.unwrap_err();
        assert_eq!(
            config_err(err),
            ConfigError::InvalidValue {
                key: "name".into(),
                expected: "a string"
            }
        );
    }

    fn fill_resolver(root: &Path) -> ConfigResolver {
        ConfigResolver::new(
            root,
            Arc::new(MemoryImageRegistry::new()),
            Arc::new(MemoryVolumeRegistry::new()),
        )
    }

    fn write_files(root: &Path, params_json: Option<&str>) {
        std::fs::write(root.join("cmdline"), r#"--ip "{{ip}}" --port "{{port}}""#).unwrap();
        if let Some(text) = params_json {
            std::fs::write(root.join("params.json"), text).unwrap();
        }
    }

    #[tokio::test]
    async fn test_fill_overrides_win() {
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), Some(r#"{"ip": "10.0.0.1", "port": 80}"#));

        let overrides = params(json!({"ip": "10.0.20.1"}));
        let cmdline = fill_resolver(dir.path())
            .fill("cmdline", "params.json", &overrides)
            .await
            .unwrap();
        assert_eq!(cmdline, r#"--ip "10.0.20.1" --port "80""#);
    }

    #[tokio::test]
    async fn test_fill_missing_params_file() {
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), None);

        let err = fill_resolver(dir.path())
            .fill("cmdline", "params.json", &Params::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(matches!(err, CoreError::Io { ref path, .. } if path.ends_with("params.json")));
    }

    #[tokio::test]
    async fn test_fill_malformed_params_file() {
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), Some("{\"ip\": "));

        let err = fill_resolver(dir.path())
            .fill("cmdline", "params.json", &Params::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(matches!(err, CoreError::Format { ref path, .. } if path.ends_with("params.json")));
    }

    #[tokio::test]
    async fn test_fill_params_file_not_an_object() {
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), Some("[1, 2]"));

        let err = fill_resolver(dir.path())
            .fill("cmdline", "params.json", &Params::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[tokio::test]
    async fn test_fill_missing_placeholder_value() {
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), Some(r#"{"ip": "10.0.0.1"}"#));

        let err = fill_resolver(dir.path())
            .fill("cmdline", "params.json", &Params::new())
            .await
            .unwrap_err();
        assert_eq!(config_err(err), ConfigError::MissingPlaceholder("port".into()));
    }
}
