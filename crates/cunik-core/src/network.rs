//! Host-side tap device provisioning.
//!
//! Devices are created with the `ip` tool:
//!
//! ```text
//! ip link del <tap>                  (stale device from an earlier run, may fail)
//! ip tuntap add <tap> mode tap
//! ip addr add <host-addr>/24 dev <tap>
//! ip link set dev <tap> up
//! ```
//!
//! The host-side address is the guest address with its last octet forced to
//! [`HOST_OCTET`]. That rewrite is kept as-is for compatibility with existing
//! image parameter files; it is not a general addressing policy.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Last octet of the host-side tap address.
pub const HOST_OCTET: u8 = 100;

/// Prefix length assigned to the tap address.
pub const PREFIX_LEN: u8 = 24;

/// Maximum length for Linux network interface names (IFNAMSIZ - 1)
const MAX_IFNAME_LEN: usize = 15;

/// Host-side address for a guest at `guest`.
pub fn host_address(guest: Ipv4Addr) -> Ipv4Addr {
    let [a, b, c, _] = guest.octets();
    Ipv4Addr::new(a, b, c, HOST_OCTET)
}

/// Creates and tears down tap devices on the host.
#[async_trait]
pub trait HostNetwork: Send + Sync {
    /// Create `name`, assign `address`/24 and bring it up.
    async fn create_tap(&self, name: &str, address: Ipv4Addr) -> Result<()>;

    /// Delete `name`.
    async fn remove_tap(&self, name: &str) -> Result<()>;
}

/// [`HostNetwork`] that shells out to `ip`.
#[derive(Debug, Clone)]
pub struct IpCommandNetwork {
    ip_path: PathBuf,
}

impl Default for IpCommandNetwork {
    fn default() -> Self {
        Self::new("ip")
    }
}

impl IpCommandNetwork {
    /// Use the `ip` binary at `ip_path` (a bare name is looked up on `PATH`).
    pub fn new(ip_path: impl Into<PathBuf>) -> Self {
        Self {
            ip_path: ip_path.into(),
        }
    }

    /// Argument lists run by [`create_tap`](HostNetwork::create_tap) after the
    /// stale-device cleanup.
    pub fn create_commands(name: &str, address: Ipv4Addr) -> Vec<Vec<String>> {
        let cidr = format!("{address}/{PREFIX_LEN}");
        let owned = |args: &[&str]| args.iter().map(|a| a.to_string()).collect::<Vec<_>>();
        vec![
            owned(&["tuntap", "add", name, "mode", "tap"]),
            owned(&["addr", "add", cidr.as_str(), "dev", name]),
            owned(&["link", "set", "dev", name, "up"]),
        ]
    }

    async fn run(&self, args: &[String]) -> Result<()> {
        tracing::trace!(ip = %self.ip_path.display(), args = ?args, "Running ip");
        let output = tokio::process::Command::new(&self.ip_path)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                CoreError::Network(format!(
                    "failed to run {} {}: {e}",
                    self.ip_path.display(),
                    args.join(" ")
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoreError::Network(format!(
                "`ip {}` exited with {}: {}",
                args.join(" "),
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

fn validate_tap_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CoreError::Network("tap name cannot be empty".into()));
    }
    if name.len() > MAX_IFNAME_LEN {
        return Err(CoreError::Network(format!(
            "tap name '{name}' exceeds {MAX_IFNAME_LEN} character limit"
        )));
    }
    Ok(())
}

#[async_trait]
impl HostNetwork for IpCommandNetwork {
    async fn create_tap(&self, name: &str, address: Ipv4Addr) -> Result<()> {
        validate_tap_name(name)?;
        tracing::info!(tap = %name, address = %address, "Provisioning tap device");

        if let Err(e) = self.run(&["link".into(), "del".into(), name.to_string()]).await {
            tracing::trace!(tap = %name, error = %e, "No stale tap device to delete");
        }

        for args in Self::create_commands(name, address) {
            self.run(&args).await.map_err(|e| {
                tracing::error!(tap = %name, error = %e, "Tap provisioning failed");
                e
            })?;
        }

        tracing::debug!(tap = %name, "Tap device up");
        Ok(())
    }

    async fn remove_tap(&self, name: &str) -> Result<()> {
        validate_tap_name(name)?;
        tracing::debug!(tap = %name, "Removing tap device");
        self.run(&["link".into(), "del".into(), name.to_string()]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_address_rewrites_last_octet() {
        assert_eq!(
            host_address(Ipv4Addr::new(10, 0, 20, 1)),
            Ipv4Addr::new(10, 0, 20, 100)
        );
        assert_eq!(
            host_address(Ipv4Addr::new(192, 168, 1, 100)),
            Ipv4Addr::new(192, 168, 1, 100)
        );
    }

    #[test]
    fn test_create_commands() {
        let commands =
            IpCommandNetwork::create_commands("tap-nginx-1", Ipv4Addr::new(10, 0, 20, 100));
        assert_eq!(
            commands,
            vec![
                vec!["tuntap", "add", "tap-nginx-1", "mode", "tap"],
                vec!["addr", "add", "10.0.20.100/24", "dev", "tap-nginx-1"],
                vec!["link", "set", "dev", "tap-nginx-1", "up"],
            ]
        );
    }

    #[test]
    fn test_tap_name_limits() {
        assert!(validate_tap_name("tap-nginx-1").is_ok());
        assert!(validate_tap_name("").is_err());
        assert!(validate_tap_name("tap-averylongimage-1").is_err());
    }

    #[tokio::test]
    async fn test_successful_commands() {
        let network = IpCommandNetwork::new("true");
        network
            .create_tap("tap-hello-1", Ipv4Addr::new(10, 0, 0, 100))
            .await
            .unwrap();
        network.remove_tap("tap-hello-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_command_is_surfaced() {
        let network = IpCommandNetwork::new("false");
        let err = network
            .create_tap("tap-hello-1", Ipv4Addr::new(10, 0, 0, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Network(ref msg) if msg.contains("tuntap add")));
    }

    #[tokio::test]
    async fn test_missing_binary_is_surfaced() {
        let network = IpCommandNetwork::new("/nonexistent/ip");
        let err = network.remove_tap("tap-hello-1").await.unwrap_err();
        assert!(matches!(err, CoreError::Network(_)));
    }
}
