//! Machine resource configuration for Firecracker VMs.
//!
//! firepilot's high-level API doesn't expose machine configuration, so memory
//! and vCPU count are set through a direct call on the API socket.

use crate::error::{Result, VmError};
use firepilot_models::models::MachineConfiguration;
use hyper::{Body, Client, Method, Request};
use hyperlocal::{UnixClientExt, Uri};
use std::path::Path;

/// Build the `/machine-config` request body.
pub(crate) fn machine_config_body(vcpu_count: u8, mem_size_mib: u64) -> Result<String> {
    let mem = i32::try_from(mem_size_mib)
        .map_err(|_| VmError::Config(format!("memory of {mem_size_mib} MiB is too large")))?;
    let config = MachineConfiguration::new(mem, i32::from(vcpu_count));
    serde_json::to_string(&config)
        .map_err(|e| VmError::Config(format!("failed to serialize machine config: {e}")))
}

/// Configure machine resources on a Firecracker instance.
///
/// This sends a PUT request to `/machine-config` on the Firecracker API socket.
/// **Must be called BEFORE starting the VM.**
pub async fn configure_machine(
    socket_path: &Path,
    vcpu_count: u8,
    mem_size_mib: u64,
) -> Result<()> {
    tracing::debug!(vcpu_count, mem_size_mib, "Configuring machine resources");

    let body = machine_config_body(vcpu_count, mem_size_mib)?;
    let uri: hyper::Uri = Uri::new(socket_path, "/machine-config").into();

    let request = Request::builder()
        .method(Method::PUT)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .map_err(|e| VmError::Config(format!("failed to build machine config request: {e}")))?;

    let client = Client::unix();
    let response = client
        .request(request)
        .await
        .map_err(|e| VmError::Firepilot(format!("machine config request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body_bytes = hyper::body::to_bytes(response.into_body())
            .await
            .unwrap_or_default();
        let body_str = String::from_utf8_lossy(&body_bytes);
        return Err(VmError::Firepilot(format!(
            "machine config failed with status {}: {}",
            status, body_str
        )));
    }

    tracing::info!(vcpu_count, mem_size_mib, "Machine resources configured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_config_body() {
        let json = machine_config_body(2, 64).unwrap();
        assert!(json.contains("\"mem_size_mib\":64"));
        assert!(json.contains("\"vcpu_count\":2"));
    }

    #[test]
    fn test_machine_config_body_overflow() {
        assert!(machine_config_body(1, u64::MAX).is_err());
    }
}
