use std::net::{IpAddr, SocketAddr};

use crate::common::error::MultisliceError;

pub fn get_hostname(preferred: Option<String>) -> crate::Result<String> {
    match preferred {
        Some(hostname) => Ok(hostname),
        None => gethostname::gethostname().into_string().map_err(|name| {
            MultisliceError::ConfigurationError(format!("Invalid hostname {name:?}"))
        }),
    }
}

/// Resolves `hostname` and returns the first address that the resolver offers, combined with
/// `port`.
///
/// Other slices have no way of reaching the orchestrator without this address, so a failed
/// resolution is reported as a configuration error.
pub async fn resolve_host_address(hostname: &str, port: u16) -> crate::Result<SocketAddr> {
    let mut addresses = tokio::net::lookup_host((hostname, port))
        .await
        .map_err(|error| {
            MultisliceError::ConfigurationError(format!(
                "Cannot resolve hostname {hostname}: {error}"
            ))
        })?;
    addresses.next().ok_or_else(|| {
        MultisliceError::ConfigurationError(format!("Hostname {hostname} has no address"))
    })
}

/// Resolves the address of the local host.
pub async fn resolve_local_ip() -> crate::Result<IpAddr> {
    let hostname = get_hostname(None)?;
    Ok(resolve_host_address(&hostname, 0).await?.ip())
}
