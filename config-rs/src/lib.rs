//! config-rs/lib.rs
//! Shared configuration utilities for consistent service configuration
//! Provides standardized functions for port/address management

use std::env;
use std::net::SocketAddr;

/// Get service port from environment variables with proper fallback
///
/// # Arguments
/// * `service_name` - The name of the service (e.g., "COMPILE")
/// * `default_port` - The default port to use if not specified in environment
///
/// # Returns
/// The port number to use for the service
pub fn get_service_port(service_name: &str, default_port: u16) -> u16 {
    let var_name = format!("{}_SERVICE_PORT", service_name.to_uppercase());
    env::var(&var_name)
        .unwrap_or_else(|_| default_port.to_string())
        .parse::<u16>()
        .unwrap_or_else(|_| {
            log::warn!("Invalid port in {}, using default {}", var_name, default_port);
            default_port
        })
}

/// Create a SocketAddr for binding a service
///
/// Checks `{SERVICE}_SERVICE_ADDR` for a full address override first, then
/// falls back to `{SERVICE}_SERVICE_PORT` on the wildcard address.
pub fn get_bind_address(service_name: &str, default_port: u16) -> SocketAddr {
    let var_name = format!("{}_SERVICE_ADDR", service_name.to_uppercase());

    if let Ok(addr_str) = env::var(&var_name) {
        if let Ok(addr) = addr_str.parse::<SocketAddr>() {
            return addr;
        }
        log::warn!("Invalid address format in {}, using default", var_name);
    }

    let port = get_service_port(service_name, default_port);
    SocketAddr::from(([0, 0, 0, 0], port))
}

/// Read an environment variable with a parsed fallback default.
///
/// Used for tunables like timeouts and attempt ceilings where an unset or
/// malformed value must never abort startup.
pub fn get_env_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Get service name for logging and monitoring
pub fn get_formatted_service_name(service_name: &str) -> String {
    match service_name {
        "COMPILE" => "compile-service".to_string(),
        _ => format!("{}-service", service_name.to_lowercase()),
    }
}
