//! Input validation for everything that crosses a trust boundary
//!
//! Hostnames, aliases, and user names end up as SSH argv parts; domains
//! and paths end up in proxy payloads. All of them are validated here
//! before any other crate touches them.

use crate::error::{CommonError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static HOSTNAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").unwrap());

static FQDN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z]{2,63}$").unwrap()
});

/// Allowlist validation for values that become SSH argv parts
pub struct HostnameValidator;

impl HostnameValidator {
    /// Accept only `[A-Za-z0-9._-]`; anything else could smuggle flags
    /// or shell metacharacters into the remote executor
    pub fn validate(value: &str) -> Result<()> {
        if value.is_empty() {
            return Err(CommonError::Validation(
                "Hostname cannot be empty".to_string(),
            ));
        }

        if value.len() > 253 {
            return Err(CommonError::Validation("Hostname is too long".to_string()));
        }

        if value.starts_with('-') {
            return Err(CommonError::Validation(
                "Hostname cannot start with a hyphen".to_string(),
            ));
        }

        if !HOSTNAME_PATTERN.is_match(value) {
            return Err(CommonError::Validation(format!(
                "Hostname contains characters outside [A-Za-z0-9._-]: {}",
                value
            )));
        }

        Ok(())
    }
}

/// Fully qualified domain name validation
pub struct DomainValidator;

impl DomainValidator {
    pub fn validate(domain: &str) -> Result<()> {
        if domain.len() > 253 {
            return Err(CommonError::Validation(format!(
                "Domain is too long: {}",
                domain
            )));
        }

        if !FQDN_PATTERN.is_match(domain) {
            return Err(CommonError::Validation(format!(
                "Not a fully qualified domain name: {}",
                domain
            )));
        }

        Ok(())
    }
}

/// Port number validation
pub struct PortValidator;

impl PortValidator {
    pub fn validate(port: u16) -> Result<()> {
        if port == 0 {
            return Err(CommonError::Validation(
                "Port number cannot be 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a label port segment, range 1-65535
    pub fn parse(value: &str) -> Result<u16> {
        let port: u32 = value
            .parse()
            .map_err(|_| CommonError::Validation(format!("Invalid port: {}", value)))?;

        if port == 0 || port > 65535 {
            return Err(CommonError::Validation(format!(
                "Port out of range 1-65535: {}",
                port
            )));
        }

        Ok(port as u16)
    }
}

/// Backend path validation
pub struct BackendPathValidator;

impl BackendPathValidator {
    pub fn validate(path: &str) -> Result<()> {
        if !path.starts_with('/') {
            return Err(CommonError::Validation(format!(
                "Backend path must be absolute: {}",
                path
            )));
        }

        if path.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(CommonError::Validation(
                "Backend path contains control or whitespace characters".to_string(),
            ));
        }

        Ok(())
    }
}
