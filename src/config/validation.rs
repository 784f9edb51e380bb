use crate::config::schema::{DiscoveryConfig, FleetConfig, PoolConfig, SessionConfig};
use crate::error::{FleetError, Result};
use std::path::Path;

/// Validate the editor executable path
pub fn validate_executable(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(FleetError::Validation(format!(
            "Editor executable not found at {:?}",
            path
        )));
    }

    if !path.is_file() {
        return Err(FleetError::Validation(format!(
            "Editor path {:?} is not a file",
            path
        )));
    }

    // On Unix systems, check if executable
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = path.metadata().map_err(|e| {
            FleetError::Validation(format!("Cannot read editor file metadata: {}", e))
        })?;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(FleetError::Validation(format!(
                "Editor executable {:?} is not executable",
                path
            )));
        }
    }

    Ok(())
}

pub fn validate_config(config: &FleetConfig) -> Result<()> {
    validate_pool(&config.pool)?;
    validate_session(&config.session)?;
    validate_discovery(&config.discovery)?;
    Ok(())
}

pub fn validate_pool(pool: &PoolConfig) -> Result<()> {
    if pool.host.trim().is_empty() {
        return Err(FleetError::Validation("Pool host cannot be empty".to_string()));
    }

    if pool.max_connections == 0 {
        return Err(FleetError::Validation(
            "max_connections must be at least 1".to_string(),
        ));
    }

    if pool.retry_count == 0 {
        return Err(FleetError::Validation(
            "retry_count must be at least 1".to_string(),
        ));
    }

    if pool.backoff_base_ms > pool.backoff_max_ms {
        return Err(FleetError::Validation(format!(
            "backoff_base_ms ({}) exceeds backoff_max_ms ({})",
            pool.backoff_base_ms, pool.backoff_max_ms
        )));
    }

    if pool.connect_timeout_ms == 0 || pool.probe_timeout_ms == 0 {
        return Err(FleetError::Validation(
            "Pool timeouts must be non-zero".to_string(),
        ));
    }

    if pool.cleanup_interval_ms == 0 || pool.health_check_interval_ms == 0 {
        return Err(FleetError::Validation(
            "Pool maintenance intervals must be non-zero".to_string(),
        ));
    }

    Ok(())
}

pub fn validate_session(session: &SessionConfig) -> Result<()> {
    if session.readiness_attempts == 0 {
        return Err(FleetError::Validation(
            "readiness_attempts must be at least 1".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_discovery(discovery: &DiscoveryConfig) -> Result<()> {
    if discovery.port_start == 0 || discovery.port_start > discovery.port_end {
        return Err(FleetError::Validation(format!(
            "Invalid discovery port range {}-{}",
            discovery.port_start, discovery.port_end
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executable_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_executable(&dir.path().join("missing")).is_err());
        // A directory is not an executable
        assert!(validate_executable(dir.path()).is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&FleetConfig::default()).is_ok());
    }

    #[test]
    fn test_inverted_backoff_rejected() {
        let pool = PoolConfig {
            backoff_base_ms: 5_000,
            backoff_max_ms: 1_000,
            ..PoolConfig::default()
        };
        assert!(validate_pool(&pool).is_err());
    }

    #[test]
    fn test_zero_retry_count_rejected() {
        let pool = PoolConfig {
            retry_count: 0,
            ..PoolConfig::default()
        };
        assert!(validate_pool(&pool).is_err());
    }

    #[test]
    fn test_port_range() {
        let inverted = DiscoveryConfig {
            port_start: 9400,
            port_end: 9300,
        };
        assert!(validate_discovery(&inverted).is_err());

        let single = DiscoveryConfig {
            port_start: 9222,
            port_end: 9222,
        };
        assert!(validate_discovery(&single).is_ok());
    }
}
