//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{BusConfig, IpcBusConfig, LogOutput, LoggingConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &IpcBusConfig) -> ConfigResult<()> {
    validate_bus_config(&config.bus)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_bus_config(bus: &BusConfig) -> ConfigResult<()> {
    if bus.request_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "bus.request_timeout_ms must be greater than 0",
        ));
    }

    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.file_path is required when logging.output is \"file\"",
        ));
    }

    Ok(())
}
