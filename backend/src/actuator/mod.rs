pub mod serial;

use std::sync::Arc;

use shared::Category;

use crate::config::ActuatorConfig;
use serial::{SerialActuator, SerialPortOpener};

#[derive(Debug, thiserror::Error)]
pub enum ActuatorError {
    #[error("Serial link unavailable: {0}")]
    Unavailable(String),
    #[error("Serial write timed out")]
    Timeout,
    #[error("Serial write failed: {0}")]
    Write(#[source] std::io::Error),
}

impl From<std::io::Error> for ActuatorError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => ActuatorError::Timeout,
            _ => ActuatorError::Write(err),
        }
    }
}

/// Line the microcontroller expects for each category.
pub fn command_for(category: Category) -> &'static [u8] {
    match category {
        Category::Cat => b"G\n",
        Category::Dog => b"P\n",
        Category::Unknown => b"U\n",
    }
}

/// Drives the external device. `signal` is best-effort: failures are
/// logged by the implementation and never reach the caller.
pub trait Actuator: Send + Sync {
    fn signal(&self, category: Category);

    fn is_enabled(&self) -> bool {
        true
    }

    fn close(&self) {}
}

/// Used when no device is attached.
pub struct NoopActuator;

impl Actuator for NoopActuator {
    fn signal(&self, category: Category) {
        log::debug!("Actuator disabled, not signalling {}", category);
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

pub fn from_config(config: &ActuatorConfig) -> Arc<dyn Actuator> {
    if !config.enabled {
        log::info!("Actuator disabled by configuration");
        return Arc::new(NoopActuator);
    }

    let actuator = SerialActuator::new(
        SerialPortOpener::from_config(config),
        config.reconnect_backoff(),
    );
    // The device is expected at startup, but a missing one only disables
    // signalling until a later reconnect succeeds.
    if let Err(e) = actuator.connect() {
        log::warn!("Actuator not available at startup: {}", e);
    }
    Arc::new(actuator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_single_letters_with_newline() {
        assert_eq!(command_for(Category::Cat), b"G\n");
        assert_eq!(command_for(Category::Dog), b"P\n");
        assert_eq!(command_for(Category::Unknown), b"U\n");
    }

    #[test]
    fn timeouts_are_classified() {
        let err = ActuatorError::from(std::io::Error::from(std::io::ErrorKind::TimedOut));
        assert!(matches!(err, ActuatorError::Timeout));
        let err = ActuatorError::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(matches!(err, ActuatorError::Write(_)));
    }

    #[test]
    fn disabled_config_yields_noop() {
        let config = ActuatorConfig {
            enabled: false,
            ..ActuatorConfig::default()
        };
        let actuator = from_config(&config);
        assert!(!actuator.is_enabled());
        actuator.signal(Category::Cat);
        actuator.close();
    }
}
