//! Host collaborator
//!
//! The runtime reaches instrument-control objects through a narrow service
//! locator; absence of a match is logged, never fatal. The host also owns the
//! shared wait group and manufactures wait controls for long sleeps.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ScriptError;
use crate::value::Value;
use crate::wait::{TimedWaitControl, WaitControl, WaitGroup};

/// An instrument-control object resolved by protocol name.
pub trait Service: Send + Sync {
    fn invoke(&self, action: &str, args: &[Value]) -> Result<Value, ScriptError>;
}

pub trait Host: Send + Sync {
    /// Resolve a service by protocol, optionally filtered by instance name.
    fn get_service(&self, protocol: &str, name: Option<&str>) -> Option<Arc<dyn Service>>;

    /// Forward a script-authored info message to the host's surface.
    fn info(&self, message: &str);

    fn wait_group(&self) -> &WaitGroup;

    fn make_wait_control(&self, wait_secs: f64, message: &str) -> Arc<dyn WaitControl>;
}

/// Host with no services and a headless wait control; used by the CLI and
/// anywhere a script runs without instruments attached.
#[derive(Default)]
pub struct NullHost {
    waits: WaitGroup,
}

impl NullHost {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Host for NullHost {
    fn get_service(&self, protocol: &str, name: Option<&str>) -> Option<Arc<dyn Service>> {
        debug!(protocol, name, "no services registered");
        None
    }

    fn info(&self, message: &str) {
        info!(target: "script", "{}", message);
    }

    fn wait_group(&self) -> &WaitGroup {
        &self.waits
    }

    fn make_wait_control(&self, wait_secs: f64, message: &str) -> Arc<dyn WaitControl> {
        Arc::new(TimedWaitControl::new(
            wait_secs,
            message,
            Duration::from_millis(50),
        ))
    }
}
