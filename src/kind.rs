//! Script types
//!
//! A script type contributes class-level commands, declared variables, and
//! lifecycle hooks. Gosub class overrides resolve against the fixed namespace
//! in [`lookup`]; an unresolved name is [`ScriptError::UnknownScriptType`] at
//! the call site.

use std::sync::Arc;
use tracing::info;

use crate::error::ScriptError;
use crate::host::Host;
use crate::registry::{CommandSpec, DispatchPolicy};
use crate::script::{Invocation, Script};
use crate::value::Value;

pub trait ScriptKind: Send + Sync {
    fn name(&self) -> &'static str;

    /// Class-level command table; resolved before the global vocabulary so
    /// the global table wins on collisions.
    fn commands(&self) -> Vec<CommandSpec> {
        Vec::new()
    }

    /// Variables bound into the execution context before overrides.
    fn variables(&self) -> Vec<(&'static str, Value)> {
        Vec::new()
    }

    fn on_cancel(&self, _host: &dyn Host) {}

    fn on_finished(&self, _host: &dyn Host) {}
}

/// Resolve a class-override name from the fixed plugin namespace.
pub fn lookup(name: &str) -> Option<Arc<dyn ScriptKind>> {
    match name {
        "SequenceScript" => Some(Arc::new(SequenceKind)),
        "ExtractionScript" => Some(Arc::new(ExtractionKind)),
        _ => None,
    }
}

/* ===================== Sequence ===================== */

/// Default type: the shared vocabulary only.
pub struct SequenceKind;

impl ScriptKind for SequenceKind {
    fn name(&self) -> &'static str {
        "SequenceScript"
    }
}

/* ===================== Extraction ===================== */

/// Extraction-line scripts: valve control through the host's valve manager.
pub struct ExtractionKind;

pub const VALVE_PROTOCOL: &str = "valve_manager";

impl ScriptKind for ExtractionKind {
    fn name(&self) -> &'static str {
        "ExtractionScript"
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec {
                name: "open",
                policy: DispatchPolicy::VerboseSkip,
                required_args: 1,
                handler: cmd_open,
            },
            CommandSpec {
                name: "close",
                policy: DispatchPolicy::VerboseSkip,
                required_args: 1,
                handler: cmd_close,
            },
        ]
    }

    fn variables(&self) -> Vec<(&'static str, Value)> {
        vec![("extract_device", Value::Str("furnace".to_string()))]
    }

    fn on_cancel(&self, host: &dyn Host) {
        // leave the line in a safe state
        if let Some(valves) = host.get_service(VALVE_PROTOCOL, None) {
            if let Err(err) = valves.invoke("close_all", &[]) {
                tracing::warn!(error = %err, "close_all failed during cancel");
            }
        }
    }

    fn on_finished(&self, _host: &dyn Host) {
        info!("extraction finished");
    }
}

fn cmd_open(script: &mut Script, inv: &Invocation) -> Result<Value, ScriptError> {
    let name = inv.str_required(0, "name")?;
    script.host_action(VALVE_PROTOCOL, None, "open", &[Value::Str(name)])
}

fn cmd_close(script: &mut Script, inv: &Invocation) -> Result<Value, ScriptError> {
    let name = inv.str_required(0, "name")?;
    script.host_action(VALVE_PROTOCOL, None, "close", &[Value::Str(name)])
}
