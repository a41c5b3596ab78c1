//! Global command vocabulary
//!
//! Commands shared by every script type. Class-level tables are registered
//! first, so anything here wins a name collision by design.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ScriptError;
use crate::interval::IntervalEntry;
use crate::kind;
use crate::registry::{CommandSpec, DispatchPolicy};
use crate::script::{ExecuteOptions, Invocation, Script};
use crate::value::Value;
use crate::wait::{WaitControlBridge, WaitGate};

pub(crate) fn global_commands() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            name: "gosub",
            policy: DispatchPolicy::CountVerboseSkip,
            required_args: 1,
            handler: cmd_gosub,
        },
        CommandSpec {
            name: "exit",
            policy: DispatchPolicy::VerboseSkip,
            required_args: 0,
            handler: cmd_exit,
        },
        CommandSpec {
            name: "interval",
            policy: DispatchPolicy::CountVerboseSkip,
            required_args: 1,
            handler: cmd_interval,
        },
        CommandSpec {
            name: "begin_interval",
            policy: DispatchPolicy::CountVerboseSkip,
            required_args: 0,
            handler: cmd_begin_interval,
        },
        CommandSpec {
            name: "complete_interval",
            policy: DispatchPolicy::CountVerboseSkip,
            required_args: 0,
            handler: cmd_complete_interval,
        },
        CommandSpec {
            name: "sleep",
            policy: DispatchPolicy::CountVerboseSkip,
            required_args: 0,
            handler: cmd_sleep,
        },
        CommandSpec {
            name: "info",
            policy: DispatchPolicy::Skip,
            required_args: 0,
            handler: cmd_info,
        },
    ]
}

/* ===================== Handlers ===================== */

fn cmd_gosub(script: &mut Script, inv: &Invocation) -> Result<Value, ScriptError> {
    let name = inv.str_required(0, "name")?;
    let root = inv.str_opt(1, "root")?;
    let klass = inv.str_opt(2, "klass")?;
    // trailing positionals are bound to the child's main()
    let argv = inv.args.get(3..).unwrap_or_default().to_vec();
    script.gosub(&name, root.as_deref(), klass.as_deref(), argv)?;
    Ok(Value::Null)
}

fn cmd_exit(script: &mut Script, _inv: &Invocation) -> Result<Value, ScriptError> {
    info!("doing EXIT");
    script.cancel();
    Ok(Value::Null)
}

fn cmd_interval(_script: &mut Script, inv: &Invocation) -> Result<Value, ScriptError> {
    Err(ScriptError::InvalidArgument {
        command: inv.command.clone(),
        detail: "interval(..) is only valid as the head of a with block".to_string(),
    })
}

fn cmd_begin_interval(script: &mut Script, inv: &Invocation) -> Result<Value, ScriptError> {
    let duration = inv.num(0, "duration", 0.0)?;
    let name = inv.str_opt(1, "name")?;
    script.begin_interval(duration, name);
    Ok(Value::Null)
}

fn cmd_complete_interval(script: &mut Script, _inv: &Invocation) -> Result<Value, ScriptError> {
    script.complete_interval()?;
    Ok(Value::Null)
}

fn cmd_sleep(script: &mut Script, inv: &Invocation) -> Result<Value, ScriptError> {
    let duration = inv.num(0, "duration", 0.0)?;
    let message = inv.str_opt(1, "message")?;
    script.sleep(duration, message.as_deref());
    Ok(Value::Null)
}

fn cmd_info(script: &mut Script, inv: &Invocation) -> Result<Value, ScriptError> {
    let message = inv
        .get(0, "message")
        .map(|v| v.to_string())
        .unwrap_or_default();
    info!(target: "script", "{}", message);
    script.host.info(&message);
    Ok(Value::Null)
}

/* ===================== Command implementations ===================== */

impl Script {
    /// Begin a named timed wait. The duration always counts toward the
    /// estimate so dry runs estimate correctly; a real timer is armed only
    /// outside test mode.
    pub fn begin_interval(&mut self, duration: f64, label: Option<String>) {
        self.state.add_duration(duration);
        if self.state.is_canceled() {
            return;
        }

        let label = label.unwrap_or_else(|| format!("Interval {}", self.intervals.depth() + 1));

        if self.state.testing_syntax() {
            self.intervals.push(IntervalEntry {
                gate: None,
                done: None,
                label,
            });
            return;
        }

        let gate = WaitGate::spawn(
            duration,
            &label,
            self.state.cancel_token(),
            self.config.block_poll(),
        );
        info!(interval = %label, duration, deadline = %gate.deadline(), "BEGIN INTERVAL");
        let done = gate.done_flag();
        self.intervals.push(IntervalEntry {
            gate: Some(gate),
            done: Some(done),
            label,
        });
    }

    /// Complete the most recently begun interval, blocking until its timer
    /// fires or cancellation is observed.
    pub fn complete_interval(&mut self) -> Result<(), ScriptError> {
        let entry = self
            .intervals
            .pop()
            .ok_or(ScriptError::IntervalUnderflow)?;

        if self.state.testing_syntax() || self.state.is_canceled() {
            return Ok(());
        }

        info!(interval = %entry.label, "COMPLETE INTERVAL waiting");
        if let Some(done) = &entry.done {
            while !done.load(std::sync::atomic::Ordering::SeqCst) {
                if self.state.is_canceled() {
                    break;
                }
                thread::sleep(self.config.interval_poll());
            }
            if !self.state.is_canceled() {
                done.store(false, std::sync::atomic::Ordering::SeqCst);
            }
        }
        Ok(())
    }

    /// Sleep for `duration` seconds. The duration counts toward this
    /// script's estimate and the parent's, so a caller's total includes its
    /// gosub children's sleeps.
    pub fn sleep(&mut self, duration: f64, message: Option<&str>) {
        self.state.add_duration(duration);
        if let Some(parent) = self.state.parent() {
            parent.add_duration(duration);
        }

        if self.state.testing_syntax() || self.state.is_canceled() {
            return;
        }

        info!(duration, "SLEEP");
        let duration = if self.config.debug_sleep {
            debug!(duration, "debug sleep clamp");
            duration.min(0.5)
        } else {
            duration
        };

        if duration > self.config.wait_threshold_secs {
            self.block(duration, message.unwrap_or(""), true);
        } else {
            self.block(duration, "", false);
        }
    }

    /// Block the calling thread. The dialog path goes through the host's
    /// progress indicator and honors its cancel/continue controls; the plain
    /// path polls so cancellation is observed within one poll period.
    fn block(&mut self, timeout: f64, message: &str, dialog: bool) {
        debug!(timeout, dialog, "block started");
        let start = Instant::now();

        if dialog {
            let bridge = WaitControlBridge::new(self.host.clone());
            let control = bridge.acquire(timeout, message);
            self.state.set_wait_control(Some(control.clone()));

            control.join();

            bridge.release(&control);
            self.state.set_wait_control(None);

            if control.is_canceled() {
                self.cancel();
            } else if control.is_continued() {
                info!(
                    elapsed = start.elapsed().as_secs_f64(),
                    "continuing script"
                );
            }
        } else {
            while start.elapsed().as_secs_f64() < timeout {
                if self.state.is_canceled() {
                    break;
                }
                thread::sleep(self.config.block_poll());
            }
        }

        debug!(elapsed = start.elapsed().as_secs_f64(), "block finished");
    }

    /// Invoke a named child script synchronously.
    ///
    /// In test mode the child is bootstrapped and dry-run, and any failure is
    /// wrapped as a gosub error; otherwise the child becomes the active child
    /// for the duration of its run.
    pub fn gosub(
        &mut self,
        name: &str,
        root: Option<&str>,
        klass: Option<&str>,
        argv: Vec<Value>,
    ) -> Result<(), ScriptError> {
        let (root, name) = self.resolve_gosub_target(name, root);
        let path = root.join(&name);
        if !path.is_file() {
            return Err(ScriptError::GosubTargetNotFound { path });
        }

        let kind = match klass {
            None => self.kind.clone(),
            Some(klass_name) => {
                kind::lookup(klass_name).ok_or_else(|| ScriptError::UnknownScriptType {
                    name: klass_name.to_string(),
                })?
            }
        };

        let mut child = Script::new(root, name.clone(), self.host.clone())
            .with_kind(kind)
            .with_config(self.config.clone());
        child.state.set_parent(Arc::downgrade(&self.state));
        child.set_overrides(self.overrides.clone());

        if self.state.testing_syntax() {
            // the child is validated for real even though the caller's
            // checked flag would otherwise be inherited
            child.bootstrap()?;
            child
                .test_with_argv(&argv)
                .map_err(|err| ScriptError::Gosub {
                    script: name,
                    source: Box::new(err),
                })?;
            return Ok(());
        }

        if self.state.is_canceled() {
            return Ok(());
        }

        if self.state.syntax_checked() {
            child.state.mark_syntax_checked();
        }

        info!(child = %name, "doing GOSUB");
        self.state.set_child(Some(child.state.clone()));
        let result = child.execute(ExecuteOptions {
            bootstrap: true,
            trace: self.trace,
            argv,
            on_finished: None,
        });
        self.state.set_child(None);
        result?;

        if !self.state.is_canceled() {
            info!(child = %child.name(), "gosub finished");
        }
        Ok(())
    }

    fn resolve_gosub_target(&self, name: &str, root: Option<&str>) -> (PathBuf, String) {
        let extension = format!(".{}", self.config.script_extension);
        let mut name = name.to_string();
        if !name.ends_with(&extension) {
            name.push_str(&extension);
        }

        match root {
            Some(r) => (PathBuf::from(r), name),
            None => {
                // a separator inside the name selects a nested subdirectory
                // under the caller's own root
                if let Some(sep) = ['/', ':'].iter().find(|c| name.contains(**c)) {
                    let parts: Vec<&str> = name.split(*sep).collect();
                    let mut dir = self.root.clone();
                    for part in &parts[..parts.len() - 1] {
                        dir.push(part);
                    }
                    (dir, parts[parts.len() - 1].to_string())
                } else {
                    (self.root.clone(), name)
                }
            }
        }
    }

    /// Reach an instrument-control service; absence is logged, not fatal.
    pub fn host_action(
        &self,
        protocol: &str,
        name: Option<&str>,
        action: &str,
        args: &[Value],
    ) -> Result<Value, ScriptError> {
        match self.host.get_service(protocol, name) {
            Some(service) => service.invoke(action, args),
            None => {
                warn!(protocol, name, action, "could not find service");
                Ok(Value::Null)
            }
        }
    }
}
