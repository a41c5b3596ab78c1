//! Script execution
//!
//! A [`Script`] is one loaded automation snippet plus its execution state.
//! `test()` performs a dry pass that validates syntax and accumulates the
//! estimated duration without touching devices or sleeping; `execute()`
//! performs the real pass, dispatching commands through the execution
//! context, spawning wait gates for intervals and sleeps, and recursing into
//! child scripts for gosub.

pub(crate) mod commands;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::error::ScriptError;
use crate::host::Host;
use crate::interval::IntervalStack;
use crate::kind::{ScriptKind, SequenceKind};
use crate::parser::{parse_snippet, Call, Expr, FnDef, Snippet, Stmt};
use crate::registry::{check_arg_count, CommandRegistry, CommandSpec, DispatchPolicy};
use crate::value::Value;
use crate::wait::{CancelToken, WaitControl};

/// Local definitions may call each other; runaway recursion is cut here.
const MAX_CALL_DEPTH: usize = 32;

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/* ===================== Outcome ===================== */

/// Terminal state of a run. Canceled wins over completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptOutcome {
    Running,
    Canceled,
    Completed,
}

/* ===================== Shared control block ===================== */

/// State shared between a script, its relatives, and background threads.
///
/// Parents hold their children through the owning `child` slot; children hold
/// parents through a `Weak` back-reference that never extends the parent's
/// lifetime. Cancellation cascades over these links in both directions,
/// truncation downward only.
pub struct ScriptState {
    name: String,
    cancel: CancelToken,
    truncated: AtomicBool,
    completed: AtomicBool,
    testing_syntax: AtomicBool,
    syntax_checked: AtomicBool,
    estimated_duration: Mutex<f64>,
    parent: Mutex<Weak<ScriptState>>,
    child: Mutex<Option<Arc<ScriptState>>>,
    wait_control: Mutex<Option<Arc<dyn WaitControl>>>,
    cancel_hook: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl ScriptState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cancel: CancelToken::new(),
            truncated: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            testing_syntax: AtomicBool::new(false),
            syntax_checked: AtomicBool::new(false),
            estimated_duration: Mutex::new(0.0),
            parent: Mutex::new(Weak::new()),
            child: Mutex::new(None),
            wait_control: Mutex::new(None),
            cancel_hook: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn testing_syntax(&self) -> bool {
        self.testing_syntax.load(Ordering::SeqCst)
    }

    pub fn syntax_checked(&self) -> bool {
        self.syntax_checked.load(Ordering::SeqCst)
    }

    pub fn outcome(&self) -> ScriptOutcome {
        if self.is_canceled() {
            ScriptOutcome::Canceled
        } else if self.completed() {
            ScriptOutcome::Completed
        } else {
            ScriptOutcome::Running
        }
    }

    pub fn estimated_duration(&self) -> f64 {
        *lock_or_recover(&self.estimated_duration)
    }

    pub fn add_duration(&self, seconds: f64) {
        *lock_or_recover(&self.estimated_duration) += seconds;
    }

    pub fn reset_duration(&self) {
        *lock_or_recover(&self.estimated_duration) = 0.0;
    }

    pub fn parent(&self) -> Option<Arc<ScriptState>> {
        lock_or_recover(&self.parent).upgrade()
    }

    pub fn child(&self) -> Option<Arc<ScriptState>> {
        lock_or_recover(&self.child).clone()
    }

    pub(crate) fn set_parent(&self, parent: Weak<ScriptState>) {
        *lock_or_recover(&self.parent) = parent;
    }

    pub(crate) fn set_child(&self, child: Option<Arc<ScriptState>>) {
        *lock_or_recover(&self.child) = child;
    }

    pub(crate) fn set_wait_control(&self, control: Option<Arc<dyn WaitControl>>) {
        *lock_or_recover(&self.wait_control) = control;
    }

    pub(crate) fn set_cancel_hook(&self, hook: Box<dyn Fn() + Send + Sync>) {
        *lock_or_recover(&self.cancel_hook) = Some(hook);
    }

    pub(crate) fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub(crate) fn mark_syntax_checked(&self) {
        self.syntax_checked.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_testing(&self, testing: bool) {
        self.testing_syntax.store(testing, Ordering::SeqCst);
    }

    fn set_completed(&self) {
        self.completed.store(true, Ordering::SeqCst);
    }

    /// Cleared at the start of each run; `canceled` is monotone only within
    /// a run.
    fn reset_run_flags(&self) {
        self.cancel.clear();
        self.completed.store(false, Ordering::SeqCst);
        self.truncated.store(false, Ordering::SeqCst);
    }

    /// Idempotent. Cascades to the child and the parent (each skipped if
    /// already canceled, which also terminates the cycle), stops a live wait
    /// control, and fires the script-type cleanup hook.
    pub fn cancel(&self) {
        if self.cancel.set() {
            return;
        }
        if let Some(child) = self.child() {
            if !child.is_canceled() {
                child.cancel();
            }
        }
        if let Some(parent) = self.parent() {
            if !parent.is_canceled() {
                parent.cancel();
            }
        }
        if let Some(control) = lock_or_recover(&self.wait_control).clone() {
            control.stop();
        }
        if let Some(hook) = lock_or_recover(&self.cancel_hook).as_ref() {
            hook();
        }
    }

    /// Ends the remainder of this and nested command sets early; never climbs
    /// back to the parent.
    pub fn truncate(&self) {
        self.truncated.store(true, Ordering::SeqCst);
        if let Some(child) = self.child() {
            child.truncate();
        }
    }
}

/* ===================== Invocation ===================== */

/// One command call as seen by a handler.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub command: String,
    pub args: Vec<Value>,
    pub kwargs: HashMap<String, Value>,
}

impl Invocation {
    pub fn new(command: &str, args: Vec<Value>, kwargs: HashMap<String, Value>) -> Self {
        Self {
            command: command.to_string(),
            args,
            kwargs,
        }
    }

    pub fn count(&self) -> usize {
        self.args.len() + self.kwargs.len()
    }

    /// Positional-or-keyword lookup.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.args.get(index).or_else(|| self.kwargs.get(name))
    }

    pub fn num(&self, index: usize, name: &str, default: f64) -> Result<f64, ScriptError> {
        match self.get(index, name) {
            None => Ok(default),
            Some(v) => v.as_num().ok_or_else(|| ScriptError::InvalidArgument {
                command: self.command.clone(),
                detail: format!("{} must be a number", name),
            }),
        }
    }

    pub fn str_opt(&self, index: usize, name: &str) -> Result<Option<String>, ScriptError> {
        match self.get(index, name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(ScriptError::InvalidArgument {
                command: self.command.clone(),
                detail: format!("{} must be a string", name),
            }),
        }
    }

    pub fn str_required(&self, index: usize, name: &str) -> Result<String, ScriptError> {
        self.str_opt(index, name)?
            .ok_or_else(|| ScriptError::InvalidArgument {
                command: self.command.clone(),
                detail: format!("{} is required", name),
            })
    }
}

/* ===================== Execution context ===================== */

/// A name visible to the snippet.
#[derive(Debug, Clone)]
pub enum Binding {
    Command(CommandSpec),
    Variable(Value),
}

/// The snippet's global namespace: resolved commands, script-type variables,
/// then caller-supplied overrides. Later keys win.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    bindings: HashMap<String, Binding>,
}

impl ExecutionContext {
    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(|k| k.as_str())
    }
}

/* ===================== Execute options ===================== */

pub struct ExecuteOptions {
    /// Reload source and reset the interval stack before running.
    pub bootstrap: bool,
    /// Log each statement as it executes.
    pub trace: bool,
    pub argv: Vec<Value>,
    pub on_finished: Option<Box<dyn FnOnce() + Send>>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            bootstrap: true,
            trace: false,
            argv: Vec::new(),
            on_finished: None,
        }
    }
}

/// Handle to a script running on a background thread.
pub struct ScriptHandle {
    state: Arc<ScriptState>,
    join: JoinHandle<(Script, bool)>,
}

impl ScriptHandle {
    pub fn cancel(&self) {
        self.state.cancel();
    }

    pub fn outcome(&self) -> ScriptOutcome {
        self.state.outcome()
    }

    pub fn estimated_duration(&self) -> f64 {
        self.state.estimated_duration()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run; yields the script back and whether it completed.
    pub fn join(self) -> thread::Result<(Script, bool)> {
        self.join.join()
    }
}

/* ===================== Script ===================== */

pub struct Script {
    pub(crate) root: PathBuf,
    pub(crate) name: String,
    pub(crate) text: String,
    pub(crate) host: Arc<dyn Host>,
    pub(crate) kind: Arc<dyn ScriptKind>,
    pub(crate) config: RuntimeConfig,
    pub(crate) registry: CommandRegistry,
    pub(crate) state: Arc<ScriptState>,
    pub(crate) intervals: IntervalStack,
    pub(crate) overrides: HashMap<String, Value>,
    pub(crate) trace: bool,
    last_error: Option<ScriptError>,
}

impl Script {
    pub fn new(root: impl Into<PathBuf>, name: impl Into<String>, host: Arc<dyn Host>) -> Self {
        let name = name.into();
        let kind: Arc<dyn ScriptKind> = Arc::new(SequenceKind);
        let mut script = Self {
            root: root.into(),
            state: Arc::new(ScriptState::new(&name)),
            name,
            text: String::new(),
            host,
            registry: Self::build_registry(kind.as_ref()),
            kind,
            config: RuntimeConfig::default(),
            intervals: IntervalStack::new(),
            overrides: HashMap::new(),
            trace: false,
            last_error: None,
        };
        script.install_cancel_hook();
        script
    }

    pub fn with_kind(mut self, kind: Arc<dyn ScriptKind>) -> Self {
        self.set_kind(kind);
        self
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn set_kind(&mut self, kind: Arc<dyn ScriptKind>) {
        self.registry = Self::build_registry(kind.as_ref());
        self.kind = kind;
        self.install_cancel_hook();
    }

    pub fn set_config(&mut self, config: RuntimeConfig) {
        self.config = config;
    }

    /// Replace the loaded source; used for in-memory scripts.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn to_blob(&self) -> &str {
        &self.text
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(&self.name)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> &Arc<ScriptState> {
        &self.state
    }

    pub fn outcome(&self) -> ScriptOutcome {
        self.state.outcome()
    }

    pub fn estimated_duration(&self) -> f64 {
        self.state.estimated_duration()
    }

    pub fn interval_depth(&self) -> usize {
        self.intervals.depth()
    }

    pub fn last_error(&self) -> Option<&ScriptError> {
        self.last_error.as_ref()
    }

    /// Merge caller-supplied bindings into the execution context.
    pub fn setup_context(&mut self, bindings: HashMap<String, Value>) {
        self.overrides.extend(bindings);
    }

    pub(crate) fn set_overrides(&mut self, overrides: HashMap<String, Value>) {
        self.overrides = overrides;
    }

    fn build_registry(kind: &dyn ScriptKind) -> CommandRegistry {
        let mut registry = CommandRegistry::new();
        for spec in kind.commands() {
            registry.register(spec);
        }
        for spec in commands::global_commands() {
            registry.register(spec);
        }
        registry
    }

    fn install_cancel_hook(&mut self) {
        let kind = self.kind.clone();
        let host = self.host.clone();
        self.state
            .set_cancel_hook(Box::new(move || kind.on_cancel(host.as_ref())));
    }

    /// Load the source text and reset the interval stack. A missing file is
    /// an error unless in-memory text was already supplied.
    pub fn bootstrap(&mut self) -> Result<(), ScriptError> {
        self.intervals.clear();
        if self.root.as_os_str().is_empty() || self.name.is_empty() {
            return Ok(());
        }
        let path = self.path();
        if path.is_file() {
            self.text = fs::read_to_string(&path)?;
        } else if self.text.is_empty() {
            return Err(ScriptError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("script not found: {}", path.display()),
            )));
        }
        Ok(())
    }

    /// True when the on-disk source differs from the loaded text.
    pub fn check_for_modifications(&self) -> Result<bool, ScriptError> {
        let current = fs::read_to_string(self.path())?;
        Ok(current != self.text)
    }

    /* ===================== Test / estimate ===================== */

    pub fn test(&mut self) -> Result<(), ScriptError> {
        self.test_with_argv(&[])
    }

    /// Dry pass: validates syntax and computes timing without device actions
    /// or real sleeping. Latches `syntax_checked`; subsequent calls are
    /// no-ops.
    pub fn test_with_argv(&mut self, argv: &[Value]) -> Result<(), ScriptError> {
        if self.state.syntax_checked() {
            return Ok(());
        }
        self.state.mark_syntax_checked();
        self.state.set_testing(true);

        if let Err(err) = self.run_pass(argv) {
            info!(script = %self.name, error = %err, "invalid syntax");
            return Err(match err {
                gosub @ ScriptError::Gosub { .. } => gosub,
                other => ScriptError::Syntax {
                    script: self.name.clone(),
                    detail: other.to_string(),
                },
            });
        }

        if !self.intervals.is_empty() {
            self.intervals.clear();
            return Err(ScriptError::UnterminatedInterval {
                script: self.name.clone(),
            });
        }

        info!(script = %self.name, "syntax checking passed");
        self.state.set_testing(false);
        Ok(())
    }

    pub fn syntax_ok(&mut self) -> bool {
        match self.test() {
            Ok(()) => true,
            Err(err) => {
                warn!(script = %self.name, error = %err, "syntax check failed");
                false
            }
        }
    }

    /// Accumulated dry-run estimate, running `test()` first if needed.
    pub fn calculate_estimated_duration(&mut self) -> Result<f64, ScriptError> {
        if !self.state.syntax_checked() {
            debug!(script = %self.name, "estimated duration requires a dry run");
            self.state.reset_duration();
            self.test()?;
        }
        Ok(self.state.estimated_duration())
    }

    /* ===================== Execute ===================== */

    /// Run the script synchronously. Test failures and I/O errors propagate;
    /// errors raised by the snippet body are caught at this boundary, logged,
    /// and recorded as the run's error result. Returns the completion flag.
    pub fn execute(&mut self, opts: ExecuteOptions) -> Result<bool, ScriptError> {
        if opts.bootstrap {
            self.bootstrap()?;
        }
        if !self.state.syntax_checked() {
            self.test_with_argv(&opts.argv)?;
        }

        self.trace = opts.trace;
        if let Err(err) = self.run_pass(&opts.argv) {
            warn!(script = %self.name, error = %err, "script run failed");
            self.last_error = Some(err);
        }

        if let Some(callback) = opts.on_finished {
            callback();
        }
        self.finished();
        Ok(self.state.completed())
    }

    /// Run on a background thread; the returned handle can cancel and join.
    pub fn execute_background(mut self, opts: ExecuteOptions) -> ScriptHandle {
        let state = self.state.clone();
        let join = thread::spawn(move || {
            let completed = match self.execute(opts) {
                Ok(done) => done,
                Err(err) => {
                    warn!(script = %self.name, error = %err, "background run failed");
                    false
                }
            };
            (self, completed)
        });
        ScriptHandle { state, join }
    }

    pub fn cancel(&self) {
        self.state.cancel();
    }

    /// End the remainder of this and nested command sets early; not an error
    /// and not a cancellation.
    pub fn truncate(&self, style: Option<&str>) {
        debug!(script = %self.name, style, "truncate requested");
        self.state.truncate();
    }

    fn finished(&mut self) {
        debug!(script = %self.name, outcome = ?self.state.outcome(), "finished");
        self.kind.on_finished(self.host.as_ref());
    }

    /// One pass over the snippet. Flags are reset here, so `canceled` is
    /// monotone only within a single run.
    fn run_pass(&mut self, argv: &[Value]) -> Result<(), ScriptError> {
        self.state.reset_run_flags();

        self.run_snippet(argv)?;

        if self.state.testing_syntax() {
            return Ok(());
        }
        if self.state.is_canceled() {
            info!(script = %self.name, "canceled");
        } else {
            info!(script = %self.name, "completed successfully");
            self.state.set_completed();
        }
        Ok(())
    }

    /* ===================== Interpreter ===================== */

    pub(crate) fn build_context(&self) -> ExecutionContext {
        let mut bindings = HashMap::new();
        for spec in self.registry.entries() {
            bindings.insert(spec.name.to_string(), Binding::Command(*spec));
        }
        for (name, value) in self.kind.variables() {
            bindings.insert(name.to_string(), Binding::Variable(value));
        }
        for (name, value) in &self.overrides {
            bindings.insert(name.clone(), Binding::Variable(value.clone()));
        }
        ExecutionContext { bindings }
    }

    fn run_snippet(&mut self, argv: &[Value]) -> Result<(), ScriptError> {
        let snippet = parse_snippet(&self.text)?;
        let context = self.build_context();

        let main = snippet
            .def("main")
            .ok_or_else(|| ScriptError::EntryPointMissing {
                script: self.name.clone(),
            })?;

        let locals = bind_params(main, argv);
        self.exec_block(&snippet, &context, &main.body, &locals, 0)
    }

    fn exec_block(
        &mut self,
        snippet: &Snippet,
        context: &ExecutionContext,
        body: &[Stmt],
        locals: &HashMap<String, Value>,
        depth: usize,
    ) -> Result<(), ScriptError> {
        for stmt in body {
            match stmt {
                Stmt::Call(call) => {
                    self.exec_call(snippet, context, locals, call, depth)?;
                }
                Stmt::With { head, body } => {
                    self.exec_with(snippet, context, locals, head, body, depth)?;
                }
            }
        }
        Ok(())
    }

    /// Scoped interval: acquire is `begin_interval`, release is
    /// `complete_interval`, and release runs on every exit path.
    fn exec_with(
        &mut self,
        snippet: &Snippet,
        context: &ExecutionContext,
        locals: &HashMap<String, Value>,
        head: &Call,
        body: &[Stmt],
        depth: usize,
    ) -> Result<(), ScriptError> {
        if head.name != "interval" {
            return Err(ScriptError::InvalidArgument {
                command: head.name.clone(),
                detail: "only interval(..) may head a with block".to_string(),
            });
        }
        let interval_spec =
            context
                .lookup("interval")
                .and_then(|b| match b {
                    Binding::Command(spec) => Some(*spec),
                    Binding::Variable(_) => None,
                })
                .ok_or_else(|| ScriptError::UnknownName {
                    name: "interval".to_string(),
                })?;

        let invocation = self.build_invocation(context, locals, head)?;
        check_arg_count("interval", interval_spec.required_args, invocation.count())?;

        self.dispatch_named(context, "begin_interval", invocation)?;
        let result = self.exec_block(snippet, context, body, locals, depth);
        let release = self.dispatch_named(
            context,
            "complete_interval",
            Invocation::new("complete_interval", Vec::new(), HashMap::new()),
        );
        result.and(release.map(|_| ()))
    }

    fn exec_call(
        &mut self,
        snippet: &Snippet,
        context: &ExecutionContext,
        locals: &HashMap<String, Value>,
        call: &Call,
        depth: usize,
    ) -> Result<Value, ScriptError> {
        if self.trace {
            debug!(line = call.line, command = %call.name, "trace");
        }

        // snippet-local definitions shadow the context
        if let Some(def) = snippet.def(&call.name) {
            if depth >= MAX_CALL_DEPTH {
                return Err(ScriptError::RecursionLimit {
                    limit: MAX_CALL_DEPTH,
                });
            }
            let invocation = self.build_invocation(context, locals, call)?;
            let locals = bind_def_args(def, &invocation)?;
            self.exec_block(snippet, context, &def.body, &locals, depth + 1)?;
            return Ok(Value::Null);
        }

        match context.lookup(&call.name) {
            Some(Binding::Command(spec)) => {
                let spec = *spec;
                let invocation = self.build_invocation(context, locals, call)?;
                self.dispatch(spec, invocation)
            }
            Some(Binding::Variable(_)) => Err(ScriptError::NotCallable {
                name: call.name.clone(),
            }),
            None => Err(ScriptError::UnknownName {
                name: call.name.clone(),
            }),
        }
    }

    fn build_invocation(
        &self,
        context: &ExecutionContext,
        locals: &HashMap<String, Value>,
        call: &Call,
    ) -> Result<Invocation, ScriptError> {
        let mut args = Vec::with_capacity(call.args.len());
        for expr in &call.args {
            args.push(eval_expr(context, locals, expr)?);
        }
        let mut kwargs = HashMap::with_capacity(call.kwargs.len());
        for (name, expr) in &call.kwargs {
            kwargs.insert(name.clone(), eval_expr(context, locals, expr)?);
        }
        Ok(Invocation::new(&call.name, args, kwargs))
    }

    fn dispatch_named(
        &mut self,
        context: &ExecutionContext,
        name: &str,
        invocation: Invocation,
    ) -> Result<Value, ScriptError> {
        match context.lookup(name) {
            Some(Binding::Command(spec)) => {
                let spec = *spec;
                self.dispatch(spec, invocation)
            }
            _ => Err(ScriptError::UnknownName {
                name: name.to_string(),
            }),
        }
    }

    /// Shared dispatch routine; branches on the command's guard policy.
    pub(crate) fn dispatch(
        &mut self,
        spec: CommandSpec,
        invocation: Invocation,
    ) -> Result<Value, ScriptError> {
        let state = self.state.clone();
        match spec.policy {
            DispatchPolicy::Skip => {
                if state.testing_syntax() || state.is_canceled() || state.is_truncated() {
                    return Ok(Value::Null);
                }
            }
            DispatchPolicy::VerboseSkip => {
                check_arg_count(spec.name, spec.required_args, invocation.count())?;
                if state.testing_syntax() || state.is_canceled() || state.is_truncated() {
                    return Ok(Value::Null);
                }
                debug!(command = spec.name, args = ?invocation.args, kwargs = ?invocation.kwargs, "dispatch");
            }
            DispatchPolicy::CountVerboseSkip => {
                if state.is_canceled() || state.is_truncated() {
                    return Ok(Value::Null);
                }
                check_arg_count(spec.name, spec.required_args, invocation.count())?;
                if state.testing_syntax() {
                    // dry run: the handler accumulates duration only
                    return (spec.handler)(self, &invocation);
                }
                debug!(command = spec.name, args = ?invocation.args, kwargs = ?invocation.kwargs, "dispatch");
            }
        }
        (spec.handler)(self, &invocation)
    }
}

fn bind_params(def: &FnDef, argv: &[Value]) -> HashMap<String, Value> {
    def.params
        .iter()
        .enumerate()
        .map(|(i, p)| (p.clone(), argv.get(i).cloned().unwrap_or(Value::Null)))
        .collect()
}

fn bind_def_args(def: &FnDef, invocation: &Invocation) -> Result<HashMap<String, Value>, ScriptError> {
    check_arg_count(&def.name, def.params.len(), invocation.count())?;
    if invocation.args.len() > def.params.len() {
        return Err(ScriptError::InvalidArgument {
            command: def.name.clone(),
            detail: format!("takes at most {} arguments", def.params.len()),
        });
    }

    let mut locals = HashMap::new();
    for (i, param) in def.params.iter().enumerate() {
        match invocation.args.get(i).or_else(|| invocation.kwargs.get(param)) {
            Some(value) => {
                locals.insert(param.clone(), value.clone());
            }
            None => {
                return Err(ScriptError::InvalidArgument {
                    command: def.name.clone(),
                    detail: format!("missing argument {}", param),
                })
            }
        }
    }
    Ok(locals)
}

fn eval_expr(
    context: &ExecutionContext,
    locals: &HashMap<String, Value>,
    expr: &Expr,
) -> Result<Value, ScriptError> {
    match expr {
        Expr::Lit(value) => Ok(value.clone()),
        Expr::Ident(name) => {
            if let Some(value) = locals.get(name) {
                return Ok(value.clone());
            }
            match context.lookup(name) {
                Some(Binding::Variable(value)) => Ok(value.clone()),
                Some(Binding::Command(_)) => Err(ScriptError::NotCallable { name: name.clone() }),
                None => Err(ScriptError::UnknownName { name: name.clone() }),
            }
        }
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
