//! Shared fixtures for the integration tests.
//!
//! Provides a scripted compiler whose behaviour is chosen per target name,
//! a listener that forwards every event over a channel, and a helper that
//! wires both into a [`JitRuntime`].

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use tierjit::compile::{CallTarget, Tier};
use tierjit::runtime::{
    CancelSource, CompilationListener, CompileError, CompileRequest, CompiledArtifact, Compiler,
    JitRuntime, ProviderDescriptor, RuntimeConfig, RuntimeContext,
};

/// How long a test is willing to wait for an asynchronous event
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// What the scripted compiler does for one target
#[derive(Clone)]
pub enum Step {
    /// Sleep, then succeed
    Delay(Duration),
    /// Block until a message (or disconnect) arrives, then succeed
    Gate(Receiver<()>),
    /// Sleep without ever checking for cancellation, then succeed
    Busy(Duration),
    /// Fail with the given error
    Fail(CompileError),
}

/// Compiler whose outcome per target is scripted by name.
///
/// Unscripted targets compile immediately and successfully.
#[derive(Default)]
pub struct ScriptedCompiler {
    script: Mutex<HashMap<String, Step>>,
    compiled: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

/// Counts one compiler invocation as active until dropped
struct Active<'a>(&'a AtomicUsize);

impl Drop for Active<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedCompiler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, name: &str, step: Step) {
        self.script.lock().insert(name.to_string(), step);
    }

    /// Gate `name` and return the sender that releases it
    pub fn gate(&self, name: &str) -> Sender<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.script(name, Step::Gate(rx));
        tx
    }

    /// Target names in the order the compiler was entered
    pub fn compiled(&self) -> Vec<String> {
        self.compiled.lock().clone()
    }

    /// Most compiler invocations ever in flight at once
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl Compiler for ScriptedCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledArtifact, CompileError> {
        let name = request.target.name().to_string();
        self.compiled.lock().push(name.clone());
        let step = self.script.lock().get(&name).cloned();

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _active = Active(&self.active);

        match step {
            None => {}
            Some(Step::Delay(delay)) => {
                let deadline = Instant::now() + delay;
                while Instant::now() < deadline {
                    request.checkpoint()?;
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
            Some(Step::Gate(gate)) => loop {
                request.checkpoint()?;
                match gate.recv_timeout(Duration::from_millis(5)) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            },
            Some(Step::Busy(delay)) => std::thread::sleep(delay),
            Some(Step::Fail(error)) => return Err(error),
        }

        Ok(CompiledArtifact {
            code_size: request.target.size() as usize,
            inlined_calls: request.inlining.inlined_count(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Queued(String, Tier),
    Started(String, Tier),
    Dequeued { name: String, source: String, reason: String },
    Succeeded(String, Tier),
    Failed(String, Tier),
    Shutdown,
}

/// Forwards every listener callback as an [`Event`]
pub struct RecordingListener {
    tx: Sender<Event>,
}

impl RecordingListener {
    pub fn new() -> (Arc<Self>, Receiver<Event>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Arc::new(Self { tx }), rx)
    }

    fn send(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl CompilationListener for RecordingListener {
    fn on_compilation_queued(&self, target: &CallTarget, tier: Tier) {
        self.send(Event::Queued(target.name().to_string(), tier));
    }

    fn on_compilation_started(&self, target: &CallTarget, tier: Tier) {
        self.send(Event::Started(target.name().to_string(), tier));
    }

    fn on_compilation_dequeued(&self, target: &CallTarget, source: &CancelSource, reason: &str) {
        self.send(Event::Dequeued {
            name: target.name().to_string(),
            source: source.to_string(),
            reason: reason.to_string(),
        });
    }

    fn on_compilation_succeeded(&self, target: &CallTarget, tier: Tier, _: &CompiledArtifact) {
        self.send(Event::Succeeded(target.name().to_string(), tier));
    }

    fn on_compilation_failed(&self, target: &CallTarget, tier: Tier, _: &CompileError) {
        self.send(Event::Failed(target.name().to_string(), tier));
    }

    fn on_shutdown(&self) {
        self.send(Event::Shutdown);
    }
}

/// Block until an event matching `pred` arrives; panics after [`EVENT_TIMEOUT`]
pub fn wait_for(events: &Receiver<Event>, pred: impl Fn(&Event) -> bool) -> Event {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    loop {
        match events.recv_deadline(deadline) {
            Ok(event) if pred(&event) => return event,
            Ok(_) => {}
            Err(_) => panic!("timed out waiting for listener event"),
        }
    }
}

/// Everything received so far, without blocking
pub fn drain(events: &Receiver<Event>) -> Vec<Event> {
    events.try_iter().collect()
}

pub struct Harness {
    pub runtime: JitRuntime,
    pub compiler: Arc<ScriptedCompiler>,
    pub events: Receiver<Event>,
}

/// Runtime with a scripted compiler and a recording listener
pub fn harness(config: RuntimeConfig) -> Harness {
    let compiler = ScriptedCompiler::new();
    let (listener, events) = RecordingListener::new();
    let context = RuntimeContext::builder()
        .config(config)
        .compiler(ProviderDescriptor::new(
            "scripted",
            0,
            Arc::clone(&compiler) as Arc<dyn Compiler>,
        ))
        .listener(listener)
        .build()
        .expect("runtime context should build");

    Harness {
        runtime: JitRuntime::new(context),
        compiler,
        events,
    }
}

pub fn single_threaded() -> RuntimeConfig {
    RuntimeConfig {
        compiler_threads: 1,
        ..Default::default()
    }
}

/// Add a call site from `caller` to `callee` with the given profile count
pub fn call(caller: &Arc<CallTarget>, callee: &Arc<CallTarget>, count: u64) {
    caller.add_call_site(callee).set_call_count(count);
}
