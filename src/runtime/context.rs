//! Runtime Context
//!
//! Everything the scheduler and the frame walker need, assembled once at
//! startup and passed to their constructors:
//!
//! - the configuration
//! - the selected compiler and stack introspector
//! - the listener dispatcher
//! - typed optional capabilities

use std::sync::Arc;

use tracing::debug;

use super::compiler::Compiler;
use super::config::RuntimeConfig;
use super::error::{RuntimeError, RuntimeResult};
use super::listener::{CompilationListener, ListenerDispatcher, TracingListener};
use super::providers::{Capabilities, ProviderDescriptor, ProviderRegistry};
use crate::frames::{ShadowStack, StackIntrospector};

pub struct RuntimeContext {
    config: RuntimeConfig,
    compiler: Arc<dyn Compiler>,
    compiler_name: &'static str,
    introspector: Arc<dyn StackIntrospector>,
    introspector_name: &'static str,
    listeners: Arc<ListenerDispatcher>,
    capabilities: Capabilities,
}

impl RuntimeContext {
    pub fn builder() -> RuntimeContextBuilder {
        RuntimeContextBuilder::default()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn compiler(&self) -> &Arc<dyn Compiler> {
        &self.compiler
    }

    pub fn compiler_name(&self) -> &'static str {
        self.compiler_name
    }

    pub fn introspector(&self) -> &Arc<dyn StackIntrospector> {
        &self.introspector
    }

    pub fn introspector_name(&self) -> &'static str {
        self.introspector_name
    }

    pub fn listeners(&self) -> &Arc<ListenerDispatcher> {
        &self.listeners
    }

    /// Look up an optional capability; `None` if it was not supplied.
    pub fn capability<T: std::any::Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.capabilities.get::<T>()
    }
}

#[derive(Default)]
pub struct RuntimeContextBuilder {
    config: RuntimeConfig,
    compilers: ProviderRegistry<dyn Compiler>,
    introspectors: ProviderRegistry<dyn StackIntrospector>,
    listeners: Vec<Arc<dyn CompilationListener>>,
    capabilities: Capabilities,
}

impl RuntimeContextBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn compiler(mut self, descriptor: ProviderDescriptor<dyn Compiler>) -> Self {
        self.compilers.register(descriptor);
        self
    }

    pub fn introspector(mut self, descriptor: ProviderDescriptor<dyn StackIntrospector>) -> Self {
        self.introspectors.register(descriptor);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn CompilationListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn capability<T: std::any::Any + Send + Sync>(mut self, capability: Arc<T>) -> Self {
        self.capabilities.insert(capability);
        self
    }

    /// Select providers and assemble the context.
    ///
    /// A compiler provider is required. Without an introspector provider
    /// the thread-local [`ShadowStack`] is used.
    pub fn build(self) -> RuntimeResult<RuntimeContext> {
        let compiler = self
            .compilers
            .select()
            .cloned()
            .ok_or(RuntimeError::MissingProvider("compiler"))?;

        let introspector = self.introspectors.select().cloned().unwrap_or_else(|| {
            ProviderDescriptor::new("shadow-stack", 0, Arc::new(ShadowStack) as Arc<dyn StackIntrospector>)
        });

        let listeners = Arc::new(ListenerDispatcher::new());
        if self.config.trace_compilation {
            listeners.add(Arc::new(TracingListener));
        }
        for listener in self.listeners {
            listeners.add(listener);
        }

        debug!(
            target: "tierjit::queue",
            compiler = compiler.name,
            introspector = introspector.name,
            listeners = listeners.len(),
            "Runtime context assembled"
        );

        Ok(RuntimeContext {
            config: self.config,
            compiler: compiler.provider,
            compiler_name: compiler.name,
            introspector: introspector.provider,
            introspector_name: introspector.name,
            listeners,
            capabilities: self.capabilities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::compiler::{CompileRequest, CompiledArtifact};
    use crate::runtime::error::CompileError;

    struct Null;

    impl Compiler for Null {
        fn compile(&self, _request: &CompileRequest<'_>) -> Result<CompiledArtifact, CompileError> {
            Ok(CompiledArtifact::default())
        }
    }

    fn null(name: &'static str, priority: i32) -> ProviderDescriptor<dyn Compiler> {
        ProviderDescriptor::new(name, priority, Arc::new(Null) as Arc<dyn Compiler>)
    }

    #[test]
    fn test_missing_compiler() {
        let err = RuntimeContext::builder().build().err().unwrap();
        assert!(matches!(err, RuntimeError::MissingProvider("compiler")));
    }

    #[test]
    fn test_selects_highest_priority_compiler() {
        let context = RuntimeContext::builder()
            .compiler(null("baseline", 1))
            .compiler(null("optimizing", 5))
            .build()
            .unwrap();

        assert_eq!(context.compiler_name(), "optimizing");
        assert_eq!(context.introspector_name(), "shadow-stack");
    }

    #[test]
    fn test_trace_listener_installed() {
        let context = RuntimeContext::builder()
            .config(RuntimeConfig::default().with_trace())
            .compiler(null("c", 0))
            .build()
            .unwrap();
        assert_eq!(context.listeners().len(), 1);
    }

    #[test]
    fn test_capabilities_are_optional() {
        struct LoopUnrollHint(usize);

        let context = RuntimeContext::builder()
            .compiler(null("c", 0))
            .capability(Arc::new(LoopUnrollHint(4)))
            .build()
            .unwrap();

        assert_eq!(context.capability::<LoopUnrollHint>().map(|h| h.0), Some(4));
        assert!(context.capability::<String>().is_none());
    }
}
