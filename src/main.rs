//! TierJIT - Compilation Scheduler Simulation
//!
//! Builds a synthetic call graph, drives it through the tiered compile
//! queue (first tier for everything, then last tier for everything) and
//! prints the queue statistics.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::info;
use tracing_subscriber::filter::EnvFilter;

use tierjit::compile::CallTarget;
use tierjit::runtime::{
    CompileError, CompileRequest, CompiledArtifact, Compiler, JitRuntime, ProviderDescriptor,
    RuntimeConfig, RuntimeContext,
};

#[derive(Parser, Debug)]
#[command(name = "tierjit", version, about = "Tiered JIT compile scheduler simulation")]
struct Cli {
    /// Runtime configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of call targets in the synthetic program
    #[arg(long, default_value_t = 64)]
    targets: usize,

    /// Call sites per target
    #[arg(long, default_value_t = 3)]
    fan_out: usize,

    /// Compiler threads (overrides the configuration file)
    #[arg(long)]
    threads: Option<usize>,

    /// Simulated compile cost per AST node, in microseconds
    #[arg(long, default_value_t = 20)]
    cost_us: u64,

    /// Log every compilation event
    #[arg(short, long)]
    verbose: bool,
}

/// Pretends to generate code: sleeps in proportion to the plan's size,
/// polling for cancellation between "passes".
struct SimulatedCompiler {
    cost_per_node: Duration,
}

impl Compiler for SimulatedCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<CompiledArtifact, CompileError> {
        let inlined_size: u32 = request
            .inlining
            .iter()
            .filter(|(_, node)| node.should_inline)
            .map(|(_, node)| node.profile.callee_size)
            .sum();

        for _pass in 0..4 {
            request.checkpoint()?;
            thread::sleep(self.cost_per_node * inlined_size / 4);
        }

        if inlined_size > 2_000 {
            return Err(CompileError::permanent("graph too large"));
        }
        Ok(CompiledArtifact {
            code_size: inlined_size as usize * 12,
            inlined_calls: request.inlining.inlined_count(),
        })
    }
}

/// Deterministic call graph: target `i` calls `fan_out` targets further along (wrapping).
fn build_program(targets: usize, fan_out: usize) -> Vec<Arc<CallTarget>> {
    let program: Vec<_> = (0..targets)
        .map(|i| CallTarget::new(format!("fn{}", i), 10 + (i as u32 * 37) % 120))
        .collect();

    for (i, caller) in program.iter().enumerate() {
        for j in 0..fan_out {
            let callee = (i + 1 + j * 7 + (i * 13) % 5) % targets;
            let site = caller.add_call_site(&program[callee]);
            site.set_call_count(((i * 31 + j * 17) % 400) as u64);
        }
    }
    program
}

fn load_config(cli: &Cli) -> RuntimeConfig {
    let mut config = match &cli.config {
        Some(path) => match RuntimeConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        },
        None => RuntimeConfig::default(),
    };
    if let Some(threads) = cli.threads {
        config.compiler_threads = threads;
    }
    if cli.verbose {
        config = config.with_trace();
    }
    config
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = load_config(&cli);
    let compiler: Arc<dyn Compiler> = Arc::new(SimulatedCompiler {
        cost_per_node: Duration::from_micros(cli.cost_us),
    });
    let context = match RuntimeContext::builder()
        .config(config)
        .compiler(ProviderDescriptor::new("simulated", 0, compiler))
        .build()
    {
        Ok(context) => context,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let runtime = JitRuntime::new(context);
    let program = build_program(cli.targets.max(1), cli.fan_out);
    info!(targets = program.len(), fan_out = cli.fan_out, "Program built");

    let start = Instant::now();
    for last_tier in [false, true] {
        let tasks: Vec<_> = program
            .iter()
            .map(|target| (target, runtime.submit_for_compilation(target, last_tier)))
            .collect();

        for (target, task) in &tasks {
            if let Err(e) = runtime.finish_compilation(target, task, false) {
                eprintln!("Error: {}", e);
            }
        }
    }

    let valid = program.iter().filter(|t| runtime.is_code_valid(t)).count();
    let elapsed = start.elapsed();
    runtime.shutdown();

    println!("{}", runtime.stats());
    println!("Targets with valid code: {}/{}", valid, program.len());
    println!("Elapsed: {:.2?}", elapsed);
}
