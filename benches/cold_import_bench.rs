// Cold-import benchmark for the startup sandbox
// Measures one full cycle: arm, import every simulated module, first request
// Target: p50 < 1ms, p95 < 5ms

use seedbox::host::import::ModuleHost;
use seedbox::testing::well_known::{well_known_resolver, WELL_KNOWN_MODULES};
use seedbox::{LifecycleController, SandboxConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Benchmark configuration
const ITERATIONS: usize = 200;
const WARMUP_ITERATIONS: usize = 20;

/// Latency percentiles
struct LatencyStats {
    p50: Duration,
    p95: Duration,
    p99: Duration,
    min: Duration,
    max: Duration,
    mean: Duration,
}

impl LatencyStats {
    fn from_samples(mut samples: Vec<Duration>) -> Self {
        samples.sort();
        let len = samples.len();

        let sum: Duration = samples.iter().sum();
        Self {
            p50: samples[len * 50 / 100],
            p95: samples[len * 95 / 100],
            p99: samples[len * 99 / 100],
            min: samples[0],
            max: samples[len - 1],
            mean: sum / len as u32,
        }
    }

    fn print(&self, label: &str) {
        println!("\n{}", label);
        println!("  p50: {:?}", self.p50);
        println!("  p95: {:?}", self.p95);
        println!("  p99: {:?}", self.p99);
        println!("  min: {:?}", self.min);
        println!("  max: {:?}", self.max);
        println!("  mean: {:?}", self.mean);
    }
}

/// One arm/import/transition cycle on a fresh host
fn cold_cycle(config: &SandboxConfig, modules: &[&str]) -> Result<(), String> {
    let host = Arc::new(ModuleHost::new());
    let controller = LifecycleController::from_config(config, Arc::clone(&host), |_| {})
        .map_err(|e| e.to_string())?;
    host.push_resolver(Arc::new(well_known_resolver(controller.state())));

    controller.before_top_level().map_err(|e| e.to_string())?;
    for module in modules {
        host.import(module).map_err(|e| format!("{}: {}", module, e))?;
    }
    controller
        .before_first_request()
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn bench(
    label: &str,
    config: &SandboxConfig,
    modules: &[&str],
    p50_target: Duration,
    p95_target: Duration,
) -> bool {
    for _ in 0..WARMUP_ITERATIONS {
        let _ = cold_cycle(config, modules);
    }

    let mut samples = Vec::with_capacity(ITERATIONS);
    for _ in 0..ITERATIONS {
        let start = Instant::now();
        if let Err(e) = cold_cycle(config, modules) {
            println!("\n=== {} ===\n❌ FAIL: {}", label, e);
            return false;
        }
        samples.push(start.elapsed());
    }

    let stats = LatencyStats::from_samples(samples);
    println!("\n=== {} ===", label);
    stats.print("Latency");

    let passed = stats.p50 < p50_target && stats.p95 < p95_target;
    if passed {
        println!("✅ PASS");
    } else {
        println!(
            "❌ FAIL: p50={:?} (target <{:?}), p95={:?} (target <{:?})",
            stats.p50, p50_target, stats.p95, p95_target
        );
    }
    passed
}

fn main() {
    println!("seedbox cold-import benchmark");
    println!("Iterations: {} (warmup: {})", ITERATIONS, WARMUP_ITERATIONS);

    let builtin = SandboxConfig::default();
    let bare = SandboxConfig {
        builtin_policies: false,
        rust_packages: Vec::new(),
        ..SandboxConfig::default()
    };

    let results = [
        bench(
            "Built-in policies",
            &builtin,
            WELL_KNOWN_MODULES,
            Duration::from_millis(1),
            Duration::from_millis(5),
        ),
        bench(
            "No policies, entropy-free modules only",
            &bare,
            &["numpy.random", "tempfile"],
            Duration::from_millis(1),
            Duration::from_millis(5),
        ),
    ];

    let passed = results.iter().filter(|p| **p).count();
    println!("\nSummary: {}/{} scenarios passed", passed, results.len());
    if passed != results.len() {
        std::process::exit(1);
    }
}
