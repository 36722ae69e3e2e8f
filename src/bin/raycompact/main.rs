//! raycompact CLI - drive the compaction pipeline over simulated bounces.

mod sim;

use std::env;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use raycompact::prelude::*;
use sim::BounceOdds;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "profile")]
type TraceGuard = Option<tracing_chrome::FlushGuard>;
#[cfg(not(feature = "profile"))]
type TraceGuard = ();

fn main() {
    let args: Vec<String> = env::args().collect();

    // Parse global flags
    let mut level: Option<&str> = None;
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => level = Some("debug"),
            "-vv" | "--trace" => level = Some("trace"),
            "-q" | "--quiet" => level = Some("error"),
            _ => filtered_args.push(arg),
        }
    }

    let _trace_guard = init_tracing(level);

    if filtered_args.is_empty() {
        print_help();
        return;
    }

    match filtered_args[0] {
        "bench" | "b" => {
            let opts = match BenchOptions::parse(&filtered_args[1..]) {
                Ok(opts) => opts,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    eprintln!("Usage: raycompact bench [--rays N] [--bounces N] ...");
                    std::process::exit(1);
                }
            };
            if let Err(e) = cmd_bench(&opts) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }

        "version" | "--version" | "-V" => print_version(),

        "help" | "h" | "-h" | "--help" => print_help(),

        other => {
            eprintln!("Unknown command: {}", other);
            eprintln!();
            print_help();
            std::process::exit(1);
        }
    }
}

/// Install the fmt subscriber; verbosity flags win over `RUST_LOG`.
fn init_tracing(level: Option<&str>) -> TraceGuard {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false));
    install(registry)
}

#[cfg(not(feature = "profile"))]
fn install<S>(subscriber: S) -> TraceGuard
where
    S: tracing::Subscriber + Send + Sync + 'static,
{
    subscriber.init();
}

/// With `RAYCOMPACT_TRACE=1`, also write a Chrome trace to `trace.json`.
#[cfg(feature = "profile")]
fn install<S>(subscriber: S) -> TraceGuard
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync + 'static,
{
    if env::var("RAYCOMPACT_TRACE").ok().as_deref() != Some("1") {
        subscriber.init();
        return None;
    }

    let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
        .file("trace.json")
        .build();
    subscriber.with(chrome_layer).init();
    Some(guard)
}

fn print_help() {
    println!("raycompact - stable ray stream compaction");
    println!();
    println!("USAGE:");
    println!("    raycompact [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    b, bench [ARGS]               Simulate bounces and compact after each one");
    println!("    version                       Show version and build date");
    println!("    h, help                       Show this help");
    println!();
    println!("BENCH ARGS:");
    println!("    --rays <n>          Primary rays (default 1048576)");
    println!("    --bounces <n>       Bounce budget per path (default 8)");
    println!("    --miss <p>          Per-bounce miss probability (default 0.3)");
    println!("    --light <p>         Per-bounce light hit probability (default 0.05)");
    println!("    --seed <n>          RNG seed (default 42)");
    println!("    --group-size <n>    Lanes per thread group, power of two (default 512)");
    println!("    --config <file>     JSON compaction config");
    println!("    --gpu               Run on the GPU backend (needs --features gpu)");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose    Show debug output");
    println!("    -vv, --trace     Show per-stage trace output");
    println!("    -q, --quiet      Only show errors");
    println!();
    println!("EXAMPLES:");
    println!("    raycompact bench                              # 1M rays, CPU");
    println!("    raycompact bench --rays 5000000 --bounces 4   # Larger wavefront");
    println!("    raycompact -v bench --group-size 256 --gpu    # GPU, verbose");
    println!();
    println!("NOTES:");
    println!("    - RUST_LOG is honoured when no verbosity flag is given");
    println!("    - RAYCOMPACT_TRACE=1 writes trace.json (needs --features profile)");
}

fn print_version() {
    println!(
        "raycompact {} (built {} {})",
        env!("CARGO_PKG_VERSION"),
        env!("RAYCOMPACT_BUILD_DATE"),
        env!("RAYCOMPACT_BUILD_TIME")
    );
}

/// Parsed `bench` arguments.
#[derive(Debug, Clone)]
struct BenchOptions {
    rays: usize,
    bounces: u32,
    odds: BounceOdds,
    group_size: Option<u32>,
    config: Option<PathBuf>,
    gpu: bool,
}

impl Default for BenchOptions {
    fn default() -> Self {
        Self {
            rays: 1 << 20,
            bounces: 8,
            odds: BounceOdds { miss: 0.3, light: 0.05, seed: 42 },
            group_size: None,
            config: None,
            gpu: false,
        }
    }
}

impl BenchOptions {
    fn parse(args: &[&str]) -> std::result::Result<Self, String> {
        fn value<T: std::str::FromStr>(flag: &str, v: Option<&&str>) -> std::result::Result<T, String> {
            let v = v.ok_or_else(|| format!("missing value for {}", flag))?;
            v.parse().map_err(|_| format!("invalid value for {}: {}", flag, v))
        }

        let mut opts = Self::default();
        let mut it = args.iter();
        while let Some(&arg) = it.next() {
            match arg {
                "--rays" => opts.rays = value(arg, it.next())?,
                "--bounces" => opts.bounces = value(arg, it.next())?,
                "--miss" => opts.odds.miss = value(arg, it.next())?,
                "--light" => opts.odds.light = value(arg, it.next())?,
                "--seed" => opts.odds.seed = value(arg, it.next())?,
                "--group-size" => opts.group_size = Some(value(arg, it.next())?),
                "--config" => opts.config = Some(PathBuf::from(value::<String>(arg, it.next())?)),
                "--gpu" => opts.gpu = true,
                other => return Err(format!("unknown argument: {}", other)),
            }
        }

        if opts.rays == 0 {
            return Err("--rays must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&(opts.odds.miss + opts.odds.light)) {
            return Err("--miss + --light must lie in [0, 1]".into());
        }
        Ok(opts)
    }

    /// Config file first, then `--group-size` on top.
    fn config(&self) -> Result<CompactionConfig> {
        let mut config = match &self.config {
            Some(path) => CompactionConfig::load(path)?,
            None => CompactionConfig::default(),
        };
        if let Some(group_size) = self.group_size {
            config.group_size = group_size;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Per-run totals.
#[derive(Debug, Default)]
struct BenchStats {
    bounces: u32,
    compacted: usize,
    elapsed: Duration,
}

impl BenchStats {
    fn record(&mut self, bounce: u32, result: &Compacted, elapsed: Duration) {
        info!(
            bounce,
            active = result.active_count,
            terminated = result.terminated_count,
            ms = elapsed.as_secs_f64() * 1e3,
            "bounce compacted"
        );
        self.bounces += 1;
        self.compacted += result.ray_count();
        self.elapsed += elapsed;
    }

    fn report(&self, backend: &str, survivors: usize) {
        let secs = self.elapsed.as_secs_f64();
        let rate = if secs > 0.0 { self.compacted as f64 / secs / 1e6 } else { 0.0 };
        println!("Backend:         {}", backend);
        println!("Bounces:         {}", self.bounces);
        println!("Rays compacted:  {}", self.compacted);
        println!("Survivors:       {}", survivors);
        println!("Compaction time: {:.3} ms", secs * 1e3);
        println!("Throughput:      {:.1} Mrays/s", rate);
    }
}

fn cmd_bench(opts: &BenchOptions) -> Result<()> {
    let config = opts.config()?;
    info!(
        rays = opts.rays,
        bounces = opts.bounces,
        group_size = config.group_size,
        "starting bench"
    );

    if opts.gpu {
        return bench_gpu(opts, config);
    }

    let mut rays = sim::primary_rays(opts.rays, opts.bounces);
    let mut next = vec![PathRay::default(); opts.rays];
    let mut ctx = CompactionContext::with_capacity(config, opts.rays)?;
    let mut stats = BenchStats::default();
    let mut count = opts.rays;

    for bounce in 0..opts.bounces {
        if count == 0 {
            break;
        }
        sim::bounce(&mut rays[..count], bounce, opts.odds);

        let start = Instant::now();
        let result = ctx.compact(&rays, count, &mut next)?;
        stats.record(bounce, &result, start.elapsed());

        std::mem::swap(&mut rays, &mut next);
        count = result.active_count;
    }

    stats.report("cpu", count);
    Ok(())
}

#[cfg(not(feature = "gpu"))]
fn bench_gpu(_opts: &BenchOptions, _config: CompactionConfig) -> Result<()> {
    Err(Error::gpu("GPU backend not available. Rebuild with: cargo build --features gpu"))
}

#[cfg(feature = "gpu")]
fn bench_gpu(opts: &BenchOptions, config: CompactionConfig) -> Result<()> {
    use raycompact::gpu::{read_buffer, request_device};
    use wgpu::util::DeviceExt;

    let (device, queue) = request_device()?;
    let mut gc = GpuCompaction::new(&device, config)?;
    gc.prepare_buffers(&device, opts.rays)?;

    // CPU reference for every bounce
    let mut ctx = CompactionContext::with_capacity(config, opts.rays)?;
    let mut expected = vec![PathRay::default(); opts.rays];

    let mut rays = sim::primary_rays(opts.rays, opts.bounces);
    let usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
    let buffer_a = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("rays_a"),
        contents: PathRay::as_bytes(&rays),
        usage,
    });
    let buffer_b = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("rays_b"),
        size: buffer_a.size(),
        usage,
        mapped_at_creation: false,
    });
    let (mut input, mut output) = (&buffer_a, &buffer_b);

    let mut stats = BenchStats::default();
    let mut count = opts.rays;

    for bounce in 0..opts.bounces {
        if count == 0 {
            break;
        }
        sim::bounce(&mut rays[..count], bounce, opts.odds);
        queue.write_buffer(input, 0, PathRay::as_bytes(&rays[..count]));

        let start = Instant::now();
        let result = gc.compact(&device, &queue, input, output, count)?;
        stats.record(bounce, &result, start.elapsed());

        let reference = ctx.compact(&rays, count, &mut expected)?;
        rays = read_buffer::<PathRay>(&device, &queue, output, count)?;
        if reference != result || rays[..] != expected[..count] {
            tracing::warn!(bounce, "GPU output differs from CPU reference");
            return Err(Error::gpu(format!("bounce {} mismatched the CPU reference", bounce)));
        }

        std::mem::swap(&mut input, &mut output);
        count = result.active_count;
    }

    stats.report("gpu", count);
    Ok(())
}
