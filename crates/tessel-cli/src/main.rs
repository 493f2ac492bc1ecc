use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use tessel_bench::{checks, BenchConfig, BenchReport};
use tessel_core::config::{self, RuntimeConfig};
use tessel_core::{DType, Device, Result};
use tessel_kernels::linalg::CholeskyExample;
use tessel_kernels::{device_count, get_device, is_available, synchronize_all};

const BANNER: &str = r#"
 _____ _____ ____ ____  _____ _
|_   _| ____/ ___/ ___|| ____| |
  | | |  _| \___ \___ \|  _| | |
  | | | |___ ___) |__) | |___| |___
  |_| |_____|____/____/|_____|_____|"#;

#[derive(Parser)]
#[command(
    name = "tessel",
    about = "Tessel tile runtime CLI",
    long_about = "Tile kernels with reverse-mode gradients, launch-overhead benchmarks\nand numerical self-checks.",
    version
)]
struct Cli {
    /// Runtime config (JSON); TESSEL_* environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum SuiteArg {
    Launch,
    Params,
    Graph,
    All,
}

impl SuiteArg {
    fn names(self) -> &'static [&'static str] {
        match self {
            SuiteArg::Launch => &["launch"],
            SuiteArg::Params => &["params"],
            SuiteArg::Graph => &["graph"],
            SuiteArg::All => tessel_bench::SUITES,
        }
    }
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show the runtime config and available devices
    Info,
    /// Measure launch-API overhead
    Bench {
        #[arg(value_enum, default_value = "all")]
        suite: SuiteArg,
        /// Calls per timed round
        #[arg(long)]
        number: Option<usize>,
        /// Timed rounds
        #[arg(long)]
        rounds: Option<usize>,
        /// Untimed calls before the first round
        #[arg(long)]
        warmup: Option<usize>,
        #[arg(long, default_value = "accel:0")]
        device: Device,
        /// Iteration counts (JSON); flags override it
        #[arg(long)]
        bench_config: Option<PathBuf>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Factor and solve one SPD tile, checked against a host reference
    Cholesky {
        #[arg(long, default_value_t = 32)]
        tile: usize,
        #[arg(long, default_value = "f64")]
        dtype: DType,
        #[arg(long, default_value = "accel:0")]
        device: Device,
    },
    /// Verify tile copy/map forward values and gradients
    TileCheck {
        #[arg(long, default_value = "accel:0")]
        device: Device,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    if let Some(path) = &cli.config {
        config::install(RuntimeConfig::from_file(path)?.with_env_overrides()?)?;
    }

    match cli.command {
        Commands::Info => cmd_info(),
        Commands::Bench {
            suite,
            number,
            rounds,
            warmup,
            device,
            bench_config,
            json,
        } => {
            let file = bench_config.as_deref().map(BenchConfig::from_file).transpose()?;
            cmd_bench(suite, device, file, (number, rounds, warmup), json)
        }
        Commands::Cholesky { tile, dtype, device } => cmd_cholesky(tile, dtype, device),
        Commands::TileCheck { device, seed } => cmd_tile_check(device, seed),
    }
}

fn cmd_info() -> Result<()> {
    println!("{}", BANNER);
    println!("  v{}  -  tile kernels and launch benchmarks\n", env!("CARGO_PKG_VERSION"));

    println!("Platform");
    println!("  OS:   {}", std::env::consts::OS);
    println!("  Arch: {}", std::env::consts::ARCH);

    let cfg = config::runtime_config();
    println!("\nRuntime");
    println!("  accelerators:        {}", cfg.accel_devices);
    match cfg.threads_per_device {
        Some(n) => println!("  threads per device:  {n}"),
        None => println!("  threads per device:  auto"),
    }
    match cfg.memory_limit_bytes {
        Some(n) => println!("  memory limit:        {n} bytes"),
        None => println!("  memory limit:        none"),
    }
    println!("  partition checks:    {}", if cfg.validate_partitions { "[x]" } else { "[ ]" });

    println!("\nDevices");
    let cpu = get_device(Device::Cpu)?;
    println!("  {:<10} {} thread (sequential)", cpu.device().to_string(), cpu.worker_threads());
    for idx in 0..device_count() {
        let device = Device::Accel(idx);
        if !is_available(device) {
            println!("  {:<10} unavailable", device.to_string());
            continue;
        }
        let ctx = get_device(device)?;
        println!("  {:<10} {} threads", ctx.device().to_string(), ctx.worker_threads());
    }
    Ok(())
}

fn cmd_bench(
    suite: SuiteArg,
    device: Device,
    file: Option<BenchConfig>,
    (number, rounds, warmup): (Option<usize>, Option<usize>, Option<usize>),
    json: bool,
) -> Result<()> {
    let mut report = BenchReport::default();
    for name in suite.names() {
        let mut s = tessel_bench::suite_by_name(name, device)?;
        let mut cfg = file.unwrap_or_else(|| s.default_config());
        cfg.number = number.unwrap_or(cfg.number);
        cfg.rounds = rounds.unwrap_or(cfg.rounds);
        cfg.warmup = warmup.unwrap_or(cfg.warmup);
        report.push(tessel_bench::measure(s.as_mut(), device, Some(cfg))?);
    }
    synchronize_all()?;
    if matches!(suite, SuiteArg::Params | SuiteArg::All) {
        tessel_bench::check_param_equivalence(device)?;
    }

    if json {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", report.render_table());
    }
    Ok(())
}

fn cmd_cholesky(tile: usize, dtype: DType, device: Device) -> Result<()> {
    let ctx = get_device(device)?;
    let report = CholeskyExample::new(tile, dtype).run(&ctx)?;
    println!("{}", report.render());
    report.validate()?;
    println!("Example Tile Cholesky passed");
    Ok(())
}

fn cmd_tile_check(device: Device, seed: u64) -> Result<()> {
    let ctx = get_device(device)?;
    let outcomes = checks::run_all(&ctx, seed)?;
    println!("{:<18} {:>14} {:>14}", "check", "forward err", "grad err");
    println!("{}", "-".repeat(48));
    for o in &outcomes {
        println!("{:<18} {:>14.3e} {:>14.3e}", o.name, o.forward_err, o.grad_err);
    }
    println!("\nAll {} tile checks passed on {}", outcomes.len(), device);
    Ok(())
}
