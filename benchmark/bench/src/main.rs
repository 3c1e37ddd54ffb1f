use clap::Parser;
use tracing_subscriber::EnvFilter;

use bench::hardware::get_benchmark_config;
use bench::{dtype_from_str, generate, host_from_str};
use ugemm::{GemmRequest, Registry};

/// Selects a cpu micro gemm kernel and prints the generated c++
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// number of repeats of selection and emission to time
    #[arg(long, default_value_t = 1)]
    n_repeats: usize,

    /// dim m
    #[arg(short, long, default_value_t = 64)]
    m: usize,

    /// dim n
    #[arg(short, long, default_value_t = 64)]
    n: usize,

    /// dim k
    #[arg(short, long, default_value_t = 64)]
    k: usize,

    /// kernel name
    #[arg(long, default_value_t = String::from("micro_gemm"))]
    name: String,

    /// dtype of A
    #[arg(long, default_value_t = String::from("bf16"))]
    input_dtype: String,

    /// dtype of B, defaults to the dtype of A
    #[arg(long)]
    input2_dtype: Option<String>,

    #[arg(long)]
    output_dtype: Option<String>,

    #[arg(long)]
    compute_dtype: Option<String>,

    #[arg(long, default_value_t = 1.0)]
    alpha: f64,

    #[arg(long)]
    num_threads: Option<usize>,

    /// simulated host: scalar, avx2, avx512, avx512_fp16, amx, amx_fp16
    #[arg(long)]
    host: Option<String>,

    /// fail instead of falling back to the reference kernel
    #[arg(long, default_value_t = false)]
    no_ref: bool,

    /// print the hardware report as json and exit
    #[arg(long, default_value_t = false)]
    hw_report: bool,

    /// print the generated kernel as json
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_writer(std::io::stderr).init();
    let args = Args::parse();
    let host = host_from_str(args.host.as_deref())?;

    if args.hw_report {
        let simulated = args.host.as_ref().map(|_| &host);
        println!("{}", serde_json::to_string_pretty(&get_benchmark_config(simulated))?);
        return Ok(());
    }

    let input_dtype = dtype_from_str(&args.input_dtype)?;
    let input2_dtype = args.input2_dtype.as_deref().map(dtype_from_str).transpose()?.unwrap_or(input_dtype);
    let mut request = GemmRequest::new(&args.name, args.m, args.n, args.k, input_dtype, input2_dtype)
        .with_alpha(args.alpha)
        .with_use_ref(!args.no_ref);
    if let Some(dt) = &args.output_dtype {
        request = request.with_output_dtype(dtype_from_str(dt)?);
    }
    if let Some(dt) = &args.compute_dtype {
        request = request.with_compute_dtype(dtype_from_str(dt)?);
    }
    if let Some(t) = args.num_threads {
        request = request.with_num_threads(t);
    }

    let registry = Registry::builtin()?;
    let mut best_time = f64::INFINITY;
    let mut total_time = 0.0;
    let mut generated = None;
    for _ in 0..args.n_repeats.max(1) {
        let start_time = std::time::Instant::now();
        generated = generate(&registry, &host, &request)?;
        let end_time = start_time.elapsed().as_nanos() as f64 / 1e9;
        total_time += end_time;
        best_time = best_time.min(end_time);
    }
    tracing::info!(best_time, total_time, n_repeats = args.n_repeats, "generation time");

    let Some(generated) = generated else {
        anyhow::bail!("no micro gemm config matches the request and the reference fallback is disabled");
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&generated)?);
        return Ok(());
    }
    println!("// {} {:?} b_layout={}", generated.kind, generated.register_blocking, generated.b_layout);
    println!("{}", generated.body);
    if !generated.init.is_empty() {
        println!("// init\n{}", generated.init);
    }
    println!("// call\n{}", generated.call);
    if !generated.finalize.is_empty() {
        println!("// finalize\n{}", generated.finalize);
    }
    Ok(())
}
