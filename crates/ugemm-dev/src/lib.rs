use half::{bf16, f16};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;

use ugemm_base::{CompilerKind, HostCapabilities, VecIsa};

// Simulated hosts, single threaded and gcc flavored so generated text is stable

pub fn scalar_host() -> HostCapabilities {
    HostCapabilities::new(VecIsa::Scalar).with_compiler(CompilerKind::Gnu)
}

pub fn avx2_host() -> HostCapabilities {
    HostCapabilities::new(VecIsa::Avx2).with_compiler(CompilerKind::Gnu)
}

pub fn avx512_host() -> HostCapabilities {
    HostCapabilities::new(VecIsa::Avx512).with_compiler(CompilerKind::Gnu)
}

pub fn avx512_fp16_host() -> HostCapabilities {
    avx512_host().with_avx512_fp16(true)
}

pub fn amx_host() -> HostCapabilities {
    HostCapabilities::new(VecIsa::Amx).with_compiler(CompilerKind::Gnu)
}

pub fn amx_fp16_host() -> HostCapabilities {
    amx_host().with_avx512_fp16(true).with_amx_fp16(true)
}

pub const SIMULATED_HOSTS: [&str; 6] = ["scalar", "avx2", "avx512", "avx512_fp16", "amx", "amx_fp16"];

pub fn simulated_host(name: &str) -> Option<HostCapabilities> {
    let host = match name {
        "scalar" => scalar_host(),
        "avx2" => avx2_host(),
        "avx512" => avx512_host(),
        "avx512_fp16" => avx512_fp16_host(),
        "amx" => amx_host(),
        "amx_fp16" => amx_fp16_host(),
        _ => return None,
    };
    Some(host)
}

pub trait Bound {
    type X: rand::distributions::uniform::SampleUniform;
    fn min_value() -> Self::X;
    fn max_value() -> Self::X;
    fn my_sample(dist: &Uniform<Self::X>, rng: &mut StdRng) -> Self;
}

macro_rules! impl_bound {
    ($($t:ty: $lo:expr, $hi:expr);*) => {
        $(
            impl Bound for $t {
                type X = $t;
                fn min_value() -> Self {
                    $lo
                }
                fn max_value() -> Self {
                    $hi
                }
                fn my_sample(dist: &Uniform<Self>, rng: &mut StdRng) -> Self {
                    dist.sample(rng)
                }
            }
        )*
    };
}

impl_bound!(
    f32: -2.0, 2.0;
    f64: -10.0, 10.0;
    i8: -10, 10;
    u8: 0, 20;
    i32: -10, 10;
    f16: f16::from_f32(-1.0), f16::from_f32(1.0);
    bf16: bf16::from_f32(-1.0), bf16::from_f32(1.0)
);

/// Fills the column major `m x n` block of `arr`, same seed on every call.
pub fn random_matrix_uniform<T>(m: usize, n: usize, arr: &mut [T], ld: usize)
where
    T: Bound,
    T::X: rand::distributions::uniform::SampleUniform,
{
    let mut x = StdRng::seed_from_u64(43);
    let un_dist = Uniform::new(T::min_value(), T::max_value());
    for j in 0..n {
        for i in 0..m {
            arr[j * ld + i] = T::my_sample(&un_dist, &mut x);
        }
    }
}

/// `C = alpha * A @ B`, or `C += ...` when `accum`, row major with leading dims,
/// accumulated in f64.
#[allow(clippy::too_many_arguments)]
pub fn gemm_reference<TA, TB>(
    m: usize,
    n: usize,
    k: usize,
    alpha: f64,
    a: &[TA],
    lda: usize,
    b: &[TB],
    ldb: usize,
    c: &mut [f64],
    ldc: usize,
    accum: bool,
) where
    TA: Copy + Into<f64>,
    TB: Copy + Into<f64>,
{
    for i in 0..m {
        for j in 0..n {
            let mut acc = if accum { c[i * ldc + j] } else { 0.0 };
            for p in 0..k {
                acc += a[i * lda + p].into() * b[p * ldb + j].into() * alpha;
            }
            c[i * ldc + j] = acc;
        }
    }
}

pub trait Diff {
    fn diff(&self, other: &Self) -> f64;
}

impl Diff for f32 {
    fn diff(&self, other: &Self) -> f64 {
        let diff_abs = (self - other).abs();
        let diff_rel = diff_abs / self.abs();
        diff_abs.min(diff_rel) as f64
    }
}

impl Diff for f64 {
    fn diff(&self, other: &Self) -> f64 {
        let diff_abs = (self - other).abs();
        let diff_rel = diff_abs / self.abs();
        diff_abs.min(diff_rel)
    }
}

impl Diff for i32 {
    fn diff(&self, other: &Self) -> f64 {
        (self - other).abs() as f64
    }
}

impl Diff for bf16 {
    fn diff(&self, other: &Self) -> f64 {
        self.to_f64().diff(&other.to_f64())
    }
}

impl Diff for f16 {
    fn diff(&self, other: &Self) -> f64 {
        self.to_f64().diff(&other.to_f64())
    }
}

pub fn max_abs_diff<T: Copy + std::fmt::Debug>(ap: &[T], bp: &[T]) -> f64
where
    T: Diff,
{
    ap.iter().zip(bp).map(|(a, b)| a.diff(b)).fold(0.0, f64::max)
}

pub fn generate_m_dims(mc: usize, mr: usize) -> Vec<usize> {
    let mut a_dims = vec![];
    for m in 1..mr {
        a_dims.push(m);
        a_dims.push(m + 100);
    }
    a_dims.push(mc + 29);
    a_dims
}

pub fn generate_n_dims(nc: usize, nr: usize) -> Vec<usize> {
    let mut a_dims = vec![];
    for n in 1..nr {
        a_dims.push(n);
        a_dims.push(n + 400);
    }
    a_dims.push(nc + 29);
    a_dims
}

pub fn generate_k_dims(kc: usize, kr: usize) -> Vec<usize> {
    let mut a_dims = vec![];
    for k in 1..=kr * 2 {
        a_dims.push(k);
        a_dims.push(k + kc);
    }
    a_dims
}
