//! Picks the best registered micro gemm config for a generation request and
//! instantiates the matching variant.
//!
//! Candidates are filtered on the host isa, the exact dtype tuple and the
//! config's extra check, then ranked by
//! `(isa, dividable, occupancy, register_bytes)`:
//! - `isa`: 1 for tiled matrix configs, else 0
//! - `dividable`: how many of `m`, `n`, `k` the blocking divides
//! - `occupancy`: whether the N blocks, then all MxN blocks, cover the threads
//! - `register_bytes`: bytes of C, A and B tiles held per inner step
//!
//! Ranking is lexicographic, a later candidate replaces the current best only
//! when its score is strictly greater, so equal scores keep registration order.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use ugemm_base::{HostCapabilities, VecIsa};

use crate::config::{CheckArgs, GemmBlocking, MicroGemmConfig};
use crate::dtype::Dtype;
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::variants::{MicroGemm, MicroGemmCommon, VariantKind};

/// Size of a gemm dimension as known at code generation time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SizeExpr {
    Concrete(usize),
    Symbolic { expr: String, hint: Option<usize> },
}

impl SizeExpr {
    pub fn symbolic(expr: impl Into<String>, hint: Option<usize>) -> Self {
        SizeExpr::Symbolic { expr: expr.into(), hint }
    }

    /// Concrete value, or the size hint of a symbolic size, or `fallback`.
    pub fn size_hint(&self, fallback: usize) -> usize {
        match self {
            SizeExpr::Concrete(v) => *v,
            SizeExpr::Symbolic { hint, .. } => hint.unwrap_or(fallback),
        }
    }

    fn concrete(&self, dim: &'static str) -> Result<usize> {
        match self {
            SizeExpr::Concrete(v) => Ok(*v),
            SizeExpr::Symbolic { expr, .. } => Err(Error::SymbolicDim { dim, expr: expr.clone() }),
        }
    }
}

impl From<usize> for SizeExpr {
    fn from(v: usize) -> Self {
        SizeExpr::Concrete(v)
    }
}

impl fmt::Display for SizeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeExpr::Concrete(v) => write!(f, "{v}"),
            SizeExpr::Symbolic { expr, .. } => f.write_str(expr),
        }
    }
}

/// One micro gemm site of a fused kernel.
#[derive(Clone, Debug, PartialEq)]
pub struct GemmRequest {
    pub name: String,
    pub m: SizeExpr,
    pub n: SizeExpr,
    pub k: SizeExpr,
    pub input_dtype: Dtype,
    pub input2_dtype: Dtype,
    pub output_dtype: Option<Dtype>,
    pub compute_dtype: Option<Dtype>,
    pub alpha: f64,
    pub num_threads: Option<usize>,
    pub use_ref: bool,
}

macro_rules! def_optional_setters {
    ($($field:ident: $ty:ty),*) => {
        paste::paste! {
            $(
                pub fn [<with_ $field>](mut self, $field: $ty) -> Self {
                    self.$field = Some($field);
                    self
                }
            )*
        }
    };
}

impl GemmRequest {
    pub fn new(
        name: impl Into<String>,
        m: impl Into<SizeExpr>,
        n: impl Into<SizeExpr>,
        k: impl Into<SizeExpr>,
        input_dtype: Dtype,
        input2_dtype: Dtype,
    ) -> Self {
        Self {
            name: name.into(),
            m: m.into(),
            n: n.into(),
            k: k.into(),
            input_dtype,
            input2_dtype,
            output_dtype: None,
            compute_dtype: None,
            alpha: 1.0,
            num_threads: None,
            use_ref: true,
        }
    }

    def_optional_setters!(output_dtype: Dtype, compute_dtype: Dtype, num_threads: usize);

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_use_ref(mut self, use_ref: bool) -> Self {
        self.use_ref = use_ref;
        self
    }
}

/// A request with every default filled in and every size concrete.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ResolvedRequest {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub input_dtype: Dtype,
    pub input2_dtype: Dtype,
    pub output_dtype: Dtype,
    pub compute_dtype: Dtype,
    pub alpha: f64,
    pub num_threads: usize,
}

impl ResolvedRequest {
    pub fn resolve(request: &GemmRequest, host: &HostCapabilities) -> Result<Self> {
        if !request.alpha.is_finite() {
            return Err(Error::NonFiniteAlpha(request.alpha));
        }
        let n = request.n.concrete("n")?;
        let k = request.k.concrete("k")?;
        let m = request.m.size_hint(1);
        let mut output_dtype = request.output_dtype.unwrap_or(request.input_dtype);
        let mut compute_dtype = request.compute_dtype.unwrap_or(output_dtype);
        let num_threads = request.num_threads.unwrap_or(host.num_threads).max(1);

        // small M weight-only int8 gemms run on fp16 instructions
        if m <= 4
            && request.input_dtype == Dtype::BFloat16
            && request.input2_dtype == Dtype::Int8
            && host.avx512_fp16
            && n % 32 == 0
        {
            tracing::debug!(m, n, "upgrading output and compute dtype to float16");
            output_dtype = Dtype::Float16;
            compute_dtype = Dtype::Float16;
        }

        Ok(Self {
            m,
            n,
            k,
            input_dtype: request.input_dtype,
            input2_dtype: request.input2_dtype,
            output_dtype,
            compute_dtype,
            alpha: request.alpha,
            num_threads,
        })
    }

    fn check_args(&self) -> CheckArgs {
        CheckArgs { m: self.m, n: self.n, k: self.k, alpha: self.alpha, num_threads: self.num_threads }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Score {
    pub isa: u8,
    pub dividable: u8,
    pub occupancy: u8,
    pub register_bytes: usize,
}

impl Score {
    pub fn of(config: &MicroGemmConfig, req: &ResolvedRequest) -> Self {
        let GemmBlocking { block_m, block_n, block_k } = config.register_blocking;
        let isa = u8::from(config.vec_isa == VecIsa::Amx);
        let dividable = [req.m % block_m, req.n % block_n, req.k % block_k].iter().filter(|r| **r == 0).count() as u8;
        let n_blocks = (req.n + block_n - 1) / block_n;
        let total_blocks = n_blocks * ((req.m + block_m - 1) / block_m);
        let occupancy = u8::from(n_blocks >= req.num_threads) + u8::from(total_blocks >= req.num_threads);
        let register_bytes = block_m * block_n * config.compute_dtype.itemsize()
            + (block_m * block_k + block_k * block_n) * config.input_dtype.itemsize();
        Self { isa, dividable, occupancy, register_bytes }
    }
}

/// The winning registered config, before instantiation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Selection {
    pub kind: VariantKind,
    pub config: MicroGemmConfig,
    pub score: Score,
}

// Reference plus the registered kinds
const N_KINDS: usize = 5;

fn kind_slot(kind: VariantKind) -> usize {
    match kind {
        VariantKind::Reference => 0,
        VariantKind::Fp32Vec => 1,
        VariantKind::Fp16Vec => 2,
        VariantKind::Amx => 3,
        VariantKind::Brgemm => 4,
    }
}

/// Number of kernels handed out per variant kind.
#[derive(Debug, Default)]
pub struct SelectionStats {
    selected: [AtomicUsize; N_KINDS],
    unmatched: AtomicUsize,
}

impl SelectionStats {
    fn record(&self, kind: VariantKind) {
        self.selected[kind_slot(kind)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self, kind: VariantKind) -> usize {
        self.selected[kind_slot(kind)].load(Ordering::Relaxed)
    }

    /// Requests with no candidate and no reference fallback.
    pub fn unmatched(&self) -> usize {
        self.unmatched.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.selected.iter().map(|c| c.load(Ordering::Relaxed)).sum::<usize>() + self.unmatched()
    }
}

#[derive(Debug)]
pub struct Selector<'r> {
    registry: &'r Registry,
    host: HostCapabilities,
    stats: SelectionStats,
}

impl<'r> Selector<'r> {
    pub fn new(registry: &'r Registry, host: HostCapabilities) -> Self {
        Self { registry, host, stats: SelectionStats::default() }
    }

    pub fn host(&self) -> &HostCapabilities {
        &self.host
    }

    pub fn stats(&self) -> &SelectionStats {
        &self.stats
    }

    /// Best eligible registered config, `None` when nothing matches.
    pub fn best_config(&self, req: &ResolvedRequest) -> Option<Selection> {
        let args = req.check_args();
        let mut best: Option<Selection> = None;
        for (kind, config) in self.registry.iter() {
            if !self.host.vec_isa.is_subclass_or_equal(config.vec_isa) {
                continue;
            }
            if !config.matches(req.input_dtype, req.input2_dtype, req.output_dtype, req.compute_dtype) {
                continue;
            }
            if let Some(check) = &config.extra_check {
                if !check.eval(config, &args, &self.host) {
                    tracing::debug!(%kind, blocking = %config.register_blocking, check = check.name, "extra check rejected config");
                    continue;
                }
            }
            if config.vec_isa == VecIsa::Amx
                && req.m < config.register_blocking.block_m
                && req.input_dtype == Dtype::BFloat16
                && req.input2_dtype == Dtype::Int8
            {
                tracing::debug!(%kind, blocking = %config.register_blocking, m = req.m, "m below block_m for int8 weights");
                continue;
            }
            let score = Score::of(config, req);
            tracing::trace!(%kind, blocking = %config.register_blocking, ?score, "candidate");
            if best.map_or(true, |b| score > b.score) {
                best = Some(Selection { kind, config: *config, score });
            }
        }
        best
    }

    pub fn select(&self, request: &GemmRequest) -> Result<Option<Box<dyn MicroGemm>>> {
        let req = ResolvedRequest::resolve(request, &self.host)?;
        match self.best_config(&req) {
            Some(selection) => {
                tracing::debug!(
                    name = %request.name,
                    kind = %selection.kind,
                    blocking = %selection.config.register_blocking,
                    "selected micro gemm"
                );
                let common =
                    MicroGemmCommon::from_config(&request.name, &selection.config, req.alpha, self.host.compiler);
                let gemm = selection.kind.instantiate(common)?;
                self.stats.record(selection.kind);
                Ok(Some(gemm))
            }
            None if request.use_ref => {
                tracing::debug!(name = %request.name, "no matching config, using the reference micro gemm");
                let common = MicroGemmCommon {
                    name: request.name.clone(),
                    input_dtype: req.input_dtype,
                    input2_dtype: req.input2_dtype,
                    output_dtype: req.output_dtype,
                    compute_dtype: req.compute_dtype,
                    register_blocking: GemmBlocking::new(1, 1, 1),
                    alpha: req.alpha,
                    compiler: self.host.compiler,
                };
                let gemm = VariantKind::Reference.instantiate(common)?;
                self.stats.record(VariantKind::Reference);
                Ok(Some(gemm))
            }
            None => {
                tracing::debug!(name = %request.name, "no matching config");
                self.stats.unmatched.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }
}

/// One-shot selection against `registry` on `host`.
pub fn create_micro_gemm(
    registry: &Registry,
    host: &HostCapabilities,
    request: &GemmRequest,
) -> Result<Option<Box<dyn MicroGemm>>> {
    Selector::new(registry, *host).select(request)
}
