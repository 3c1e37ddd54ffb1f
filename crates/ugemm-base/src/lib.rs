//! # This crate is only for internal use in the ugemm project
//! Nothing is expected to be used outside this module
//! No semver guarantees

use once_cell::sync::Lazy;

pub mod isa;

pub use isa::{pick_best_available_isa, CompilerKind, HostCapabilities, VecIsa};

// feature flags are kept arch independent so that simulated hosts can be built anywhere
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CpuFeatures {
    pub avx: bool,
    pub avx2: bool,
    pub fma: bool,
    pub f16c: bool,
    pub avx512f: bool,
    pub avx512bw: bool,
    pub avx512vl: bool,
    pub avx512dq: bool,
    pub avx512_vnni: bool,
    pub avx512_bf16: bool,
    pub avx512f16: bool,
    pub amx_tile: bool,
    pub amx_bf16: bool,
    pub amx_int8: bool,
    pub amx_fp16: bool,
}

pub struct HWConfig {
    pub cpu_ft: CpuFeatures,
    vec_isa: VecIsa,
    compiler: CompilerKind,
}

impl HWConfig {
    pub fn cpu_ft(&self) -> CpuFeatures {
        self.cpu_ft
    }

    pub fn vec_isa(&self) -> VecIsa {
        self.vec_isa
    }

    pub fn compiler(&self) -> CompilerKind {
        self.compiler
    }
}

#[cfg(target_arch = "x86_64")]
fn detect_cpu_features() -> CpuFeatures {
    let cpuid = raw_cpuid::CpuId::new();
    let mut cpu_ft = CpuFeatures::default();
    if let Some(feature_info) = cpuid.get_feature_info() {
        cpu_ft.avx = feature_info.has_avx();
        cpu_ft.fma = feature_info.has_fma();
        cpu_ft.f16c = feature_info.has_f16c();
    }
    if let Some(extended_feature_info) = cpuid.get_extended_feature_info() {
        cpu_ft.avx2 = extended_feature_info.has_avx2();
        cpu_ft.avx512f = extended_feature_info.has_avx512f();
        cpu_ft.avx512bw = extended_feature_info.has_avx512bw();
        cpu_ft.avx512vl = extended_feature_info.has_avx512vl();
        cpu_ft.avx512dq = extended_feature_info.has_avx512dq();
        cpu_ft.avx512_vnni = extended_feature_info.has_avx512vnni();
        cpu_ft.avx512f16 = extended_feature_info.has_avx512_fp16();
    }
    // amx bits are read directly, leaf 7 subleaf 0 edx and subleaf 1 eax
    let max_leaf = raw_cpuid::cpuid!(0).eax;
    if max_leaf >= 7 {
        let leaf7 = raw_cpuid::cpuid!(7, 0);
        cpu_ft.amx_bf16 = leaf7.edx & (1 << 22) != 0;
        cpu_ft.amx_tile = leaf7.edx & (1 << 24) != 0;
        cpu_ft.amx_int8 = leaf7.edx & (1 << 25) != 0;
        if leaf7.eax >= 1 {
            let leaf7_1 = raw_cpuid::cpuid!(7, 1);
            cpu_ft.avx512_bf16 = leaf7_1.eax & (1 << 5) != 0;
            cpu_ft.amx_fp16 = leaf7_1.eax & (1 << 21) != 0;
        }
    }
    cpu_ft
}

#[cfg(not(target_arch = "x86_64"))]
fn detect_cpu_features() -> CpuFeatures {
    CpuFeatures::default()
}

// UGEMM_CPU_CAPABILITY caps the isa picked for this process, unknown values are ignored
fn capability_ceiling() -> Option<VecIsa> {
    let raw = std::env::var("UGEMM_CPU_CAPABILITY").ok()?;
    let cap = VecIsa::from_capability_str(&raw);
    if cap.is_none() {
        tracing::warn!(value = %raw, "ignoring unrecognized UGEMM_CPU_CAPABILITY");
    }
    cap
}

fn detect_compiler() -> CompilerKind {
    match std::env::var("UGEMM_CXX_COMPILER") {
        Ok(raw) => CompilerKind::from_name(&raw).unwrap_or_else(|| {
            tracing::warn!(value = %raw, "ignoring unrecognized UGEMM_CXX_COMPILER");
            CompilerKind::native()
        }),
        Err(_) => CompilerKind::native(),
    }
}

#[inline]
fn detect_hw_config(cpu_ft: CpuFeatures) -> HWConfig {
    let vec_isa = pick_best_available_isa(&cpu_ft, capability_ceiling());
    let compiler = detect_compiler();
    tracing::debug!(%vec_isa, ?compiler, "detected host configuration");
    HWConfig { cpu_ft, vec_isa, compiler }
}

#[cfg(feature = "debug_cpu_features")]
#[allow(unused)]
fn apply_debug_cpu_features(cpu_ft: &mut CpuFeatures) {
    macro_rules! turn_off {
        ($($field:ident),*) => {
            paste::paste! {
                $(
                    let turn_off = std::env::var(concat!("UGEMM_", stringify!([<$field:upper>]), "_OFF")).is_ok();
                    cpu_ft.$field = cpu_ft.$field && !turn_off;
                )*
            }
        };
    }
    turn_off!(
        avx,
        avx2,
        fma,
        f16c,
        avx512f,
        avx512bw,
        avx512vl,
        avx512dq,
        avx512_vnni,
        avx512_bf16,
        avx512f16,
        amx_tile,
        amx_bf16,
        amx_int8,
        amx_fp16
    );
}

#[cfg(not(feature = "debug_cpu_features"))]
pub static RUNTIME_HW_CONFIG: Lazy<HWConfig> = Lazy::new(|| detect_hw_config(detect_cpu_features()));
#[cfg(feature = "debug_cpu_features")]
pub static RUNTIME_HW_CONFIG: Lazy<HWConfig> = Lazy::new(|| {
    let mut cpu_ft = detect_cpu_features();
    apply_debug_cpu_features(&mut cpu_ft);
    detect_hw_config(cpu_ft)
});

fn parse_num_threads(raw: Option<&str>, n_core: usize) -> usize {
    match raw {
        None => n_core,
        Some(x) => match x.trim().parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => {
                tracing::warn!(value = x, fallback = n_core, "invalid UGEMM_NUM_THREADS");
                n_core
            }
        },
    }
}

pub static UGEMM_NUM_THREADS: Lazy<usize> = Lazy::new(|| {
    let n_core = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    // UGEMM_NUM_THREADS or the number of logical cores
    let x = std::env::var("UGEMM_NUM_THREADS").ok();
    parse_num_threads(x.as_deref(), n_core)
});

pub fn ugemm_num_threads() -> usize {
    *UGEMM_NUM_THREADS
}

pub(crate) mod cpu_features {
    use super::{VecIsa, RUNTIME_HW_CONFIG};

    macro_rules! def_isa_query {
        ($($isa:ident),*) => {
            paste::paste! {
                $(
                    pub fn [<has_ $isa:lower _compute>]() -> bool {
                        RUNTIME_HW_CONFIG.vec_isa.is_subclass_or_equal(VecIsa::$isa)
                    }
                )*
            }
        };
    }

    def_isa_query!(Avx2, Avx512, Amx);

    pub fn has_avx512_fp16_compute() -> bool {
        RUNTIME_HW_CONFIG.cpu_ft.avx512f16 && has_avx512_compute()
    }

    pub fn has_amx_fp16_compute() -> bool {
        RUNTIME_HW_CONFIG.cpu_ft.amx_fp16 && has_amx_compute()
    }
}

pub use cpu_features::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_threads_parse() {
        assert_eq!(parse_num_threads(None, 8), 8);
        assert_eq!(parse_num_threads(Some("4"), 8), 4);
        assert_eq!(parse_num_threads(Some(" 3 "), 8), 3);
        assert_eq!(parse_num_threads(Some("0"), 8), 8);
        assert_eq!(parse_num_threads(Some("many"), 8), 8);
    }

    #[test]
    fn test_runtime_config_consistent() {
        let hw = &*RUNTIME_HW_CONFIG;
        // whatever was picked must be supported by the detected features
        assert!(hw.vec_isa().is_supported_by(&hw.cpu_ft()));
        assert!(ugemm_num_threads() >= 1);
        if has_amx_compute() {
            assert!(has_avx512_compute());
        }
        let host = HostCapabilities::detect();
        assert_eq!(host.vec_isa, hw.vec_isa());
    }
}
