use std::fmt;

use crate::CpuFeatures;

/// Vector instruction set a micro-kernel can be generated for.
///
/// The relation between levels is a hierarchy rather than a total order:
/// `Amx` extends `Avx512`, while `Avx2` and `Avx512` are unrelated roots.
/// A blocking written for 8-lane vectors is not valid for 16-lane vectors,
/// so an avx512 host must not pick up avx2 configurations.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum VecIsa {
    Scalar,
    Avx2,
    Avx512,
    Amx,
}

impl VecIsa {
    pub const ALL: [VecIsa; 4] = [VecIsa::Scalar, VecIsa::Avx2, VecIsa::Avx512, VecIsa::Amx];

    pub fn parent(self) -> Option<VecIsa> {
        match self {
            VecIsa::Amx => Some(VecIsa::Avx512),
            _ => None,
        }
    }

    /// True when code written for `required` runs on a host whose best isa is `self`.
    pub fn is_subclass_or_equal(self, required: VecIsa) -> bool {
        let mut cur = Some(self);
        while let Some(isa) = cur {
            if isa == required {
                return true;
            }
            cur = isa.parent();
        }
        false
    }

    // used only for the capability ceiling, not for config matching
    pub fn rank(self) -> u8 {
        match self {
            VecIsa::Scalar => 0,
            VecIsa::Avx2 => 1,
            VecIsa::Avx512 => 2,
            VecIsa::Amx => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            VecIsa::Scalar => "scalar",
            VecIsa::Avx2 => "avx2",
            VecIsa::Avx512 => "avx512",
            VecIsa::Amx => "amx",
        }
    }

    pub fn is_supported_by(self, cpu_ft: &CpuFeatures) -> bool {
        match self {
            VecIsa::Scalar => true,
            VecIsa::Avx2 => cpu_ft.avx && cpu_ft.avx2 && cpu_ft.fma,
            VecIsa::Avx512 => cpu_ft.avx512f && cpu_ft.avx512bw && cpu_ft.avx512vl && cpu_ft.avx512dq && cpu_ft.fma,
            VecIsa::Amx => VecIsa::Avx512.is_supported_by(cpu_ft) && cpu_ft.amx_tile && cpu_ft.amx_bf16,
        }
    }

    /// Parses a capability ceiling as accepted by `UGEMM_CPU_CAPABILITY`.
    pub fn from_capability_str(s: &str) -> Option<VecIsa> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" | "scalar" | "none" => Some(VecIsa::Scalar),
            "avx2" => Some(VecIsa::Avx2),
            "avx512" => Some(VecIsa::Avx512),
            "amx" => Some(VecIsa::Amx),
            _ => None,
        }
    }
}

impl fmt::Display for VecIsa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Picks the most capable isa the cpu supports, never above `cap` when one is given.
pub fn pick_best_available_isa(cpu_ft: &CpuFeatures, cap: Option<VecIsa>) -> VecIsa {
    for isa in [VecIsa::Amx, VecIsa::Avx512, VecIsa::Avx2] {
        if let Some(cap) = cap {
            if isa.rank() > cap.rank() {
                continue;
            }
        }
        if isa.is_supported_by(cpu_ft) {
            return isa;
        }
    }
    VecIsa::Scalar
}

/// C++ compiler family the generated source is built with.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CompilerKind {
    // gcc and clang
    Gnu,
    Msvc,
}

impl CompilerKind {
    pub fn native() -> Self {
        if cfg!(target_env = "msvc") {
            CompilerKind::Msvc
        } else {
            CompilerKind::Gnu
        }
    }

    pub fn restrict_keyword(self) -> &'static str {
        match self {
            CompilerKind::Gnu => "__restrict__",
            CompilerKind::Msvc => "__restrict",
        }
    }

    /// msvc has no variable length arrays on the stack
    pub fn supports_stack_vla(self) -> bool {
        self == CompilerKind::Gnu
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gcc" | "g++" | "clang" | "clang++" | "gnu" => Some(CompilerKind::Gnu),
            "cl" | "cl.exe" | "msvc" => Some(CompilerKind::Msvc),
            _ => None,
        }
    }
}

/// Everything the selector needs to know about the host, threaded explicitly
/// so that selection can be exercised against simulated machines.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HostCapabilities {
    pub vec_isa: VecIsa,
    pub avx512_fp16: bool,
    pub amx_fp16: bool,
    pub compiler: CompilerKind,
    pub num_threads: usize,
}

impl HostCapabilities {
    pub fn new(vec_isa: VecIsa) -> Self {
        Self { vec_isa, avx512_fp16: false, amx_fp16: false, compiler: CompilerKind::native(), num_threads: 1 }
    }

    pub fn with_avx512_fp16(mut self, avx512_fp16: bool) -> Self {
        self.avx512_fp16 = avx512_fp16;
        self
    }

    pub fn with_amx_fp16(mut self, amx_fp16: bool) -> Self {
        self.amx_fp16 = amx_fp16;
        self
    }

    pub fn with_compiler(mut self, compiler: CompilerKind) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    /// Capabilities of the machine this process runs on.
    pub fn detect() -> Self {
        let hw_config = &*crate::RUNTIME_HW_CONFIG;
        let cpu_ft = hw_config.cpu_ft();
        Self {
            vec_isa: hw_config.vec_isa(),
            avx512_fp16: cpu_ft.avx512f16,
            amx_fp16: cpu_ft.amx_fp16 && cpu_ft.amx_tile,
            compiler: hw_config.compiler(),
            num_threads: crate::ugemm_num_threads(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avx512_features() -> CpuFeatures {
        CpuFeatures {
            avx: true,
            avx2: true,
            fma: true,
            f16c: true,
            avx512f: true,
            avx512bw: true,
            avx512vl: true,
            avx512dq: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_hierarchy() {
        assert!(VecIsa::Amx.is_subclass_or_equal(VecIsa::Avx512));
        assert!(VecIsa::Amx.is_subclass_or_equal(VecIsa::Amx));
        assert!(!VecIsa::Avx512.is_subclass_or_equal(VecIsa::Amx));
        assert!(!VecIsa::Avx512.is_subclass_or_equal(VecIsa::Avx2));
        assert!(!VecIsa::Amx.is_subclass_or_equal(VecIsa::Avx2));
        assert!(!VecIsa::Scalar.is_subclass_or_equal(VecIsa::Avx2));
        assert!(VecIsa::Scalar.is_subclass_or_equal(VecIsa::Scalar));
    }

    #[test]
    fn test_pick_best() {
        let none = CpuFeatures::default();
        assert_eq!(pick_best_available_isa(&none, None), VecIsa::Scalar);

        let avx2 = CpuFeatures { avx: true, avx2: true, fma: true, ..Default::default() };
        assert_eq!(pick_best_available_isa(&avx2, None), VecIsa::Avx2);

        let avx512 = avx512_features();
        assert_eq!(pick_best_available_isa(&avx512, None), VecIsa::Avx512);

        let amx = CpuFeatures { amx_tile: true, amx_bf16: true, ..avx512_features() };
        assert_eq!(pick_best_available_isa(&amx, None), VecIsa::Amx);
        // tile unit without bf16 support is not usable
        let amx_tile_only = CpuFeatures { amx_tile: true, ..avx512_features() };
        assert_eq!(pick_best_available_isa(&amx_tile_only, None), VecIsa::Avx512);
    }

    #[test]
    fn test_capability_ceiling() {
        let amx = CpuFeatures { amx_tile: true, amx_bf16: true, ..avx512_features() };
        assert_eq!(pick_best_available_isa(&amx, Some(VecIsa::Avx512)), VecIsa::Avx512);
        assert_eq!(pick_best_available_isa(&amx, Some(VecIsa::Avx2)), VecIsa::Avx2);
        assert_eq!(pick_best_available_isa(&amx, Some(VecIsa::Scalar)), VecIsa::Scalar);
        let avx2 = CpuFeatures { avx: true, avx2: true, fma: true, ..Default::default() };
        assert_eq!(pick_best_available_isa(&avx2, Some(VecIsa::Amx)), VecIsa::Avx2);
    }

    #[test]
    fn test_parse() {
        assert_eq!(VecIsa::from_capability_str("AVX512"), Some(VecIsa::Avx512));
        assert_eq!(VecIsa::from_capability_str(" amx "), Some(VecIsa::Amx));
        assert_eq!(VecIsa::from_capability_str("default"), Some(VecIsa::Scalar));
        assert_eq!(VecIsa::from_capability_str("sse9"), None);
        assert_eq!(CompilerKind::from_name("cl"), Some(CompilerKind::Msvc));
        assert_eq!(CompilerKind::from_name("clang++"), Some(CompilerKind::Gnu));
    }

    #[test]
    fn test_compiler_traits() {
        assert_eq!(CompilerKind::Msvc.restrict_keyword(), "__restrict");
        assert_eq!(CompilerKind::Gnu.restrict_keyword(), "__restrict__");
        assert!(!CompilerKind::Msvc.supports_stack_vla());
    }

    #[test]
    fn test_host_builder() {
        let host = HostCapabilities::new(VecIsa::Avx512).with_avx512_fp16(true).with_num_threads(0);
        assert!(host.avx512_fp16);
        assert!(!host.amx_fp16);
        assert_eq!(host.num_threads, 1);
    }
}
