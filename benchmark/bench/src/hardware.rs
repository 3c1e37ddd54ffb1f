use serde::{Deserialize, Serialize};

use ugemm_base::{CpuFeatures, HostCapabilities, RUNTIME_HW_CONFIG};

#[derive(Debug, Serialize, Deserialize)]
pub struct HWConfig {
    pub avx: bool,
    pub avx2: bool,
    pub fma: bool,
    pub f16c: bool,
    pub avx512f: bool,
    pub avx512bw: bool,
    pub avx512_vnni: bool,
    pub avx512_bf16: bool,
    pub avx512f16: bool,
    pub amx_tile: bool,
    pub amx_bf16: bool,
    pub amx_int8: bool,
    pub amx_fp16: bool,
    pub vec_isa: String,
    pub compiler: String,
}

impl HWConfig {
    fn new(cpu_ft: CpuFeatures, vec_isa: String, compiler: String) -> Self {
        Self {
            avx: cpu_ft.avx,
            avx2: cpu_ft.avx2,
            fma: cpu_ft.fma,
            f16c: cpu_ft.f16c,
            avx512f: cpu_ft.avx512f,
            avx512bw: cpu_ft.avx512bw,
            avx512_vnni: cpu_ft.avx512_vnni,
            avx512_bf16: cpu_ft.avx512_bf16,
            avx512f16: cpu_ft.avx512f16,
            amx_tile: cpu_ft.amx_tile,
            amx_bf16: cpu_ft.amx_bf16,
            amx_int8: cpu_ft.amx_int8,
            amx_fp16: cpu_ft.amx_fp16,
            vec_isa,
            compiler,
        }
    }
}

pub fn detect_hw_config() -> HWConfig {
    let hw_config = &*RUNTIME_HW_CONFIG;
    HWConfig::new(hw_config.cpu_ft(), hw_config.vec_isa().to_string(), format!("{:?}", hw_config.compiler()))
}

/// Report for a simulated host, only the isa level features are known.
pub fn simulated_hw_config(host: &HostCapabilities) -> HWConfig {
    let cpu_ft = CpuFeatures {
        avx512f16: host.avx512_fp16,
        amx_fp16: host.amx_fp16,
        ..CpuFeatures::default()
    };
    HWConfig::new(cpu_ft, host.vec_isa.to_string(), format!("{:?}", host.compiler))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    pub hw_config: HWConfig,
    pub simulated: bool,
    pub os: String,
    pub arch: String,
    pub num_threads: usize,
}

pub fn get_benchmark_config(simulated: Option<&HostCapabilities>) -> BenchmarkConfig {
    let (hw_config, num_threads) = match simulated {
        Some(host) => (simulated_hw_config(host), host.num_threads),
        None => (detect_hw_config(), ugemm_base::ugemm_num_threads()),
    };
    let os = std::env::consts::OS.to_string();
    let arch = std::env::consts::ARCH.to_string();
    BenchmarkConfig { hw_config, simulated: simulated.is_some(), os, arch, num_threads }
}
