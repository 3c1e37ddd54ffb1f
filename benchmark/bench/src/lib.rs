pub mod hardware;

use anyhow::{anyhow, Context};
use serde::Serialize;

use ugemm::{
    create_micro_gemm, DenseKernel, Dtype, GemmOperands, GemmRequest, HostCapabilities, MicroGemm, Registry,
};

pub fn dtype_from_str(s: &str) -> anyhow::Result<Dtype> {
    Dtype::parse(s).ok_or_else(|| anyhow!("unknown dtype `{s}`"))
}

/// The detected host, or one of the simulated ones by name.
pub fn host_from_str(name: Option<&str>) -> anyhow::Result<HostCapabilities> {
    match name {
        None => Ok(HostCapabilities::detect()),
        Some(name) => ugemm_dev::simulated_host(name).ok_or_else(|| {
            anyhow!("unknown simulated host `{name}`, expected one of {:?}", ugemm_dev::SIMULATED_HOSTS)
        }),
    }
}

/// Every text fragment emitted for one micro gemm site.
#[derive(Debug, Serialize)]
pub struct GeneratedKernel {
    pub name: String,
    pub kind: String,
    pub register_blocking: (usize, usize, usize),
    pub dtypes: [String; 4],
    pub b_layout: String,
    pub declaration: String,
    pub call: String,
    pub body: String,
    pub init: String,
    pub finalize: String,
}

fn emit(gemm: &dyn MicroGemm, m: usize, n: usize, k: usize, host: &HostCapabilities) -> anyhow::Result<GeneratedKernel> {
    let kernel = DenseKernel::for_gemm(host.compiler, m, n, k);
    let blocking = gemm.register_blocking();
    let operands = GemmOperands::new("A", "B", "C").with_scale("S");
    Ok(GeneratedKernel {
        name: gemm.name().to_string(),
        kind: gemm.kind().to_string(),
        register_blocking: (blocking.block_m, blocking.block_n, blocking.block_k),
        dtypes: [gemm.input_dtype(), gemm.input2_dtype(), gemm.output_dtype(), gemm.compute_dtype()]
            .map(|dt| dt.to_string()),
        b_layout: format!("{:?}", gemm.b_layout()),
        declaration: gemm.emit_declaration(),
        call: gemm.emit_call(&kernel, &operands, false)?,
        body: gemm.emit_body(&kernel)?,
        init: gemm.emit_init(&kernel),
        finalize: gemm.emit_finalize(&kernel),
    })
}

/// Selects and emits the kernel for a concrete `m x n x k` request.
pub fn generate(
    registry: &Registry,
    host: &HostCapabilities,
    request: &GemmRequest,
) -> anyhow::Result<Option<GeneratedKernel>> {
    let resolved = ugemm::ResolvedRequest::resolve(request, host)?;
    let gemm = create_micro_gemm(registry, host, request).with_context(|| format!("selecting `{}`", request.name))?;
    gemm.map(|gemm| emit(gemm.as_ref(), resolved.m, resolved.n, resolved.k, host)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_on_simulated_hosts() {
        let registry = Registry::builtin().unwrap();
        for name in ugemm_dev::SIMULATED_HOSTS {
            let host = host_from_str(Some(name)).unwrap();
            let request = GemmRequest::new("k", 64, 64, 64, Dtype::BFloat16, Dtype::BFloat16)
                .with_output_dtype(Dtype::Float32);
            let generated = generate(&registry, &host, &request).unwrap().unwrap();
            assert!(generated.declaration.contains("inline void k("));
            assert!(generated.call.starts_with("k<false>("), "{name}");
        }
        assert!(host_from_str(Some("sparc")).is_err());
        assert!(dtype_from_str("bf16").is_ok());
        assert!(dtype_from_str("complex").is_err());
    }
}
