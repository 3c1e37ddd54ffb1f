use ugemm_base::{HostCapabilities, VecIsa};

use crate::config::{generate_gemm_config, CheckArgs, DtypeSpec, Eligibility, LayoutType, MicroGemmConfig};
use crate::cpp::{var, CodeWriter, Item};
use crate::dtype::Dtype;
use crate::error::Result;
use crate::kernel::TemplateKernel;

use super::{MicroGemm, MicroGemmCommon, VariantKind};

fn check_brgemm_extra(_config: &MicroGemmConfig, args: &CheckArgs, host: &HostCapabilities) -> bool {
    host.amx_fp16 && args.k % 2 == 0 && args.alpha == 1.0
}

pub const BRGEMM_EXTRA: Eligibility = Eligibility::new("amx_fp16_brgemm", check_brgemm_extra);

pub(super) fn brgemm_configs() -> Vec<MicroGemmConfig> {
    generate_gemm_config(
        VecIsa::Amx,
        &[(32, 32, 32), (48, 16, 32), (16, 48, 32)],
        DtypeSpec::new(Dtype::Float16).output(Dtype::Float32),
        Some(BRGEMM_EXTRA),
    )
}

/// Delegates the whole block to the runtime batch-reduce gemm of the host library.
#[derive(Debug)]
pub struct BrgemmMicroGemm {
    common: MicroGemmCommon,
}

impl BrgemmMicroGemm {
    pub fn new(common: MicroGemmCommon) -> Self {
        Self { common }
    }
}

impl MicroGemm for BrgemmMicroGemm {
    fn kind(&self) -> VariantKind {
        VariantKind::Brgemm
    }

    fn common(&self) -> &MicroGemmCommon {
        &self.common
    }

    fn body_items(&self, _kernel: &dyn TemplateKernel) -> Result<Vec<Item>> {
        let args = ["M", "N", "K", "lda", "ldb", "ldc", "accum", "A", "B", "C"].map(var).to_vec();
        let body = vec![var("at::native::cpublas::brgemm").call(args).vertical().into()];
        Ok(vec![Item::Include("ATen/native/CPUBlas.h".to_string()), Item::Function(self.declaration().body(body))])
    }

    fn emit_finalize(&self, _kernel: &dyn TemplateKernel) -> String {
        let mut w = CodeWriter::new();
        w.stmt(&var("at::native::cpublas::brgemm_release").call(vec![]).into());
        w.finish()
    }

    fn b_layout(&self) -> LayoutType {
        LayoutType::Vnni2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::DenseKernel;
    use crate::variants::test_utils::common;
    use ugemm_base::CompilerKind;

    #[test]
    fn test_configs() {
        let configs = brgemm_configs();
        assert_eq!(configs.len(), 3);
        assert!(configs.iter().all(|c| c.vec_isa == VecIsa::Amx && c.input_dtype == Dtype::Float16));
        assert!(configs.iter().all(|c| c.compute_dtype == Dtype::Float32));
    }

    #[test]
    fn test_extra_check() {
        let config = &brgemm_configs()[0];
        let args = |k, alpha| CheckArgs { m: 32, n: 32, k, alpha, num_threads: 1 };
        let host = HostCapabilities::new(VecIsa::Amx).with_amx_fp16(true);
        assert!(check_brgemm_extra(config, &args(64, 1.0), &host));
        assert!(!check_brgemm_extra(config, &args(63, 1.0), &host));
        assert!(!check_brgemm_extra(config, &args(64, 2.0), &host));
        assert!(!check_brgemm_extra(config, &args(64, 1.0), &HostCapabilities::new(VecIsa::Amx)));
    }

    #[test]
    fn test_body() {
        let gemm = BrgemmMicroGemm::new(common("b", [Dtype::Float16, Dtype::Float16, Dtype::Float32, Dtype::Float32], (32, 32, 32), 1.0));
        let kernel = DenseKernel::new(CompilerKind::Gnu);
        let body = gemm.emit_body(&kernel).unwrap();
        assert!(body.starts_with("#include <ATen/native/CPUBlas.h>\n\ntemplate <bool accum>\ninline void b(\n"));
        assert!(body.contains(") {\n    at::native::cpublas::brgemm(\n        M,\n        N,\n        K,\n        lda,\n        ldb,\n        ldc,\n        accum,\n        A,\n        B,\n        C\n    );\n}\n"));
        assert_eq!(gemm.emit_finalize(&kernel), "at::native::cpublas::brgemm_release();\n");
        assert!(gemm.emit_init(&kernel).is_empty());
        assert_eq!(gemm.b_layout(), LayoutType::Vnni2);
    }
}
