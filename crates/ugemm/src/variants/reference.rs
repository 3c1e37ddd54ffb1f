use crate::cpp::{c_cast, for_, int, ternary, var, CppType, Decl, Item, Stmt};
use crate::error::Result;
use crate::kernel::TemplateKernel;

use super::{MicroGemm, MicroGemmCommon, VariantKind};

/// Naive triple loop, the universal fallback and correctness baseline.
#[derive(Debug)]
pub struct RefMicroGemm {
    common: MicroGemmCommon,
}

impl RefMicroGemm {
    pub fn new(mut common: MicroGemmCommon) -> Self {
        common.register_blocking = (1, 1, 1).into();
        Self { common }
    }
}

impl MicroGemm for RefMicroGemm {
    fn kind(&self) -> VariantKind {
        VariantKind::Reference
    }

    fn common(&self) -> &MicroGemmCommon {
        &self.common
    }

    fn body_items(&self, _kernel: &dyn TemplateKernel) -> Result<Vec<Item>> {
        let g = &self.common;
        let i64_t = || CppType::named("int64_t");
        let c_mn = || var("C").index(var("m") * var("ldc") + var("n"));
        let product = c_cast(g.compute_t(), var("A").index(var("m") * var("lda") + var("k")))
            * c_cast(g.compute_t(), var("B").index(var("k") * var("ldb") + var("n")))
            * g.alpha_expr();
        let k_loop = for_(i64_t(), "k", int(0), var("k").cmp_lt(var("K")), var("k").pre_inc(), vec![var("result")
            .add_assign(product)
            .into()]);
        let n_body: Vec<Stmt> = vec![
            Decl::new(g.compute_t(), "result").init(ternary(var("accum"), c_mn(), int(0))).into(),
            k_loop.into(),
            c_mn().assign(var("result")).into(),
        ];
        let n_loop = for_(i64_t(), "n", int(0), var("n").cmp_lt(var("N")), var("n").pre_inc(), n_body);
        let m_loop = for_(i64_t(), "m", int(0), var("m").cmp_lt(var("M")), var("m").pre_inc(), vec![n_loop.into()]);
        Ok(vec![Item::Function(self.declaration().body(vec![m_loop.into()]))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GemmBlocking;
    use crate::dtype::Dtype;
    use crate::kernel::DenseKernel;
    use crate::variants::test_utils::common;
    use ugemm_base::CompilerKind;

    #[test]
    fn test_body() {
        let gemm = RefMicroGemm::new(common("k1", [Dtype::Float64; 4], (8, 8, 8), 1.0));
        assert_eq!(gemm.register_blocking(), GemmBlocking::new(1, 1, 1));
        let body = gemm.emit_body(&DenseKernel::new(CompilerKind::Gnu)).unwrap();
        let expected = "template <bool accum>
inline void k1(
    const double* __restrict__ A,
    const double* __restrict__ B,
    double* __restrict__ C,
    int64_t M,
    int64_t N,
    int64_t K,
    int64_t lda,
    int64_t ldb,
    int64_t ldc
) {
    for (int64_t m = 0; m < M; ++m) {
        for (int64_t n = 0; n < N; ++n) {
            double result = accum ? C[m * ldc + n] : 0;
            for (int64_t k = 0; k < K; ++k) {
                result += (double)A[m * lda + k] * (double)B[k * ldb + n] * 1;
            }
            C[m * ldc + n] = result;
        }
    }
}
";
        assert_eq!(body, expected);
        assert!(gemm.emit_init(&DenseKernel::new(CompilerKind::Gnu)).is_empty());
    }

    #[test]
    fn test_alpha() {
        let gemm = RefMicroGemm::new(common("r", [Dtype::Float32; 4], (1, 1, 1), 0.5));
        let body = gemm.emit_body(&DenseKernel::new(CompilerKind::Gnu)).unwrap();
        assert!(body.contains("(float)B[k * ldb + n] * 0.5;"));

        let gemm = RefMicroGemm::new(common("r", [Dtype::Float32; 4], (1, 1, 1), 1e20));
        let body = gemm.emit_body(&DenseKernel::new(CompilerKind::Gnu)).unwrap();
        assert!(body.contains("(float)B[k * ldb + n] * 1e20;"));
    }
}
