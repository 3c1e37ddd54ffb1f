use std::fmt;

use ugemm_base::CompilerKind;

use crate::config::{GemmBlocking, LayoutType, MicroGemmConfig};
use crate::cpp::{self, addr_of, raw, var, CodeWriter, CppType, Expr, Function, Item, Param};
use crate::dtype::Dtype;
use crate::error::{Error, Result};
use crate::kernel::{GemmOperands, TemplateKernel};

pub mod amx;
pub mod brgemm;
pub mod fp16;
pub mod reference;
pub mod vec;

pub use amx::AmxMicroGemm;
pub use brgemm::BrgemmMicroGemm;
pub use fp16::Fp16ScaledTile;
pub use reference::RefMicroGemm;
pub use vec::{Fp32Tile, TileCompute, VecMicroGemm};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum VariantKind {
    Reference,
    Fp32Vec,
    Fp16Vec,
    Amx,
    Brgemm,
}

impl VariantKind {
    /// Kinds with builtin configs, in registration order. Reference is only a fallback.
    pub const REGISTERED: [VariantKind; 4] =
        [VariantKind::Fp32Vec, VariantKind::Fp16Vec, VariantKind::Amx, VariantKind::Brgemm];

    pub fn describe_configs(self) -> Vec<MicroGemmConfig> {
        match self {
            VariantKind::Reference => vec![],
            VariantKind::Fp32Vec => vec::fp32_configs(),
            VariantKind::Fp16Vec => fp16::fp16_configs(),
            VariantKind::Amx => amx::amx_configs(),
            VariantKind::Brgemm => brgemm::brgemm_configs(),
        }
    }

    pub fn instantiate(self, common: MicroGemmCommon) -> Result<Box<dyn MicroGemm>> {
        common.check_dtypes(self)?;
        let gemm: Box<dyn MicroGemm> = match self {
            VariantKind::Reference => Box::new(RefMicroGemm::new(common)),
            VariantKind::Fp32Vec => Box::new(VecMicroGemm::<Fp32Tile>::new(common)),
            VariantKind::Fp16Vec => Box::new(VecMicroGemm::<Fp16ScaledTile>::new(common)),
            VariantKind::Amx => Box::new(AmxMicroGemm::new(common)),
            VariantKind::Brgemm => Box::new(BrgemmMicroGemm::new(common)),
        };
        Ok(gemm)
    }

    pub fn name(self) -> &'static str {
        match self {
            VariantKind::Reference => "reference",
            VariantKind::Fp32Vec => "fp32_vec",
            VariantKind::Fp16Vec => "fp16_vec",
            VariantKind::Amx => "amx",
            VariantKind::Brgemm => "brgemm",
        }
    }
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State shared by every variant: naming, dtypes, blocking, alpha and the target compiler.
#[derive(Clone, Debug, PartialEq)]
pub struct MicroGemmCommon {
    pub name: String,
    pub input_dtype: Dtype,
    pub input2_dtype: Dtype,
    pub output_dtype: Dtype,
    pub compute_dtype: Dtype,
    pub register_blocking: GemmBlocking,
    pub alpha: f64,
    pub compiler: CompilerKind,
}

impl MicroGemmCommon {
    pub fn from_config(name: &str, config: &MicroGemmConfig, alpha: f64, compiler: CompilerKind) -> Self {
        Self {
            name: name.to_string(),
            input_dtype: config.input_dtype,
            input2_dtype: config.input2_dtype,
            output_dtype: config.output_dtype,
            compute_dtype: config.compute_dtype,
            register_blocking: config.register_blocking,
            alpha,
            compiler,
        }
    }

    fn check_dtypes(&self, kind: VariantKind) -> Result<()> {
        if self.input_dtype == Dtype::UInt8
            && (self.compute_dtype != Dtype::Int32
                || self.output_dtype != Dtype::Int32
                || self.input2_dtype != Dtype::Int8)
        {
            return Err(Error::InvalidDtypes {
                kind,
                reason: format!(
                    "uint8 input needs int8 B with int32 compute and output, got ({}, {}, {})",
                    self.input2_dtype, self.output_dtype, self.compute_dtype
                ),
            });
        }
        Ok(())
    }

    pub fn restrict_keyword(&self) -> &'static str {
        self.compiler.restrict_keyword()
    }

    pub fn input_t(&self) -> CppType {
        CppType::named(self.input_dtype.cpp_name())
    }

    pub fn input2_t(&self) -> CppType {
        CppType::named(self.input2_dtype.cpp_name())
    }

    pub fn output_t(&self) -> CppType {
        CppType::named(self.output_dtype.cpp_name())
    }

    pub fn compute_t(&self) -> CppType {
        CppType::named(self.compute_dtype.cpp_name())
    }

    pub fn alpha_is_one(&self) -> bool {
        self.alpha == 1.0
    }

    pub fn alpha_expr(&self) -> Expr {
        Expr::Float(self.alpha)
    }

    /// `const T* RESTRICT name`
    pub fn const_restrict(&self, ty: CppType, name: &str) -> Param {
        Param::new(ty.const_ptr().restrict(self.restrict_keyword()), name)
    }

    pub fn restrict(&self, ty: CppType, name: &str) -> Param {
        Param::new(ty.ptr().restrict(self.restrict_keyword()), name)
    }

    /// Signature shared by every entry function: `template <bool accum> inline void NAME(...)`.
    pub fn declaration(&self, extra: Option<Param>, with_scale: bool) -> Function {
        let mut params = vec![];
        params.extend(extra);
        params.push(self.const_restrict(self.input_t(), "A"));
        params.push(self.const_restrict(self.input2_t(), "B"));
        if with_scale {
            params.push(self.const_restrict(self.input_t(), "S"));
        }
        params.push(self.restrict(self.output_t(), "C"));
        for dim in ["M", "N", "K", "lda", "ldb", "ldc"] {
            params.push(Param::new(CppType::named("int64_t"), dim));
        }
        Function::new(self.name.clone(), params).template(vec![Param::new(CppType::named("bool"), "accum")])
    }
}

/// A micro gemm code generator for one selected configuration.
pub trait MicroGemm: fmt::Debug {
    fn kind(&self) -> VariantKind;

    fn common(&self) -> &MicroGemmCommon;

    /// Leading argument threaded through every call, declaration and call site spelling.
    fn extra_arg(&self) -> Option<(Param, Expr)> {
        None
    }

    fn takes_scale(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        &self.common().name
    }

    fn input_dtype(&self) -> Dtype {
        self.common().input_dtype
    }

    fn input2_dtype(&self) -> Dtype {
        self.common().input2_dtype
    }

    fn output_dtype(&self) -> Dtype {
        self.common().output_dtype
    }

    fn compute_dtype(&self) -> Dtype {
        self.common().compute_dtype
    }

    fn register_blocking(&self) -> GemmBlocking {
        self.common().register_blocking
    }

    fn alpha(&self) -> f64 {
        self.common().alpha
    }

    fn declaration(&self) -> Function {
        self.common().declaration(self.extra_arg().map(|(p, _)| p), self.takes_scale())
    }

    fn emit_declaration(&self) -> String {
        let mut w = CodeWriter::new();
        w.function(&self.declaration());
        w.finish()
    }

    /// Call site computing `C = alpha * A @ B`, or `C += alpha * A @ B` when `accum`.
    fn emit_call(&self, kernel: &dyn TemplateKernel, operands: &GemmOperands, accum: bool) -> Result<String> {
        let mut args = vec![];
        args.extend(self.extra_arg().map(|(_, e)| e));
        args.push(addr_of(raw(kernel.index(operands.a, &[0, 0])?)));
        args.push(addr_of(raw(kernel.index(operands.b, &[0, 0])?)));
        if self.takes_scale() {
            let scale = operands.scale.ok_or(Error::MissingOperand { kind: self.kind(), operand: "S" })?;
            args.push(addr_of(raw(kernel.index(scale, &[0])?)));
        }
        args.push(addr_of(raw(kernel.index(operands.c, &[0, 0])?)));
        args.push(raw(kernel.size(operands.c, 0)?));
        args.push(raw(kernel.size(operands.c, 1)?));
        args.push(raw(kernel.size(operands.a, 1)?));
        args.push(raw(kernel.stride(operands.a, 0)?));
        args.push(raw(kernel.stride(operands.b, 0)?));
        args.push(raw(kernel.stride(operands.c, 0)?));
        let call = var(self.name()).call_t(vec![Expr::Bool(accum)], args).vertical();
        let mut w = CodeWriter::new();
        w.stmt(&call.into());
        Ok(w.finish())
    }

    /// Full definition of the entry function and its helpers.
    fn emit_body(&self, kernel: &dyn TemplateKernel) -> Result<String> {
        Ok(cpp::render_items(&self.body_items(kernel)?))
    }

    fn body_items(&self, kernel: &dyn TemplateKernel) -> Result<Vec<Item>>;

    fn emit_init(&self, _kernel: &dyn TemplateKernel) -> String {
        String::new()
    }

    fn emit_finalize(&self, _kernel: &dyn TemplateKernel) -> String {
        String::new()
    }

    fn b_layout(&self) -> LayoutType {
        LayoutType::Normal
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::common;
    use super::*;
    use crate::kernel::DenseKernel;

    #[test]
    fn test_declaration() {
        let gemm = VariantKind::Fp32Vec
            .instantiate(common("k", [Dtype::BFloat16, Dtype::Int8, Dtype::Float32, Dtype::Float32], (8, 32, 1), 1.0))
            .unwrap();
        let expected = "template <bool accum>
inline void k(
    const bfloat16* __restrict__ A,
    const int8_t* __restrict__ B,
    float* __restrict__ C,
    int64_t M,
    int64_t N,
    int64_t K,
    int64_t lda,
    int64_t ldb,
    int64_t ldc
)
";
        assert_eq!(gemm.emit_declaration(), expected);
    }

    #[test]
    fn test_msvc_restrict() {
        let mut c = common("k", [Dtype::Float32; 4], (1, 1, 1), 1.0);
        c.compiler = CompilerKind::Msvc;
        let gemm = VariantKind::Reference.instantiate(c).unwrap();
        let decl = gemm.emit_declaration();
        assert!(decl.contains("const float* __restrict A,"));
        assert!(!decl.contains("__restrict__"));
    }

    #[test]
    fn test_call() {
        let gemm = VariantKind::Reference.instantiate(common("k1", [Dtype::Float64; 4], (1, 1, 1), 1.0)).unwrap();
        let kernel = DenseKernel::for_gemm(CompilerKind::Gnu, 3, 5, 7);
        let call = gemm.emit_call(&kernel, &GemmOperands::new("A", "B", "C"), true).unwrap();
        let expected = "k1<true>(
    &(A[0]),
    &(B[0]),
    &(C[0]),
    3,
    5,
    7,
    7,
    5,
    5
);
";
        assert_eq!(call, expected);
        let call = gemm.emit_call(&kernel, &GemmOperands::new("A", "B", "C"), false).unwrap();
        assert!(call.starts_with("k1<false>("));
        assert!(matches!(
            gemm.emit_call(&kernel, &GemmOperands::new("A", "W", "C"), false),
            Err(Error::UnknownBuffer(name)) if name == "W"
        ));
    }

    #[test]
    fn test_uint8_dtype_rules() {
        let ok = common("q", [Dtype::UInt8, Dtype::Int8, Dtype::Int32, Dtype::Int32], (32, 32, 64), 1.0);
        assert!(VariantKind::Amx.instantiate(ok).is_ok());
        let bad = common("q", [Dtype::UInt8, Dtype::UInt8, Dtype::Int32, Dtype::Int32], (32, 32, 64), 1.0);
        assert!(matches!(VariantKind::Amx.instantiate(bad), Err(Error::InvalidDtypes { .. })));
        let bad = common("q", [Dtype::UInt8, Dtype::Int8, Dtype::Float32, Dtype::Int32], (1, 1, 1), 1.0);
        assert!(matches!(VariantKind::Reference.instantiate(bad), Err(Error::InvalidDtypes { .. })));
    }
}
