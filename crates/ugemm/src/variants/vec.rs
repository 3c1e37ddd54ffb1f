use std::fmt;
use std::marker::PhantomData;

use ugemm_base::VecIsa;

use crate::config::{generate_gemm_config, DtypeSpec, MicroGemmConfig};
use crate::cpp::*;
use crate::dtype::Dtype;
use crate::error::Result;
use crate::kernel::TemplateKernel;

use super::{MicroGemm, MicroGemmCommon, VariantKind};

const AVX512_BLOCKINGS: [(usize, usize, usize); 3] = [(8, 48, 1), (8, 32, 1), (16, 16, 1)];
const AVX2_BLOCKINGS: [(usize, usize, usize); 3] = [(4, 24, 1), (4, 16, 1), (8, 8, 1)];

pub(super) fn fp32_configs() -> Vec<MicroGemmConfig> {
    let dtype_specs = [
        DtypeSpec::new(Dtype::Float32),
        DtypeSpec::new(Dtype::BFloat16).output(Dtype::Float32),
        DtypeSpec::new(Dtype::Float16).output(Dtype::Float32),
        DtypeSpec::new(Dtype::BFloat16).input2(Dtype::Int8).output(Dtype::Float32).compute(Dtype::Float32),
    ];
    let mut configs = vec![];
    for (isa, blockings) in [(VecIsa::Avx512, &AVX512_BLOCKINGS), (VecIsa::Avx2, &AVX2_BLOCKINGS)] {
        for spec in dtype_specs {
            configs.extend(generate_gemm_config(isa, blockings, spec, None));
        }
    }
    configs
}

/// Inner tile backend of the register blocked strategy: how a C tile is loaded,
/// how A and B lanes enter registers, the fused multiply add and the store.
pub trait TileCompute: fmt::Debug {
    const KIND: VariantKind;
    // kernels take a per column scale `S` after `B`
    const SCALED: bool;

    /// Type aliases, lane constants and register arrays at the top of the inner kernel.
    fn prologue(g: &MicroGemmCommon) -> Vec<Stmt>;
    fn load_c(g: &MicroGemmCommon, addr: Expr) -> Expr;
    fn zero_c(g: &MicroGemmCommon) -> Expr;
    /// Broadcast of one A element, alpha folded in.
    fn broadcast_a(g: &MicroGemmCommon, a: Expr) -> Expr;
    /// Statements leaving column `col` of B in `vb[col]`.
    fn load_b(g: &MicroGemmCommon, addr: Expr) -> Vec<Stmt>;
    fn fma(va: Expr, vb: Expr, vc: Expr) -> Expr;
    fn store_c(vc: Expr, addr: Expr) -> Expr;
}

/// `static_cast<T>(a)`, times alpha unless it is one.
pub(super) fn scaled_scalar(g: &MicroGemmCommon, ty: CppType, a: Expr) -> Expr {
    let a = static_cast(ty, a);
    if g.alpha_is_one() {
        a
    } else {
        a * g.alpha_expr()
    }
}

#[derive(Debug)]
pub struct Fp32Tile;

impl TileCompute for Fp32Tile {
    const KIND: VariantKind = VariantKind::Fp32Vec;
    const SCALED: bool = false;

    fn prologue(g: &MicroGemmCommon) -> Vec<Stmt> {
        let vectorized = CppType::named("Vectorized");
        vec![
            using("Vectorized", CppType::template("at::vec::Vectorized", vec![var(g.compute_dtype.cpp_name())])),
            using("VectorizedIn", CppType::template("at::vec::Vectorized", vec![var(g.input2_dtype.cpp_name())])),
            Decl::new(CppType::Auto, "VLEN").constexpr().init(var("Vectorized::size").call(vec![])).into(),
            Decl::new(CppType::Auto, "ROWS").constexpr().init(var("BLOCK_M")).into(),
            Decl::new(CppType::Auto, "COLS").constexpr().init(var("BLOCK_N") / var("VLEN")).into(),
            lit_line(""),
            Decl::new(vectorized, "va").into(),
            Decl::new(CppType::template("at::vec::VectorizedN", vec![var(g.compute_dtype.cpp_name()), var("COLS")]), "vb")
                .into(),
            Decl::new(
                CppType::template("at::vec::VectorizedN", vec![
                    var(g.compute_dtype.cpp_name()),
                    var("ROWS") * var("COLS"),
                ]),
                "vc",
            )
            .into(),
        ]
    }

    fn load_c(_g: &MicroGemmCommon, addr: Expr) -> Expr {
        var("Vectorized::loadu").call(vec![addr])
    }

    fn zero_c(_g: &MicroGemmCommon) -> Expr {
        construct(CppType::named("Vectorized"), vec![lit("0.0f")])
    }

    fn broadcast_a(g: &MicroGemmCommon, a: Expr) -> Expr {
        construct(CppType::named("Vectorized"), vec![scaled_scalar(g, g.compute_t(), a)])
    }

    fn load_b(g: &MicroGemmCommon, addr: Expr) -> Vec<Stmt> {
        let vb_col = var("vb").index(var("col"));
        match g.input2_dtype {
            Dtype::BFloat16 | Dtype::Float16 => vec![
                Decl::new(CppType::Auto, "b").init(var("VectorizedIn::loadu").call(vec![addr, var("VLEN")])).into(),
                vb_col.assign(var("at::vec::convert").call_t(vec![var(g.compute_dtype.cpp_name())], vec![var("b")])).into(),
            ],
            Dtype::Int8 => vec![
                comment("Convert VLEN int8 elements to int32, and then fp32"),
                Decl::new(CppType::Auto, "b32")
                    .init(var("at::vec::convert_to_int32").call_t(vec![var("int8_t")], vec![addr]))
                    .into(),
                vb_col.assign(var("at::vec::convert").call_t(vec![var("float")], vec![var("b32")])).into(),
            ],
            _ => vec![vb_col.assign(var("Vectorized::loadu").call(vec![addr])).into()],
        }
    }

    fn fma(va: Expr, vb: Expr, vc: Expr) -> Expr {
        var("at::vec::fmadd").call(vec![va, vb, vc])
    }

    fn store_c(vc: Expr, addr: Expr) -> Expr {
        vc.method("store", vec![addr])
    }
}

// blank separator line inside generated bodies
pub(super) fn lit_line(s: &str) -> Stmt {
    Stmt::Verbatim(s.to_string())
}

/// Register blocked micro gemm, `BLOCK_M x BLOCK_N` tiles of C accumulated over K,
/// generic over the tile backend.
#[derive(Debug)]
pub struct VecMicroGemm<T: TileCompute> {
    common: MicroGemmCommon,
    _tile: PhantomData<T>,
}

impl<T: TileCompute> VecMicroGemm<T> {
    pub fn new(common: MicroGemmCommon) -> Self {
        Self { common, _tile: PhantomData }
    }

    fn kernel_name(&self) -> String {
        format!("{}_kernel", self.common.name)
    }

    fn unroll(count: Expr, args: Vec<Expr>) -> Stmt {
        brace_init(CppType::template("c10::ForcedUnroll", vec![count])).call(args).into()
    }

    fn row_col() -> Vec<Stmt> {
        let int_t = CppType::named("int");
        vec![
            Decl::new(int_t.clone(), "row").constexpr().init(var("i") / var("COLS")).into(),
            Decl::new(int_t, "col").constexpr().init(var("i") % var("COLS")).into(),
        ]
    }

    fn tile_addr(base: &str, ld: &str) -> Expr {
        var(base) + var("row") * var(ld) + var("col") * var("VLEN")
    }

    fn inner_kernel(&self) -> Function {
        let g = &self.common;
        let i64_t = || CppType::named("int64_t");
        let mut params = vec![g.const_restrict(g.input_t(), "A"), g.const_restrict(g.input2_t(), "B")];
        if T::SCALED {
            params.push(Param::new(g.input_t().const_ptr(), "S"));
        }
        params.push(g.restrict(g.output_t(), "C"));
        for dim in ["K", "lda", "ldb", "ldc"] {
            params.push(Param::new(i64_t(), dim));
        }

        let mut body = T::prologue(g);
        body.push(lit_line(""));

        let vc_i = || var("vc").index(var("i"));
        let mut load_branch = Self::row_col();
        load_branch.push(vc_i().assign(T::load_c(g, Self::tile_addr("C", "ldc"))).into());
        let loadc = if_constexpr(var("accum"), load_branch).otherwise(vec![vc_i().assign(T::zero_c(g)).into()]);
        body.push(Decl::new(CppType::Auto, "loadc").init(lambda(&["&"], vec![Param::new(CppType::Auto, "i")], vec![loadc.into()])).into());
        body.push(Self::unroll(var("ROWS") * var("COLS"), vec![var("loadc")]));
        body.push(lit_line(""));

        let mut compute = Self::row_col();
        compute.push(lit_line(""));
        let a_elem = var("A").index(var("row") * var("lda") + var("k"));
        compute.push(if_constexpr(var("col").cmp_eq(int(0)), vec![var("va").assign(T::broadcast_a(g, a_elem)).into()]).into());
        compute.push(lit_line(""));
        let b_addr = var("B") + var("k") * var("ldb") + var("col") * var("VLEN");
        compute.push(if_constexpr(var("row").cmp_eq(int(0)), T::load_b(g, b_addr)).into());
        compute.push(lit_line(""));
        compute.push(Decl::new(CppType::named("int"), "idx").constexpr().init(var("row") * var("COLS") + var("col")).into());
        let vc_idx = || var("vc").index(var("idx"));
        compute.push(vc_idx().assign(T::fma(var("va"), var("vb").index(var("col")), vc_idx())).into());
        let compute_params = vec![Param::new(CppType::Auto, "i"), Param::new(CppType::named("int"), "k")];
        body.push(Decl::new(CppType::Auto, "compute").init(lambda(&["&", "COLS"], compute_params, compute)).into());
        body.push(lit_line(""));

        body.push(
            for_(CppType::named("int"), "k", int(0), var("k").cmp_lt(var("K")), var("k").pre_inc(), vec![Self::unroll(
                var("ROWS") * var("COLS"),
                vec![var("compute"), var("k")],
            )])
            .into(),
        );
        body.push(lit_line(""));

        body.push(comment("store to C"));
        let mut store = Self::row_col();
        store.push(T::store_c(vc_i(), Self::tile_addr("C", "ldc")).into());
        body.push(Decl::new(CppType::Auto, "storec").init(lambda(&["&"], vec![Param::new(CppType::Auto, "i")], store)).into());
        body.push(Self::unroll(var("ROWS") * var("COLS"), vec![var("storec")]));

        Function::new(self.kernel_name(), params)
            .template(vec![
                Param::new(i64_t(), "BLOCK_M"),
                Param::new(i64_t(), "BLOCK_N"),
                Param::new(CppType::named("bool"), "accum"),
            ])
            .body(body)
    }

    fn kernel_call(&self, rows: usize) -> Stmt {
        let b = &self.common.register_blocking;
        let mut args = vec![var("A") + var("m") * var("lda"), var("B") + var("n")];
        if T::SCALED {
            args.push(var("S") + var("n"));
        }
        args.push(var("C") + var("m") * var("ldc") + var("n"));
        args.extend(["K", "lda", "ldb", "ldc"].map(var));
        let targs = vec![int(rows as i64), int(b.block_n as i64), var("accum")];
        var(self.kernel_name()).call_t(targs, args).vertical().into()
    }

    fn entry(&self, kernel: &dyn TemplateKernel) -> Function {
        let b = self.common.register_blocking;
        let (bm, bn, bk) = (b.block_m as i64, b.block_n as i64, b.block_k as i64);
        let check = |cond: Expr, msg: String| -> Stmt { var(kernel.assert_function()).call(vec![cond, string(msg)]).into() };
        let i64_t = || CppType::named("int64_t");

        let mut cases: Vec<Case> = (1..b.block_m)
            .rev()
            .map(|rows| Case { label: Some(rows as i64), body: vec![self.kernel_call(rows), Stmt::Break] })
            .collect();
        cases.push(Case { label: None, body: vec![check(Expr::Bool(false), format!("Unsupported block_m: {bm}"))] });
        let dispatch = if_(var("block_m").cmp_eq(int(bm)), vec![self.kernel_call(b.block_m)])
            .otherwise(vec![Stmt::Switch { scrutinee: var("block_m"), cases }]);

        let n_loop = for_(i64_t(), "n", int(0), var("n").cmp_lt(var("N")), var("n").add_assign(int(bn)), vec![dispatch.into()]);
        let m_body: Vec<Stmt> = vec![
            Decl::new(i64_t(), "block_m")
                .init(var("std::min").call_t(vec![var("int64_t")], vec![var("M") - var("m"), int(bm)]))
                .into(),
            n_loop.into(),
        ];
        let m_loop = for_(i64_t(), "m", int(0), var("m").cmp_lt(var("M")), var("m").add_assign(int(bm)), m_body);

        let body = vec![
            check((var("N") % int(bn)).cmp_eq(int(0)), format!("N dimension must be multiple of {bn}")),
            check((var("K") % int(bk)).cmp_eq(int(0)), format!("K dimension must be multiple of {bk}")),
            m_loop.into(),
        ];
        self.declaration().body(body)
    }
}

impl<T: TileCompute> MicroGemm for VecMicroGemm<T> {
    fn kind(&self) -> VariantKind {
        T::KIND
    }

    fn common(&self) -> &MicroGemmCommon {
        &self.common
    }

    fn takes_scale(&self) -> bool {
        T::SCALED
    }

    fn body_items(&self, kernel: &dyn TemplateKernel) -> Result<Vec<Item>> {
        Ok(vec![Item::Function(self.inner_kernel()), Item::Function(self.entry(kernel))])
    }
}
