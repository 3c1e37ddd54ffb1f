use ugemm_base::{HostCapabilities, VecIsa};

use crate::config::{generate_gemm_config, CheckArgs, DtypeSpec, Eligibility, LayoutType, MicroGemmConfig};
use crate::cpp::*;
use crate::dtype::Dtype;
use crate::error::{Error, Result};
use crate::kernel::TemplateKernel;

use super::vec::lit_line;
use super::{MicroGemm, MicroGemmCommon, VariantKind};

// hardware tile height in rows, also the column width of an fp32/int32 tile
const TILE: usize = 16;
const DEQUANT_VLEN: usize = 32;

fn vnni_size(input_dtype: Dtype) -> usize {
    if input_dtype == Dtype::UInt8 {
        4
    } else {
        2
    }
}

fn check_amx_extra(config: &MicroGemmConfig, args: &CheckArgs, _host: &HostCapabilities) -> bool {
    args.k % vnni_size(config.input_dtype) == 0 && args.alpha == 1.0
}

pub const AMX_EXTRA: Eligibility = Eligibility::new("amx_vnni_k_unit_alpha", check_amx_extra);

pub(super) fn amx_configs() -> Vec<MicroGemmConfig> {
    let bf16_blockings = [(32, 32, 32), (48, 16, 32), (16, 48, 32)];
    let mut configs = generate_gemm_config(
        VecIsa::Amx,
        &bf16_blockings,
        DtypeSpec::new(Dtype::BFloat16).input2(Dtype::Int8).output(Dtype::Float32).compute(Dtype::Float32),
        Some(AMX_EXTRA),
    );
    configs.extend(generate_gemm_config(
        VecIsa::Amx,
        &bf16_blockings,
        DtypeSpec::new(Dtype::BFloat16).output(Dtype::Float32),
        Some(AMX_EXTRA),
    ));
    configs.extend(generate_gemm_config(
        VecIsa::Amx,
        &[(32, 32, 64), (48, 16, 64)],
        DtypeSpec::new(Dtype::UInt8).input2(Dtype::Int8).output(Dtype::Int32).compute(Dtype::Int32),
        Some(AMX_EXTRA),
    ));
    configs
}

/// Tiled matrix extension micro gemm.
///
/// One inner kernel is generated per row count `block_m, block_m - 16, ..., 16`;
/// each keeps `rows / 16 x block_n / 16` accumulator tiles resident while streaming
/// A and B tiles over K. The entry walks N in `block_n` steps and M in `block_m`
/// steps, peeling full 16-row tiles through an `if / else if` chain and finishing
/// the remainder with the 16-row kernel configured for fewer rows.
///
/// K is split into a bulk region of whole `block_k` steps and a tail; the tile
/// unit is reconfigured around the tail because configuration is expensive.
/// With bf16 A and int8 B, a `K x block_n` slab of B is dequantized once per
/// N block into a scratch buffer.
#[derive(Debug)]
pub struct AmxMicroGemm {
    common: MicroGemmCommon,
}

impl AmxMicroGemm {
    pub fn new(common: MicroGemmCommon) -> Self {
        Self { common }
    }

    fn is_int8_gemm(&self) -> bool {
        self.common.input_dtype == Dtype::UInt8
    }

    fn vnni_size(&self) -> usize {
        vnni_size(self.common.input_dtype)
    }

    fn use_cached_dequantized_b(&self) -> bool {
        self.common.input_dtype == Dtype::BFloat16 && self.common.input2_dtype == Dtype::Int8
    }

    fn validate(&self) -> Result<()> {
        let blocking = self.common.register_blocking;
        let invalid = |reason| Err(Error::InvalidBlocking { kind: VariantKind::Amx, blocking, reason });
        if blocking.block_m % TILE != 0 || blocking.block_m == 0 {
            return invalid("block_m must be a positive multiple of 16");
        }
        if blocking.block_n % TILE != 0 || blocking.block_n == 0 {
            return invalid("block_n must be a positive multiple of 16");
        }
        if self.is_int8_gemm() && blocking.block_k != 64 {
            return invalid("block_k must be 64 for int8");
        }
        if !self.is_int8_gemm() && blocking.block_k != 32 {
            return invalid("block_k must be 32 for bfloat16/float16");
        }
        Ok(())
    }

    fn num_columns(&self) -> usize {
        self.common.register_blocking.block_n / TILE
    }

    fn inner_kernel_name(&self, rows: usize) -> String {
        format!("{}_amx_kernel_{rows}_{}", self.common.name, self.num_columns())
    }

    // bf16 A tiles with int8 B read the dequantized bf16 cache instead
    fn b_t(&self) -> CppType {
        if self.use_cached_dequantized_b() {
            self.common.input_t()
        } else {
            self.common.input2_t()
        }
    }

    fn amx_state_param() -> Param {
        Param::new(CppType::named("AMXState").reference(), "amx_state")
    }

    fn configure(&self, rows: usize, bytes_per_row: Expr) -> Stmt {
        var("amx_state")
            .method("configure", vec![
                var("tilecfg_rows"),
                bytes_per_row,
                int((rows / TILE) as i64),
                int(self.num_columns() as i64),
                var("loadconfig"),
            ])
            .into()
    }

    fn for_each_c_tile(&self, rows: usize, f: impl Fn(usize, usize, i64) -> Stmt) -> Vec<Stmt> {
        let cols = self.num_columns();
        let mut stmts = vec![];
        for tile_row in 0..rows / TILE {
            for tile_col in 0..cols {
                stmts.push(f(tile_row, tile_col, (tile_row * cols + tile_col) as i64));
            }
        }
        stmts
    }

    fn c_tile_addr(tile_row: usize, tile_col: usize) -> Expr {
        var("C") + int((tile_row * TILE) as i64) * var("ldc") + int((tile_col * TILE) as i64)
    }

    fn inner_kernel(&self, kernel: &dyn TemplateKernel, rows: usize) -> Function {
        let g = &self.common;
        let b = g.register_blocking;
        let cols = self.num_columns();
        let vnni = self.vnni_size() as i64;
        let i64_t = || CppType::named("int64_t");
        let c_stride = || var("ldc") * sizeof(g.output_t());

        let params = vec![
            Self::amx_state_param(),
            g.const_restrict(g.input_t(), "A"),
            g.const_restrict(self.b_t(), "B"),
            g.restrict(g.output_t(), "C"),
            Param::new(i64_t(), "K"),
            Param::new(i64_t(), "lda"),
            Param::new(i64_t(), "ldb"),
            Param::new(i64_t(), "ldc"),
            Param::new(CppType::named("uint8_t"), "tilecfg_rows"),
        ];

        let tail_bytes = || var("tail_k_size") * sizeof(g.input_t());
        let mut body: Vec<Stmt> = vec![
            Decl::new(CppType::Auto, "loadconfig")
                .init(lambda(&[], vec![Param::new(CppType::named("amx_tilecfg").const_ref(), "cfg")], vec![var(
                    "_tile_loadconfig",
                )
                .call(vec![addr_of(var("cfg"))])
                .into()]))
                .into(),
            Decl::new(CppType::Auto, "last_k_offset")
                .konst()
                .init(var("K") / int(b.block_k as i64) * int(b.block_k as i64))
                .into(),
            Decl::new(CppType::Auto, "tail_k_size").konst().init(var("K") - var("last_k_offset")).into(),
            if_(var("last_k_offset").cmp_gt(int(0)), vec![self.configure(rows, int(64))])
                .hint(BranchHint::Likely)
                .otherwise(vec![self.configure(rows, tail_bytes())])
                .into(),
        ];

        let load_c = self.for_each_c_tile(rows, |r, c, idx| {
            var("_tile_loadd").call(vec![int(idx), Self::c_tile_addr(r, c), c_stride()]).into()
        });
        let zero_c = self.for_each_c_tile(rows, |_, _, idx| var("_tile_zero").call(vec![int(idx)]).into());
        body.push(Decl::new(CppType::Auto, "load_c").init(lambda(&["&"], vec![], load_c)).into());
        body.push(Decl::new(CppType::Auto, "zero_c").init(lambda(&["&"], vec![], zero_c)).into());
        body.push(lit_line(""));
        body.push(
            if_constexpr(var("accum"), vec![var("load_c").call(vec![]).into()])
                .otherwise(vec![var("zero_c").call(vec![]).into()])
                .into(),
        );
        body.push(lit_line(""));

        let tile_offset_a = (rows / TILE * cols) as i64;
        let tile_offset_b = tile_offset_a + (rows / TILE) as i64;
        let dot = if self.is_int8_gemm() { "_tile_dpbusd" } else { "_tile_dpbf16ps" };
        let mut compute = vec![];
        for tile_row in 0..rows / TILE {
            for tile_col in 0..cols {
                let idx_a = tile_offset_a + tile_row as i64;
                let idx_b = tile_offset_b + tile_col as i64;
                let idx_c = (tile_row * cols + tile_col) as i64;
                if tile_col == 0 {
                    compute.push(
                        var("_tile_stream_loadd")
                            .call(vec![
                                int(idx_a),
                                var("A") + int((tile_row * TILE) as i64) * var("lda") + var("k"),
                                var("lda") * sizeof(g.input_t()),
                            ])
                            .into(),
                    );
                }
                if tile_row == 0 {
                    compute.push(
                        var("_tile_loadd")
                            .call(vec![
                                int(idx_b),
                                var("B") + var("k") * var("ldb") + int(tile_col as i64 * TILE as i64 * vnni),
                                var("ldb") * int(vnni) * sizeof(g.input_t()),
                            ])
                            .into(),
                    );
                }
                compute.push(var(dot).call(vec![int(idx_c), int(idx_a), int(idx_b)]).into());
            }
        }
        body.push(
            Decl::new(CppType::Auto, "compute")
                .init(lambda(&["&"], vec![Param::new(CppType::named("int"), "k")], compute))
                .into(),
        );
        body.push(lit_line(""));
        body.push(
            for_(
                CppType::named("int"),
                "k",
                int(0),
                var("k").cmp_lt(var("last_k_offset")),
                var("k").add_assign(int(b.block_k as i64)),
                vec![var("compute").call(vec![var("k")]).into()],
            )
            .pragma(kernel.unroll_pragma(4))
            .into(),
        );
        body.push(lit_line(""));

        let store_c = self.for_each_c_tile(rows, |r, c, idx| {
            var("_tile_stored").call(vec![int(idx), Self::c_tile_addr(r, c), c_stride()]).into()
        });
        body.push(Decl::new(CppType::Auto, "store_c").init(lambda(&["&"], vec![], store_c)).into());
        body.push(lit_line(""));

        let reconfigure = if_(var("last_k_offset").cmp_gt(int(0)), vec![
            var("store_c").call(vec![]).into(),
            self.configure(rows, tail_bytes()),
            var("load_c").call(vec![]).into(),
        ])
        .hint(BranchHint::Likely);
        body.push(
            if_(var("tail_k_size").cmp_gt(int(0)), vec![
                reconfigure.into(),
                var("compute").call(vec![var("last_k_offset")]).into(),
            ])
            .hint(BranchHint::Unlikely)
            .into(),
        );
        body.push(lit_line(""));
        body.push(var("store_c").call(vec![]).into());

        Function::new(self.inner_kernel_name(rows), params)
            .template(vec![Param::new(CppType::named("bool"), "accum")])
            .body(body)
    }

    fn dequant_cache(&self) -> Vec<Stmt> {
        let g = &self.common;
        let bn = g.register_blocking.block_n;
        let mut stmts = vec![
            comment(format!("Buffer holding K * {bn} elements of B dequantized to {}", g.input_dtype)),
            Decl::new(CppType::Auto, "buf_size").konst().init(var("K") * int(bn as i64)).into(),
        ];
        if g.compiler.supports_stack_vla() {
            stmts.push(Decl::new(g.input_t(), "dequantized_B_buf").aligned(4096).array(var("buf_size")).into());
        } else {
            stmts.push(comment("no variable length stack arrays on this compiler, use the heap"));
            stmts.push(
                Decl::new(CppType::template("std::unique_ptr", vec![var(format!("{}[]", g.input_dtype.cpp_name()))]), "heap_deq_b_buf_ptr")
                    .ctor(vec![Expr::NewArray(g.input_t(), Box::new(var("buf_size")))])
                    .into(),
            );
            stmts.push(
                Decl::new(g.input_t().ptr(), "dequantized_B_buf")
                    .init(var("heap_deq_b_buf_ptr").method("get", vec![]))
                    .into(),
            );
        }

        let convert = |vec_idx: usize, count: usize, suffix: String| -> Vec<Stmt> {
            let b_int8 = format!("b_int8{suffix}");
            let b_conv = format!("b_{}{suffix}", g.input_dtype.cpp_name());
            let count_expr = static_cast(CppType::named("int64_t"), int(count as i64));
            let mut store_args = vec![var("dequantized_B_buf") + var("idx_dq") + int(vec_idx as i64)];
            if count != DEQUANT_VLEN {
                store_args.push(count_expr.clone());
            }
            vec![
                Decl::new(CppType::Auto, &b_int8)
                    .init(var("at::vec::Vectorized<int8_t>::loadu").call(vec![
                        var("base_addr") + var("idx_q") + int(vec_idx as i64),
                        count_expr,
                    ]))
                    .into(),
                Decl::new(CppType::Auto, &b_conv)
                    .init(var("at::vec::convert").call_t(vec![var(g.input_dtype.cpp_name())], vec![var(&b_int8)]))
                    .into(),
                var(&b_conv).method("store", store_args).into(),
            ]
        };
        let mut row = vec![];
        let full = bn / DEQUANT_VLEN * DEQUANT_VLEN;
        for vec_idx in (0..full).step_by(DEQUANT_VLEN) {
            row.extend(convert(vec_idx, DEQUANT_VLEN, format!("_{vec_idx}")));
        }
        if bn % DEQUANT_VLEN != 0 {
            row.extend(convert(full, bn % DEQUANT_VLEN, "_tail".to_string()));
        }
        let row_loop = Stmt::For(For {
            pragma: None,
            ty: CppType::named("int64_t"),
            vars: vec![("idx_dq".to_string(), int(0)), ("idx_q".to_string(), int(0))],
            cond: var("idx_dq").cmp_lt(var("buf_size")),
            steps: vec![var("idx_q").add_assign(var("ldb")), var("idx_dq").add_assign(int(bn as i64))],
            body: row,
        });
        let input2_ptr = g.input2_t().ptr();
        let loader = vec![
            Decl::new(input2_ptr.clone(), "base_addr")
                .init(Expr::Cast(CastKind::Const, input2_ptr, Box::new(var("B"))) + var("base_idx"))
                .into(),
            row_loop,
        ];
        stmts.push(
            Decl::new(CppType::Auto, "load_dequantized_B")
                .init(lambda(&["&"], vec![Param::new(CppType::named("int64_t"), "base_idx")], loader))
                .into(),
        );
        stmts
    }

    fn entry(&self, kernel: &dyn TemplateKernel) -> Function {
        let g = &self.common;
        let b = g.register_blocking;
        let (bm, bn) = (b.block_m as i64, b.block_n as i64);
        let cached = self.use_cached_dequantized_b();
        let check = |cond: Expr, msg: String| -> Stmt { var(kernel.assert_function()).call(vec![cond, string(msg)]).into() };
        let i64_t = || CppType::named("int64_t");
        let vnni = self.vnni_size() as i64;

        let mut body = vec![
            check((var("N") % int(bn)).cmp_eq(int(0)), format!("N dimension must be multiple of {bn}")),
            check((var("K") % int(vnni)).cmp_eq(int(0)), format!("K dimension must be multiple of {vnni}")),
        ];
        if cached {
            body.extend(self.dequant_cache());
        }
        body.push(comment("ldb of the cached slab is block_n"));
        body.push(
            Decl::new(i64_t(), "updated_ldb").konst().init(if cached { int(bn) } else { var("ldb") }).into(),
        );

        let b_ptr = || if cached { var("dequantized_B_buf") } else { var("B") + var("n") };
        let call = |rows: usize, m_var: &str, tilecfg_rows: Expr| -> Stmt {
            var(self.inner_kernel_name(rows))
                .call_t(vec![var("accum")], vec![
                    var("amx_state"),
                    var("A") + var(m_var) * var("lda"),
                    b_ptr(),
                    var("C") + var(m_var) * var("ldc") + var("n"),
                    var("K"),
                    var("lda"),
                    var("updated_ldb"),
                    var("ldc"),
                    tilecfg_rows,
                ])
                .vertical()
                .into()
        };
        let branches: Vec<If> = (1..=b.block_m / TILE)
            .rev()
            .map(|t| t * TILE)
            .map(|rows| {
                if_(var("block_m").cmp_ge(int(rows as i64)), vec![
                    call(rows, "m", int(TILE as i64)),
                    var("block_m").sub_assign(int(rows as i64)).into(),
                    var("m_tail").add_assign(int(rows as i64)).into(),
                ])
            })
            .collect();
        let mut m_body: Vec<Stmt> = vec![
            Decl::new(i64_t(), "block_m")
                .init(var("std::min").call_t(vec![var("int64_t")], vec![var("M") - var("m"), int(bm)]))
                .into(),
            Decl::new(i64_t(), "m_tail").init(var("m")).into(),
        ];
        m_body.extend(If::chain(branches).map(Stmt::If));
        m_body.push(if_(var("block_m").cmp_gt(int(0)), vec![call(TILE, "m_tail", var("block_m"))]).into());
        let m_loop = for_(i64_t(), "m", int(0), var("m").cmp_lt(var("M")), var("m").add_assign(int(bm)), m_body);

        let mut n_body = vec![];
        if cached {
            n_body.push(comment(format!("Dequantize K * {bn} int8 B elements")));
            n_body.push(var("load_dequantized_B").call(vec![var("n")]).into());
        }
        n_body.push(m_loop.into());
        body.push(for_(i64_t(), "n", int(0), var("n").cmp_lt(var("N")), var("n").add_assign(int(bn)), n_body).into());

        self.declaration().body(body)
    }
}

impl MicroGemm for AmxMicroGemm {
    fn kind(&self) -> VariantKind {
        VariantKind::Amx
    }

    fn common(&self) -> &MicroGemmCommon {
        &self.common
    }

    fn extra_arg(&self) -> Option<(Param, Expr)> {
        Some((Self::amx_state_param(), var("amx_state")))
    }

    fn body_items(&self, kernel: &dyn TemplateKernel) -> Result<Vec<Item>> {
        self.validate()?;
        let mut items = vec![];
        for t in (1..=self.common.register_blocking.block_m / TILE).rev() {
            items.push(Item::Function(self.inner_kernel(kernel, t * TILE)));
        }
        items.push(Item::Function(self.entry(kernel)));
        Ok(items)
    }

    fn emit_init(&self, _kernel: &dyn TemplateKernel) -> String {
        let mut w = CodeWriter::new();
        w.stmt(&Decl::new(CppType::named("AMXState"), "amx_state").into());
        w.finish()
    }

    fn emit_finalize(&self, _kernel: &dyn TemplateKernel) -> String {
        let release = lambda(&[], vec![], vec![var("_tile_release").call(vec![]).into()]);
        let mut w = CodeWriter::new();
        w.stmt(&var("amx_state").method("release", vec![release]).into());
        w.finish()
    }

    fn b_layout(&self) -> LayoutType {
        if self.is_int8_gemm() {
            LayoutType::Vnni4
        } else {
            LayoutType::Vnni2
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GemmBlocking;
    use crate::kernel::{DenseKernel, GemmOperands};
    use crate::variants::test_utils::common;
    use ugemm_base::CompilerKind;

    const BF16: [Dtype; 4] = [Dtype::BFloat16, Dtype::BFloat16, Dtype::Float32, Dtype::Float32];
    const WOQ: [Dtype; 4] = [Dtype::BFloat16, Dtype::Int8, Dtype::Float32, Dtype::Float32];
    const INT8: [Dtype; 4] = [Dtype::UInt8, Dtype::Int8, Dtype::Int32, Dtype::Int32];

    fn amx(dtypes: [Dtype; 4], blocking: (usize, usize, usize)) -> AmxMicroGemm {
        AmxMicroGemm::new(common("k0", dtypes, blocking, 1.0))
    }

    fn body(gemm: &AmxMicroGemm) -> String {
        gemm.emit_body(&DenseKernel::new(CompilerKind::Gnu)).unwrap()
    }

    #[test]
    fn test_configs() {
        let configs = amx_configs();
        assert_eq!(configs.len(), 8);
        for c in &configs {
            let GemmBlocking { block_m, block_n, block_k } = c.register_blocking;
            assert_eq!(block_m % 16, 0);
            assert_eq!(block_n % 16, 0);
            assert_eq!(block_k, if c.input_dtype == Dtype::UInt8 { 64 } else { 32 });
            assert_eq!(c.extra_check, Some(AMX_EXTRA));
        }
    }

    #[test]
    fn test_extra_check() {
        let host = HostCapabilities::new(VecIsa::Amx);
        let configs = amx_configs();
        let bf16 = &configs[3];
        let u8 = &configs[6];
        let args = |k, alpha| CheckArgs { m: 64, n: 64, k, alpha, num_threads: 1 };
        assert!(check_amx_extra(bf16, &args(34, 1.0), &host));
        assert!(!check_amx_extra(bf16, &args(33, 1.0), &host));
        assert!(!check_amx_extra(bf16, &args(32, 0.5), &host));
        assert!(check_amx_extra(u8, &args(68, 1.0), &host));
        assert!(!check_amx_extra(u8, &args(66, 1.0), &host));
    }

    #[test]
    fn test_invalid_blocking() {
        for (dtypes, blocking) in [(BF16, (24, 32, 32)), (BF16, (32, 40, 32)), (BF16, (32, 32, 64)), (INT8, (32, 32, 32))] {
            let err = amx(dtypes, blocking).emit_body(&DenseKernel::new(CompilerKind::Gnu)).unwrap_err();
            assert!(matches!(err, Error::InvalidBlocking { kind: VariantKind::Amx, .. }), "{blocking:?}");
        }
    }

    #[test]
    fn test_inner_kernels() {
        let gemm = amx(BF16, (48, 16, 32));
        let text = body(&gemm);
        let k48 = text.find("inline void k0_amx_kernel_48_1(").unwrap();
        let k32 = text.find("inline void k0_amx_kernel_32_1(").unwrap();
        let k16 = text.find("inline void k0_amx_kernel_16_1(").unwrap();
        let entry = text.find("inline void k0(").unwrap();
        assert!(k48 < k32 && k32 < k16 && k16 < entry);
        assert!(text.contains("auto loadconfig = [](const amx_tilecfg& cfg) { _tile_loadconfig(&cfg); };"));
        assert!(text.contains("const auto last_k_offset = K / 32 * 32;"));
        assert!(text.contains("if C10_LIKELY (last_k_offset > 0) {"));
        assert!(text.contains("amx_state.configure(tilecfg_rows, 64, 3, 1, loadconfig);"));
        assert!(text.contains("amx_state.configure(tilecfg_rows, tail_k_size * sizeof(bfloat16), 3, 1, loadconfig);"));
        // 48 rows: c tiles 0..3, a tiles 3..6, b tile 6
        assert!(text.contains("_tile_stream_loadd(5, A + 32 * lda + k, lda * sizeof(bfloat16));"));
        assert!(text.contains("_tile_loadd(6, B + k * ldb + 0, ldb * 2 * sizeof(bfloat16));"));
        assert!(text.contains("_tile_dpbf16ps(2, 5, 6);"));
        assert!(text.contains("_tile_stored(2, C + 32 * ldc + 0, ldc * sizeof(float));"));
        assert!(text.contains("#pragma GCC unroll 4\n"));
        assert!(text.contains("for (int k = 0; k < last_k_offset; k += 32) {"));
        assert!(text.contains("if C10_UNLIKELY (tail_k_size > 0) {"));
        assert!(text.contains("compute(last_k_offset);"));
    }

    #[test]
    fn test_entry() {
        let gemm = amx(BF16, (32, 32, 32));
        let text = body(&gemm);
        assert!(text.contains("TORCH_CHECK(N % 32 == 0, \"N dimension must be multiple of 32\");"));
        assert!(text.contains("TORCH_CHECK(K % 2 == 0, \"K dimension must be multiple of 2\");"));
        assert!(text.contains("const int64_t updated_ldb = ldb;"));
        assert!(text.contains("if (block_m >= 32) {"));
        assert!(text.contains("} else if (block_m >= 16) {"));
        assert!(text.contains("if (block_m > 0) {"));
        assert!(text.contains("k0_amx_kernel_16_2<accum>(\n"));
        assert!(text.contains("A + m_tail * lda,"));
        assert!(text.contains("B + n,"));
        assert!(!text.contains("dequantized_B_buf"));
        let n_loop = text.find("for (int64_t n = 0; n < N; n += 32) {").unwrap();
        let m_loop = text.find("for (int64_t m = 0; m < M; m += 32) {").unwrap();
        assert!(n_loop < m_loop);
        assert!(text.contains("_tile_dpbf16ps"));
        assert!(!text.contains("_tile_dpbusd"));
    }

    #[test]
    fn test_int8() {
        let gemm = amx(INT8, (32, 32, 64));
        assert_eq!(gemm.b_layout(), LayoutType::Vnni4);
        let text = body(&gemm);
        assert!(text.contains("TORCH_CHECK(K % 4 == 0, \"K dimension must be multiple of 4\");"));
        assert!(text.contains("const auto last_k_offset = K / 64 * 64;"));
        assert!(text.contains("_tile_loadd(7, B + k * ldb + 64, ldb * 4 * sizeof(uint8_t));"));
        assert!(text.contains("_tile_dpbusd(3, 5, 7);"));
        assert!(text.contains("int32_t* __restrict__ C,"));
    }

    #[test]
    fn test_cached_dequant_stack() {
        let gemm = amx(WOQ, (16, 48, 32));
        assert_eq!(gemm.b_layout(), LayoutType::Vnni2);
        let text = body(&gemm);
        assert!(text.contains("const auto buf_size = K * 48;"));
        assert!(text.contains("alignas(4096) bfloat16 dequantized_B_buf[buf_size];"));
        assert!(text.contains("int8_t* base_addr = const_cast<int8_t*>(B) + base_idx;"));
        assert!(text.contains("for (int64_t idx_dq = 0, idx_q = 0; idx_dq < buf_size; idx_q += ldb, idx_dq += 48) {"));
        assert!(text.contains("auto b_int8_0 = at::vec::Vectorized<int8_t>::loadu(base_addr + idx_q + 0, static_cast<int64_t>(32));"));
        assert!(text.contains("b_bfloat16_0.store(dequantized_B_buf + idx_dq + 0);"));
        assert!(text.contains("auto b_int8_tail = at::vec::Vectorized<int8_t>::loadu(base_addr + idx_q + 32, static_cast<int64_t>(16));"));
        assert!(text.contains("b_bfloat16_tail.store(dequantized_B_buf + idx_dq + 32, static_cast<int64_t>(16));"));
        assert!(text.contains("const int64_t updated_ldb = 48;"));
        assert!(text.contains("load_dequantized_B(n);"));
        assert!(text.contains("dequantized_B_buf,\n"));
        // inner kernels read the bf16 cache, the entry still takes int8 B
        assert!(text.contains("    const bfloat16* __restrict__ B,\n"));
        assert!(text.contains("    const int8_t* __restrict__ B,\n"));
        assert!(text.contains("inline void k0_amx_kernel_16_3("));
    }

    #[test]
    fn test_cached_dequant_heap() {
        let mut c = common("k0", WOQ, (32, 32, 32), 1.0);
        c.compiler = CompilerKind::Msvc;
        let text = AmxMicroGemm::new(c).emit_body(&DenseKernel::new(CompilerKind::Msvc)).unwrap();
        assert!(text.contains("std::unique_ptr<bfloat16[]> heap_deq_b_buf_ptr(new bfloat16[buf_size]);"));
        assert!(text.contains("bfloat16* dequantized_B_buf = heap_deq_b_buf_ptr.get();"));
        assert!(!text.contains("alignas(4096)"));
        assert!(text.contains("#pragma unroll 4\n"));
        assert!(!text.contains("b_int8_tail"));
    }

    #[test]
    fn test_state_lifecycle() {
        let gemm = amx(BF16, (32, 32, 32));
        let kernel = DenseKernel::for_gemm(CompilerKind::Gnu, 64, 64, 64);
        assert_eq!(gemm.emit_init(&kernel), "AMXState amx_state;\n");
        assert_eq!(gemm.emit_finalize(&kernel), "amx_state.release([]() { _tile_release(); });\n");
        assert!(gemm.emit_declaration().contains("inline void k0(\n    AMXState& amx_state,\n    const bfloat16* __restrict__ A,"));
        let call = gemm.emit_call(&kernel, &GemmOperands::new("A", "B", "C"), true).unwrap();
        assert!(call.starts_with("k0<true>(\n    amx_state,\n    &(A[0]),\n"));
    }
}
