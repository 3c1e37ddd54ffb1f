use ugemm_base::{HostCapabilities, VecIsa};

use crate::config::{generate_gemm_config, CheckArgs, DtypeSpec, Eligibility, MicroGemmConfig};
use crate::cpp::*;
use crate::dtype::Dtype;

use super::vec::{lit_line, scaled_scalar, TileCompute};
use super::{MicroGemmCommon, VariantKind};

fn check_fp16_extra(_config: &MicroGemmConfig, args: &CheckArgs, host: &HostCapabilities) -> bool {
    host.avx512_fp16 && args.m <= 4 && args.n % 32 == 0
}

pub const FP16_EXTRA: Eligibility = Eligibility::new("fp16_small_m", check_fp16_extra);

pub(super) fn fp16_configs() -> Vec<MicroGemmConfig> {
    generate_gemm_config(
        VecIsa::Avx512,
        &[(8, 64, 1), (8, 32, 1)],
        DtypeSpec::new(Dtype::BFloat16).input2(Dtype::Int8).output(Dtype::Float16).compute(Dtype::Float16),
        Some(FP16_EXTRA),
    )
}

const ROUNDING: &str = "_MM_FROUND_TO_NEAREST_INT | _MM_FROUND_NO_EXC";

fn intrin(name: &str, args: Vec<Expr>) -> Expr {
    var(name).call(args)
}

/// Narrows two 16 lane fp32 vectors into the 32 lane fp16 register `dst`.
fn narrow_to_fp16(dst: Expr, lo: &str, hi: &str) -> Vec<Stmt> {
    let m256i = || CppType::named("__m256i");
    let lo_h = format!("{lo}_fp16");
    let hi_h = format!("{hi}_fp16");
    let packed = intrin("_mm512_inserti64x4", vec![intrin("_mm512_castsi256_si512", vec![var(&lo_h)]), var(&hi_h), int(1)]);
    vec![
        Decl::new(m256i(), &lo_h).init(intrin("_mm512_cvtps_ph", vec![var(lo), lit(ROUNDING)])).into(),
        Decl::new(m256i(), &hi_h).init(intrin("_mm512_cvtps_ph", vec![var(hi), lit(ROUNDING)])).into(),
        dst.assign(intrin("_mm512_castsi512_ph", vec![packed])).into(),
    ]
}

/// Fp16 accumulation over 512 bit registers, int8 B lanes are widened to fp16 and
/// multiplied by the per column scale before the fma. Needs AVX512-FP16.
#[derive(Debug)]
pub struct Fp16ScaledTile;

impl TileCompute for Fp16ScaledTile {
    const KIND: VariantKind = VariantKind::Fp16Vec;
    const SCALED: bool = true;

    fn prologue(_g: &MicroGemmCommon) -> Vec<Stmt> {
        let m512h = || CppType::named("__m512h");
        let m512 = || CppType::named("__m512");

        let mut load_scales: Vec<Stmt> = vec![
            Decl::new(CppType::Auto, "bf16_scales")
                .init(intrin("_mm512_loadu_si512", vec![c_cast(
                    CppType::named("__m512i").ptr(),
                    var("S") + var("i") * var("VLEN"),
                )]))
                .into(),
            Decl::new(m512(), "lo_scales").into(),
            Decl::new(m512(), "hi_scales").into(),
            intrin("cvtbf16_fp32", vec![var("bf16_scales"), var("lo_scales"), var("hi_scales")]).into(),
        ];
        load_scales.extend(narrow_to_fp16(var("scales").index(var("i")), "lo_scales", "hi_scales"));

        vec![
            Decl::new(CppType::Auto, "VLEN").constexpr().init(int(32)).into(),
            Decl::new(CppType::Auto, "ROWS").constexpr().init(var("BLOCK_M")).into(),
            Decl::new(CppType::Auto, "COLS").constexpr().init(var("BLOCK_N") / var("VLEN")).into(),
            lit_line(""),
            Decl::new(m512h(), "va").into(),
            Decl::new(m512h(), "vb").array(var("COLS")).into(),
            Decl::new(m512h(), "scales").array(var("COLS")).into(),
            Decl::new(m512h(), "vc").array(var("ROWS") * var("COLS")).into(),
            lit_line(""),
            Decl::new(CppType::Auto, "load_scales")
                .init(lambda(&["&"], vec![Param::new(CppType::Auto, "i")], load_scales))
                .into(),
            brace_init(CppType::template("c10::ForcedUnroll", vec![var("COLS")])).call(vec![var("load_scales")]).into(),
        ]
    }

    fn load_c(_g: &MicroGemmCommon, addr: Expr) -> Expr {
        intrin("_mm512_loadu_ph", vec![addr])
    }

    fn zero_c(_g: &MicroGemmCommon) -> Expr {
        intrin("_mm512_set1_ph", vec![lit("0.0f")])
    }

    fn broadcast_a(g: &MicroGemmCommon, a: Expr) -> Expr {
        intrin("_mm512_set1_ph", vec![scaled_scalar(g, CppType::named("float"), a)])
    }

    fn load_b(_g: &MicroGemmCommon, addr: Expr) -> Vec<Stmt> {
        let m128i = || CppType::named("__m128i");
        let vb_col = || var("vb").index(var("col"));
        let mut stmts: Vec<Stmt> = vec![
            comment("Widen VLEN int8 elements to int32, then fp32, then fp16, then apply the scale"),
            Decl::new(m128i(), "lo_i8").init(intrin("_mm_loadu_si128", vec![c_cast(m128i().ptr(), addr.clone())])).into(),
            Decl::new(m128i(), "hi_i8")
                .init(intrin("_mm_loadu_si128", vec![c_cast(m128i().ptr(), addr + int(16))]))
                .into(),
        ];
        for half in ["lo", "hi"] {
            stmts.push(
                Decl::new(CppType::named("__m512i"), format!("{half}_i32"))
                    .init(intrin("_mm512_cvtepi8_epi32", vec![var(format!("{half}_i8"))]))
                    .into(),
            );
        }
        for half in ["lo", "hi"] {
            stmts.push(
                Decl::new(CppType::named("__m512"), format!("{half}_f32"))
                    .init(intrin("_mm512_cvtepi32_ps", vec![var(format!("{half}_i32"))]))
                    .into(),
            );
        }
        stmts.extend(narrow_to_fp16(vb_col(), "lo_f32", "hi_f32"));
        stmts.push(vb_col().assign(intrin("_mm512_mul_ph", vec![vb_col(), var("scales").index(var("col"))])).into());
        stmts
    }

    fn fma(va: Expr, vb: Expr, vc: Expr) -> Expr {
        intrin("_mm512_fmadd_ph", vec![va, vb, vc])
    }

    fn store_c(vc: Expr, addr: Expr) -> Expr {
        intrin("_mm512_storeu_ph", vec![addr, vc])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::kernel::{DenseKernel, GemmOperands};
    use crate::variants::test_utils::common;
    use crate::variants::{MicroGemm, VecMicroGemm};
    use ugemm_base::CompilerKind;

    fn fp16_gemm(alpha: f64) -> VecMicroGemm<Fp16ScaledTile> {
        VecMicroGemm::new(common("k2", [Dtype::BFloat16, Dtype::Int8, Dtype::Float16, Dtype::Float16], (8, 64, 1), alpha))
    }

    #[test]
    fn test_extra_check() {
        let config = &fp16_configs()[0];
        let host = HostCapabilities::new(VecIsa::Avx512).with_avx512_fp16(true);
        let args = |m, n| CheckArgs { m, n, k: 128, alpha: 1.0, num_threads: 1 };
        assert!(check_fp16_extra(config, &args(2, 64), &host));
        assert!(check_fp16_extra(config, &args(4, 32), &host));
        assert!(!check_fp16_extra(config, &args(5, 64), &host));
        assert!(!check_fp16_extra(config, &args(2, 48), &host));
        let no_fp16 = HostCapabilities::new(VecIsa::Avx512);
        assert!(!check_fp16_extra(config, &args(2, 64), &no_fp16));
    }

    #[test]
    fn test_declaration_has_scale() {
        let decl = fp16_gemm(1.0).emit_declaration();
        let a = decl.find("const bfloat16* __restrict__ A,").unwrap();
        let b = decl.find("const int8_t* __restrict__ B,").unwrap();
        let s = decl.find("const bfloat16* __restrict__ S,").unwrap();
        let c = decl.find("half* __restrict__ C,").unwrap();
        assert!(a < b && b < s && s < c);
    }

    #[test]
    fn test_call_needs_scale() {
        let gemm = fp16_gemm(1.0);
        let kernel = DenseKernel::for_gemm(CompilerKind::Gnu, 2, 64, 128);
        let err = gemm.emit_call(&kernel, &GemmOperands::new("A", "B", "C"), false).unwrap_err();
        assert!(matches!(err, Error::MissingOperand { kind: VariantKind::Fp16Vec, operand: "S" }));
        let call = gemm.emit_call(&kernel, &GemmOperands::new("A", "B", "C").with_scale("S"), false).unwrap();
        assert_eq!(call, "k2<false>(\n    &(A[0]),\n    &(B[0]),\n    &(S[0]),\n    &(C[0]),\n    2,\n    64,\n    128,\n    128,\n    64,\n    64\n);\n");
    }

    #[test]
    fn test_body() {
        let body = fp16_gemm(1.0).emit_body(&DenseKernel::new(CompilerKind::Gnu)).unwrap();
        assert!(body.contains("constexpr auto VLEN = 32;"));
        assert!(body.contains("__m512h scales[COLS];"));
        assert!(body.contains("const bfloat16* S,"));
        assert!(body.contains("c10::ForcedUnroll<COLS>{}(load_scales);"));
        assert!(body.contains("auto bf16_scales = _mm512_loadu_si512((__m512i*)(S + i * VLEN));"));
        assert!(body.contains("vc[i] = _mm512_loadu_ph(C + row * ldc + col * VLEN);"));
        assert!(body.contains("va = _mm512_set1_ph(static_cast<float>(A[row * lda + k]));"));
        assert!(body.contains("__m128i hi_i8 = _mm_loadu_si128((__m128i*)(B + k * ldb + col * VLEN + 16));"));
        assert!(body.contains("vb[col] = _mm512_mul_ph(vb[col], scales[col]);"));
        assert!(body.contains("vc[idx] = _mm512_fmadd_ph(va, vb[col], vc[idx]);"));
        assert!(body.contains("_mm512_storeu_ph(C + row * ldc + col * VLEN, vc[i]);"));
        // entry forwards the scale slice of the current column block
        assert!(body.contains("S + n,\n"));
        assert!(body.contains("k2_kernel<8, 64, accum>("));
        // no generic vector helpers leak into the fp16 path
        assert!(!body.contains("at::vec::"));
    }
}
