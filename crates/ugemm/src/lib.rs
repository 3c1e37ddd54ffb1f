//! Selection and C++ code generation of cpu micro gemm kernels.
//!
//! A fused kernel generator describes one small `M x K @ K x N` site with a
//! [`GemmRequest`]; [`create_micro_gemm`] picks the best registered config for
//! the host and returns a [`MicroGemm`] that emits the declaration, call site,
//! body, and init/finalize text to splice into the generated translation unit.
//!
//! ```
//! use ugemm::{create_micro_gemm, Dtype, GemmRequest, HostCapabilities, Registry, VecIsa};
//!
//! let registry = Registry::builtin()?;
//! let host = HostCapabilities::new(VecIsa::Avx512);
//! let request = GemmRequest::new("micro_gemm", 64, 64, 64, Dtype::Float32, Dtype::Float32);
//! let gemm = create_micro_gemm(&registry, &host, &request)?.expect("fp32 vec config");
//! assert!(gemm.emit_declaration().contains("micro_gemm"));
//! # Ok::<(), ugemm::Error>(())
//! ```

pub mod config;
pub mod cpp;
pub mod dtype;
pub mod error;
pub mod kernel;
pub mod pack;
pub mod registry;
pub mod selector;
pub mod variants;

pub use config::{generate_gemm_config, CheckArgs, DtypeSpec, Eligibility, GemmBlocking, LayoutType, MicroGemmConfig};
pub use dtype::Dtype;
pub use error::{Error, Result};
pub use kernel::{DenseBuffer, DenseKernel, GemmOperands, TemplateKernel};
pub use pack::{b_size_packed, dequantize_i8, pack_b};
pub use registry::{Registry, RegistryBuilder};
pub use selector::{create_micro_gemm, GemmRequest, ResolvedRequest, Score, Selection, SelectionStats, Selector, SizeExpr};
pub use variants::{MicroGemm, MicroGemmCommon, VariantKind};

pub use ugemm_base::{pick_best_available_isa, CompilerKind, HostCapabilities, VecIsa, RUNTIME_HW_CONFIG};
