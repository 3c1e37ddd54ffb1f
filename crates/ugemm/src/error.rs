use crate::config::GemmBlocking;
use crate::dtype::Dtype;
use crate::variants::VariantKind;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("duplicate micro gemm registration for {0:?}")]
    DuplicateRegistration(VariantKind),
    #[error("no micro gemm configs provided for {0:?}")]
    EmptyConfigs(VariantKind),
    #[error("{kind:?} config ({input}, {input2}, {output}, {compute}) on {isa} is already claimed by {owner:?}")]
    ConflictingConfig {
        kind: VariantKind,
        owner: VariantKind,
        isa: ugemm_base::VecIsa,
        input: Dtype,
        input2: Dtype,
        output: Dtype,
        compute: Dtype,
    },
    #[error("alpha must be finite, got {0}")]
    NonFiniteAlpha(f64),
    #[error("dimension {dim} must be concrete at selection time, got `{expr}`")]
    SymbolicDim { dim: &'static str, expr: String },
    #[error("invalid register blocking {blocking} for {kind:?}: {reason}")]
    InvalidBlocking { kind: VariantKind, blocking: GemmBlocking, reason: &'static str },
    #[error("invalid dtypes for {kind:?}: {reason}")]
    InvalidDtypes { kind: VariantKind, reason: String },
    #[error("{kind:?} call site needs operand `{operand}`")]
    MissingOperand { kind: VariantKind, operand: &'static str },
    #[error("template kernel has no buffer named `{0}`")]
    UnknownBuffer(String),
    #[error("buffer `{buffer}` has no dimension {dim}")]
    DimOutOfRange { buffer: String, dim: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
