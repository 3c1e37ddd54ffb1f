use std::fmt;

use ugemm_base::{HostCapabilities, VecIsa};

use crate::dtype::Dtype;

/// Register blocking of a micro kernel, the tile of C computed per inner call.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GemmBlocking {
    pub block_m: usize,
    pub block_n: usize,
    pub block_k: usize,
}

impl GemmBlocking {
    pub const fn new(block_m: usize, block_n: usize, block_k: usize) -> Self {
        Self { block_m, block_n, block_k }
    }
}

impl From<(usize, usize, usize)> for GemmBlocking {
    fn from((block_m, block_n, block_k): (usize, usize, usize)) -> Self {
        Self::new(block_m, block_n, block_k)
    }
}

impl fmt::Display for GemmBlocking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.block_m, self.block_n, self.block_k)
    }
}

/// Physical layout the B operand must be packed into before a kernel reads it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LayoutType {
    Normal,
    // pairs of consecutive k rows interleaved
    Vnni2,
    Vnni4,
}

impl LayoutType {
    pub fn vnni_size(self) -> usize {
        match self {
            LayoutType::Normal => 1,
            LayoutType::Vnni2 => 2,
            LayoutType::Vnni4 => 4,
        }
    }
}

/// Problem parameters handed to an eligibility predicate.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CheckArgs {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub alpha: f64,
    pub num_threads: usize,
}

pub type CheckFn = fn(&MicroGemmConfig, &CheckArgs, &HostCapabilities) -> bool;

/// Named extra predicate a config must satisfy on top of the dtype and isa match.
#[derive(Copy, Clone)]
pub struct Eligibility {
    pub name: &'static str,
    pub check: CheckFn,
}

impl Eligibility {
    pub const fn new(name: &'static str, check: CheckFn) -> Self {
        Self { name, check }
    }

    pub fn eval(&self, config: &MicroGemmConfig, args: &CheckArgs, host: &HostCapabilities) -> bool {
        (self.check)(config, args, host)
    }
}

// fn pointers compare unreliably across codegen units, the name is the identity
impl PartialEq for Eligibility {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl fmt::Debug for Eligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Eligibility").field(&self.name).finish()
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MicroGemmConfig {
    pub input_dtype: Dtype,
    pub input2_dtype: Dtype,
    pub output_dtype: Dtype,
    pub compute_dtype: Dtype,
    pub vec_isa: VecIsa,
    pub register_blocking: GemmBlocking,
    pub extra_check: Option<Eligibility>,
}

impl MicroGemmConfig {
    pub fn dtypes(&self) -> (Dtype, Dtype, Dtype, Dtype) {
        (self.input_dtype, self.input2_dtype, self.output_dtype, self.compute_dtype)
    }

    pub fn matches(&self, input: Dtype, input2: Dtype, output: Dtype, compute: Dtype) -> bool {
        self.dtypes() == (input, input2, output, compute)
    }
}

/// Dtype combination for [`generate_gemm_config`], unset fields take the defaults
/// `input2 = input`, `output = input`, `compute = output`.
#[derive(Copy, Clone, Debug, Default)]
pub struct DtypeSpec {
    pub input: Option<Dtype>,
    pub input2: Option<Dtype>,
    pub output: Option<Dtype>,
    pub compute: Option<Dtype>,
}

impl DtypeSpec {
    pub fn new(input: Dtype) -> Self {
        Self { input: Some(input), ..Default::default() }
    }

    pub fn input2(mut self, dt: Dtype) -> Self {
        self.input2 = Some(dt);
        self
    }

    pub fn output(mut self, dt: Dtype) -> Self {
        self.output = Some(dt);
        self
    }

    pub fn compute(mut self, dt: Dtype) -> Self {
        self.compute = Some(dt);
        self
    }
}

/// Crosses the blockings with one dtype combination.
pub fn generate_gemm_config(
    vec_isa: VecIsa,
    blockings: &[(usize, usize, usize)],
    dtypes: DtypeSpec,
    extra_check: Option<Eligibility>,
) -> Vec<MicroGemmConfig> {
    let input_dtype = dtypes.input.unwrap_or(Dtype::Float32);
    let output_dtype = dtypes.output.unwrap_or(input_dtype);
    let compute_dtype = dtypes.compute.unwrap_or(output_dtype);
    let input2_dtype = dtypes.input2.unwrap_or(input_dtype);
    blockings
        .iter()
        .map(|&b| MicroGemmConfig {
            input_dtype,
            input2_dtype,
            output_dtype,
            compute_dtype,
            vec_isa,
            register_blocking: b.into(),
            extra_check,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn always(_: &MicroGemmConfig, _: &CheckArgs, _: &HostCapabilities) -> bool {
        true
    }

    #[test]
    fn test_defaults() {
        let configs = generate_gemm_config(VecIsa::Avx2, &[(4, 24, 1), (8, 8, 1)], DtypeSpec::new(Dtype::BFloat16), None);
        assert_eq!(configs.len(), 2);
        for c in &configs {
            assert_eq!(c.dtypes(), (Dtype::BFloat16, Dtype::BFloat16, Dtype::BFloat16, Dtype::BFloat16));
        }
        assert_eq!(configs[1].register_blocking, GemmBlocking::new(8, 8, 1));

        let configs = generate_gemm_config(
            VecIsa::Avx512,
            &[(8, 48, 1)],
            DtypeSpec::new(Dtype::BFloat16).output(Dtype::Float32),
            None,
        );
        // compute follows output, input2 follows input
        assert_eq!(configs[0].dtypes(), (Dtype::BFloat16, Dtype::BFloat16, Dtype::Float32, Dtype::Float32));

        let configs = generate_gemm_config(VecIsa::Amx, &[], DtypeSpec::default(), None);
        assert!(configs.is_empty());
    }

    #[test]
    fn test_eligibility_identity() {
        let a = Eligibility::new("always", always);
        let b = Eligibility::new("always", always);
        assert_eq!(a, b);
        assert_eq!(format!("{a:?}"), "Eligibility(\"always\")");
        let configs = generate_gemm_config(VecIsa::Amx, &[(16, 16, 32)], DtypeSpec::new(Dtype::Float16), Some(a));
        let args = CheckArgs { m: 1, n: 1, k: 1, alpha: 1.0, num_threads: 1 };
        assert!(configs[0].extra_check.map(|e| e.eval(&configs[0], &args, &HostCapabilities::new(VecIsa::Amx))).unwrap_or(false));
        assert_eq!(GemmBlocking::new(32, 32, 64).to_string(), "(32, 32, 64)");
    }
}
