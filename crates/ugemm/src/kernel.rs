use ugemm_base::CompilerKind;

use crate::error::{Error, Result};

/// Context of the surrounding fused kernel, answers indexing questions about its buffers.
pub trait TemplateKernel {
    /// Element access expression, e.g. `A[0]`.
    fn index(&self, buffer: &str, indices: &[i64]) -> Result<String>;
    fn size(&self, buffer: &str, dim: usize) -> Result<String>;
    fn stride(&self, buffer: &str, dim: usize) -> Result<String>;
    /// Name of the runtime check macro used in generated bodies.
    fn assert_function(&self) -> &str;
    fn unroll_pragma(&self, unroll: usize) -> String;
}

/// Buffer names bound to the operands of one micro gemm call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GemmOperands<'a> {
    pub a: &'a str,
    pub b: &'a str,
    pub c: &'a str,
    // per column scale, only read by the fused fp16 variant
    pub scale: Option<&'a str>,
}

impl<'a> GemmOperands<'a> {
    pub fn new(a: &'a str, b: &'a str, c: &'a str) -> Self {
        Self { a, b, c, scale: None }
    }

    pub fn with_scale(mut self, scale: &'a str) -> Self {
        self.scale = Some(scale);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DenseBuffer {
    name: String,
    sizes: Vec<String>,
    strides: Vec<String>,
}

impl DenseBuffer {
    pub fn row_major(name: impl Into<String>, sizes: &[usize]) -> Self {
        let mut strides = vec![0usize; sizes.len()];
        let mut acc = 1;
        for (s, dim) in strides.iter_mut().zip(sizes).rev() {
            *s = acc;
            acc *= dim;
        }
        Self {
            name: name.into(),
            sizes: sizes.iter().map(|s| s.to_string()).collect(),
            strides: strides.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Buffer whose sizes and strides are c++ expressions.
    pub fn symbolic(name: impl Into<String>, sizes: &[&str], strides: &[&str]) -> Self {
        Self {
            name: name.into(),
            sizes: sizes.iter().map(|s| s.to_string()).collect(),
            strides: strides.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Template kernel over plain dense buffers addressed by pointer name.
#[derive(Clone, Debug)]
pub struct DenseKernel {
    buffers: Vec<DenseBuffer>,
    compiler: CompilerKind,
    assert_function: String,
}

impl DenseKernel {
    pub fn new(compiler: CompilerKind) -> Self {
        Self { buffers: vec![], compiler, assert_function: "TORCH_CHECK".to_string() }
    }

    pub fn buffer(mut self, buffer: DenseBuffer) -> Self {
        self.buffers.retain(|b| b.name != buffer.name);
        self.buffers.push(buffer);
        self
    }

    pub fn with_assert_function(mut self, name: impl Into<String>) -> Self {
        self.assert_function = name.into();
        self
    }

    /// Kernel with row-major `A: m x k`, `B: k x n`, `C: m x n` and a length `n` scale `S`.
    pub fn for_gemm(compiler: CompilerKind, m: usize, n: usize, k: usize) -> Self {
        Self::new(compiler)
            .buffer(DenseBuffer::row_major("A", &[m, k]))
            .buffer(DenseBuffer::row_major("B", &[k, n]))
            .buffer(DenseBuffer::row_major("C", &[m, n]))
            .buffer(DenseBuffer::row_major("S", &[n]))
    }

    fn lookup(&self, buffer: &str) -> Result<&DenseBuffer> {
        self.buffers.iter().find(|b| b.name == buffer).ok_or_else(|| Error::UnknownBuffer(buffer.to_string()))
    }

    fn dim<'b>(&self, buf: &'b DenseBuffer, values: &'b [String], dim: usize) -> Result<&'b str> {
        values
            .get(dim)
            .map(|s| s.as_str())
            .ok_or_else(|| Error::DimOutOfRange { buffer: buf.name.clone(), dim })
    }
}

impl TemplateKernel for DenseKernel {
    fn index(&self, buffer: &str, indices: &[i64]) -> Result<String> {
        let buf = self.lookup(buffer)?;
        if indices.len() > buf.strides.len() {
            return Err(Error::DimOutOfRange { buffer: buf.name.clone(), dim: indices.len() - 1 });
        }
        let terms: Vec<String> = indices
            .iter()
            .zip(&buf.strides)
            .filter(|(i, _)| **i != 0)
            .map(|(i, s)| if s == "1" { i.to_string() } else { format!("{i} * {s}") })
            .collect();
        let offset = if terms.is_empty() { "0".to_string() } else { terms.join(" + ") };
        Ok(format!("{}[{offset}]", buf.name))
    }

    fn size(&self, buffer: &str, dim: usize) -> Result<String> {
        let buf = self.lookup(buffer)?;
        self.dim(buf, &buf.sizes, dim).map(str::to_string)
    }

    fn stride(&self, buffer: &str, dim: usize) -> Result<String> {
        let buf = self.lookup(buffer)?;
        self.dim(buf, &buf.strides, dim).map(str::to_string)
    }

    fn assert_function(&self) -> &str {
        &self.assert_function
    }

    fn unroll_pragma(&self, unroll: usize) -> String {
        match self.compiler {
            CompilerKind::Gnu => format!("#pragma GCC unroll {unroll}"),
            CompilerKind::Msvc => format!("#pragma unroll {unroll}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_major() {
        let kernel = DenseKernel::for_gemm(CompilerKind::Gnu, 4, 16, 8);
        assert_eq!(kernel.index("A", &[0, 0]).unwrap(), "A[0]");
        assert_eq!(kernel.index("A", &[1, 2]).unwrap(), "A[1 * 8 + 2]");
        assert_eq!(kernel.size("C", 0).unwrap(), "4");
        assert_eq!(kernel.size("C", 1).unwrap(), "16");
        assert_eq!(kernel.stride("B", 0).unwrap(), "16");
        assert_eq!(kernel.stride("B", 1).unwrap(), "1");
        assert_eq!(kernel.index("S", &[0]).unwrap(), "S[0]");
        assert_eq!(kernel.unroll_pragma(4), "#pragma GCC unroll 4");
    }

    #[test]
    fn test_symbolic_and_errors() {
        let kernel = DenseKernel::new(CompilerKind::Msvc)
            .buffer(DenseBuffer::symbolic("X", &["M0", "K0"], &["ldx", "1"]))
            .with_assert_function("AOTI_CHECK");
        assert_eq!(kernel.index("X", &[2, 0]).unwrap(), "X[2 * ldx]");
        assert_eq!(kernel.size("X", 0).unwrap(), "M0");
        assert_eq!(kernel.assert_function(), "AOTI_CHECK");
        assert_eq!(kernel.unroll_pragma(2), "#pragma unroll 2");
        assert!(matches!(kernel.size("Y", 0), Err(Error::UnknownBuffer(_))));
        assert!(matches!(kernel.stride("X", 2), Err(Error::DimOutOfRange { dim: 2, .. })));
        assert!(matches!(kernel.index("X", &[0, 0, 0]), Err(Error::DimOutOfRange { .. })));
    }
}
