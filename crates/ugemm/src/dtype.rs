use std::fmt;

/// Element types a micro gemm can read, accumulate in, or write.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dtype {
    Float32,
    Float64,
    BFloat16,
    Float16,
    Int8,
    UInt8,
    Int32,
    Int64,
}

impl Dtype {
    pub const ALL: [Dtype; 8] = [
        Dtype::Float32,
        Dtype::Float64,
        Dtype::BFloat16,
        Dtype::Float16,
        Dtype::Int8,
        Dtype::UInt8,
        Dtype::Int32,
        Dtype::Int64,
    ];

    pub fn itemsize(self) -> usize {
        match self {
            Dtype::Float64 | Dtype::Int64 => 8,
            Dtype::Float32 | Dtype::Int32 => 4,
            Dtype::BFloat16 | Dtype::Float16 => 2,
            Dtype::Int8 | Dtype::UInt8 => 1,
        }
    }

    /// Spelling of the type inside generated c++.
    pub fn cpp_name(self) -> &'static str {
        match self {
            Dtype::Float32 => "float",
            Dtype::Float64 => "double",
            Dtype::BFloat16 => "bfloat16",
            Dtype::Float16 => "half",
            Dtype::Int8 => "int8_t",
            Dtype::UInt8 => "uint8_t",
            Dtype::Int32 => "int32_t",
            Dtype::Int64 => "int64_t",
        }
    }

    pub fn is_floating_point(self) -> bool {
        matches!(self, Dtype::Float32 | Dtype::Float64 | Dtype::BFloat16 | Dtype::Float16)
    }

    // 16 bit floats are loaded through a widening conversion
    pub fn is_reduced_float(self) -> bool {
        matches!(self, Dtype::BFloat16 | Dtype::Float16)
    }

    pub fn parse(s: &str) -> Option<Dtype> {
        let dt = match s.trim().to_ascii_lowercase().as_str() {
            "f32" | "float" | "float32" => Dtype::Float32,
            "f64" | "double" | "float64" => Dtype::Float64,
            "bf16" | "bfloat16" => Dtype::BFloat16,
            "f16" | "half" | "float16" => Dtype::Float16,
            "i8" | "int8" | "int8_t" => Dtype::Int8,
            "u8" | "uint8" | "uint8_t" => Dtype::UInt8,
            "i32" | "int32" | "int32_t" => Dtype::Int32,
            "i64" | "int64" | "int64_t" => Dtype::Int64,
            _ => return None,
        };
        Some(dt)
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cpp_name())
    }
}
