//! Small typed model of the c++ subset emitted by the micro gemm variants,
//! rendered to text in a single pass.

mod ast;
mod render;

pub use ast::*;
pub use render::{render_expr, render_items, render_type, CodeWriter};
