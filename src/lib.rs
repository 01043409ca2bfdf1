mod buffer;
mod core;
mod debug;
mod error;
mod options;
mod parser;
mod pool;
mod records;
mod scanner;
mod simd;
mod stats;

pub use error::{Error, Result};
pub use options::ParseOptions;
pub use parser::{Parser, ParserBuilder};
pub use pool::{Interned, StringPool};
pub use records::{Field, Row, RowIter};
pub use simd::{
    feature_names, simd_features, SIMD_AVX2, SIMD_AVX512, SIMD_NEON, SIMD_NONE, SIMD_SSE2,
};
pub use stats::Stats;
