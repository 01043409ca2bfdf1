use std::fmt;

use crate::simd;

// Hot-path counters. Running means use the incremental update so no
// per-row history is kept.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub(crate) bytes_processed: u64,
    pub(crate) rows_parsed: u64,
    pub(crate) fields_parsed: u64,
    pub(crate) errors_encountered: u64,
    pub(crate) avg_field_size: f64,
    pub(crate) avg_row_size: f64,
}

impl Counters {
    #[inline(always)]
    pub(crate) fn record_field(&mut self, size: usize) {
        self.fields_parsed += 1;

        if self.fields_parsed > 1 {
            self.avg_field_size +=
                (size as f64 - self.avg_field_size) / self.fields_parsed as f64;
        } else {
            self.avg_field_size = size as f64;
        }
    }

    #[inline(always)]
    pub(crate) fn record_row(&mut self, total_field_size: usize) {
        self.rows_parsed += 1;

        self.avg_row_size = (self.avg_row_size * (self.rows_parsed - 1) as f64
            + total_field_size as f64)
            / self.rows_parsed as f64;
    }
}

/// Snapshot of parser activity since construction or the last reset.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub total_bytes_processed: u64,
    pub total_rows_parsed: u64,
    pub total_fields_parsed: u64,
    /// Monotonic clock delta since construction or last reset.
    pub parse_time_ns: u64,
    /// Derived from `total_bytes_processed` and `parse_time_ns`.
    pub throughput_mbps: f64,
    /// Bitmask of the `SIMD_*` feature constants.
    pub simd_features_used: u32,
    pub peak_memory_bytes: u64,
    /// Vector windows processed by the scanner.
    pub simd_ops: u64,
    /// Windows that fell back to the scalar loop.
    pub scalar_fallbacks: u64,
    pub errors_encountered: u64,
    pub avg_field_size: f64,
    pub avg_row_size: f64,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "--- Parser statistics ---")?;
        writeln!(f, "  Bytes processed:  {}", self.total_bytes_processed)?;
        writeln!(f, "  Rows parsed:      {}", self.total_rows_parsed)?;
        writeln!(f, "  Fields parsed:    {}", self.total_fields_parsed)?;
        writeln!(f, "  Parse time:       {:.3} ms", self.parse_time_ns as f64 / 1e6)?;
        writeln!(f, "  Throughput:       {:.2} MB/s", self.throughput_mbps)?;
        writeln!(f, "  Peak memory:      {} B", self.peak_memory_bytes)?;
        writeln!(f, "  Errors:           {}", self.errors_encountered)?;
        writeln!(f, "  Avg field size:   {:.1} B", self.avg_field_size)?;
        writeln!(f, "  Avg row size:     {:.1} B", self.avg_row_size)?;
        writeln!(f, "  SIMD operations:  {}", self.simd_ops)?;
        writeln!(f, "  Scalar fallbacks: {}", self.scalar_fallbacks)?;

        let names = simd::feature_names(self.simd_features_used);

        if names.is_empty() {
            write!(f, "  SIMD features:    none")
        } else {
            write!(f, "  SIMD features:    {}", names.join(" "))
        }
    }
}
