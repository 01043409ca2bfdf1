use crate::error::{Error, Result};

/// Parsing configuration, immutable once a parser has been built.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Byte separating fields within a row.
    pub delimiter: u8,
    /// Byte enclosing fields whose content may contain the delimiter or
    /// line terminators.
    pub quote: u8,
    /// Whether `""` inside a quoted field stands for one literal quote.
    pub double_quote_escape: bool,
    /// Trim ASCII spaces and tabs from both ends of unquoted fields.
    pub trim_whitespace: bool,
    /// Discard rows that would carry zero fields.
    pub ignore_empty_lines: bool,
    /// Reject tolerated malformations instead of absorbing them.
    pub strict_mode: bool,
    /// Maximum size of a single field, in bytes.
    pub max_field_size: usize,
    /// Maximum summed field size of a row, in bytes.
    pub max_row_size: usize,
    /// Soft cap on parser-owned allocations. `0` means unbounded.
    pub max_memory_bytes: usize,
    /// Chunk size used by the stream and file entry points.
    pub buffer_size: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            double_quote_escape: true,
            trim_whitespace: false,
            ignore_empty_lines: true,
            strict_mode: false,
            max_field_size: 10 * 1024 * 1024,
            max_row_size: 100 * 1024 * 1024,
            max_memory_bytes: 0,
            buffer_size: 64 * 1024,
        }
    }
}

impl ParseOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.delimiter == self.quote {
            return Err(Error::InvalidArguments("delimiter and quote must differ"));
        }

        if self.delimiter == b'\r' || self.delimiter == b'\n' {
            return Err(Error::InvalidArguments(
                "delimiter cannot be a line terminator",
            ));
        }

        if self.quote == b'\r' || self.quote == b'\n' {
            return Err(Error::InvalidArguments("quote cannot be a line terminator"));
        }

        if self.max_field_size == 0 {
            return Err(Error::InvalidArguments("max_field_size must be at least 1"));
        }

        if self.max_row_size < self.max_field_size {
            return Err(Error::InvalidArguments(
                "max_row_size cannot be smaller than max_field_size",
            ));
        }

        if self.buffer_size == 0 {
            return Err(Error::InvalidArguments("buffer_size must be at least 1"));
        }

        Ok(())
    }
}
