use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::time::Instant;

use crate::core::{CoreParser, ErrorFn, RowFn};
use crate::error::{Error, Result};
use crate::options::ParseOptions;
use crate::records::Row;
use crate::simd::simd_features;
use crate::stats::Stats;

/// Builds a [`Parser`] with given configuration.
#[derive(Debug, Clone, Default)]
pub struct ParserBuilder {
    options: ParseOptions,
}

impl ParserBuilder {
    /// Create a new [`ParserBuilder`] with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delimiter separating fields within a row.
    ///
    /// Will default to a comma.
    pub fn delimiter(&mut self, delimiter: u8) -> &mut Self {
        self.options.delimiter = delimiter;
        self
    }

    /// Set the quote byte enclosing fields.
    ///
    /// Will default to a double quote.
    pub fn quote(&mut self, quote: u8) -> &mut Self {
        self.options.quote = quote;
        self
    }

    /// Indicate whether `""` inside a quoted field stands for one literal
    /// quote.
    ///
    /// Will default to `true`.
    pub fn double_quote_escape(&mut self, yes: bool) -> &mut Self {
        self.options.double_quote_escape = yes;
        self
    }

    /// Trim ASCII spaces and tabs from both ends of unquoted fields.
    /// Quoted fields keep every inner byte.
    ///
    /// Will default to `false`.
    pub fn trim_whitespace(&mut self, yes: bool) -> &mut Self {
        self.options.trim_whitespace = yes;
        self
    }

    /// Discard rows carrying zero fields.
    ///
    /// Will default to `true`.
    pub fn ignore_empty_lines(&mut self, yes: bool) -> &mut Self {
        self.options.ignore_empty_lines = yes;
        self
    }

    /// Reject tolerated malformations as parse errors instead of
    /// absorbing them.
    ///
    /// Will default to `false`.
    pub fn strict_mode(&mut self, yes: bool) -> &mut Self {
        self.options.strict_mode = yes;
        self
    }

    /// Maximum size of a single field, in bytes.
    pub fn max_field_size(&mut self, size: usize) -> &mut Self {
        self.options.max_field_size = size;
        self
    }

    /// Maximum summed field size of a row, in bytes.
    pub fn max_row_size(&mut self, size: usize) -> &mut Self {
        self.options.max_row_size = size;
        self
    }

    /// Soft cap on parser-owned allocations, `0` meaning unbounded.
    pub fn max_memory_bytes(&mut self, bytes: usize) -> &mut Self {
        self.options.max_memory_bytes = bytes;
        self
    }

    /// Chunk size used by the stream and file entry points.
    pub fn buffer_size(&mut self, size: usize) -> &mut Self {
        self.options.buffer_size = size;
        self
    }

    /// Validate the configuration and create the matching [`Parser`].
    pub fn build(&self) -> Result<Parser> {
        self.options.validate()?;

        Ok(Parser {
            core: CoreParser::new(self.options.clone())?,
            options: self.options.clone(),
            on_row: None,
            on_error: None,
            started: Instant::now(),
            simd_features: simd_features(),
        })
    }
}

/// A streaming, callback-driven CSV/TSV parser.
///
/// Feed bytes through [`Parser::parse_buffer`] in chunks of any size, or
/// use the string, file and stream entry points. Each completed record is
/// handed to the row callback as a [`Row`] borrowing the parser's internal
/// storage: the view is only valid until the callback returns, so copy the
/// bytes out for longer retention.
///
/// A parser performs all of its work synchronously on the caller's thread.
/// Separate instances are fully independent.
pub struct Parser {
    core: CoreParser,
    options: ParseOptions,
    on_row: Option<RowFn>,
    on_error: Option<ErrorFn>,
    started: Instant,
    simd_features: u32,
}

impl Parser {
    /// Create a parser with default configuration.
    pub fn new() -> Result<Self> {
        ParserBuilder::new().build()
    }

    /// The configuration this parser was built with.
    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    /// Register the callback receiving each emitted row.
    ///
    /// The [`Row`] and its fields borrow parser storage and are only valid
    /// until the callback returns.
    pub fn set_row_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&Row) + 'static,
    {
        self.on_row = Some(Box::new(callback));
    }

    /// Register the callback notified of reported errors, along with the
    /// number the offending row would have carried.
    ///
    /// The callback is informational; it cannot request retry or skip.
    pub fn set_error_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&Error, u64) + 'static,
    {
        self.on_error = Some(Box::new(callback));
    }

    /// Parse one chunk of input, with `is_final` set on the last one.
    ///
    /// Any partitioning of the input into chunks yields the same row
    /// stream as parsing it whole. On error, rows emitted so far stand,
    /// the partial row is dropped and the parser is ready for input at a
    /// row boundary; call [`Parser::reset`] to discard all progress.
    pub fn parse_buffer(&mut self, bytes: &[u8], is_final: bool) -> Result<()> {
        let Self {
            core,
            on_row,
            on_error,
            ..
        } = self;

        core.parse_chunk(bytes, is_final, on_row, on_error)
    }

    /// Parse a complete input in one call.
    pub fn parse_string(&mut self, string: &str) -> Result<()> {
        if string.len() > self.options.max_row_size {
            return Err(Error::RowTooLarge {
                max: self.options.max_row_size,
            });
        }

        self.parse_buffer(string.as_bytes(), true)
    }

    /// Open `path` and parse it in chunks of the configured buffer size.
    pub fn parse_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();

        tracing::debug!(path = %path.display(), "parsing file");

        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) => return Err(self.report_io(err.into())),
        };

        self.parse_stream(file)
    }

    /// Parse an arbitrary byte source in chunks of the configured buffer
    /// size.
    pub fn parse_stream<R: Read>(&mut self, mut reader: R) -> Result<()> {
        let mut buffer = vec![0u8; self.options.buffer_size];

        loop {
            match reader.read(&mut buffer) {
                Ok(0) => return self.parse_buffer(&[], true),
                Ok(read) => self.parse_buffer(&buffer[..read], false)?,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(self.report_io(err.into())),
            }
        }
    }

    /// Return to a pristine parse state, retaining allocations for reuse.
    pub fn reset(&mut self) {
        tracing::debug!("resetting parser");

        self.core.reset();
        self.started = Instant::now();
    }

    /// Snapshot of activity since construction or the last reset.
    pub fn stats(&self) -> Stats {
        let counters = self.core.counters;
        let scan = self.core.scan_counters();

        let parse_time_ns = self.started.elapsed().as_nanos() as u64;

        let throughput_mbps = if parse_time_ns > 0 {
            (counters.bytes_processed as f64 / (1024.0 * 1024.0))
                / (parse_time_ns as f64 / 1e9)
        } else {
            0.0
        };

        Stats {
            total_bytes_processed: counters.bytes_processed,
            total_rows_parsed: counters.rows_parsed,
            total_fields_parsed: counters.fields_parsed,
            parse_time_ns,
            throughput_mbps,
            simd_features_used: self.simd_features,
            peak_memory_bytes: self.core.budget.peak() as u64,
            simd_ops: scan.simd_ops,
            scalar_fallbacks: scan.scalar_fallbacks,
            errors_encountered: counters.errors_encountered,
            avg_field_size: counters.avg_field_size,
            avg_row_size: counters.avg_row_size,
        }
    }

    fn report_io(&mut self, error: Error) -> Error {
        self.core.counters.errors_encountered += 1;

        tracing::debug!(error = %error, "reporting i/o error");

        if let Some(callback) = &mut self.on_error {
            callback(&error, self.core.counters.rows_parsed + 1);
        }

        error
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::io::Cursor;
    use std::rc::Rc;

    use super::*;

    // (row_number, byte_offset, fields as (bytes, quoted))
    type CollectedRow = (u64, u64, Vec<(Vec<u8>, bool)>);
    type Collected = Rc<RefCell<Vec<CollectedRow>>>;

    fn collect_rows(parser: &mut Parser) -> Collected {
        let rows: Collected = Rc::default();
        let sink = rows.clone();

        parser.set_row_callback(move |row| {
            sink.borrow_mut().push((
                row.row_number(),
                row.byte_offset(),
                row.iter()
                    .map(|field| (field.as_bytes().to_vec(), field.is_quoted()))
                    .collect(),
            ));
        });

        rows
    }

    fn parse_whole(builder: &ParserBuilder, input: &[u8]) -> Result<Vec<CollectedRow>> {
        let mut parser = builder.build()?;
        let rows = collect_rows(&mut parser);

        parser.parse_buffer(input, true)?;

        let collected = rows.borrow().clone();
        Ok(collected)
    }

    fn parse_chunked(
        builder: &ParserBuilder,
        input: &[u8],
        chunk_size: usize,
    ) -> Result<Vec<CollectedRow>> {
        let mut parser = builder.build()?;
        let rows = collect_rows(&mut parser);

        for chunk in input.chunks(chunk_size) {
            parser.parse_buffer(chunk, false)?;
        }
        parser.parse_buffer(&[], true)?;

        let collected = rows.borrow().clone();
        Ok(collected)
    }

    fn fields_of(rows: &[CollectedRow]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|(_, _, fields)| {
                fields
                    .iter()
                    .map(|(bytes, _)| String::from_utf8_lossy(bytes).into_owned())
                    .collect()
            })
            .collect()
    }

    fn svec(row: &[&str]) -> Vec<String> {
        row.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_basic() -> Result<()> {
        let rows = parse_whole(
            &ParserBuilder::new(),
            b"name,age,city\nJohn,25,Paris\nJane,30,London\n",
        )?;

        assert_eq!(
            fields_of(&rows),
            vec![
                svec(&["name", "age", "city"]),
                svec(&["John", "25", "Paris"]),
                svec(&["Jane", "30", "London"]),
            ]
        );

        // Row numbers are 1-based, offsets point at each row's first byte.
        assert_eq!(rows[0].0, 1);
        assert_eq!(rows[1].0, 2);
        assert_eq!(rows[2].0, 3);
        assert_eq!(rows[0].1, 0);
        assert_eq!(rows[1].1, 14);
        assert_eq!(rows[2].1, 28);

        // No quoted field anywhere.
        assert!(rows
            .iter()
            .all(|(_, _, fields)| fields.iter().all(|(_, quoted)| !quoted)));

        Ok(())
    }

    #[test]
    fn test_quoted_fields() -> Result<()> {
        let rows = parse_whole(
            &ParserBuilder::new(),
            b"\"name\",\"age\",\"city\"\n\"John Doe\",\"25\",\"Paris, France\"\n",
        )?;

        assert_eq!(
            fields_of(&rows),
            vec![
                svec(&["name", "age", "city"]),
                svec(&["John Doe", "25", "Paris, France"]),
            ]
        );

        assert!(rows
            .iter()
            .all(|(_, _, fields)| fields.iter().all(|(_, quoted)| *quoted)));

        Ok(())
    }

    #[test]
    fn test_escaped_quote() -> Result<()> {
        let rows = parse_whole(
            &ParserBuilder::new(),
            b"name,description,value\nTest,\"Value with \"\"quotes\"\"\",123\n",
        )?;

        assert_eq!(
            fields_of(&rows),
            vec![
                svec(&["name", "description", "value"]),
                svec(&["Test", "Value with \"quotes\"", "123"]),
            ]
        );

        assert!(rows[1].2[1].1);

        Ok(())
    }

    #[test]
    fn test_crlf_and_empty_field() -> Result<()> {
        let rows = parse_whole(&ParserBuilder::new(), b"a,,c\r\n1,2,3\r\n")?;

        assert_eq!(
            fields_of(&rows),
            vec![svec(&["a", "", "c"]), svec(&["1", "2", "3"])]
        );

        assert_eq!(rows[1].1, 6);

        Ok(())
    }

    #[test]
    fn test_quoted_newline() -> Result<()> {
        let rows = parse_whole(&ParserBuilder::new(), b"k,v\n1,\"line1\nline2\"\n")?;

        assert_eq!(
            fields_of(&rows),
            vec![svec(&["k", "v"]), svec(&["1", "line1\nline2"])]
        );

        Ok(())
    }

    #[test]
    fn test_chunked_feed() -> Result<()> {
        let mut parser = Parser::new()?;
        let rows = collect_rows(&mut parser);

        parser.parse_buffer(b"name,a", false)?;
        parser.parse_buffer(b"ge\nJohn,25\n", false)?;
        parser.parse_buffer(b"", true)?;

        let collected = rows.borrow();

        assert_eq!(
            fields_of(&collected),
            vec![svec(&["name", "age"]), svec(&["John", "25"])]
        );

        // Offsets refer to the logical stream, not individual chunks.
        assert_eq!(collected[0].1, 0);
        assert_eq!(collected[1].1, 9);

        assert_eq!(parser.stats().total_bytes_processed, 17);

        Ok(())
    }

    #[test]
    fn test_chunk_equivalence() -> Result<()> {
        let inputs: Vec<&[u8]> = vec![
            b"name,age,city\nJohn,25,Paris\nJane,30,London\n",
            b"a,,c\r\n1,2,3\r\n",
            b"k,v\n1,\"line1\nline2\"\n",
            b"Test,\"Value with \"\"quotes\"\"\",123\n",
            b"\r\n\r\n\r\na,b\r\n\r\n",
            b"\"unterminated,row",
            b"x\ry\nz",
            b"\"a\"  ,b\n",
            b"one\n\ntwo\n\n\nthree",
        ];

        let mut builders = Vec::new();

        let mut default = ParserBuilder::new();
        default.buffer_size(4);
        builders.push(default);

        let mut keep_empty = ParserBuilder::new();
        keep_empty.ignore_empty_lines(false);
        builders.push(keep_empty);

        let mut trimming = ParserBuilder::new();
        trimming.trim_whitespace(true);
        builders.push(trimming);

        for builder in &builders {
            for input in &inputs {
                let whole = parse_whole(builder, input)?;

                for chunk_size in 1..=input.len() {
                    let chunked = parse_chunked(builder, input, chunk_size)?;

                    assert_eq!(
                        chunked, whole,
                        "chunk_size={} input={:?}",
                        chunk_size,
                        String::from_utf8_lossy(input)
                    );
                }
            }
        }

        Ok(())
    }

    #[test]
    fn test_empty_input() -> Result<()> {
        assert!(parse_whole(&ParserBuilder::new(), b"")?.is_empty());

        let mut parser = Parser::new()?;
        let rows = collect_rows(&mut parser);
        parser.parse_buffer(b"", false)?;
        parser.parse_buffer(b"", true)?;
        assert!(rows.borrow().is_empty());

        Ok(())
    }

    #[test]
    fn test_newline_only() -> Result<()> {
        assert!(parse_whole(&ParserBuilder::new(), b"\n")?.is_empty());

        let mut keep_empty = ParserBuilder::new();
        keep_empty.ignore_empty_lines(false);

        let rows = parse_whole(&keep_empty, b"\n")?;

        assert_eq!(fields_of(&rows), vec![svec(&[""])]);
        assert!(!rows[0].2[0].1);

        Ok(())
    }

    #[test]
    fn test_crlf_only_input() -> Result<()> {
        assert!(parse_whole(&ParserBuilder::new(), b"\r\n\r\n\r\n")?.is_empty());

        let mut keep_empty = ParserBuilder::new();
        keep_empty.ignore_empty_lines(false);

        let rows = parse_whole(&keep_empty, b"\r\n\r\n\r\n")?;
        assert_eq!(rows.len(), 3);

        Ok(())
    }

    #[test]
    fn test_trailing_delimiter() -> Result<()> {
        // Before a line terminator, the trailing empty field is real.
        let rows = parse_whole(&ParserBuilder::new(), b"a,\n")?;
        assert_eq!(fields_of(&rows), vec![svec(&["a", ""])]);

        // At end of input there is no pending field to emit.
        let rows = parse_whole(&ParserBuilder::new(), b"a,")?;
        assert_eq!(fields_of(&rows), vec![svec(&["a"])]);

        Ok(())
    }

    #[test]
    fn test_trim_whitespace() -> Result<()> {
        let mut builder = ParserBuilder::new();
        builder.trim_whitespace(true);

        let rows = parse_whole(&builder, b" a\t,  b  ,\t\t,  c \n")?;

        assert_eq!(fields_of(&rows), vec![svec(&["a", "b", "", "c"])]);

        // Quoted fields keep every inner byte.
        let rows = parse_whole(&builder, b"\" padded \",x\n")?;
        assert_eq!(fields_of(&rows), vec![svec(&[" padded ", "x"])]);

        Ok(())
    }

    #[test]
    fn test_whitespace_between_quote_and_delimiter() -> Result<()> {
        let rows = parse_whole(&ParserBuilder::new(), b"\"a\"  ,\"b\"\t\n")?;

        assert_eq!(fields_of(&rows), vec![svec(&["a", "b"])]);
        assert!(rows[0].2.iter().all(|(_, quoted)| *quoted));

        Ok(())
    }

    #[test]
    fn test_lenient_stray_quote() -> Result<()> {
        let rows = parse_whole(&ParserBuilder::new(), b"a\"b,c\n")?;

        assert_eq!(fields_of(&rows), vec![svec(&["a\"b", "c"])]);

        Ok(())
    }

    #[test]
    fn test_strict_stray_quote() -> Result<()> {
        let mut builder = ParserBuilder::new();
        builder.strict_mode(true);

        let mut parser = builder.build()?;

        let reported: Rc<RefCell<Vec<(i32, u64)>>> = Rc::default();
        let sink = reported.clone();
        parser.set_error_callback(move |error, row_number| {
            sink.borrow_mut().push((error.status_code(), row_number));
        });

        let err = parser.parse_buffer(b"a\"b,c\n", true).unwrap_err();

        assert!(matches!(err, Error::Parse { .. }));
        assert_eq!(err.status_code(), -6);
        assert_eq!(*reported.borrow(), vec![(-6, 1)]);

        Ok(())
    }

    #[test]
    fn test_strict_unclosed_quote() -> Result<()> {
        let mut builder = ParserBuilder::new();
        builder.strict_mode(true);

        let mut parser = builder.build()?;
        let err = parser.parse_buffer(b"\"a,b\n", true).unwrap_err();

        assert!(matches!(err, Error::Parse { .. }));

        Ok(())
    }

    #[test]
    fn test_lenient_unclosed_quote() -> Result<()> {
        let rows = parse_whole(&ParserBuilder::new(), b"\"a,b\n")?;

        assert_eq!(fields_of(&rows), vec![svec(&["a,b\n"])]);
        assert!(rows[0].2[0].1);

        Ok(())
    }

    #[test]
    fn test_closed_quote_at_end_of_input() -> Result<()> {
        let rows = parse_whole(&ParserBuilder::new(), b"\"a\"")?;

        assert_eq!(fields_of(&rows), vec![svec(&["a"])]);
        assert!(rows[0].2[0].1);

        Ok(())
    }

    #[test]
    fn test_field_too_large() -> Result<()> {
        let mut builder = ParserBuilder::new();
        builder.max_field_size(4);

        let mut parser = builder.build()?;
        let err = parser.parse_buffer(b"12345,x\n", true).unwrap_err();

        assert!(matches!(err, Error::FieldTooLarge { max: 4 }));
        assert_eq!(err.status_code(), -7);

        // Quoted fields hit the same bound while accumulating.
        let mut parser = builder.build()?;
        let err = parser.parse_buffer(b"\"12345\",x\n", true).unwrap_err();
        assert!(matches!(err, Error::FieldTooLarge { max: 4 }));

        Ok(())
    }

    #[test]
    fn test_row_too_large() -> Result<()> {
        let mut builder = ParserBuilder::new();
        builder.max_field_size(8).max_row_size(8);

        let mut parser = builder.build()?;
        let err = parser.parse_buffer(b"aaaa,bbbb,cccc\n", true).unwrap_err();

        assert!(matches!(err, Error::RowTooLarge { max: 8 }));
        assert_eq!(err.status_code(), -8);

        Ok(())
    }

    #[test]
    fn test_memory_cap_at_build() {
        let mut builder = ParserBuilder::new();
        builder.max_memory_bytes(1024);

        assert!(matches!(builder.build(), Err(Error::OutOfMemory)));
    }

    #[test]
    fn test_memory_cap_during_parse() -> Result<()> {
        let mut builder = ParserBuilder::new();
        builder.max_memory_bytes(80 * 1024);

        let mut parser = builder.build()?;

        let input = format!("\"{}\"\n", "x".repeat(70_000));
        let err = parser.parse_buffer(input.as_bytes(), true).unwrap_err();

        assert!(matches!(err, Error::OutOfMemory));
        assert_eq!(err.status_code(), -2);

        Ok(())
    }

    #[test]
    fn test_reset_idempotence() -> Result<()> {
        let input = b"a,b\n\"c\",d\r\ne,f\n";

        let mut parser = Parser::new()?;
        let rows = collect_rows(&mut parser);

        parser.parse_buffer(input, true)?;
        let first = rows.borrow().clone();
        let first_bytes = parser.stats().total_bytes_processed;

        parser.reset();
        rows.borrow_mut().clear();

        parser.parse_buffer(input, true)?;
        let second = rows.borrow().clone();

        assert_eq!(first, second);
        assert_eq!(parser.stats().total_bytes_processed, first_bytes);

        Ok(())
    }

    #[test]
    fn test_row_numbers_skip_ignored_lines() -> Result<()> {
        let rows = parse_whole(&ParserBuilder::new(), b"a\n\n\nb\n")?;

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, 1);
        assert_eq!(rows[1].0, 2);
        assert_eq!(rows[1].1, 3);

        Ok(())
    }

    #[test]
    fn test_empty_quoted_field_is_quoted() -> Result<()> {
        let rows = parse_whole(&ParserBuilder::new(), b"\"\",x\n,y\n")?;

        assert_eq!(fields_of(&rows), vec![svec(&["", "x"]), svec(&["", "y"])]);

        // Same bytes, different provenance.
        assert!(rows[0].2[0].1);
        assert!(!rows[1].2[0].1);

        Ok(())
    }

    #[test]
    fn test_lone_cr_is_a_line_end() -> Result<()> {
        let rows = parse_whole(&ParserBuilder::new(), b"a\rb\n")?;
        assert_eq!(fields_of(&rows), vec![svec(&["a"]), svec(&["b"])]);

        let rows = parse_whole(&ParserBuilder::new(), b"a\r")?;
        assert_eq!(fields_of(&rows), vec![svec(&["a"])]);

        Ok(())
    }

    #[test]
    fn test_tsv() -> Result<()> {
        let mut builder = ParserBuilder::new();
        builder.delimiter(b'\t');

        let rows = parse_whole(&builder, b"a\tb\t\"c\td\"\n")?;

        assert_eq!(fields_of(&rows), vec![svec(&["a", "b", "c\td"])]);

        Ok(())
    }

    #[test]
    fn test_error_leaves_prior_rows_standing() -> Result<()> {
        let mut builder = ParserBuilder::new();
        builder.strict_mode(true);

        let mut parser = builder.build()?;
        let rows = collect_rows(&mut parser);

        let err = parser.parse_buffer(b"ok,1\nbad\"x\n", true).unwrap_err();

        assert!(matches!(err, Error::Parse { .. }));
        assert_eq!(fields_of(&rows.borrow()), vec![svec(&["ok", "1"])]);
        assert_eq!(parser.stats().errors_encountered, 1);

        Ok(())
    }

    #[test]
    fn test_parse_string() -> Result<()> {
        let mut parser = Parser::new()?;
        let rows = collect_rows(&mut parser);

        parser.parse_string("a,b\nc,d")?;

        assert_eq!(
            fields_of(&rows.borrow()),
            vec![svec(&["a", "b"]), svec(&["c", "d"])]
        );

        Ok(())
    }

    #[test]
    fn test_parse_string_rejects_oversized_input() -> Result<()> {
        let mut builder = ParserBuilder::new();
        builder.max_field_size(8).max_row_size(8);

        let mut parser = builder.build()?;
        let err = parser.parse_string("123456789").unwrap_err();

        assert!(matches!(err, Error::RowTooLarge { max: 8 }));

        Ok(())
    }

    #[test]
    fn test_parse_stream_with_tiny_buffer() -> Result<()> {
        let input = b"name,surname\r\n\"john\",\"landy, the \"\"everlasting\"\" bastard\"\r\nlucy,rose\n";

        let whole = parse_whole(&ParserBuilder::new(), input)?;

        for capacity in [32usize, 4, 3, 2, 1] {
            let mut builder = ParserBuilder::new();
            builder.buffer_size(capacity);

            let mut parser = builder.build()?;
            let rows = collect_rows(&mut parser);

            parser.parse_stream(Cursor::new(input))?;

            assert_eq!(*rows.borrow(), whole, "capacity={}", capacity);
        }

        Ok(())
    }

    #[test]
    fn test_parse_file() -> Result<()> {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"name,age\nJohn,25\n").unwrap();
        file.flush().unwrap();

        let mut parser = Parser::new()?;
        let rows = collect_rows(&mut parser);

        parser.parse_file(file.path())?;

        assert_eq!(
            fields_of(&rows.borrow()),
            vec![svec(&["name", "age"]), svec(&["John", "25"])]
        );

        Ok(())
    }

    #[test]
    fn test_parse_file_missing() -> Result<()> {
        let mut parser = Parser::new()?;

        let reported: Rc<RefCell<Vec<i32>>> = Rc::default();
        let sink = reported.clone();
        parser.set_error_callback(move |error, _| {
            sink.borrow_mut().push(error.status_code());
        });

        let err = parser
            .parse_file("/definitely/not/a/real/path.csv")
            .unwrap_err();

        assert_eq!(err.status_code(), -9);
        assert_eq!(*reported.borrow(), vec![-9]);

        Ok(())
    }

    #[test]
    fn test_stats_accounting() -> Result<()> {
        let input = b"name,age\nJohn,25\n\"Jane\",30\n";

        let mut parser = Parser::new()?;
        parser.set_row_callback(|_| {});
        parser.parse_buffer(input, true)?;

        let stats = parser.stats();

        assert_eq!(stats.total_bytes_processed, input.len() as u64);
        assert_eq!(stats.total_rows_parsed, 3);
        assert_eq!(stats.total_fields_parsed, 6);
        assert_eq!(stats.simd_features_used, simd_features());
        assert!(stats.peak_memory_bytes > 0);
        assert!(stats.avg_field_size > 0.0);
        assert!(stats.avg_row_size > 0.0);
        assert!(stats.throughput_mbps >= 0.0);
        assert_eq!(stats.errors_encountered, 0);

        Ok(())
    }

    #[test]
    fn test_round_trip_simple_fields() -> Result<()> {
        let input = b"a,b,c\nd,e,f\ng,h,i\n";

        let rows = parse_whole(&ParserBuilder::new(), input)?;

        let mut rebuilt = Vec::new();
        for (_, _, fields) in &rows {
            let cells: Vec<&[u8]> = fields.iter().map(|(bytes, _)| bytes.as_slice()).collect();
            rebuilt.extend_from_slice(&cells.join(&b","[..]));
            rebuilt.push(b'\n');
        }

        assert_eq!(rebuilt, input);

        Ok(())
    }

    mod proptests {
        use super::*;

        use proptest::prelude::*;

        proptest! {
            // Any partitioning of any input replays to an identical row
            // stream, offsets and numbering included.
            #[test]
            fn chunking_is_transparent(
                bytes in prop::collection::vec(
                    prop::sample::select(vec![
                        b'a', b'b', b',', b'"', b'\n', b'\r', b' ', b'\t',
                    ]),
                    0..80,
                ),
                chunk_size in 1usize..9,
                keep_empty_lines in any::<bool>(),
                trim in any::<bool>(),
            ) {
                let mut builder = ParserBuilder::new();
                builder
                    .ignore_empty_lines(!keep_empty_lines)
                    .trim_whitespace(trim);

                let whole = parse_whole(&builder, &bytes).unwrap();
                let chunked = parse_chunked(&builder, &bytes, chunk_size).unwrap();

                prop_assert_eq!(whole, chunked);
            }
        }
    }
}
