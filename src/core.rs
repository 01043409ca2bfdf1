use memchr::memchr;

use crate::buffer::{reserve_budgeted, ByteArena, MemoryBudget};
use crate::error::{Error, Result};
use crate::options::ParseOptions;
use crate::records::{FieldSpan, Row, SpanSource};
use crate::scanner::{ScanCounters, Scanner};
use crate::stats::Counters;

pub(crate) type RowFn = Box<dyn FnMut(&Row<'_>)>;
pub(crate) type ErrorFn = Box<dyn FnMut(&Error, u64)>;

const INITIAL_FIELDS_CAPACITY: usize = 512;
const INITIAL_ARENA_CAPACITY: usize = 16 * 1024;
const INITIAL_SCRATCH_CAPACITY: usize = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    FieldStart,
    InQuotedField,
    QuoteInQuotedField,
}

enum FieldScan {
    // New position right after the consumed span.
    Advanced(usize),
    // The tail starting here must be carried over to the next chunk.
    Suspend(usize),
}

/// Streaming state machine consuming logical buffers and emitting rows
/// through the provided callbacks.
///
/// Input arrives in arbitrarily split chunks; whatever cannot be completed
/// at a chunk boundary is carried over in `unparsed` and replayed in front
/// of the next chunk, so the emitted stream is independent of the split.
pub(crate) struct CoreParser {
    options: ParseOptions,
    scanner: Scanner,
    state: ParseState,
    // Tail of a previous chunk that could not be completed.
    unparsed: ByteArena,
    // In-progress quoted field, unescaped.
    scratch: ByteArena,
    // Storage for quoted fields of the current row, plus fields
    // stabilized when a row straddles a chunk boundary.
    arena: ByteArena,
    spans: Vec<FieldSpan>,
    pub(crate) budget: MemoryBudget,
    pub(crate) counters: Counters,
    row_start_offset: u64,
}

impl CoreParser {
    pub(crate) fn new(options: ParseOptions) -> Result<Self> {
        let mut budget = MemoryBudget::new(options.max_memory_bytes);

        let mut spans = Vec::new();
        reserve_budgeted(&mut spans, INITIAL_FIELDS_CAPACITY, &mut budget)?;

        let arena = ByteArena::with_capacity(INITIAL_ARENA_CAPACITY, &mut budget)?;
        let scratch = ByteArena::with_capacity(INITIAL_SCRATCH_CAPACITY, &mut budget)?;

        Ok(Self {
            scanner: Scanner::new(options.delimiter, options.quote),
            options,
            state: ParseState::FieldStart,
            unparsed: ByteArena::default(),
            scratch,
            arena,
            spans,
            budget,
            counters: Counters::default(),
            row_start_offset: 0,
        })
    }

    /// Returns to a pristine parse state, retaining allocations.
    pub(crate) fn reset(&mut self) {
        self.state = ParseState::FieldStart;
        self.unparsed.clear();
        self.scratch.clear();
        self.arena.clear();
        self.spans.clear();
        self.counters = Counters::default();
        self.scanner.counters = ScanCounters::default();
        self.row_start_offset = 0;
    }

    pub(crate) fn scan_counters(&self) -> ScanCounters {
        self.scanner.counters
    }

    pub(crate) fn parse_chunk(
        &mut self,
        bytes: &[u8],
        is_final: bool,
        on_row: &mut Option<RowFn>,
        on_error: &mut Option<ErrorFn>,
    ) -> Result<()> {
        // Assemble the logical buffer: carried-over tail first, then the
        // new bytes, so descriptors stay contiguous.
        let mut carry = std::mem::take(&mut self.unparsed);
        let parsing_carry = !carry.is_empty();

        if parsing_carry && !bytes.is_empty() {
            if let Err(err) = carry.push_slice(bytes, &mut self.budget) {
                self.abort_row_state();
                carry.clear();
                self.unparsed = carry;
                return Err(err);
            }
        }

        let input: &[u8] = if parsing_carry { carry.as_slice() } else { bytes };

        match self.run(input, is_final, on_row, on_error) {
            Ok(None) => {
                carry.clear();
                self.unparsed = carry;
                Ok(())
            }
            Ok(Some(from)) => {
                if parsing_carry {
                    carry.discard_front(from);
                    self.unparsed = carry;
                } else {
                    self.unparsed = carry;
                    self.unparsed.push_slice(&bytes[from..], &mut self.budget)?;
                }
                Ok(())
            }
            Err(err) => {
                self.abort_row_state();
                carry.clear();
                self.unparsed = carry;
                Err(err)
            }
        }
    }

    // Parsing of the buffer halted mid-row: drop the partial row so the
    // parser is ready for further input at a row boundary. Rows emitted
    // before the error stand.
    fn abort_row_state(&mut self) {
        self.state = ParseState::FieldStart;
        self.scratch.clear();
        self.arena.clear();
        self.spans.clear();
    }

    // Returns `Ok(Some(offset))` when the tail starting at `offset` must
    // be carried over to the next chunk, `Ok(None)` when the buffer was
    // fully consumed.
    fn run(
        &mut self,
        input: &[u8],
        is_final: bool,
        on_row: &mut Option<RowFn>,
        on_error: &mut Option<ErrorFn>,
    ) -> Result<Option<usize>> {
        use ParseState::*;

        let len = input.len();
        let base = self.counters.bytes_processed;
        let delimiter = self.options.delimiter;
        let quote = self.options.quote;

        let mut pos: usize = 0;

        while pos < len {
            match self.state {
                FieldStart => {
                    let c = input[pos];

                    if c == quote {
                        self.state = InQuotedField;
                        self.scratch.clear();
                        pos += 1;
                    } else if c == delimiter {
                        self.add_window_field(input, pos, pos, on_error)?;
                        pos += 1;
                    } else if c == b'\n' {
                        self.add_line_end_field(on_error)?;
                        pos += 1;
                        self.finish_row(input, base + pos as u64, on_row, on_error)?;
                    } else if c == b'\r' {
                        // A CR ending a non-final chunk cannot be resolved
                        // against a possible following LF yet.
                        if pos + 1 == len && !is_final {
                            return self.suspend(input, pos, base);
                        }

                        self.add_line_end_field(on_error)?;
                        pos += 1;
                        if pos < len && input[pos] == b'\n' {
                            pos += 1;
                        }
                        self.finish_row(input, base + pos as u64, on_row, on_error)?;
                    } else {
                        match self.read_unquoted_field(input, pos, is_final, base, on_row, on_error)? {
                            FieldScan::Advanced(next) => pos = next,
                            FieldScan::Suspend(from) => return self.suspend(input, from, base),
                        }
                    }
                }
                InQuotedField => match memchr(quote, &input[pos..]) {
                    None => {
                        self.append_scratch(&input[pos..], on_error)?;
                        pos = len;
                    }
                    Some(offset) => {
                        let quote_pos = pos + offset;

                        self.append_scratch(&input[pos..quote_pos], on_error)?;

                        // A closing-quote candidate ending a non-final
                        // chunk could still be the first half of an
                        // escaped pair.
                        if self.options.double_quote_escape && quote_pos + 1 == len && !is_final
                        {
                            return self.suspend(input, quote_pos, base);
                        }

                        pos = quote_pos + 1;

                        if self.options.double_quote_escape
                            && pos < len
                            && input[pos] == quote
                        {
                            self.append_scratch(&[quote], on_error)?;
                            pos += 1;
                        } else {
                            self.state = QuoteInQuotedField;
                        }
                    }
                },
                QuoteInQuotedField => {
                    let c = input[pos];

                    if c == delimiter {
                        self.add_quoted_field(on_error)?;
                        self.state = FieldStart;
                        pos += 1;
                    } else if c == b'\n' {
                        self.add_quoted_field(on_error)?;
                        self.state = FieldStart;
                        pos += 1;
                        self.finish_row(input, base + pos as u64, on_row, on_error)?;
                    } else if c == b'\r' {
                        if pos + 1 == len && !is_final {
                            return self.suspend(input, pos, base);
                        }

                        self.add_quoted_field(on_error)?;
                        self.state = FieldStart;
                        pos += 1;
                        if pos < len && input[pos] == b'\n' {
                            pos += 1;
                        }
                        self.finish_row(input, base + pos as u64, on_row, on_error)?;
                    } else if c == b' ' || c == b'\t' {
                        // Tolerated whitespace between the closing quote
                        // and the next delimiter.
                        pos += 1;
                    } else if self.options.strict_mode {
                        return Err(self.report(
                            Error::parse("unexpected character after closing quote"),
                            on_error,
                        ));
                    } else {
                        self.append_scratch(&[quote], on_error)?;
                        self.append_scratch(&[c], on_error)?;
                        self.state = InQuotedField;
                        pos += 1;
                    }
                }
            }
        }

        if is_final {
            match self.state {
                InQuotedField => {
                    if self.options.strict_mode {
                        return Err(
                            self.report(Error::parse("unclosed quoted field"), on_error)
                        );
                    }

                    self.add_quoted_field(on_error)?;
                    self.state = FieldStart;
                }
                QuoteInQuotedField => {
                    self.add_quoted_field(on_error)?;
                    self.state = FieldStart;
                }
                FieldStart => {}
            }

            if !self.spans.is_empty() {
                self.finish_row(input, base + len as u64, on_row, on_error)?;
            }

            self.counters.bytes_processed = base + len as u64;
            return Ok(None);
        }

        self.stabilize_spans(input)?;
        self.counters.bytes_processed = base + len as u64;

        Ok(None)
    }

    // Fast path: scan ahead for the end of an unquoted field in bulk.
    //
    // A stray quote is an error in strict mode; otherwise the quote byte
    // is kept in the field and scanning resumes past it.
    fn read_unquoted_field(
        &mut self,
        input: &[u8],
        field_start: usize,
        is_final: bool,
        base: u64,
        on_row: &mut Option<RowFn>,
        on_error: &mut Option<ErrorFn>,
    ) -> Result<FieldScan> {
        let len = input.len();
        let delimiter = self.options.delimiter;
        let mut search_from = field_start;

        loop {
            let Some(offset) = self.scanner.find(&input[search_from..]) else {
                if is_final {
                    self.add_window_field(input, field_start, len, on_error)?;
                    return Ok(FieldScan::Advanced(len));
                }

                // Bound the carried-over tail before it goes anywhere.
                if len - field_start > self.options.max_field_size {
                    return Err(self.report(
                        Error::FieldTooLarge {
                            max: self.options.max_field_size,
                        },
                        on_error,
                    ));
                }

                return Ok(FieldScan::Suspend(field_start));
            };

            let hit = search_from + offset;
            let c = input[hit];

            if c == delimiter {
                self.add_window_field(input, field_start, hit, on_error)?;
                return Ok(FieldScan::Advanced(hit + 1));
            }

            if c == b'\n' {
                self.add_window_field(input, field_start, hit, on_error)?;
                let next = hit + 1;
                self.finish_row(input, base + next as u64, on_row, on_error)?;
                return Ok(FieldScan::Advanced(next));
            }

            if c == b'\r' {
                if hit + 1 == len && !is_final {
                    if hit - field_start > self.options.max_field_size {
                        return Err(self.report(
                            Error::FieldTooLarge {
                                max: self.options.max_field_size,
                            },
                            on_error,
                        ));
                    }

                    return Ok(FieldScan::Suspend(field_start));
                }

                self.add_window_field(input, field_start, hit, on_error)?;

                let mut next = hit + 1;
                if next < len && input[next] == b'\n' {
                    next += 1;
                }

                self.finish_row(input, base + next as u64, on_row, on_error)?;
                return Ok(FieldScan::Advanced(next));
            }

            // Quote inside an unquoted field.
            if self.options.strict_mode {
                return Err(
                    self.report(Error::parse("quote character in unquoted field"), on_error)
                );
            }

            search_from = hit + 1;
        }
    }

    fn suspend(&mut self, input: &[u8], from: usize, base: u64) -> Result<Option<usize>> {
        self.stabilize_spans(input)?;
        self.counters.bytes_processed = base + from as u64;

        Ok(Some(from))
    }

    // Before handing control back mid-row, move every field still
    // borrowing the input window into the arena so no descriptor dangles
    // once the window is gone.
    fn stabilize_spans(&mut self, input: &[u8]) -> Result<()> {
        for i in 0..self.spans.len() {
            let span = self.spans[i];

            if span.source == SpanSource::Window {
                let start = self.arena.len();

                self.arena
                    .push_slice(&input[span.start..span.end], &mut self.budget)?;

                self.spans[i] = FieldSpan {
                    start,
                    end: start + span.len(),
                    quoted: span.quoted,
                    source: SpanSource::Arena,
                };
            }
        }

        Ok(())
    }

    fn report(&mut self, error: Error, on_error: &mut Option<ErrorFn>) -> Error {
        self.counters.errors_encountered += 1;

        tracing::debug!(error = %error, "reporting parser error");

        if let Some(callback) = on_error {
            callback(&error, self.counters.rows_parsed + 1);
        }

        error
    }

    fn push_span(&mut self, span: FieldSpan) -> Result<()> {
        reserve_budgeted(&mut self.spans, 1, &mut self.budget)?;
        self.spans.push(span);

        Ok(())
    }

    fn add_window_field(
        &mut self,
        input: &[u8],
        start: usize,
        end: usize,
        on_error: &mut Option<ErrorFn>,
    ) -> Result<()> {
        let (mut start, mut end) = (start, end);

        if self.options.trim_whitespace {
            while start < end && (input[start] == b' ' || input[start] == b'\t') {
                start += 1;
            }
            while end > start && (input[end - 1] == b' ' || input[end - 1] == b'\t') {
                end -= 1;
            }
        }

        if end - start > self.options.max_field_size {
            return Err(self.report(
                Error::FieldTooLarge {
                    max: self.options.max_field_size,
                },
                on_error,
            ));
        }

        self.push_span(FieldSpan {
            start,
            end,
            quoted: false,
            source: SpanSource::Window,
        })?;

        self.counters.record_field(end - start);

        Ok(())
    }

    // Line terminator reached at field start: a trailing empty field only
    // exists if the row already has content, or when empty lines are
    // themselves records.
    fn add_line_end_field(&mut self, on_error: &mut Option<ErrorFn>) -> Result<()> {
        if self.spans.is_empty() && self.options.ignore_empty_lines {
            return Ok(());
        }

        self.add_window_field(&[], 0, 0, on_error)
    }

    fn add_quoted_field(&mut self, on_error: &mut Option<ErrorFn>) -> Result<()> {
        let size = self.scratch.len();

        if size > self.options.max_field_size {
            return Err(self.report(
                Error::FieldTooLarge {
                    max: self.options.max_field_size,
                },
                on_error,
            ));
        }

        let start = self.arena.len();

        self.arena
            .push_slice(self.scratch.as_slice(), &mut self.budget)?;

        self.push_span(FieldSpan {
            start,
            end: start + size,
            quoted: true,
            source: SpanSource::Arena,
        })?;

        self.counters.record_field(size);
        self.scratch.clear();

        Ok(())
    }

    fn append_scratch(&mut self, bytes: &[u8], on_error: &mut Option<ErrorFn>) -> Result<()> {
        if self.scratch.len() + bytes.len() > self.options.max_field_size {
            return Err(self.report(
                Error::FieldTooLarge {
                    max: self.options.max_field_size,
                },
                on_error,
            ));
        }

        self.scratch.push_slice(bytes, &mut self.budget)
    }

    fn finish_row(
        &mut self,
        input: &[u8],
        next_row_offset: u64,
        on_row: &mut Option<RowFn>,
        on_error: &mut Option<ErrorFn>,
    ) -> Result<()> {
        if self.spans.is_empty() {
            self.row_start_offset = next_row_offset;
            return Ok(());
        }

        let total_field_size: usize = self.spans.iter().map(|span| span.len()).sum();

        if total_field_size > self.options.max_row_size {
            return Err(self.report(
                Error::RowTooLarge {
                    max: self.options.max_row_size,
                },
                on_error,
            ));
        }

        self.counters.record_row(total_field_size);

        if let Some(callback) = on_row {
            let row = Row::new(
                input,
                self.arena.as_slice(),
                &self.spans,
                self.counters.rows_parsed,
                self.row_start_offset,
            );

            callback(&row);
        }

        self.spans.clear();
        self.arena.clear();
        self.row_start_offset = next_row_offset;

        Ok(())
    }
}
