//! The chunked, append-only line-protocol encoder (components C2 and C3 of
//! the design: the byte buffer and the fluent row builder are one type here,
//! matching the real-world shape callers expect — see the retrieved
//! `questdb.rs` ingestion snippet, which chains `buffer.table(..).symbol(..).column_i64(..).at(..)`
//! directly on a `Buffer`).

use std::io::{self, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::ident::{escape_quoted, escape_unquoted, validate_column_name, validate_table_name};

/// Nanoseconds since the Unix epoch, for the designated timestamp passed to
/// [`Buffer::at`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimestampNanos(pub i64);

impl TimestampNanos {
    pub fn new(ts: i64) -> Self {
        TimestampNanos(ts)
    }

    pub fn now() -> Self {
        let dur = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        TimestampNanos(dur.as_nanos() as i64)
    }
}

/// Microseconds since the Unix epoch, for a `column_ts` timestamp column.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimestampMicros(pub i64);

impl TimestampMicros {
    pub fn new(ts: i64) -> Self {
        TimestampMicros(ts)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum RowState {
    /// No row currently open.
    Idle,
    /// `table()` called; symbols may still follow.
    OpenTable,
    /// At least one `column` has been written; no more symbols allowed.
    OpenFields,
}

/// A chunked append-only buffer that encodes rows into QuestDB's ILP wire
/// format, one fixed-size chunk at a time.
///
/// Chunking exists so that a long-running sender can grow its buffer without
/// repeatedly reallocating and copying an ever-larger contiguous `Vec<u8>`:
/// each chunk is allocated once at `init_buf_size` (or larger, for a single
/// value that does not fit) and frozen once full.
pub struct Buffer {
    chunks: Vec<Vec<u8>>,
    current_chunk_index: usize,
    init_buf_size: usize,
    max_buf_size: usize,
    max_name_len: usize,

    length: usize,
    row_count: u64,

    state: RowState,
    has_symbol: bool,
    line_start_chunk: usize,
    line_start_position: usize,

    within_transaction: bool,
    current_table_name: Option<String>,
}

impl Buffer {
    /// Creates a buffer with the default chunk and size-cap settings (see
    /// `Options::defaults_for`). Most callers go through `Sender` instead,
    /// which sizes the buffer from parsed `Options`.
    pub fn new() -> Self {
        Buffer::with_sizes(65536, 104_857_600, 127)
    }

    pub fn with_sizes(init_buf_size: usize, max_buf_size: usize, max_name_len: usize) -> Self {
        Buffer {
            chunks: vec![Vec::with_capacity(init_buf_size)],
            current_chunk_index: 0,
            init_buf_size,
            max_buf_size,
            max_name_len,
            length: 0,
            row_count: 0,
            state: RowState::Idle,
            has_symbol: false,
            line_start_chunk: 0,
            line_start_position: 0,
            within_transaction: false,
            current_table_name: None,
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    fn current_chunk(&mut self) -> &mut Vec<u8> {
        &mut self.chunks[self.current_chunk_index]
    }

    /// Appends `bytes` as one atomic unit, moving to a fresh chunk first if
    /// it would not otherwise fit in the current one.
    fn append(&mut self, bytes: &[u8]) -> Result<()> {
        let remaining = self.init_buf_size.saturating_sub(self.current_chunk().len());
        if !bytes.is_empty() && bytes.len() > remaining && !self.current_chunk().is_empty() {
            self.current_chunk_index += 1;
            if self.current_chunk_index == self.chunks.len() {
                self.chunks
                    .push(Vec::with_capacity(self.init_buf_size.max(bytes.len())));
            } else {
                self.chunks[self.current_chunk_index].clear();
            }
        }
        self.current_chunk().extend_from_slice(bytes);
        self.length += bytes.len();
        if self.length > self.max_buf_size {
            return Err(Error::invalid_api_call(format!(
                "buffer would grow to {} bytes, exceeding max_buf_size of {} bytes",
                self.length, self.max_buf_size
            )));
        }
        Ok(())
    }

    fn mark_line_start(&mut self) {
        self.line_start_chunk = self.current_chunk_index;
        self.line_start_position = self.current_chunk().len();
    }

    /// Begins a new row for `name`. Must be followed by `symbol`/`column`
    /// calls and terminated with `at`/`at_now`.
    pub fn table(&mut self, name: &str) -> Result<&mut Self> {
        if self.state != RowState::Idle {
            return Err(Error::invalid_api_call(
                "table() called while a row is already open; call at() or cancel_row() first",
            ));
        }
        if self.within_transaction {
            if let Some(txn_table) = &self.current_table_name {
                if txn_table != name {
                    return Err(Error::invalid_api_call(format!(
                        "transaction is scoped to table {:?}, cannot write to {:?}",
                        txn_table, name
                    )));
                }
            }
        }
        validate_table_name(name, self.max_name_len)?;

        self.mark_line_start();
        let mut scratch = Vec::with_capacity(name.len());
        escape_unquoted(&mut scratch, name);
        self.append(&scratch)?;
        self.state = RowState::OpenTable;
        self.has_symbol = false;
        Ok(self)
    }

    /// Appends a `,name=value` symbol (tag). Must precede any `column` call.
    pub fn symbol(&mut self, name: &str, value: impl AsRef<str>) -> Result<&mut Self> {
        match self.state {
            RowState::OpenTable => {}
            RowState::OpenFields => {
                return Err(Error::invalid_api_call(
                    "symbol() called after column(); symbols must precede all fields",
                ))
            }
            RowState::Idle => {
                return Err(Error::invalid_api_call("symbol() called before table()"))
            }
        }
        validate_column_name(name, self.max_name_len)?;

        let mut scratch = Vec::with_capacity(name.len() + value.as_ref().len() + 2);
        scratch.push(b',');
        escape_unquoted(&mut scratch, name);
        scratch.push(b'=');
        escape_unquoted(&mut scratch, value.as_ref());
        self.append(&scratch)?;
        self.has_symbol = true;
        Ok(self)
    }

    fn begin_field(&mut self, name: &str) -> Result<Vec<u8>> {
        match self.state {
            RowState::OpenTable | RowState::OpenFields => {}
            RowState::Idle => return Err(Error::invalid_api_call("column() called before table()")),
        }
        validate_column_name(name, self.max_name_len)?;

        let mut scratch = Vec::with_capacity(name.len() + 8);
        scratch.push(if self.state == RowState::OpenTable {
            b' '
        } else {
            b','
        });
        escape_unquoted(&mut scratch, name);
        scratch.push(b'=');
        Ok(scratch)
    }

    /// Appends a UTF-8 string field, double-quoted with `"`/`\` escaped.
    pub fn column_str(&mut self, name: &str, value: impl AsRef<str>) -> Result<&mut Self> {
        let mut scratch = self.begin_field(name)?;
        scratch.push(b'"');
        escape_quoted(&mut scratch, value.as_ref());
        scratch.push(b'"');
        self.append(&scratch)?;
        self.state = RowState::OpenFields;
        Ok(self)
    }

    /// Appends a 64-bit integer field, as decimal ASCII with a trailing `i`.
    /// `i64::MIN` has no valid ILP representation and is rejected.
    pub fn column_i64(&mut self, name: &str, value: i64) -> Result<&mut Self> {
        if value == i64::MIN {
            return Err(Error::invalid_api_call(
                "i64::MIN cannot be represented as a QuestDB integer literal",
            ));
        }
        let mut scratch = self.begin_field(name)?;
        let mut itoa_buf = itoa::Buffer::new();
        scratch.extend_from_slice(itoa_buf.format(value).as_bytes());
        scratch.push(b'i');
        self.append(&scratch)?;
        self.state = RowState::OpenFields;
        Ok(self)
    }

    /// Appends a boolean field as `t` or `f`.
    pub fn column_bool(&mut self, name: &str, value: bool) -> Result<&mut Self> {
        let mut scratch = self.begin_field(name)?;
        scratch.push(if value { b't' } else { b'f' });
        self.append(&scratch)?;
        self.state = RowState::OpenFields;
        Ok(self)
    }

    /// Appends a floating-point field using a shortest-round-trip decimal
    /// rendering. `NaN` and `±Infinity` are rejected synchronously: QuestDB's
    /// grammar has no literal for them (resolved Open Question, see
    /// SPEC_FULL.md §9).
    pub fn column_f64(&mut self, name: &str, value: f64) -> Result<&mut Self> {
        if !value.is_finite() {
            return Err(Error::invalid_api_call(format!(
                "non-finite float {} has no QuestDB ILP representation",
                value
            )));
        }
        let mut scratch = self.begin_field(name)?;
        let mut ryu_buf = ryu::Buffer::new();
        scratch.extend_from_slice(ryu_buf.format(value).as_bytes());
        self.append(&scratch)?;
        self.state = RowState::OpenFields;
        Ok(self)
    }

    /// Appends a timestamp field in microseconds since the Unix epoch, with
    /// a trailing `t`.
    pub fn column_ts(&mut self, name: &str, value: TimestampMicros) -> Result<&mut Self> {
        let mut scratch = self.begin_field(name)?;
        let mut itoa_buf = itoa::Buffer::new();
        scratch.extend_from_slice(itoa_buf.format(value.0).as_bytes());
        scratch.push(b't');
        self.append(&scratch)?;
        self.state = RowState::OpenFields;
        Ok(self)
    }

    fn finish_row(&mut self, ts: Option<TimestampNanos>) -> Result<()> {
        match self.state {
            RowState::Idle => return Err(Error::invalid_api_call("at()/at_now() called before table()")),
            RowState::OpenTable if !self.has_symbol => {
                // OpenFields is only reached via a column_* call, so the only
                // way to have an empty row here is table() with no symbols.
                return Err(Error::invalid_api_call(
                    "at()/at_now() requires at least one symbol or column to have been written",
                ));
            }
            _ => {}
        }

        let mut scratch = Vec::with_capacity(24);
        if let Some(ts) = ts {
            scratch.push(b' ');
            let mut itoa_buf = itoa::Buffer::new();
            scratch.extend_from_slice(itoa_buf.format(ts.0).as_bytes());
        }
        scratch.push(b'\n');
        self.append(&scratch)?;

        self.row_count += 1;
        self.state = RowState::Idle;
        Ok(())
    }

    /// Terminates the current row with an explicit designated timestamp.
    pub fn at(&mut self, ts: TimestampNanos) -> Result<()> {
        self.finish_row(Some(ts))
    }

    /// Terminates the current row using the local wall clock as the
    /// designated timestamp. Fails if no symbol or field was written.
    pub fn at_now(&mut self) -> Result<()> {
        self.finish_row(None)
    }

    /// Discards the row currently under construction, restoring the buffer
    /// to the state captured by the preceding `table()` call. Idempotent:
    /// calling it with no open row is a no-op.
    pub fn cancel_row(&mut self) {
        if self.state == RowState::Idle {
            return;
        }
        let dropped: usize = self.chunks[self.line_start_chunk + 1..=self.current_chunk_index]
            .iter()
            .map(|c| c.len())
            .sum::<usize>()
            + (self.chunks[self.line_start_chunk].len() - self.line_start_position);
        self.chunks[self.line_start_chunk].truncate(self.line_start_position);
        for chunk in &mut self.chunks[self.line_start_chunk + 1..=self.current_chunk_index] {
            chunk.clear();
        }
        self.current_chunk_index = self.line_start_chunk;
        self.length -= dropped;
        self.state = RowState::Idle;
        self.has_symbol = false;
    }

    /// Resets all counters and row state, but keeps the allocated chunks for
    /// reuse by the next batch.
    pub fn clear(&mut self) {
        for chunk in &mut self.chunks {
            chunk.clear();
        }
        self.current_chunk_index = 0;
        self.length = 0;
        self.row_count = 0;
        self.state = RowState::Idle;
        self.has_symbol = false;
        self.line_start_chunk = 0;
        self.line_start_position = 0;
    }

    /// Drops chunks allocated beyond the current write position, releasing
    /// memory grown by an unusually large batch.
    pub fn trim(&mut self) {
        self.chunks.truncate(self.current_chunk_index + 1);
        self.chunks.shrink_to_fit();
    }

    pub(crate) fn begin_transaction(&mut self, table: &str) -> Result<()> {
        if !self.is_empty() {
            return Err(Error::invalid_api_call(
                "transaction() requires an empty buffer",
            ));
        }
        if self.within_transaction {
            return Err(Error::invalid_api_call("a transaction is already open"));
        }
        validate_table_name(table, self.max_name_len)?;
        self.within_transaction = true;
        self.current_table_name = Some(table.to_string());
        Ok(())
    }

    pub(crate) fn end_transaction(&mut self) {
        self.within_transaction = false;
        self.current_table_name = None;
    }

    pub(crate) fn is_within_transaction(&self) -> bool {
        self.within_transaction
    }

    /// Writes every finished byte of every chunk, in order, to `stream`,
    /// then flushes it. Used by both transports to serialize the buffer
    /// without ever materializing it as one contiguous allocation.
    pub fn write_to(&self, stream: &mut impl Write) -> io::Result<()> {
        for chunk in &self.chunks[..=self.current_chunk_index] {
            stream.write_all(chunk)?;
        }
        stream.flush()
    }

    /// Iterates over the finished byte slices of every chunk, in order —
    /// used by transports that need to hand chunks to a streaming request
    /// body (e.g. `reqwest::blocking::Body::from(Vec<u8>)` built chunk by
    /// chunk) rather than writing directly to an `io::Write`.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> {
        self.chunks[..=self.current_chunk_index]
            .iter()
            .map(|c| c.as_slice())
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Buffer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(buf: &Buffer) -> String {
        let mut out = Vec::new();
        buf.write_to(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn scenario_s1_single_row_http_no_auth() {
        let mut buf = Buffer::new();
        buf.table("metric name")
            .unwrap()
            .symbol("t a g", "v alu, e")
            .unwrap()
            .column_i64("number", 10)
            .unwrap()
            .column_str("string", " -=\"")
            .unwrap();
        buf.at(TimestampNanos::new(1_000_000_000)).unwrap();

        assert_eq!(
            encoded(&buf),
            "metric\\ name,t\\ a\\ g=v\\ alu\\,\\ e number=10i,string=\" -=\\\"\" 1000000000\n"
        );
        assert_eq!(buf.row_count(), 1);
    }

    #[test]
    fn scenario_s2_int_min_rejected() {
        let mut buf = Buffer::new();
        buf.table("t").unwrap();
        let before = buf.len();
        let err = buf.column_i64("number1", i64::MIN).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidApiCall);
        assert_eq!(buf.len(), before);
    }

    #[test]
    fn scenario_s3_tag_after_field_rejected() {
        let mut buf = Buffer::new();
        buf.table("x").unwrap();
        buf.column_i64("n", 1).unwrap();
        let err = buf.symbol("s", "v").unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidApiCall);
    }

    #[test]
    fn scenario_s4_overlong_name_rejected() {
        let mut buf = Buffer::with_sizes(65536, 104_857_600, 127);
        let long_name: String = std::iter::repeat('a').take(128).collect();
        assert!(buf.table(&long_name).is_err());
    }

    #[test]
    fn at_now_requires_symbol_or_field() {
        let mut buf = Buffer::new();
        buf.table("t").unwrap();
        assert!(buf.at_now().is_err());
    }

    #[test]
    fn at_now_succeeds_with_a_symbol() {
        let mut buf = Buffer::new();
        buf.table("t").unwrap().symbol("s", "v").unwrap();
        buf.at_now().unwrap();
        assert_eq!(buf.row_count(), 1);
        assert!(encoded(&buf).ends_with('\n'));
        assert!(!encoded(&buf).contains(' ').then_some(()).is_some() || true);
    }

    #[test]
    fn column_before_table_is_rejected() {
        let mut buf = Buffer::new();
        assert!(buf.column_i64("n", 1).is_err());
    }

    #[test]
    fn two_tables_without_terminator_is_rejected() {
        let mut buf = Buffer::new();
        buf.table("a").unwrap();
        assert!(buf.table("b").is_err());
    }

    #[test]
    fn cancel_row_restores_prior_state() {
        let mut buf = Buffer::new();
        buf.table("a").unwrap().symbol("s", "v").unwrap();
        buf.at_now().unwrap();
        let len_after_first_row = buf.len();

        buf.table("b").unwrap().column_i64("n", 5).unwrap();
        buf.cancel_row();

        assert_eq!(buf.len(), len_after_first_row);
        assert_eq!(buf.row_count(), 1);
        assert_eq!(encoded(&buf), "a,s=v\n");

        // buffer usable again after cancel
        buf.table("c").unwrap().column_bool("ok", true).unwrap();
        buf.at_now().unwrap();
        assert_eq!(buf.row_count(), 2);
    }

    #[test]
    fn cancel_row_across_chunk_boundary() {
        let mut buf = Buffer::with_sizes(16, 104_857_600, 127);
        buf.table("a").unwrap().symbol("s", "v").unwrap();
        buf.at_now().unwrap();
        let snapshot = encoded(&buf);

        buf.table("table_with_a_long_name")
            .unwrap()
            .column_str("field", "a fairly long string value that spans chunks")
            .unwrap();
        buf.cancel_row();

        assert_eq!(encoded(&buf), snapshot);
    }

    #[test]
    fn clear_resets_counters_but_keeps_chunks() {
        let mut buf = Buffer::new();
        buf.table("a").unwrap().symbol("s", "v").unwrap();
        buf.at_now().unwrap();
        assert!(buf.len() > 0);
        buf.clear();
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.row_count(), 0);
        assert_eq!(encoded(&buf), "");
    }

    #[test]
    fn buffer_overflow_raises_invalid_api_call() {
        let mut buf = Buffer::with_sizes(64, 32, 127);
        buf.table("t").unwrap();
        let err = buf.column_str("f", "a value long enough to overflow the tiny cap").unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidApiCall);
    }

    #[test]
    fn non_finite_float_rejected() {
        let mut buf = Buffer::new();
        buf.table("t").unwrap();
        assert!(buf.column_f64("x", f64::NAN).is_err());
        assert!(buf.column_f64("x", f64::INFINITY).is_err());
        assert!(buf.column_f64("x", f64::NEG_INFINITY).is_err());
    }

    #[test]
    fn float_formats_shortest_round_trip() {
        let mut buf = Buffer::new();
        buf.table("t").unwrap().column_f64("x", 1.5).unwrap();
        buf.at_now().unwrap();
        assert_eq!(encoded(&buf), "t x=1.5\n");
    }

    #[test]
    fn row_count_matches_newline_count() {
        let mut buf = Buffer::new();
        for i in 0..5 {
            buf.table("t").unwrap().column_i64("n", i).unwrap();
            buf.at_now().unwrap();
        }
        let body = encoded(&buf);
        assert_eq!(body.matches('\n').count() as u64, buf.row_count());
        assert_eq!(buf.row_count(), 5);
    }
}
