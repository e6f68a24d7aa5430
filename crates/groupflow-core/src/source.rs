//! Record sources: the pull interface the aggregator reads from.
//!
//! Sources hand out bounded batches on demand, so the consumer controls the
//! pace. A source that has reported its last batch refuses further pulls with
//! [`Error::DoubleConsumption`]: an aggregation pass reads its input exactly
//! once.

use crate::error::{Error, Result};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A batch of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBatch {
    /// Records in stream order.
    pub items: Vec<Value>,
    /// Whether more batches follow.
    pub has_more: bool,
}

impl RecordBatch {
    /// Creates a batch.
    #[must_use]
    pub fn new(items: Vec<Value>, has_more: bool) -> Self {
        Self { items, has_more }
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when the batch carries no record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Pull-based record source.
///
/// Implement this trait to feed records from a new upstream. Records must
/// arrive sorted on the group fields.
pub trait RecordSource {
    /// Short name used in logs and errors.
    fn source_type(&self) -> &'static str;

    /// Returns up to `max_n` records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QuerySource`] when the upstream fails and
    /// [`Error::DoubleConsumption`] when called after a batch with
    /// `has_more == false`.
    fn next_batch(&mut self, max_n: usize) -> Result<RecordBatch>;
}

impl<S: RecordSource + ?Sized> RecordSource for &mut S {
    fn source_type(&self) -> &'static str {
        (**self).source_type()
    }

    fn next_batch(&mut self, max_n: usize) -> Result<RecordBatch> {
        (**self).next_batch(max_n)
    }
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn source_type(&self) -> &'static str {
        (**self).source_type()
    }

    fn next_batch(&mut self, max_n: usize) -> Result<RecordBatch> {
        (**self).next_batch(max_n)
    }
}

fn consumed(source: &'static str) -> Error {
    Error::DoubleConsumption(source.to_string())
}

/// In-memory source over a vector of records.
#[derive(Debug, Clone)]
pub struct VecSource {
    records: std::vec::IntoIter<Value>,
    finished: bool,
}

impl VecSource {
    /// Creates a source that yields `records` in order.
    #[must_use]
    pub fn new(records: Vec<Value>) -> Self {
        Self {
            records: records.into_iter(),
            finished: false,
        }
    }
}

impl RecordSource for VecSource {
    fn source_type(&self) -> &'static str {
        "memory"
    }

    fn next_batch(&mut self, max_n: usize) -> Result<RecordBatch> {
        if self.finished {
            return Err(consumed(self.source_type()));
        }
        let items: Vec<Value> = self.records.by_ref().take(max_n.max(1)).collect();
        let has_more = self.records.len() > 0;
        self.finished = !has_more;
        Ok(RecordBatch { items, has_more })
    }
}

/// Source over any record iterator.
pub struct IterSource<I: Iterator<Item = Value>> {
    records: std::iter::Peekable<I>,
    finished: bool,
}

impl<I: Iterator<Item = Value>> IterSource<I> {
    /// Wraps an iterator.
    pub fn new(records: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            records: records.into_iter().peekable(),
            finished: false,
        }
    }
}

impl<I: Iterator<Item = Value>> RecordSource for IterSource<I> {
    fn source_type(&self) -> &'static str {
        "iterator"
    }

    fn next_batch(&mut self, max_n: usize) -> Result<RecordBatch> {
        if self.finished {
            return Err(consumed(self.source_type()));
        }
        let items: Vec<Value> = self.records.by_ref().take(max_n.max(1)).collect();
        let has_more = self.records.peek().is_some();
        self.finished = !has_more;
        Ok(RecordBatch { items, has_more })
    }
}

/// Newline-delimited JSON objects from any buffered reader.
///
/// Blank lines are skipped. Each non-blank line must hold one JSON object.
#[derive(Debug)]
pub struct JsonLinesSource<R: BufRead> {
    reader: R,
    line: u64,
    buffer: String,
    finished: bool,
}

impl<R: BufRead> JsonLinesSource<R> {
    /// Wraps a reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buffer: String::new(),
            finished: false,
        }
    }

    /// Lines read so far, blank lines included.
    #[must_use]
    pub fn lines_read(&self) -> u64 {
        self.line
    }

    fn upstream(line: u64, message: impl std::fmt::Display) -> Error {
        Error::QuerySource(format!("line {line}: {message}"))
    }
}

impl JsonLinesSource<BufReader<File>> {
    /// Opens a JSON-lines file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> RecordSource for JsonLinesSource<R> {
    fn source_type(&self) -> &'static str {
        "jsonl"
    }

    fn next_batch(&mut self, max_n: usize) -> Result<RecordBatch> {
        if self.finished {
            return Err(consumed(self.source_type()));
        }

        let max_n = max_n.max(1);
        let mut items = Vec::with_capacity(max_n.min(4096));
        while items.len() < max_n {
            self.buffer.clear();
            let read = self
                .reader
                .read_line(&mut self.buffer)
                .map_err(|e| Self::upstream(self.line + 1, e))?;
            if read == 0 {
                break;
            }
            self.line += 1;
            let text = self.buffer.trim();
            if text.is_empty() {
                continue;
            }
            let line = self.line;
            let record: Value = serde_json::from_str(text).map_err(|e| Self::upstream(line, e))?;
            if !record.is_object() {
                return Err(Self::upstream(line, format!(
                    "expected a JSON object, found {}",
                    crate::value::json_type_name(&record)
                )));
            }
            items.push(record);
        }

        let line = self.line;
        let has_more = !self
            .reader
            .fill_buf()
            .map_err(|e| Self::upstream(line + 1, e))?
            .is_empty();
        self.finished = !has_more;
        Ok(RecordBatch { items, has_more })
    }
}

/// Guard that turns any source into a strictly single-pass one.
#[derive(Debug)]
pub struct SinglePass<S> {
    inner: S,
    finished: bool,
}

impl<S: RecordSource> SinglePass<S> {
    /// Wraps a source.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            finished: false,
        }
    }

    /// True once the last batch was handed out.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Unwraps the inner source.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: RecordSource> RecordSource for SinglePass<S> {
    fn source_type(&self) -> &'static str {
        self.inner.source_type()
    }

    fn next_batch(&mut self, max_n: usize) -> Result<RecordBatch> {
        if self.finished {
            return Err(consumed(self.source_type()));
        }
        let batch = self.inner.next_batch(max_n)?;
        self.finished = !batch.has_more;
        Ok(batch)
    }
}
