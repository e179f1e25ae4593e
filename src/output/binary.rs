//! Binary output: one length-prefixed bincode record per analysis.
//!
//! The stream is a sequence of `u64`-LE lengths, each followed by a bincode
//! [`Record`] of that many bytes. Burndown payloads use the compact matrix
//! encodings: [`SparseMatrix`] rows truncate trailing zeros, the interaction
//! matrix travels as CSR. The encoding is lossless for whole results, so
//! `strata combine` can read two streams back and merge them.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::burndown::BurndownResult;
use crate::burndown::history::DenseHistory;
use crate::error::{Result, StrataError};
use crate::pipeline::Report;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One analysis record: the item name and its bincode payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Pipeline item name (`"burndown"`, `"couples"`, …).
    pub name: String,
    /// Bincode-encoded analysis message.
    pub payload: Vec<u8>,
}

/// A dense matrix with per-row trailing zeros dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseMatrix {
    /// Row count.
    pub number_of_rows: i32,
    /// Column count before truncation.
    pub number_of_columns: i32,
    /// One entry per row.
    pub rows: Vec<SparseRow>,
}

/// One sparse row: cell values truncated at the last non-zero entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseRow {
    /// Leading cell values; trailing zeros are implied.
    pub columns: Vec<u32>,
}

/// A named sparse matrix (per-file, per-author).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedSparseMatrix {
    /// File path or author display name.
    pub name: String,
    /// The matrix.
    pub matrix: SparseMatrix,
}

/// Compressed sparse row encoding of the interaction matrix.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrMatrix {
    /// Row count.
    pub number_of_rows: i32,
    /// Column count.
    pub number_of_columns: i32,
    /// Non-zero values in row-major order.
    pub data: Vec<i64>,
    /// Column index per value.
    pub indices: Vec<i32>,
    /// Per-row offsets into `data`, `number_of_rows + 1` entries.
    pub indptr: Vec<i64>,
}

/// Per-file ownership: author index (−1 unknown) to owned line count.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOwnership {
    /// File path.
    pub name: String,
    /// Author → owned lines.
    pub authors: BTreeMap<i32, i32>,
}

/// The burndown record payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurndownMessage {
    /// Band width in ticks.
    pub granularity: i32,
    /// Snapshot distance in ticks.
    pub sampling: i32,
    /// Tick size in nanoseconds.
    pub tick_size: i64,
    /// Unix time where tick 0 starts (needed to re-merge results).
    pub first_tick_time: i64,
    /// Last tick of the run.
    pub last_tick: u32,
    /// Whole-repository matrix.
    pub project: SparseMatrix,
    /// Per-file matrices.
    pub files: Vec<NamedSparseMatrix>,
    /// Per-file ownership maps.
    pub files_ownership: Vec<FileOwnership>,
    /// Author display names, index-aligned with `people`.
    pub people_sequence: Vec<String>,
    /// Per-author matrices.
    pub people: Vec<NamedSparseMatrix>,
    /// Author-interaction matrix.
    pub people_interaction: CsrMatrix,
}

const NANOS_PER_SEC: i64 = 1_000_000_000;

// ---------------------------------------------------------------------------
// Dense <-> wire conversions
// ---------------------------------------------------------------------------

fn to_sparse(dense: &DenseHistory) -> SparseMatrix {
    let number_of_columns = dense.first().map_or(0, Vec::len);
    let rows = dense
        .iter()
        .map(|row| {
            let last_nonzero = row.iter().rposition(|&v| v != 0).map_or(0, |i| i + 1);
            SparseRow {
                columns: row[..last_nonzero]
                    .iter()
                    .map(|&v| u32::try_from(v.max(0)).unwrap_or(u32::MAX))
                    .collect(),
            }
        })
        .collect();
    SparseMatrix {
        number_of_rows: i32::try_from(dense.len()).unwrap_or(i32::MAX),
        number_of_columns: i32::try_from(number_of_columns).unwrap_or(i32::MAX),
        rows,
    }
}

fn from_sparse(sparse: &SparseMatrix) -> DenseHistory {
    let columns = usize::try_from(sparse.number_of_columns).unwrap_or(0);
    sparse
        .rows
        .iter()
        .map(|row| {
            let mut dense = vec![0i64; columns];
            for (i, &v) in row.columns.iter().enumerate() {
                if i < columns {
                    dense[i] = i64::from(v);
                }
            }
            dense
        })
        .collect()
}

fn to_csr(rows: &[Vec<i64>], columns: usize) -> CsrMatrix {
    let mut data = Vec::new();
    let mut indices = Vec::new();
    let mut indptr = vec![0i64];
    for row in rows {
        for (column, &value) in row.iter().enumerate() {
            if value != 0 {
                data.push(value);
                indices.push(i32::try_from(column).unwrap_or(i32::MAX));
            }
        }
        indptr.push(i64::try_from(data.len()).unwrap_or(i64::MAX));
    }
    CsrMatrix {
        number_of_rows: i32::try_from(rows.len()).unwrap_or(i32::MAX),
        number_of_columns: i32::try_from(columns).unwrap_or(i32::MAX),
        data,
        indices,
        indptr,
    }
}

fn from_csr(csr: &CsrMatrix) -> Vec<Vec<i64>> {
    let rows = usize::try_from(csr.number_of_rows).unwrap_or(0);
    let columns = usize::try_from(csr.number_of_columns).unwrap_or(0);
    let mut dense = vec![vec![0i64; columns]; rows];
    for row in 0..rows {
        let from = usize::try_from(csr.indptr[row]).unwrap_or(0);
        let to = usize::try_from(csr.indptr[row + 1]).unwrap_or(0);
        for k in from..to {
            let column = usize::try_from(csr.indices[k]).unwrap_or(0);
            if column < columns {
                dense[row][column] = csr.data[k];
            }
        }
    }
    dense
}

impl BurndownMessage {
    /// Encode a result for the wire.
    #[must_use]
    pub fn from_result(result: &BurndownResult) -> Self {
        Self {
            granularity: i32::try_from(result.granularity).unwrap_or(i32::MAX),
            sampling: i32::try_from(result.sampling).unwrap_or(i32::MAX),
            tick_size: result.tick_size_secs.saturating_mul(NANOS_PER_SEC),
            first_tick_time: result.first_tick_time,
            last_tick: result.last_tick,
            project: to_sparse(&result.project),
            files: result
                .files
                .iter()
                .map(|(name, dense)| NamedSparseMatrix {
                    name: name.clone(),
                    matrix: to_sparse(dense),
                })
                .collect(),
            files_ownership: result
                .files_ownership
                .iter()
                .map(|(name, authors)| FileOwnership {
                    name: name.clone(),
                    authors: authors
                        .iter()
                        .map(|(&a, &n)| (a, i32::try_from(n).unwrap_or(i32::MAX)))
                        .collect(),
                })
                .collect(),
            people_sequence: result.people_sequence.clone(),
            people: result
                .people_sequence
                .iter()
                .zip(&result.people)
                .map(|(name, dense)| NamedSparseMatrix {
                    name: name.clone(),
                    matrix: to_sparse(dense),
                })
                .collect(),
            people_interaction: to_csr(
                &result.people_interaction,
                result.people_sequence.len() + 2,
            ),
        }
    }

    /// Decode back into a result.
    #[must_use]
    pub fn into_result(self) -> BurndownResult {
        BurndownResult {
            granularity: u32::try_from(self.granularity).unwrap_or(0),
            sampling: u32::try_from(self.sampling).unwrap_or(0),
            tick_size_secs: self.tick_size / NANOS_PER_SEC,
            first_tick_time: self.first_tick_time,
            last_tick: self.last_tick,
            project: from_sparse(&self.project),
            files: self
                .files
                .iter()
                .map(|named| (named.name.clone(), from_sparse(&named.matrix)))
                .collect(),
            files_ownership: self
                .files_ownership
                .iter()
                .map(|ownership| {
                    (
                        ownership.name.clone(),
                        ownership
                            .authors
                            .iter()
                            .map(|(&a, &n)| (a, i64::from(n)))
                            .collect(),
                    )
                })
                .collect(),
            people_sequence: self.people_sequence,
            people: self
                .people
                .iter()
                .map(|named| from_sparse(&named.matrix))
                .collect(),
            people_interaction: from_csr(&self.people_interaction),
        }
    }
}

// ---------------------------------------------------------------------------
// Stream I/O
// ---------------------------------------------------------------------------

fn stream_error(err: impl std::error::Error + Send + Sync + 'static) -> StrataError {
    StrataError::Io {
        path: PathBuf::from("<record stream>"),
        source: std::io::Error::other(err),
    }
}

/// Write every report as a length-prefixed record.
///
/// # Errors
///
/// [`StrataError::Io`] on encode or write failure.
pub fn write_binary(reports: &[(String, Report)], writer: &mut dyn Write) -> Result<()> {
    for (name, report) in reports {
        let payload = match report {
            Report::Burndown(result) => {
                bincode::serialize(&BurndownMessage::from_result(result))
            }
            Report::Couples(result) => bincode::serialize(result),
            Report::Devs(result) => bincode::serialize(result),
            Report::Commits(result) => bincode::serialize(result),
        }
        .map_err(stream_error)?;
        let record = bincode::serialize(&Record {
            name: name.clone(),
            payload,
        })
        .map_err(stream_error)?;
        let len = u64::try_from(record.len()).unwrap_or(u64::MAX);
        writer.write_all(&len.to_le_bytes()).map_err(stream_error)?;
        writer.write_all(&record).map_err(stream_error)?;
    }
    Ok(())
}

/// Read every record from a stream until EOF.
///
/// # Errors
///
/// [`StrataError::Io`] on a truncated or undecodable stream.
pub fn read_records(reader: &mut dyn Read) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    loop {
        let mut len_bytes = [0u8; 8];
        match reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(stream_error(e)),
        }
        let len = usize::try_from(u64::from_le_bytes(len_bytes)).map_err(stream_error)?;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).map_err(stream_error)?;
        records.push(bincode::deserialize(&buf).map_err(stream_error)?);
    }
    Ok(records)
}

/// Decode a burndown record payload.
///
/// # Errors
///
/// [`StrataError::Io`] when the payload does not decode.
pub fn decode_burndown(record: &Record) -> Result<BurndownResult> {
    let message: BurndownMessage =
        bincode::deserialize(&record.payload).map_err(stream_error)?;
    Ok(message.into_result())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> BurndownResult {
        BurndownResult {
            granularity: 30,
            sampling: 15,
            tick_size_secs: 86400,
            first_tick_time: 1_600_000_000,
            last_tick: 48,
            project: vec![
                vec![100, 0],
                vec![90, 0],
                vec![80, 50],
                vec![70, 40],
            ],
            files: BTreeMap::from([(
                "src/lib.rs".to_owned(),
                vec![vec![10, 0], vec![10, 0], vec![10, 5], vec![9, 5]],
            )]),
            files_ownership: BTreeMap::from([(
                "src/lib.rs".to_owned(),
                BTreeMap::from([(0, 9), (-1, 5)]),
            )]),
            people_sequence: vec!["alice".to_owned(), "bob".to_owned()],
            people: vec![
                vec![vec![60, 0], vec![55, 0], vec![50, 20], vec![45, 20]],
                vec![vec![40, 0], vec![35, 0], vec![30, 30], vec![25, 25]],
            ],
            people_interaction: vec![vec![120, 0, 0, -20], vec![70, -5, 0, 0]],
        }
    }

    // -- wire helpers --

    #[test]
    fn sparse_truncates_trailing_zeros() {
        let sparse = to_sparse(&vec![vec![5, 0, 3, 0, 0], vec![0, 0, 0, 0, 0]]);
        assert_eq!(sparse.number_of_columns, 5);
        assert_eq!(sparse.rows[0].columns, vec![5, 0, 3]);
        assert!(sparse.rows[1].columns.is_empty());
    }

    #[test]
    fn sparse_roundtrip() {
        let dense = vec![vec![5, 0, 3, 0, 0], vec![0, 1, 0, 0, 0]];
        assert_eq!(from_sparse(&to_sparse(&dense)), dense);
    }

    #[test]
    fn csr_roundtrip() {
        let rows = vec![vec![120, 0, 0, -20], vec![70, -5, 0, 0]];
        let csr = to_csr(&rows, 4);
        assert_eq!(csr.indptr, vec![0, 2, 4]);
        assert_eq!(csr.data, vec![120, -20, 70, -5]);
        assert_eq!(csr.indices, vec![0, 3, 0, 1]);
        assert_eq!(from_csr(&csr), rows);
    }

    // -- record stream --

    #[test]
    fn burndown_record_roundtrips() {
        let result = sample_result();
        let reports = vec![("burndown".to_owned(), Report::Burndown(result.clone()))];
        let mut stream = Vec::new();
        write_binary(&reports, &mut stream).unwrap();

        let records = read_records(&mut stream.as_slice()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "burndown");
        let decoded = decode_burndown(&records[0]).unwrap();
        assert_eq!(decoded, result);
    }

    #[test]
    fn multiple_records_in_one_stream() {
        let reports = vec![
            ("burndown".to_owned(), Report::Burndown(sample_result())),
            (
                "couples".to_owned(),
                Report::Couples(crate::couples::CouplesResult::default()),
            ),
        ];
        let mut stream = Vec::new();
        write_binary(&reports, &mut stream).unwrap();
        let records = read_records(&mut stream.as_slice()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].name, "couples");
    }

    #[test]
    fn truncated_stream_is_io_error() {
        let reports = vec![("burndown".to_owned(), Report::Burndown(sample_result()))];
        let mut stream = Vec::new();
        write_binary(&reports, &mut stream).unwrap();
        stream.truncate(stream.len() - 3);
        let err = read_records(&mut stream.as_slice()).unwrap_err();
        assert!(matches!(err, StrataError::Io { .. }));
    }

    #[test]
    fn tick_size_travels_in_nanoseconds() {
        let message = BurndownMessage::from_result(&sample_result());
        assert_eq!(message.tick_size, 86400 * 1_000_000_000);
        assert_eq!(message.into_result().tick_size_secs, 86400);
    }
}
