//! Merging two finalized burndown results, possibly produced with different
//! `(granularity, sampling)` and different commit-time windows.
//!
//! Dense matrices cannot be added cell-wise across resolutions, so each input
//! is first "exploded" back to a per-tick ("daily") level buffer spanning the
//! union time window. Within a band the reconstruction interpolates between
//! sample snapshots: a piecewise-linear raise while the band is being born,
//! and a ratio decay (the band's successive sample values, spread over the
//! remaining sample positions) after. Exploded buffers add element-wise; the
//! sum is re-bucketed into the merged dimensions by snapshotting the last day
//! of each output sample and summing each band's day columns.
//!
//! Per-path and per-author matrices merge on a worker pool bounded to
//! [`MERGE_POOL_THREADS`] to cap peak memory on repositories with tens of
//! thousands of files.

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;

use crate::burndown::BurndownResult;
use crate::burndown::history::DenseHistory;
use crate::error::{Result, StrataError};

/// Worker-pool bound for per-path and per-author merges.
pub const MERGE_POOL_THREADS: usize = 5;

// ---------------------------------------------------------------------------
// add_burndown_matrix
// ---------------------------------------------------------------------------

/// Explode a dense `samples × bands` matrix into the per-day float buffer
/// `daily`, shifted by `offset` days on both axes.
///
/// `daily` must have at least `samples × sampling + offset` rows and
/// `bands × granularity + offset` columns. Each cell's level is spread over
/// its band's day columns (respecting causality: a day column contributes
/// nothing before its own day) and interpolated across the sample's day rows
/// with one of four geometries, depending on where the band's boundary falls
/// relative to the sample row:
///
/// 1. band fully born before the row: pure decay from the previous sample's
///    value;
/// 2. band born entirely within the row: linear raise from zero;
/// 3. band boundary straddles the row start: raise to the peak at the band's
///    close, then decay to the row's value;
/// 4. band opens within the row and extends beyond it: linear raise from
///    zero, truncated columns.
///
/// The reconstruction is exact at every sample's last day, which is what the
/// re-bucketing snapshots.
#[allow(clippy::cast_precision_loss)]
pub fn add_burndown_matrix(
    matrix: &DenseHistory,
    granularity: u32,
    sampling: u32,
    daily: &mut [Vec<f64>],
    offset: usize,
) {
    let granularity = granularity as usize;
    let sampling = sampling as usize;
    let bands = matrix.first().map_or(0, Vec::len);

    for band in 0..bands {
        let band_start = band * granularity;
        let band_end = band_start + granularity;
        for (sample, row) in matrix.iter().enumerate() {
            let value = row[band] as f64;
            let row_start = sample * sampling;
            let row_end = row_start + sampling;
            if band_start >= row_end {
                continue; // the band does not exist yet in this row
            }
            let prev = if sample == 0 {
                0.0
            } else {
                matrix[sample - 1][band] as f64
            };
            if value == 0.0 && prev == 0.0 {
                continue;
            }

            for day in row_start..row_end {
                let level = interpolate(
                    value, prev, day, row_start, row_end, band_start, band_end,
                );
                if level <= 0.0 {
                    continue;
                }
                // Spread over the day columns that exist by `day`.
                let avail_end = band_end.min(day + 1);
                if avail_end <= band_start {
                    continue;
                }
                let per_column = level / (avail_end - band_start) as f64;
                for column in band_start..avail_end {
                    daily[day + offset][column + offset] += per_column;
                }
            }
        }
    }
}

/// The per-day band level for one cell; see [`add_burndown_matrix`].
#[allow(clippy::cast_precision_loss, clippy::too_many_arguments)]
fn interpolate(
    value: f64,
    prev: f64,
    day: usize,
    row_start: usize,
    row_end: usize,
    band_start: usize,
    band_end: usize,
) -> f64 {
    let sampling = row_end - row_start;
    if band_end <= row_start {
        // 1. Pure decay between the previous snapshot and this one.
        if prev <= 0.0 {
            return if value > 0.0 { value } else { 0.0 };
        }
        let ratio = (value / prev).max(0.0);
        let step = ratio.powf(1.0 / sampling as f64);
        prev * step.powi(i32::try_from(day - row_start + 1).unwrap_or(i32::MAX))
    } else if band_start >= row_start && band_end <= row_end {
        // 2. Born entirely within the row: linear raise from zero.
        if day < band_start {
            0.0
        } else {
            value * (day - band_start + 1) as f64 / (row_end - band_start) as f64
        }
    } else if band_start < row_start {
        // 3. Straddles the row start: raise to the peak at the band close,
        //    decay over the remaining positions.
        let peak_day = band_end - 1;
        let peak = if band_end == row_end {
            value
        } else {
            prev.max(value)
        };
        if day <= peak_day {
            let span = (band_end - row_start) as f64;
            prev + (peak - prev) * (day - row_start + 1) as f64 / span
        } else if peak <= 0.0 {
            0.0
        } else {
            let remaining = (row_end - band_end) as f64;
            let ratio = (value / peak).max(0.0);
            let step = ratio.powf(1.0 / remaining);
            peak * step.powi(i32::try_from(day - peak_day).unwrap_or(i32::MAX))
        }
    } else {
        // 4. Opens within the row, extends beyond it: linear raise from zero
        //    over the row's remainder.
        if day < band_start {
            0.0
        } else {
            value * (day - band_start + 1) as f64 / (row_end - band_start) as f64
        }
    }
}

/// Re-bucket an exploded buffer into `sampling`/`granularity` dimensions
/// covering `days` ticks: snapshot the last day of each output sample and
/// sum each band's day columns.
#[allow(clippy::cast_possible_truncation)]
pub fn rebucket_daily(
    daily: &[Vec<f64>],
    days: usize,
    granularity: u32,
    sampling: u32,
) -> DenseHistory {
    let granularity = granularity as usize;
    let sampling = sampling as usize;
    if days == 0 {
        return Vec::new();
    }
    let samples = days.div_ceil(sampling);
    let bands = days.div_ceil(granularity);
    let mut result = vec![vec![0i64; bands]; samples];
    for (sample, out_row) in result.iter_mut().enumerate() {
        let snapshot_day = ((sample + 1) * sampling - 1).min(days - 1);
        let day_row = &daily[snapshot_day];
        for (band, cell) in out_row.iter_mut().enumerate() {
            let from = band * granularity;
            let to = (from + granularity).min(day_row.len());
            let sum: f64 = day_row[from..to.max(from)].iter().sum();
            *cell = sum.round() as i64;
        }
    }
    result
}

// ---------------------------------------------------------------------------
// merge_results
// ---------------------------------------------------------------------------

/// Combine two burndown results into one covering the union time window.
/// Finer resolution wins: the merged result uses the smaller sampling and
/// granularity of the two inputs.
///
/// # Errors
///
/// [`StrataError::TickSizeMismatch`] when the inputs were produced with
/// different tick sizes — a user-composition mistake, not a defect.
pub fn merge_results(a: &BurndownResult, b: &BurndownResult) -> Result<BurndownResult> {
    if a.tick_size_secs != b.tick_size_secs {
        return Err(StrataError::TickSizeMismatch {
            left: a.tick_size_secs,
            right: b.tick_size_secs,
        });
    }
    let tick = a.tick_size_secs;
    let granularity = a.granularity.min(b.granularity);
    let sampling = a.sampling.min(b.sampling);

    let begin = a.first_tick_time.min(b.first_tick_time);
    let end = (a.first_tick_time + i64::from(a.last_tick + 1) * tick)
        .max(b.first_tick_time + i64::from(b.last_tick + 1) * tick);
    let days = usize::try_from((end - begin) / tick).unwrap_or(0).max(1);
    let offset_a = usize::try_from((a.first_tick_time - begin) / tick).unwrap_or(0);
    let offset_b = usize::try_from((b.first_tick_time - begin) / tick).unwrap_or(0);

    let merge_pair = |left: Option<&DenseHistory>, right: Option<&DenseHistory>| {
        merge_dense(
            left.map(|m| (m, a.granularity, a.sampling, offset_a)),
            right.map(|m| (m, b.granularity, b.sampling, offset_b)),
            days,
            granularity,
            sampling,
        )
    };

    let project = merge_pair(Some(&a.project), Some(&b.project));

    // Union of author sequences, a's order first.
    let mut people_sequence = a.people_sequence.clone();
    let mut index_of: BTreeMap<&str, usize> = a
        .people_sequence
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();
    let mut b_to_merged = Vec::with_capacity(b.people_sequence.len());
    for name in &b.people_sequence {
        let idx = index_of.get(name.as_str()).copied().unwrap_or_else(|| {
            people_sequence.push(name.clone());
            people_sequence.len() - 1
        });
        index_of.insert(name.as_str(), idx);
        b_to_merged.push(idx);
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(MERGE_POOL_THREADS)
        .build()
        .map_err(|e| StrataError::config(format!("merge worker pool: {e}")))?;

    // Per-file matrices over the union of names.
    let file_names: BTreeSet<&String> = a.files.keys().chain(b.files.keys()).collect();
    let files: BTreeMap<String, DenseHistory> = pool.install(|| {
        file_names
            .par_iter()
            .map(|name| {
                let merged = merge_pair(a.files.get(*name), b.files.get(*name));
                ((*name).clone(), merged)
            })
            .collect::<Vec<_>>()
            .into_iter()
            .collect()
    });

    // Per-author matrices in merged index order.
    let people: Vec<DenseHistory> = pool.install(|| {
        (0..people_sequence.len())
            .into_par_iter()
            .map(|idx| {
                let left = (idx < a.people.len()).then(|| &a.people[idx]);
                let right = b_to_merged
                    .iter()
                    .position(|&m| m == idx)
                    .and_then(|bi| b.people.get(bi));
                merge_pair(left, right)
            })
            .collect()
    });

    // Interaction rows: reindex b's columns through the merged sequence.
    let columns = people_sequence.len() + 2;
    let mut people_interaction = vec![vec![0i64; columns]; people_sequence.len()];
    for (i, row) in a.people_interaction.iter().enumerate() {
        for (j, &v) in row.iter().enumerate() {
            people_interaction[i][j] += v;
        }
    }
    for (bi, row) in b.people_interaction.iter().enumerate() {
        let i = b_to_merged[bi];
        for (j, &v) in row.iter().enumerate() {
            let col = if j < 2 { j } else { 2 + b_to_merged[j - 2] };
            people_interaction[i][col] += v;
        }
    }

    // Ownership: reindex b's author keys, add counts.
    let mut files_ownership = a.files_ownership.clone();
    for (path, owners) in &b.files_ownership {
        let target = files_ownership.entry(path.clone()).or_default();
        for (&author, &count) in owners {
            let key = if author < 0 {
                -1
            } else {
                let author = usize::try_from(author).unwrap_or(usize::MAX);
                b_to_merged
                    .get(author)
                    .and_then(|&m| i32::try_from(m).ok())
                    .unwrap_or(-1)
            };
            *target.entry(key).or_default() += count;
        }
    }

    let last_tick = u32::try_from(days - 1).unwrap_or(u32::MAX);
    Ok(BurndownResult {
        granularity,
        sampling,
        tick_size_secs: tick,
        first_tick_time: begin,
        last_tick,
        project,
        files,
        files_ownership,
        people_sequence,
        people,
        people_interaction,
    })
}

type ExplodeInput<'a> = (&'a DenseHistory, u32, u32, usize);

/// Explode up to two inputs into one padded daily buffer and re-bucket it.
fn merge_dense(
    left: Option<ExplodeInput<'_>>,
    right: Option<ExplodeInput<'_>>,
    days: usize,
    granularity: u32,
    sampling: u32,
) -> DenseHistory {
    let pad = |input: &Option<ExplodeInput<'_>>| {
        input.map_or(0, |(m, g, s, off)| {
            let rows = m.len() * s as usize + off;
            let cols = m.first().map_or(0, Vec::len) * g as usize + off;
            rows.max(cols)
        })
    };
    let extent = days.max(pad(&left)).max(pad(&right));
    let mut daily = vec![vec![0f64; extent]; extent];
    if let Some((m, g, s, off)) = left {
        add_burndown_matrix(m, g, s, &mut daily, off);
    }
    if let Some((m, g, s, off)) = right {
        add_burndown_matrix(m, g, s, &mut daily, off);
    }
    rebucket_daily(&daily, days, granularity, sampling)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn result(
        granularity: u32,
        sampling: u32,
        first_tick_time: i64,
        last_tick: u32,
        project: DenseHistory,
    ) -> BurndownResult {
        BurndownResult {
            granularity,
            sampling,
            tick_size_secs: 86400,
            first_tick_time,
            last_tick,
            project,
            files: BTreeMap::new(),
            files_ownership: BTreeMap::new(),
            people_sequence: Vec::new(),
            people: Vec::new(),
            people_interaction: Vec::new(),
        }
    }

    // -- explode / rebucket round trip --

    #[test]
    fn explode_rebucket_roundtrip_identity() {
        // A lower-triangular survival matrix: band b exists from sample b on.
        let matrix: DenseHistory = vec![
            vec![100, 0, 0],
            vec![80, 50, 0],
            vec![60, 40, 70],
        ];
        let days = 3 * 10;
        let mut daily = vec![vec![0f64; days]; days];
        add_burndown_matrix(&matrix, 10, 10, &mut daily, 0);
        let rebuilt = rebucket_daily(&daily, days, 10, 10);
        assert_eq!(rebuilt.len(), matrix.len());
        for (got, want) in rebuilt.iter().zip(&matrix) {
            for (g, w) in got.iter().zip(want) {
                assert!(
                    (g - w).abs() <= 1,
                    "cell {g} deviates from {w} beyond tolerance"
                );
            }
        }
    }

    #[test]
    fn explode_respects_causality() {
        // Lines cannot exist before their band's first day.
        let matrix: DenseHistory = vec![vec![10, 0], vec![10, 20]];
        let days = 2 * 5;
        let mut daily = vec![vec![0f64; days]; days];
        add_burndown_matrix(&matrix, 5, 5, &mut daily, 0);
        for (day, row) in daily.iter().enumerate() {
            for (column, &v) in row.iter().enumerate() {
                if column > day {
                    assert!(v.abs() < f64::EPSILON, "day {day} col {column} = {v}");
                }
            }
        }
    }

    #[test]
    fn offset_shifts_both_axes() {
        let matrix: DenseHistory = vec![vec![10]];
        let mut daily = vec![vec![0f64; 10]; 10];
        add_burndown_matrix(&matrix, 2, 2, &mut daily, 3);
        // Nothing lands before the offset.
        for day in 0..3 {
            assert!(daily[day].iter().all(|&v| v.abs() < f64::EPSILON));
        }
        let total_at_snapshot: f64 = daily[4].iter().sum();
        assert!((total_at_snapshot - 10.0).abs() < 1e-6);
    }

    // -- merge_results --

    #[test]
    fn tick_size_mismatch_is_an_error_value() {
        let a = result(30, 30, 0, 0, vec![vec![1]]);
        let mut b = result(30, 30, 0, 0, vec![vec![1]]);
        b.tick_size_secs = 3600;
        let err = merge_results(&a, &b).unwrap_err();
        assert!(matches!(err, StrataError::TickSizeMismatch { .. }));
    }

    #[test]
    fn finer_resolution_wins() {
        let a = result(30, 30, 0, 29, vec![vec![100]]);
        let b = result(15, 5, 0, 29, vec![vec![50, 0], vec![50, 20]]);
        let merged = merge_results(&a, &b).unwrap();
        assert_eq!(merged.granularity, 15);
        assert_eq!(merged.sampling, 5);
    }

    #[test]
    fn identical_inputs_double_counts() {
        let a = result(10, 10, 0, 29, vec![
            vec![100, 0, 0],
            vec![80, 50, 0],
            vec![60, 40, 70],
        ]);
        let merged = merge_results(&a, &a).unwrap();
        assert_eq!(merged.last_tick, 29);
        for (row, want) in merged.project.iter().zip(&a.project) {
            for (g, w) in row.iter().zip(want) {
                assert!((g - 2 * w).abs() <= 2, "cell {g} vs doubled {w}");
            }
        }
    }

    #[test]
    fn union_window_spans_both_inputs() {
        // b starts 10 days after a.
        let a = result(10, 10, 0, 9, vec![vec![100]]);
        let b = result(10, 10, 10 * 86400, 9, vec![vec![40]]);
        let merged = merge_results(&a, &b).unwrap();
        assert_eq!(merged.first_tick_time, 0);
        assert_eq!(merged.last_tick, 19);
        assert_eq!(merged.project.len(), 2);
        // The second sample holds a's decayed value plus b's lines in the
        // second band.
        assert_eq!(merged.project[0].len(), 2);
        assert_eq!(merged.project[1][1], 40);
    }

    #[test]
    fn people_sequences_union_and_reindex() {
        let mut a = result(10, 10, 0, 9, vec![vec![10]]);
        a.people_sequence = vec!["alice".to_owned(), "bob".to_owned()];
        a.people = vec![vec![vec![6]], vec![vec![4]]];
        a.people_interaction = vec![vec![6, 0, 0, 0], vec![4, 0, 0, 0]];

        let mut b = result(10, 10, 0, 9, vec![vec![10]]);
        b.people_sequence = vec!["carol".to_owned(), "alice".to_owned()];
        b.people = vec![vec![vec![7]], vec![vec![3]]];
        b.people_interaction = vec![vec![7, 0, 0, -1], vec![3, 0, -2, 0]];

        let merged = merge_results(&a, &b).unwrap();
        assert_eq!(merged.people_sequence, vec!["alice", "bob", "carol"]);
        assert_eq!(merged.people.len(), 3);
        // alice: 6 from a + 3 from b.
        assert_eq!(merged.people[0][0][0], 9);
        // carol: 7 from b only.
        assert_eq!(merged.people[2][0][0], 7);
        // Interaction: b's row 0 (carol) reindexes to row 2; b's column
        // 2+1 (alice) reindexes to 2+0.
        assert_eq!(merged.people_interaction.len(), 3);
        assert_eq!(merged.people_interaction[0][0], 9); // alice authored 6+3
        assert_eq!(merged.people_interaction[2][0], 7); // carol authored 7
        assert_eq!(merged.people_interaction[2][2], -1); // carol's removal of alice's line
        assert_eq!(merged.people_interaction[0][4], -2); // alice's removal of carol's line
    }

    #[test]
    fn ownership_reindexes_authors() {
        let mut a = result(10, 10, 0, 9, vec![vec![10]]);
        a.people_sequence = vec!["alice".to_owned()];
        a.files_ownership
            .insert("f.rs".to_owned(), BTreeMap::from([(0, 5), (-1, 1)]));
        let mut b = result(10, 10, 0, 9, vec![vec![10]]);
        b.people_sequence = vec!["bob".to_owned()];
        b.files_ownership
            .insert("f.rs".to_owned(), BTreeMap::from([(0, 3)]));
        let merged = merge_results(&a, &b).unwrap();
        let owners = &merged.files_ownership["f.rs"];
        assert_eq!(owners[&0], 5); // alice
        assert_eq!(owners[&1], 3); // bob reindexed
        assert_eq!(owners[&-1], 1);
    }
}
