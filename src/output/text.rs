//! Text output: a YAML-like hierarchical stream.
//!
//! Matrices print as blocks of whitespace-padded integers, one sample row
//! per line, which is what downstream plotting scripts consume.

use std::io::Write;

use crate::burndown::BurndownResult;
use crate::burndown::history::DenseHistory;
use crate::commits::CommitsResult;
use crate::couples::CouplesResult;
use crate::devs::DevsResult;
use crate::pipeline::Report;

/// Write every report as one top-level section named after its item.
///
/// # Errors
///
/// Propagates writer errors.
pub fn write_text(reports: &[(String, Report)], writer: &mut dyn Write) -> std::io::Result<()> {
    for (name, report) in reports {
        match report {
            Report::Burndown(result) => write_burndown(name, result, writer)?,
            Report::Couples(result) => write_couples(name, result, writer)?,
            Report::Devs(result) => write_devs(name, result, writer)?,
            Report::Commits(result) => write_commits(name, result, writer)?,
        }
    }
    Ok(())
}

fn write_burndown(
    name: &str,
    result: &BurndownResult,
    w: &mut dyn Write,
) -> std::io::Result<()> {
    writeln!(w, "{name}:")?;
    writeln!(w, "  granularity: {}", result.granularity)?;
    writeln!(w, "  sampling: {}", result.sampling)?;
    writeln!(w, "  tick_size: {}", result.tick_size_secs)?;
    write_matrix(w, "  ", "\"project\"", &result.project)?;
    if !result.files.is_empty() {
        writeln!(w, "  files:")?;
        for (path, matrix) in &result.files {
            write_matrix(w, "    ", &format!("{path:?}"), matrix)?;
        }
    }
    if !result.files_ownership.is_empty() {
        writeln!(w, "  files_ownership:")?;
        for (path, owners) in &result.files_ownership {
            let cells: Vec<String> = owners
                .iter()
                .map(|(author, lines)| format!("{author}: {lines}"))
                .collect();
            writeln!(w, "    {path:?}: {{{}}}", cells.join(", "))?;
        }
    }
    if !result.people_sequence.is_empty() {
        writeln!(w, "  people_sequence:")?;
        for person in &result.people_sequence {
            writeln!(w, "    - {person:?}")?;
        }
    }
    if !result.people.is_empty() {
        writeln!(w, "  people:")?;
        for (person, matrix) in result.people_sequence.iter().zip(&result.people) {
            write_matrix(w, "    ", &format!("{person:?}"), matrix)?;
        }
    }
    if !result.people_interaction.is_empty() {
        write_matrix(w, "  ", "people_interaction", &result.people_interaction)?;
    }
    Ok(())
}

fn write_couples(name: &str, result: &CouplesResult, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(w, "{name}:")?;
    writeln!(w, "  files:")?;
    for (index, file) in result.file_sequence.iter().enumerate() {
        let row = &result.files_matrix[index];
        let cells: Vec<String> = row.iter().map(|(j, count)| format!("{j}: {count}")).collect();
        writeln!(w, "    {file:?}: {{{}}}", cells.join(", "))?;
    }
    writeln!(w, "  people:")?;
    for (index, person) in result.people_sequence.iter().enumerate() {
        let row = &result.people_files[index];
        let cells: Vec<String> = row.iter().map(|(j, count)| format!("{j}: {count}")).collect();
        writeln!(
            w,
            "    {person:?}: {{commits: {}, files: {{{}}}}}",
            result.people_commits[index],
            cells.join(", ")
        )?;
    }
    Ok(())
}

fn write_devs(name: &str, result: &DevsResult, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(w, "{name}:")?;
    writeln!(w, "  people:")?;
    for person in &result.people {
        writeln!(w, "    - {person:?}")?;
    }
    writeln!(w, "  ticks:")?;
    for (tick, authors) in &result.ticks {
        writeln!(w, "    {tick}:")?;
        for (author, cell) in authors {
            writeln!(
                w,
                "      {author}: [{}, {}, {}, {}]",
                cell.commits, cell.added, cell.removed, cell.changed
            )?;
        }
    }
    Ok(())
}

fn write_commits(name: &str, result: &CommitsResult, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(w, "{name}:")?;
    for stat in &result.commits {
        writeln!(
            w,
            "  - {{hash: {}, tick: {}, author: {}, added: {}, removed: {}, changed: {}}}",
            stat.hash, stat.tick, stat.author, stat.added, stat.removed, stat.changed
        )?;
    }
    Ok(())
}

/// Print `label: |-` followed by the matrix as padded integer rows.
fn write_matrix(
    w: &mut dyn Write,
    indent: &str,
    label: &str,
    matrix: &DenseHistory,
) -> std::io::Result<()> {
    writeln!(w, "{indent}{label}: |-")?;
    let width = matrix
        .iter()
        .flatten()
        .map(|v| v.to_string().len())
        .max()
        .unwrap_or(1);
    for row in matrix {
        let cells: Vec<String> = row.iter().map(|v| format!("{v:width$}")).collect();
        writeln!(w, "{indent}  {}", cells.join(" "))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn render(reports: &[(String, Report)]) -> String {
        let mut out = Vec::new();
        write_text(reports, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn burndown_sections_and_padding() {
        let result = BurndownResult {
            granularity: 30,
            sampling: 30,
            tick_size_secs: 86400,
            first_tick_time: 0,
            last_tick: 30,
            project: vec![vec![1145, 0], vec![452, 369]],
            files: BTreeMap::from([("a.rs".to_owned(), vec![vec![12, 0], vec![12, 0]])]),
            files_ownership: BTreeMap::from([(
                "a.rs".to_owned(),
                BTreeMap::from([(0, 12)]),
            )]),
            people_sequence: vec!["alice".to_owned()],
            people: vec![vec![vec![1145, 0], vec![452, 369]]],
            people_interaction: vec![vec![1145, 0, 0]],
        };
        let text = render(&[("burndown".to_owned(), Report::Burndown(result))]);
        assert!(text.starts_with("burndown:\n"));
        assert!(text.contains("  granularity: 30"));
        assert!(text.contains("  sampling: 30"));
        assert!(text.contains("  tick_size: 86400"));
        assert!(text.contains("\"project\": |-"));
        // Rows pad to the widest cell.
        assert!(text.contains("1145    0"));
        assert!(text.contains(" 452  369"));
        assert!(text.contains("\"a.rs\": {0: 12}"));
        assert!(text.contains("people_sequence:"));
        assert!(text.contains("- \"alice\""));
        assert!(text.contains("people_interaction: |-"));
    }

    #[test]
    fn couples_section() {
        let result = CouplesResult {
            file_sequence: vec!["a.rs".to_owned()],
            files_matrix: vec![BTreeMap::from([(0, 2)])],
            people_sequence: vec!["alice".to_owned()],
            people_files: vec![BTreeMap::from([(0, 2)])],
            people_commits: vec![2],
        };
        let text = render(&[("couples".to_owned(), Report::Couples(result))]);
        assert!(text.contains("couples:\n"));
        assert!(text.contains("\"a.rs\": {0: 2}"));
        assert!(text.contains("commits: 2"));
    }

    #[test]
    fn devs_section() {
        let mut ticks = BTreeMap::new();
        ticks.insert(
            0u32,
            BTreeMap::from([(
                0u32,
                crate::devs::DevTick {
                    commits: 1,
                    added: 10,
                    removed: 0,
                    changed: 0,
                },
            )]),
        );
        let result = DevsResult {
            ticks,
            people: vec!["alice".to_owned()],
        };
        let text = render(&[("devs".to_owned(), Report::Devs(result))]);
        assert!(text.contains("devs:\n"));
        assert!(text.contains("0: [1, 10, 0, 0]"));
    }
}
