use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::list::WorkUnitList;
use crate::status::EXIT_STATUS_ABORTED;

const END_ROW: &str = "end";

/// Where the combined result rows went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CombinedResults {
    pub path: PathBuf,
    pub rows: usize,
}

/// Write every unit's result rows, in list order, to the results file of the
/// first unit that names one, followed by a single `end` row.
///
/// A failed write folds "aborted" into the list status.
pub fn write_combined(list: &WorkUnitList) -> Option<CombinedResults> {
    let units = list.units();
    if units.iter().all(|unit| unit.result_row_count() == 0) {
        return None;
    }

    let Some(path) = units.iter().find_map(|unit| unit.results_path()) else {
        warn!("work units produced result rows but no results file was designated");
        return None;
    };

    let rows = units.iter().flat_map(|unit| unit.results());
    match write_rows(path, rows) {
        Ok(count) => {
            info!(path = %path.display(), rows = count, "combined results written");
            Some(CombinedResults {
                path: path.to_path_buf(),
                rows: count,
            })
        }
        Err(err) => {
            error!(path = %path.display(), error = %err, "unable to write combined results");
            list.update_exit_status(EXIT_STATUS_ABORTED);
            None
        }
    }
}

fn write_rows(path: &Path, rows: impl Iterator<Item = Vec<String>>) -> io::Result<usize> {
    let mut out = BufWriter::new(File::create(path)?);
    let mut count = 0;
    for row in rows {
        writeln!(out, "{}", csv_line(&row))?;
        count += 1;
    }
    writeln!(out, "{END_ROW}")?;
    out.flush()?;
    Ok(count)
}

/// Join fields with commas, quoting those that need it.
pub fn csv_line(fields: &[String]) -> String {
    fields
        .iter()
        .map(|field| {
            if field.contains([',', '"', '\n', '\r']) {
                format!("\"{}\"", field.replace('"', "\"\""))
            } else {
                field.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandModel;
    use crate::functions::{DispatchOutcome, FileRole, FunctionRegistry, FunctionSpec};
    use crate::list::{AbortLimit, RunMode};

    fn registry() -> FunctionRegistry {
        FunctionRegistry::new(vec![
            FunctionSpec::new("draw").layout([FileRole::Input, FileRole::Results]),
            FunctionSpec::new("scan").layout([FileRole::Input]),
        ])
    }

    fn list_with(lines: &[String]) -> WorkUnitList {
        let reg = registry();
        let mut list = WorkUnitList::new(CommandModel::default(), RunMode::Script, AbortLimit::Unlimited);
        for line in lines {
            list.add(CommandModel::from_line(line), &reg);
        }
        list
    }

    fn rows(values: &[&[&str]]) -> DispatchOutcome {
        DispatchOutcome {
            status: 0,
            results: values
                .iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
            errors: Vec::new(),
        }
    }

    #[test]
    fn csv_quoting() {
        let line = csv_line(&["a".into(), "b,c".into(), "say \"hi\"".into()]);
        assert_eq!(line, r#"a,"b,c","say ""hi""""#);
    }

    #[test]
    fn rows_from_all_units_then_end() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("all.csv");
        let list = list_with(&[
            "-scan one.x9".to_string(),
            format!("-draw two.x9 \"{}\"", results.display()),
            "-scan three.x9".to_string(),
        ]);
        list.units()[0].record_outcome(rows(&[&["one", "1"]]));
        list.units()[2].record_outcome(rows(&[&["three", "3"], &["three", "4"]]));

        let written = write_combined(&list).unwrap();
        assert_eq!(written.rows, 3);
        assert_eq!(written.path, results);
        let text = std::fs::read_to_string(&results).unwrap();
        assert_eq!(text, "one,1\nthree,3\nthree,4\nend\n");
    }

    #[test]
    fn nothing_written_without_rows() {
        let list = list_with(&["-draw a.x9 r.csv".to_string()]);
        assert_eq!(write_combined(&list), None);
    }

    #[test]
    fn rows_without_results_file_are_dropped() {
        let list = list_with(&["-scan a.x9".to_string()]);
        list.units()[0].record_outcome(rows(&[&["a"]]));
        assert_eq!(write_combined(&list), None);
        assert_eq!(list.exit_status(), 0);
    }

    #[test]
    fn write_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let results = dir.path().join("missing").join("r.csv");
        let list = list_with(&[format!("-draw a.x9 \"{}\"", results.display())]);
        list.units()[0].record_outcome(rows(&[&["a"]]));
        assert_eq!(write_combined(&list), None);
        assert_eq!(list.exit_status(), EXIT_STATUS_ABORTED);
    }
}
