//! Query interface over a persisted parameter study

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use ndarray::Array2;

use crate::error::{SolverError, SolverResult};
use crate::geometry::Geometry;
use crate::nifti_io::load_nifti;

use super::{index_path, read_json, reconstruction_path, run_path, study_dir, ParameterPoint, RunRecord, RunStatus, StudyIndex};

/// Reads `<directory>/<name>/` written by `ParameterStudy`.
///
/// Construct with `new`, then call `read_study()` before querying.
pub struct ParameterStudyReader {
    path: PathBuf,
    name: String,
    index: Option<StudyIndex>,
    records: Vec<RunRecord>,
}

impl ParameterStudyReader {
    pub fn new(directory: impl AsRef<Path>, name: &str) -> Self {
        Self {
            path: study_dir(directory.as_ref(), name),
            name: name.to_string(),
            index: None,
            records: Vec::new(),
        }
    }

    /// Load the index and every run record. A missing file is `MissingData`.
    pub fn read_study(&mut self) -> SolverResult<()> {
        let index: StudyIndex = read_json(&index_path(&self.path))?;
        let mut records = Vec::with_capacity(index.runs.len());
        for entry in &index.runs {
            let record: RunRecord = read_json(&run_path(&self.path, entry.line))?;
            if record.line != entry.line {
                return Err(SolverError::Serialization {
                    message: format!("run record for line {} reports line {}", entry.line, record.line),
                });
            }
            records.push(record);
        }
        records.sort_by_key(|r| r.line);

        log::info!("Read parameter study '{}' with {} runs", index.name, records.len());
        self.index = Some(index);
        self.records = records;
        Ok(())
    }

    fn index(&self) -> SolverResult<&StudyIndex> {
        self.index
            .as_ref()
            .ok_or_else(|| SolverError::state(format!("parameter study '{}' has not been read", self.name)))
    }

    pub fn get_parameter_study_name(&self) -> SolverResult<&str> {
        Ok(&self.index()?.name)
    }

    pub fn get_geometry(&self) -> SolverResult<&Geometry> {
        Ok(&self.index()?.geometry)
    }

    /// Parameter name → sorted distinct values
    pub fn get_parameters(&self) -> SolverResult<BTreeMap<String, Vec<f64>>> {
        let index = self.index()?;
        let mut parameters = BTreeMap::new();
        for name in &index.parameter_names {
            let mut values: Vec<f64> = index.runs.iter().filter_map(|r| r.parameters.get(name)).collect();
            values.sort_by(f64::total_cmp);
            values.dedup();
            parameters.insert(name.clone(), values);
        }
        Ok(parameters)
    }

    pub fn get_parameters_to_line(&self) -> SolverResult<BTreeMap<ParameterPoint, usize>> {
        Ok(self.index()?.runs.iter().map(|r| (r.parameters.clone(), r.line)).collect())
    }

    /// Line → label such as `"alpha=0.01, rho=1"`
    pub fn get_line_to_parameter_labels(&self) -> SolverResult<BTreeMap<usize, String>> {
        Ok(self.index()?.runs.iter().map(|r| (r.line, r.parameters.label())).collect())
    }

    /// Sorted names of all recorded measures
    pub fn get_measures(&self) -> SolverResult<Vec<String>> {
        self.index()?;
        let names: BTreeSet<&String> = self.records.iter().flat_map(|r| r.record.measures().keys()).collect();
        Ok(names.into_iter().cloned().collect())
    }

    /// Cost sequences of `measure`, one row per run in line order. Rows are
    /// padded with NaN up to the longest recorded run.
    pub fn get_results(&self, measure: &str) -> SolverResult<Array2<f64>> {
        let lines: Vec<usize> = self.records.iter().map(|r| r.line).collect();
        self.get_results_for_lines(measure, &lines)
    }

    /// Like `get_results`, restricted to `lines` (rows in the given order).
    pub fn get_results_for_lines(&self, measure: &str, lines: &[usize]) -> SolverResult<Array2<f64>> {
        self.index()?;
        let known = self.records.iter().any(|r| r.record.get(measure).is_some());
        if !known {
            return Err(SolverError::config("measure", measure, "not recorded in this study"));
        }

        let rows = lines.iter().map(|&line| self.get_run(line)).collect::<SolverResult<Vec<_>>>()?;
        let width = rows
            .iter()
            .filter_map(|r| r.record.get(measure).map(|v| v.len()))
            .max()
            .unwrap_or(0);
        let mut results = Array2::from_elem((rows.len(), width), f64::NAN);
        for (row, record) in rows.iter().enumerate() {
            if let Some(values) = record.record.get(measure) {
                for (col, &value) in values.iter().enumerate() {
                    results[[row, col]] = value;
                }
            }
        }
        Ok(results)
    }

    /// Lines whose value for every selected name is one of the selected values
    pub fn get_lines_to_parameters(&self, selection: &BTreeMap<String, Vec<f64>>) -> SolverResult<Vec<usize>> {
        let index = self.index()?;
        for name in selection.keys() {
            if !index.parameter_names.contains(name) {
                return Err(SolverError::config(name.clone(), "selection", "unknown parameter"));
            }
        }

        Ok(index
            .runs
            .iter()
            .filter(|r| {
                selection.iter().all(|(name, values)| {
                    r.parameters
                        .get(name)
                        .map_or(false, |v| values.iter().any(|s| s.total_cmp(&v).is_eq()))
                })
            })
            .map(|r| r.line)
            .collect())
    }

    /// Final estimate of every run. Any absent artifact is `MissingData`.
    pub fn get_reconstructions(&self) -> SolverResult<(Geometry, BTreeMap<usize, Vec<f64>>)> {
        let index = self.index()?;
        let mut images = BTreeMap::new();
        for entry in &index.runs {
            let path = reconstruction_path(&self.path, entry.line);
            let (data, geometry) = load_nifti(&path)?;
            if geometry.dims != index.geometry.dims {
                return Err(SolverError::shape(index.geometry.n_total(), geometry.n_total(), "reconstruction"));
            }
            images.insert(entry.line, data);
        }
        Ok((index.geometry.clone(), images))
    }

    pub fn get_failed_lines(&self) -> SolverResult<Vec<usize>> {
        Ok(self
            .index()?
            .runs
            .iter()
            .filter(|r| r.status == RunStatus::Failed)
            .map(|r| r.line)
            .collect())
    }

    /// Full run record of one line
    pub fn get_run(&self, line: usize) -> SolverResult<&RunRecord> {
        self.index()?;
        self.records
            .iter()
            .find(|r| r.line == line)
            .ok_or_else(|| SolverError::missing(run_path(&self.path, line), "no such line in the study"))
    }
}
