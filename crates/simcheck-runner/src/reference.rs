use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{HarnessError, Result};

/// Serialized reference files are capped; a benchmark producing more
/// reference data than this is considered misconfigured.
pub const MAX_REFERENCE_BYTES: u64 = 1_000_000;

/// One observable produced by a benchmark's validation callback.
///
/// Numeric data is always carried as `f64` in row-major order; `shape` may
/// have any rank >= 1 and a scalar promotes to shape `[1]` when compared
/// numerically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ObservableValue {
    Scalar(f64),
    Text(String),
    TextList(Vec<String>),
    Array { shape: Vec<usize>, data: Vec<f64> },
}

impl ObservableValue {
    /// Builds an observable from the loosely-typed JSON the simulation
    /// emits: numbers, strings, string lists, and (nested) numeric arrays.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        use serde_json::Value;
        match value {
            Value::Number(n) => n
                .as_f64()
                .map(ObservableValue::Scalar)
                .ok_or_else(|| HarnessError::Execution(format!("non-finite observable {}", n))),
            Value::String(s) => Ok(ObservableValue::Text(s.clone())),
            Value::Array(items) => {
                if items.iter().all(|v| v.is_string()) && !items.is_empty() {
                    let texts = items
                        .iter()
                        .map(|v| v.as_str().unwrap_or_default().to_string())
                        .collect();
                    return Ok(ObservableValue::TextList(texts));
                }
                let (shape, data) = flatten_numeric(value)?;
                Ok(ObservableValue::Array { shape, data })
            }
            other => Err(HarnessError::Execution(format!(
                "observable has unsupported JSON type: {}",
                other
            ))),
        }
    }

    /// Numeric view used by the comparison protocol. Text has none.
    fn as_array(&self) -> Option<(Vec<usize>, Vec<f64>)> {
        match self {
            ObservableValue::Scalar(v) => Some((vec![1], vec![*v])),
            ObservableValue::Array { shape, data } => Some((shape.clone(), data.clone())),
            ObservableValue::Text(_) | ObservableValue::TextList(_) => None,
        }
    }
}

impl fmt::Display for ObservableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservableValue::Scalar(v) => write!(f, "{}", v),
            ObservableValue::Text(s) => write!(f, "{:?}", s),
            ObservableValue::TextList(items) => write!(f, "{:?}", items),
            ObservableValue::Array { shape, data } => {
                write!(f, "array{:?} {:?}", shape, data)
            }
        }
    }
}

/// Flattens arbitrarily nested numeric JSON arrays into shape + row-major
/// data, rejecting ragged nesting.
fn flatten_numeric(value: &serde_json::Value) -> Result<(Vec<usize>, Vec<f64>)> {
    fn walk(
        value: &serde_json::Value,
        depth: usize,
        shape: &mut Vec<usize>,
        data: &mut Vec<f64>,
    ) -> Result<()> {
        match value {
            serde_json::Value::Array(items) => {
                if depth == shape.len() {
                    shape.push(items.len());
                } else if shape[depth] != items.len() {
                    return Err(HarnessError::Execution(
                        "ragged numeric array in observables".into(),
                    ));
                }
                for item in items {
                    walk(item, depth + 1, shape, data)?;
                }
                Ok(())
            }
            serde_json::Value::Number(n) => {
                if depth != shape.len() {
                    return Err(HarnessError::Execution(
                        "ragged numeric array in observables".into(),
                    ));
                }
                let v = n.as_f64().ok_or_else(|| {
                    HarnessError::Execution(format!("non-finite observable {}", n))
                })?;
                data.push(v);
                Ok(())
            }
            other => Err(HarnessError::Execution(format!(
                "non-numeric entry in numeric array: {}",
                other
            ))),
        }
    }
    let mut shape = Vec::new();
    let mut data = Vec::new();
    walk(value, 0, &mut shape, &mut data)?;
    Ok((shape, data))
}

fn unravel(flat: usize, shape: &[usize]) -> Vec<usize> {
    let mut idx = vec![0; shape.len()];
    let mut rest = flat;
    for (i, dim) in shape.iter().enumerate().rev() {
        if *dim > 0 {
            idx[i] = rest % dim;
            rest /= dim;
        }
    }
    idx
}

/// Capability handed to a benchmark's validation callback: record one named
/// observable per call, then finalize.
pub trait Recorder {
    fn record(&mut self, name: &str, value: ObservableValue, precision: Option<f64>)
        -> Result<()>;

    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }
}

pub fn reference_path(references_root: &Path, bench: &str) -> PathBuf {
    references_root.join(format!("{}.json", bench))
}

fn load_reference(references_root: &Path, bench: &str) -> Result<BTreeMap<String, ObservableValue>> {
    let path = reference_path(references_root, bench);
    let raw = fs::read_to_string(&path).map_err(|_| {
        HarnessError::Validation(format!("unable to find the reference data for {}", bench))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        HarnessError::Validation(format!(
            "unreadable reference file {}: {}",
            path.display(),
            e
        ))
    })
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| HarnessError::io(parent, e))?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(|e| HarnessError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| HarnessError::io(path, e))?;
    Ok(())
}

/// Generate mode: accumulate observables, persist them on finalize.
pub struct CreateRecorder {
    path: PathBuf,
    data: BTreeMap<String, ObservableValue>,
}

impl CreateRecorder {
    pub fn new(references_root: &Path, bench: &str) -> Self {
        CreateRecorder {
            path: reference_path(references_root, bench),
            data: BTreeMap::new(),
        }
    }
}

impl Recorder for CreateRecorder {
    fn record(
        &mut self,
        name: &str,
        value: ObservableValue,
        _precision: Option<f64>,
    ) -> Result<()> {
        self.data.insert(name.to_string(), value);
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.data)?;
        if bytes.len() as u64 > MAX_REFERENCE_BYTES {
            // An oversized record set means the benchmark records far too
            // much; nothing is persisted so a stale file cannot linger.
            let _ = fs::remove_file(&self.path);
            return Err(HarnessError::Execution(format!(
                "reference data too large ({} B > {} B), not writing {}",
                bytes.len(),
                MAX_REFERENCE_BYTES,
                self.path.display()
            )));
        }
        atomic_write(&self.path, &bytes)?;
        info!(path = %self.path.display(), "created reference file");
        Ok(())
    }
}

/// Compare mode: each recorded observable is checked against the persisted
/// reference, aborting the benchmark on the first mismatch.
#[derive(Debug)]
pub struct CompareRecorder {
    bench: String,
    data: BTreeMap<String, ObservableValue>,
}

impl CompareRecorder {
    pub fn load(references_root: &Path, bench: &str) -> Result<Self> {
        Ok(CompareRecorder {
            bench: bench.to_string(),
            data: load_reference(references_root, bench)?,
        })
    }

    fn fail(
        &self,
        message: String,
        expected: &ObservableValue,
        actual: &ObservableValue,
    ) -> HarnessError {
        println!("Reference data:\n{}", expected);
        println!("New data:\n{}", actual);
        HarnessError::Validation(format!("[{}] {}", self.bench, message))
    }
}

impl Recorder for CompareRecorder {
    fn record(
        &mut self,
        name: &str,
        value: ObservableValue,
        precision: Option<f64>,
    ) -> Result<()> {
        let expected = self.data.get(name).ok_or_else(|| {
            HarnessError::Validation(format!(
                "[{}] reference quantity '{}' not found",
                self.bench, name
            ))
        })?;

        // Exact structural equality covers text and bit-identical numerics.
        if *expected == value {
            return Ok(());
        }

        let (exp, cur) = match (expected.as_array(), value.as_array()) {
            (Some(e), Some(c)) => (e, c),
            _ => {
                return Err(self.fail(
                    format!("quantity '{}': unable to compare to reference", name),
                    expected,
                    &value,
                ))
            }
        };

        match precision {
            Some(precision) => {
                if exp.0 != cur.0 {
                    return Err(self.fail(
                        format!(
                            "quantity '{}': unable to compare, reference shape {:?} vs {:?}",
                            name, exp.0, cur.0
                        ),
                        expected,
                        &value,
                    ));
                }
                let mut max_err = f64::NEG_INFINITY;
                let mut max_at = 0usize;
                for (i, (e, c)) in exp.1.iter().zip(cur.1.iter()).enumerate() {
                    let err = (e - c).abs();
                    if !(err <= max_err) {
                        max_err = err;
                        max_at = i;
                    }
                }
                // Strict bound: an error of exactly `precision` fails.
                if max_err < precision {
                    debug!(name, max_err, "quantity matches within precision");
                    return Ok(());
                }
                Err(self.fail(
                    format!(
                        "quantity '{}' does not match (required precision {}), max error = {} at index {:?}",
                        name,
                        precision,
                        max_err,
                        unravel(max_at, &exp.0)
                    ),
                    expected,
                    &value,
                ))
            }
            None => {
                if exp.0 == cur.0 && exp.1 == cur.1 {
                    return Ok(());
                }
                Err(self.fail(
                    format!("quantity '{}' does not match the reference", name),
                    expected,
                    &value,
                ))
            }
        }
    }
}

/// Diff mode: reports every difference for human triage and never fails.
pub struct DiffRecorder {
    data: BTreeMap<String, ObservableValue>,
}

impl DiffRecorder {
    pub fn load(references_root: &Path, bench: &str) -> Result<Self> {
        Ok(DiffRecorder {
            data: load_reference(references_root, bench)?,
        })
    }
}

impl Recorder for DiffRecorder {
    fn record(
        &mut self,
        name: &str,
        value: ObservableValue,
        _precision: Option<f64>,
    ) -> Result<()> {
        println!("Differences for '{}'", name);
        println!("--------------------------");
        let expected = match self.data.get(name) {
            Some(e) => e,
            None => {
                println!("  reference quantity not found");
                println!("  new data: {}", value);
                return Ok(());
            }
        };
        let (exp, cur) = match (expected.as_array(), value.as_array()) {
            (Some(e), Some(c)) => (e, c),
            _ => {
                println!("  quantity is not numeric, raw values:");
                println!("  reference data: {}", expected);
                println!("  new data: {}", value);
                return Ok(());
            }
        };
        if exp.0 != cur.0 {
            println!(
                "  reference and new data do not have the same shape: {:?} vs {:?}",
                exp.0, cur.0
            );
            println!("  reference data: {}", expected);
            println!("  new data: {}", value);
            return Ok(());
        }
        match exp.0.len() {
            1 => render_trace(&exp.1, &cur.1),
            2 => render_grid(&exp.0, &exp.1, &cur.1),
            _ => {
                println!("  {}-dimensional quantity, raw values:", exp.0.len());
                println!("  reference data: {}", expected);
                println!("  new data: {}", value);
            }
        }
        Ok(())
    }
}

/// 1-D rendering: overlay plus a difference trace, one sample per line.
fn render_trace(reference: &[f64], current: &[f64]) {
    println!("  {:>6}  {:>16}  {:>16}  {:>16}", "i", "new", "reference", "difference");
    for (i, (r, c)) in reference.iter().zip(current.iter()).enumerate() {
        println!("  {:>6}  {:>16.9e}  {:>16.9e}  {:>16.9e}", i, c, r, c - r);
    }
}

/// 2-D rendering: per-row extrema of the difference field, side by side with
/// the value ranges. Plotting proper is left to external tooling.
fn render_grid(shape: &[usize], reference: &[f64], current: &[f64]) {
    let (rows, cols) = (shape[0], shape[1]);
    println!("  grid {}x{}, per-row difference extrema:", rows, cols);
    for row in 0..rows {
        let span = &reference[row * cols..(row + 1) * cols];
        let cur_span = &current[row * cols..(row + 1) * cols];
        let mut min_d = f64::INFINITY;
        let mut max_d = f64::NEG_INFINITY;
        for (r, c) in span.iter().zip(cur_span.iter()) {
            let d = c - r;
            min_d = min_d.min(d);
            max_d = max_d.max(d);
        }
        println!("  row {:>4}: min diff {:>14.6e}, max diff {:>14.6e}", row, min_d, max_d);
    }
}
