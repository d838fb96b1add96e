use std::{fs::File, path::Path, sync::Arc};

use arrow::{
    array::{ArrayRef, Float64Array, Int32Array, Int64Array},
    record_batch::RecordBatch,
};
use oxyroot::{RootFile, WriterTree};
use parquet::arrow::ArrowWriter;
use tracing::info;

use super::SlimRecord;
use crate::{
    data::{
        io::{
            canonicalize_path, expand_output_path, read_parquet_table, read_root_table,
            ColumnSpec, ColumnTable, FileFormat,
        },
        LlpCandidate,
    },
    regions::RegionFlags,
    CalRatioError, CalRatioResult,
};

/// Branch names of the slimmed `extrapTree`.
pub mod columns {
    pub const EVENT_NUMBER: &str = "eventNumber";
    pub const PASSED_CAL_RATIO: &str = "PassedCalRatio";
    pub const EVENT_WEIGHT: &str = "event_weight";
    /// `RegionA` to `RegionD`.
    pub const REGIONS: [&str; 4] = ["RegionA", "RegionB", "RegionC", "RegionD"];
    /// Per-LLP kinematic columns, `[llp][pt, eta, phi, E, Lxy]`.
    pub const LLPS: [[&str; 5]; 2] = [
        ["llp1_pt", "llp1_eta", "llp1_phi", "llp1_E", "llp1_Lxy"],
        ["llp2_pt", "llp2_eta", "llp2_phi", "llp2_E", "llp2_Lxy"],
    ];
}

/// Default name of the output TTree.
pub const DEFAULT_OUTPUT_TREE: &str = "extrapTree";

const SLIM_FLOAT_COLUMNS: [&str; 16] = [
    columns::LLPS[0][0],
    columns::LLPS[0][1],
    columns::LLPS[0][2],
    columns::LLPS[0][3],
    columns::LLPS[0][4],
    columns::LLPS[1][0],
    columns::LLPS[1][1],
    columns::LLPS[1][2],
    columns::LLPS[1][3],
    columns::LLPS[1][4],
    columns::EVENT_WEIGHT,
    columns::PASSED_CAL_RATIO,
    columns::REGIONS[0],
    columns::REGIONS[1],
    columns::REGIONS[2],
    columns::REGIONS[3],
];

const SLIM_COLUMN_SPEC: ColumnSpec<'static> = ColumnSpec {
    scalars: &SLIM_FLOAT_COLUMNS,
    integers: &[columns::EVENT_NUMBER],
    lists: &[],
    optional_lists: &[],
};

/// Options for writing [`SlimRecord`]s.
#[derive(Clone, Debug)]
pub struct SlimWriteOptions {
    /// Name of the output tree for ROOT files (defaults to `extrapTree`).
    pub tree: Option<String>,
    /// Number of rows per Parquet record batch.
    pub batch_size: usize,
}

impl Default for SlimWriteOptions {
    fn default() -> Self {
        Self {
            tree: None,
            batch_size: 10_000,
        }
    }
}

impl SlimWriteOptions {
    /// Create a new [`Default`] set of [`SlimWriteOptions`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the output tree when writing ROOT files.
    pub fn tree<S: AsRef<str>>(mut self, name: S) -> Self {
        self.tree = Some(name.as_ref().to_string());
        self
    }

    /// Set the number of rows per Parquet record batch (at least one).
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn tree_name(&self) -> &str {
        self.tree.as_deref().unwrap_or(DEFAULT_OUTPUT_TREE)
    }
}

/// Write slimmed records to `file_path`, choosing Parquet or ROOT from the extension.
pub fn write_slim(
    records: &[SlimRecord],
    file_path: &str,
    options: &SlimWriteOptions,
) -> CalRatioResult<()> {
    let path = expand_output_path(file_path)?;
    match FileFormat::from_path(&path)? {
        FileFormat::Parquet => write_slim_parquet(records, &path, options)?,
        FileFormat::Root => write_slim_root(records, &path, options)?,
    }
    info!(path = %path.display(), n_records = records.len(), "wrote slimmed records");
    Ok(())
}

fn float_column<F>(records: &[SlimRecord], field: F) -> ArrayRef
where
    F: Fn(&SlimRecord) -> f64,
{
    Arc::new(Float64Array::from(
        records.iter().map(field).collect::<Vec<_>>(),
    ))
}

fn llp_values(llp: &LlpCandidate) -> [f64; 5] {
    [llp.pt, llp.eta, llp.phi, llp.e, llp.lxy]
}

fn slim_record_batch(records: &[SlimRecord]) -> arrow::error::Result<RecordBatch> {
    let mut columns_out: Vec<(&str, ArrayRef)> = vec![
        (
            columns::EVENT_NUMBER,
            Arc::new(Int64Array::from(
                records.iter().map(|r| r.event_number).collect::<Vec<_>>(),
            )) as ArrayRef,
        ),
        (
            columns::PASSED_CAL_RATIO,
            Arc::new(Int32Array::from(
                records.iter().map(|r| i32::from(r.passed)).collect::<Vec<_>>(),
            )) as ArrayRef,
        ),
    ];
    for (slot, names) in columns::LLPS.iter().enumerate() {
        for (k, name) in names.iter().enumerate() {
            columns_out.push((
                *name,
                float_column(records, |r| llp_values(&r.llps[slot])[k]),
            ));
        }
    }
    columns_out.push((columns::EVENT_WEIGHT, float_column(records, |r| r.weight)));
    for (slot, name) in columns::REGIONS.iter().enumerate() {
        columns_out.push((
            *name,
            Arc::new(Int32Array::from(
                records
                    .iter()
                    .map(|r| r.regions.as_i32()[slot])
                    .collect::<Vec<_>>(),
            )) as ArrayRef,
        ));
    }
    RecordBatch::try_from_iter(columns_out)
}

fn write_slim_parquet(
    records: &[SlimRecord],
    path: &Path,
    options: &SlimWriteOptions,
) -> CalRatioResult<()> {
    let mut batches = records
        .chunks(options.batch_size.max(1))
        .map(slim_record_batch)
        .collect::<arrow::error::Result<Vec<_>>>()?;
    if batches.is_empty() {
        batches.push(slim_record_batch(&[])?);
    }
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batches[0].schema(), None)?;
    for batch in &batches {
        writer.write(batch)?;
    }
    writer.close()?;
    Ok(())
}

fn write_slim_root(
    records: &[SlimRecord],
    path: &Path,
    options: &SlimWriteOptions,
) -> CalRatioResult<()> {
    let tree_name = options.tree_name();
    let mut file = RootFile::create(path).map_err(|err| {
        CalRatioError::Custom(format!(
            "Failed to create ROOT file '{}': {err}",
            path.display()
        ))
    })?;

    let mut tree = WriterTree::new(tree_name);
    let event_numbers: Vec<i64> = records.iter().map(|r| r.event_number).collect();
    tree.new_branch(columns::EVENT_NUMBER.to_string(), event_numbers.into_iter());
    let passed: Vec<i32> = records.iter().map(|r| i32::from(r.passed)).collect();
    tree.new_branch(columns::PASSED_CAL_RATIO.to_string(), passed.into_iter());
    for (slot, names) in columns::LLPS.iter().enumerate() {
        for (k, name) in names.iter().enumerate() {
            let values: Vec<f64> = records
                .iter()
                .map(|r| llp_values(&r.llps[slot])[k])
                .collect();
            tree.new_branch(name.to_string(), values.into_iter());
        }
    }
    let weights: Vec<f64> = records.iter().map(|r| r.weight).collect();
    tree.new_branch(columns::EVENT_WEIGHT.to_string(), weights.into_iter());
    for (slot, name) in columns::REGIONS.iter().enumerate() {
        let flags: Vec<i32> = records.iter().map(|r| r.regions.as_i32()[slot]).collect();
        tree.new_branch(name.to_string(), flags.into_iter());
    }

    tree.write(&mut file).map_err(|err| {
        CalRatioError::Custom(format!(
            "Failed to write ROOT tree '{tree_name}' to '{}': {err}",
            path.display()
        ))
    })?;
    file.close().map_err(|err| {
        CalRatioError::Custom(format!(
            "Failed to close ROOT file '{}': {err}",
            path.display()
        ))
    })?;
    Ok(())
}

/// Read slimmed records back from a Parquet file or a ROOT tree (`extrapTree` unless `tree` is
/// given).
pub fn read_slim(file_path: &str, tree: Option<&str>) -> CalRatioResult<Vec<SlimRecord>> {
    let path = canonicalize_path(file_path)?;
    let table = match FileFormat::from_path(&path)? {
        FileFormat::Parquet => read_parquet_table(&path, &SLIM_COLUMN_SPEC, None)?,
        FileFormat::Root => read_root_table(
            &path,
            tree.unwrap_or(DEFAULT_OUTPUT_TREE),
            &SLIM_COLUMN_SPEC,
            None,
        )?,
    };
    let records = records_from_table(&table)?;
    info!(path = %path.display(), n_records = records.len(), "loaded slimmed records");
    Ok(records)
}

fn records_from_table(table: &ColumnTable) -> CalRatioResult<Vec<SlimRecord>> {
    let n_rows = table.n_rows()?;
    let event_numbers = table.integer(columns::EVENT_NUMBER)?;
    let passed = table.scalar(columns::PASSED_CAL_RATIO)?;
    let weights = table.scalar(columns::EVENT_WEIGHT)?;
    let llp_columns = columns::LLPS
        .iter()
        .map(|names| {
            names
                .iter()
                .map(|name| table.scalar(name))
                .collect::<CalRatioResult<Vec<_>>>()
        })
        .collect::<CalRatioResult<Vec<_>>>()?;
    let region_columns = columns::REGIONS
        .iter()
        .map(|name| table.scalar(name))
        .collect::<CalRatioResult<Vec<_>>>()?;

    (0..n_rows)
        .map(|row| {
            let llp = |slot: usize| {
                let value = |k: usize| llp_columns[slot][k][row];
                LlpCandidate {
                    pt: value(0),
                    eta: value(1),
                    phi: value(2),
                    e: value(3),
                    lxy: value(4),
                }
            };
            let indicators = [0, 1, 2, 3].map(|slot| region_columns[slot][row] != 0.0);
            Ok(SlimRecord {
                event_number: event_numbers[row],
                passed: passed[row] != 0.0,
                llps: [llp(0), llp(1)],
                weight: weights[row],
                regions: RegionFlags::from_indicators(indicators)?,
            })
        })
        .collect()
}
