//! Ntuple I/O for events plus the column-table helpers shared with the slimmed output.

use super::*;
use crate::{CalRatioError, CalRatioResult};
use arrow::{
    array::{
        Array, ArrayRef, AsArray, BooleanBuilder, Float64Array, Int64Array, ListArray,
        ListBuilder,
    },
    datatypes::{
        DataType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type, UInt16Type,
        UInt32Type, UInt64Type, UInt8Type,
    },
    record_batch::RecordBatch,
};
use indexmap::IndexMap;
use oxyroot::{Branch, Named, RootFile};
use parquet::arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter};
use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info};

/// Branch names of the CalRatio reconstruction ntuple.
pub mod columns {
    pub const EVENT_NUMBER: &str = "eventNumber";

    pub const JET_PT: &str = "CalibJet_pT";
    pub const JET_ETA: &str = "CalibJet_eta";
    pub const JET_BIB_WEIGHT: &str = "CalibJet_BDT3weights_bib";
    pub const JET_SIGNAL_WEIGHT: &str = "CalibJet_BDT3weights_signal";
    pub const JET_IS_GOOD_LLP: &str = "CalibJet_isGoodLLP";
    pub const JET_IS_CR_HLT: &str = "CalibJet_isCRHLTJet";
    pub const JET_TIME: &str = "CalibJet_time";
    pub const JET_LOG_RATIO: &str = "CalibJet_logRatio";
    pub const JET_MIN_DR_TRK_PT2: &str = "CalibJet_minDRTrkpt2";

    pub const SIGNAL_INDICES: &str = "BDT3weights_signal_cleanJet_index";
    pub const BIB_INDICES: &str = "BDT3weights_bib_cleanJet_index";

    pub const EVENT_BDT: &str = "eventBDT_value";
    pub const MHT_OVER_HT: &str = "event_MHToHT";
    pub const SUM_MIN_DR: &str = "event_sumMinDR";
    pub const PASS_TRIGGER: &str = "event_passCalRatio_cleanLLP_TAU60";
    pub const WEIGHT: &str = "eventWeight";
    pub const PILEUP_WEIGHT: &str = "pileupEventWeight";

    pub const LLP_PT: &str = "LLP_pT";
    pub const LLP_ETA: &str = "LLP_eta";
    pub const LLP_PHI: &str = "LLP_phi";
    pub const LLP_E: &str = "LLP_E";
    pub const LLP_LXY: &str = "LLP_Lxy";

    /// Per-jet list columns, in [`Jet`](crate::data::Jet) field order.
    pub const JET_LISTS: [&str; 9] = [
        JET_PT,
        JET_ETA,
        JET_BIB_WEIGHT,
        JET_SIGNAL_WEIGHT,
        JET_IS_GOOD_LLP,
        JET_IS_CR_HLT,
        JET_TIME,
        JET_LOG_RATIO,
        JET_MIN_DR_TRK_PT2,
    ];
    /// Per-LLP list columns, in [`LlpCandidate`](crate::data::LlpCandidate) field order.
    pub const LLP_LISTS: [&str; 5] = [LLP_PT, LLP_ETA, LLP_PHI, LLP_E, LLP_LXY];
    pub const EVENT_SCALARS: [&str; 6] = [
        EVENT_BDT,
        MHT_OVER_HT,
        SUM_MIN_DR,
        PASS_TRIGGER,
        WEIGHT,
        PILEUP_WEIGHT,
    ];
}

/// Default name of the input TTree.
pub const DEFAULT_INPUT_TREE: &str = "recoTree";

pub(crate) fn canonicalize_path(file_path: &str) -> CalRatioResult<PathBuf> {
    Ok(Path::new(&*shellexpand::full(file_path)?).canonicalize()?)
}

pub(crate) fn expand_output_path(file_path: &str) -> CalRatioResult<PathBuf> {
    Ok(PathBuf::from(&*shellexpand::full(file_path)?))
}

/// On-disk formats understood by the readers and writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// Apache Parquet with list columns for per-jet quantities.
    Parquet,
    /// A ROOT file containing a flat or `std::vector` TTree.
    Root,
}

impl FileFormat {
    /// Pick the format from the extension of `path`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CalRatioResult<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "parquet" | "pq" => Ok(Self::Parquet),
            "root" => Ok(Self::Root),
            _ => Err(CalRatioError::ParseError {
                name: path.display().to_string(),
                object: "FileFormat".to_string(),
            }),
        }
    }
}

/// Options for reading [`EventRecord`]s from a file.
///
/// # See Also
/// [`read_parquet`], [`read_root`], [`read_events`]
#[derive(Default, Clone, Debug)]
pub struct EventReadOptions {
    /// Name of the tree to read when loading ROOT files (defaults to `recoTree`).
    pub tree: Option<String>,
    /// Stop after this many events. [`None`] reads the whole file.
    pub max_events: Option<usize>,
}

impl EventReadOptions {
    /// Create a new [`Default`] set of [`EventReadOptions`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the tree to read when opening ROOT files.
    pub fn tree<S: AsRef<str>>(mut self, name: S) -> Self {
        self.tree = Some(name.as_ref().to_string());
        self
    }

    /// Limit the number of events read. Zero or any negative value means "no limit", matching
    /// the `-1` convention of the command line.
    pub fn max_events(mut self, max_events: i64) -> Self {
        self.max_events = usize::try_from(max_events).ok().filter(|n| *n > 0);
        self
    }
}

/// Which columns to pull out of a file, grouped by how they are converted.
pub(crate) struct ColumnSpec<'a> {
    pub scalars: &'a [&'a str],
    pub integers: &'a [&'a str],
    pub lists: &'a [&'a str],
    /// List columns which may be absent from a file.
    pub optional_lists: &'a [&'a str],
}

impl<'a> ColumnSpec<'a> {
    fn required(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.scalars
            .iter()
            .chain(self.integers)
            .chain(self.lists)
            .copied()
    }
}

const EVENT_COLUMN_SPEC: ColumnSpec<'static> = ColumnSpec {
    scalars: &columns::EVENT_SCALARS,
    integers: &[columns::EVENT_NUMBER],
    lists: &[
        columns::JET_PT,
        columns::JET_ETA,
        columns::JET_BIB_WEIGHT,
        columns::JET_SIGNAL_WEIGHT,
        columns::JET_IS_GOOD_LLP,
        columns::JET_IS_CR_HLT,
        columns::JET_TIME,
        columns::JET_LOG_RATIO,
        columns::JET_MIN_DR_TRK_PT2,
        columns::SIGNAL_INDICES,
        columns::BIB_INDICES,
    ],
    optional_lists: &columns::LLP_LISTS,
};

/// Columns read from a file, converted to `f64` (scalars and lists) or `i64` (integers).
#[derive(Debug, Default)]
pub(crate) struct ColumnTable {
    scalars: IndexMap<String, Vec<f64>>,
    integers: IndexMap<String, Vec<i64>>,
    lists: IndexMap<String, Vec<Vec<f64>>>,
}

impl ColumnTable {
    fn extend_scalar(&mut self, name: &str, values: Vec<f64>) {
        self.scalars.entry(name.to_string()).or_default().extend(values);
    }

    fn extend_integer(&mut self, name: &str, values: Vec<i64>) {
        self.integers.entry(name.to_string()).or_default().extend(values);
    }

    fn extend_list(&mut self, name: &str, values: Vec<Vec<f64>>) {
        self.lists.entry(name.to_string()).or_default().extend(values);
    }

    /// Number of rows, checking that every column agrees.
    pub(crate) fn n_rows(&self) -> CalRatioResult<usize> {
        let lengths = self
            .scalars
            .iter()
            .map(|(name, values)| (name, values.len()))
            .chain(self.integers.iter().map(|(name, values)| (name, values.len())))
            .chain(self.lists.iter().map(|(name, values)| (name, values.len())));
        let mut expected: Option<usize> = None;
        for (name, len) in lengths {
            match expected {
                None => expected = Some(len),
                Some(n) if n != len => {
                    return Err(CalRatioError::LengthMismatch {
                        context: format!("Column '{name}'"),
                        expected: n,
                        actual: len,
                    })
                }
                Some(_) => {}
            }
        }
        Ok(expected.unwrap_or(0))
    }

    pub(crate) fn scalar(&self, name: &str) -> CalRatioResult<&[f64]> {
        self.scalars
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| CalRatioError::MissingColumn {
                name: name.to_string(),
            })
    }

    pub(crate) fn integer(&self, name: &str) -> CalRatioResult<&[i64]> {
        self.integers
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| CalRatioError::MissingColumn {
                name: name.to_string(),
            })
    }

    pub(crate) fn list(&self, name: &str) -> CalRatioResult<&[Vec<f64>]> {
        self.lists
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| CalRatioError::MissingColumn {
                name: name.to_string(),
            })
    }
}

/// Load an [`EventSample`] from a Parquet file.
pub fn read_parquet(file_path: &str, options: &EventReadOptions) -> CalRatioResult<EventSample> {
    let path = canonicalize_path(file_path)?;
    let table = read_parquet_table(&path, &EVENT_COLUMN_SPEC, options.max_events)?;
    let events = events_from_table(&table)?;
    info!(path = %path.display(), n_events = events.len(), "loaded events from Parquet");
    Ok(EventSample::new(sample_name(&path), events))
}

/// Load an [`EventSample`] from a ROOT TTree using the oxyroot backend.
pub fn read_root(file_path: &str, options: &EventReadOptions) -> CalRatioResult<EventSample> {
    let path = canonicalize_path(file_path)?;
    let tree_name = options.tree.as_deref().unwrap_or(DEFAULT_INPUT_TREE);
    let table = read_root_table(&path, tree_name, &EVENT_COLUMN_SPEC, options.max_events)?;
    let events = events_from_table(&table)?;
    info!(
        path = %path.display(),
        tree = tree_name,
        n_events = events.len(),
        "loaded events from ROOT"
    );
    Ok(EventSample::new(sample_name(&path), events))
}

/// Load an [`EventSample`], choosing the reader from the file extension.
pub fn read_events(file_path: &str, options: &EventReadOptions) -> CalRatioResult<EventSample> {
    match FileFormat::from_path(file_path)? {
        FileFormat::Parquet => read_parquet(file_path, options),
        FileFormat::Root => read_root(file_path, options),
    }
}

fn sample_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub(crate) fn read_parquet_table(
    path: &Path,
    spec: &ColumnSpec<'_>,
    max_rows: Option<usize>,
) -> CalRatioResult<ColumnTable> {
    let file = File::open(path)?;
    let mut builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    if let Some(name) = spec
        .required()
        .find(|name| schema.field_with_name(name).is_err())
    {
        return Err(CalRatioError::MissingColumn {
            name: name.to_string(),
        });
    }
    // A file without rows yields no batches, so every column gets its entry up front.
    let mut table = ColumnTable::default();
    for &name in spec.scalars {
        table.extend_scalar(name, Vec::new());
    }
    for &name in spec.integers {
        table.extend_integer(name, Vec::new());
    }
    for &name in spec.lists {
        table.extend_list(name, Vec::new());
    }
    let optional: Vec<&str> = spec
        .optional_lists
        .iter()
        .copied()
        .filter(|name| schema.field_with_name(name).is_ok())
        .collect();
    for &name in &optional {
        table.extend_list(name, Vec::new());
    }
    if let Some(limit) = max_rows {
        builder = builder.with_limit(limit);
    }
    let reader = builder.build()?;
    for batch in reader {
        let batch = batch?;
        append_record_batch(&batch, spec, &optional, &mut table)?;
    }
    Ok(table)
}

fn append_record_batch(
    batch: &RecordBatch,
    spec: &ColumnSpec<'_>,
    optional: &[&str],
    table: &mut ColumnTable,
) -> CalRatioResult<()> {
    for &name in spec.scalars {
        let column = batch_column(batch, name)?;
        table.extend_scalar(name, array_to_f64(column.as_ref(), name)?);
    }
    for &name in spec.integers {
        let column = batch_column(batch, name)?;
        table.extend_integer(name, array_to_i64(column.as_ref(), name)?);
    }
    for &name in spec.lists.iter().chain(optional) {
        let column = batch_column(batch, name)?;
        table.extend_list(name, list_to_f64(column.as_ref(), name)?);
    }
    Ok(())
}

fn batch_column<'a>(batch: &'a RecordBatch, name: &str) -> CalRatioResult<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| CalRatioError::MissingColumn {
            name: name.to_string(),
        })
}

fn invalid_type(name: &str, datatype: &DataType) -> CalRatioError {
    CalRatioError::InvalidColumnType {
        name: name.to_string(),
        datatype: datatype.to_string(),
    }
}

fn array_to_f64(array: &dyn Array, name: &str) -> CalRatioResult<Vec<f64>> {
    let values = match array.data_type() {
        DataType::Float64 => array.as_primitive::<Float64Type>().values().to_vec(),
        DataType::Float32 => array
            .as_primitive::<Float32Type>()
            .values()
            .iter()
            .map(|v| *v as f64)
            .collect(),
        DataType::Boolean => array
            .as_boolean()
            .values()
            .iter()
            .map(|v| if v { 1.0 } else { 0.0 })
            .collect(),
        _ => array_to_i64(array, name)?
            .into_iter()
            .map(|v| v as f64)
            .collect(),
    };
    Ok(values)
}

fn array_to_i64(array: &dyn Array, name: &str) -> CalRatioResult<Vec<i64>> {
    let values = match array.data_type() {
        DataType::Int64 => array.as_primitive::<Int64Type>().values().to_vec(),
        DataType::Int32 => widen(array.as_primitive::<Int32Type>().values()),
        DataType::Int16 => widen(array.as_primitive::<Int16Type>().values()),
        DataType::Int8 => widen(array.as_primitive::<Int8Type>().values()),
        DataType::UInt32 => widen(array.as_primitive::<UInt32Type>().values()),
        DataType::UInt16 => widen(array.as_primitive::<UInt16Type>().values()),
        DataType::UInt8 => widen(array.as_primitive::<UInt8Type>().values()),
        DataType::UInt64 => array
            .as_primitive::<UInt64Type>()
            .values()
            .iter()
            .map(|v| *v as i64)
            .collect(),
        other => return Err(invalid_type(name, other)),
    };
    Ok(values)
}

fn widen<T: Copy + Into<i64>>(values: &[T]) -> Vec<i64> {
    values.iter().map(|v| (*v).into()).collect()
}

fn list_to_f64(array: &dyn Array, name: &str) -> CalRatioResult<Vec<Vec<f64>>> {
    match array.data_type() {
        DataType::List(_) => {
            let list = array.as_list::<i32>();
            (0..list.len())
                .map(|row| array_to_f64(list.value(row).as_ref(), name))
                .collect()
        }
        DataType::LargeList(_) => {
            let list = array.as_list::<i64>();
            (0..list.len())
                .map(|row| array_to_f64(list.value(row).as_ref(), name))
                .collect()
        }
        other => Err(invalid_type(name, other)),
    }
}

type BranchLookup<'a> = IndexMap<String, &'a Branch>;

#[derive(Clone, Copy, Debug)]
enum RootKind {
    F32,
    F64,
    I32,
    U32,
    I64,
    U64,
    Bool,
}

impl RootKind {
    fn parse(type_name: &str) -> Option<Self> {
        match type_name.trim() {
            "float" | "float_t" | "float32_t" => Some(Self::F32),
            "double" | "double_t" | "double32_t" => Some(Self::F64),
            "int" | "int_t" | "int32_t" => Some(Self::I32),
            "unsigned int" | "uint_t" | "uint32_t" => Some(Self::U32),
            "long" | "long64_t" | "int64_t" | "long long" => Some(Self::I64),
            "unsigned long" | "ulong64_t" | "uint64_t" | "unsigned long long" => Some(Self::U64),
            "bool" | "bool_t" => Some(Self::Bool),
            _ => None,
        }
    }
}

/// Split a ROOT item type like `vector<float>` into its element kind and whether it is a list.
fn branch_kind(branch: &Branch) -> Option<(RootKind, bool)> {
    let lower = branch.item_type_name().to_ascii_lowercase();
    let lower = lower.trim_start_matches("std::");
    if let Some(inner) = lower
        .strip_prefix("vector<")
        .and_then(|rest| rest.strip_suffix('>'))
    {
        RootKind::parse(inner).map(|kind| (kind, true))
    } else {
        RootKind::parse(lower).map(|kind| (kind, false))
    }
}

fn lookup_branch<'a>(lookup: &BranchLookup<'a>, name: &str) -> CalRatioResult<&'a Branch> {
    lookup
        .get(name)
        .copied()
        .ok_or_else(|| CalRatioError::MissingColumn {
            name: name.to_string(),
        })
}

fn read_root_scalar(branch: &Branch, name: &str, limit: usize) -> CalRatioResult<Vec<f64>> {
    let context = format!("Failed to read branch '{name}'");
    let values = match branch_kind(branch) {
        Some((RootKind::F32, false)) => branch
            .as_iter::<f32>()
            .map_err(|err| map_root_error(&context, err))?
            .take(limit)
            .map(|v| v as f64)
            .collect(),
        Some((RootKind::F64, false)) => branch
            .as_iter::<f64>()
            .map_err(|err| map_root_error(&context, err))?
            .take(limit)
            .collect(),
        Some((RootKind::Bool, false)) => branch
            .as_iter::<bool>()
            .map_err(|err| map_root_error(&context, err))?
            .take(limit)
            .map(|v| if v { 1.0 } else { 0.0 })
            .collect(),
        Some((_, false)) => read_root_integer(branch, name, limit)?
            .into_iter()
            .map(|v| v as f64)
            .collect(),
        _ => {
            return Err(CalRatioError::InvalidColumnType {
                name: name.to_string(),
                datatype: branch.item_type_name(),
            })
        }
    };
    Ok(values)
}

fn read_root_integer(branch: &Branch, name: &str, limit: usize) -> CalRatioResult<Vec<i64>> {
    let context = format!("Failed to read branch '{name}'");
    let values = match branch_kind(branch) {
        Some((RootKind::I32, false)) => branch
            .as_iter::<i32>()
            .map_err(|err| map_root_error(&context, err))?
            .take(limit)
            .map(i64::from)
            .collect(),
        Some((RootKind::U32, false)) => branch
            .as_iter::<u32>()
            .map_err(|err| map_root_error(&context, err))?
            .take(limit)
            .map(i64::from)
            .collect(),
        Some((RootKind::I64, false)) => branch
            .as_iter::<i64>()
            .map_err(|err| map_root_error(&context, err))?
            .take(limit)
            .collect(),
        Some((RootKind::U64, false)) => branch
            .as_iter::<u64>()
            .map_err(|err| map_root_error(&context, err))?
            .take(limit)
            .map(|v| v as i64)
            .collect(),
        _ => {
            return Err(CalRatioError::InvalidColumnType {
                name: name.to_string(),
                datatype: branch.item_type_name(),
            })
        }
    };
    Ok(values)
}

fn read_root_list(branch: &Branch, name: &str, limit: usize) -> CalRatioResult<Vec<Vec<f64>>> {
    let context = format!("Failed to read branch '{name}'");
    let values = match branch_kind(branch) {
        Some((RootKind::F32, true)) => branch
            .as_iter::<Vec<f32>>()
            .map_err(|err| map_root_error(&context, err))?
            .take(limit)
            .map(|row| row.into_iter().map(|v| v as f64).collect())
            .collect(),
        Some((RootKind::F64, true)) => branch
            .as_iter::<Vec<f64>>()
            .map_err(|err| map_root_error(&context, err))?
            .take(limit)
            .collect(),
        Some((RootKind::I32, true)) => branch
            .as_iter::<Vec<i32>>()
            .map_err(|err| map_root_error(&context, err))?
            .take(limit)
            .map(|row| row.into_iter().map(f64::from).collect())
            .collect(),
        Some((RootKind::Bool, true)) => branch
            .as_iter::<Vec<bool>>()
            .map_err(|err| map_root_error(&context, err))?
            .take(limit)
            .map(|row| row.into_iter().map(|v| if v { 1.0 } else { 0.0 }).collect())
            .collect(),
        _ => {
            return Err(CalRatioError::InvalidColumnType {
                name: name.to_string(),
                datatype: branch.item_type_name(),
            })
        }
    };
    Ok(values)
}

pub(crate) fn read_root_table(
    path: &Path,
    tree_name: &str,
    spec: &ColumnSpec<'_>,
    max_rows: Option<usize>,
) -> CalRatioResult<ColumnTable> {
    let mut file = RootFile::open(path).map_err(|err| {
        CalRatioError::Custom(format!(
            "Failed to open ROOT file '{}': {err}",
            path.display()
        ))
    })?;
    let tree = file
        .get_tree(tree_name)
        .map_err(|err| map_root_error(&format!("Failed to open ROOT tree '{tree_name}'"), err))?;
    let lookup: BranchLookup<'_> = tree
        .branches()
        .map(|branch| (branch.name().to_string(), branch))
        .collect();
    debug!(tree = tree_name, n_branches = lookup.len(), "opened ROOT tree");

    let limit = max_rows.unwrap_or(usize::MAX);
    let mut table = ColumnTable::default();
    for &name in spec.scalars {
        let branch = lookup_branch(&lookup, name)?;
        table.extend_scalar(name, read_root_scalar(branch, name, limit)?);
    }
    for &name in spec.integers {
        let branch = lookup_branch(&lookup, name)?;
        table.extend_integer(name, read_root_integer(branch, name, limit)?);
    }
    for &name in spec.lists {
        let branch = lookup_branch(&lookup, name)?;
        table.extend_list(name, read_root_list(branch, name, limit)?);
    }
    for &name in spec.optional_lists {
        if let Some(branch) = lookup.get(name) {
            table.extend_list(name, read_root_list(branch, name, limit)?);
        }
    }
    Ok(table)
}

pub(crate) fn map_root_error<E: std::fmt::Display>(context: &str, err: E) -> CalRatioError {
    CalRatioError::Custom(format!("{context}: {err}"))
}

fn events_from_table(table: &ColumnTable) -> CalRatioResult<Vec<EventRecord>> {
    let n_rows = table.n_rows()?;
    let event_numbers = table.integer(columns::EVENT_NUMBER)?;
    let jet_lists = columns::JET_LISTS
        .iter()
        .map(|name| table.list(name).map(|values| (*name, values)))
        .collect::<CalRatioResult<Vec<_>>>()?;
    // Collision data carry no truth LLPs; absent columns and short lists leave the slots zeroed.
    let llp_lists = columns::LLP_LISTS.map(|name| table.list(name).ok());
    let signal_indices = table.list(columns::SIGNAL_INDICES)?;
    let bib_indices = table.list(columns::BIB_INDICES)?;
    let event_bdt = table.scalar(columns::EVENT_BDT)?;
    let mht_over_ht = table.scalar(columns::MHT_OVER_HT)?;
    let sum_min_dr = table.scalar(columns::SUM_MIN_DR)?;
    let pass_trigger = table.scalar(columns::PASS_TRIGGER)?;
    let weight = table.scalar(columns::WEIGHT)?;
    let pileup_weight = table.scalar(columns::PILEUP_WEIGHT)?;

    let mut events = Vec::with_capacity(n_rows);
    for row in 0..n_rows {
        let n_jets = jet_lists[0].1[row].len();
        for (name, values) in &jet_lists {
            if values[row].len() != n_jets {
                return Err(CalRatioError::LengthMismatch {
                    context: format!("Event row {row}, column '{name}'"),
                    expected: n_jets,
                    actual: values[row].len(),
                });
            }
        }
        let jets = (0..n_jets)
            .map(|j| {
                let value = |k: usize| jet_lists[k].1[row][j];
                Jet {
                    pt: value(0),
                    eta: value(1),
                    bib_weight: value(2),
                    signal_weight: value(3),
                    is_good_llp: value(4) != 0.0,
                    is_cr_hlt: value(5) != 0.0,
                    time: value(6),
                    log_ratio: value(7),
                    min_dr_trk_pt2: value(8),
                }
            })
            .collect();
        let llp = |slot: usize| {
            let value = |k: usize| {
                llp_lists[k]
                    .and_then(|values| values[row].get(slot).copied())
                    .unwrap_or_default()
            };
            LlpCandidate {
                pt: value(0),
                eta: value(1),
                phi: value(2),
                e: value(3),
                lxy: value(4),
            }
        };
        events.push(EventRecord {
            event_number: event_numbers[row],
            jets,
            signal_indices: signal_indices[row].iter().map(|v| *v as i64).collect(),
            bib_indices: bib_indices[row].iter().map(|v| *v as i64).collect(),
            event_bdt: event_bdt[row],
            mht_over_ht: mht_over_ht[row],
            sum_min_dr: sum_min_dr[row],
            pass_trigger: pass_trigger[row] != 0.0,
            weight: weight[row],
            pileup_weight: pileup_weight[row],
            llps: [llp(0), llp(1)],
        });
    }
    Ok(events)
}

fn f64_list<F>(events: &[EventRecord], mut values: F) -> ArrayRef
where
    F: FnMut(&EventRecord) -> Vec<f64>,
{
    Arc::new(ListArray::from_iter_primitive::<Float64Type, _, _>(
        events
            .iter()
            .map(|event| Some(values(event).into_iter().map(Some).collect::<Vec<_>>())),
    ))
}

fn i64_list<F>(events: &[EventRecord], mut values: F) -> ArrayRef
where
    F: FnMut(&EventRecord) -> Vec<i64>,
{
    Arc::new(ListArray::from_iter_primitive::<Int64Type, _, _>(
        events
            .iter()
            .map(|event| Some(values(event).into_iter().map(Some).collect::<Vec<_>>())),
    ))
}

fn bool_list<F>(events: &[EventRecord], mut values: F) -> ArrayRef
where
    F: FnMut(&EventRecord) -> Vec<bool>,
{
    let mut builder = ListBuilder::new(BooleanBuilder::new());
    for event in events {
        for value in values(event) {
            builder.values().append_value(value);
        }
        builder.append(true);
    }
    Arc::new(builder.finish())
}

fn jet_column<F>(events: &[EventRecord], field: F) -> ArrayRef
where
    F: Fn(&Jet) -> f64,
{
    f64_list(events, |event| event.jets.iter().map(&field).collect())
}

fn llp_column<F>(events: &[EventRecord], field: F) -> ArrayRef
where
    F: Fn(&LlpCandidate) -> f64,
{
    f64_list(events, |event| event.llps.iter().map(&field).collect())
}

fn f64_column<F>(events: &[EventRecord], field: F) -> ArrayRef
where
    F: Fn(&EventRecord) -> f64,
{
    Arc::new(Float64Array::from(events.iter().map(field).collect::<Vec<_>>()))
}

fn events_to_record_batch(events: &[EventRecord]) -> arrow::error::Result<RecordBatch> {
    RecordBatch::try_from_iter(vec![
        (
            columns::EVENT_NUMBER,
            Arc::new(Int64Array::from(
                events.iter().map(|e| e.event_number).collect::<Vec<_>>(),
            )) as ArrayRef,
        ),
        (columns::JET_PT, jet_column(events, |j| j.pt)),
        (columns::JET_ETA, jet_column(events, |j| j.eta)),
        (columns::JET_BIB_WEIGHT, jet_column(events, |j| j.bib_weight)),
        (
            columns::JET_SIGNAL_WEIGHT,
            jet_column(events, |j| j.signal_weight),
        ),
        (
            columns::JET_IS_GOOD_LLP,
            bool_list(events, |e| e.jets.iter().map(|j| j.is_good_llp).collect()),
        ),
        (
            columns::JET_IS_CR_HLT,
            bool_list(events, |e| e.jets.iter().map(|j| j.is_cr_hlt).collect()),
        ),
        (columns::JET_TIME, jet_column(events, |j| j.time)),
        (columns::JET_LOG_RATIO, jet_column(events, |j| j.log_ratio)),
        (
            columns::JET_MIN_DR_TRK_PT2,
            jet_column(events, |j| j.min_dr_trk_pt2),
        ),
        (
            columns::SIGNAL_INDICES,
            i64_list(events, |e| e.signal_indices.clone()),
        ),
        (
            columns::BIB_INDICES,
            i64_list(events, |e| e.bib_indices.clone()),
        ),
        (columns::EVENT_BDT, f64_column(events, |e| e.event_bdt)),
        (columns::MHT_OVER_HT, f64_column(events, |e| e.mht_over_ht)),
        (columns::SUM_MIN_DR, f64_column(events, |e| e.sum_min_dr)),
        (
            columns::PASS_TRIGGER,
            Arc::new(arrow::array::BooleanArray::from(
                events.iter().map(|e| e.pass_trigger).collect::<Vec<_>>(),
            )) as ArrayRef,
        ),
        (columns::WEIGHT, f64_column(events, |e| e.weight)),
        (columns::PILEUP_WEIGHT, f64_column(events, |e| e.pileup_weight)),
        (columns::LLP_PT, llp_column(events, |l| l.pt)),
        (columns::LLP_ETA, llp_column(events, |l| l.eta)),
        (columns::LLP_PHI, llp_column(events, |l| l.phi)),
        (columns::LLP_E, llp_column(events, |l| l.e)),
        (columns::LLP_LXY, llp_column(events, |l| l.lxy)),
    ])
}

/// Persist events to a Parquet file with the same column layout the readers expect.
///
/// This is mostly useful for converting ROOT ntuples once and for building small test inputs.
pub fn write_parquet(
    events: &[EventRecord],
    file_path: &str,
    batch_size: usize,
) -> CalRatioResult<()> {
    let path = expand_output_path(file_path)?;
    let batch_size = batch_size.max(1);
    let mut batches = events
        .chunks(batch_size)
        .map(events_to_record_batch)
        .collect::<arrow::error::Result<Vec<_>>>()?;
    if batches.is_empty() {
        batches.push(events_to_record_batch(&[])?);
    }
    let file = File::create(&path)?;
    let mut writer = ArrowWriter::try_new(file, batches[0].schema(), None)?;
    for batch in &batches {
        writer.write(batch)?;
    }
    writer.close()?;
    info!(path = %path.display(), n_events = events.len(), "wrote events to Parquet");
    Ok(())
}
