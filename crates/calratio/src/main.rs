//! CalRatio CLI

use anyhow::{Context, Result};
use calratio_core::{
    efficiency::write_points_json, read_events, read_slim, write_slim, AnalysisConfig,
    CutflowReport, EventReadOptions, LxyBinning, LxyEfficiency, LxyEfficiency2D, RegionYields,
    SelectionVariant, Selector, SlimWriteOptions, Stage, SystematicBudget, SystematicsOptions,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "calratio")]
#[command(about = "CalRatio long-lived particle selection, ABCD yields and efficiencies")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    /// YAML file overriding cut values, the ABCD plane, the Lxy binning or systematics
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the selection to an ntuple and write the slimmed tree
    Slim {
        /// Input sample (.root or .parquet)
        #[arg(short, long)]
        sample: PathBuf,

        /// Output file (.root or .parquet)
        #[arg(short, long)]
        output: PathBuf,

        /// Maximum number of events to process (0 or negative = all)
        #[arg(short = 'n', long, default_value_t = -1, allow_negative_numbers = true)]
        nevents: i64,

        /// Selection to flag regions for (1: pT > 100, 2: pT > 160)
        #[arg(short = 'm', long, default_value = "1")]
        selection: SelectionVariant,

        /// Input tree name for ROOT files
        #[arg(long, default_value = "recoTree")]
        tree: String,

        /// Output tree name for ROOT files
        #[arg(long, default_value = "extrapTree")]
        output_tree: String,

        /// Also write the cutflow counters as JSON
        #[arg(long)]
        cutflow_json: Option<PathBuf>,
    },

    /// Sum the region yields of a slimmed file and print the ABCD prediction
    Abcd {
        /// Slimmed input (.root or .parquet)
        #[arg(short, long)]
        input: PathBuf,

        /// Tree name for ROOT inputs
        #[arg(long)]
        tree: Option<String>,

        /// Output file for results (pretty JSON). Defaults to a text summary on stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compute per-region efficiencies versus Lxy from a slimmed file
    Efficiency {
        /// Slimmed input (.root or .parquet)
        #[arg(short, long)]
        input: PathBuf,

        /// Tree name for ROOT inputs
        #[arg(long)]
        tree: Option<String>,

        /// Output file for the plot points (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of Lxy bins
        #[arg(long)]
        bins: Option<usize>,

        /// Lower Lxy edge in metres
        #[arg(long)]
        min: Option<f64>,

        /// Upper Lxy edge in metres
        #[arg(long)]
        max: Option<f64>,

        /// Also write the smoothed (lxy1, lxy2) efficiency maps as JSON
        #[arg(long)]
        map_2d: Option<PathBuf>,
    },

    /// Print the signal systematic budget for a sample
    Systematics {
        /// Sample whose file name carries the mass point (mH<mass>_...)
        #[arg(short, long)]
        extrapolate: PathBuf,

        /// Relative uncertainty on the ABCD estimate
        #[arg(long)]
        abcd_error: Option<f64>,

        /// Factor to scale the MC error by
        #[arg(long)]
        mc_error_scale: Option<f64>,

        /// Fall back to stand-in values for unknown mass points
        #[arg(long)]
        unofficial: bool,

        /// Output file for results (pretty JSON). Defaults to a text summary on stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration as YAML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Slim {
            sample,
            output,
            nevents,
            selection,
            tree,
            output_tree,
            cutflow_json,
        } => cmd_slim(
            &config,
            &sample,
            &output,
            nevents,
            selection,
            &tree,
            &output_tree,
            cutflow_json.as_deref(),
        ),
        Commands::Abcd {
            input,
            tree,
            output,
        } => cmd_abcd(&input, tree.as_deref(), output.as_deref()),
        Commands::Efficiency {
            input,
            tree,
            output,
            bins,
            min,
            max,
            map_2d,
        } => {
            let mut binning = config.lxy;
            binning.bins = bins.unwrap_or(binning.bins);
            binning.min = min.unwrap_or(binning.min);
            binning.max = max.unwrap_or(binning.max);
            cmd_efficiency(
                &input,
                tree.as_deref(),
                output.as_deref(),
                map_2d.as_deref(),
                binning,
            )
        }
        Commands::Systematics {
            extrapolate,
            abcd_error,
            mc_error_scale,
            unofficial,
            output,
        } => {
            let mut options = config.systematics;
            options.abcd_error = abcd_error.unwrap_or(options.abcd_error);
            options.mc_error_scale = mc_error_scale.unwrap_or(options.mc_error_scale);
            options.unofficial |= unofficial;
            cmd_systematics(&extrapolate, options, output.as_deref())
        }
        Commands::Config => {
            print!("{}", config.to_yaml()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    match path {
        Some(path) => {
            let config = AnalysisConfig::from_yaml_file(path_str(path)?)
                .with_context(|| format!("failed to load config {}", path.display()))?;
            tracing::info!(path = %path.display(), "loaded configuration");
            Ok(config)
        }
        None => Ok(AnalysisConfig::default()),
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str().with_context(|| format!("path is not valid UTF-8: {}", path.display()))
}

#[allow(clippy::too_many_arguments)]
fn cmd_slim(
    config: &AnalysisConfig,
    sample: &Path,
    output: &Path,
    nevents: i64,
    selection: SelectionVariant,
    tree: &str,
    output_tree: &str,
    cutflow_json: Option<&Path>,
) -> Result<()> {
    let read_options = EventReadOptions::new().tree(tree).max_events(nevents);
    let events = read_events(path_str(sample)?, &read_options)
        .with_context(|| format!("failed to read sample {}", sample.display()))?;
    tracing::info!(
        sample = %events.name,
        n_events = events.n_events(),
        %selection,
        "running selection"
    );

    let selector = Selector::new(selection)
        .with_config(config.selection.clone())
        .with_classifier(config.abcd);
    #[cfg(feature = "rayon")]
    let (records, counters) = selector.run_par(&events.events);
    #[cfg(not(feature = "rayon"))]
    let (records, counters) = selector.run(&events.events);

    write_slim(&records, path_str(output)?, &SlimWriteOptions::new().tree(output_tree))
        .with_context(|| format!("failed to write {}", output.display()))?;

    let report = CutflowReport::new(events.name.clone(), selector.config(), counters);
    print!("{report}");

    if let Some(path) = cutflow_json {
        let stages: Vec<serde_json::Value> = counters
            .iter()
            .map(|(stage, count)| {
                serde_json::json!({
                    "stage": format!("{stage:?}"),
                    "label": stage.label(selector.config()),
                    "count": count,
                })
            })
            .collect();
        let value = serde_json::json!({
            "sample": events.name,
            "selection": selection.number(),
            "n_events": events.n_events(),
            "n_selected": counters.get(Stage::LeadingPt(selection)),
            "stages": stages,
        });
        write_json(path, value)?;
    }
    Ok(())
}

fn cmd_abcd(input: &Path, tree: Option<&str>, output: Option<&Path>) -> Result<()> {
    let records = read_slim(path_str(input)?, tree)
        .with_context(|| format!("failed to read slimmed file {}", input.display()))?;
    #[cfg(feature = "rayon")]
    let yields = RegionYields::from_records_par(&records);
    #[cfg(not(feature = "rayon"))]
    let yields = RegionYields::from_records(&records);
    tracing::info!(n_records = records.len(), "accumulated region yields");

    match output {
        Some(path) => {
            let value = serde_json::json!({
                "n_records": records.len(),
                "yields": yields,
                "prediction": yields.abcd_prediction(),
            });
            write_json(path, value)
        }
        None => {
            println!("{yields}");
            Ok(())
        }
    }
}

fn cmd_efficiency(
    input: &Path,
    tree: Option<&str>,
    output: Option<&Path>,
    map_2d: Option<&Path>,
    binning: LxyBinning,
) -> Result<()> {
    let records = read_slim(path_str(input)?, tree)
        .with_context(|| format!("failed to read slimmed file {}", input.display()))?;
    let efficiency = LxyEfficiency::from_records(&records, binning)?;
    let points = efficiency.all_points();
    match output {
        Some(path) => write_points_json(&points, path_str(path)?)?,
        None => println!("{}", serde_json::to_string_pretty(&points)?),
    }
    if let Some(path) = map_2d {
        let map = LxyEfficiency2D::from_records(&records, binning)?;
        write_json(path, serde_json::to_value(map.cells())?)?;
    }
    Ok(())
}

fn cmd_systematics(
    extrapolate: &Path,
    options: SystematicsOptions,
    output: Option<&Path>,
) -> Result<()> {
    let file_name = extrapolate
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| extrapolate.display().to_string());
    let budget = SystematicBudget::for_sample(&file_name, &options)?;
    match output {
        Some(path) => write_json(path, serde_json::to_value(&budget)?),
        None => {
            println!("{budget}");
            Ok(())
        }
    }
}

fn write_json(path: &Path, value: serde_json::Value) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(&value)?)
        .with_context(|| format!("failed to write {}", path.display()))
}
