// Command line utility for comparing two conditions with scan-compare

use anyhow::{Context, Error};
use clap::{value_parser, Arg, Command};
use diff_exp::TestMethod;
use log::info;
use scan_compare::{run_comparative_analysis, AnalysisConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tools::export::write_report;
use tools::tenx::{matrix_dir, read_10x_dir};

fn read_config(path: Option<&PathBuf>) -> Result<AnalysisConfig, Error> {
    match path {
        Some(path) => {
            let file = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
            serde_json::from_reader(file).with_context(|| format!("parsing {}", path.display()))
        }
        None => Ok(AnalysisConfig::default()),
    }
}

pub fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("scan-compare-cmd")
        .arg(
            Arg::new("CTRL")
                .help("10x matrix directory of the control condition")
                .required(true)
                .index(1)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("STIM")
                .help("10x matrix directory of the stimulated condition")
                .required(true)
                .index(2)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("CTRL_LABEL")
                .help("Label of the control condition, prefixed to its cell ids")
                .long("ctrl-label")
                .default_value("CTRL"),
        )
        .arg(
            Arg::new("STIM_LABEL")
                .help("Label of the stimulated condition, prefixed to its cell ids")
                .long("stim-label")
                .default_value("STIM"),
        )
        .arg(
            Arg::new("CONFIG")
                .help("JSON file with analysis parameters")
                .short('c')
                .long("config")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("OUT_DIR")
                .help("Output directory")
                .short('o')
                .long("out_dir")
                .default_value(".")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("SEED")
                .help("Random seed")
                .short('s')
                .long("seed")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("RESOLUTION")
                .help("Clustering resolution")
                .short('r')
                .long("resolution")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("REFERENCE")
                .help("Condition the other one is aligned to")
                .long("reference"),
        )
        .arg(
            Arg::new("TEST")
                .help("Differential expression test")
                .short('t')
                .long("test")
                .value_parser(["wilcox", "t"]),
        )
        .get_matches();

    let mut config = read_config(matches.get_one::<PathBuf>("CONFIG"))?;
    if let Some(&seed) = matches.get_one::<u64>("SEED") {
        config.random_seed = seed;
    }
    if let Some(&resolution) = matches.get_one::<f64>("RESOLUTION") {
        config.resolution = resolution;
    }
    if let Some(reference) = matches.get_one::<String>("REFERENCE") {
        config.integration.reference_condition = Some(reference.clone());
    }
    if let Some(test) = matches.get_one::<String>("TEST") {
        config.de.test_method = test.parse::<TestMethod>()?;
    }

    let ctrl_label = matches.get_one::<String>("CTRL_LABEL").map_or("CTRL", String::as_str);
    let stim_label = matches.get_one::<String>("STIM_LABEL").map_or("STIM", String::as_str);
    let out_dir = matches
        .get_one::<PathBuf>("OUT_DIR")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("."));

    let mut inputs = Vec::new();
    for name in ["CTRL", "STIM"] {
        if let Some(path) = matches.get_one::<PathBuf>(name) {
            inputs.push(read_10x_dir(matrix_dir(path))?);
        }
    }
    let [ctrl, stim] = <[_; 2]>::try_from(inputs).map_err(|_| anyhow::format_err!("two input directories required"))?;

    let report = run_comparative_analysis(&config, (&ctrl, ctrl_label), (&stim, stim_label))?;
    info!(
        "{} integrated clusters, {} anchors{}",
        report.integrated_labels()?.num_clusters,
        report.anchors().len(),
        if report.low_confidence() { " (low confidence)" } else { "" }
    );
    write_report(&out_dir, &report)?;
    write_config(&out_dir, &config)?;
    Ok(())
}

fn write_config(out_dir: &std::path::Path, config: &AnalysisConfig) -> Result<(), Error> {
    tools::export::write_json(&out_dir.join("config.json"), config)
}
