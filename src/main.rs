use std::fs::File;
use std::io::{self, BufWriter, IsTerminal, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, Subscriber};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Registry};

use hapoa::aligner::{AlignmentType, LinearGapAligner};
use hapoa::config::Config;
use hapoa::io::fasta::write_sequence;
use hapoa::io::{read_sequences, write_msa_fasta, SequenceRecord};
use hapoa::{Window, WindowType};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct CliArgs {
    /// Set verbosity level. Use multiple times to increase the verbosity level.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<CliSubcommand>,
}

#[derive(Subcommand, Debug)]
enum CliSubcommand {
    /// Build a consensus or haplotype-aware corrected backbone for a single window
    Consensus(ConsensusArgs),
}

#[derive(Args, Debug)]
struct ConsensusArgs {
    /// FASTA or FASTQ file, optionally gzipped. The first record is the backbone, all other
    /// records are reads overlapping it. A read's backbone span is taken from a `span=BEGIN-END`
    /// token in its description, and defaults to the whole backbone.
    #[clap(help_heading = "Inputs")]
    sequences: PathBuf,

    /// JSON file with scoring and pruning parameters
    #[arg(short, long)]
    #[clap(help_heading = "Inputs")]
    config: Option<PathBuf>,

    /// Output filename. If not given, defaults to stdout
    #[arg(short, long)]
    #[clap(help_heading = "Outputs")]
    output: Option<PathBuf>,

    /// Write the final POA graph in DOT format to the given file
    #[arg(long)]
    #[clap(help_heading = "Outputs")]
    dot: Option<PathBuf>,

    /// Write the multiple sequence alignment of the final POA graph as FASTA to the given file.
    /// With --haplotype, the final graph is the pruned graph, which holds no sequences, so only
    /// the consensus row is written.
    #[arg(long)]
    #[clap(help_heading = "Outputs")]
    msa: Option<PathBuf>,

    /// Generate a haplotype-aware corrected backbone instead of the heaviest consensus path
    #[arg(long)]
    haplotype: bool,

    /// Trim the consensus to the region covered by at least half of the reads
    #[arg(long)]
    trim: bool,

    /// Reads are short reads. Disables trimming.
    #[arg(long)]
    short_read: bool,

    /// Score for matching bases
    #[arg(short = 'm', long = "match", allow_negative_numbers = true)]
    #[clap(help_heading = "Alignment")]
    match_score: Option<i32>,

    /// Score for mismatching bases
    #[arg(short = 'x', long = "mismatch", allow_negative_numbers = true)]
    #[clap(help_heading = "Alignment")]
    mismatch_score: Option<i32>,

    /// Score for each inserted or deleted base
    #[arg(short = 'g', long = "gap", allow_negative_numbers = true)]
    #[clap(help_heading = "Alignment")]
    gap_score: Option<i32>,

    /// Minimum edge weight kept when pruning
    #[arg(long)]
    #[clap(help_heading = "Haplotype")]
    min_weight: Option<i64>,

    /// Minimum share of the weight of adjacent edges an edge needs to survive pruning
    #[arg(long)]
    #[clap(help_heading = "Haplotype")]
    min_confidence: Option<f64>,

    /// Minimum edge weight relative to the average per-base weight
    #[arg(long)]
    #[clap(help_heading = "Haplotype")]
    min_support: Option<f64>,

    /// Number of pruning rounds
    #[arg(long)]
    #[clap(help_heading = "Haplotype")]
    num_prune: Option<u32>,
}

/// Build our base tracing subscriber with stderr logging.
fn build_base_subscriber(verbose: u8) -> impl Subscriber + for<'span> LookupSpan<'span> {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter_layer = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr_log = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_filter(filter_layer);

    Registry::default().with(stderr_log)
}

fn load_config(args: &ConsensusArgs) -> Result<Config> {
    let mut config = match args.config {
        Some(ref path) => {
            let file = File::open(path)
                .with_context(|| format!("Could not open config file {path:?}"))?;

            Config::from_json_reader(file)
                .with_context(|| format!("Could not parse config file {path:?}"))?
        },
        None => Config::default(),
    };

    if let Some(v) = args.match_score {
        config.scoring.match_score = v;
    }
    if let Some(v) = args.mismatch_score {
        config.scoring.mismatch_score = v;
    }
    if let Some(v) = args.gap_score {
        config.scoring.gap_score = v;
    }
    if let Some(v) = args.min_weight {
        config.prune.min_weight = v;
    }
    if let Some(v) = args.min_confidence {
        config.prune.min_confidence = v;
    }
    if let Some(v) = args.min_support {
        config.prune.min_support = v;
    }
    if let Some(v) = args.num_prune {
        config.prune.num_prune = v;
    }

    Ok(config)
}

/// Parse the backbone span of a read from a `span=BEGIN-END` token in its description
fn parse_span(record: &SequenceRecord, backbone_len: usize) -> Result<(usize, usize)> {
    let token = record.description.as_deref()
        .and_then(|desc| desc.split_whitespace().find_map(|t| t.strip_prefix("span=")));

    let Some(span) = token else {
        return Ok((0, backbone_len.saturating_sub(1)));
    };

    let Some((begin, end)) = span.split_once('-') else {
        bail!("Invalid span '{span}' for read {}", record.name);
    };

    let begin = begin.parse()
        .with_context(|| format!("Invalid span begin '{begin}' for read {}", record.name))?;
    let end = end.parse()
        .with_context(|| format!("Invalid span end '{end}' for read {}", record.name))?;

    Ok((begin, end))
}

/// Write the DOT and MSA outputs of the window's final graph. `names` holds the name of each
/// stored window sequence, backbone first. Skipped if no graph was built.
fn write_graph_outputs(window: &Window, names: &[String], dot: Option<&Path>, msa: Option<&Path>) -> Result<()> {
    if dot.is_none() && msa.is_none() {
        return Ok(());
    }

    let Some(graph) = window.graph() else {
        info!("No POA graph was built for this window, skipping graph outputs");
        return Ok(());
    };

    if let Some(path) = dot {
        let mut file = File::create(path)
            .with_context(|| format!("Could not create DOT file {path:?}"))?;
        write!(file, "{}", graph)?;
    }

    if let Some(path) = msa {
        let mut graph = graph.clone();

        // MSA rows follow the order in which sequences were inserted into the graph
        let row_names: Vec<String> = window.insertion_order().into_iter()
            .map(|i| names.get(i).cloned().unwrap_or_else(|| format!("seq{i}")))
            .collect();

        let mut file = BufWriter::new(File::create(path)
            .with_context(|| format!("Could not create MSA file {path:?}"))?);
        write_msa_fasta(&mut file, &mut graph, &row_names, true)?;
        file.flush()?;
    }

    Ok(())
}

fn consensus_subcommand(args: &ConsensusArgs) -> Result<()> {
    let config = load_config(args)?;

    let records = read_sequences(&args.sequences)
        .with_context(|| format!("Could not read sequences from {:?}", args.sequences))?;

    let Some((backbone, reads)) = records.split_first() else {
        bail!("No sequences found in {:?}", args.sequences);
    };

    let window_type = if args.short_read { WindowType::ShortRead } else { WindowType::LongRead };
    let mut window = Window::new(0, 0, window_type, &backbone.sequence, backbone.quality.as_deref())
        .with_context(|| format!("Could not create window for backbone {}", backbone.name))?;

    // Names of the sequences stored in the window, reads the window ignores are skipped
    let mut names = vec![backbone.name.clone()];
    for read in reads {
        let (begin, end) = parse_span(read, backbone.sequence.len())?;
        let num_before = window.num_sequences();
        window.add_layer(&read.sequence, read.quality.as_deref(), begin, end)
            .with_context(|| format!("Could not add read {}", read.name))?;

        if window.num_sequences() > num_before {
            names.push(read.name.clone());
        }
    }

    info!(backbone = %backbone.name, num_sequences = window.num_sequences(), "Processing window");

    let aligner = LinearGapAligner::from_config(AlignmentType::Global, &config.scoring);
    let generated = if args.haplotype {
        let local_aligner = LinearGapAligner::from_config(AlignmentType::Local, &config.local_scoring);
        window.generate_haplotype_consensus(&aligner, &local_aligner, &config.prune)?
    } else {
        window.generate_consensus(&aligner, args.trim)?
    };

    if !generated {
        info!("No consensus generated for {}, reporting the backbone", backbone.name);
    }

    let mut output: Box<dyn Write> = match args.output {
        Some(ref path) => Box::new(BufWriter::new(File::create(path)
            .with_context(|| format!("Could not create output file {path:?}"))?)),
        None => Box::new(BufWriter::new(io::stdout())),
    };

    write_sequence(&mut output, &backbone.name, window.consensus())?;
    output.flush()?;

    write_graph_outputs(&window, &names, args.dot.as_deref(), args.msa.as_deref())?;

    Ok(())
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    build_base_subscriber(args.verbose).init();

    match &args.command {
        Some(CliSubcommand::Consensus(v)) => consensus_subcommand(v)?,
        None => bail!("No subcommand given!"),
    };

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use hapoa::aligner::{AlignmentType, LinearGapAligner};
    use hapoa::io::SequenceRecord;
    use hapoa::{Window, WindowType};

    use super::{parse_span, write_graph_outputs};

    fn record(description: Option<&str>) -> SequenceRecord {
        SequenceRecord {
            name: "read1".to_string(),
            description: description.map(|d| d.to_string()),
            sequence: b"ACGT".to_vec(),
            quality: None,
        }
    }

    #[test]
    fn test_parse_span() {
        assert_eq!(parse_span(&record(None), 100).unwrap(), (0, 99));
        assert_eq!(parse_span(&record(Some("strand=+ span=10-19")), 100).unwrap(), (10, 19));
        assert!(parse_span(&record(Some("span=10")), 100).is_err());
        assert!(parse_span(&record(Some("span=a-19")), 100).is_err());
    }

    #[test]
    fn test_graph_outputs_without_graph() {
        let mut window = Window::new(0, 0, WindowType::LongRead, b"ACGTACGT", None).unwrap();
        window.add_layer(b"ACGTACGT", None, 0, 7).unwrap();

        let aligner = LinearGapAligner::new(AlignmentType::Global, 3, -5, -4);
        assert!(!window.generate_consensus(&aligner, false).unwrap());

        // Nothing is written, so the unusable paths are never opened
        let dot = Path::new("/nonexistent/window.dot");
        let msa = Path::new("/nonexistent/window.msa.fa");
        let names = vec!["backbone".to_string(), "read1".to_string()];
        assert!(write_graph_outputs(&window, &names, Some(dot), Some(msa)).is_ok());
    }
}
