use std::io::Write as _;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use strata::burndown::merge::merge_results;
use strata::driver::{Toggles, run_analyses};
use strata::output;
use strata::pipeline::Report;
use strata_git::{GixRepo, HistoryRepo};

/// Longitudinal git history analysis
///
/// strata replays a repository's commit history — branches, merges and all —
/// and computes line-survival ("burndown") matrices, co-change coupling, and
/// per-developer statistics.
///
/// QUICK START:
///
///   strata run --burndown --burndown-people .
///
///   # Binary output for later combination:
///   strata run --burndown -o left.bin --binary path/to/repo
///   strata combine left.bin right.bin -o merged.bin
#[derive(Parser)]
#[command(name = "strata")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'strata <command> --help' for more information on a specific command.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a repository and run the requested analyses
    Run(RunArgs),
    /// Merge two binary result streams produced by `run --binary`
    Combine(CombineArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Path to the repository (or any directory inside it)
    #[arg(default_value = ".")]
    repository: PathBuf,

    /// Revision to replay from (defaults to HEAD)
    #[arg(long)]
    head: Option<String>,

    // -- analyses --
    /// Run the line-survival (burndown) analysis
    #[arg(long)]
    burndown: bool,

    /// Run the co-change coupling analysis
    #[arg(long)]
    couples: bool,

    /// Run the per-developer activity analysis
    #[arg(long)]
    devs: bool,

    /// Record per-commit line stats
    #[arg(long)]
    commits_stat: bool,

    /// Not available in this build (requires syntax extraction)
    #[arg(long)]
    file_history: bool,

    /// Not available in this build (requires UAST extraction)
    #[arg(long)]
    shotness: bool,

    /// Not available in this build (requires import extraction)
    #[arg(long)]
    imports_per_dev: bool,

    /// Not available in this build (requires UAST extraction)
    #[arg(long)]
    typos_dataset: bool,

    /// Not available in this build (requires comment classification)
    #[arg(long)]
    sentiment: bool,

    // -- burndown options --
    /// Band width in ticks
    #[arg(long)]
    granularity: Option<u32>,

    /// Snapshot distance in ticks (at most --granularity)
    #[arg(long)]
    sampling: Option<u32>,

    /// Track per-file burndown matrices
    #[arg(long)]
    burndown_files: bool,

    /// Track per-author matrices and the interaction matrix
    #[arg(long)]
    burndown_people: bool,

    /// Validate every ownership tree after every update (slow)
    #[arg(long)]
    burndown_debug: bool,

    /// Tick size, e.g. 24h, 30m, 7d (default 24h)
    #[arg(long, value_parser = parse_duration_secs)]
    tick_size: Option<i64>,

    /// Arena size (nodes) from which idle branches hibernate; 0 disables
    #[arg(long)]
    hibernation_threshold: Option<usize>,

    /// Spill hibernation images to disk instead of keeping them in memory
    #[arg(long)]
    hibernation_to_disk: bool,

    /// Directory for on-disk hibernation images
    #[arg(long)]
    hibernation_dir: Option<PathBuf>,

    /// Count commits whose tree diff is empty
    #[arg(long)]
    empty_commits: bool,

    /// Identity dictionary file (name|email|email… per line)
    #[arg(long)]
    people_dict: Option<PathBuf>,

    // -- output --
    /// Emit length-delimited binary records instead of text
    #[arg(long)]
    binary: bool,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct CombineArgs {
    /// First binary result stream
    left: PathBuf,
    /// Second binary result stream
    right: PathBuf,

    /// Emit binary records instead of text
    #[arg(long)]
    binary: bool,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Combine(args) => combine(args),
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter =
        EnvFilter::try_from_env("STRATA_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Parse `<n>(s|m|h|d)` into seconds; a bare number means hours.
fn parse_duration_secs(value: &str) -> std::result::Result<i64, String> {
    let value = value.trim();
    let (digits, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => value.split_at(pos),
        None => (value, "h"),
    };
    let amount: i64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{value}'"))?;
    let seconds = match unit.trim() {
        "s" => amount,
        "m" => amount * 60,
        "h" => amount * 3600,
        "d" => amount * 86400,
        other => return Err(format!("unknown duration unit '{other}' (use s, m, h or d)")),
    };
    if seconds <= 0 {
        return Err("duration must be positive".to_owned());
    }
    Ok(seconds)
}

fn run(args: RunArgs) -> Result<()> {
    for (enabled, flag) in [
        (args.file_history, "--file-history"),
        (args.shotness, "--shotness"),
        (args.imports_per_dev, "--imports-per-dev"),
        (args.typos_dataset, "--typos-dataset"),
        (args.sentiment, "--sentiment"),
    ] {
        if enabled {
            tracing::warn!("{flag} is not available in this build; skipping");
        }
    }

    let repo = GixRepo::open(&args.repository)
        .with_context(|| format!("opening repository at {}", args.repository.display()))?;
    let config_dir = repo
        .workdir()
        .map_or_else(|| args.repository.clone(), PathBuf::from);

    let mut config = strata::Config::load(&config_dir)?;
    if let Some(granularity) = args.granularity {
        config.granularity = granularity;
    }
    if let Some(sampling) = args.sampling {
        config.sampling = sampling;
    }
    config.burndown_files |= args.burndown_files;
    config.burndown_people |= args.burndown_people;
    config.burndown_debug |= args.burndown_debug;
    if let Some(tick_size) = args.tick_size {
        config.tick_size_secs = tick_size;
    }
    if let Some(threshold) = args.hibernation_threshold {
        config.hibernation_threshold = threshold;
    }
    config.hibernation_to_disk |= args.hibernation_to_disk;
    if let Some(dir) = args.hibernation_dir {
        config.hibernation_dir = dir;
    }
    config.empty_commits |= args.empty_commits;
    if args.people_dict.is_some() {
        config.people_dict = args.people_dict;
    }
    if args.head.is_some() {
        config.head = args.head;
    }

    let toggles = Toggles {
        burndown: args.burndown,
        couples: args.couples,
        devs: args.devs,
        commits_stat: args.commits_stat,
    };

    let repo: Rc<dyn HistoryRepo> = Rc::new(repo);
    let reports = run_analyses(&repo, config, toggles)?;
    emit(&reports, args.binary, args.output.as_deref())
}

fn combine(args: CombineArgs) -> Result<()> {
    let read_burndowns = |path: &PathBuf| -> Result<Vec<strata::burndown::BurndownResult>> {
        let mut file = std::fs::File::open(path)
            .with_context(|| format!("opening {}", path.display()))?;
        let records = output::read_records(&mut file)?;
        records
            .iter()
            .filter(|r| r.name == "burndown")
            .map(|r| Ok(output::decode_burndown(r)?))
            .collect()
    };

    let left = read_burndowns(&args.left)?;
    let right = read_burndowns(&args.right)?;
    let (Some(left), Some(right)) = (left.first(), right.first()) else {
        bail!("both inputs must contain a burndown record (produced by `run --burndown --binary`)");
    };

    let merged = merge_results(left, right)?;
    let reports = vec![("burndown".to_owned(), Report::Burndown(merged))];
    emit(&reports, args.binary, args.output.as_deref())
}

fn emit(reports: &[(String, Report)], binary: bool, output: Option<&std::path::Path>) -> Result<()> {
    let mut sink: Box<dyn std::io::Write> = match output {
        Some(path) => Box::new(
            std::fs::File::create(path)
                .with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout().lock()),
    };
    if binary {
        output::write_binary(reports, &mut sink)?;
    } else {
        output::write_text(reports, &mut sink)?;
    }
    sink.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_units() {
        assert_eq!(parse_duration_secs("24h").unwrap(), 86400);
        assert_eq!(parse_duration_secs("30m").unwrap(), 1800);
        assert_eq!(parse_duration_secs("90s").unwrap(), 90);
        assert_eq!(parse_duration_secs("7d").unwrap(), 7 * 86400);
        // A bare number means hours.
        assert_eq!(parse_duration_secs("12").unwrap(), 12 * 3600);
    }

    #[test]
    fn duration_rejects_garbage() {
        assert!(parse_duration_secs("abc").is_err());
        assert!(parse_duration_secs("10w").is_err());
        assert!(parse_duration_secs("0h").is_err());
    }

    #[test]
    fn cli_parses_the_documented_flags() {
        Cli::try_parse_from([
            "strata",
            "run",
            "--burndown",
            "--couples",
            "--devs",
            "--commits-stat",
            "--burndown-files",
            "--burndown-people",
            "--burndown-debug",
            "--granularity",
            "30",
            "--sampling",
            "15",
            "--tick-size",
            "24h",
            "--hibernation-threshold",
            "1000",
            "--hibernation-to-disk",
            "--hibernation-dir",
            "/tmp",
            "--empty-commits",
            "--shotness",
            "--sentiment",
            "--typos-dataset",
            "--imports-per-dev",
            "--file-history",
            ".",
        ])
        .expect("flags parse");
    }

    #[test]
    fn cli_parses_combine() {
        Cli::try_parse_from(["strata", "combine", "a.bin", "b.bin", "-o", "out.bin"])
            .expect("combine parses");
    }
}
