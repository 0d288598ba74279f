use clap::Parser;
use std::path::PathBuf;

use rmcc::pass::PassId;
use rmcc::pipeline::{parse_diagnostics, run_pipeline, CompilationState};
use rmcc::realize::{Mode, RealizeConfig};
use rmcc::smt::{BackendKind, Search};
use rmcc::target::Target;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    /// Lowered IR, markers intact
    Ir,
    /// IR after cut realization
    Realized,
    /// JSON cut report
    Cuts,
    /// Graphviz CFG of the realized IR
    Dot,
    /// JSON provenance
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "rmcc",
    version,
    about = "RMC realization compiler: turns ordering edges between labelled actions into hardware barriers"
)]
struct Cli {
    /// Input .rir source file
    source: PathBuf,

    /// Output file path (stdout if omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Cut planner
    #[arg(long, value_enum, default_value_t = Mode::Greedy)]
    mode: Mode,

    /// Target architecture
    #[arg(long, value_enum, default_value_t = Target::Power)]
    target: Target,

    /// Constraint solver backend for --mode optimal
    #[arg(long, value_enum, default_value_t = BackendKind::BuiltIn)]
    solver: BackendKind,

    /// Cost minimization strategy for --mode optimal
    #[arg(long, value_enum, default_value_t = Search::Native)]
    search: Search,

    /// Share path suffixes between enumerations
    #[arg(long)]
    share_suffixes: bool,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Realized)]
    emit: EmitStage,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let default = if verbose { "rmcc=debug" } else { "rmcc=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = RealizeConfig {
        mode: cli.mode,
        target: cli.target,
        backend: cli.solver,
        search: cli.search,
        share_suffixes: cli.share_suffixes,
    };

    if cli.verbose {
        eprintln!("rmcc: source = {}", cli.source.display());
        eprintln!("rmcc: emit   = {:?}", cli.emit);
        eprintln!(
            "rmcc: mode   = {:?}, target = {}",
            config.mode,
            config.target.name()
        );
    }

    // ── Read and parse source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("rmcc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    let parsed = rmcc::parser::parse(&source);
    let syntax = parse_diagnostics(&parsed);
    if !syntax.is_empty() {
        for diag in &syntax {
            eprintln!("rmcc: {}", diag);
        }
        std::process::exit(1);
    }
    let module = match parsed.module {
        Some(m) => m,
        None => {
            eprintln!("rmcc: parse failed with no output");
            std::process::exit(1);
        }
    };

    if cli.verbose {
        eprintln!("rmcc: parsed {} functions", module.functions.len());
    }

    let mut state = CompilationState::new(&source, module, config);

    if cli.emit == EmitStage::BuildInfo {
        write_output(cli.output.as_ref(), &state.provenance.to_json());
        return;
    }

    // ── Run passes ──
    let terminal = match cli.emit {
        EmitStage::Ir => PassId::Lower,
        _ => PassId::Verify,
    };
    let result = run_pipeline(&mut state, terminal, cli.verbose, |_, diags| {
        for diag in diags {
            eprintln!("rmcc: {}", diag);
        }
    });
    if result.is_err() || state.has_error {
        std::process::exit(1);
    }

    let text = match cli.emit {
        EmitStage::Ir | EmitStage::Realized => state
            .functions
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join("\n"),
        EmitStage::Cuts => state.cut_report().to_json(),
        EmitStage::Dot => rmcc::dot::emit_dot(&state.functions),
        EmitStage::BuildInfo => unreachable!(),
    };
    write_output(cli.output.as_ref(), &text);
}

fn write_output(path: Option<&PathBuf>, text: &str) {
    match path {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("rmcc: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        }
        None => print!("{text}"),
    }
}
