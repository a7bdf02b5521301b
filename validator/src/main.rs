use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use flowcheck::{GraphConfig, Packet, Registry, ValidatedGraph};

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    Summary,
    Order,
    Dot,
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "flowcheck",
    version,
    about = "Validates dataflow graph configurations against registered node contracts"
)]
struct Cli {
    /// Graph configuration (JSON)
    graph: PathBuf,

    /// Node registry manifest (repeatable)
    #[arg(short, long = "registry")]
    registry: Vec<PathBuf>,

    /// Externally supplied side packets to check (JSON object: name -> packet)
    #[arg(long)]
    side_packets: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = EmitStage::Summary)]
    emit: EmitStage,

    /// Print validation passes and timing
    #[arg(long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn read_file(path: &PathBuf) -> String {
    match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("flowcheck: error: {}: {}", path.display(), e);
            std::process::exit(2);
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.verbose {
        eprintln!("flowcheck: graph = {}", cli.graph.display());
        eprintln!("flowcheck: emit  = {:?}", cli.emit);
    }

    // ── Load node registry ──
    let mut registry = Registry::new();
    for path in &cli.registry {
        match registry.load_manifest(path) {
            Ok(n) => {
                if cli.verbose {
                    eprintln!("flowcheck: loaded {} node types from {}", n, path.display());
                }
            }
            Err(e) => {
                eprintln!("flowcheck: error: {}", e);
                std::process::exit(2);
            }
        }
    }

    if cli.verbose {
        eprintln!("flowcheck: {} node types registered", registry.len());
    }

    // ── Read graph ──
    let text = read_file(&cli.graph);
    let config = match GraphConfig::from_json(&text) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("flowcheck: error: {}: {}", cli.graph.display(), e);
            std::process::exit(2);
        }
    };

    // ── Validate ──
    let graph = match ValidatedGraph::initialize(&config, &registry) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("flowcheck: error: {}", e);
            std::process::exit(1);
        }
    };

    if cli.verbose {
        for timing in graph.timings() {
            eprintln!("flowcheck: {} complete, {:.1}ms", timing.name(), timing.millis());
        }
        eprintln!("flowcheck: fingerprint = {}", graph.fingerprint_hex());
    }

    // ── Side packets ──
    if let Some(path) = &cli.side_packets {
        let text = read_file(path);
        let packets: BTreeMap<String, Packet> = match serde_json::from_str(&text) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("flowcheck: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        };
        if let Err(e) = graph.validate_required_side_packets(&packets) {
            eprintln!("flowcheck: error: {}", e);
            std::process::exit(1);
        }
    }

    // ── Emit ──
    match cli.emit {
        EmitStage::Summary => println!("{}", graph),
        EmitStage::Order => {
            for (i, generator) in graph.config().packet_generator.iter().enumerate() {
                println!("g{} {}", i, generator.packet_generator);
            }
            for i in 0..graph.calculators().len() {
                println!("c{} {}", i, graph.canonical_node_name(i));
            }
        }
        EmitStage::Dot => print!("{}", flowcheck::dot::emit_dot(&graph)),
        EmitStage::Json => match serde_json::to_string_pretty(&graph.summary()) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("flowcheck: error: {}", e);
                std::process::exit(2);
            }
        },
    }
}
