mod interactive;

use std::{
    fs::File,
    io::{stdout, BufWriter, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use cache_sim::{
    config::{PartialConfig, SimConfig},
    io::{EmptySink, EventSink, WriterSink},
    sim::Simulator,
    trace::TraceReader,
};
use clap::Parser;

#[cfg(feature = "stat")]
use terminal_size::terminal_size;

/// Replay a memory access trace against a FIFO set-associative write-back
/// cache.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// File path to the access trace
    trace: PathBuf,
    /// Cache size in KiB
    cache_size_kb: Option<usize>,
    /// Number of frames per set
    associativity: Option<usize>,
    /// Block size in bytes
    block_size: Option<usize>,
    /// JSON file with defaults for any geometry value not given above
    #[arg(long)]
    config: Option<PathBuf>,
    /// Capacity of main memory in bytes (default: 16 MiB)
    #[arg(long)]
    memory_bytes: Option<usize>,
    /// Enable interactive mode
    #[arg(long)]
    interactive: bool,
    /// Do not print events
    #[arg(short, long)]
    quiet: bool,
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    if args.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::init();
    }
    let config = read_config(&args)?;
    let mut sim = Simulator::new(&config)?;
    let trace = TraceReader::open(&args.trace)?;
    let mut sink = event_sink(args.quiet, BufWriter::new(stdout()));
    if args.interactive {
        interactive::execute_interactive(&mut sim, trace, &mut *sink)?;
    } else {
        sim.run(trace, &mut *sink)?;
    }
    output_stat(&sim);
    Ok(())
}

/// `--quiet` drops events in every mode.
fn event_sink<'a, W: Write + 'a>(quiet: bool, out: W) -> Box<dyn EventSink + 'a> {
    if quiet {
        Box::new(EmptySink::new())
    } else {
        Box::new(WriterSink::new(out))
    }
}

fn read_config(args: &Cli) -> Result<SimConfig> {
    let from_file = match &args.config {
        Some(p) => {
            let file = File::open(p)
                .with_context(|| format!("failed to open config file {}", p.display()))?;
            PartialConfig::deser(file)
                .with_context(|| format!("failed to parse config file {}", p.display()))?
        }
        None => Default::default(),
    };
    let from_args = PartialConfig {
        cache_size_kb: args.cache_size_kb,
        associativity: args.associativity,
        block_size: args.block_size,
        memory_bytes: args.memory_bytes,
    };
    Ok(from_args.or(from_file).resolve()?)
}

#[cfg(not(feature = "stat"))]
fn output_stat(_: &Simulator) {}

#[cfg(feature = "stat")]
fn output_stat(sim: &Simulator) {
    let max_width = get_terminal_width().unwrap_or(120) as usize;
    log::info!("statistics:\n{}", sim.collect_stat().view(max_width));
}

#[cfg(feature = "stat")]
pub(crate) fn get_terminal_width() -> Option<u16> {
    terminal_size().map(|(w, _)| w.0.saturating_sub(20))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_args() {
        let args = Cli::try_parse_from(["cachesim", "trace.txt", "1", "2", "16"]).unwrap();
        assert_eq!(SimConfig::new(1, 2, 16), read_config(&args).unwrap());
        assert!(!args.interactive);
    }
    #[test]
    fn test_quiet_sink() {
        use cache_sim::{
            event::{Event, Lookup},
            memory::Addr,
        };
        let event = Event::Store {
            addr: Addr::new(0),
            lookup: Lookup::Miss,
        };
        let args =
            Cli::try_parse_from(["cachesim", "trace.txt", "1", "2", "16", "--interactive", "-q"])
                .unwrap();
        let mut buf = Vec::new();
        {
            let mut sink = event_sink(args.quiet, &mut buf);
            sink.emit(&event).unwrap();
            sink.flush().unwrap();
        }
        assert!(buf.is_empty());
        {
            let mut sink = event_sink(false, &mut buf);
            sink.emit(&event).unwrap();
            sink.flush().unwrap();
        }
        assert_eq!(b"store 0x0 miss\n", &buf[..]);
    }
    #[test]
    fn test_missing_geometry() {
        let args = Cli::try_parse_from(["cachesim", "trace.txt", "1"]).unwrap();
        assert!(read_config(&args).is_err());
    }
    #[test]
    fn test_memory_bytes_flag() {
        let args = Cli::try_parse_from([
            "cachesim",
            "trace.txt",
            "4",
            "1",
            "64",
            "--memory-bytes",
            "65536",
        ])
        .unwrap();
        assert_eq!(
            SimConfig::new(4, 1, 64).with_memory_bytes(65536),
            read_config(&args).unwrap()
        );
    }
}
