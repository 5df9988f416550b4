use std::io::{self, stdin, stdout, BufRead, Write};

use anyhow::Result;
use cache_sim::{
    common::{ExecuteMode, RunStep, SimulationOption, Watch, WatchKind},
    event::HexBytes,
    io::EventSink,
    memory::Addr,
    sim::Simulator,
    trace::TraceReader,
};

peg::parser!(grammar command() for str {
    rule usize() -> usize
        = n:$(quiet!{['0'..='9']+}) {? n.parse().or(Err("usize")) }
        / expected!("usize")
    rule radix() -> usize
        = quiet!{"0" ['x' | 'X']} n:$(quiet!{['0'..='9'|'a'..='f'|'A'..='F']+}) {? usize::from_str_radix(n, 16).or(Err("hex")) }
        / quiet!{"0" ['d' | 'D']} n:$(quiet!{['0'..='9']+}) {? n.parse().or(Err("decimal")) }
    rule number() -> usize
        = radix() / usize()
    rule addr() -> Addr
        = n:number() { Addr::new(n) }
        / expected!("address")
    rule watch_kind() -> WatchKind
        = "load" { WatchKind::Load }
        / "store" { WatchKind::Store }
    rule mem() = "memory" / "mem"
    rule dyn_command() -> ExecuteMode
        = "run" { ExecuteMode::Run }
        / "step" step:(__ n:number() { n })? { ExecuteMode::RunStep(RunStep::new(step)) }
    rule static_command() -> StaticCommand
        = "watch" kind:(__ k:watch_kind() { k })? __ addr:addr() {
            StaticCommand::Watch(Watch { kind: kind.unwrap_or(WatchKind::all()), addr })
        }
        / "unwatch" __ addr:addr() { StaticCommand::Unwatch(addr) }
        / "show" __ sk:show_kind() { StaticCommand::Show(sk) }
    rule show_kind() -> ShowKind
        = "set" __ index:number() { ShowKind::Set(index) }
        / mem() __ addr:addr() len:(__ n:number() { n })? { ShowKind::Memory(addr, len) }
        / "geometry" { ShowKind::Geometry }
        / "watch" "es"? { ShowKind::Watchings }
        / "stat" { ShowKind::Stat }
    pub(crate) rule parse_command() -> Command
        = _ s:static_command() _ { Command::Static(s) }
        / _ "exit" _ { Command::Exit }
        / _ d:dyn_command()? _ { Command::Dynamic(d) }
        / expected!("command")

    rule ws() = quiet!{[' ' | '\t' | '\r' | '\n']}
        / expected!("whitespace")
    rule _() = ws()*
    rule __() = ws()+
});

pub(crate) enum Command {
    Dynamic(Option<ExecuteMode>),
    Static(StaticCommand),
    Exit,
}

pub(crate) enum StaticCommand {
    Show(ShowKind),
    Watch(Watch),
    Unwatch(Addr),
}

pub(crate) enum ShowKind {
    Set(usize),
    Memory(Addr, Option<usize>),
    Geometry,
    Watchings,
    Stat,
}

#[derive(Debug)]
enum Progress {
    Paused,
    Watched(Watch),
    Finished,
}

/// replay accesses according to `opt.mode`, stopping early on a watch.
fn advance<R: BufRead, S: EventSink>(
    sim: &mut Simulator,
    trace: &mut TraceReader<R>,
    opt: &SimulationOption,
    sink: &mut S,
) -> Result<Progress> {
    let limit = match &opt.mode {
        ExecuteMode::Run => None,
        ExecuteMode::RunStep(s) => Some(s.get_step()),
    };
    let mut done = 0;
    let progress = loop {
        if limit.is_some_and(|l| done >= l) {
            break Progress::Paused;
        }
        let Some(access) = trace.next() else {
            break Progress::Finished;
        };
        let access = access?;
        let report = sim.access(&access)?;
        for event in report.events() {
            sink.emit(event)?;
        }
        done += 1;
        if let Some(w) = opt.watchings.triggered(sim.geometry(), &access) {
            break Progress::Watched(*w);
        }
    };
    sink.flush()?;
    Ok(progress)
}

fn show<W: Write>(
    out: &mut W,
    sim: &Simulator,
    opt: &SimulationOption,
    kind: ShowKind,
) -> io::Result<()> {
    match kind {
        ShowKind::Set(index) => match sim.cache().set(index) {
            Some(set) => {
                writeln!(
                    out,
                    "set {index}: {} of {} frames (oldest first)",
                    set.len(),
                    set.capacity()
                )?;
                for frame in set.frames() {
                    let addr = sim.geometry().recompose(frame.tag(), index);
                    let state = if frame.is_dirty() { "dirty" } else { "clean" };
                    writeln!(
                        out,
                        "  tag {:#x} @ {addr} {state} {}",
                        frame.tag(),
                        HexBytes(frame.block())
                    )?;
                }
            }
            None => writeln!(
                out,
                "no set {index}: the cache has {} sets",
                sim.cache().num_sets()
            )?,
        },
        ShowKind::Memory(addr, len) => {
            let len = len.unwrap_or(sim.geometry().block_size());
            match sim.memory().peek(addr, len) {
                Ok(bytes) => writeln!(out, "M[{addr}] == {}", HexBytes(bytes))?,
                Err(e) => writeln!(out, "{e}")?,
            }
        }
        ShowKind::Geometry => {
            writeln!(out, "{}", sim.geometry())?;
            writeln!(
                out,
                "{} of {} frames resident",
                sim.cache().resident(),
                sim.geometry().num_sets() * sim.geometry().associativity()
            )?;
        }
        ShowKind::Watchings => {
            if opt.watchings.is_empty() {
                writeln!(out, "nothing to watch.")?;
            } else {
                writeln!(
                    out,
                    "watching: {}",
                    opt.watchings
                        .iter()
                        .map(|w| format!("{w}"))
                        .collect::<Vec<_>>()
                        .join(", ")
                )?;
            }
        }
        #[cfg(feature = "stat")]
        ShowKind::Stat => {
            let width = crate::get_terminal_width().unwrap_or(60) as usize;
            writeln!(out, "{}", sim.collect_stat().view(width))?;
        }
        #[cfg(not(feature = "stat"))]
        ShowKind::Stat => {
            writeln!(out, "statistics unavailable; try compile with `--features stat`")?;
        }
    }
    Ok(())
}

/// events go to `sink`; prompts and inspection output go to stdout.
pub fn execute_interactive<R: BufRead, S: EventSink>(
    sim: &mut Simulator,
    mut trace: TraceReader<R>,
    mut sink: S,
) -> Result<()> {
    let mut opt = SimulationOption {
        mode: ExecuteMode::RunStep(RunStep::default()),
        ..Default::default()
    };
    println!("entering interactive.");
    'interactive: loop {
        let update_mode = 'input: loop {
            // prompt string
            match &opt.mode {
                ExecuteMode::Run => print!("run "),
                ExecuteMode::RunStep(n) => print!("step {} ", n.get_step()),
            }
            print!("#{} > ", sim.processed());
            stdout().flush()?;
            let mut str = String::new();
            if stdin().read_line(&mut str)? == 0 {
                break 'interactive;
            }
            let parsed = match command::parse_command(&str) {
                Ok(p) => p,
                Err(e) => {
                    println!("parse error: expected {}", e.expected);
                    continue;
                }
            };
            match parsed {
                Command::Dynamic(d) => {
                    break 'input d;
                }
                Command::Static(s) => {
                    match s {
                        StaticCommand::Show(kind) => show(&mut stdout(), sim, &opt, kind)?,
                        StaticCommand::Watch(w) => {
                            opt.watchings.add(w);
                            show(&mut stdout(), sim, &opt, ShowKind::Watchings)?;
                        }
                        StaticCommand::Unwatch(addr) => {
                            if !opt.watchings.remove(addr) {
                                println!("no watch on {addr}");
                            }
                            show(&mut stdout(), sim, &opt, ShowKind::Watchings)?;
                        }
                    }
                    continue 'input;
                }
                Command::Exit => {
                    break 'interactive;
                }
            }
        };
        if let Some(mode) = update_mode {
            println!("mode: {mode}");
            opt.mode = mode;
        }
        match advance(sim, &mut trace, &opt, &mut sink)? {
            Progress::Paused => (),
            Progress::Watched(w) => println!("stopped by watch on {w}"),
            Progress::Finished => println!("trace exhausted after {} accesses", sim.processed()),
        }
    }
    println!("exiting interactive.");
    Ok(())
}
