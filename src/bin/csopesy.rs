//! csopesy - interactive shell over the emulator core.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use csopesy::{parse_program, Config, Error, ProcessView, Scheduler};

#[derive(Debug, Parser)]
#[command(name = "csopesy", version)]
struct Opts {
    /// Path to the configuration file read by `initialize`.
    #[clap(long, default_value = "config.txt")]
    config: PathBuf,

    /// Enable verbose output. Specify multiple times to increase verbosity.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    let llv = match opts.verbose {
        0 => simplelog::LevelFilter::Warn,
        1 => simplelog::LevelFilter::Info,
        2 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        llv,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::Relaxed);
    })
    .context("Failed to set Ctrl-C handler")?;

    repl(&opts, &shutdown)
}

fn greeting() {
    println!("Welcome to the CSOPESY commandline!");
    println!("Type 'initialize' to load the configuration, 'exit' to quit.");
}

fn repl(opts: &Opts, shutdown: &AtomicBool) -> Result<()> {
    let mut sched: Option<Scheduler> = None;
    let stdin = io::stdin();

    greeting();
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        print!("\n> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let line = line.trim();
        let command = line.split_whitespace().next().unwrap_or("");

        match command {
            "" => continue,
            "exit" => break,
            "clear" => {
                print!("\x1b[2J\x1b[1;1H");
                greeting();
            }
            "initialize" => match initialize(&opts.config) {
                Ok(new_sched) => {
                    if let Some(mut old) = sched.replace(new_sched) {
                        old.shutdown();
                    }
                }
                Err(e) => println!("{e}"),
            },
            _ => {
                let Some(sched) = sched.as_mut() else {
                    println!("{}", Error::NotInitialized);
                    continue;
                };
                if let Err(e) = dispatch_command(sched, command, line) {
                    println!("{e}");
                }
            }
        }
    }

    if let Some(mut sched) = sched.take() {
        sched.shutdown();
    }
    Ok(())
}

fn initialize(path: &std::path::Path) -> Result<Scheduler> {
    let config = Config::load(path).with_context(|| format!("loading {}", path.display()))?;
    config
        .validate()
        .map_err(|reason| anyhow::anyhow!("invalid configuration: {reason}"))?;

    println!("Configuration loaded:");
    println!("- num-cpu: {}", config.num_cpu);
    println!("- scheduler: {}", config.scheduler);
    println!("- quantum-cycles: {}", config.quantum_cycles);
    println!("- batch-process-freq: {}", config.batch_process_freq);
    println!("- min-ins / max-ins: {} / {}", config.min_ins, config.max_ins);
    println!("- delay-per-exec: {}", config.delay_per_exec);
    println!("- max-overall-mem: {}", config.max_overall_mem);
    println!("- mem-per-frame: {}", config.mem_per_frame);
    println!(
        "- mem-per-proc: {} .. {}",
        config.min_mem_per_proc, config.max_mem_per_proc
    );

    Ok(Scheduler::new(config)?)
}

fn dispatch_command(sched: &mut Scheduler, command: &str, line: &str) -> Result<()> {
    match command {
        "scheduler-test" => {
            sched.start();
            println!("Scheduler started.");
        }
        "scheduler-stop" => {
            sched.stop_generation();
            println!("Scheduler stopped.");
        }
        "report-util" => {
            let path = sched.report_util("csopesy-log.txt")?;
            println!("Report generated at: {}", path.display());
        }
        "vmstat" => {
            if line.split_whitespace().any(|t| t == "--json") {
                println!("{}", serde_json::to_string_pretty(&sched.snapshot())?);
            } else {
                println!("{}", sched.snapshot());
            }
        }
        "process-smi" => {
            print!("{}", sched.utilization_report());
            print!("{}", sched.memory_map());
        }
        "screen" => handle_screen(sched, line)?,
        other => println!("Unknown command: {other}"),
    }
    Ok(())
}

fn handle_screen(sched: &mut Scheduler, line: &str) -> Result<()> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.get(1).copied() {
        Some("-ls") => print!("{}", sched.utilization_report()),
        Some("-s") => {
            let (name, size) = screen_name_and_size(&tokens)?;
            sched.add_process_with_size(name, size)?;
            println!("Created process {name} ({size} bytes).");
        }
        Some("-c") => {
            let (name, size) = screen_name_and_size(&tokens)?;
            let program = quoted_payload(line).ok_or_else(|| {
                anyhow::anyhow!("usage: screen -c <name> <size> \"<instructions>\"")
            })?;
            let instructions = parse_program(program)?;
            sched.add_process_with_memory(name, size, instructions)?;
            println!("Created process {name} ({size} bytes).");
        }
        Some("-r") => {
            let name = tokens
                .get(2)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("usage: screen -r <name>"))?;
            match sched.process_info(name) {
                Some(view) => print_process(&view),
                None => println!("No process named {name:?} found."),
            }
        }
        _ => println!(
            "Invalid screen usage. Try: screen -s <name> <size>, \
             screen -c <name> <size> \"<instrs>\", screen -r <name>, or screen -ls"
        ),
    }
    Ok(())
}

fn screen_name_and_size<'a>(tokens: &[&'a str]) -> Result<(&'a str, usize)> {
    let name = tokens
        .get(2)
        .copied()
        .ok_or_else(|| anyhow::anyhow!("missing process name"))?;
    let size = tokens
        .get(3)
        .copied()
        .ok_or_else(|| anyhow::anyhow!("missing memory size"))?
        .parse()
        .context("memory size must be an integer")?;
    Ok((name, size))
}

/// The text between the first and last double quote on the line.
fn quoted_payload(line: &str) -> Option<&str> {
    let start = line.find('"')?;
    let end = line.rfind('"')?;
    (end > start).then(|| &line[start + 1..end])
}

fn print_process(view: &ProcessView) {
    println!("Process name : {}", view.name);
    println!("ID           : {}", view.id);
    println!("State        : {}", view.state);
    if let Some(core) = view.core {
        println!("Core         : {core}");
    }
    println!("Progress     : {} / {}", view.executed, view.total);
    println!("Memory       : {} bytes", view.mem_required);
    println!("Logs:");
    for line in &view.log {
        println!("  {line}");
    }
    if view.finished_at.is_some() {
        println!("Finished!");
    }
}
