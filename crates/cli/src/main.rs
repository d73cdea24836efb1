//! gpulab: practice datacenter GPU operations against a simulated cluster.

use clap::Parser;
use colored::Colorize;
use gpulab_session::{Session, SessionConfig, SessionOutput};
use gpulab_validation::ScenarioRun;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "gpulab")]
#[command(about = "Simulated DGX cluster terminal for GPU operations training")]
#[command(version)]
struct Cli {
    /// Run these commands and exit instead of starting a prompt (repeatable)
    #[arg(short = 'c', long = "command")]
    commands: Vec<String>,

    /// Scenario TOML file to load
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Session config TOML file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed for sensor jitter and random faults
    #[arg(long)]
    seed: Option<u64>,

    /// Inject this many random practice faults at start
    #[arg(long, default_value = "0")]
    random_fault: u32,

    /// Log filter when RUST_LOG is unset (e.g. "info", "gpulab_validation=debug")
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only simulated tool output.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(seed) = cli.seed {
        config = config.with_seed(seed);
    }

    let mut session = Session::new(config)?;
    start(&mut session, &cli)?;

    if !cli.commands.is_empty() {
        let mut last_exit = 0;
        for line in &cli.commands {
            let out = session.execute(line);
            last_exit = out.result.exit_code;
            report(&out, session.scenario_run());
        }
        if last_exit != 0 {
            std::process::exit(last_exit);
        }
        return Ok(());
    }

    repl(&mut session, &cli)
}

/// Load the scenario and practice faults requested on the command line.
fn start(session: &mut Session, cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(path) = &cli.scenario {
        session.load_scenario_file(path)?;
        if let Some(run) = session.scenario_run() {
            let scenario = run.scenario();
            println!("{} {}", "Scenario:".bold(), scenario.title);
            if !scenario.description.is_empty() {
                println!("{}", scenario.description);
            }
            print_step(run);
        }
    }
    for _ in 0..cli.random_fault {
        if let Some(fault) = session.inject_random_fault()? {
            info!(fault = %fault.describe(), "Practice fault injected");
        }
    }
    Ok(())
}

fn repl(session: &mut Session, cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut rl = DefaultEditor::new()?;

    loop {
        let line = match rl.readline(&session.prompt().green().bold().to_string()) {
            Ok(line) => line,
            Err(ReadlineError::Eof | ReadlineError::Interrupted) => {
                println!();
                break;
            }
            Err(err) => return Err(err.into()),
        };
        let action = LineAction::of(&line);
        if action != LineAction::Blank {
            rl.add_history_entry(line.as_str())?;
        }
        match action {
            LineAction::Exit => break,
            LineAction::Reset => {
                session.reset();
                start(session, cli)?;
                println!("Cluster reset.");
            }
            LineAction::Blank => {}
            LineAction::Run => {
                let out = session.execute(&line);
                report(&out, session.scenario_run());
            }
        }
    }
    Ok(())
}

/// What the prompt does with one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineAction {
    Blank,
    Exit,
    Reset,
    Run,
}

impl LineAction {
    fn of(line: &str) -> Self {
        match line.trim() {
            "" => LineAction::Blank,
            "exit" | "quit" | "logout" => LineAction::Exit,
            "reset" => LineAction::Reset,
            _ => LineAction::Run,
        }
    }
}

/// Print command output and any grading feedback.
fn report(out: &SessionOutput, run: Option<&ScenarioRun>) {
    print!("{}", out.result.output);

    let Some(progress) = &out.progress else {
        return;
    };
    if progress.advanced {
        println!("{} step '{}' complete", "PASS".green().bold(), progress.step_id);
        if progress.finished {
            println!("{}", "Scenario complete.".green().bold());
        } else if let Some(run) = run {
            print_step(run);
        }
        return;
    }
    for failure in progress.evaluation.failures() {
        println!("{} {}", "FAIL".red().bold(), failure.message.dimmed());
    }
}

fn print_step(run: &ScenarioRun) {
    if let Some(step) = run.current_step() {
        println!(
            "{} {}/{}: {}",
            "Step".cyan().bold(),
            run.step_index() + 1,
            run.total_steps(),
            step.title
        );
        if !step.objective.is_empty() {
            println!("  {}", step.objective);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_actions() {
        assert_eq!(LineAction::of("   "), LineAction::Blank);
        assert_eq!(LineAction::of("exit"), LineAction::Exit);
        assert_eq!(LineAction::of(" logout "), LineAction::Exit);
        assert_eq!(LineAction::of("reset"), LineAction::Reset);
        assert_eq!(LineAction::of("nvidia-smi -q"), LineAction::Run);
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from(["gpulab", "-c", "hostname", "-c", "sinfo", "--seed", "7"]);
        assert_eq!(cli.commands, vec!["hostname", "sinfo"]);
        assert_eq!(cli.seed, Some(7));
        assert_eq!(cli.random_fault, 0);
        assert_eq!(cli.log_level, "warn");
    }
}
