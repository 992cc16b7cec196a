mod cli;
mod commands;
mod config;
mod engine;
mod paths;
mod progress;
mod providers;
mod runner;
mod schema;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// `-C` directory
    pub project: Option<PathBuf>,
    /// `--state` file
    pub state: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        project: cli.directory,
        state: cli.state,
    };

    match run(&ctx, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ui::error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

fn run(ctx: &Context, command: Command) -> Result<()> {
    match command {
        Command::Validate(vars) => commands::validate::run(ctx, &vars),
        Command::Plan(args) => commands::plan::run(ctx, &args),
        Command::Apply(args) => commands::apply::run(ctx, &args),
        Command::Destroy(args) => commands::destroy::run(ctx, &args),
        Command::Refresh(args) => commands::refresh::run(ctx, &args),
        Command::Output(args) => commands::output::run(ctx, &args),
        Command::Graph(vars) => commands::graph::run(ctx, &vars),
        Command::State(cmd) => commands::state::run(ctx, cmd),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "keel", &mut io::stdout());
            Ok(())
        }
    }
}
