use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

use crate::ui;

#[derive(Parser)]
#[command(name = "keel")]
#[command(version)]
#[command(about = "Declarative infrastructure reconciler", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Project directory holding the declarations
    #[arg(short = 'C', long = "directory", global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// State file (default: <project>/.keel/state.json)
    #[arg(long, global = true, value_name = "FILE")]
    pub state: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check the declarations and their dependency graph
    Validate(VarArgs),

    /// Show what apply would change
    Plan(PlanArgs),

    /// Converge infrastructure on the declarations
    Apply(ApplyArgs),

    /// Tear down everything recorded in state
    Destroy(DestroyArgs),

    /// Report drift between state and real infrastructure
    Refresh(RefreshArgs),

    /// Show outputs recorded by the last apply
    Output(OutputArgs),

    /// Print the dependency graph in DOT format
    Graph(VarArgs),

    /// Inspect or edit the state file
    #[command(subcommand)]
    State(StateCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Shared Arguments
// ============================================================================

#[derive(Args, Debug, Default, Clone)]
pub struct VarArgs {
    /// Set a variable (name=value)
    #[arg(long = "var", value_name = "NAME=VALUE")]
    pub vars: Vec<String>,

    /// Load variables from a TOML file
    #[arg(long = "var-file", value_name = "FILE")]
    pub var_files: Vec<PathBuf>,
}

#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Concurrent provider operations
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Limit for each provider operation (e.g. 90s, 20m)
    #[arg(long, value_parser = ui::parse_duration, value_name = "DURATION")]
    pub timeout: Option<Duration>,
}

// ============================================================================
// Plan / Apply / Destroy
// ============================================================================

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Read resources back before planning
    #[arg(long)]
    pub refresh: bool,

    /// Plan the destruction of everything in state
    #[arg(long)]
    pub destroy: bool,

    /// Save the plan so apply can run exactly it
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,

    /// Limit for each refresh read
    #[arg(long, value_parser = ui::parse_duration, value_name = "DURATION")]
    pub timeout: Option<Duration>,

    #[command(flatten)]
    pub vars: VarArgs,
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Plan file written by `keel plan --out`
    pub plan_file: Option<PathBuf>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Allow replacing or destroying data-bearing resources
    #[arg(long)]
    pub allow_destructive: bool,

    /// Read resources back before planning
    #[arg(long)]
    pub refresh: bool,

    #[command(flatten)]
    pub run: RunArgs,

    #[command(flatten)]
    pub vars: VarArgs,
}

#[derive(Args, Debug)]
pub struct DestroyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Allow destroying data-bearing resources
    #[arg(long)]
    pub allow_destructive: bool,

    #[command(flatten)]
    pub run: RunArgs,

    #[command(flatten)]
    pub vars: VarArgs,
}

#[derive(Args, Debug)]
pub struct RefreshArgs {
    /// Limit for each read
    #[arg(long, value_parser = ui::parse_duration, value_name = "DURATION")]
    pub timeout: Option<Duration>,

    /// Print drift as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub vars: VarArgs,
}

// ============================================================================
// Outputs
// ============================================================================

#[derive(Args, Debug)]
pub struct OutputArgs {
    /// Print a single output
    pub name: Option<String>,

    /// Show sensitive values
    #[arg(long)]
    pub show_sensitive: bool,

    /// Print outputs as JSON
    #[arg(long)]
    pub json: bool,
}

// ============================================================================
// State Commands
// ============================================================================

#[derive(Subcommand)]
pub enum StateCommand {
    /// List resources in state
    List,

    /// Show the recorded attributes of a resource
    Show {
        /// Resource address (type.name)
        id: String,
    },

    /// Forget resources without deleting them
    Rm {
        /// Resource addresses (type.name)
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_flags() {
        let cli = Cli::try_parse_from([
            "keel",
            "-C",
            "demos/gpu-platform",
            "apply",
            "plan.json",
            "--yes",
            "-j",
            "8",
            "--timeout",
            "30m",
            "--var",
            "project=acme",
        ])
        .unwrap();
        assert_eq!(cli.directory, Some(PathBuf::from("demos/gpu-platform")));
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(args.plan_file, Some(PathBuf::from("plan.json")));
        assert!(args.yes);
        assert_eq!(args.run.jobs, Some(8));
        assert_eq!(args.run.timeout, Some(Duration::from_secs(30 * 60)));
        assert_eq!(args.vars.vars, vec!["project=acme"]);
    }

    #[test]
    fn test_state_rm_requires_ids() {
        assert!(Cli::try_parse_from(["keel", "state", "rm"]).is_err());
    }
}
