pub mod apply;
pub mod destroy;
pub mod graph;
pub mod output;
pub mod plan;
pub mod refresh;
pub mod state;
pub mod validate;

use crate::cli::VarArgs;
use crate::schema::VariableInputs;

/// Variable inputs from `--var` and `--var-file`
pub fn var_inputs(args: &VarArgs) -> VariableInputs {
    VariableInputs {
        assignments: args.vars.clone(),
        files: args.var_files.clone(),
    }
}
