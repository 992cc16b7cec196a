use anyhow::Result;

use crate::Context;
use crate::cli::VarArgs;
use crate::engine::Workspace;

pub fn run(ctx: &Context, vars: &VarArgs) -> Result<()> {
    let ws = Workspace::load(ctx, &super::var_inputs(vars))?;
    print!("{}", ws.graph.to_dot());
    Ok(())
}
