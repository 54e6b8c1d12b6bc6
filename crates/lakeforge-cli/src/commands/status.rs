//! Status command - probe every phase without mutating anything

use std::process::ExitCode;

use clap::Args;

use lakeforge_install::probe_state;

use super::StackArgs;
use crate::output;
use crate::Result;

/// Show the installation state
#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub stack: StackArgs,
}

/// Run the status command
pub async fn run(args: StatusArgs) -> Result<ExitCode> {
    let config = args.stack.load_config()?;
    let ctx = lakeforge_backend::install_context(config, args.stack.kubeconfig.clone(), false)?;
    let state = probe_state(&ctx).await?;

    println!("{}", output::render_state(&state, args.stack.output)?);
    Ok(ExitCode::SUCCESS)
}
