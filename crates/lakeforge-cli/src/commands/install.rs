//! Install command - run one orchestrator invocation
//!
//! Each invocation probes the installation, runs at most one phase and
//! reports the outcome. Invoke again to continue.

use std::process::ExitCode;

use clap::Args;
use tracing::info;

use lakeforge_install::{run_phase, Phase};

use super::StackArgs;
use crate::output;
use crate::Result;

/// Run the next unsatisfied phase, or the one named with `--phase`
#[derive(Args, Debug)]
pub struct InstallArgs {
    #[command(flatten)]
    pub stack: StackArgs,

    /// Phase to run (default: first unsatisfied phase)
    #[arg(long)]
    pub phase: Option<Phase>,

    /// Approve mutations; without it the phase plan is printed instead
    #[arg(long)]
    pub approve: bool,
}

/// Run the install command
pub async fn run(args: InstallArgs) -> Result<ExitCode> {
    let config = args.stack.load_config()?;
    info!(cluster = %config.cluster.name, phase = ?args.phase, approve = args.approve, "starting install");

    let ctx = lakeforge_backend::install_context(config, args.stack.kubeconfig.clone(), args.approve)?;
    let result = run_phase(&ctx, args.phase).await;

    println!("{}", output::render_result(&result, args.stack.output)?);
    Ok(ExitCode::from(output::exit_code(result.status)))
}
