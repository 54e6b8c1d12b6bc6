//! Stream workloads phase.

use lakeforge_common::Error;

use crate::context::InstallContext;

use super::{release_group, PhaseOutcome};

pub(super) async fn execute(ctx: &InstallContext, outcome: &mut PhaseOutcome) -> Result<(), Error> {
    release_group::install(ctx, outcome, &ctx.config.stream).await;
    Ok(())
}
