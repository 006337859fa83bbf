use crate::cli::RunArgs;
use crate::Context;
use anyhow::Result;

// Declared so the CLI surface is complete; the destroy walk is wired
// through the engine but not exposed yet.
// TODO: route through ExecutionKind::Destroy once ordering is reversed
// (children must be torn down before the steps that produced their inputs).
pub fn run(_ctx: &Context, _args: &RunArgs) -> Result<()> {
    anyhow::bail!("destroy is not implemented yet");
}
