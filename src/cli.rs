use clap::{Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "caravela")]
#[command(version)]
#[command(about = "Declarative deployment orchestration for module graphs", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy a service at a profile (e.g. `caravela run services/web :dev`)
    Run(RunArgs),

    /// Tear down a service deployed at a profile
    Destroy(RunArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct RunArgs {
    /// Path of the service module, relative to the project root
    pub service: String,

    /// Profile to resolve, written as `:<name>`
    #[arg(value_name = ":PROFILE")]
    pub profile: String,

    /// Project root (defaults to the current directory)
    #[arg(short, long)]
    pub dir: Option<String>,
}

impl RunArgs {
    /// The profile name with its leading `:` sigil removed.
    pub fn profile_name(&self) -> &str {
        self.profile.strip_prefix(':').unwrap_or(&self.profile)
    }
}
