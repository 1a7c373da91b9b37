// CLI subcommand dispatch.

use clap::Subcommand;

pub mod config;
pub mod join;

#[derive(Subcommand)]
pub enum Command {
    /// Join a room and follow its document and participants
    Join(join::JoinArgs),
    /// Print the effective configuration
    Config(config::ConfigArgs),
}

pub fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Join(args) => join::run(args),
        Command::Config(args) => config::run(args),
    }
}
