// `coedit config` — print the effective configuration.

use anyhow::Context;
use clap::Args;

use coedit_sync::config::SyncConfig;

use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Force JSON output.
    #[arg(long)]
    json: bool,
}

pub fn run(args: ConfigArgs) -> anyhow::Result<()> {
    let config = SyncConfig::load();
    let human = config.to_toml().context("failed to render config")?;
    let format = OutputFormat::detect(args.json);
    output::print_output(format, &config, |_| human.trim_end().to_string())?;
    Ok(())
}
