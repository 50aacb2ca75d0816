//! CLI argument parsing.

use std::path::PathBuf;

use argh::FromArgs;

#[derive(Clone, Debug, FromArgs)]
#[argh(description = "BTC staking indexer daemon")]
pub(crate) struct Args {
    #[argh(option, short = 'c', description = "path to configuration toml")]
    pub config: PathBuf,

    /// Overrides `db_path` from the config.
    #[argh(option, short = 'd', description = "datadir path for the database")]
    pub datadir: Option<PathBuf>,

    /// Overrides `params_file_path` from the config.
    #[argh(option, description = "staking params file")]
    pub params: Option<PathBuf>,

    /// Overrides `start_height_override`; forces a backfill from this
    /// height.
    #[argh(option, description = "start height for forced backfill")]
    pub start_height: Option<u64>,
}
