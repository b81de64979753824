//! Config loading entry points.

use super::merge::merge_policy;
use super::sources::{environment, global_file, workspace_file};
use super::StackConfig;
use crate::error::ConfigError;
use config::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Loads [`StackConfig`] from layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a project rooted at `root`.
    ///
    /// Later sources win: merge-policy defaults, the user config file, the
    /// project's `config/config.toml`, `config/{STORESTACK_ENV}.toml`, then
    /// `STORESTACK__*` environment variables.
    pub fn load(root: &Path) -> Result<StackConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, root)?;
        let builder = environment::add_to_builder(builder);

        let config: StackConfig = builder.build()?.try_deserialize()?;
        debug!(root = %root.display(), store = ?config.store.kind, "Loaded configuration");
        Ok(config)
    }

    /// Load a single config file over the defaults. No other sources apply.
    pub fn load_from_file(path: &Path) -> Result<StackConfig, ConfigError> {
        let config = merge_policy::builder_with_defaults()?
            .add_source(File::from(path).required(true))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Where the user config file is looked up.
    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }
}

