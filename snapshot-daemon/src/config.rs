use snapshot_engine::Config;
use std::path::{Path, PathBuf};

/// Looked up in the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "snapshot.toml";

/// Load the TOML config (explicit path, else `./snapshot.toml`, else
/// built-in defaults), then layer `.env` and process environment overrides.
pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    let _ = dotenvy::dotenv();

    let mut config = match resolve_path(path) {
        Some(path) => Config::from_file(&path)
            .map_err(|e| anyhow::anyhow!("failed to load {}: {}", path.display(), e))?,
        None => Config::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}

fn resolve_path(path: Option<&Path>) -> Option<PathBuf> {
    match path {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.exists().then_some(default)
        }
    }
}
