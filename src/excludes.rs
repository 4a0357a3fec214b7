use std::path::{Path, PathBuf};

/// Global exclude list, applied to every environment
pub const GLOBAL_EXCLUDE_FILE: &str = "rsync_exclude.txt";

/// File name of the exclude list for a single environment
pub fn environment_exclude_file(env: &str) -> String {
    format!("rsync_exclude_{env}.txt")
}

/// Find the exclude files present under `config_root`.
///
/// Returns the global list first, then the environment list; either may be
/// missing. Relative roots are resolved against the current directory.
pub fn resolve_exclude_files(config_root: &Path, env: &str) -> Vec<PathBuf> {
    let root = absolute_root(config_root);

    [GLOBAL_EXCLUDE_FILE.to_string(), environment_exclude_file(env)]
        .into_iter()
        .map(|name| root.join(name))
        .filter(|path| path.is_file())
        .collect()
}

fn absolute_root(config_root: &Path) -> PathBuf {
    if config_root.is_absolute() {
        return config_root.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(config_root))
        .unwrap_or_else(|_| config_root.to_path_buf())
}
