use std::path::PathBuf;

/// Returns a [PathBuf] to the directory where steward's host-side configuration should live,
/// e.g. the default secret store.
///
/// When compiled for testing, this returns `CARGO_MANIFEST_DIR` plus `resources/etc/steward`.
/// Otherwise, it returns `/etc/steward`.
pub fn config_dir() -> PathBuf {
    // Omit the leading slash so that PathBuf::push appends instead of replacing.
    const CONFIG_DIR: &str = "etc/steward";

    let mut path = PathBuf::new();

    #[cfg(test)]
    {
        path.push(env!("CARGO_MANIFEST_DIR"));
        path.push("resources");
    }

    path.push(CONFIG_DIR);
    path
}
