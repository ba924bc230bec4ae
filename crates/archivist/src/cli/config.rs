//! `--print-config` and `--init-config`.

use std::path::Path;

use archivist_core::Config;

/// Print the effective configuration as TOML.
pub fn print(config: &Config) -> anyhow::Result<()> {
    let toml = config.to_toml()?;
    println!("{}", toml);
    Ok(())
}

/// Write a default config file to `path`.
pub fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists at: {}\nUse --force to overwrite.",
            path.display()
        );
    }

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let toml = Config::default().to_toml()?;
    std::fs::write(path, toml)?;

    println!("Configuration initialized at: {}", path.display());
    Ok(())
}
