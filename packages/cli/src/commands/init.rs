use crate::config::{Config, DEFAULT_CONFIG_NAME};
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::fs;

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Number of clients `canopy simulate` starts
    #[arg(short, long)]
    pub clients: Option<usize>,

    /// Seed for the simulation's random ops
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Force overwrite existing config
    #[arg(short, long)]
    pub force: bool,
}

pub fn init(args: InitArgs, cwd: &str) -> Result<()> {
    let config_path = Config::path(cwd);

    if config_path.exists() && !args.force {
        println!(
            "{} {} already exists",
            "⚠️".yellow(),
            DEFAULT_CONFIG_NAME.bright_white()
        );
        println!("Use --force to overwrite");
        return Ok(());
    }

    let mut config = Config::default();
    if let Some(clients) = args.clients {
        config.simulation.clients = clients;
    }
    if let Some(seed) = args.seed {
        config.simulation.seed = seed;
    }

    let config_json = serde_json::to_string_pretty(&config)?;
    fs::write(&config_path, config_json)?;

    println!("  {} Created {}", "✓".green(), DEFAULT_CONFIG_NAME);
    println!();
    println!("Next steps:");
    println!("  1. Run: canopy simulate");
    println!("  2. Run: canopy inspect <snapshot.json>");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(force: bool) -> InitArgs {
        InitArgs {
            clients: Some(4),
            seed: None,
            force,
        }
    }

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = dir.path().display().to_string();
        init(args(false), &cwd).unwrap();

        let config = Config::load(&cwd).unwrap();
        assert_eq!(config.simulation.clients, 4);
        assert_eq!(config.simulation.seed, 42);
    }

    #[test]
    fn test_init_keeps_existing_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = dir.path().display().to_string();
        fs::write(Config::path(&cwd), "{}").unwrap();

        init(args(false), &cwd).unwrap();
        assert_eq!(fs::read_to_string(Config::path(&cwd)).unwrap(), "{}");

        init(args(true), &cwd).unwrap();
        assert_eq!(Config::load(&cwd).unwrap().simulation.clients, 4);
    }
}
