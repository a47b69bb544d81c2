//! Command-line interface for freview.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{self, ReviewConfig};
use crate::engine::Engine;
use crate::report::{self, Format};

/// Exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

/// Static review of Flask projects.
///
/// freview inspects a Flask / SQLAlchemy / Alembic project without running
/// it: the project layout, model definitions, routes and blueprints,
/// migrations and configuration modules.
#[derive(Parser)]
#[command(name = "freview")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Review a Flask project
    #[command(visible_alias = "check")]
    Review(ReviewArgs),
    /// Write a default .freview.toml into a project
    Init(InitArgs),
    /// List every rule with its default severity
    Rules,
}

/// Arguments for the review command.
#[derive(Parser)]
pub struct ReviewArgs {
    /// Project root to review
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Config file (default: auto-discover in the project root)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output format: pretty, json, or markdown
    #[arg(short, long, default_value = "pretty")]
    pub format: String,

    /// Skip the project structure analyzer
    #[arg(long)]
    pub skip_structure: bool,

    /// Skip the model analyzer
    #[arg(long)]
    pub skip_models: bool,

    /// Skip the route and blueprint analyzer
    #[arg(long)]
    pub skip_api: bool,

    /// Skip the migration and configuration analyzer
    #[arg(long)]
    pub skip_database: bool,

    /// Rule identifier to skip (repeatable)
    #[arg(long = "skip-check", value_name = "ID")]
    pub skip_checks: Vec<String>,
}

/// Arguments for the init command.
#[derive(Parser)]
pub struct InitArgs {
    /// Project root to write the config into
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

impl ReviewArgs {
    /// Layer command-line switches over a loaded config.
    pub fn apply(&self, config: &mut ReviewConfig) {
        config.skip_structure |= self.skip_structure;
        config.skip_models |= self.skip_models;
        config.skip_api |= self.skip_api;
        config.skip_database |= self.skip_database;
        config.skip_checks.extend(self.skip_checks.iter().cloned());
    }
}

/// Run the review command.
pub fn run_review(args: &ReviewArgs) -> anyhow::Result<i32> {
    let format: Format = match args.format.parse() {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(EXIT_ERROR);
        }
    };

    if !args.path.is_dir() {
        eprintln!("Error: not a directory: {}", args.path.display());
        return Ok(EXIT_ERROR);
    }

    // Explicit config file, else discovery in the project root
    let loaded = match &args.config {
        Some(path) => ReviewConfig::parse_file(path).map(|c| (c, Some(path.clone()))),
        None => ReviewConfig::load(&args.path),
    };
    let (mut review_config, config_path) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(EXIT_ERROR);
        }
    };
    args.apply(&mut review_config);

    let engine = match Engine::new(&review_config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error: invalid configuration: {}", e);
            return Ok(EXIT_ERROR);
        }
    };

    let report = engine.run(&args.path);

    let path_str = args.path.to_string_lossy().to_string();
    let config_str = config_path.map(|p| p.to_string_lossy().to_string());

    match format {
        Format::Json => report::write_json(&path_str, config_str.as_deref(), &report)?,
        Format::Markdown => report::write_markdown(&path_str, &report),
        Format::Pretty => report::write_pretty(&path_str, config_str.as_deref(), &report),
    }

    if report.has_blocking_errors {
        Ok(EXIT_FAILED)
    } else {
        Ok(EXIT_SUCCESS)
    }
}

/// Run the init command.
pub fn run_init(args: &InitArgs) -> anyhow::Result<i32> {
    if !args.path.is_dir() {
        eprintln!("Error: not a directory: {}", args.path.display());
        return Ok(EXIT_ERROR);
    }

    let path = match config::create_default_config(&args.path) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(EXIT_ERROR);
        }
    };

    println!("Created {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit {} to match your project layout", path.display());
    println!("  2. Run: freview review {}", args.path.display());

    Ok(EXIT_SUCCESS)
}

/// Run the rules command.
pub fn run_rules() -> anyhow::Result<i32> {
    report::write_rules();
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_review_args() {
        let cli = parse(&[
            "freview",
            "review",
            "proj",
            "--format",
            "json",
            "--skip-api",
            "--skip-check",
            "model_missing_repr",
            "--skip-check",
            "route_missing_docstring",
        ]);
        let Commands::Review(args) = cli.command else {
            panic!("expected review");
        };
        assert_eq!(args.path, PathBuf::from("proj"));
        assert_eq!(args.format, "json");

        let mut config = ReviewConfig::default();
        args.apply(&mut config);
        assert!(config.skip_api);
        assert!(!config.skip_models);
        assert!(config.skip_checks.contains("model_missing_repr"));
        assert!(config.skip_checks.contains("route_missing_docstring"));
    }

    #[test]
    fn test_unknown_skip_check_is_usage_error() {
        let temp = TempDir::new().unwrap();
        let cli = parse(&[
            "freview",
            "review",
            temp.path().to_str().unwrap(),
            "--skip-check",
            "bogus",
        ]);
        let Commands::Review(args) = cli.command else {
            panic!("expected review");
        };
        assert_eq!(run_review(&args).unwrap(), EXIT_ERROR);
    }

    #[test]
    fn test_bad_format_is_usage_error() {
        let temp = TempDir::new().unwrap();
        let args = ReviewArgs {
            path: temp.path().to_path_buf(),
            config: None,
            format: "sarif".into(),
            skip_structure: false,
            skip_models: false,
            skip_api: false,
            skip_database: false,
            skip_checks: Vec::new(),
        };
        assert_eq!(run_review(&args).unwrap(), EXIT_ERROR);
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let temp = TempDir::new().unwrap();
        let args = InitArgs {
            path: temp.path().to_path_buf(),
        };
        assert_eq!(run_init(&args).unwrap(), EXIT_SUCCESS);
        assert!(temp.path().join(".freview.toml").is_file());
        assert_eq!(run_init(&args).unwrap(), EXIT_ERROR);
    }
}
