//! Build automation tasks for the sluice workspace.
//!
//! Run with `cargo xtask <command>`. Every check runs against the two
//! feature sets sluice ships: the default build and the `otel` gauges.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use xshell::{Shell, cmd};

/// Crates that forward the `otel` feature.
const OTEL_CRATES: &[&str] = &["sluice-pool", "sluice-postgres", "sluice-cli"];

/// Environment tags understood by the configuration resolver.
const ENVIRONMENTS: &[&str] = &["production", "staging", "test", "development"];

#[derive(Parser)]
#[command(name = "xtask", about = "Build automation for sluice")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum Features {
    /// Default features only
    Default,
    /// With the `otel` feature
    Otel,
    /// Both of the above
    #[default]
    Matrix,
}

impl Features {
    fn sets(self) -> &'static [bool] {
        match self {
            Self::Default => &[false],
            Self::Otel => &[true],
            Self::Matrix => &[false, true],
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run all checks (format, lint, test matrix, docs)
    Ci,
    /// Run cargo fmt --check
    Fmt,
    /// Run clippy over the feature matrix
    Clippy,
    /// Run tests, optionally for a single crate
    Test {
        /// Crate to test, e.g. `sluice-pool`
        #[arg(short, long)]
        package: Option<String>,
        /// Feature sets to test
        #[arg(long, value_enum, default_value_t)]
        features: Features,
    },
    /// Print the resolved pool configuration of every environment
    Configs,
    /// Generate documentation
    Doc,
    /// Clean build artifacts
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    sh.change_dir(workspace_root()?);

    match cli.command {
        Command::Ci => {
            println!("Running CI checks...");
            fmt(&sh)?;
            clippy(&sh)?;
            test(&sh, None, Features::Matrix)?;
            doc(&sh)?;
            println!("All CI checks passed!");
        }
        Command::Fmt => fmt(&sh)?,
        Command::Clippy => clippy(&sh)?,
        Command::Test { package, features } => test(&sh, package.as_deref(), features)?,
        Command::Configs => configs(&sh)?,
        Command::Doc => doc(&sh)?,
        Command::Clean => clean(&sh)?,
    }

    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("failed to run cargo locate-project")?;

    let path = String::from_utf8(output.stdout)
        .context("invalid UTF-8 in cargo output")?
        .trim()
        .to_string();

    Ok(PathBuf::from(path)
        .parent()
        .context("failed to get workspace root")?
        .to_path_buf())
}

/// `--features` arguments enabling `otel` on every crate that has it.
fn otel_args() -> Vec<String> {
    let features = OTEL_CRATES
        .iter()
        .map(|krate| format!("{krate}/otel"))
        .collect::<Vec<_>>()
        .join(",");
    vec!["--features".to_string(), features]
}

fn fmt(sh: &Shell) -> Result<()> {
    println!("Checking formatting...");
    cmd!(sh, "cargo fmt --all -- --check").run()?;
    println!("Formatting check passed.");
    Ok(())
}

fn clippy(sh: &Shell) -> Result<()> {
    for &otel in Features::Matrix.sets() {
        let extra = if otel { otel_args() } else { Vec::new() };
        println!("Running clippy (otel: {otel})...");
        cmd!(sh, "cargo clippy --workspace --all-targets {extra...} -- -D warnings").run()?;
    }
    println!("Clippy check passed.");
    Ok(())
}

fn test(sh: &Shell, package: Option<&str>, features: Features) -> Result<()> {
    for &otel in features.sets() {
        match package {
            Some(package) => {
                let extra = if otel && OTEL_CRATES.contains(&package) {
                    vec!["--features".to_string(), "otel".to_string()]
                } else if otel {
                    println!("{package} has no otel feature, skipping");
                    continue;
                } else {
                    Vec::new()
                };
                println!("Running tests for {package} (otel: {otel})...");
                cmd!(sh, "cargo test -p {package} {extra...}")
                    .run()
                    .with_context(|| format!("tests failed for {package}"))?;
            }
            None => {
                let extra = if otel { otel_args() } else { Vec::new() };
                println!("Running tests (otel: {otel})...");
                cmd!(sh, "cargo test --workspace {extra...}").run()?;
            }
        }
    }
    println!("All tests passed.");
    Ok(())
}

fn configs(sh: &Shell) -> Result<()> {
    for env in ENVIRONMENTS {
        println!("== {env}");
        cmd!(sh, "cargo run --quiet -p sluice-cli -- --env {env} config")
            .run()
            .with_context(|| format!("failed to resolve configuration for {env}"))?;
    }
    Ok(())
}

fn doc(sh: &Shell) -> Result<()> {
    println!("Generating documentation...");
    let extra = otel_args();
    cmd!(sh, "cargo doc --workspace --no-deps {extra...}").run()?;
    println!("Documentation generated.");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("Cleaning build artifacts...");
    cmd!(sh, "cargo clean").run()?;
    println!("Clean complete.");
    Ok(())
}
