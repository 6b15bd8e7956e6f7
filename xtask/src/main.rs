use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for tilestream")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all checks: fmt, clippy, tests, doc
    Check,
    /// Run cargo fmt --check on all crates
    Fmt,
    /// Run clippy on all crates
    Clippy,
    /// Run all tests
    Test,
    /// Build rustdoc for the workspace
    Doc,
    /// Run the simulated protocol under both retirement policies
    Soak {
        /// Frames per run
        #[arg(short, long, default_value = "20000")]
        frames: usize,
        /// Seeds to run, one run per seed and policy
        #[arg(short, long, default_values_t = [1u64, 2, 3])]
        seeds: Vec<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            fmt()?;
            clippy()?;
            test()?;
            doc()?;
        }
        Commands::Fmt => fmt()?,
        Commands::Clippy => clippy()?,
        Commands::Test => test()?,
        Commands::Doc => doc()?,
        Commands::Soak { frames, seeds } => soak(frames, &seeds)?,
    }

    Ok(())
}

fn cargo(what: &str, args: &[&str]) -> Result<()> {
    println!("==> cargo {}", args.join(" "));
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{what} failed");
    }
    Ok(())
}

fn fmt() -> Result<()> {
    cargo("fmt check", &["fmt", "--all", "--", "--check"])
}

fn clippy() -> Result<()> {
    cargo(
        "clippy",
        &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
    )
}

fn test() -> Result<()> {
    cargo("tests", &["test", "--workspace"])
}

fn doc() -> Result<()> {
    cargo("doc", &["doc", "--workspace", "--no-deps"])
}

fn soak(frames: usize, seeds: &[u64]) -> Result<()> {
    let frames = frames.to_string();
    for policy in ["eager", "regenerated-slot"] {
        for seed in seeds {
            let seed = seed.to_string();
            cargo(
                "soak run",
                &[
                    "run",
                    "--release",
                    "-p",
                    "tilestream-cli",
                    "--",
                    "simulate",
                    "--frames",
                    &frames,
                    "--frame-us",
                    "100",
                    "--jitter-us",
                    "300",
                    "--seed",
                    &seed,
                    "--policy",
                    policy,
                ],
            )?;
        }
    }
    Ok(())
}
