use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coderun_core::{
    ConfigLoader, ExecutionResult, ExecutionStatus, ResourceOverrides, SandboxConfig,
    SandboxExecutor,
};
use log::LevelFilter;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

/// Exit status used for a submission killed at its deadline, as with
/// coreutils `timeout`.
const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Parser, Debug)]
#[clap(name = "coderun", author, version, about = "Run untrusted code in a resource-capped sandbox")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(
        long,
        short,
        global = true,
        help = "Configuration file (default: ./coderun.yaml, then the user config directory)"
    )]
    config: Option<PathBuf>,

    #[clap(
        long,
        short,
        global = true,
        help = "Log level; overrides logging.level from the configuration file"
    )]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a source file (or stdin) in the sandbox and print the result as JSON
    Run {
        /// Source file; reads stdin when omitted or `-`
        file: Option<PathBuf>,

        #[clap(long, help = "Pretty-print the JSON result")]
        pretty: bool,

        #[clap(long, help = "Always exit 0 instead of mirroring the submission's return code")]
        no_exit_code: bool,

        #[clap(long, help = "Lower the wall-clock timeout for this run (seconds)")]
        timeout: Option<u64>,

        #[clap(long, help = "Lower the memory ceiling for this run (MiB)")]
        memory_mb: Option<u64>,

        #[clap(long, help = "Lower the CPU share for this run")]
        cpus: Option<f64>,
    },
    /// Check that the isolation engine is reachable and the runtime image is present
    Check,
    /// Print the effective configuration as YAML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref()).await?;

    env_logger::Builder::new()
        .filter_level(log_level(cli.log_level.as_deref(), &config))
        .target(env_logger::Target::Stderr)
        .init();

    match cli.command {
        Commands::Run {
            file,
            pretty,
            no_exit_code,
            timeout,
            memory_mb,
            cpus,
        } => {
            let overrides = ResourceOverrides {
                cpus,
                memory_mb,
                timeout_secs: timeout,
            };
            let code = read_source(file.as_ref()).await?;
            let result = run(config, &code, &overrides).await?;

            let rendered = if pretty {
                serde_json::to_string_pretty(&result)?
            } else {
                serde_json::to_string(&result)?
            };
            println!("{}", rendered);

            if !no_exit_code {
                let code = exit_code(&result);
                if code != 0 {
                    std::process::exit(code);
                }
            }
            Ok(())
        }
        Commands::Check => {
            let executor = SandboxExecutor::docker(config)?;
            executor
                .prepare()
                .await
                .context("sandbox is not ready")?;
            println!(
                "Sandbox ready (image {})",
                executor.config().runtime.image
            );
            Ok(())
        }
        Commands::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
    }
}

async fn run(
    config: SandboxConfig,
    code: &str,
    overrides: &ResourceOverrides,
) -> Result<ExecutionResult> {
    let executor = SandboxExecutor::docker(config)?;
    executor.prepare().await.context("sandbox is not ready")?;
    let result = executor.execute_with_limits(code, overrides).await?;
    Ok(result)
}

async fn load_config(explicit: Option<&PathBuf>) -> Result<SandboxConfig> {
    let config = match explicit {
        Some(path) => ConfigLoader::from_file(path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => match default_config_path() {
            Some(path) => ConfigLoader::from_file(&path)
                .await
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => ConfigLoader::from_defaults()?,
        },
    };
    Ok(config)
}

/// First existing file among `./coderun.yaml` and
/// `<config dir>/coderun/config.yaml`.
fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from("coderun.yaml");
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("coderun").join("config.yaml"))
        .filter(|path| path.exists())
}

async fn read_source(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) if path.as_os_str() != "-" => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display())),
        _ => {
            let mut code = String::new();
            tokio::io::stdin()
                .read_to_string(&mut code)
                .await
                .context("failed to read source from stdin")?;
            Ok(code)
        }
    }
}

/// The `--log-level` flag wins over `logging.level`. Unparsable values fall
/// back to `warn`.
fn log_level(flag: Option<&str>, config: &SandboxConfig) -> LevelFilter {
    flag.unwrap_or(&config.logging.level)
        .parse()
        .unwrap_or(LevelFilter::Warn)
}

fn exit_code(result: &ExecutionResult) -> i32 {
    match result.status {
        ExecutionStatus::TimedOut => TIMEOUT_EXIT_CODE,
        ExecutionStatus::Completed => i32::try_from(result.returncode).unwrap_or(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mirrors_submission() {
        assert_eq!(exit_code(&ExecutionResult::completed("", "", 0)), 0);
        assert_eq!(exit_code(&ExecutionResult::completed("", "boom", 3)), 3);
        assert_eq!(exit_code(&ExecutionResult::timed_out("", "")), TIMEOUT_EXIT_CODE);
    }

    #[test]
    fn test_cli_parses_run_overrides() {
        let cli = Cli::parse_from([
            "coderun", "run", "main.py", "--timeout", "3", "--memory-mb", "64", "--pretty",
        ]);
        match cli.command {
            Commands::Run {
                file,
                timeout,
                memory_mb,
                pretty,
                cpus,
                ..
            } => {
                assert_eq!(file, Some(PathBuf::from("main.py")));
                assert_eq!(timeout, Some(3));
                assert_eq!(memory_mb, Some(64));
                assert_eq!(cpus, None);
                assert!(pretty);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_log_level_follows_config_unless_flag_given() {
        let mut config = SandboxConfig::default();
        config.logging.level = "debug".to_string();

        assert_eq!(log_level(None, &config), LevelFilter::Debug);
        assert_eq!(log_level(Some("error"), &config), LevelFilter::Error);

        config.logging.level = "loud".to_string();
        assert_eq!(log_level(None, &config), LevelFilter::Warn);
    }

    #[test]
    fn test_log_level_flag_is_optional() {
        let cli = Cli::parse_from(["coderun", "check"]);
        assert_eq!(cli.log_level, None);

        let cli = Cli::parse_from(["coderun", "--log-level", "trace", "check"]);
        assert_eq!(cli.log_level.as_deref(), Some("trace"));
    }

    #[tokio::test]
    async fn test_read_source_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.py");
        std::fs::write(&path, "print(\"hello\")\n").unwrap();

        let code = read_source(Some(&path)).await.unwrap();
        assert_eq!(code, "print(\"hello\")\n");
    }

    #[tokio::test]
    async fn test_explicit_missing_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(Some(&dir.path().join("missing.yaml"))).await;
        assert!(result.is_err());
    }
}
