mod config;
mod logging;

use std::path::{Path, PathBuf};

use anyhow::Context;
use candle_core::Device;
use clap::{Parser, Subcommand};
use lora_core::lora::{AdapterFile, AdapterListConfig, AdapterRegistry};

use crate::config::CliConfig;
use crate::logging::LogFormat;

#[derive(Parser)]
#[command(name = "lora-adapters", about = "Inspect and load LoRA adapter containers")]
struct Cli {
    /// Log level when RUST_LOG is unset (e.g. "info", "debug")
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the version and parameter records of a container
    Inspect { file: PathBuf },

    /// Validate one or more containers; exits non-zero if any fails
    Verify {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Build a registry from an adapter list and print the slot bindings
    Load {
        /// JSON adapter list ({"adapters": {"name": "file"}})
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory adapter files are resolved against.
        /// Defaults to the directory holding --config.
        #[arg(long)]
        base_dir: Option<PathBuf>,

        /// Extra adapters (format: name=path, can be repeated)
        #[arg(long = "adapter")]
        adapters: Vec<String>,

        /// Adapters to activate before binding (can be repeated)
        #[arg(long)]
        activate: Vec<String>,

        /// Target device: cpu, cuda[:N] or metal[:N]
        #[arg(long)]
        device: Option<String>,
    },

    /// Persist defaults to the config file and print the stored settings
    Config {
        /// Default target device
        #[arg(long)]
        device: Option<String>,

        /// Default directory adapter files are resolved against
        #[arg(long)]
        base_dir: Option<PathBuf>,

        /// Default JSON adapter list for `load`
        #[arg(long)]
        adapters_config: Option<PathBuf>,

        /// Config file to write instead of the per-user default
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = CliConfig::load();
    settings.merge(&CliConfig {
        log_level: cli.log_level.clone(),
        ..Default::default()
    });
    logging::init_with_level_and_format(settings.log_level.as_deref(), LogFormat::from_env())?;

    match cli.command {
        Command::Inspect { file } => inspect(&file),
        Command::Verify { files } => verify(&files),
        Command::Load {
            config,
            base_dir,
            adapters,
            activate,
            device,
        } => {
            settings.merge(&CliConfig {
                device,
                base_dir,
                adapters_config: config,
                log_level: None,
            });
            load(&settings, &adapters, &activate)
        }
        Command::Config {
            device,
            base_dir,
            adapters_config,
            path,
        } => {
            let path = match path {
                Some(path) => path,
                None => CliConfig::default_path()
                    .context("No config directory available on this platform")?,
            };
            let stored = save_settings(
                &path,
                &CliConfig {
                    device,
                    base_dir,
                    adapters_config,
                    log_level: cli.log_level,
                },
            )?;
            println!("Saved config to: {}", path.display());
            print!("{}", toml::to_string_pretty(&stored)?);
            Ok(())
        }
    }
}

/// Merge `overrides` into the config stored at `path` and write it back.
fn save_settings(path: &Path, overrides: &CliConfig) -> anyhow::Result<CliConfig> {
    let mut stored = if path.exists() {
        CliConfig::load_from(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?
    } else {
        CliConfig::default()
    };
    stored.merge(overrides);
    stored
        .save_to(path)
        .with_context(|| format!("Failed to write config {}", path.display()))?;
    tracing::info!(path = %path.display(), "saved cli config");
    Ok(stored)
}

fn inspect(path: &Path) -> anyhow::Result<()> {
    let file = AdapterFile::load(path)
        .with_context(|| format!("Failed to read adapter container {}", path.display()))?;
    let view = file.view();

    println!("{}", path.display());
    println!("  version:    {}", view.version());
    println!("  parameters: {}", view.len());
    println!("  size:       {} bytes", file.size_in_bytes());
    for record in view.records() {
        println!(
            "  {:<48} {:?} {:?} ({} bytes)",
            record.name,
            record.element_type,
            record.shape,
            record.data.len()
        );
    }
    Ok(())
}

fn verify(paths: &[PathBuf]) -> anyhow::Result<()> {
    let mut failures = 0usize;
    for path in paths {
        match AdapterFile::load(path) {
            Ok(file) => println!(
                "ok      {} (version {}, {} parameters)",
                path.display(),
                file.view().version(),
                file.view().len()
            ),
            Err(e) => {
                failures += 1;
                println!("FAILED  {}: {e}", path.display());
            }
        }
    }

    if failures > 0 {
        anyhow::bail!(
            "{} of {} container(s) failed verification",
            failures,
            paths.len()
        );
    }
    Ok(())
}

fn load(settings: &CliConfig, extra: &[String], activate: &[String]) -> anyhow::Result<()> {
    let mut list = match &settings.adapters_config {
        Some(path) => AdapterListConfig::load_from(path)
            .with_context(|| format!("Failed to load adapter list {}", path.display()))?,
        None => AdapterListConfig::default(),
    };
    for spec in extra {
        let (name, path) = parse_adapter_spec(spec)?;
        list.push(name, path);
    }
    if list.is_empty() {
        anyhow::bail!("No adapters given: pass --config or at least one --adapter name=path");
    }

    let base_dir = resolve_base_dir(settings);
    let device = parse_device(settings.device.as_deref().unwrap_or("cpu"))?;

    eprintln!(
        "Loading {} LoRA adapter(s) from {}...",
        list.len(),
        base_dir.display()
    );
    let mut registry = AdapterRegistry::new(device);
    registry.load_from_config(&base_dir, &list)?;

    for name in activate {
        registry
            .activate(name)
            .with_context(|| format!("Cannot activate adapter '{name}'"))?;
    }

    for adapter in registry.iter() {
        println!(
            "{} ({}, {} parameters)",
            adapter.name(),
            if adapter.is_active() { "active" } else { "inactive" },
            adapter.len()
        );
    }

    for binding in registry.bind_slots()? {
        println!(
            "  {}/{:<48} {:?} {:?}{}",
            binding.adapter,
            binding.parameter,
            binding.tensor.dtype(),
            binding.tensor.dims(),
            if binding.active { "" } else { " (placeholder)" }
        );
    }
    Ok(())
}

fn resolve_base_dir(settings: &CliConfig) -> PathBuf {
    if let Some(dir) = &settings.base_dir {
        return dir.clone();
    }
    settings
        .adapters_config
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn parse_adapter_spec(spec: &str) -> anyhow::Result<(&str, &str)> {
    match spec.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => Ok((name, path)),
        _ => anyhow::bail!(
            "Invalid LoRA adapter spec '{}': expected format 'name=path'",
            spec
        ),
    }
}

fn parse_device(spec: &str) -> anyhow::Result<Device> {
    let (kind, ordinal) = match spec.split_once(':') {
        Some((kind, ordinal)) => {
            let ordinal: usize = ordinal
                .parse()
                .with_context(|| format!("Invalid device ordinal in '{spec}'"))?;
            (kind, ordinal)
        }
        None => (spec, 0),
    };

    match kind {
        "cpu" if ordinal == 0 => Ok(Device::Cpu),
        "cuda" => Device::new_cuda(ordinal)
            .with_context(|| format!("CUDA device {ordinal} is not available")),
        "metal" => Device::new_metal(ordinal)
            .with_context(|| format!("Metal device {ordinal} is not available")),
        _ => anyhow::bail!(
            "--device '{}' is not supported; use cpu, cuda[:N] or metal[:N]",
            spec
        ),
    }
}
