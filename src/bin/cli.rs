//! Runtime Updater CLI - Main entry point for CLI binary
//!
//! This binary provides the `runtime-updater` tool for checking, updating
//! and packaging the shared runtime.

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use ed25519_dalek::SigningKey;
use runtime_updater::engine::{
    cli::formatter::{format_size, status_label, CliFormatter},
    cli::{Cli, Commands},
    config::{ConfigError, UpdaterConfig, CONFIG_FILE},
    layout::RuntimeLayout,
    updater::install::{ArtifactInstaller, ZipArchiveProbe},
    updater::status::{RuntimeMarker, MARKER_FILE},
    updater::verify::{ArtifactPacker, Identity},
    updater::{
        ArtifactVerifier, CoordinatorBuilder, MarkerStatusProvider, RuntimeStatusProvider,
        SignedArchiveIdentity, UpdateEvent,
    },
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run_cli(cli).await {
        CliFormatter::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run_cli(cli: Cli) -> anyhow::Result<()> {
    let json_output = cli.json_output();
    let config = load_config(cli.config.as_deref())?;
    let layout = match &config.base_dir {
        Some(dir) => RuntimeLayout::with_base_dir(dir.clone()),
        None => RuntimeLayout::new()?,
    };

    match cli.command {
        Commands::Status => cmd_status(&config, &layout, json_output)?,
        Commands::Update { url, clean } => {
            cmd_update(&config, &layout, url, clean, json_output).await?
        }
        Commands::Verify { artifact } => cmd_verify(&config, &artifact, json_output)?,
        Commands::Install { artifact, dest } => {
            let dest = dest.unwrap_or_else(|| layout.runtime_dir());
            cmd_install(&artifact, &dest, json_output)?
        }
        Commands::Pack { output, key, files } => cmd_pack(&output, &key, &files, json_output)?,
    }

    Ok(())
}

/// Explicit path must exist; the default one falls back to an empty config
fn load_config(path: Option<&Path>) -> anyhow::Result<UpdaterConfig> {
    match path {
        Some(path) => UpdaterConfig::load_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => match UpdaterConfig::load_file(Path::new(CONFIG_FILE)) {
            Ok(config) => Ok(config),
            Err(ConfigError::NotFound(_)) => {
                tracing::debug!("No {} found, using defaults", CONFIG_FILE);
                Ok(UpdaterConfig::default())
            }
            Err(e) => Err(e.into()),
        },
    }
}

fn cmd_status(config: &UpdaterConfig, layout: &RuntimeLayout, json: bool) -> anyhow::Result<()> {
    let runtime_dir = layout.runtime_dir();
    let status = MarkerStatusProvider::new(&runtime_dir, config.expected_version.clone()).status();
    let marker = RuntimeMarker::load(&runtime_dir.join(MARKER_FILE)).ok().flatten();

    if json {
        println!(
            "{}",
            serde_json::json!({
                "status": status,
                "runtime_dir": runtime_dir,
                "expected_version": config.expected_version,
                "marker": marker,
            })
        );
    } else {
        CliFormatter::header("Runtime Status");
        CliFormatter::kv("Status", status_label(status));
        CliFormatter::kv("Directory", &runtime_dir.display().to_string());
        if let Some(expected) = &config.expected_version {
            CliFormatter::kv("Expected", expected);
        }
        if let Some(marker) = marker {
            CliFormatter::kv("Installed", &marker.version);
            if let Some(at) = marker.installed_at {
                CliFormatter::kv("Installed at", &at.to_rfc3339());
            }
        }
    }
    Ok(())
}

async fn cmd_update(
    config: &UpdaterConfig,
    layout: &RuntimeLayout,
    url: Option<String>,
    clean: bool,
    json: bool,
) -> anyhow::Result<()> {
    layout.init()?;
    if clean {
        let removed = layout.cleanup_downloads()?;
        tracing::info!("Removed {} leftover artifact(s)", removed);
    }

    let listener = move |event: UpdateEvent| {
        if json {
            if let Ok(line) = serde_json::to_string(&event) {
                println!("{}", line);
            }
        } else {
            CliFormatter::event(&event);
        }
    };

    let mut coordinator = CoordinatorBuilder::from_config(config, layout)?
        .listener(listener)
        .build()?;
    if let Some(url) = url {
        coordinator.set_download_url_override(url);
    }

    if !coordinator.attempt_update() {
        if json {
            println!("{}", serde_json::json!({ "attempted": false }));
        } else {
            CliFormatter::success("Runtime is up to date");
        }
        return Ok(());
    }

    tokio::select! {
        _ = coordinator.run_until_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            CliFormatter::warning("Interrupted, cancelling download");
            coordinator.cancel_background_update();
            coordinator.run_until_idle().await;
        }
    }

    if !json {
        CliFormatter::outcome(coordinator.last_outcome());
    }
    if let Some(outcome) = coordinator.last_outcome().cloned() {
        outcome.into_result().context("runtime update did not complete")?;
    }
    Ok(())
}

fn cmd_verify(config: &UpdaterConfig, artifact: &Path, json: bool) -> anyhow::Result<()> {
    let identities = SignedArchiveIdentity::from_hex(&config.trusted_signers)?;
    let result = ArtifactVerifier::new(&identities).verify(artifact);

    if json {
        println!(
            "{}",
            serde_json::json!({
                "artifact": artifact,
                "passed": result.passed,
                "reason": result.reason,
            })
        );
    } else if result.passed {
        CliFormatter::success(&format!("{} verified: {}", artifact.display(), result.reason));
    } else {
        CliFormatter::error(&format!("{} rejected: {}", artifact.display(), result.reason));
    }

    if !result.passed {
        bail!("verification failed");
    }
    Ok(())
}

fn cmd_install(artifact: &Path, dest: &Path, json: bool) -> anyhow::Result<()> {
    std::fs::create_dir_all(dest)?;
    let probe = ZipArchiveProbe;
    ArtifactInstaller::new(&probe).install(artifact, dest)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "installed": true, "artifact": artifact, "dest": dest })
        );
    } else {
        CliFormatter::success(&format!("Installed into {}", dest.display()));
    }
    Ok(())
}

fn cmd_pack(output: &Path, key: &Path, files: &[PathBuf], json: bool) -> anyhow::Result<()> {
    let secret = std::fs::read_to_string(key)
        .with_context(|| format!("reading key {}", key.display()))?;
    let secret: [u8; 32] = hex::decode(secret.trim())?
        .try_into()
        .map_err(|_| anyhow!("secret key must be 32 bytes"))?;
    let signing_key = SigningKey::from_bytes(&secret);
    let signer = Identity::from(&signing_key.verifying_key());

    let mut packer = ArtifactPacker::new();
    for file in files {
        let name = file
            .file_name()
            .ok_or_else(|| anyhow!("not a file: {}", file.display()))?
            .to_string_lossy()
            .to_string();
        let contents = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
        packer = packer.file(name, contents);
    }
    packer.signer(signing_key).write(output)?;

    let size = std::fs::metadata(output)?.len();
    if json {
        println!(
            "{}",
            serde_json::json!({
                "artifact": output,
                "size": size,
                "signer": signer.to_string(),
            })
        );
    } else {
        CliFormatter::success(&format!("Packed {} ({})", output.display(), format_size(size)));
        CliFormatter::kv("Signer", &signer.to_string());
        for file in files {
            CliFormatter::item(&file.display().to_string());
        }
    }
    Ok(())
}
