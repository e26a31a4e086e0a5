mod cli;

use homestream::{
    catalog::extension_of,
    config,
    server,
    streaming::{decide, DecisionPolicy},
    thumbnails::ThumbnailCache,
};
use homestream_av::{
    probe_outcome, FfprobeProber, OrphanReaper, ProbeOutcome, Prober, ReaperPolicy, Toolchain,
};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting Homestream server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );

    server::start_server(config).await
}

fn toolchain(config: &config::Config) -> Toolchain {
    Toolchain::discover(
        config.tools.ffmpeg_path.as_deref(),
        config.tools.ffprobe_path.as_deref(),
    )
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "homestream=trace,homestream_av=trace,tower_http=debug".to_string()
        } else {
            "homestream=info,homestream_av=info,tower_http=info".to_string()
        }
    });

    // Logs go to stderr so `probe --json` output stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Probe { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, cli.config.as_deref(), json))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Reap => reap(cli.config.as_deref()),
        Commands::ClearThumbnails => clear_thumbnails(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("homestream {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn probe_file(file: &Path, config_path: Option<&Path>, json: bool) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let config = config::load_config_or_default(config_path)?;
    let tools = toolchain(&config);
    let prober = FfprobeProber::new(tools.ffprobe.clone())
        .with_timeout(Duration::from_secs(config.streaming.probe_timeout_secs));
    let policy = DecisionPolicy::from_config(&config.streaming);

    let ext = extension_of(file);
    let outcome = probe_outcome(&prober, file).await;
    let plan = decide(ext.as_deref(), &outcome, &policy);

    if json {
        let value = json!({
            "file": file,
            "container": policy.classify(ext.as_deref()).to_string(),
            "probe": outcome.known(),
            "plan": plan.to_string(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    println!("Container class: {}", policy.classify(ext.as_deref()));
    match &outcome {
        ProbeOutcome::Known(result) => {
            println!(
                "Video: {}",
                result.video_codec.as_deref().unwrap_or("none")
            );
            println!(
                "Audio: {}",
                result.audio_codec.as_deref().unwrap_or("none")
            );
            println!("Audio Tracks: {}", result.audio_track_count());
            for (i, lang) in result.audio_languages.iter().enumerate() {
                println!("  [{}] {}", i, lang.as_deref().unwrap_or("untagged"));
            }
            if let Some(duration) = result.duration {
                let secs = duration.as_secs();
                let mins = secs / 60;
                let hours = mins / 60;
                println!("Duration: {:02}:{:02}:{:02}", hours, mins % 60, secs % 60);
            }
        }
        ProbeOutcome::Unknown => {
            println!("Probe: unknown ({} unavailable or failed)", prober.name());
        }
    }
    println!("\nDelivery: {}", plan);

    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let tools = toolchain(&config).check();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Direct play still works; remux, transcode and frame thumbnails need them.");
    }

    Ok(())
}

fn reap(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let tools = toolchain(&config);
    let policy = ReaperPolicy {
        process_name: tools.ffmpeg_process_name(),
        max_age: Duration::from_secs(config.reaper.max_age_secs),
    };

    println!(
        "Looking for {} processes older than {}s...",
        policy.process_name, config.reaper.max_age_secs
    );
    let report = OrphanReaper::new(policy).sweep();

    println!("Transcoders found: {}", report.candidates);
    println!("Killed: {}", report.killed.len());
    for pid in &report.killed {
        println!("  {}", pid);
    }
    if !report.failed.is_empty() {
        println!("Failed to kill: {:?}", report.failed);
    }

    Ok(())
}

fn clear_thumbnails(config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let tools = toolchain(&config);
    let prober: Arc<dyn Prober> = Arc::new(FfprobeProber::new(tools.ffprobe.clone()));
    let cache = ThumbnailCache::new(&config.thumbnails, tools.ffmpeg, prober);

    let removed = cache.clear()?;
    println!(
        "Removed {} files from {}",
        removed,
        cache.dir().display()
    );

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Max viewers: {}", config.server.max_viewers);
            println!("  Library roots: {}", config.library.roots.len());
            println!(
                "  Transcode: {}, remux: {}",
                config.streaming.transcode_enabled, config.streaming.remux_enabled
            );
            println!(
                "  Preferred audio language: {}",
                config.streaming.preferred_audio_language
            );
            println!("  Thumbnail cache: {}", config.thumbnails.cache_dir.display());
            println!("  Reaper enabled: {}", config.reaper.enabled);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
        }
    }

    Ok(())
}
