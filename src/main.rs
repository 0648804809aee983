mod cli;

use streamforge::{config, processor::Processor};
use streamforge_av::probe::{self, format_duration};
use streamforge_av::{
    CancellationToken, ConcurrencyLimiter, ConversionRequest, Converter, WaveformGenerator,
};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "streamforge=trace,streamforge_av=trace".to_string()
        } else {
            "streamforge=info,streamforge_av=info".to_string()
        }
    });

    // Logs go to stderr so converted output can be piped from stdout.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Convert {
            input,
            output,
            waveform,
            timeout,
        } => block_on(convert_file(
            input,
            output,
            waveform,
            timeout.map(Duration::from_secs),
            config_path,
        )),
        Commands::Waveform { input, output } => {
            block_on(render_waveform(input, output, config_path))
        }
        Commands::Process { input } => block_on(process_file(input, config_path)),
        Commands::Probe { file, json } => block_on(probe_file(file, json, config_path)),
        Commands::CheckTools => check_tools(config_path),
        Commands::Validate {
            config: validate_path,
        } => {
            let path = validate_path.or_else(|| cli.config.clone());
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("streamforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn block_on<F: Future<Output = Result<()>>>(fut: F) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(fut)
}

/// Token that fires on Ctrl-C. Must be called inside the runtime.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, canceling");
            trigger.cancel();
        }
    });
    token
}

async fn convert_file(
    input: PathBuf,
    output: Option<PathBuf>,
    waveform: Option<PathBuf>,
    timeout: Option<Duration>,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let converter = Converter::new(config.converter_config())?;
    let cancel = cancel_on_ctrl_c();

    let mut request = ConversionRequest::new(&input).cancel_token(cancel);
    if let Some(waveform) = &waveform {
        request = request.waveform(waveform);
    }
    if let Some(timeout) = timeout {
        request = request.deadline(timeout);
    }

    let output = output.unwrap_or_else(|| input.with_extension("mp4"));
    if output == input {
        anyhow::bail!("Output would overwrite the input: {:?}", output);
    }

    let handle = converter
        .convert(request)
        .await
        .with_context(|| format!("Failed to start conversion of {:?}", input))?;
    let (mut stream, completion) = handle.into_parts();

    let copied = if output == Path::new("-") {
        let mut stdout = tokio::io::stdout();
        tokio::io::copy(&mut stream, &mut stdout).await?
    } else {
        let mut file = tokio::fs::File::create(&output)
            .await
            .with_context(|| format!("Failed to create {:?}", output))?;
        tokio::io::copy(&mut stream, &mut file).await?
    };
    drop(stream);

    completion.await.into_result("ffmpeg")?;

    if output != Path::new("-") {
        println!("Output: {} ({} bytes)", output.display(), copied);
        if let Some(waveform) = waveform {
            println!("Waveform: {}", waveform.display());
        }
    }
    Ok(())
}

async fn render_waveform(
    input: PathBuf,
    output: Option<PathBuf>,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let generator = WaveformGenerator::new(
        &config.ffmpeg.path,
        ConcurrencyLimiter::new(config.ffmpeg.max_concurrent),
        config.waveform.clone(),
    )?;

    let output = output.unwrap_or_else(|| input.with_extension("png"));
    generator
        .generate_to(&input, &output, cancel_on_ctrl_c())
        .await
        .with_context(|| format!("Failed to render waveform of {:?}", input))?;

    println!("Waveform: {}", output.display());
    Ok(())
}

async fn process_file(input: PathBuf, config_path: Option<&Path>) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let processor = Processor::from_config(
        &config,
        ConcurrencyLimiter::new(config.ffmpeg.max_concurrent),
    )?;

    tracing::info!("Processing file: {:?}", input);
    let report = processor.process_file(&input, cancel_on_ctrl_c()).await?;

    println!("File: {}", report.media.file_name);
    println!("Video: {} ({} bytes)", report.video_key, report.video_bytes);
    println!("Waveform: {}", report.waveform_key);
    println!("Elapsed: {}", format_duration(report.elapsed));
    println!("All operations completed successfully");
    Ok(())
}

async fn probe_file(file: PathBuf, json: bool, config_path: Option<&Path>) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let config = config::load_config_or_default(config_path)?;
    let info =
        probe::probe_with_ffprobe(&config.ffmpeg.ffprobe_path, &file, cancel_on_ctrl_c()).await?;

    if json {
        let json_str = serde_json::to_string_pretty(&info)?;
        println!("{}", json_str);
        return Ok(());
    }

    println!("File: {}", info.full_path.display());
    println!("Format: {}", info.container_format);
    if let Some(size) = info.file_size {
        println!("Size: {} bytes", size);
    }
    if let Some(duration) = info.duration {
        println!("Duration: {}", format_duration(duration));
    }

    match &info.video {
        Some(video) => {
            print!("Video: {}", video.codec);
            if let (Some(w), Some(h)) = (video.width, video.height) {
                print!(" {}x{}", w, h);
            }
            if let Some(fps) = video.frame_rate {
                print!(", {:.3} fps", fps);
            }
            println!();
        }
        None => println!("Video: none"),
    }

    match &info.audio {
        Some(audio) => {
            print!("Audio: {}", audio.codec);
            if let Some(channels) = audio.channels {
                print!(" {}ch", channels);
            }
            if let Some(rate) = audio.sample_rate {
                print!(", {} Hz", rate);
            }
            println!();
        }
        None => println!("Audio: none"),
    }

    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let tools = streamforge_av::check_tools(&config.ffmpeg.path, &config.ffmpeg.ffprobe_path);
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
            print!(" ({})", version);
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
        println!("Some tools are missing. Install ffmpeg to enable conversion.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    println!("  ffmpeg: {}", config.ffmpeg.path.display());
    println!("  ffprobe: {}", config.ffmpeg.ffprobe_path.display());
    println!("  Max concurrent: {}", config.ffmpeg.max_concurrent);
    println!("  Max runtime: {}s", config.ffmpeg.max_runtime_secs);
    println!("  Audio codec: {}", config.ffmpeg.audio_codec);
    println!(
        "  Waveform: {}x{} {} ({})",
        config.waveform.width, config.waveform.height, config.waveform.color, config.waveform.scale
    );
    let storage = &config.storage;
    if storage.provider.eq_ignore_ascii_case("s3") {
        println!(
            "  Storage: s3 bucket {} at {} ({})",
            storage.bucket.as_deref().unwrap_or_default(),
            storage.service_url.as_deref().unwrap_or_default(),
            storage.region.as_deref().unwrap_or_default()
        );
    } else {
        println!(
            "  Storage: {} at {}",
            storage.provider,
            storage.root_path.display()
        );
    }

    Ok(())
}
