//! parakit-cli - Command-line front end for parakit
//!
//! Compresses, decompresses and copies files through the crate's deferred
//! compression bridge and double-buffered stream pump.

use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use parakit::{Compressor, ProgressWriter, PumpOptions, StreamPump};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

type CliResult<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "parakit-cli")]
#[command(about = "Compress, decompress and copy files with parakit")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long)]
    quiet: bool,

    /// Buffer preset used when streaming
    #[arg(short, long, value_enum, default_value_t = CliPreset::Default)]
    preset: CliPreset,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a file with LZ4
    Compress {
        /// Input file to compress
        input: PathBuf,

        /// Output compressed file
        output: PathBuf,

        /// Force overwrite of output file
        #[arg(short, long)]
        force: bool,
    },

    /// Decompress an LZ4 file written by `compress`
    Decompress {
        /// Input compressed file
        input: PathBuf,

        /// Output decompressed file
        output: PathBuf,

        /// Force overwrite of output file
        #[arg(short, long)]
        force: bool,
    },

    /// Copy a file with the double-buffered pump
    Copy {
        /// Source file
        input: PathBuf,

        /// Destination file
        output: PathBuf,

        /// Force overwrite of output file
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum CliPreset {
    /// 64KB buffers
    Default,
    /// 1MB buffers with progress reporting
    LargeFile,
    /// 16KB buffers
    LowMemory,
}

impl From<CliPreset> for PumpOptions {
    fn from(preset: CliPreset) -> Self {
        match preset {
            CliPreset::Default => PumpOptions::default(),
            CliPreset::LargeFile => PumpOptions::large_file(),
            CliPreset::LowMemory => PumpOptions::low_memory(),
        }
    }
}

#[derive(Clone, Copy)]
struct Output {
    verbose: bool,
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let output = Output {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };
    let options = PumpOptions::from(cli.preset);

    let result = match cli.command {
        Commands::Compress {
            input,
            output: path,
            force,
        } => compress_file(&input, &path, options, force, output).await,
        Commands::Decompress {
            input,
            output: path,
            force,
        } => decompress_file(&input, &path, options, force, output).await,
        Commands::Copy {
            input,
            output: path,
            force,
        } => copy_file(&input, &path, options, force, output).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn check_paths(input: &Path, output: &Path, force: bool) -> CliResult<()> {
    if !input.exists() {
        return Err(format!("Input file '{}' does not exist", input.display()).into());
    }
    if output.exists() && !force {
        return Err(format!(
            "Output file '{}' already exists. Use --force to overwrite",
            output.display()
        )
        .into());
    }
    Ok(())
}

fn progress_bar(len: u64, message: &'static str) -> CliResult<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} {msg}",
            )?
            .progress_chars("#>-"),
    );
    pb.set_message(message);
    Ok(pb)
}

async fn compress_file(
    input: &Path,
    output: &Path,
    options: PumpOptions,
    force: bool,
    out: Output,
) -> CliResult<()> {
    check_paths(input, output, force)?;
    if out.verbose {
        println!("Compressing '{}' to '{}'", input.display(), output.display());
    }

    let start_time = Instant::now();
    let input_size = tokio::fs::metadata(input).await?.len();
    let compressor = Compressor::lz4().with_options(options);

    let reader = File::open(input).await?;
    let compressed = compressor.compress_stream_async(reader).await?;
    let output_size = compressed.get_ref().len() as u64;

    let mut file = File::create(output).await?;
    file.write_all(compressed.get_ref()).await?;
    file.flush().await?;

    if !out.quiet {
        let ratio = if input_size == 0 {
            100.0
        } else {
            (output_size as f64 / input_size as f64) * 100.0
        };
        println!("✓ Compression successful!");
        println!("  Input:  {} bytes", input_size);
        println!("  Output: {} bytes", output_size);
        println!("  Ratio:  {:.1}%", ratio);
        println!("  Time:   {:.2?}", start_time.elapsed());
    }
    Ok(())
}

async fn decompress_file(
    input: &Path,
    output: &Path,
    options: PumpOptions,
    force: bool,
    out: Output,
) -> CliResult<()> {
    check_paths(input, output, force)?;
    if out.verbose {
        println!("Decompressing '{}' to '{}'", input.display(), output.display());
    }

    let start_time = Instant::now();
    let compressor = Compressor::lz4().with_options(options.clone());

    let reader = File::open(input).await?;
    let decompressed = compressor
        .decompress_stream_async(reader)
        .await
        .map_err(|e| format!("Decompression failed: {}", e))?;
    let output_size = decompressed.get_ref().len() as u64;

    // The decompressed stream is pumped to disk like any other reader.
    let writer = File::create(output).await?;
    StreamPump::new(options).copy(decompressed, writer).await?;

    if !out.quiet {
        println!("✓ Decompression successful!");
        println!("  Output: {} bytes", output_size);
        println!("  Time:   {:.2?}", start_time.elapsed());
    }
    Ok(())
}

async fn copy_file(
    input: &Path,
    output: &Path,
    options: PumpOptions,
    force: bool,
    out: Output,
) -> CliResult<()> {
    check_paths(input, output, force)?;
    if out.verbose {
        println!(
            "Copying '{}' to '{}' with {} byte buffers",
            input.display(),
            output.display(),
            options.buffer_size
        );
    }

    let start_time = Instant::now();
    let input_size = tokio::fs::metadata(input).await?.len();

    let progress = if !out.quiet && (options.report_progress || input_size > 1024 * 1024) {
        Some(progress_bar(input_size, "Copying...")?)
    } else {
        None
    };

    let reader = File::open(input).await?;
    let file = File::create(output).await?;
    let bar = progress.clone();
    let writer = ProgressWriter::new(file, move |written| {
        if let Some(pb) = &bar {
            pb.set_position(written);
        }
    });

    let copied = StreamPump::new(options).copy(reader, writer).await?;

    if let Some(pb) = progress {
        pb.finish_with_message("Copy complete");
    }
    if !out.quiet {
        println!("✓ Copied {} bytes in {:.2?}", copied, start_time.elapsed());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const QUIET: Output = Output {
        verbose: false,
        quiet: true,
    };

    #[tokio::test]
    async fn test_round_trip() -> CliResult<()> {
        let dir = tempdir()?;
        let input_path = dir.path().join("input.txt");
        let compressed_path = dir.path().join("compressed.lz4");
        let output_path = dir.path().join("output.txt");

        let test_data = b"Hello, World! This is a test of the parakit CLI tool. ".repeat(20);
        fs::write(&input_path, &test_data)?;

        compress_file(&input_path, &compressed_path, PumpOptions::default(), false, QUIET)
            .await?;
        decompress_file(&compressed_path, &output_path, PumpOptions::default(), false, QUIET)
            .await?;

        assert_eq!(fs::read(&output_path)?, test_data);
        Ok(())
    }

    #[tokio::test]
    async fn test_copy_with_small_buffers() -> CliResult<()> {
        let dir = tempdir()?;
        let input_path = dir.path().join("input.bin");
        let output_path = dir.path().join("output.bin");
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 253) as u8).collect();
        fs::write(&input_path, &data)?;

        let options = PumpOptions::low_memory();
        copy_file(&input_path, &output_path, options, false, QUIET).await?;
        assert_eq!(fs::read(&output_path)?, data);
        Ok(())
    }

    #[tokio::test]
    async fn test_refuses_to_overwrite() -> CliResult<()> {
        let dir = tempdir()?;
        let input_path = dir.path().join("input.bin");
        let output_path = dir.path().join("output.bin");
        fs::write(&input_path, b"new")?;
        fs::write(&output_path, b"existing")?;

        let outcome =
            copy_file(&input_path, &output_path, PumpOptions::default(), false, QUIET).await;
        assert!(outcome.is_err());
        assert_eq!(fs::read(&output_path)?, b"existing");
        Ok(())
    }
}
