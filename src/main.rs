use clap::{ArgAction, Parser, Subcommand};
use log::LevelFilter;
use meshconv::codec::{CodecId, DEFAULT_COMPRESSION_LEVEL};
use meshconv::config::ConvertOptions;
use meshconv::engine::Converter;
use meshconv::format::{registry, Encoding};
use meshconv::{ops, FormatRegistry, MeshError};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "meshconv", about = "Convert mesh files between formats")]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a mesh file to another format
    Convert {
        input:  PathBuf,
        output: PathBuf,
        /// Input format name (default: from extension, then content)
        #[arg(short = 'i', long)]
        input_format: Option<String>,
        /// Output format name (default: from extension)
        #[arg(short = 'o', long)]
        output_format: Option<String>,
        /// ascii or binary, for formats offering both
        #[arg(short, long)]
        encoding: Option<String>,
        /// Codec: zstd, lz4, brotli, lzma, none
        #[arg(short, long)]
        compression: Option<String>,
        #[arg(short, long)]
        level: Option<i32>,
        /// JSON file with conversion options; flags override it
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show a summary of a mesh file
    Info {
        input: PathBuf,
        #[arg(short = 'i', long)]
        input_format: Option<String>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rewrite a file with compressed sections
    Compress {
        input: PathBuf,
        /// Write here instead of in place
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(short, long, default_value = "zstd")]
        codec: String,
        /// Compression level (zstd 1-19; brotli 0-11; ignored for lz4/lzma)
        #[arg(short, long, default_value_t = DEFAULT_COMPRESSION_LEVEL)]
        level: i32,
    },
    /// Rewrite a file without compression
    Decompress {
        input: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Rewrite a file in place with ASCII encoding
    Ascii {
        input: PathBuf,
    },
    /// Rewrite a file in place with binary encoding
    Binary {
        input: PathBuf,
    },
    /// List registered formats and their capabilities
    Formats,
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut builder = env_logger::Builder::new();
    builder.target(env_logger::Target::Stderr);
    builder.filter_level(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

fn parse_codec(name: &str) -> Result<CodecId, MeshError> {
    CodecId::from_name(name).ok_or_else(|| MeshError::Config(format!("unknown codec `{name}`")))
}

fn parse_encoding(name: &str) -> Result<Encoding, MeshError> {
    match name.to_lowercase().as_str() {
        "ascii"  => Ok(Encoding::Ascii),
        "binary" => Ok(Encoding::Binary),
        _        => Err(MeshError::Config(format!("unknown encoding `{name}` (expected ascii or binary)"))),
    }
}

fn run(command: Commands) -> Result<(), MeshError> {
    let formats = registry::init(FormatRegistry::with_builtin())?;
    let conv = Converter::new(formats);
    match command {

        // ── Convert ──────────────────────────────────────────────────────────
        Commands::Convert { input, output, input_format, output_format, encoding, compression, level, config } => {
            let mut opts = match config {
                Some(path) => ConvertOptions::from_file(path)?,
                None       => ConvertOptions::default(),
            };
            if input_format.is_some()  { opts.input_format = input_format; }
            if output_format.is_some() { opts.output_format = output_format; }
            if let Some(e) = encoding  { opts.encoding = Some(parse_encoding(&e)?); }
            if compression.is_some()   { opts.compression = compression; }
            if let Some(l) = level     { opts.level = l; }
            ops::convert(&conv, &input, &output, &opts)?;
            println!("Converted: {} -> {}", input.display(), output.display());
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, input_format, json } => {
            let summary = ops::info(&conv, &input, input_format.as_deref())?;
            if json {
                let text = serde_json::to_string_pretty(&summary).map_err(|e| MeshError::Config(e.to_string()))?;
                println!("{text}");
            } else {
                println!("  Path           {}", input.display());
                println!("{summary}");
            }
        }

        // ── Compress / decompress ────────────────────────────────────────────
        Commands::Compress { input, output, codec, level } => {
            let codec = parse_codec(&codec)?;
            ops::compress(&conv, &input, output.as_deref(), codec, level)?;
            println!("Compressed: {}", output.as_ref().unwrap_or(&input).display());
        }
        Commands::Decompress { input, output } => {
            ops::decompress(&conv, &input, output.as_deref())?;
            println!("Decompressed: {}", output.as_ref().unwrap_or(&input).display());
        }

        // ── Encoding ─────────────────────────────────────────────────────────
        Commands::Ascii { input } => {
            ops::ascii(&conv, &input)?;
            println!("Rewrote as ASCII: {}", input.display());
        }
        Commands::Binary { input } => {
            ops::binary(&conv, &input)?;
            println!("Rewrote as binary: {}", input.display());
        }

        // ── Formats ──────────────────────────────────────────────────────────
        Commands::Formats => {
            println!("{:<10} {:<14} Capabilities", "Name", "Extensions");
            for format in formats.iter() {
                let exts: Vec<String> = format.extensions().iter().map(|e| format!(".{e}")).collect();
                println!("{:<10} {:<14} {}", format.name(), exts.join(" "), format.capabilities());
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbose);
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
