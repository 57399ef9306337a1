//! strata-gguf-quantize: Round-trip a tensor through Q4_K and report the error.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use serde::Serialize;

use strata_gguf::cli;
use strata_gguf::gguf::q4k::{self, QuantizationError};
use strata_gguf::gguf::MappedGguf;

#[derive(Parser)]
#[command(
    name = "strata-gguf-quantize",
    about = "Quantize a GGUF tensor to Q4_K and measure reconstruction error"
)]
struct Args {
    /// Path to the GGUF file
    file: PathBuf,

    /// Name of the tensor to quantize (e.g. "blk.0.attn_q.weight")
    #[arg(short = 't', long)]
    tensor: String,

    /// Output format: text or json
    #[arg(long, default_value = "text", value_parser = cli::validate_output_format)]
    output_format: String,

    /// Suppress all logging
    #[arg(long)]
    log_disable: bool,
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    tensor: &'a str,
    source_type: &'static str,
    shape: &'a [u64],
    elements: usize,
    source_bytes: usize,
    q4k_blocks: usize,
    q4k_bytes: usize,
    error: QuantizationError,
}

fn main() {
    let args = Args::parse();
    cli::init_logging(args.log_disable);

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let gguf = MappedGguf::open(&args.file)?;
    let tensor = gguf.tensor(&args.tensor)?;

    let original = tensor.to_f32_parallel()?;
    let (bytes, n_blocks) = q4k::quantize(&original, &tensor.shape)?;
    let restored = q4k::dequantize_parallel(&bytes, n_blocks, &tensor.shape)?;
    let error = q4k::quantization_error(&original, &restored)?;

    match args.output_format.as_str() {
        "json" => {
            let output = JsonOutput {
                tensor: &tensor.name,
                source_type: tensor.dtype.name(),
                shape: &tensor.shape,
                elements: original.len(),
                source_bytes: tensor.byte_size(),
                q4k_blocks: n_blocks,
                q4k_bytes: bytes.len(),
                error,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => {
            println!("Tensor:            {}", tensor.name);
            println!("Source type:       {}", tensor.dtype);
            println!("Shape:             {:?}", tensor.shape);
            println!("Elements:          {}", original.len());
            println!(
                "Size:              {} -> {} ({} blocks)",
                cli::human_bytes(tensor.byte_size() as u64),
                cli::human_bytes(bytes.len() as u64),
                n_blocks
            );
            println!("MSE:               {:.6e}", error.mean_squared_error);
            println!("Max abs error:     {:.6e}", error.max_absolute_error);
            println!("SNR:               {:.2} dB", error.signal_to_noise_ratio_db);
        }
    }

    Ok(())
}
