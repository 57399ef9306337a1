//! strata-gguf-inspect: Print the header, metadata and tensor table of a GGUF file.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use serde::Serialize;

use strata_gguf::cli;
use strata_gguf::gguf::metadata::Metadata;
use strata_gguf::gguf::{DocumentSummary, MappedGguf, TensorInfo};

#[derive(Parser)]
#[command(name = "strata-gguf-inspect", about = "Inspect a GGUF model file")]
struct Args {
    /// Path to the GGUF file
    file: PathBuf,

    /// Print every metadata key and value
    #[arg(long)]
    metadata: bool,

    /// Print the tensor table
    #[arg(long)]
    tensors: bool,

    /// Print tensors grouped by layer index
    #[arg(long)]
    layers: bool,

    /// Only list tensors whose name matches this regular expression
    #[arg(long)]
    filter: Option<String>,

    /// Output format: text or json
    #[arg(long, default_value = "text", value_parser = cli::validate_output_format)]
    output_format: String,

    /// Suppress all logging
    #[arg(long)]
    log_disable: bool,
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    summary: DocumentSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a Metadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tensors: Option<Vec<&'a TensorInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    layers: Option<Vec<LayerEntry<'a>>>,
}

#[derive(Serialize)]
struct LayerEntry<'a> {
    index: usize,
    tensors: Vec<&'a str>,
    bytes: u64,
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
    let doc = gguf.document();

    let tensors: Vec<&TensorInfo> = match &args.filter {
        Some(pattern) => doc.tensors_matching(pattern)?,
        None => doc.tensor_infos().iter().collect(),
    };
    let show_tensors = args.tensors || args.filter.is_some();

    let layers: Vec<LayerEntry<'_>> = doc
        .group_by_layer_index()
        .into_iter()
        .map(|(index, infos)| LayerEntry {
            index,
            bytes: infos.iter().map(|t| t.byte_size).sum(),
            tensors: infos.iter().map(|t| t.name.as_str()).collect(),
        })
        .collect();

    match args.output_format.as_str() {
        "json" => {
            let output = JsonOutput {
                summary: doc.summary(),
                metadata: args.metadata.then(|| doc.metadata()),
                tensors: show_tensors.then_some(tensors),
                layers: args.layers.then_some(layers),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => {
            println!("{}", cli::format_summary(doc));

            if args.metadata {
                println!();
                println!("Metadata:");
                for (key, value) in doc.metadata().iter() {
                    println!("  {:<48} {:>6}  {}", key, value.type_name(), value);
                }
            }

            if show_tensors {
                println!();
                println!("Tensors ({}):", tensors.len());
                for info in &tensors {
                    println!("  {}", cli::format_tensor_line(info));
                }
            }

            if args.layers {
                println!();
                println!("Layers ({}):", layers.len());
                for layer in &layers {
                    println!(
                        "  {:>4}: {:>3} tensors, {}",
                        layer.index,
                        layer.tensors.len(),
                        cli::human_bytes(layer.bytes)
                    );
                }
            }
        }
    }

    Ok(())
}
