//! Shared CLI utilities for the strata-gguf binary tools.

use std::fmt::Write as _;

use crate::gguf::{GgufDocument, TensorInfo};

/// Initialize tracing/logging to stderr.
///
/// If `disable` is true, no output is produced.
/// Otherwise respects `RUST_LOG` env var, defaulting to WARN.
pub fn init_logging(disable: bool) {
    use tracing_subscriber::EnvFilter;

    if disable {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Validate the `--output-format` argument.
pub fn validate_output_format(s: &str) -> Result<String, String> {
    match s {
        "text" | "json" => Ok(s.to_string()),
        _ => Err(format!("Unknown output format '{}'. Options: text, json", s)),
    }
}

/// Format a byte count with a binary unit suffix.
pub fn human_bytes(n: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

/// One line per tensor: name, type, shape, size, absolute offset.
pub fn format_tensor_line(info: &TensorInfo) -> String {
    format!(
        "{:<48} {:>8} {:>24} {:>12} @ {}",
        info.name,
        info.dtype.name(),
        format!("{:?}", info.dims),
        human_bytes(info.byte_size),
        info.absolute_offset
    )
}

/// Header block for the inspect tool's text output.
pub fn format_summary(doc: &GgufDocument) -> String {
    let s = doc.summary();
    let mut out = String::new();
    let _ = writeln!(out, "GGUF version:      {}", s.version);
    let _ = writeln!(
        out,
        "Architecture:      {}",
        s.architecture.as_deref().unwrap_or("(unknown)")
    );
    let _ = writeln!(out, "Metadata entries:  {}", s.metadata_count);
    let _ = writeln!(out, "Tensors:           {}", s.tensor_count);
    let _ = writeln!(out, "Layers:            {}", s.layer_count);
    let _ = writeln!(out, "Alignment:         {}", s.alignment);
    let _ = writeln!(out, "Data offset:       {}", s.data_offset);
    let _ = writeln!(out, "Tensor data:       {}", human_bytes(s.total_tensor_bytes));
    let _ = write!(
        out,
        "Dominant type:     {}",
        s.dominant_quantization
            .map(|t| t.name())
            .unwrap_or("(none)")
    );
    out
}
