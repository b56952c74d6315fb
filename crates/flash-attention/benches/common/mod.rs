use std::{fs, io::Write, path::Path};

use candle_core::{DType, Device, Tensor};

/// Batch-major benchmark geometry.
#[derive(Clone, Copy, Debug)]
pub struct Case {
    pub batch: usize,
    pub heads: usize,
    pub kv_heads: usize,
    pub seq_len: usize,
    pub head_dim: usize,
    pub dtype: DType,
}

impl Case {
    pub fn describe(&self) -> String {
        format!(
            "({},{}/{},{},{})",
            self.batch, self.heads, self.kv_heads, self.seq_len, self.head_dim
        )
    }
}

/// Uniform random q/k/v in `[batch, seq_len, heads, head_dim]`.
pub fn build_inputs(device: &Device, case: &Case) -> candle_core::Result<(Tensor, Tensor, Tensor)> {
    let q_shape = (case.batch, case.seq_len, case.heads, case.head_dim);
    let kv_shape = (case.batch, case.seq_len, case.kv_heads, case.head_dim);
    let q = Tensor::rand(0.0f32, 1.0, q_shape, device)?.to_dtype(case.dtype)?;
    let k = Tensor::rand(0.0f32, 1.0, kv_shape, device)?.to_dtype(case.dtype)?;
    let v = Tensor::rand(0.0f32, 1.0, kv_shape, device)?.to_dtype(case.dtype)?;
    Ok((q, k, v))
}

/// Device the fused kernel would run on, else the CPU.
pub fn bench_device() -> Device {
    Device::cuda_if_available(0).unwrap_or(Device::Cpu)
}

pub fn format_markdown_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut table = String::new();
    table.push_str("| ");
    table.push_str(&headers.join(" | "));
    table.push_str(" |\n| ");
    table.push_str(&headers.iter().map(|_| "---").collect::<Vec<_>>().join(" | "));
    table.push_str(" |\n");
    for row in rows {
        table.push_str("| ");
        table.push_str(&row.join(" | "));
        table.push_str(" |\n");
    }
    table
}

pub fn update_results(section: &str, content: &str) -> std::io::Result<()> {
    let section_upper = section.to_uppercase();
    let start_marker = format!("<!-- {}_START -->", section_upper);
    let end_marker = format!("<!-- {}_END -->", section_upper);

    let header = "# Flash Attention Benchmarks\n\n";
    let path = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/benchmarks/RESULTS.md"));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut body = if path.exists() {
        fs::read_to_string(path)?
    } else {
        header.to_string()
    };

    let section_block = format!(
        "{start}\n{content}\n{end}\n",
        start = start_marker,
        content = content,
        end = end_marker
    );

    if let (Some(start_idx), Some(end_idx)) = (
        body.find(&start_marker),
        body.find(&end_marker),
    ) {
        let end_bound = end_idx + end_marker.len();
        body.replace_range(start_idx..end_bound, &section_block);
    } else {
        if !body.ends_with('\n') {
            body.push('\n');
        }
        body.push_str(&section_block);
    }

    let mut file = fs::File::create(path)?;
    file.write_all(body.as_bytes())?;
    Ok(())
}
