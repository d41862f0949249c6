//! Read-only commands: `stats` and `list`

use super::{OutputFormat, to_json};
use chrono::SecondsFormat;
use diskmemo::{DiskCache, InstanceInfo, PayloadKind};

pub fn stats(cache: &DiskCache, format: OutputFormat) -> miette::Result<String> {
    let stats = cache.root_stats()?;
    match format {
        OutputFormat::Json => to_json(&stats),
        OutputFormat::Text => Ok(format!(
            "Instances: {}\nTotal size: {} bytes ({:.2} MiB)\nRoot: {}",
            stats.instance_count,
            stats.total_size_bytes,
            stats.total_size_mb(),
            cache.root().path().display()
        )),
    }
}

pub fn list(cache: &DiskCache, format: OutputFormat) -> miette::Result<String> {
    let infos = cache.instances()?;
    match format {
        OutputFormat::Json => to_json(&infos),
        OutputFormat::Text if infos.is_empty() => Ok("No cache instances".to_string()),
        OutputFormat::Text => Ok(render_table(&infos)),
    }
}

fn render_table(infos: &[InstanceInfo]) -> String {
    let width = infos.iter().map(|i| i.id.len()).max().unwrap_or(0);
    let rows: Vec<String> = infos
        .iter()
        .map(|info| {
            let state = if info.committed { "committed" } else { "pending" };
            let kind = match info.payload_kind {
                Some(PayloadKind::Single) => "single",
                Some(PayloadKind::Sequence) => "sequence",
                None => "-",
            };
            let last_used = info.last_used_at.map_or_else(
                || "-".to_string(),
                |at| at.to_rfc3339_opts(SecondsFormat::Secs, true),
            );
            format!(
                "{:<width$}  {:<9}  {:<8}  {:>12}  {}",
                info.id, state, kind, info.size_bytes, last_used
            )
        })
        .collect();
    rows.join("\n")
}
