use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use chebifier_cache::config_file::ConfigFile;
use chebifier_cache::{SnapshotEntry, SnapshotFormat};
use owo_colors::OwoColorize;
use serde_json::Value;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

fn format_label(format: SnapshotFormat) -> &'static str {
    match format {
        SnapshotFormat::Json => "json",
        SnapshotFormat::Sqlite => "sqlite",
    }
}

/// Print a summary of a snapshot: location, format, entry count and the
/// number of entries per model.
pub fn print_stats(
    w: &mut dyn Write,
    path: &Path,
    entries: &[SnapshotEntry<Value>],
    capacity: usize,
    color: ColorMode,
) -> std::io::Result<()> {
    let format = format_label(SnapshotFormat::for_path(path));
    if color.enabled() {
        writeln!(w, "{} {} ({})", "Snapshot:".bold(), path.display(), format)?;
    } else {
        writeln!(w, "Snapshot: {} ({})", path.display(), format)?;
    }
    writeln!(w, "Entries:  {} (capacity {})", entries.len(), capacity)?;

    if entries.len() > capacity {
        let msg = format!(
            "Snapshot holds more entries than the capacity; the {} least recently used will be dropped on load",
            entries.len() - capacity
        );
        if color.enabled() {
            writeln!(w, "{}", msg.yellow())?;
        } else {
            writeln!(w, "{}", msg)?;
        }
    }

    let mut per_model: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in entries {
        *per_model.entry(entry.model.as_str()).or_default() += 1;
    }
    if per_model.is_empty() {
        return Ok(());
    }

    let width = per_model.keys().map(|m| m.len()).max().unwrap_or(0);
    writeln!(w)?;
    for (model, count) in per_model {
        if color.enabled() {
            writeln!(w, "  {:<width$}  {}", model.cyan(), count)?;
        } else {
            writeln!(w, "  {:<width$}  {}", model, count)?;
        }
    }
    Ok(())
}

/// Print snapshot entries, oldest first, optionally only those of one model.
/// Returns how many entries were printed.
pub fn print_entries(
    w: &mut dyn Write,
    entries: &[SnapshotEntry<Value>],
    model: Option<&str>,
    color: ColorMode,
) -> std::io::Result<usize> {
    let mut printed = 0;
    for entry in entries
        .iter()
        .filter(|e| model.is_none_or(|m| e.model == m))
    {
        if color.enabled() {
            writeln!(
                w,
                "{}\t{}\t{}",
                entry.model.cyan(),
                entry.smiles,
                entry.value.dimmed()
            )?;
        } else {
            writeln!(w, "{}\t{}\t{}", entry.model, entry.smiles, entry.value)?;
        }
        printed += 1;
    }

    if printed == 0 {
        if color.enabled() {
            writeln!(w, "{}", "No cached entries".dimmed())?;
        } else {
            writeln!(w, "No cached entries")?;
        }
    }
    Ok(printed)
}

/// Print one cached value as pretty JSON.
pub fn print_value(w: &mut dyn Write, value: &Value) -> std::io::Result<()> {
    writeln!(w, "{:#}", value)
}

/// Print the result of clearing a snapshot.
pub fn print_cleared(
    w: &mut dyn Write,
    path: &Path,
    cleared: usize,
    color: ColorMode,
) -> std::io::Result<()> {
    let msg = format!("Cleared {} entries and removed {}", cleared, path.display());
    if color.enabled() {
        writeln!(w, "{}", msg.green())
    } else {
        writeln!(w, "{}", msg)
    }
}

/// Print the settings just written to a config file.
pub fn print_config_saved(
    w: &mut dyn Write,
    path: &Path,
    config: &ConfigFile,
    color: ColorMode,
) -> std::io::Result<()> {
    let msg = format!("Saved config to {}", path.display());
    if color.enabled() {
        writeln!(w, "{}", msg.green())?;
    } else {
        writeln!(w, "{}", msg)?;
    }
    let section = config.cache.as_ref();
    if let Some(p) = section.and_then(|c| c.persist_path.as_deref()) {
        writeln!(w, "  persist_path = {}", p)?;
    }
    if let Some(n) = section.and_then(|c| c.max_size) {
        writeln!(w, "  max_size     = {}", n)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(smiles: &str, model: &str, value: Value) -> SnapshotEntry<Value> {
        SnapshotEntry {
            smiles: smiles.into(),
            model: model.into(),
            value,
        }
    }

    fn sample() -> Vec<SnapshotEntry<Value>> {
        vec![
            entry("CCO", "electra", json!(["CHEBI:30879"])),
            entry("O", "resgated", json!(["CHEBI:15377"])),
            entry("c1ccccc1", "electra", json!(["CHEBI:16716"])),
        ]
    }

    fn render<F>(f: F) -> String
    where
        F: FnOnce(&mut dyn Write) -> std::io::Result<()>,
    {
        let mut buf = Vec::new();
        {
            let w: &mut dyn Write = &mut buf;
            f(w).unwrap();
        }
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn stats_counts_per_model() {
        let out = render(|w| {
            print_stats(w, Path::new("cache.db"), &sample(), 100, ColorMode(false))
        });
        assert!(out.contains("Snapshot: cache.db (sqlite)"));
        assert!(out.contains("Entries:  3 (capacity 100)"));
        assert!(out.contains("  electra   2"));
        assert!(out.contains("  resgated  1"));
        assert!(!out.contains("dropped on load"));
    }

    #[test]
    fn stats_warns_when_over_capacity() {
        let out = render(|w| print_stats(w, Path::new("c.json"), &sample(), 2, ColorMode(false)));
        assert!(out.contains("(json)"));
        assert!(out.contains("the 1 least recently used will be dropped on load"));
    }

    #[test]
    fn list_filters_by_model_in_order() {
        let mut buf = Vec::new();
        let printed = print_entries(&mut buf, &sample(), Some("electra"), ColorMode(false)).unwrap();
        let out = String::from_utf8(buf).unwrap();
        assert_eq!(printed, 2);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines,
            vec![
                "electra\tCCO\t[\"CHEBI:30879\"]",
                "electra\tc1ccccc1\t[\"CHEBI:16716\"]",
            ]
        );
    }

    #[test]
    fn list_reports_empty() {
        let mut buf = Vec::new();
        let printed = print_entries(&mut buf, &sample(), Some("chemlog"), ColorMode(false)).unwrap();
        assert_eq!(printed, 0);
        assert_eq!(String::from_utf8(buf).unwrap(), "No cached entries\n");
    }

    #[test]
    fn value_is_pretty_json() {
        let out = render(|w| print_value(w, &json!({"classes": ["CHEBI:1"]})));
        assert_eq!(out, "{\n  \"classes\": [\n    \"CHEBI:1\"\n  ]\n}\n");
    }

    #[test]
    fn config_saved_lists_settings() {
        let config = ConfigFile {
            cache: Some(chebifier_cache::config_file::CacheSection {
                max_size: Some(250),
                persist_path: None,
            }),
        };
        let out = render(|w| {
            print_config_saved(w, Path::new("config.toml"), &config, ColorMode(false))
        });
        assert_eq!(out, "Saved config to config.toml\n  max_size     = 250\n");
    }

    #[test]
    fn cleared_message() {
        let out = render(|w| print_cleared(w, Path::new("cache.json"), 4, ColorMode(false)));
        assert_eq!(out, "Cleared 4 entries and removed cache.json\n");
    }
}
