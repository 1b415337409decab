//! Subcommand handlers.

use crate::{Commands, ConfigAction};
use anyhow::Context;
use datastep_core::data_step;
use datastep_core::{
    CanonicalLibrary, CsvOptions, DataLibrary, DataSet, DelimitedTextLibrary, EngineConfig,
    ReadOptions, SortKey, SortOptions,
};
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn handle_command(command: Commands, workspace: &Path, config: &EngineConfig) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    match command {
        Commands::Config { action } => handle_config(action, workspace, config, &mut stdout),
        command => run_data_command(command, config, &mut stdout),
    }
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config: &EngineConfig,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".datastep");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                writeln!(
                    out,
                    "Configuration file already exists at: {}",
                    config_path.display()
                )?;
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&EngineConfig::default())?;
            std::fs::write(&config_path, toml_str)?;
            writeln!(out, "Created configuration file at: {}", config_path.display())?;
            Ok(())
        }
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(config)?;
            writeln!(out, "{}", toml_str)?;
            Ok(())
        }
    }
}

/// Run every subcommand that works on the data library.
pub(crate) fn run_data_command(
    command: Commands,
    config: &EngineConfig,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let library = CanonicalLibrary::from_config(config);
    match command {
        Commands::List => {
            for name in library.list()? {
                writeln!(out, "{name}")?;
            }
            Ok(())
        }
        Commands::Schema { name } => {
            let ds = open(&library, &name)?;
            for variable in ds.variables() {
                writeln!(
                    out,
                    "{}\t{}\t{}",
                    variable.index,
                    variable.name,
                    serde_json::to_string(&variable.meta)?
                )?;
            }
            Ok(())
        }
        Commands::Head { name, rows } => head(&library, &name, rows, out),
        Commands::Count { name } => {
            let mut ds = open(&library, &name)?;
            let mut count = 0u64;
            data_step::read(&mut ds, &[], |_| {
                count += 1;
                Ok(())
            })?;
            writeln!(out, "{count}")?;
            Ok(())
        }
        Commands::Import {
            file,
            name,
            delimiter,
        } => {
            let (text, stem) = text_library(&file, config, delimiter)?;
            let name = name.unwrap_or_else(|| stem.clone());
            let mut source = text
                .get(&stem)
                .with_context(|| format!("Failed to open {}", file.display()))?;
            let mut target = library.build_replace(&name)?;
            let rows = copy_rows(&mut source, &mut target)?;
            tracing::info!(data_set = %name, rows, "Imported delimited text");
            writeln!(out, "Imported {rows} rows into '{name}'")?;
            Ok(())
        }
        Commands::Export {
            name,
            file,
            delimiter,
        } => {
            let mut source = open(&library, &name)?;
            let (text, stem) = text_library(&file, config, delimiter)?;
            let mut target = text.build_replace(&stem)?;
            let rows = copy_rows(&mut source, &mut target)?;
            tracing::info!(data_set = %name, rows, "Exported delimited text");
            writeln!(out, "Exported {rows} rows to {}", file.display())?;
            Ok(())
        }
        Commands::Sort {
            input,
            output,
            by,
            split_size,
        } => {
            if input == output {
                anyhow::bail!(
                    "Cannot sort '{input}' into itself; choose a different output data set"
                );
            }
            let mut options = SortOptions::new(SortKey::parse_list(&by)?)
                .with_split_size(split_size.unwrap_or(config.sort.split_size))
                .with_merge_fan_in(config.sort.merge_fan_in);
            options.work_dir = config.sort.work_dir.clone();
            let mut source = open(&library, &input)?;
            let mut target = library.build_replace(&output)?;
            let summary = data_step::sort(&mut source, &mut target, &options)?;
            writeln!(
                out,
                "Sorted {} rows into '{}' using {} chunk(s)",
                summary.rows, output, summary.chunks
            )?;
            Ok(())
        }
        Commands::Config { .. } => anyhow::bail!("config is not a data command"),
    }
}

fn open(library: &CanonicalLibrary, name: &str) -> anyhow::Result<DataSet> {
    library
        .get(name)
        .with_context(|| format!("Failed to open data set '{name}' in {}", library.root().display()))
}

fn head(library: &CanonicalLibrary, name: &str, limit: usize, out: &mut impl Write) -> anyhow::Result<()> {
    let mut ds = open(library, name)?;
    ds.open_for_read(ReadOptions::default().with_lag_rows(0).with_lead_rows(0))?;
    let mut printed = 0;
    while printed < limit {
        let row = ds.read_row()?;
        if !row.is_data() {
            break;
        }
        let record: serde_json::Map<String, serde_json::Value> = row
            .fields()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        writeln!(out, "{}", serde_json::Value::Object(record))?;
        printed += 1;
        if row.last_row() {
            break;
        }
    }
    ds.close()?;
    Ok(())
}

/// A delimited text library rooted at the file's directory, and the file stem.
fn text_library(
    file: &Path,
    config: &EngineConfig,
    delimiter: Option<char>,
) -> anyhow::Result<(DelimitedTextLibrary, String)> {
    let stem = file
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("'{}' has no usable file name", file.display()))?
        .to_string();
    let dir = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let mut options: CsvOptions = config.delimited.clone();
    options.header_row = true;
    options.trust_header = true;
    if let Some(delimiter) = delimiter {
        options.delimiter = delimiter;
    }
    options.extension = file
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_string();
    Ok((DelimitedTextLibrary::new(dir, options), stem))
}

/// Copy every row of `source` into `target`, which inherits its schema.
fn copy_rows(source: &mut DataSet, target: &mut DataSet) -> anyhow::Result<u64> {
    target.like(source)?;
    let mut rows = 0u64;
    data_step::create(&mut [target], |out| {
        let out = &mut *out[0];
        data_step::read(source, &[], |row| {
            out.copy_from(row, None)?;
            rows += 1;
            out.write_row()
        })
    })?;
    Ok(rows)
}
