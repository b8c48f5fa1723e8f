use std::path::{Path, PathBuf};
use std::sync::Arc;

use feedr_value::Value;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;

use crate::config::{ReaderConfig, RecordFormat};
use crate::error::{Error, Result};

fn resolve_path(path: &Path, base_dir: Option<&Path>) -> PathBuf {
    match base_dir {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    }
}

fn read_error(path: &Path, err: impl std::fmt::Display) -> Error {
    Error::Configuration(format!("failed to read `{}`: {err}", path.display()))
}

/// Loads the record set of a sequential reader. Read once, at configuration time.
pub(crate) fn load_rows(cfg: &ReaderConfig, base_dir: Option<&Path>) -> Result<Vec<Value>> {
    let Some(path) = &cfg.path else {
        return Ok(cfg.rows.clone());
    };
    if !cfg.rows.is_empty() {
        return Err(Error::Configuration(
            "sequential-reader takes either `path` or inline `rows`, not both".to_string(),
        ));
    }

    let path = resolve_path(path, base_dir);
    let format = cfg.format.unwrap_or_else(|| {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => RecordFormat::Csv,
            Some(ext) if ext.eq_ignore_ascii_case("json") => RecordFormat::Json,
            _ => RecordFormat::Lines,
        }
    });

    let rows = match format {
        RecordFormat::Csv => read_csv(&path)?,
        RecordFormat::Json => read_json(&path)?,
        RecordFormat::Lines => read_lines(&path)?,
    };

    tracing::debug!(path = %path.display(), %format, rows = rows.len(), "loaded record set");
    Ok(rows)
}

/// Every CSV record becomes an object keyed by the header row; cells stay strings.
fn read_csv(path: &Path) -> Result<Vec<Value>> {
    let mut reader = csv::Reader::from_path(path).map_err(|err| read_error(path, err))?;
    let headers: Vec<Arc<str>> = reader
        .headers()
        .map_err(|err| read_error(path, err))?
        .iter()
        .map(|h| Arc::<str>::from(h.trim()))
        .collect();

    let mut rows = Vec::new();
    for (line_num, record) in reader.records().enumerate() {
        let record = record.map_err(|err| {
            Error::Configuration(format!(
                "failed to parse CSV line {} in `{}`: {err}",
                line_num + 2,
                path.display()
            ))
        })?;
        rows.push(Value::row(
            headers
                .iter()
                .cloned()
                .zip(record.iter().map(Value::from)),
        ));
    }
    Ok(rows)
}

/// A JSON array; each element is one row.
fn read_json(path: &Path) -> Result<Vec<Value>> {
    let text = std::fs::read_to_string(path).map_err(|err| read_error(path, err))?;
    match serde_json::from_str::<Value>(&text).map_err(|err| read_error(path, err))? {
        Value::Array(items) => Ok(items),
        _ => Err(Error::Configuration(format!(
            "`{}` must contain a JSON array",
            path.display()
        ))),
    }
}

fn read_lines(path: &Path) -> Result<Vec<Value>> {
    let text = std::fs::read_to_string(path).map_err(|err| read_error(path, err))?;
    Ok(text
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .map(Value::from)
        .collect())
}

/// Names of the regular files directly under `path`, sorted.
pub(crate) fn load_directory(path: &Path, base_dir: Option<&Path>) -> Result<Vec<Value>> {
    let path = resolve_path(path, base_dir);
    let mut names = Vec::new();
    for entry in std::fs::read_dir(&path).map_err(|err| read_error(&path, err))? {
        let entry = entry.map_err(|err| read_error(&path, err))?;
        let is_file = entry
            .file_type()
            .map_err(|err| read_error(&path, err))?
            .is_file();
        if is_file {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort_unstable();
    Ok(names.into_iter().map(Value::from).collect())
}

/// Shuffles once. With a seed the order is reproducible across runs.
pub(crate) fn shuffle_rows(rows: &mut [Value], seed: Option<u64>) {
    let mut rng = match seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_os_rng(),
    };
    rows.shuffle(&mut rng);
}
