use anyhow::{anyhow, Context as _};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

pub const COORDINATES_FILE: &str = "coordinates.csv";
pub const SECTION_FILE: &str = "section.csv";
pub const CELLTYPE_FILE: &str = "celltype.csv";
pub const GENE_EXPRESSION_FILE: &str = "gene_expression.csv";
pub const TF_ACTIVITY_FILE: &str = "tf_activity.csv";

/// Any unreadable source is fatal for the whole load; no partial dataset is
/// ever assembled from fewer than five sources.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to load {name}: {source:#}")]
    Source {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// The five independently keyed lookups, one per CSV source.
#[derive(Debug, Default)]
pub struct SourceMaps {
    pub coords: HashMap<String, (f32, f32)>,
    pub sections: HashMap<String, String>,
    pub regions: HashMap<String, String>,
    pub genes: HashMap<String, HashMap<String, f32>>,
    pub tfs: HashMap<String, HashMap<String, f32>>,
}

/// Loads all five sources concurrently and waits for every one of them.
pub fn load_sources(dir: &Path) -> Result<SourceMaps, LoadError> {
    std::thread::scope(|scope| {
        let coords = scope.spawn(|| load_coordinates(&dir.join(COORDINATES_FILE)));
        let sections = scope.spawn(|| load_keyed_column(&dir.join(SECTION_FILE), "section"));
        let regions = scope.spawn(|| load_keyed_column(&dir.join(CELLTYPE_FILE), "celltype"));
        let genes = scope.spawn(|| load_matrix(&dir.join(GENE_EXPRESSION_FILE)));
        let tfs = scope.spawn(|| load_matrix(&dir.join(TF_ACTIVITY_FILE)));

        let maps = SourceMaps {
            coords: join_source("coordinates", coords)?,
            sections: join_source("sections", sections)?,
            regions: join_source("celltypes", regions)?,
            genes: join_source("gene expression", genes)?,
            tfs: join_source("tf activity", tfs)?,
        };
        log::info!(
            "sources loaded: coords={} sections={} celltypes={} genes={} tfs={}",
            maps.coords.len(),
            maps.sections.len(),
            maps.regions.len(),
            maps.genes.len(),
            maps.tfs.len()
        );
        Ok(maps)
    })
}

fn join_source<T>(
    name: &'static str,
    handle: std::thread::ScopedJoinHandle<'_, anyhow::Result<T>>,
) -> Result<T, LoadError> {
    match handle.join() {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(LoadError::Source { name, source }),
        Err(_) => Err(LoadError::Source {
            name,
            source: anyhow!("loader thread panicked"),
        }),
    }
}

/// Ragged rows are row-level damage, handled by the loaders' skip-and-count
/// paths; only an unreadable file is fatal.
fn flexible_reader(path: &Path) -> anyhow::Result<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| path.display().to_string())
}

/// The identifier column is usually exported with an empty header name.
/// Fall back to a column literally named "id", then to the first column.
fn id_column(headers: &csv::StringRecord) -> usize {
    if let Some(idx) = headers.iter().position(|h| h.trim().is_empty()) {
        return idx;
    }
    headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case("id"))
        .unwrap_or(0)
}

fn named_column(headers: &csv::StringRecord, name: &str) -> anyhow::Result<usize> {
    headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(name))
        .ok_or_else(|| anyhow!("missing column {name:?}"))
}

/// Matrix columns that repeat the cell identifier rather than carrying a trait.
fn is_identifier_header(header: &str) -> bool {
    header.contains("Cell") || header.contains("cellName")
}

fn load_coordinates(path: &Path) -> anyhow::Result<HashMap<String, (f32, f32)>> {
    let mut reader = flexible_reader(path)?;
    let headers = reader.headers()?.clone();
    let id_col = id_column(&headers);
    let x_col = named_column(&headers, "x")?;
    let y_col = named_column(&headers, "y")?;

    let mut out = HashMap::new();
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = record?;
        let id = record.get(id_col).unwrap_or("").trim();
        let x = record.get(x_col).and_then(|v| v.trim().parse::<f32>().ok());
        let y = record.get(y_col).and_then(|v| v.trim().parse::<f32>().ok());
        match (id.is_empty(), x, y) {
            (false, Some(x), Some(y)) if x.is_finite() && y.is_finite() => {
                out.insert(id.to_string(), (x, y));
            }
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        log::warn!("{}: skipped {skipped} malformed coordinate rows", path.display());
    }
    Ok(out)
}

/// Two-column sources: cell id plus one named categorical value.
fn load_keyed_column(path: &Path, column: &str) -> anyhow::Result<HashMap<String, String>> {
    let mut reader = flexible_reader(path)?;
    let headers = reader.headers()?.clone();
    let id_col = id_column(&headers);
    let value_col = named_column(&headers, column)?;

    let mut out = HashMap::new();
    for record in reader.records() {
        let record = record?;
        let id = record.get(id_col).unwrap_or("").trim();
        let value = record.get(value_col).unwrap_or("").trim();
        if !id.is_empty() && !value.is_empty() {
            out.insert(id.to_string(), value.to_string());
        }
    }
    Ok(out)
}

/// Wide matrix sources: cell id plus one numeric column per trait.
/// Non-numeric cells are omitted from the per-cell map, never zero-filled.
fn load_matrix(path: &Path) -> anyhow::Result<HashMap<String, HashMap<String, f32>>> {
    let mut reader = flexible_reader(path)?;
    let headers = reader.headers()?.clone();
    let id_col = id_column(&headers);

    let value_cols: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(idx, header)| {
            *idx != id_col && !header.trim().is_empty() && !is_identifier_header(header)
        })
        .map(|(idx, header)| (idx, header.to_string()))
        .collect();

    let mut out = HashMap::new();
    for record in reader.records() {
        let record = record?;
        let id = record.get(id_col).unwrap_or("").trim();
        if id.is_empty() {
            continue;
        }
        let mut values = HashMap::with_capacity(value_cols.len());
        for (idx, name) in &value_cols {
            if let Some(v) = record.get(*idx).and_then(|v| v.trim().parse::<f32>().ok()) {
                if v.is_finite() {
                    values.insert(name.clone(), v);
                }
            }
        }
        out.insert(id.to_string(), values);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_coordinates_with_empty_id_header() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            COORDINATES_FILE,
            ",x,y\nc1,1.5,2.0\nc2,3.0,4.0\n",
        );
        let coords = load_coordinates(&dir.path().join(COORDINATES_FILE)).unwrap();
        assert_eq!(coords.len(), 2);
        assert_eq!(coords["c1"], (1.5, 2.0));
    }

    #[test]
    fn test_coordinates_skip_malformed_rows() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            COORDINATES_FILE,
            "id,x,y\nc1,1.0,2.0\n,5.0,6.0\nc3,oops,6.0\nc4,1.0,\n",
        );
        let coords = load_coordinates(&dir.path().join(COORDINATES_FILE)).unwrap();
        assert_eq!(coords.len(), 1);
        assert!(coords.contains_key("c1"));
    }

    #[test]
    fn test_ragged_rows_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            COORDINATES_FILE,
            "id,x,y\nc1,1.0,2.0\nc2,3.0\nc3,5.0,6.0,extra\n",
        );
        // c2 is short a field and gets skipped; c3's extra field is ignored
        let coords = load_coordinates(&dir.path().join(COORDINATES_FILE)).unwrap();
        assert_eq!(coords.len(), 2);
        assert!(!coords.contains_key("c2"));
        assert_eq!(coords["c3"], (5.0, 6.0));
    }

    #[test]
    fn test_matrix_skips_identifier_like_columns() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            GENE_EXPRESSION_FILE,
            ",CellName,Sox2,Tbx5\nc1,c1,0.5,1.5\nc2,c2,2.5,nan\n",
        );
        let genes = load_matrix(&dir.path().join(GENE_EXPRESSION_FILE)).unwrap();
        assert_eq!(genes["c1"].len(), 2);
        assert!(!genes["c1"].contains_key("CellName"));
        // NaN is non-finite: the key must be absent, not zero.
        assert_eq!(genes["c2"].len(), 1);
        assert!(!genes["c2"].contains_key("Tbx5"));
    }

    #[test]
    fn test_load_sources_joins_all_five() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), COORDINATES_FILE, ",x,y\nc1,1.0,2.0\n");
        write(dir.path(), SECTION_FILE, ",section\nc1,E125\n");
        write(dir.path(), CELLTYPE_FILE, ",celltype\nc1,Heart\n");
        write(dir.path(), GENE_EXPRESSION_FILE, ",Sox2\nc1,0.25\n");
        write(dir.path(), TF_ACTIVITY_FILE, ",Gata1 activity(direct)\nc1,1.25\n");

        let maps = load_sources(dir.path()).unwrap();
        assert_eq!(maps.coords.len(), 1);
        assert_eq!(maps.sections["c1"], "E125");
        assert_eq!(maps.regions["c1"], "Heart");
        assert_eq!(maps.genes["c1"]["Sox2"], 0.25);
        assert_eq!(maps.tfs["c1"]["Gata1 activity(direct)"], 1.25);
    }

    #[test]
    fn test_missing_source_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), COORDINATES_FILE, ",x,y\nc1,1.0,2.0\n");
        // sections and the rest are absent
        let err = load_sources(dir.path()).unwrap_err();
        let LoadError::Source { .. } = err;
    }
}
