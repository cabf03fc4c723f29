use crate::catalog::{self, TraitCatalog};
use crate::ingest::{self, LoadError, SourceMaps};
use crate::normalize;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

pub const UNKNOWN_REGION: &str = "Unknown";

/// Naming convention reserved for the synthetic fallback dataset, so that
/// fallback output can never be mistaken for real cells.
pub const SAMPLE_ID_PREFIX: &str = "sample_cell_";
pub const SAMPLE_SLICE_PREFIX: &str = "sample_s";

const SAMPLE_CELLS: usize = 100;
const SAMPLE_SEED: u64 = 0x5c17;
const SAMPLE_REGIONS: [&str; 5] =
    ["Neural Tube", "Skeletal Muscle", "Heart", "Kidney", "Liver"];
const SAMPLE_GENES: [&str; 4] = ["GeneA", "GeneB", "GeneC", "GeneD"];
const SAMPLE_TFS: [&str; 2] = ["TF1_activity", "TF2_activity"];

/// One fused per-cell record. `x`/`y` are display coordinates once
/// `normalize` has run; raw coordinates are not retained. Absent trait values
/// are omitted from `traits`, never zero-filled.
#[derive(Debug, Clone)]
pub struct CellRecord {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub slice: String,
    pub region: String,
    pub traits: HashMap<String, f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// All candidate ids were dropped during the join.
    NoJoinableCells,
    /// No data directory was supplied at startup.
    NoDataDirectory,
}

/// Which path produced the record set. The fallback is a last-resort
/// diagnostic dataset, not error recovery, so callers can tell them apart.
#[derive(Debug)]
pub enum FusionOutcome {
    Loaded { records: Vec<CellRecord>, dropped: usize },
    Fallback { records: Vec<CellRecord>, reason: FallbackReason },
}

/// Joins the five source maps by cell identifier.
///
/// A record is emitted only when both a coordinate pair and a section are
/// resolvable for the id; everything else about the cell degrades softly
/// (region to "Unknown", traits by omission). Dropped ids are only counted.
pub fn fuse(maps: &SourceMaps) -> FusionOutcome {
    let mut candidates: BTreeSet<&str> = BTreeSet::new();
    candidates.extend(maps.coords.keys().map(String::as_str));
    candidates.extend(maps.sections.keys().map(String::as_str));
    candidates.extend(maps.regions.keys().map(String::as_str));
    candidates.extend(maps.genes.keys().map(String::as_str));
    candidates.extend(maps.tfs.keys().map(String::as_str));

    let mut records = Vec::new();
    let mut dropped = 0usize;
    for id in candidates {
        let (Some(&(x, y)), Some(slice)) = (maps.coords.get(id), maps.sections.get(id)) else {
            dropped += 1;
            continue;
        };
        let region = maps
            .regions
            .get(id)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_REGION.to_string());

        // TF values first, gene values win on a key collision.
        let mut traits = HashMap::new();
        if let Some(tfs) = maps.tfs.get(id) {
            traits.extend(tfs.iter().map(|(k, v)| (k.clone(), *v)));
        }
        if let Some(genes) = maps.genes.get(id) {
            traits.extend(genes.iter().map(|(k, v)| (k.clone(), *v)));
        }

        records.push(CellRecord {
            id: id.to_string(),
            x,
            y,
            slice: slice.clone(),
            region,
            traits,
        });
    }

    log::info!("fused {} cells, dropped {dropped}", records.len());
    if records.is_empty() {
        log::warn!("no joinable cells; switching to the synthetic sample dataset");
        return FusionOutcome::Fallback {
            records: sample_records(),
            reason: FallbackReason::NoJoinableCells,
        };
    }
    FusionOutcome::Loaded { records, dropped }
}

/// Deterministic synthetic dataset so downstream components always have
/// non-empty input. Ids and slice names use the reserved `sample_` prefix.
pub fn sample_records() -> Vec<CellRecord> {
    let mut rng = StdRng::seed_from_u64(SAMPLE_SEED);
    let mut records = Vec::with_capacity(SAMPLE_CELLS);
    for i in 0..SAMPLE_CELLS {
        let slice_no = match i {
            0..=32 => 1,
            33..=65 => 2,
            _ => 3,
        };
        let mut traits = HashMap::new();
        for gene in SAMPLE_GENES {
            traits.insert(gene.to_string(), rng.gen_range(0.0..5.0));
        }
        for tf in SAMPLE_TFS {
            traits.insert(tf.to_string(), rng.gen_range(0.0..3.0));
        }
        records.push(CellRecord {
            id: format!("{SAMPLE_ID_PREFIX}{i}"),
            x: rng.gen_range(50.0..550.0),
            y: rng.gen_range(50.0..850.0),
            slice: format!("{SAMPLE_SLICE_PREFIX}{slice_no}"),
            region: SAMPLE_REGIONS[i % SAMPLE_REGIONS.len()].to_string(),
            traits,
        });
    }
    records
}

/// The immutable per-session dataset: fused records plus everything derived
/// from them once at load time.
pub struct Snapshot {
    pub records: Vec<CellRecord>,
    pub slices: Vec<String>,
    pub regions: Vec<String>,
    pub catalog: TraitCatalog,
    pub dropped: usize,
    pub fallback: Option<FallbackReason>,
}

impl Snapshot {
    /// Full load pipeline: concurrent ingest, fuse, per-slice normalization,
    /// trait catalog. The fallback dataset is already in display coordinates
    /// and skips normalization.
    pub fn load(dir: &Path) -> Result<Self, LoadError> {
        let maps = ingest::load_sources(dir)?;
        Ok(match fuse(&maps) {
            FusionOutcome::Loaded { mut records, dropped } => {
                normalize::normalize(&mut records);
                Self::from_records(records, dropped, None)
            }
            FusionOutcome::Fallback { records, reason } => {
                Self::from_records(records, 0, Some(reason))
            }
        })
    }

    pub fn sample(reason: FallbackReason) -> Self {
        Self::from_records(sample_records(), 0, Some(reason))
    }

    pub fn from_records(
        records: Vec<CellRecord>,
        dropped: usize,
        fallback: Option<FallbackReason>,
    ) -> Self {
        let slices: BTreeSet<String> = records.iter().map(|r| r.slice.clone()).collect();
        let regions: BTreeSet<String> = records.iter().map(|r| r.region.clone()).collect();
        let catalog = catalog::build_catalog(&records);
        Snapshot {
            records,
            slices: slices.into_iter().collect(),
            regions: regions.into_iter().collect(),
            catalog,
            dropped,
            fallback,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}
