use crate::error::{DesignError, DesignResult, ErrorCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;

pub const GENOME_TARGET: &str = "genome";
const BUILTIN_SPECIES_JSON: &str = include_str!("../assets/ucsc_species.json");

/// UCSC Genome Browser coordinates of one species.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeciesEntry {
    pub org: String,
    pub db: String,
    #[serde(default)]
    pub targets: Vec<String>,
}

impl SpeciesEntry {
    pub fn has_genome_target(&self) -> bool {
        self.targets.iter().any(|t| t == GENOME_TARGET)
    }

    /// Transcript-sequence tracks, i.e. every target but the genome.
    pub fn relative_targets(&self) -> impl Iterator<Item = &str> {
        self.targets
            .iter()
            .map(String::as_str)
            .filter(|t| *t != GENOME_TARGET)
    }
}

/// Scientific species name to in-silico PCR database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeciesTable {
    entries: HashMap<String, SpeciesEntry>,
}

impl SpeciesTable {
    pub fn builtin() -> DesignResult<Self> {
        Self::from_json_str(BUILTIN_SPECIES_JSON)
    }

    pub fn from_json_str(text: &str) -> DesignResult<Self> {
        let entries: HashMap<String, SpeciesEntry> = serde_json::from_str(text)
            .map_err(|e| DesignError::malformed(format!("Could not parse species table: {e}")))?;
        Ok(Self { entries })
    }

    pub fn from_json_file(path: &str) -> DesignResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            DesignError::new(
                ErrorCode::Io,
                format!("Could not read species table '{path}': {e}"),
            )
        })?;
        Self::from_json_str(&text).map_err(|e| {
            DesignError::malformed(format!("Species table '{path}': {}", e.message))
        })
    }

    /// The configured table if a path is given, the embedded one otherwise.
    pub fn load(path: Option<&str>) -> DesignResult<Self> {
        match path {
            Some(path) => Self::from_json_file(path),
            None => Self::builtin(),
        }
    }

    pub fn insert(&mut self, species: &str, entry: SpeciesEntry) {
        self.entries.insert(species.to_string(), entry);
    }

    /// Finds a species by scientific name, falling back to the UCSC common
    /// name (`org`), both case-insensitive.
    pub fn lookup(&self, species: &str) -> Option<&SpeciesEntry> {
        let species = species.trim();
        if let Some(entry) = self.entries.get(species) {
            return Some(entry);
        }
        self.entries
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(species))
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|(_, entry)| entry.org.eq_ignore_ascii_case(species))
            })
            .map(|(_, entry)| entry)
    }

    pub fn list_species(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
