use crate::error::{DesignError, DesignResult, ErrorCode};
use bio::io::fasta;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;

/// A user-supplied sequence designed as one exon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceTarget {
    /// 1-based record number, used as the variant part of labels.
    pub id: String,
    pub name: String,
    pub sequence: String,
    pub species: String,
}

impl SequenceTarget {
    pub fn label(&self) -> String {
        format!("{} {}", self.id, self.name)
    }
}

fn record_name(record: &fasta::Record) -> String {
    match record.desc() {
        Some(desc) => format!("{} {}", record.id(), desc),
        None => record.id().to_string(),
    }
}

fn targets_from_reader<R: Read>(reader: R, species: &str) -> DesignResult<Vec<SequenceTarget>> {
    let mut ret = vec![];
    for record in fasta::Reader::new(reader).records() {
        let record = record
            .map_err(|e| DesignError::malformed(format!("Could not parse FASTA input: {e}")))?;
        if record.seq().is_empty() {
            continue;
        }
        ret.push(SequenceTarget {
            id: (ret.len() + 1).to_string(),
            name: record_name(&record),
            sequence: String::from_utf8_lossy(record.seq()).to_ascii_uppercase(),
            species: species.to_string(),
        });
    }
    Ok(ret)
}

/// Parses FASTA text; records without sequence are skipped.
pub fn parse_fasta(text: &str, species: &str) -> DesignResult<Vec<SequenceTarget>> {
    targets_from_reader(text.trim_start().as_bytes(), species)
}

pub fn from_fasta_file(filename: &str, species: &str) -> DesignResult<Vec<SequenceTarget>> {
    let file = File::open(filename).map_err(|e| {
        DesignError::new(ErrorCode::Io, format!("Could not open FASTA file '{filename}': {e}"))
    })?;
    targets_from_reader(file, species)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_records_become_numbered_uppercase_targets() {
        let targets = parse_fasta(
            ">ExampleGene1 first\nATGCGTACGTagctagc\nTAGCTA\n>Empty\n>ExampleGene2\ncgtacgtagc\n",
            "Homo sapiens",
        )
        .unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].name, "ExampleGene1 first");
        assert_eq!(targets[0].sequence, "ATGCGTACGTAGCTAGCTAGCTA");
        assert_eq!(targets[0].label(), "1 ExampleGene1 first");
        assert_eq!(targets[1].id, "2");
        assert_eq!(targets[1].sequence, "CGTACGTAGC");
        assert_eq!(targets[1].species, "Homo sapiens");
    }

    #[test]
    fn test_text_without_header_is_malformed() {
        let err = parse_fasta("ACGTACGT\n", "Homo sapiens").unwrap_err();
        assert_eq!(err.code, ErrorCode::Malformed);
    }

    #[test]
    fn test_fasta_file() {
        let td = tempdir().unwrap();
        let path = td.path().join("input.fa");
        std::fs::write(&path, ">demo\nACGT\nACGT\n").unwrap();
        let targets = from_fasta_file(&path.to_string_lossy(), "Mus musculus").unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].sequence, "ACGTACGT");
        let err = from_fasta_file("/nonexistent/input.fa", "Mus musculus").unwrap_err();
        assert_eq!(err.code, ErrorCode::Io);
    }
}
