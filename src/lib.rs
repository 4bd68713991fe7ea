pub use labprimer_protocol as protocol;

pub mod about;
pub mod config;
pub mod error;
pub mod exons;
pub mod export;
pub mod fasta_input;
pub mod gene_xml;
pub mod http;
pub mod ncbi;
pub mod oracle;
pub mod orchestrator;
pub mod primer3_oracle;
pub mod primer_blast;
pub mod search;
pub mod species;
pub mod thermo;
pub mod validation;
