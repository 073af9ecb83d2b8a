pub mod dot;
pub mod fasta;

pub use dot::format_as_dot;
pub use fasta::{read_sequences, write_msa_fasta, SequenceRecord};
