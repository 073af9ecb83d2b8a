use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use noodles::{fasta, fastq};

use crate::errors::PoaError;
use crate::graphs::poa::POAGraph;

/// A sequence read from FASTA or FASTQ
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequenceRecord {
    pub name: String,
    pub description: Option<String>,
    pub sequence: Vec<u8>,
    pub quality: Option<Vec<u8>>,
}

fn open_reader(path: &Path) -> Result<Box<dyn BufRead>, PoaError> {
    let is_gzipped = path.extension().is_some_and(|ext| ext == "gz");

    let reader: Box<dyn BufRead> = if is_gzipped {
        Box::new(File::open(path).map(MultiGzDecoder::new).map(BufReader::new)?)
    } else {
        Box::new(File::open(path).map(BufReader::new)?)
    };

    Ok(reader)
}

fn is_fastq(path: &Path) -> bool {
    let is_gzipped = path.extension().is_some_and(|ext| ext == "gz");
    let non_gzip_fname = if is_gzipped { path.with_extension("") } else { path.to_path_buf() };

    non_gzip_fname.extension().is_some_and(|ext| ext == "fastq" || ext == "fq")
}

fn to_string(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

pub fn read_fasta(reader_inner: impl BufRead) -> Result<Vec<SequenceRecord>, PoaError> {
    let mut reader = fasta::io::Reader::new(reader_inner);

    reader.records()
        .map(|record| {
            let r = record?;
            let description = r.description().map(|d| to_string(d));

            Ok(SequenceRecord {
                name: to_string(r.name()),
                description,
                sequence: r.sequence().as_ref().to_vec(),
                quality: None,
            })
        })
        .collect()
}

pub fn read_fastq(reader_inner: impl BufRead) -> Result<Vec<SequenceRecord>, PoaError> {
    let mut reader = fastq::io::Reader::new(reader_inner);

    reader.records()
        .map(|record| {
            let r = record?;
            let description: &[u8] = r.description();

            let sequence = r.sequence().to_vec();
            let quality = r.quality_scores().to_vec();
            if sequence.len() != quality.len() {
                return Err(PoaError::InvalidInput(format!(
                    "record {} has {} bases but {} quality scores",
                    to_string(r.name()), sequence.len(), quality.len()
                )));
            }

            Ok(SequenceRecord {
                name: to_string(r.name()),
                description: (!description.is_empty()).then(|| to_string(description)),
                sequence,
                quality: Some(quality),
            })
        })
        .collect()
}

/// Read all records of a FASTA or FASTQ file, optionally gzip compressed. The format is derived
/// from the file extension.
pub fn read_sequences(path: impl AsRef<Path>) -> Result<Vec<SequenceRecord>, PoaError> {
    let path = path.as_ref();
    let reader = open_reader(path)?;

    if is_fastq(path) {
        read_fastq(reader)
    } else {
        read_fasta(reader)
    }
}

fn write_fasta_record<W: Write>(writer: &mut W, name: &str, sequence: &[u8]) -> Result<(), PoaError> {
    writeln!(writer, ">{name}")?;
    writer.write_all(sequence)?;
    writeln!(writer)?;

    Ok(())
}

/// Write a single sequence as FASTA record
pub fn write_sequence<W: Write>(writer: &mut W, name: &str, sequence: &[u8]) -> Result<(), PoaError> {
    write_fasta_record(writer, name, sequence)
}

/// Write the multiple sequence alignment of all sequences in the graph as FASTA. Rows are named
/// after `names` where available.
pub fn write_msa_fasta<W: Write>(
    writer: &mut W,
    graph: &mut POAGraph,
    names: &[String],
    include_consensus: bool,
) -> Result<(), PoaError> {
    let num_sequences = graph.sequences().len();
    let msa = graph.generate_msa(include_consensus);

    for (i, row) in msa.iter().enumerate() {
        let name = if i >= num_sequences {
            "Consensus".to_string()
        } else {
            names.get(i).cloned().unwrap_or_else(|| format!("seq{i}"))
        };

        write_fasta_record(writer, &name, row)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::aligner::alignment::{AlignedPair, Alignment};
    use crate::graphs::poa::{POAGraph, POANodeIndex};
    use super::{read_fasta, read_fastq, write_msa_fasta};

    #[test]
    fn test_read_fasta() {
        let data = b">backbone\nACGT\nACGT\n>read1 span=2-6\nGTAC\n";
        let records = read_fasta(&data[..]).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "backbone");
        assert_eq!(records[0].sequence, b"ACGTACGT".to_vec());
        assert_eq!(records[1].description.as_deref(), Some("span=2-6"));
        assert!(records[1].quality.is_none());
    }

    #[test]
    fn test_read_fastq() {
        let data = b"@read1 span=0-3\nACGT\n+\nIIII\n";
        let records = read_fastq(&data[..]).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "read1");
        assert_eq!(records[0].description.as_deref(), Some("span=0-3"));
        assert_eq!(records[0].quality.as_deref(), Some(&b"IIII"[..]));
    }

    #[test]
    fn test_write_msa() {
        let mut graph = POAGraph::new();
        graph.add_alignment_with_weight(&Alignment::new(), b"ACGT", 1).unwrap();

        let aln: Alignment<POANodeIndex> = [(0, 0), (1, 1), (3, 2)].iter()
            .map(|(n, q)| AlignedPair::new(Some(POANodeIndex::new(*n)), Some(*q)))
            .collect();
        graph.add_alignment_with_weight(&aln, b"ACT", 1).unwrap();

        let mut out = Vec::new();
        write_msa_fasta(&mut out, &mut graph, &["backbone".to_string()], true).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            ">backbone\nACGT\n>seq1\nAC-T\n>Consensus\nACGT\n"
        );
    }
}
