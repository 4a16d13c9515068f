//! Proof sinks
//!
//! The oracle hands each included file's proof to a sink, once, in leaf
//! order. A failing sink aborts emission for the rest of the batch.

use std::io::Write;
use thiserror::Error;
use tracing::trace;

use crate::oracle::FileProof;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Proof rejected: {0}")]
    Rejected(String),
}

/// Consumer of per-file inclusion proofs
pub trait ProofSink: Send {
    fn emit(&mut self, proof: FileProof) -> Result<(), SinkError>;
}

/// Writes one JSON object per line
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
    written: usize,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Flush and return the underlying writer
    pub fn finish(mut self) -> Result<W, SinkError> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: Write + Send> ProofSink for JsonLinesSink<W> {
    fn emit(&mut self, proof: FileProof) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, &proof)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        trace!(cid = %proof.identifier, leaf_index = proof.proof.leaf_index, "Wrote proof");
        Ok(())
    }
}

/// Collects proofs in memory
#[derive(Debug, Default)]
pub struct VecSink {
    proofs: Vec<FileProof>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn proofs(&self) -> &[FileProof] {
        &self.proofs
    }

    pub fn into_proofs(self) -> Vec<FileProof> {
        self.proofs
    }
}

impl ProofSink for VecSink {
    fn emit(&mut self, proof: FileProof) -> Result<(), SinkError> {
        self.proofs.push(proof);
        Ok(())
    }
}

/// Adapts a closure into a sink
pub struct FnSink<F> {
    func: F,
}

impl<F> FnSink<F>
where
    F: FnMut(FileProof) -> Result<(), SinkError> + Send,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> ProofSink for FnSink<F>
where
    F: FnMut(FileProof) -> Result<(), SinkError> + Send,
{
    fn emit(&mut self, proof: FileProof) -> Result<(), SinkError> {
        (self.func)(proof)
    }
}

/// Parse proofs written by [`JsonLinesSink`], skipping blank lines
pub fn read_json_lines(text: &str) -> Result<Vec<FileProof>, SinkError> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(SinkError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{block_cid, RAW_CODEC};
    use crate::merkle::StampTree;
    use crate::stamp::{Leaf, StampFunction};

    fn sample_proofs(n: usize) -> Vec<FileProof> {
        let f = StampFunction::default();
        let leaves: Vec<Leaf> = (0..n)
            .map(|i| Leaf::new(block_cid(&[i as u8], RAW_CODEC).unwrap(), 100))
            .collect();
        let tree = StampTree::build(leaves.iter().map(|l| f.stamp(l)).collect());

        leaves
            .into_iter()
            .enumerate()
            .map(|(i, leaf)| FileProof {
                identifier: leaf.identifier,
                proof: tree.proof(i).unwrap(),
                leaf,
                fragment: None,
            })
            .collect()
    }

    #[test]
    fn test_json_lines_sink() {
        let proofs = sample_proofs(3);
        let mut sink = JsonLinesSink::new(Vec::new());
        for p in proofs.clone() {
            sink.emit(p).unwrap();
        }
        assert_eq!(sink.written(), 3);

        let bytes = sink.finish().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert_eq!(read_json_lines(&text).unwrap(), proofs);
    }

    #[test]
    fn test_read_json_lines_rejects_garbage() {
        assert!(read_json_lines("\n\n").unwrap().is_empty());
        assert!(matches!(
            read_json_lines("{\"identifier\": 1}"),
            Err(SinkError::Serialization(_))
        ));
    }

    #[test]
    fn test_fn_sink() {
        let mut seen = Vec::new();
        {
            let mut sink = FnSink::new(|p: FileProof| {
                seen.push(p.proof.leaf_index);
                Ok(())
            });
            for p in sample_proofs(4) {
                sink.emit(p).unwrap();
            }
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);

        let mut failing = FnSink::new(|_p: FileProof| Err(SinkError::Rejected("full".into())));
        let p = sample_proofs(1).remove(0);
        assert!(failing.emit(p).is_err());
    }

    #[test]
    fn test_vec_sink() {
        let mut sink = VecSink::new();
        for p in sample_proofs(2) {
            sink.emit(p).unwrap();
        }
        assert_eq!(sink.proofs().len(), 2);
        assert_eq!(sink.into_proofs()[1].proof.leaf_index, 1);
    }
}
