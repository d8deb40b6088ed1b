//! Packing of numbered sentence spans into token-bounded groups.

use ingest::Tokenizer;
use sha2::{Digest, Sha256};

/// A run of contiguous span indices packed into one text unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanGroup {
    pub indices: Vec<usize>,
}

impl SpanGroup {
    /// Content address of the group: SHA-256 of `"<count>-<i0>-<i1>-..."`.
    pub fn key(&self) -> String {
        hash_indices(&self.indices)
    }
}

pub fn hash_indices(indices: &[usize]) -> String {
    let rep = format!(
        "{}-{}",
        indices.len(),
        indices
            .iter()
            .map(usize::to_string)
            .collect::<Vec<_>>()
            .join("-")
    );
    hex::encode(Sha256::digest(rep.as_bytes()))
}

/// Split ascending indices into maximal runs of adjacent values.
pub fn contiguous_runs(indices: &[usize]) -> Vec<Vec<usize>> {
    let mut runs: Vec<Vec<usize>> = Vec::new();
    for &idx in indices {
        match runs.last_mut() {
            Some(run) if run.last().is_some_and(|&prev| prev + 1 == idx) => run.push(idx),
            _ => runs.push(vec![idx]),
        }
    }
    runs
}

#[derive(Debug, Clone, Copy)]
pub struct SpanPacker {
    max_tokens: usize,
}

impl SpanPacker {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Pack `indices` (ascending) into groups.
    ///
    /// A group never spans a gap in the indices, and a group of two or more
    /// spans stays within `max_tokens`. A span larger than the budget on
    /// its own becomes a singleton group, untruncated.
    pub fn pack(&self, indices: &[usize], token_counts: &[usize]) -> Vec<SpanGroup> {
        let count = |i: usize| token_counts.get(i).copied().unwrap_or(0);
        let mut groups = Vec::new();

        for run in contiguous_runs(indices) {
            let mut current: Vec<usize> = Vec::new();
            let mut length = 0;

            for idx in run {
                let next = length + count(idx);
                if !current.is_empty() && next > self.max_tokens {
                    groups.push(SpanGroup {
                        indices: std::mem::take(&mut current),
                    });
                    length = count(idx);
                } else {
                    length = next;
                }
                current.push(idx);
            }

            if !current.is_empty() {
                groups.push(SpanGroup { indices: current });
            }
        }

        groups
    }

    /// Pack every span of `spans`, counting tokens with `tokenizer`.
    pub fn pack_spans(&self, spans: &[String], tokenizer: &dyn Tokenizer) -> Vec<SpanGroup> {
        let counts: Vec<usize> = spans.iter().map(|s| tokenizer.count_tokens(s)).collect();
        let indices: Vec<usize> = (0..spans.len()).collect();
        self.pack(&indices, &counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest::UnicodeTokenizer;

    #[test]
    fn test_contiguous_runs() {
        assert_eq!(
            contiguous_runs(&[0, 1, 2, 5, 6, 9]),
            vec![vec![0, 1, 2], vec![5, 6], vec![9]]
        );
        assert!(contiguous_runs(&[]).is_empty());
    }

    #[test]
    fn test_pack_respects_budget() {
        let packer = SpanPacker::new(10);
        let counts = [4, 4, 4, 3, 20, 2];

        let groups = packer.pack(&[0, 1, 2, 3, 4, 5], &counts);
        let indices: Vec<Vec<usize>> = groups.iter().map(|g| g.indices.clone()).collect();
        assert_eq!(indices, vec![vec![0, 1], vec![2, 3], vec![4], vec![5]]);

        for group in groups.iter().filter(|g| g.indices.len() >= 2) {
            let total: usize = group.indices.iter().map(|&i| counts[i]).sum();
            assert!(total <= 10);
        }
    }

    #[test]
    fn test_pack_never_bridges_gaps() {
        let packer = SpanPacker::new(100);
        let groups = packer.pack(&[1, 2, 4], &[1, 1, 1, 1, 1]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].indices, vec![1, 2]);
        assert_eq!(groups[1].indices, vec![4]);
    }

    #[test]
    fn test_oversized_span_is_singleton() {
        let packer = SpanPacker::new(5);
        let groups = packer.pack(&[0, 1], &[50, 1]);

        assert_eq!(groups[0].indices, vec![0]);
        assert_eq!(groups[1].indices, vec![1]);
    }

    #[test]
    fn test_group_key_is_order_sensitive() {
        let a = SpanGroup { indices: vec![1, 2] };
        let b = SpanGroup { indices: vec![1, 2] };
        let c = SpanGroup { indices: vec![12] };

        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
        assert_eq!(a.key().len(), 64);
    }

    #[test]
    fn test_pack_spans_with_tokenizer() {
        let packer = SpanPacker::new(6);
        let spans = vec![
            "Alice founded Acme.".to_string(),
            "Bob joined.".to_string(),
            "Acme grew quickly in Europe.".to_string(),
        ];

        let groups = packer.pack_spans(&spans, &UnicodeTokenizer);
        // 4 + 3 tokens overflow the budget of 6
        assert_eq!(groups.len(), 3);
    }
}
