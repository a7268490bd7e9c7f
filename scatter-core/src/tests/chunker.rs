use std::io::Cursor;

use crate::chunker::{Chunker, Joiner, chunk_count, join};
use crate::error::ScatterError;
use crate::testutil::pattern;

fn split(data: &[u8], chunk_size: usize) -> Vec<(u64, u64, Vec<u8>)> {
    Chunker::new(Cursor::new(data.to_vec()), chunk_size)
        .unwrap()
        .map(|c| {
            let c = c.unwrap();
            (c.index, c.offset, c.data)
        })
        .collect()
}

#[test]
fn chunks_cover_entire_input() {
    let data = pattern(5_000);
    let chunks = split(&data, 1024);
    assert_eq!(chunks.len(), 5);

    let mut expected_offset = 0u64;
    for (i, (index, offset, bytes)) in chunks.iter().enumerate() {
        assert_eq!(*index, i as u64);
        assert_eq!(*offset, expected_offset, "gap or overlap at chunk {i}");
        expected_offset += bytes.len() as u64;
    }
    assert_eq!(expected_offset, data.len() as u64);
    assert_eq!(chunks.last().unwrap().2.len(), 5_000 % 1024);
}

#[test]
fn exact_multiple_has_no_remainder_chunk() {
    let data = pattern(4 * 1024);
    let chunks = split(&data, 1024);
    assert_eq!(chunks.len(), 4);
    assert!(chunks.iter().all(|(_, _, b)| b.len() == 1024));
    assert_eq!(chunk_count(4 * 1024, 1024), 4);
}

#[test]
fn empty_input_yields_no_chunks() {
    assert!(split(&[], 1024).is_empty());
    assert_eq!(chunk_count(0, 1024), 0);
}

#[test]
fn zero_chunk_size_rejected() {
    let err = Chunker::new(Cursor::new(vec![1u8]), 0).err().unwrap();
    assert!(matches!(err, ScatterError::Config(_)));
}

/// Reader that hands out at most 7 bytes per call.
struct Trickle(Cursor<Vec<u8>>);

impl std::io::Read for Trickle {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = buf.len().min(7);
        self.0.read(&mut buf[..n])
    }
}

#[test]
fn short_reads_still_fill_chunks() {
    let data = pattern(300);
    let chunks: Vec<_> = Chunker::new(Trickle(Cursor::new(data.clone())), 128)
        .unwrap()
        .map(|c| c.unwrap().data.len())
        .collect();
    assert_eq!(chunks, vec![128, 128, 44]);
}

#[test]
fn resume_continues_numbering() {
    let data = pattern(3 * 100 + 10);
    let resumed: Vec<_> = Chunker::resume_at(Cursor::new(data.clone()), 100, 200)
        .unwrap()
        .map(|c| c.unwrap())
        .collect();
    assert_eq!(resumed.len(), 2);
    assert_eq!(resumed[0].index, 2);
    assert_eq!(resumed[0].offset, 200);
    assert_eq!(resumed[0].data, data[200..300]);
    assert_eq!(resumed[1].data, data[300..]);
}

#[test]
fn resume_rejects_unaligned_offset() {
    let err = Chunker::resume_at(Cursor::new(pattern(500)), 100, 150)
        .err()
        .unwrap();
    assert!(matches!(err, ScatterError::Ordering { expected: 1, got: None }));
}

#[test]
fn split_then_join_restores_input() {
    let data = pattern(10_000);
    let rejoined = join(split(&data, 777).into_iter().map(|(i, _, b)| (i, b))).unwrap();
    assert_eq!(rejoined, data);
}

#[test]
fn joiner_rejects_gap() {
    let mut j = Joiner::new(Vec::new());
    j.push(0, b"abc").unwrap();
    let err = j.push(2, b"ghi").unwrap_err();
    assert!(matches!(err, ScatterError::Ordering { expected: 1, got: Some(2) }));
}

#[test]
fn joiner_finish_detects_missing_tail() {
    let mut j = Joiner::new(Vec::new());
    j.push(0, b"abc").unwrap();
    j.push(1, b"def").unwrap();
    assert_eq!(j.bytes_written(), 6);
    let err = j.finish(3).unwrap_err();
    assert!(matches!(err, ScatterError::Ordering { expected: 2, got: None }));
}
