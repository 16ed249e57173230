//! Producer/consumer tests for the byte channel.
//!
//! These run a pushing thread against a popping thread and check that the
//! byte stream is reassembled exactly, whatever the interleaving.

use std::thread;
use std::time::Duration;

use bytebridge_buffer::{BoundedByteChannel, CancellationToken};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn drain(channel: &BoundedByteChannel, sizes: &[usize]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut step = 0;
    loop {
        let mut buf = vec![0u8; sizes[step % sizes.len()]];
        step += 1;
        let popped = channel.pop(&mut buf, None);
        out.extend_from_slice(&buf[..popped.len]);
        if popped.reached_eof {
            return out;
        }
    }
}

#[test]
fn test_fixed_chunks_reassembled_with_varying_pops() {
    const CHUNK: usize = 97;
    const CHUNKS: usize = 400;

    let expected = pattern(CHUNK * CHUNKS);
    let channel = BoundedByteChannel::new();
    let producer = channel.clone();
    let source = expected.clone();

    let handle = thread::spawn(move || {
        for chunk in source.chunks(CHUNK) {
            assert!(producer.push(chunk));
            if chunk[0] % 7 == 0 {
                thread::yield_now();
            }
        }
        producer.close();
    });

    // Sizes chosen to land both on and across chunk boundaries.
    let actual = drain(&channel, &[1, 96, 97, 98, 200, 13, 4096]);
    handle.join().unwrap();

    assert_eq!(actual.len(), expected.len());
    assert_eq!(actual, expected);
}

#[test]
fn test_irregular_pushes_sum_to_total() {
    let lengths = [1usize, 0, 5, 1024, 3, 77, 8192, 2];
    let channel = BoundedByteChannel::new();
    let producer = channel.clone();

    let handle = thread::spawn(move || {
        let mut offset = 0usize;
        let data = pattern(lengths.iter().sum());
        for len in lengths.iter().copied().filter(|len| *len > 0) {
            producer.push(&data[offset..offset + len]);
            offset += len;
            thread::sleep(Duration::from_millis(1));
        }
        producer.push(&[]);
        data
    });

    let actual = drain(&channel, &[4000]);
    let expected = handle.join().unwrap();
    assert_eq!(actual, expected);
}

#[test]
fn test_pushes_after_eof_never_reach_consumer() {
    let channel = BoundedByteChannel::new();
    channel.push(b"before");
    channel.close();

    for _ in 0..10 {
        assert!(!channel.push(b"after"));
    }

    assert_eq!(drain(&channel, &[3]), b"before");
}

#[test]
fn test_cancelled_pop_then_resume() {
    let channel = BoundedByteChannel::new();
    let token = CancellationToken::new();
    let producer = channel.clone();
    let canceller = token.clone();

    let handle = thread::spawn(move || {
        producer.push(b"first");
        thread::sleep(Duration::from_millis(30));
        canceller.cancel();
        thread::sleep(Duration::from_millis(10));
        producer.push(b"second");
        producer.close();
    });

    let mut buf = [0u8; 64];
    let popped = channel.pop(&mut buf, Some(&token));
    assert!(popped.len <= b"first".len());
    let mut collected = buf[..popped.len].to_vec();

    collected.extend(drain(&channel, &[4]));
    handle.join().unwrap();

    assert_eq!(collected, b"firstsecond");
}
