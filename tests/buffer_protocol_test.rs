/*
 * SHM RELAY - LOCAL BUFFER PROTOCOL TEST
 * =================================================================
 * Component Name: tests/buffer_protocol_test.rs
 * Core Responsibility: Write/read semantics, lock exclusion and corrupted-length recovery on real mappings.
 * Design Pattern: Black Box Testing
 * =================================================================
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use shm_relay::buffer::{generate_name, LocalBuffer, SharedBuffer, DATA_OFFSET, LEN_OFFSET, MAX_DATA_SIZE};
use shm_relay::RelayError;

// =================================================================
// Test helpers
// =================================================================

fn anonymous_buffer(lock_timeout: Duration) -> LocalBuffer {
    let region = SharedBuffer::anonymous(&generate_name()).unwrap();
    LocalBuffer::new(region, lock_timeout)
}

fn buffer() -> LocalBuffer {
    anonymous_buffer(Duration::from_secs(2))
}

// =================================================================
// Write / read
// =================================================================

#[test]
fn test_fresh_buffer_reads_empty() {
    assert_eq!(buffer().read().unwrap(), "");
}

#[test]
fn test_round_trip_ascii_and_unicode() {
    let buf = buffer();

    buf.write("Hello, shared world").unwrap();
    assert_eq!(buf.read().unwrap(), "Hello, shared world");

    buf.write("héllo wörld ✓ 共有").unwrap();
    assert_eq!(buf.read().unwrap(), "héllo wörld ✓ 共有");

    buf.write("line one\nline two").unwrap();
    assert_eq!(buf.read().unwrap(), "line one\nline two");
}

#[test]
fn test_trailing_whitespace_is_trimmed() {
    let buf = buffer();
    buf.write("padded   \n\t ").unwrap();
    assert_eq!(buf.read().unwrap(), "padded");

    let header = buf.region().read_raw(LEN_OFFSET, 4).unwrap();
    assert_eq!(u32::from_le_bytes([header[0], header[1], header[2], header[3]]), 6);
}

#[test]
fn test_shorter_write_clears_previous_tail() {
    let buf = buffer();
    buf.write("a much longer first message").unwrap();
    buf.write("short").unwrap();
    assert_eq!(buf.read().unwrap(), "short");

    let tail = buf.region().read_raw(DATA_OFFSET + 5, 32).unwrap();
    assert!(tail.iter().all(|b| *b == 0));
}

#[test]
fn test_exact_capacity_fits() {
    let buf = buffer();
    let full = "x".repeat(MAX_DATA_SIZE);
    buf.write(&full).unwrap();
    assert_eq!(buf.read().unwrap(), full);
}

#[test]
fn test_oversize_write_is_rejected_and_content_kept() {
    let buf = buffer();
    buf.write("keep me").unwrap();

    let too_big = "y".repeat(MAX_DATA_SIZE + 1);
    match buf.write(&too_big) {
        Err(RelayError::PayloadTooLarge { size, max }) => {
            assert_eq!(size, MAX_DATA_SIZE + 1);
            assert_eq!(max, MAX_DATA_SIZE);
        }
        other => panic!("expected PayloadTooLarge, got {:?}", other),
    }

    assert_eq!(buf.read().unwrap(), "keep me");
    assert!(!buf.lock().is_locked());
}

// =================================================================
// Lock
// =================================================================

#[test]
fn test_lock_is_exclusive_and_released() {
    let buf = anonymous_buffer(Duration::from_millis(100));

    let guard = buf.lock().acquire(Duration::from_millis(100)).unwrap();
    assert!(buf.lock().is_locked());
    assert!(!buf.lock().try_acquire());

    let started = Instant::now();
    assert!(matches!(buf.write("blocked"), Err(RelayError::LockTimeout(_))));
    assert!(started.elapsed() >= Duration::from_millis(90));
    assert!(matches!(buf.read(), Err(RelayError::LockTimeout(_))));

    guard.release().unwrap();
    assert!(!buf.lock().is_locked());
    buf.write("free again").unwrap();
    assert_eq!(buf.read().unwrap(), "free again");
}

#[test]
fn test_dropped_guard_releases_lock() {
    let buf = buffer();
    {
        let _guard = buf.lock().acquire(Duration::from_millis(100)).unwrap();
        assert!(buf.lock().is_locked());
    }
    assert!(!buf.lock().is_locked());
}

#[test]
fn test_release_without_holding_fails() {
    let buf = buffer();
    assert!(matches!(buf.lock().release(), Err(RelayError::LockNotHeld)));
}

#[test]
fn test_waiter_acquires_after_holder_releases() {
    let buf = Arc::new(buffer());
    let holder = Arc::clone(&buf);

    let guard = buf.lock().acquire(Duration::from_millis(100)).unwrap();
    let waiter = thread::spawn(move || holder.write("after release"));

    thread::sleep(Duration::from_millis(50));
    guard.release().unwrap();

    waiter.join().unwrap().unwrap();
    assert_eq!(buf.read().unwrap(), "after release");
}

#[test]
fn test_concurrent_writers_never_tear() {
    let buf = Arc::new(anonymous_buffer(Duration::from_secs(10)));
    let stop = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = ['a', 'b', 'c', 'd']
        .into_iter()
        .enumerate()
        .map(|(i, ch)| {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                for round in 0..50 {
                    let len = 1 + (round * 37 + i * 500) % MAX_DATA_SIZE;
                    buf.write(&ch.to_string().repeat(len)).unwrap();
                }
            })
        })
        .collect();

    let reader = {
        let buf = Arc::clone(&buf);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut reads = 0;
            while !stop.load(Ordering::Relaxed) {
                let text = buf.read().unwrap();
                if let Some(first) = text.chars().next() {
                    assert!(text.chars().all(|c| c == first), "torn read of {} bytes", text.len());
                }
                reads += 1;
            }
            reads
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    assert!(reader.join().unwrap() > 0);
}

// =================================================================
// Corrupted length recovery
// =================================================================

#[test]
fn test_out_of_range_length_stops_at_first_nul() {
    let buf = buffer();
    buf.write("hello").unwrap();
    buf.region().write_raw(LEN_OFFSET, &5000u32.to_le_bytes()).unwrap();

    assert_eq!(buf.read().unwrap(), "hello");
}

#[test]
fn test_out_of_range_length_with_nul_in_middle() {
    let buf = buffer();
    buf.region().write_raw(DATA_OFFSET, b"abc\0def").unwrap();
    buf.region().write_raw(LEN_OFFSET, &u32::MAX.to_le_bytes()).unwrap();

    assert_eq!(buf.read().unwrap(), "abc");
}

#[test]
fn test_out_of_range_length_without_nul_returns_whole_region() {
    let buf = buffer();
    buf.region().write_raw(DATA_OFFSET, &vec![b'z'; MAX_DATA_SIZE]).unwrap();
    buf.region().write_raw(LEN_OFFSET, &(MAX_DATA_SIZE as u32 + 1).to_le_bytes()).unwrap();

    assert_eq!(buf.read().unwrap(), "z".repeat(MAX_DATA_SIZE));
}

#[test]
fn test_invalid_utf8_is_replaced() {
    let buf = buffer();
    buf.region().write_raw(DATA_OFFSET, &[b'o', b'k', 0xff, b'!']).unwrap();
    buf.region().write_raw(LEN_OFFSET, &4u32.to_le_bytes()).unwrap();

    assert_eq!(buf.read().unwrap(), "ok\u{fffd}!");
}

#[test]
fn test_raw_access_is_bounds_checked() {
    let buf = buffer();
    assert!(buf.region().read_raw(4090, 10).is_err());
    assert!(buf.region().write_raw(4096, &[1]).is_err());
}

// =================================================================
// Named regions
// =================================================================

#[test]
fn test_named_region_is_shared_between_mappings() {
    let name = generate_name();
    let host = LocalBuffer::new(SharedBuffer::create(&name).unwrap(), Duration::from_millis(100));
    let peer = LocalBuffer::new(SharedBuffer::open(&name).unwrap(), Duration::from_millis(100));

    host.write("from the host").unwrap();
    assert_eq!(peer.read().unwrap(), "from the host");

    peer.write("from the peer").unwrap();
    assert_eq!(host.read().unwrap(), "from the peer");

    // The lock byte is shared too.
    let guard = host.lock().acquire(Duration::from_millis(100)).unwrap();
    assert!(peer.lock().is_locked());
    assert!(matches!(peer.write("blocked"), Err(RelayError::LockTimeout(_))));
    guard.release().unwrap();
    assert!(!peer.lock().is_locked());
}

#[test]
fn test_duplicate_create_fails_and_drop_unlinks() {
    let name = generate_name();
    let region = SharedBuffer::create(&name).unwrap();
    let path = region.path().unwrap().to_path_buf();
    assert!(path.exists());

    assert!(matches!(SharedBuffer::create(&name), Err(RelayError::Bootstrap(_))));

    drop(region);
    assert!(!path.exists());
    assert!(SharedBuffer::open(&name).is_err());
}

#[test]
fn test_invalid_names_are_rejected() {
    for name in ["", "has space", "a/b", ".."] {
        assert!(matches!(SharedBuffer::anonymous(name), Err(RelayError::InvalidName(_))));
    }
}
