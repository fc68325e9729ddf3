//! Reader/writer exclusion across real threads.

use cfs::{VfsError, Volume};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn writer_blocks_readers_until_close() {
    let volume = Volume::create_in_memory(4096 * 2000).unwrap();
    let mut writer = volume.create_file("\\file1.txt").unwrap();
    writer.write_data(&vec![0x5A_u8; 10_000]).unwrap();

    // A reader on another thread fails within the lock window.
    let contender = volume.clone();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let started = Instant::now();
        let result = contender.open_file("\\file1.txt", false);
        tx.send((result.err(), started.elapsed())).unwrap();
    });
    let (error, elapsed) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(matches!(error, Some(VfsError::LockTimeout)));
    assert!(elapsed >= Duration::from_millis(900));

    writer.close();

    // With the writer gone, parallel readers make progress together.
    let mut workers = Vec::new();
    for _ in 0..2 {
        let reader_volume = volume.clone();
        workers.push(thread::spawn(move || {
            let mut reader = reader_volume.open_file("\\file1.txt", false).unwrap();
            for _ in 0..100 {
                let chunk = reader.read_data(100).unwrap();
                assert_eq!(chunk.len(), 100);
                assert!(chunk.iter().all(|b| *b == 0x5A));
            }
            reader.close();
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn two_writers_exclude_each_other() {
    let volume = Volume::create_in_memory(4096 * 2000).unwrap();
    volume.create_file("\\shared.bin").unwrap().close();

    let first = volume.open_file("\\shared.bin", true).unwrap();
    let contender = volume.clone();
    let second = thread::spawn(move || contender.open_file("\\shared.bin", true).err())
        .join()
        .unwrap();
    assert!(matches!(second, Some(VfsError::LockTimeout)));
    drop(first);

    // Dropping the handle released the lock.
    let reopened = volume.open_file("\\shared.bin", true).unwrap();
    drop(reopened);
}

#[test]
fn independent_subtrees_progress_in_parallel() {
    let volume = Volume::create_in_memory(4096 * 2000).unwrap();
    volume.create_directory("\\left").unwrap();
    volume.create_directory("\\right").unwrap();

    let mut workers = Vec::new();
    for side in ["left", "right"] {
        let worker_volume = volume.clone();
        workers.push(thread::spawn(move || {
            for i in 0..20 {
                let path = format!("\\{side}\\f{i}.dat");
                let mut file = worker_volume.create_file(&path).unwrap();
                file.write_data(&[i as u8; 512]).unwrap();
                file.close();
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    let left: Vec<String> = volume.find_files("\\left", "*", false).unwrap().collect();
    let right: Vec<String> = volume.find_files("\\right", "*", false).unwrap().collect();
    assert_eq!(left.len(), 20);
    assert_eq!(right.len(), 20);
}
