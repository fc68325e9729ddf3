//! Volumes mounted inside files of other volumes.

use cfs::{SeekOrigin, Volume};

#[test]
fn inner_volume_round_trips_through_outer() {
    let dir = tempfile::tempdir().unwrap();
    let outer_path = dir.path().join("outer.cfs");

    {
        let outer = Volume::create_on_file(&outer_path, 4096 * 2000).unwrap();
        let inner = Volume::create_embedded(&outer, "\\test.vfs", 4096 * 1000).unwrap();

        inner.create_directory("\\test").unwrap();
        let mut file = inner.create_file("\\test\\file.dat").unwrap();
        file.write_data(&[5, 4, 3, 2, 1]).unwrap();
        file.set_file_size(100).unwrap();
        file.close();

        inner.close().unwrap();
        drop(inner);
        outer.close().unwrap();
    }

    let outer = Volume::mount_file(&outer_path).unwrap();
    let inner = Volume::mount_embedded(&outer, "\\test.vfs").unwrap();

    let mut file = inner.open_file("\\test\\file.dat", false).unwrap();
    assert_eq!(file.file_size().unwrap(), 100);
    assert_eq!(file.read_data(5).unwrap(), vec![5, 4, 3, 2, 1]);
    file.close();

    inner.close().unwrap();
    drop(inner);
    outer.close().unwrap();
}

#[test]
fn host_file_node_stays_locked_while_mounted() {
    let outer = Volume::create_in_memory(4096 * 2000).unwrap();
    let inner = Volume::create_embedded(&outer, "\\inner.vfs", 4096 * 500).unwrap();

    // The inner mount write-locks the host file for its whole life.
    assert!(matches!(
        outer.open_file("\\inner.vfs", false),
        Err(cfs::VfsError::LockTimeout)
    ));

    inner.close().unwrap();
    drop(inner);

    // Releasing the mount releases the host node.
    let mut handle = outer.open_file("\\inner.vfs", false).unwrap();
    assert_eq!(handle.file_size().unwrap(), 4096 * 500);
    handle.close();
    outer.close().unwrap();
}

#[test]
fn two_levels_of_nesting() {
    let outer = Volume::create_in_memory(4096 * 4000).unwrap();
    let middle = Volume::create_embedded(&outer, "\\middle.vfs", 4096 * 2000).unwrap();
    let innermost = Volume::create_embedded(&middle, "\\deep.vfs", 4096 * 500).unwrap();

    let mut file = innermost.create_file("\\note.txt").unwrap();
    file.write_data(b"nested three deep").unwrap();
    file.set_position(0, SeekOrigin::Begin).unwrap();
    assert_eq!(file.read_data(64).unwrap(), b"nested three deep");
    file.close();

    innermost.close().unwrap();
    drop(innermost);
    middle.close().unwrap();
    drop(middle);
    outer.close().unwrap();
}
