//! End-to-end tests over an in-memory disk.

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use rand::{Rng as _, SeedableRng as _, rngs::StdRng};
use sectorfs::{Error, FileSys, MAX_FILE_SIZE, MemDisk, Params, SECTOR_SIZE};

fn new_fs() -> FileSys<MemDisk> {
    FileSys::format(MemDisk::new(4096), Params::default()).unwrap()
}

fn params(cache_frames: usize) -> Params {
    Params {
        cache_frames,
        ..Params::default()
    }
}

#[test]
fn sparse_write_far_past_eof() {
    let fs = new_fs();
    fs.create("/sparse", 0).unwrap();
    let file = fs.open("/sparse").unwrap();

    assert_eq!(file.write_at(&[0x41, 0x42, 0x43, 0x44], 1_000_000), 4);
    assert_eq!(file.len(), 1_000_004);

    let mut buf = [0; 4];
    assert_eq!(file.read_at(&mut buf, 1_000_000), 4);
    assert_eq!(buf, [0x41, 0x42, 0x43, 0x44]);

    // The hole before the written range reads as zeros.
    assert_eq!(file.read_at(&mut buf, 0), 4);
    assert_eq!(buf, [0; 4]);
}

#[test]
fn initial_size_reads_as_zeros() {
    let fs = new_fs();
    fs.create("/prezero", 100).unwrap();
    let file = fs.open("/prezero").unwrap();
    assert_eq!(file.len(), 100);

    let mut buf = [0xFF; 128];
    assert_eq!(file.read_at(&mut buf, 0), 100);
    assert!(buf[..100].iter().all(|&b| b == 0));
}

#[test]
fn write_crossing_sector_boundary() {
    let fs = new_fs();
    fs.create("/cross", 0).unwrap();
    let file = fs.open("/cross").unwrap();

    assert_eq!(file.write_at(&[0xAA; 1024], 500), 1024);
    // Extend so the bytes around the written range are readable.
    assert_eq!(file.write_at(&[0], 2047), 1);

    let mut buf = [0; 2048];
    assert_eq!(file.read_at(&mut buf, 0), 2048);
    assert!(buf[..500].iter().all(|&b| b == 0));
    assert!(buf[500..1524].iter().all(|&b| b == 0xAA));
    assert!(buf[1524..].iter().all(|&b| b == 0));
}

#[test]
fn eviction_preserves_writes() {
    // More open files than cache frames: every read forces evictions, and
    // dirty victims must survive the round trip through the device.
    let fs = FileSys::format(MemDisk::new(4096), params(4)).unwrap();

    let files: Vec<_> = (0..8)
        .map(|i| {
            let path = format!("/f{i}");
            fs.create(&path, 0).unwrap();
            fs.open(&path).unwrap()
        })
        .collect();

    for (i, file) in files.iter().enumerate() {
        assert_eq!(file.write_at(&[i as u8 + 1; 1], 0), 1);
    }
    for (i, file) in files.iter().enumerate() {
        let mut buf = [0];
        assert_eq!(file.read_at(&mut buf, 0), 1);
        assert_eq!(buf[0], i as u8 + 1);
    }
}

#[test]
fn sequential_byte_reads_with_read_ahead() {
    let fs = new_fs();
    let content: Vec<u8> = (0..6 * SECTOR_SIZE).map(|i| (i % 251) as u8).collect();
    fs.create("/seq", 0).unwrap();
    let file = fs.open("/seq").unwrap();
    assert_eq!(file.write_at(&content, 0), content.len());

    let mut reader = fs.open("/seq").unwrap();
    let mut got = Vec::new();
    let mut byte = [0];
    while reader.read(&mut byte) == 1 {
        got.push(byte[0]);
    }
    assert_eq!(got, content);
}

#[test]
fn dir_add_remove_add() {
    let fs = new_fs();
    fs.create_dir("/d").unwrap();
    fs.create("/d/a", 0).unwrap();
    fs.create("/d/b", 0).unwrap();

    let d = fs.open_dir("/d").unwrap();
    let b = d.lookup("b").unwrap();

    fs.remove("/d/a").unwrap();
    assert_eq!(d.lookup("a"), None);
    fs.create("/d/a", 0).unwrap();

    assert!(d.lookup("a").is_some());
    assert_eq!(d.lookup("b"), Some(b));

    let mut d = fs.open_dir("/d").unwrap();
    let mut names = Vec::new();
    while let Some(name) = d.read_entry() {
        names.push(name.to_string());
    }
    names.sort();
    assert_eq!(names, ["a", "b"]);
}

#[test]
fn nonempty_dir_removal_refused() {
    let fs = new_fs();
    fs.create_dir("/d").unwrap();
    fs.create("/d/f", 0).unwrap();

    assert_eq!(fs.remove("/d"), Err(Error::NotEmpty));
    // Refusal leaves the directory intact.
    assert!(fs.open("/d/f").is_ok());

    fs.remove("/d/f").unwrap();
    fs.remove("/d").unwrap();
    assert_eq!(fs.open("/d").err(), Some(Error::NotFound));
}

#[test]
fn reserved_slots_never_listed() {
    let fs = new_fs();
    fs.create_dir("/d").unwrap();
    let mut d = fs.open_dir("/d").unwrap();
    assert!(d.read_entry().is_none());

    fs.create("/d/x", 0).unwrap();
    let mut d = fs.open_dir("/d").unwrap();
    let names: Vec<_> = std::iter::from_fn(|| d.read_entry()).collect();
    assert_eq!(names.len(), 1);
    assert_eq!(names[0].as_str(), "x");
}

#[test]
fn dot_entries_resolve() {
    let fs = new_fs();
    fs.create_dir("/d").unwrap();
    fs.create_dir("/e").unwrap();
    fs.create("/d/f", 0).unwrap();

    assert!(fs.open("/d/./f").is_ok());
    assert!(fs.open_dir("/d/../e").is_ok());

    let d = fs.open_dir("/d").unwrap();
    assert!(fs.open_at(&d, "f").is_ok());
    assert!(fs.open_at(&d, "../e/../d/f").is_ok());
}

#[test]
fn same_sector_yields_same_handle() {
    let fs = new_fs();
    fs.create("/id", 0).unwrap();
    let a = fs.open("/id").unwrap();
    let b = fs.open("/id").unwrap();
    assert!(a.inode().is_same(b.inode()));

    let c = a.reopen();
    assert!(c.inode().is_same(b.inode()));
}

#[test]
fn deny_write_blocks_all_handles() {
    let fs = new_fs();
    fs.create("/exe", 0).unwrap();
    let mut denier = fs.open("/exe").unwrap();
    let other = fs.open("/exe").unwrap();

    denier.deny_write();
    assert_eq!(denier.write_at(b"x", 0), 0);
    assert_eq!(other.write_at(b"x", 0), 0);

    // Closing the denying handle re-enables writes.
    drop(denier);
    assert_eq!(other.write_at(b"x", 0), 1);
}

#[test]
fn length_never_decreases() {
    let fs = new_fs();
    fs.create("/grow", 0).unwrap();
    let file = fs.open("/grow").unwrap();

    assert_eq!(file.write_at(&[1; 100], 0), 100);
    assert_eq!(file.len(), 100);
    assert_eq!(file.write_at(&[2; 10], 0), 10);
    assert_eq!(file.len(), 100);
}

#[test]
fn duplicate_names_rejected() {
    let fs = new_fs();
    fs.create("/dup", 0).unwrap();
    assert_eq!(fs.create("/dup", 0), Err(Error::AlreadyExists));

    let mut root = fs.open_dir("/").unwrap();
    let names: Vec<_> = std::iter::from_fn(|| root.read_entry()).collect();
    assert_eq!(names.len(), 1);
}

#[test]
fn removed_inode_storage_reclaimed() {
    let fs = new_fs();
    let baseline = fs.free_sectors();

    fs.create("/big", 0).unwrap();
    let file = fs.open("/big").unwrap();
    // One write per mapping level: direct, singly-indirect, doubly-indirect.
    assert_eq!(file.write_at(&[1], 0), 1);
    assert_eq!(file.write_at(&[2], 124 * SECTOR_SIZE), 1);
    assert_eq!(file.write_at(&[3], 249 * SECTOR_SIZE), 1);
    // Home + 1 direct + (index + data) + (outer + middle + data).
    assert_eq!(fs.free_sectors(), baseline - 7);

    fs.remove("/big").unwrap();
    // Still open: the entry is gone but the storage is not.
    assert_eq!(fs.free_sectors(), baseline - 7);
    assert_eq!(fs.open("/big").err(), Some(Error::NotFound));

    drop(file);
    assert_eq!(fs.free_sectors(), baseline);
}

#[test]
fn file_size_capped() {
    let fs = new_fs();
    fs.create("/cap", 0).unwrap();
    let file = fs.open("/cap").unwrap();

    assert_eq!(file.write_at(&[1; 10], MAX_FILE_SIZE - 4), 4);
    assert_eq!(file.len(), MAX_FILE_SIZE);
    assert_eq!(file.write_at(&[1; 10], MAX_FILE_SIZE), 0);

    let mut buf = [0; 4];
    assert_eq!(file.read_at(&mut buf, MAX_FILE_SIZE - 4), 4);
    assert_eq!(buf, [1; 4]);
}

#[test]
fn path_edge_cases() {
    let fs = new_fs();
    fs.create_dir("/d").unwrap();
    fs.create("/d/f", 0).unwrap();

    // Trailing slash demands a directory.
    assert_eq!(fs.open("/d/f/").err(), Some(Error::NotADirectory));
    assert!(fs.open("/d/").is_ok());
    assert!(fs.open_dir("/").is_ok());

    // Slash runs collapse.
    assert!(fs.open("//d///f").is_ok());

    assert_eq!(fs.open("/missing").err(), Some(Error::NotFound));
    assert_eq!(fs.open("").err(), Some(Error::NotFound));
    assert_eq!(fs.remove("/"), Err(Error::NotFound));
    assert_eq!(
        fs.create("/name-far-too-long", 0),
        Err(Error::InvalidName)
    );
    assert_eq!(fs.create_dir("/d/f/sub"), Err(Error::NotADirectory));
}

#[test]
fn directory_grows_past_initial_capacity() {
    let fs = new_fs();
    fs.create_dir("/many").unwrap();
    for i in 0..20 {
        fs.create(&format!("/many/f{i:02}"), 0).unwrap();
    }

    let mut d = fs.open_dir("/many").unwrap();
    let mut names: Vec<_> = std::iter::from_fn(|| d.read_entry())
        .map(|n| n.to_string())
        .collect();
    names.sort();
    let expected: Vec<_> = (0..20).map(|i| format!("f{i:02}")).collect();
    assert_eq!(names, expected);
}

#[test]
fn write_back_worker_drains_dirty_frames() {
    let fs = FileSys::format(
        MemDisk::new(4096),
        Params {
            write_interval: Duration::from_millis(10),
            ..Params::default()
        },
    )
    .unwrap();

    fs.create("/wb", 0).unwrap();
    let file = fs.open("/wb").unwrap();
    assert_eq!(file.write_at(&[1; 4096], 0), 4096);

    let deadline = Instant::now() + Duration::from_secs(5);
    while fs.dirty_frames() > 0 {
        assert!(Instant::now() < deadline, "write-back never drained");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn remount_reads_back_persisted_data() {
    let disk = MemDisk::new(4096);
    let free_after_close;
    {
        let fs = FileSys::format(disk.clone(), Params::default()).unwrap();
        fs.create("/persist", 0).unwrap();
        let file = fs.open("/persist").unwrap();
        assert_eq!(file.write_at(b"hello, disk", 0), 11);
        drop(file);
        free_after_close = fs.free_sectors();
        fs.close();
    }

    let fs = FileSys::mount(disk, Params::default());
    assert_eq!(fs.free_sectors(), free_after_close);

    let file = fs.open("/persist").unwrap();
    let mut buf = [0; 11];
    assert_eq!(file.read_at(&mut buf, 0), 11);
    assert_eq!(&buf, b"hello, disk");

    // The loaded free map must not hand out sectors already in use.
    fs.create("/after", 0).unwrap();
    let after = fs.open("/after").unwrap();
    assert_eq!(after.write_at(&[9; 2048], 0), 2048);
    assert_eq!(file.read_at(&mut buf, 0), 11);
    assert_eq!(&buf, b"hello, disk");
}

#[test]
fn concurrent_writers_on_distinct_files() {
    let fs = Arc::new(new_fs());

    let threads: Vec<_> = (0..4u64)
        .map(|i| {
            let fs = Arc::clone(&fs);
            thread::spawn(move || {
                let path = format!("/t{i}");
                fs.create(&path, 0).unwrap();
                let file = fs.open(&path).unwrap();

                let mut rng = StdRng::seed_from_u64(i);
                let mut model = vec![0u8; 200_000];
                for _ in 0..64 {
                    let offset = rng.random_range(0..model.len() - 512);
                    let len = rng.random_range(1..512);
                    let chunk: Vec<u8> = (0..len).map(|_| rng.random()).collect();
                    assert_eq!(file.write_at(&chunk, offset), len);
                    model[offset..offset + len].copy_from_slice(&chunk);
                }

                let mut got = vec![0u8; file.len()];
                assert_eq!(file.read_at(&mut got, 0), got.len());
                assert_eq!(got, model[..got.len()]);
            })
        })
        .collect();

    for t in threads {
        t.join().unwrap();
    }
}

#[test]
fn concurrent_writers_on_one_file() {
    let fs = new_fs();
    fs.create("/shared", 0).unwrap();
    let a = fs.open("/shared").unwrap();
    let b = fs.open("/shared").unwrap();

    thread::scope(|s| {
        s.spawn(|| assert_eq!(a.write_at(&[0xAA; 1000], 0), 1000));
        s.spawn(|| assert_eq!(b.write_at(&[0xBB; 1000], 1000), 1000));
    });

    let reader = fs.open("/shared").unwrap();
    let mut buf = vec![0; 2000];
    assert_eq!(reader.read_at(&mut buf, 0), 2000);
    assert!(buf[..1000].iter().all(|&b| b == 0xAA));
    assert!(buf[1000..].iter().all(|&b| b == 0xBB));
}
