//! End-to-end scenarios exercising the public API the way a host shell
//! built on top of this engine would: create content, read it back,
//! observe directory listings, and run the two maintenance operations.

use pntfs::ROOT_SLOT;
use pntfs_ds_mem::MemoryStorage;

fn new_volume(disk_size: u32, cluster_size: u32) -> pntfs::Volume<MemoryStorage> {
    let _ = env_logger::try_init();
    let storage = MemoryStorage::new(disk_size as u64);
    pntfs::Volume::new(storage, cluster_size, "PNTFS").unwrap()
}

#[test]
fn round_trip() {
    let mut volume = new_volume(10_000, 100);
    let a = volume.make_directory(ROOT_SLOT, "a").unwrap();
    let f = volume.save_file("hello.txt", a, b"hello world").unwrap();

    assert_eq!(volume.load_file(f).unwrap(), b"hello world");

    let listing = volume.list_directory(a).unwrap();
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0].name, "hello.txt");
    assert!(!listing[0].is_directory);
}

#[test]
fn fragmentation_then_larger_file_spans_freed_gaps() {
    let cluster_size = 100;
    let mut volume = new_volume(20_000, cluster_size);

    let mut slots = Vec::new();
    for i in 0..5 {
        let slot = volume
            .save_file(&format!("f{i}"), ROOT_SLOT, &vec![i as u8; 3 * cluster_size as usize])
            .unwrap();
        slots.push(slot);
    }

    volume.remove_file(slots[1], ROOT_SLOT).unwrap();
    volume.remove_file(slots[3], ROOT_SLOT).unwrap();

    let content = vec![7u8; 6 * cluster_size as usize];
    let big = volume.save_file("big", ROOT_SLOT, &content).unwrap();

    let record = volume.get_record(big).unwrap();
    assert_eq!(record.size, content.len() as u32);
    assert_eq!(record.name, "big");
    assert_eq!(volume.load_file(big).unwrap(), content);
}

#[test]
fn out_of_space_leaves_existing_files_untouched() {
    let mut volume = new_volume(2_000, 100);
    let kept = volume.save_file("kept", ROOT_SLOT, b"stays").unwrap();
    let free_before = volume.free_space();

    let too_big = vec![1u8; 1_000_000];
    let result = volume.save_file("toobig", ROOT_SLOT, &too_big);

    assert!(result.is_err());
    assert_eq!(volume.free_space(), free_before);
    assert_eq!(volume.load_file(kept).unwrap(), b"stays");
}

#[test]
fn rmdir_on_nonempty_directory_fails() {
    let mut volume = new_volume(10_000, 100);
    let a = volume.make_directory(ROOT_SLOT, "a").unwrap();
    volume.save_file("f", a, b"data").unwrap();

    let result = volume.remove_directory(a, ROOT_SLOT);
    assert!(matches!(result, Err(pntfs::Error::NotEmpty)));
}

#[test]
fn move_between_directories_preserves_uid() {
    let mut volume = new_volume(10_000, 100);
    let a = volume.make_directory(ROOT_SLOT, "a").unwrap();
    let b = volume.make_directory(ROOT_SLOT, "b").unwrap();
    let f = volume.save_file("f", a, b"payload").unwrap();
    let uid_before = volume.get_record(f).unwrap().uid;

    volume.move_file(f, a, b).unwrap();

    assert!(volume.list_directory(a).unwrap().is_empty());
    let in_b = volume.list_directory(b).unwrap();
    assert_eq!(in_b.len(), 1);
    assert_eq!(in_b[0].name, "f");
    assert_eq!(in_b[0].uid, uid_before);
    assert_eq!(volume.load_file(f).unwrap(), b"payload");
}

#[test]
fn defragment_then_check_reports_clean() {
    let cluster_size = 100;
    let mut volume = new_volume(20_000, cluster_size);

    let mut slots = Vec::new();
    for i in 0..5 {
        let slot = volume
            .save_file(&format!("f{i}"), ROOT_SLOT, &vec![i as u8; 3 * cluster_size as usize])
            .unwrap();
        slots.push(slot);
    }
    volume.remove_file(slots[1], ROOT_SLOT).unwrap();
    volume.remove_file(slots[3], ROOT_SLOT).unwrap();

    let survivors = [slots[0], slots[2], slots[4]];
    let contents_before: Vec<Vec<u8>> = survivors.iter().map(|&s| volume.load_file(s).unwrap()).collect();

    volume.defragment_disk().unwrap();

    let contents_after: Vec<Vec<u8>> = survivors.iter().map(|&s| volume.load_file(s).unwrap()).collect();
    assert_eq!(contents_before, contents_after);

    assert!(!volume.check_disk_consistency());
}
