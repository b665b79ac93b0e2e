//! Applying images onto the instrumented in-memory NTFS volume.

mod common;

use common::{build_image, reference_stream, MockVolume};
use wim::apply::ExtractFlags;
use wim::image::Inode;
use wim::lookup::LookupTableEntry;
use wim::ondisk::{FileAttributes, FileTime, ReparseTag, Sha1Hash};
use wim::{Error, Wim, ALL_IMAGES};

#[test_log::test]
fn test_hard_link_pair_writes_content_once() -> Result<(), Box<dyn std::error::Error>> {
    let mut wim = Wim::new();
    let image = build_image(&mut wim, "links", |tree, table, _sd| {
        let root = tree.root();
        let dir_inode = tree.new_inode(Inode::new(FileAttributes::directory_only()));
        let dir = tree.alloc_dentry("d".into(), dir_inode);
        tree.add_child(root, dir).unwrap();

        let mut inode = Inode::new(FileAttributes::normal_file());
        inode.unnamed = Some(reference_stream(table, b"ABCDEFGH"));
        let inode = tree.new_inode(inode);
        let u = tree.alloc_dentry("u".into(), inode);
        let v = tree.alloc_dentry("v".into(), inode);
        tree.add_child(dir, u).unwrap();
        tree.add_child(dir, v).unwrap();
        // Two dentries reference the unnamed stream.
        reference_stream(table, b"ABCDEFGH");
    });

    let mut vol = MockVolume::new();
    wim.apply_image_to_ntfs_volume(image, &mut vol, ExtractFlags::empty())?;

    let u = vol.lookup_path("/d/u").expect("u applied");
    let v = vol.lookup_path("/d/v").expect("v applied");
    assert_eq!(u, v, "hard links share one on-volume inode");
    assert_eq!(vol.files[u].link_count, 2);
    assert_eq!(vol.files[u].streams[""], b"ABCDEFGH");

    assert_eq!(vol.count_ops("pwrite"), 1, "content written exactly once");
    assert_eq!(vol.bytes_written, 8);
    assert_eq!(vol.count_ops("create /d/"), 1);
    assert_eq!(vol.count_ops("link "), 1);
    assert_eq!(vol.open_handle_count(), 0, "all inode handles closed");
    Ok(())
}

#[test_log::test]
fn test_hard_link_group_of_three_across_directories() -> Result<(), Box<dyn std::error::Error>> {
    let mut wim = Wim::new();
    let image = build_image(&mut wim, "three", |tree, table, _sd| {
        let root = tree.root();
        let mut inode = Inode::new(FileAttributes::normal_file());
        inode.unnamed = Some(reference_stream(table, b"shared content"));
        let inode = tree.new_inode(inode);
        for (dir_name, file_name) in [("a", "f1"), ("b", "f2"), ("c", "f3")] {
            let dir_inode = tree.new_inode(Inode::new(FileAttributes::directory_only()));
            let dir = tree.alloc_dentry(dir_name.into(), dir_inode);
            tree.add_child(root, dir).unwrap();
            let file = tree.alloc_dentry(file_name.into(), inode);
            tree.add_child(dir, file).unwrap();
        }
        reference_stream(table, b"shared content");
        reference_stream(table, b"shared content");
    });

    let mut vol = MockVolume::new();
    wim.apply_image_to_ntfs_volume(image, &mut vol, ExtractFlags::empty())?;

    // Three directories, one file creation, two links.
    assert_eq!(vol.count_ops("create "), 4);
    assert_eq!(vol.count_ops("link "), 2);
    assert_eq!(vol.count_ops("pwrite"), 1);
    let f1 = vol.lookup_path("/a/f1").unwrap();
    assert_eq!(vol.lookup_path("/b/f2"), Some(f1));
    assert_eq!(vol.lookup_path("/c/f3"), Some(f1));
    assert_eq!(vol.files[f1].link_count, 3);
    Ok(())
}

#[test_log::test]
fn test_short_name_bound_before_links() -> Result<(), Box<dyn std::error::Error>> {
    let mut wim = Wim::new();
    let image = build_image(&mut wim, "dosnames", |tree, table, _sd| {
        let root = tree.root();
        let dir_inode = tree.new_inode(Inode::new(FileAttributes::directory_only()));
        let dir = tree.alloc_dentry("d".into(), dir_inode);
        tree.add_child(root, dir).unwrap();

        let mut inode = Inode::new(FileAttributes::normal_file());
        inode.unnamed = Some(reference_stream(table, b"aliased"));
        let inode = tree.new_inode(inode);
        let short = tree.alloc_dentry("A~1".into(), inode);
        tree.dentry_mut(short).short_name = Some("A~1".encode_utf16().collect());
        let long = tree.alloc_dentry("AliceLong".into(), inode);
        tree.add_child(dir, short).unwrap();
        tree.add_child(dir, long).unwrap();
        reference_stream(table, b"aliased");
    });

    let mut vol = MockVolume::new();
    wim.apply_image_to_ntfs_volume(image, &mut vol, ExtractFlags::empty())?;

    // The dentry carrying the 8.3 alias is created (and bound) first, even
    // though collation visits "AliceLong" before "A~1"; the other name is a
    // link made afterwards.
    let create = vol.op_position("create /d/A~1");
    let bind = vol.op_position("set_dos_name /d/A~1 A~1");
    let link = vol.op_position("link /d/AliceLong");
    assert!(create < bind);
    assert!(bind < link);
    assert_eq!(vol.file("/d/A~1").dos_name.as_deref(), Some("A~1"));
    Ok(())
}

#[test_log::test]
fn test_reparse_point_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let body = wim::ondisk::reparse::symlink_reparse_body("../target")?;
    let expected = wim::ondisk::ReparseBuffer::new(ReparseTag::SYMLINK, body.clone()).to_bytes()?;

    let mut wim = Wim::new();
    let image = build_image(&mut wim, "reparse", |tree, table, _sd| {
        let root = tree.root();
        let mut inode = Inode::new(FileAttributes::new().with_reparse_point(true));
        inode.reparse_tag = Some(ReparseTag::SYMLINK);
        inode.unnamed = Some(reference_stream(table, &body));
        let inode = tree.new_inode(inode);
        let link = tree.alloc_dentry("link".into(), inode);
        tree.add_child(root, link).unwrap();
    });

    let mut vol = MockVolume::new();
    wim.apply_image_to_ntfs_volume(image, &mut vol, ExtractFlags::empty())?;
    assert_eq!(vol.file("/link").reparse.as_deref(), Some(expected.as_slice()));
    Ok(())
}

fn reparse_image_with_body_len(len: usize) -> (Wim, i32) {
    let mut wim = Wim::new();
    let body = vec![0x41u8; len];
    let image = build_image(&mut wim, "boundary", |tree, table, _sd| {
        let root = tree.root();
        let mut inode = Inode::new(FileAttributes::new().with_reparse_point(true));
        inode.reparse_tag = Some(ReparseTag::MOUNT_POINT);
        inode.unnamed = Some(reference_stream(table, &body));
        let inode = tree.new_inode(inode);
        let d = tree.alloc_dentry("junction".into(), inode);
        tree.add_child(root, d).unwrap();
    });
    (wim, image)
}

#[test_log::test]
fn test_reparse_data_boundary_sizes() -> Result<(), Box<dyn std::error::Error>> {
    // 0xFFFE bytes: representable in the u16 length field.
    let (wim, image) = reparse_image_with_body_len(0xFFFE);
    let mut vol = MockVolume::new();
    wim.apply_image_to_ntfs_volume(image, &mut vol, ExtractFlags::empty())?;
    assert_eq!(vol.file("/junction").reparse.as_ref().unwrap().len(), 8 + 0xFFFE);

    // 0xFFFF bytes: one too many.
    let (wim, image) = reparse_image_with_body_len(0xFFFF);
    let mut vol = MockVolume::new();
    let result = wim.apply_image_to_ntfs_volume(image, &mut vol, ExtractFlags::empty());
    assert!(matches!(result, Err(Error::InvalidDentry(_))));
    Ok(())
}

#[test_log::test]
fn test_empty_file_gets_zero_length_stream() -> Result<(), Box<dyn std::error::Error>> {
    let mut wim = Wim::new();
    let image = build_image(&mut wim, "empty", |tree, _table, _sd| {
        let root = tree.root();
        let inode = tree.new_inode(Inode::new(FileAttributes::normal_file()));
        let d = tree.alloc_dentry("empty.txt".into(), inode);
        tree.add_child(root, d).unwrap();
    });

    let mut vol = MockVolume::new();
    wim.apply_image_to_ntfs_volume(image, &mut vol, ExtractFlags::empty())?;
    let file = vol.file("/empty.txt");
    assert_eq!(file.streams.get("").map(Vec::len), Some(0));
    assert_eq!(vol.count_ops("pwrite"), 0);
    Ok(())
}

#[test_log::test]
fn test_ads_streams_applied() -> Result<(), Box<dyn std::error::Error>> {
    let mut wim = Wim::new();
    let image = build_image(&mut wim, "ads", |tree, table, _sd| {
        let root = tree.root();
        let mut inode = Inode::new(FileAttributes::normal_file());
        inode.unnamed = Some(reference_stream(table, b"main"));
        inode.ads.push(wim::image::AdsEntry {
            name: "Zone.Identifier".into(),
            hash: Some(reference_stream(table, b"[ZoneTransfer]")),
        });
        let inode = tree.new_inode(inode);
        let d = tree.alloc_dentry("download.exe".into(), inode);
        tree.add_child(root, d).unwrap();
    });

    let mut vol = MockVolume::new();
    wim.apply_image_to_ntfs_volume(image, &mut vol, ExtractFlags::empty())?;
    let file = vol.file("/download.exe");
    assert_eq!(file.streams[""], b"main");
    assert_eq!(file.streams["Zone.Identifier"], b"[ZoneTransfer]");
    Ok(())
}

#[test_log::test]
fn test_root_metadata_and_post_order_timestamps() -> Result<(), Box<dyn std::error::Error>> {
    let descriptor = b"root-descriptor".to_vec();
    let mut wim = Wim::new();
    let image = build_image(&mut wim, "times", |tree, table, sd| {
        let root = tree.root();
        let sid = sd.add(&descriptor);
        {
            let root_inode = tree.inode_of_mut(root);
            root_inode.security_id = Some(sid);
            root_inode.creation_time = FileTime::from(111u64);
            root_inode.last_write_time = FileTime::from(222u64);
            root_inode.last_access_time = FileTime::from(333u64);
        }

        let dir_inode = tree.new_inode(Inode::new(FileAttributes::directory_only()));
        let dir = tree.alloc_dentry("dir".into(), dir_inode);
        tree.add_child(root, dir).unwrap();
        let mut inode = Inode::new(FileAttributes::normal_file());
        inode.unnamed = Some(reference_stream(table, b"deep"));
        let inode = tree.new_inode(inode);
        let file = tree.alloc_dentry("file".into(), inode);
        tree.add_child(dir, file).unwrap();
    });

    let mut vol = MockVolume::new();
    wim.apply_image_to_ntfs_volume(image, &mut vol, ExtractFlags::empty())?;

    assert_eq!(vol.files[0].security.as_deref(), Some(descriptor.as_slice()));
    assert_eq!(
        vol.files[0].times,
        Some((FileTime::from(111u64), FileTime::from(222u64), FileTime::from(333u64)))
    );

    // Children settle their timestamps before their parents.
    let file_pos = vol.op_position("set_times /dir/file");
    let dir_pos = vol.op_position("set_times /dir");
    let root_pos = vol.op_position("set_times /");
    assert!(file_pos < dir_pos);
    assert!(dir_pos < root_pos);
    Ok(())
}

#[test_log::test]
fn test_corrupt_stream_is_detected() -> Result<(), Box<dyn std::error::Error>> {
    let mut wim = Wim::new();
    let image = build_image(&mut wim, "corrupt", |tree, table, _sd| {
        let root = tree.root();
        // An entry whose recorded hash does not match its bytes.
        let bogus = Sha1Hash([0xEE; 20]);
        table.insert(LookupTableEntry::new_attached(bogus, b"tampered".to_vec()));
        let mut inode = Inode::new(FileAttributes::normal_file());
        inode.unnamed = Some(bogus);
        let inode = tree.new_inode(inode);
        let d = tree.alloc_dentry("bad.bin".into(), inode);
        tree.add_child(root, d).unwrap();
    });

    let mut vol = MockVolume::new();
    let result = wim.apply_image_to_ntfs_volume(image, &mut vol, ExtractFlags::empty());
    assert!(matches!(result, Err(Error::InvalidResourceHash { .. })));
    assert_eq!(vol.open_handle_count(), 0, "handles released on the error path");
    Ok(())
}

#[test_log::test]
fn test_apply_flag_validation() {
    let dir = tempfile::tempdir().unwrap();
    let mut wim = Wim::new();
    let image = wim
        .add_image(dir.path(), "flags", None, wim::AddImageFlags::empty())
        .unwrap();

    let mut vol = MockVolume::new();
    assert!(matches!(
        wim.apply_image_to_ntfs_volume(ALL_IMAGES, &mut vol, ExtractFlags::empty()),
        Err(Error::InvalidParam(_))
    ));
    assert!(matches!(
        wim.apply_image_to_ntfs_volume(image, &mut vol, ExtractFlags::SYMLINK),
        Err(Error::InvalidParam(_))
    ));
    assert!(matches!(
        wim.apply_image_to_ntfs_volume(image, &mut vol, ExtractFlags::HARDLINK),
        Err(Error::InvalidParam(_))
    ));
    assert!(matches!(
        wim.apply_image_to_ntfs_volume(99, &mut vol, ExtractFlags::empty()),
        Err(Error::InvalidParam(_))
    ));
}
