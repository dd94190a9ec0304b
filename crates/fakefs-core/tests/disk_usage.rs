// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Integration tests for mount points, quotas and space accounting

use anyhow::Result;
use fakefs_core::{FakeFs, FsConfig, OpenOptions, UNLIMITED};

#[test]
fn quota_rejects_writes_that_do_not_fit() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.add_mount_point("/mnt", Some(100))?;

    fs.create_file("/mnt/a", &[0u8; 60])?;

    let err = fs.create_file("/mnt/b", &[0u8; 50]).expect_err("over quota");
    assert_eq!(err.errno(), libc::ENOSPC);
    // nothing was written before the failure
    assert!(!fs.exists("/mnt/b"));
    assert_eq!(fs.get_disk_usage("/mnt")?.used, 60);

    // an exact fit is allowed
    fs.create_file("/mnt/c", &[0u8; 40])?;
    assert_eq!(fs.get_disk_usage("/mnt")?.free, 0);
    Ok(())
}

#[test]
fn growing_writes_charge_the_quota_atomically() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.add_mount_point("/mnt", Some(10))?;
    fs.create_file("/mnt/f", b"12345")?;

    let fd = fs.open("/mnt/f", OpenOptions::appending())?;
    fs.write(fd, b"67890")?;

    let err = fs.write(fd, b"!").expect_err("one byte over");
    assert_eq!(err.errno(), libc::ENOSPC);
    // the failed write left the file untouched
    assert_eq!(fs.fstat(fd)?.st_size, 10);
    fs.close(fd)?;
    Ok(())
}

#[test]
fn rewriting_in_place_charges_nothing() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.add_mount_point("/mnt", Some(10))?;
    fs.create_file("/mnt/f", b"0123456789")?;
    assert_eq!(fs.get_disk_usage("/mnt")?.free, 0);

    // same length at offset zero needs no new space
    let fd = fs.open("/mnt/f", OpenOptions::read_write())?;
    fs.write(fd, b"abcdefghij")?;
    fs.close(fd)?;
    assert_eq!(fs.get_disk_usage("/mnt")?.used, 10);
    Ok(())
}

#[test]
fn truncation_releases_space() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.add_mount_point("/mnt", Some(10))?;
    fs.create_file("/mnt/f", b"0123456789")?;

    let fd = fs.open("/mnt/f", OpenOptions::read_write())?;
    fs.ftruncate(fd, 2)?;
    fs.close(fd)?;
    assert_eq!(fs.get_disk_usage("/mnt")?.used, 2);

    fs.create_file("/mnt/g", &[0u8; 8])?;
    Ok(())
}

#[test]
fn usage_is_tracked_per_mount() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.add_mount_point("/mnt", Some(100))?;

    fs.create_file("/rootfile", &[0u8; 400])?;
    fs.create_file("/mnt/small", &[0u8; 30])?;

    let root = fs.get_disk_usage("/")?;
    assert_eq!(root.total, UNLIMITED);
    assert_eq!(root.free, UNLIMITED);
    assert_eq!(root.used, 400);

    let mnt = fs.get_disk_usage("/mnt")?;
    assert_eq!(mnt.total, 100);
    assert_eq!(mnt.used, 30);
    assert_eq!(mnt.free, 70);
    Ok(())
}

#[test]
fn shrinking_a_quota_below_its_usage_fails() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.add_mount_point("/mnt", Some(100))?;
    fs.create_file("/mnt/f", &[0u8; 40])?;

    let err = fs.set_disk_usage("/mnt", Some(30)).expect_err("below usage");
    assert_eq!(err.errno(), libc::ENOSPC);

    fs.set_disk_usage("/mnt", Some(50))?;
    assert_eq!(fs.get_disk_usage("/mnt")?.free, 10);
    Ok(())
}

#[test]
fn quota_is_freed_when_the_last_handle_closes() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.add_mount_point("/mnt", Some(100))?;
    fs.create_file("/mnt/hog", &[0u8; 80])?;

    let fd = fs.open("/mnt/hog", OpenOptions::read_only())?;
    fs.unlink("/mnt/hog")?;
    // the open handle still pins the space
    assert_eq!(fs.get_disk_usage("/mnt")?.used, 80);
    let err = fs.create_file("/mnt/next", &[0u8; 50]).expect_err("space still pinned");
    assert_eq!(err.errno(), libc::ENOSPC);

    fs.close(fd)?;
    fs.create_file("/mnt/next", &[0u8; 50])?;
    assert_eq!(fs.get_disk_usage("/mnt")?.used, 50);
    Ok(())
}

#[test]
fn symlinks_occupy_no_quota() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.add_mount_point("/mnt", Some(100))?;
    fs.create_file("/mnt/file", &[0u8; 60])?;

    // creating and removing links leaves the accounting untouched
    fs.symlink("/somewhere/else", "/mnt/alias")?;
    assert_eq!(fs.get_disk_usage("/mnt")?.used, 60);
    fs.unlink("/mnt/alias")?;
    assert_eq!(fs.get_disk_usage("/mnt")?.used, 60);

    // a rename that replaces a symlink destination releases nothing either
    fs.symlink("/elsewhere", "/mnt/link")?;
    fs.create_file("/mnt/extra", &[0u8; 40])?;
    fs.rename("/mnt/extra", "/mnt/link")?;
    assert_eq!(fs.get_disk_usage("/mnt")?.used, 100);

    // the quota is still fully addressable by real bytes
    fs.unlink("/mnt/link")?;
    fs.create_file("/mnt/refill", &[0u8; 40])?;
    assert_eq!(fs.get_disk_usage("/mnt")?.free, 0);
    Ok(())
}

#[test]
fn size_only_files_charge_space_without_contents() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.add_mount_point("/mnt", Some(2 << 20))?;
    fs.create_large_file("/mnt/big.bin", 1 << 20)?;

    assert_eq!(fs.stat("/mnt/big.bin")?.st_size, 1 << 20);
    assert_eq!(fs.get_disk_usage("/mnt")?.used, 1 << 20);

    // contents were never materialized
    let fd = fs.open("/mnt/big.bin", OpenOptions::read_only())?;
    let mut buf = [0u8; 16];
    let err = fs.read(fd, &mut buf).expect_err("no backing bytes");
    assert_eq!(err.errno(), libc::EIO);
    fs.close(fd)?;

    fs.unlink("/mnt/big.bin")?;
    assert_eq!(fs.get_disk_usage("/mnt")?.used, 0);
    Ok(())
}

#[test]
fn the_root_quota_governs_the_system_drive_on_windows() -> Result<()> {
    let mut cfg = FsConfig::windows();
    cfg.root_total_size = Some(50);
    let fs = FakeFs::new(cfg);

    assert_eq!(fs.get_disk_usage("C:\\")?.total, 50);
    fs.create_file("C:\\a.bin", &[0u8; 30])?;
    let err = fs.create_file("C:\\b.bin", &[0u8; 30]).expect_err("drive full");
    assert_eq!(err.errno(), libc::ENOSPC);

    // other drives mount with no quota of their own
    fs.create_file("D:\\big.bin", &[0u8; 1000])?;
    assert_eq!(fs.get_disk_usage("D:\\")?.total, UNLIMITED);
    Ok(())
}

#[test]
fn directory_stat_sums_descendant_sizes() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.create_file("/d/a.txt", &[0u8; 10])?;
    fs.create_file("/d/sub/b.txt", &[0u8; 5])?;

    assert_eq!(fs.stat("/d")?.st_size, 15);
    assert_eq!(fs.stat("/d/sub")?.st_size, 5);
    Ok(())
}
