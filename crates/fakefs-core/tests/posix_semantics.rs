// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Integration tests for POSIX-flavored path and error behavior

use std::io::SeekFrom;

use anyhow::Result;
use fakefs_core::{FakeFs, FsConfig, FsError, OpenOptions};

fn read_all(fs: &FakeFs, path: &str) -> Vec<u8> {
    let fd = fs.open(path, OpenOptions::read_only()).expect("open");
    let mut buf = vec![0u8; 256];
    let n = fs.read(fd, &mut buf).expect("read");
    fs.close(fd).expect("close");
    buf.truncate(n);
    buf
}

#[test]
fn removing_a_populated_directory_takes_two_steps() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.create_file("/work/a.txt", b"a")?;
    fs.create_file("/work/b.txt", b"b")?;

    let err = fs.rmdir("/work").expect_err("still populated");
    assert!(matches!(err, FsError::DirectoryNotEmpty(_)));
    assert_eq!(err.errno(), libc::ENOTEMPTY);
    assert_eq!(fs.listdir("/work")?, vec!["a.txt", "b.txt"]);

    fs.unlink("/work/a.txt")?;
    fs.unlink("/work/b.txt")?;
    fs.rmdir("/work")?;
    assert!(!fs.exists("/work"));
    Ok(())
}

#[test]
fn rename_replaces_an_empty_directory_on_posix() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.create_file("/src/keep/f", b"x")?;
    fs.mkdir("/empty", 0o755)?;

    fs.rename("/src/keep", "/empty")?;
    assert!(fs.is_file("/empty/f"));
    assert!(!fs.exists("/src/keep"));

    // a populated destination still refuses
    fs.mkdir_all("/full/inner", 0o755)?;
    fs.mkdir("/other", 0o755)?;
    let err = fs.rename("/other", "/full").expect_err("destination not empty");
    assert_eq!(err.errno(), libc::ENOTEMPTY);
    Ok(())
}

#[test]
fn rename_kind_mismatches_report_their_errno() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.create_file("/file", b"x")?;
    fs.mkdir("/dir", 0o755)?;

    let err = fs.rename("/file", "/dir").expect_err("file onto dir");
    assert_eq!(err.errno(), libc::EISDIR);
    let err = fs.rename("/dir", "/file").expect_err("dir onto file");
    assert_eq!(err.errno(), libc::ENOTDIR);

    let err = fs.rename("/dir", "/dir/sub").expect_err("dir below itself");
    assert_eq!(err.errno(), libc::EINVAL);
    Ok(())
}

#[test]
fn rename_round_trip_preserves_identity() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.create_file("/orig.txt", b"payload")?;
    let before = fs.stat("/orig.txt")?;

    fs.rename("/orig.txt", "/moved.txt")?;
    fs.rename("/moved.txt", "/orig.txt")?;

    let after = fs.stat("/orig.txt")?;
    assert_eq!(before.st_ino, after.st_ino);
    assert_eq!(before.st_mode, after.st_mode);
    assert_eq!(before.st_size, after.st_size);
    assert_eq!(before.st_mtime, after.st_mtime);
    assert_eq!(read_all(&fs, "/orig.txt"), b"payload");
    Ok(())
}

#[test]
fn unlinking_a_directory_reports_the_flavor_errno() {
    let linux = FakeFs::new(FsConfig::linux());
    linux.mkdir("/d", 0o755).expect("mkdir");
    assert_eq!(linux.unlink("/d").expect_err("directory").errno(), libc::EISDIR);

    let macos = FakeFs::new(FsConfig::macos());
    macos.mkdir("/d", 0o755).expect("mkdir");
    assert_eq!(macos.unlink("/d").expect_err("directory").errno(), libc::EPERM);
}

#[test]
fn trailing_separator_requires_a_directory_on_linux() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.create_file("/data/file.txt", b"x")?;

    let err = fs.stat("/data/file.txt/").expect_err("file with trailing sep");
    assert_eq!(err.errno(), libc::ENOTDIR);
    assert!(fs.stat("/data/").is_ok());

    // the separator forces symlink resolution even for lstat
    fs.symlink("/data/file.txt", "/flink")?;
    assert!(fs.lstat("/flink")?.is_symlink());
    let err = fs.lstat("/flink/").expect_err("separator reaches the file");
    assert_eq!(err.errno(), libc::ENOTDIR);

    fs.symlink("/data", "/dlink")?;
    assert!(fs.lstat("/dlink/")?.is_dir());
    Ok(())
}

#[test]
fn trailing_separator_is_ignored_on_macos() -> Result<()> {
    let fs = FakeFs::new(FsConfig::macos());
    fs.create_file("/data/file.txt", b"x")?;
    assert!(fs.stat("/data/file.txt/")?.is_file());

    fs.symlink("/data/file.txt", "/flink")?;
    assert!(fs.lstat("/flink/")?.is_symlink());

    // rename is just as forgiving about the separator
    fs.rename("/data/file.txt/", "/data/moved.txt/")?;
    assert!(fs.is_file("/data/moved.txt"));
    Ok(())
}

#[test]
fn rename_refuses_trailing_separators_on_files_on_linux() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.create_file("/data.txt", b"x")?;
    fs.create_file("/other.txt", b"y")?;

    let err = fs.rename("/data.txt/", "/renamed.txt").expect_err("file source");
    assert_eq!(err.errno(), libc::ENOTDIR);
    let err = fs.rename("/data.txt", "/other.txt/").expect_err("file destination");
    assert_eq!(err.errno(), libc::ENOTDIR);
    let err = fs.rename("/data.txt", "/fresh/").expect_err("missing destination");
    assert_eq!(err.errno(), libc::ENOTDIR);
    assert_eq!(read_all(&fs, "/data.txt"), b"x");

    // directories may keep their separators
    fs.mkdir("/srcdir", 0o755)?;
    fs.rename("/srcdir/", "/dstdir/")?;
    assert!(fs.is_dir("/dstdir"));
    Ok(())
}

#[test]
fn mode_bits_gate_access() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.create_file("/locked.txt", b"secret")?;
    fs.chmod("/locked.txt", 0o000)?;

    let err = fs.open("/locked.txt", OpenOptions::read_only()).expect_err("no read bit");
    assert!(matches!(err, FsError::AccessDenied(_)));
    assert_eq!(err.errno(), libc::EACCES);

    // uid 0 bypasses mode bits entirely
    fs.set_uid(0);
    let fd = fs.open("/locked.txt", OpenOptions::read_only())?;
    fs.close(fd)?;
    Ok(())
}

#[test]
fn directory_exec_bit_gates_traversal() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.create_file("/closed/inner.txt", b"x")?;
    fs.chmod("/closed", 0o600)?;

    let err = fs.stat("/closed/inner.txt").expect_err("no traverse bit");
    assert_eq!(err.errno(), libc::EACCES);
    // the read bit still permits listing the names
    assert_eq!(fs.listdir("/closed")?, vec!["inner.txt"]);
    Ok(())
}

#[test]
fn only_the_owner_may_chmod() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.create_file("/shared.txt", b"x")?;

    fs.set_uid(7);
    let err = fs.chmod("/shared.txt", 0o600).expect_err("not the owner");
    assert_eq!(err.errno(), libc::EPERM);

    fs.set_uid(1);
    fs.chmod("/shared.txt", 0o600)?;
    assert_eq!(fs.stat("/shared.txt")?.st_mode & 0o777, 0o600);
    Ok(())
}

#[test]
fn chown_is_limited_without_root() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.create_file("/f", b"x")?;

    // group changes are fine for the owner, ownership transfers are not
    fs.chown("/f", 1, 42)?;
    assert_eq!(fs.stat("/f")?.st_gid, 42);
    let err = fs.chown("/f", 2, 42).expect_err("giving the file away");
    assert_eq!(err.errno(), libc::EPERM);

    fs.set_uid(0);
    fs.chown("/f", 2, 42)?;
    assert_eq!(fs.stat("/f")?.st_uid, 2);
    Ok(())
}

#[test]
fn lchmod_depends_on_the_flavor() -> Result<()> {
    let linux = FakeFs::new(FsConfig::linux());
    linux.create_file("/f", b"x")?;
    linux.symlink("/f", "/l")?;
    let err = linux.lchmod("/l", 0o700).expect_err("linux has no lchmod");
    assert_eq!(err.errno(), libc::ENOSYS);

    let macos = FakeFs::new(FsConfig::macos());
    macos.create_file("/f", b"x")?;
    macos.symlink("/f", "/l")?;
    macos.lchmod("/l", 0o700)?;
    assert_eq!(macos.lstat("/l")?.st_mode & 0o777, 0o700);
    assert_eq!(macos.stat("/f")?.st_mode & 0o777, 0o644);
    Ok(())
}

#[test]
fn utime_sets_explicit_times() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.create_file("/f", b"x")?;
    fs.utime("/f", Some((100, 200)))?;
    let st = fs.stat("/f")?;
    assert_eq!(st.st_atime, 100);
    assert_eq!(st.st_mtime, 200);
    Ok(())
}

#[test]
fn open_flag_matrix() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    let err = fs.open("/missing", OpenOptions::read_only()).expect_err("no create flag");
    assert_eq!(err.errno(), libc::ENOENT);

    fs.mkdir("/d", 0o755)?;
    let err = fs.open("/d", OpenOptions::read_only()).expect_err("directory");
    assert_eq!(err.errno(), libc::EISDIR);

    fs.create_file("/f", b"x")?;
    let err = fs.open("/f", OpenOptions::exclusive()).expect_err("exclusive on existing");
    assert_eq!(err.errno(), libc::EEXIST);

    let err = fs.open("/f", OpenOptions::default()).expect_err("neither read nor write");
    assert_eq!(err.errno(), libc::EINVAL);
    Ok(())
}

#[test]
fn an_unlinked_file_accepts_io_until_the_last_close() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.create_file("/tmp/data", b"abc")?;
    let fd = fs.open("/tmp/data", OpenOptions::read_write())?;

    fs.unlink("/tmp/data")?;
    assert!(!fs.exists("/tmp/data"));

    assert_eq!(fs.write(fd, b"new")?, 3);
    fs.seek(fd, SeekFrom::Start(0))?;
    let mut buf = [0u8; 8];
    assert_eq!(fs.read(fd, &mut buf)?, 3);
    assert_eq!(&buf[..3], b"new");
    assert_eq!(fs.fstat(fd)?.st_nlink, 0);

    fs.close(fd)?;
    let err = fs.fstat(fd).expect_err("descriptor gone");
    assert_eq!(err.errno(), libc::EBADF);
    Ok(())
}

#[test]
fn dot_components_collapse_before_the_walk() -> Result<()> {
    let fs = FakeFs::new(FsConfig::linux());
    fs.create_file("/a/b/c.txt", b"x")?;
    assert!(fs.is_file("/a/./b/../b/c.txt"));
    // .. at the root stays at the root
    assert!(fs.is_file("/../a/b/c.txt"));
    Ok(())
}

#[test]
fn byte_paths_must_be_utf8() {
    let fs = FakeFs::new(FsConfig::linux());
    fs.create_file(&b"/raw/file.bin"[..], b"x").expect("bytes path");
    assert!(fs.exists("/raw/file.bin"));

    let err = fs.stat(&b"/bad/\xff\xfe"[..]).expect_err("invalid utf-8");
    assert!(matches!(err, FsError::InvalidPath(_)));
    assert_eq!(err.errno(), libc::EINVAL);
}

#[test]
fn empty_paths_never_resolve() {
    let fs = FakeFs::new(FsConfig::linux());
    assert_eq!(fs.stat("").expect_err("stat").errno(), libc::ENOENT);
    assert_eq!(fs.unlink("").expect_err("unlink").errno(), libc::ENOENT);
    assert_eq!(fs.mkdir_all("", 0o755).expect_err("mkdir_all").errno(), libc::ENOENT);
    assert!(!fs.exists(""));
}
