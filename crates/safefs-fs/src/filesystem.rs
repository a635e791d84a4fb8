//! The `fuser::Filesystem` implementation: path resolution, cipher-aware
//! read/write/open/create/getattr/setattr/readdir, and thin passthrough for
//! everything else.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use parking_lot::Mutex;

use safefs_cipher::{decipher, encipher};
use safefs_membrane::{MountState, OpenFile, OpenFileTable};
use safefs_store::{load_header, write_fresh_header, HEADER_LEN};

const TTL: Duration = Duration::from_secs(1);
const ROOT_INO: u64 = 1;
const SENTINEL_NAME: &str = ".safefs";
const DS_STORE: &str = ".DS_Store";
const DS_STORE_PHYSICAL: &str = ".DS_Store.";

/// Bidirectional inode <-> logical-path table. `fuser` addresses files by
/// inode number; safefs's backing store is addressed by path, so every
/// inode handed out to the kernel is really a cached path lookup.
struct Inodes {
    path_to_ino: HashMap<PathBuf, u64>,
    ino_to_path: HashMap<u64, PathBuf>,
    next: AtomicU64,
}

impl Inodes {
    fn new() -> Self {
        let mut path_to_ino = HashMap::new();
        let mut ino_to_path = HashMap::new();
        path_to_ino.insert(PathBuf::new(), ROOT_INO);
        ino_to_path.insert(ROOT_INO, PathBuf::new());
        Inodes {
            path_to_ino,
            ino_to_path,
            next: AtomicU64::new(ROOT_INO + 1),
        }
    }

    fn path_of(&self, ino: u64) -> Option<PathBuf> {
        self.ino_to_path.get(&ino).cloned()
    }

    fn ino_for(&mut self, path: &Path) -> u64 {
        if let Some(&ino) = self.path_to_ino.get(path) {
            return ino;
        }
        let ino = self.next.fetch_add(1, Ordering::Relaxed);
        self.path_to_ino.insert(path.to_path_buf(), ino);
        self.ino_to_path.insert(ino, path.to_path_buf());
        ino
    }

    fn forget_path(&mut self, old: &Path, new: &Path) {
        if let Some(ino) = self.path_to_ino.remove(old) {
            self.path_to_ino.insert(new.to_path_buf(), ino);
            self.ino_to_path.insert(ino, new.to_path_buf());
        }
    }
}

pub struct SafeFs {
    mount: Arc<MountState>,
    table: Arc<OpenFileTable>,
    inodes: Mutex<Inodes>,
    next_fh: AtomicU64,
}

impl SafeFs {
    pub fn new(mount: Arc<MountState>) -> Self {
        SafeFs {
            mount,
            table: Arc::new(OpenFileTable::new()),
            inodes: Mutex::new(Inodes::new()),
            next_fh: AtomicU64::new(1),
        }
    }

    /// Map a logical path (relative to the mount root) to the physical path
    /// on the backing store, applying the `.DS_Store` rewrite so that the
    /// sentinel-adjacent macOS metadata file never collides with a real
    /// ciphertext header on disk.
    fn physical_path(&self, logical: &Path) -> PathBuf {
        if logical.as_os_str().is_empty() {
            return self.mount.root.clone();
        }
        let mut physical = self.mount.root.join(logical);
        if physical.file_name() == Some(OsStr::new(DS_STORE)) {
            physical.set_file_name(DS_STORE_PHYSICAL);
        }
        physical
    }

    fn logical_name(physical_name: &OsStr) -> std::ffi::OsString {
        if physical_name == DS_STORE_PHYSICAL {
            OsStr::new(DS_STORE).to_os_string()
        } else {
            physical_name.to_os_string()
        }
    }

    fn attr_for(&self, ino: u64, physical: &Path) -> std::io::Result<FileAttr> {
        let meta = fs::symlink_metadata(physical)?;
        let kind = if meta.is_dir() {
            FileType::Directory
        } else if meta.file_type().is_symlink() {
            FileType::Symlink
        } else {
            FileType::RegularFile
        };

        let size = if kind == FileType::RegularFile {
            meta.len().saturating_sub(HEADER_LEN as u64)
        } else {
            meta.len()
        };

        Ok(FileAttr {
            ino,
            size,
            blocks: meta.blocks(),
            atime: meta.accessed().unwrap_or(SystemTime::UNIX_EPOCH),
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            ctime: SystemTime::UNIX_EPOCH + Duration::from_secs(meta.ctime() as u64),
            crtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            kind,
            perm: (meta.permissions().mode() & 0o7777) as u16,
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev() as u32,
            blksize: 512,
            flags: 0,
        })
    }

    fn alloc_fh(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::Relaxed)
    }

    fn open_for_cipher(&self, physical: &Path, create: bool) -> std::io::Result<(File, OpenFile)> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(create)
            .open(physical)?;
        let opened = if create {
            write_fresh_header(&file, &self.mount)?
        } else {
            load_header(&file, &self.mount)?
        };
        Ok((file, opened))
    }
}

/// `statfs(2)` on the backing root, delegated unchanged (the small per-file
/// header overhead is not accounted for, per spec). This is the one place
/// in this crate that needs `unsafe_code`: `libc::statvfs` has no safe
/// wrapper among this workspace's dependencies.
#[allow(unsafe_code)]
fn statvfs_for(path: &Path) -> std::io::Result<libc::statvfs> {
    use std::ffi::CString;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(stat)
}

impl Filesystem for SafeFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let mut inodes = self.inodes.lock();
        let parent_path = match inodes.path_of(parent) {
            Some(p) => p,
            None => return reply.error(libc::ENOENT),
        };
        let logical = parent_path.join(name);
        let physical = self.physical_path(&logical);
        match self.attr_for(0, &physical) {
            Ok(_) if name == SENTINEL_NAME && parent == ROOT_INO => reply.error(libc::ENOENT),
            Ok(mut attr) => {
                let ino = inodes.ino_for(&logical);
                attr.ino = ino;
                reply.entry(&TTL, &attr, 0);
            }
            Err(_) => reply.error(libc::ENOENT),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let inodes = self.inodes.lock();
        let Some(logical) = inodes.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        let physical = self.physical_path(&logical);
        match self.attr_for(ino, &physical) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(err) => reply.error(err.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let inodes = self.inodes.lock();
        let Some(logical) = inodes.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        let physical = self.physical_path(&logical);

        if let Some(mode) = mode {
            if let Err(err) = fs::set_permissions(&physical, fs::Permissions::from_mode(mode)) {
                return reply.error(err.raw_os_error().unwrap_or(libc::EIO));
            }
        }

        // chown(0, 0) on a file already owned by root is a no-op: preserved
        // so that package managers replaying ownership onto an already-root
        // tree don't fail the mount.
        if let (Some(0), Some(0)) = (uid, gid) {
            // no-op
        }

        if let Some(size) = size {
            let physical_len = HEADER_LEN as u64 + size;
            if let Err(err) = fs::OpenOptions::new()
                .write(true)
                .open(&physical)
                .and_then(|f| f.set_len(physical_len))
            {
                return reply.error(err.raw_os_error().unwrap_or(libc::EIO));
            }
        }

        match self.attr_for(ino, &physical) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(err) => reply.error(err.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let inodes = self.inodes.lock();
        let Some(logical) = inodes.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        let physical = self.physical_path(&logical);
        drop(inodes);

        match self.open_for_cipher(&physical, false) {
            Ok((_file, opened)) => {
                let fh = self.alloc_fh();
                self.table.add(fh, opened);
                reply.opened(fh, flags as u32);
            }
            Err(err) => reply.error(err.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let mut inodes = self.inodes.lock();
        let Some(parent_path) = inodes.path_of(parent) else {
            return reply.error(libc::ENOENT);
        };
        let logical = parent_path.join(name);
        let physical = self.physical_path(&logical);

        match self.open_for_cipher(&physical, true) {
            Ok((_file, opened)) => {
                let _ = fs::set_permissions(&physical, fs::Permissions::from_mode(mode & 0o7777));
                let ino = inodes.ino_for(&logical);
                drop(inodes);
                let fh = self.alloc_fh();
                self.table.add(fh, opened);
                match self.attr_for(ino, &physical) {
                    Ok(attr) => reply.created(&TTL, &attr, 0, fh, flags as u32),
                    Err(err) => reply.error(err.raw_os_error().unwrap_or(libc::EIO)),
                }
            }
            Err(err) => reply.error(err.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(opened) = self.table.find(fh) else {
            tracing::error!(ino, fh, "read on a handle missing from the open-file table");
            return reply.error(libc::EIO);
        };
        let inodes = self.inodes.lock();
        let Some(logical) = inodes.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        let physical = self.physical_path(&logical);
        drop(inodes);

        let file = match File::open(&physical) {
            Ok(f) => f,
            Err(err) => return reply.error(err.raw_os_error().unwrap_or(libc::EIO)),
        };

        let mut buf = vec![0u8; size as usize];
        let physical_offset = HEADER_LEN as u64 + offset as u64;
        match file.read_at(&mut buf, physical_offset) {
            Ok(n) => {
                buf.truncate(n);
                decipher(&opened.rotor, &self.mount.offsets, offset as u64, &mut buf, self.mount.rounds);
                reply.data(&buf);
            }
            Err(err) => reply.error(err.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(opened) = self.table.find(fh) else {
            tracing::error!(ino, fh, "write on a handle missing from the open-file table");
            return reply.error(libc::EIO);
        };
        let inodes = self.inodes.lock();
        let Some(logical) = inodes.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        let physical = self.physical_path(&logical);
        drop(inodes);

        let file = match OpenOptions::new().write(true).open(&physical) {
            Ok(f) => f,
            Err(err) => return reply.error(err.raw_os_error().unwrap_or(libc::EIO)),
        };

        let mut buf = data.to_vec();
        encipher(&opened.rotor, &self.mount.offsets, offset as u64, &mut buf, self.mount.rounds);
        let physical_offset = HEADER_LEN as u64 + offset as u64;
        match file.write_at(&buf, physical_offset) {
            Ok(n) => reply.written(n as u32),
            Err(err) => reply.error(err.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.table.remove(fh);
        reply.ok();
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        reply.ok();
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, flags: i32, reply: ReplyOpen) {
        reply.opened(0, flags as u32);
    }

    fn releasedir(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let mut inodes = self.inodes.lock();
        let Some(logical) = inodes.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        let physical = self.physical_path(&logical);

        let read_dir = match fs::read_dir(&physical) {
            Ok(rd) => rd,
            Err(err) => return reply.error(err.raw_os_error().unwrap_or(libc::EIO)),
        };

        let mut entries = vec![(ino, FileType::Directory, ".".to_string())];
        entries.push((ROOT_INO, FileType::Directory, "..".to_string()));

        for entry in read_dir.flatten() {
            let physical_name = entry.file_name();
            if physical_name.as_bytes() == SENTINEL_NAME.as_bytes() && ino == ROOT_INO {
                continue;
            }
            let logical_name = Self::logical_name(&physical_name);
            let child_logical = logical.join(&logical_name);
            let child_ino = inodes.ino_for(&child_logical);
            let kind = match entry.file_type() {
                Ok(ft) if ft.is_dir() => FileType::Directory,
                Ok(ft) if ft.is_symlink() => FileType::Symlink,
                _ => FileType::RegularFile,
            };
            entries.push((child_ino, kind, logical_name.to_string_lossy().into_owned()));
        }

        for (i, (child_ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(child_ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        let mut inodes = self.inodes.lock();
        let Some(parent_path) = inodes.path_of(parent) else {
            return reply.error(libc::ENOENT);
        };
        let logical = parent_path.join(name);
        let physical = self.physical_path(&logical);
        match self.open_for_cipher(&physical, true) {
            Ok(_) => {
                let _ = fs::set_permissions(&physical, fs::Permissions::from_mode(mode & 0o7777));
                let ino = inodes.ino_for(&logical);
                drop(inodes);
                match self.attr_for(ino, &physical) {
                    Ok(attr) => reply.entry(&TTL, &attr, 0),
                    Err(err) => reply.error(err.raw_os_error().unwrap_or(libc::EIO)),
                }
            }
            Err(err) => reply.error(err.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let mut inodes = self.inodes.lock();
        let Some(parent_path) = inodes.path_of(parent) else {
            return reply.error(libc::ENOENT);
        };
        let logical = parent_path.join(name);
        let physical = self.physical_path(&logical);
        if let Err(err) = fs::create_dir(&physical) {
            return reply.error(err.raw_os_error().unwrap_or(libc::EIO));
        }
        let _ = fs::set_permissions(&physical, fs::Permissions::from_mode(mode & 0o7777));
        let ino = inodes.ino_for(&logical);
        drop(inodes);
        match self.attr_for(ino, &physical) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(err) => reply.error(err.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let inodes = self.inodes.lock();
        let Some(parent_path) = inodes.path_of(parent) else {
            return reply.error(libc::ENOENT);
        };
        let physical = self.physical_path(&parent_path.join(name));
        match fs::remove_file(&physical) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let inodes = self.inodes.lock();
        let Some(parent_path) = inodes.path_of(parent) else {
            return reply.error(libc::ENOENT);
        };
        let physical = self.physical_path(&parent_path.join(name));
        match fs::remove_dir(&physical) {
            Ok(()) => reply.ok(),
            Err(err) => reply.error(err.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let mut inodes = self.inodes.lock();
        let Some(parent_path) = inodes.path_of(parent) else {
            return reply.error(libc::ENOENT);
        };
        let logical = parent_path.join(link_name);
        let physical = self.physical_path(&logical);
        if let Err(err) = std::os::unix::fs::symlink(target, &physical) {
            return reply.error(err.raw_os_error().unwrap_or(libc::EIO));
        }
        let ino = inodes.ino_for(&logical);
        drop(inodes);
        match self.attr_for(ino, &physical) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(err) => reply.error(err.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let inodes = self.inodes.lock();
        let Some(logical) = inodes.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        let physical = self.physical_path(&logical);
        match fs::read_link(&physical) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(err) => reply.error(err.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let mut inodes = self.inodes.lock();
        let (Some(old_parent), Some(new_parent)) = (inodes.path_of(parent), inodes.path_of(newparent))
        else {
            return reply.error(libc::ENOENT);
        };
        let old_logical = old_parent.join(name);
        let new_logical = new_parent.join(newname);
        let old_physical = self.physical_path(&old_logical);
        let new_physical = self.physical_path(&new_logical);
        match fs::rename(&old_physical, &new_physical) {
            Ok(()) => {
                inodes.forget_path(&old_logical, &new_logical);
                reply.ok();
            }
            Err(err) => reply.error(err.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let mut inodes = self.inodes.lock();
        let (Some(logical), Some(new_parent)) = (inodes.path_of(ino), inodes.path_of(newparent))
        else {
            return reply.error(libc::ENOENT);
        };
        let physical = self.physical_path(&logical);
        let new_logical = new_parent.join(newname);
        let new_physical = self.physical_path(&new_logical);
        if let Err(err) = fs::hard_link(&physical, &new_physical) {
            return reply.error(err.raw_os_error().unwrap_or(libc::EIO));
        }
        let new_ino = inodes.ino_for(&new_logical);
        drop(inodes);
        match self.attr_for(new_ino, &new_physical) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(err) => reply.error(err.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        match statvfs_for(&self.mount.root) {
            Ok(stat) => reply.statfs(
                stat.f_blocks,
                stat.f_bfree,
                stat.f_bavail,
                stat.f_files,
                stat.f_ffree,
                stat.f_bsize as u32,
                stat.f_namemax as u32,
                stat.f_frsize as u32,
            ),
            Err(err) => reply.error(err.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, _mask: i32, reply: ReplyEmpty) {
        let inodes = self.inodes.lock();
        match inodes.path_of(ino) {
            Some(_) => reply.ok(),
            None => reply.error(libc::ENOENT),
        }
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        // macOS Finder tags every file it touches with com.apple.quarantine;
        // acknowledging without storing it keeps Finder happy without
        // polluting the backing store with an attribute safefs never reads.
        if name == OsStr::new("com.apple.quarantine") {
            return reply.ok();
        }
        reply.error(libc::ENOTSUP);
    }

    fn getxattr(&mut self, _req: &Request<'_>, _ino: u64, _name: &OsStr, _size: u32, reply: ReplyXattr) {
        reply.error(libc::ENODATA);
    }

    fn listxattr(&mut self, _req: &Request<'_>, _ino: u64, _size: u32, reply: ReplyXattr) {
        reply.size(0);
    }

    fn removexattr(&mut self, _req: &Request<'_>, _ino: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.ok();
    }
}
