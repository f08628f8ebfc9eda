//! mtab lock
//!
//! Serializes updates of a shared data file such as `/etc/mtab` across
//! unrelated processes. Two protocols are available:
//!
//! - classic (default): link a per-process file `<data>~.<id>` to
//!   `<data>~`; whoever creates the link owns the lock. Losers wait on an
//!   `fcntl` record lock of `<data>~` and retry until a deadline.
//! - simple: `flock(LOCK_EX)` on `<data>.lock`.
//!
//! A [`Lock`] is a shared handle; clones refer to the same lock state.

use crate::error::{MountError, MountResult};
use std::cell::RefCell;
use std::fs::{self, File, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default upper bound for the classic lock wait
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default pause between attempts to take the classic lock
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(5);

const LOCK_MODE: u32 = 0o644;

/// Shared handle to a data file lock
#[derive(Clone)]
pub struct Lock(Rc<RefCell<LockInner>>);

struct LockInner {
    datafile: PathBuf,
    id: u32,
    lockfile: PathBuf,
    linkfile: PathBuf,
    fd: Option<File>,
    locked: bool,
    simple: bool,
    sigblock: bool,
    saved_mask: Option<libc::sigset_t>,
    timeout: Duration,
    retry_delay: Duration,
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

impl Lock {
    /// Lock for `datafile`; `id` names the link file and defaults to the
    /// process ID
    pub fn new(datafile: impl Into<PathBuf>, id: Option<u32>) -> Self {
        let datafile = datafile.into();
        let id = id.unwrap_or_else(std::process::id);
        let inner = LockInner {
            lockfile: append_suffix(&datafile, "~"),
            linkfile: append_suffix(&datafile, &format!("~.{}", id)),
            datafile,
            id,
            fd: None,
            locked: false,
            simple: false,
            sigblock: false,
            saved_mask: None,
            timeout: DEFAULT_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
        };
        debug!(
            lockfile = %inner.lockfile.display(),
            linkfile = %inner.linkfile.display(),
            "new lock"
        );
        Self(Rc::new(RefCell::new(inner)))
    }

    pub fn lockfile(&self) -> PathBuf {
        self.0.borrow().lockfile.clone()
    }

    pub fn linkfile(&self) -> PathBuf {
        self.0.borrow().linkfile.clone()
    }

    pub fn datafile(&self) -> PathBuf {
        self.0.borrow().datafile.clone()
    }

    pub fn is_locked(&self) -> bool {
        self.0.borrow().locked
    }

    /// Number of handles sharing this lock
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Switch between the flock protocol on `<data>.lock` and the classic
    /// protocol on `<data>~`. Not allowed while locked.
    pub fn use_simple_lock(&self, enable: bool) -> MountResult<()> {
        let mut inner = self.0.borrow_mut();
        if inner.locked {
            return Err(MountError::LockBusy);
        }
        inner.simple = enable;
        inner.lockfile = append_suffix(&inner.datafile, if enable { ".lock" } else { "~" });
        debug!(lockfile = %inner.lockfile.display(), simple = enable, "lock mode changed");
        Ok(())
    }

    /// Block signals while locked; the previous mask is restored on unlock
    pub fn block_signals(&self, enable: bool) {
        self.0.borrow_mut().sigblock = enable;
    }

    /// Upper bound for waiting on another holder (classic protocol)
    pub fn set_timeout(&self, timeout: Duration) {
        self.0.borrow_mut().timeout = timeout;
    }

    pub fn set_retry_delay(&self, delay: Duration) {
        self.0.borrow_mut().retry_delay = delay;
    }

    /// Take the lock.
    ///
    /// Fails with [`MountError::LockTimeout`] when another holder keeps the
    /// classic lock past the timeout. Taking a lock this handle already
    /// holds is a no-op.
    pub fn lock(&self) -> MountResult<()> {
        let mut inner = self.0.borrow_mut();
        if inner.locked {
            return Ok(());
        }
        if inner.simple {
            inner.lock_simple()
        } else {
            inner.lock_classic()
        }
    }

    /// Release the lock. Safe to call at any time, also when `lock` failed
    /// or was never called.
    pub fn unlock(&self) {
        self.0.borrow_mut().unlock();
    }

    /// Take the lock and release it when the guard goes out of scope
    pub fn guard(&self) -> MountResult<LockGuard> {
        self.lock()?;
        Ok(LockGuard { lock: self.clone() })
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.0.borrow();
        f.debug_struct("Lock")
            .field("lockfile", &inner.lockfile)
            .field("linkfile", &inner.linkfile)
            .field("id", &inner.id)
            .field("locked", &inner.locked)
            .field("simple", &inner.simple)
            .finish()
    }
}

/// Holds a [`Lock`] until dropped
#[must_use = "the lock is released when the guard is dropped"]
pub struct LockGuard {
    lock: Lock,
}

impl LockGuard {
    pub fn lock(&self) -> &Lock {
        &self.lock
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

impl LockInner {
    fn lock_simple(&mut self) -> MountResult<()> {
        debug!("{}: locking", self.lockfile.display());
        if self.sigblock {
            self.saved_mask = Some(block_signals(&[]).map_err(|e| MountError::lock_io("blocking signals", e))?);
        }

        match self.flock_lockfile() {
            Ok(file) => {
                self.fd = Some(file);
                self.locked = true;
                Ok(())
            }
            Err(e) => {
                self.restore_signals();
                Err(e)
            }
        }
    }

    fn flock_lockfile(&self) -> MountResult<File> {
        let path = &self.lockfile;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .mode(LOCK_MODE)
            .custom_flags(libc::O_CLOEXEC)
            .open(path)
            .map_err(|e| MountError::lock_io(format!("opening {}", path.display()), e))?;

        let mode = file
            .metadata()
            .map_err(|e| MountError::lock_io(format!("stat {}", path.display()), e))?
            .mode();
        if mode & LOCK_MODE != LOCK_MODE {
            file.set_permissions(Permissions::from_mode(LOCK_MODE))
                .map_err(|e| MountError::lock_io(format!("chmod {}", path.display()), e))?;
        }

        loop {
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if rc == 0 {
                return Ok(file);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) | Some(libc::EAGAIN) => continue,
                _ => return Err(MountError::lock_io(format!("flock {}", path.display()), err)),
            }
        }
    }

    fn lock_classic(&mut self) -> MountResult<()> {
        let result = self.acquire_classic();
        match &result {
            Ok(()) => {
                debug!("{}: ({}) successfully locked", self.lockfile.display(), std::process::id());
                let _ = fs::remove_file(&self.linkfile);
            }
            Err(e) => {
                debug!("{}: lock failed: {}", self.lockfile.display(), e);
                self.unlock();
            }
        }
        result
    }

    fn acquire_classic(&mut self) -> MountResult<()> {
        if self.sigblock {
            // SIGALRM and SIGTRAP stay deliverable for callers that use them
            let mask = block_signals(&[libc::SIGTRAP, libc::SIGALRM])
                .map_err(|e| MountError::lock_io("blocking signals", e))?;
            self.saved_mask = Some(mask);
        }

        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .custom_flags(libc::O_CLOEXEC)
            .open(&self.linkfile)
            .map_err(|e| MountError::lock_io(format!("creating {}", self.linkfile.display()), e))?;

        let deadline = Instant::now() + self.timeout;

        while !self.locked {
            match fs::hard_link(&self.linkfile, &self.lockfile) {
                Ok(()) => self.locked = true,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(MountError::lock_io(
                        format!("linking {} to {}", self.linkfile.display(), self.lockfile.display()),
                        e,
                    ));
                }
            }

            let file = match OpenOptions::new()
                .write(true)
                .custom_flags(libc::O_CLOEXEC)
                .open(&self.lockfile)
            {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // holder unlocked between our link and open
                    self.locked = false;
                    self.check_deadline(deadline)?;
                    continue;
                }
                Err(e) => {
                    return Err(MountError::lock_io(format!("opening {}", self.lockfile.display()), e));
                }
            };

            if self.locked {
                if let Err(e) = set_record_lock(&file) {
                    // the link is ours, the record lock is advisory only
                    debug!("{}: can't F_SETLK lockfile: {}", self.lockfile.display(), e);
                }
                self.fd = Some(file);
                break;
            }

            self.wait_record_lock(&file, deadline)?;
            thread::sleep(self.retry_delay);
            drop(file);
        }
        Ok(())
    }

    fn check_deadline(&self, deadline: Instant) -> MountResult<()> {
        if Instant::now() < deadline {
            return Ok(());
        }
        debug!(
            "{}: can't create link: time out (perhaps there is a stale lock file?)",
            self.lockfile.display()
        );
        Err(MountError::LockTimeout {
            path: self.lockfile.clone(),
        })
    }

    /// Wait until the holder's record lock goes away or `deadline` passes
    fn wait_record_lock(&self, file: &File, deadline: Instant) -> MountResult<()> {
        loop {
            self.check_deadline(deadline)?;
            match set_record_lock(file) {
                Ok(()) => return Ok(()),
                Err(e) => match e.raw_os_error() {
                    Some(libc::EACCES) | Some(libc::EAGAIN) => thread::sleep(self.retry_delay),
                    Some(libc::EINTR) => {}
                    _ => {
                        return Err(MountError::lock_io(
                            format!("locking {}", self.lockfile.display()),
                            e,
                        ));
                    }
                },
            }
        }
    }

    fn unlock(&mut self) {
        debug!(
            "({}) {}",
            std::process::id(),
            if self.locked { "unlocking" } else { "cleaning" }
        );

        if self.simple {
            if self.fd.take().is_some() {
                debug!("{}: unflocking", self.lockfile.display());
            }
        } else {
            if !self.locked && self.owns_lockfile() {
                self.locked = true;
            }
            let _ = fs::remove_file(&self.linkfile);
            self.fd = None;
            if self.locked {
                let _ = fs::remove_file(&self.lockfile);
                debug!("unlink {}", self.lockfile.display());
            }
        }

        self.locked = false;
        self.restore_signals();
    }

    /// The lock belongs to us when the link file and the lock file are the
    /// same inode; the `locked` flag can be stale after an interrupted lock
    fn owns_lockfile(&self) -> bool {
        match (fs::metadata(&self.lockfile), fs::metadata(&self.linkfile)) {
            (Ok(lo), Ok(li)) => lo.dev() == li.dev() && lo.ino() == li.ino(),
            _ => false,
        }
    }

    fn restore_signals(&mut self) {
        if let Some(mask) = self.saved_mask.take() {
            debug!("restoring sigmask");
            unsafe {
                libc::pthread_sigmask(libc::SIG_SETMASK, &mask, std::ptr::null_mut());
            }
        }
    }
}

impl Drop for LockInner {
    fn drop(&mut self) {
        if self.locked {
            warn!("{}: lock handle dropped while locked", self.lockfile.display());
            self.unlock();
        }
    }
}

/// Non-blocking exclusive `fcntl` lock of the whole file
fn set_record_lock(file: &File) -> io::Result<()> {
    let mut fl: libc::flock = unsafe { std::mem::zeroed() };
    fl.l_type = libc::F_WRLCK as libc::c_short;
    fl.l_whence = libc::SEEK_SET as libc::c_short;
    fl.l_start = 0;
    fl.l_len = 0;

    let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETLK, &fl) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Block every signal except `keep`; returns the previous mask
fn block_signals(keep: &[libc::c_int]) -> io::Result<libc::sigset_t> {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        let mut old: libc::sigset_t = std::mem::zeroed();
        libc::sigfillset(&mut set);
        for sig in keep {
            libc::sigdelset(&mut set, *sig);
        }
        let rc = libc::pthread_sigmask(libc::SIG_BLOCK, &set, &mut old);
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        Ok(old)
    }
}
