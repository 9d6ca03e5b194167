//! Lazy native library loading and entry-point resolution.
//!
//! A [`Library`] is the process-scoped registry for one native library: it
//! loads the library on first use, runs its one-time load hook, and resolves
//! entry points. [`Proc`] caches one resolved entry point so repeated
//! lookups are a single atomic load.
//!
//! Both first-use paths use double-checked locking: an atomic fast path,
//! then a mutex-guarded slow path that re-checks before doing the work.
//! Concurrent first use from several threads loads the library, and runs
//! its hook, exactly once.
//!
//! ```ignore
//! static START_SESSION: Proc = Proc::new("WintunStartSession");
//!
//! let library = Library::new("wintun.dll").on_load(|lib, module| install_logger(lib, module));
//! let addr = START_SESSION.find(&library)?;
//! ```

use std::ffi::{CString, c_void};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::{Error, Result};

/// Handle of a loaded native module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleHandle(NonNull<c_void>);

// SAFETY: a module handle is an opaque token owned by the OS loader; it is
// valid from any thread.
unsafe impl Send for ModuleHandle {}
unsafe impl Sync for ModuleHandle {}

impl ModuleHandle {
    /// Wrap a raw loader handle. Returns `None` for null.
    pub fn from_ptr(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    /// The raw loader handle.
    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// Address of a resolved entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol(NonNull<c_void>);

// SAFETY: an entry-point address is immutable code; sharing it is harmless.
unsafe impl Send for Symbol {}
unsafe impl Sync for Symbol {}

impl Symbol {
    /// Wrap a raw entry-point address. Returns `None` for null.
    pub fn from_ptr(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    /// The raw address.
    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// Loads modules and looks up their exports.
pub trait Loader: fmt::Debug + Send + Sync {
    /// Load the module at `path`.
    fn load(&self, path: &Path) -> io::Result<ModuleHandle>;

    /// Look up an export in a loaded module.
    fn symbol(&self, module: ModuleHandle, name: &str) -> Option<Symbol>;
}

/// Hook run once, right after the library is loaded and before any other
/// thread can observe it as loaded.
pub type LoadHook = Box<dyn Fn(&Library, ModuleHandle) + Send + Sync>;

/// A lazily loaded native library.
pub struct Library {
    path: PathBuf,
    loader: Box<dyn Loader>,
    module: AtomicPtr<c_void>,
    lock: Mutex<()>,
    on_load: Option<LoadHook>,
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Library")
            .field("path", &self.path)
            .field("loader", &self.loader)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl Library {
    /// Create an unloaded library using the platform loader.
    ///
    /// A bare file name is searched in the application directory first,
    /// then in the system directories.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_loader(path, SystemLoader)
    }

    /// Create an unloaded library with a custom loader.
    pub fn with_loader(path: impl Into<PathBuf>, loader: impl Loader + 'static) -> Self {
        Self {
            path: path.into(),
            loader: Box::new(loader),
            module: AtomicPtr::new(ptr::null_mut()),
            lock: Mutex::new(()),
            on_load: None,
        }
    }

    /// Set the one-time load hook.
    ///
    /// The hook receives the freshly loaded module and should resolve what it
    /// needs with [`lookup`](Self::lookup); calling
    /// [`ensure_loaded`](Self::ensure_loaded) from inside it deadlocks.
    pub fn on_load(mut self, hook: impl Fn(&Library, ModuleHandle) + Send + Sync + 'static) -> Self {
        self.on_load = Some(Box::new(hook));
        self
    }

    /// The library path as given.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the library has been loaded.
    pub fn is_loaded(&self) -> bool {
        !self.module.load(Ordering::Acquire).is_null()
    }

    /// Load the library if needed and return its handle.
    ///
    /// A load failure is returned as [`Error::LibraryLoad`]; nothing is
    /// retried here.
    pub fn ensure_loaded(&self) -> Result<ModuleHandle> {
        if let Some(module) = ModuleHandle::from_ptr(self.module.load(Ordering::Acquire)) {
            return Ok(module);
        }

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(module) = ModuleHandle::from_ptr(self.module.load(Ordering::Acquire)) {
            return Ok(module);
        }

        let module = self
            .loader
            .load(&self.path)
            .map_err(|source| Error::LibraryLoad {
                library: self.path.display().to_string(),
                source,
            })?;
        tracing::debug!(library = %self.path.display(), "loaded native library");

        if let Some(hook) = &self.on_load {
            hook(self, module);
        }

        self.module.store(module.as_ptr(), Ordering::Release);
        Ok(module)
    }

    /// Load the library if needed and resolve `name`.
    ///
    /// Every call performs a lookup; cache hot entry points in a [`Proc`].
    pub fn resolve(&self, name: &str) -> Result<Symbol> {
        let module = self.ensure_loaded()?;
        self.lookup(module, name)
    }

    /// Resolve `name` in an already loaded module.
    pub fn lookup(&self, module: ModuleHandle, name: &str) -> Result<Symbol> {
        self.loader
            .symbol(module, name)
            .ok_or_else(|| Error::SymbolNotFound {
                library: self.path.display().to_string(),
                symbol: name.to_string(),
            })
    }
}

/// A lazily resolved, cached entry point.
///
/// A `Proc` must always be used with the same [`Library`].
pub struct Proc {
    name: &'static str,
    addr: AtomicPtr<c_void>,
    lock: Mutex<()>,
}

impl fmt::Debug for Proc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proc")
            .field("name", &self.name)
            .field("resolved", &!self.addr.load(Ordering::Relaxed).is_null())
            .finish()
    }
}

impl Proc {
    /// Create an unresolved entry point.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            addr: AtomicPtr::new(ptr::null_mut()),
            lock: Mutex::new(()),
        }
    }

    /// The export name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Resolve the entry point, loading the library on first use.
    ///
    /// Once resolved, this is a single lock-free atomic load.
    pub fn find(&self, library: &Library) -> Result<Symbol> {
        if let Some(symbol) = Symbol::from_ptr(self.addr.load(Ordering::Acquire)) {
            return Ok(symbol);
        }

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(symbol) = Symbol::from_ptr(self.addr.load(Ordering::Acquire)) {
            return Ok(symbol);
        }

        let symbol = library.resolve(self.name)?;
        self.addr.store(symbol.as_ptr(), Ordering::Release);
        Ok(symbol)
    }
}

/// The platform loader: `dlopen`/`dlsym` on Unix, `LoadLibraryExW`/
/// `GetProcAddress` on Windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLoader;

#[cfg(unix)]
impl Loader for SystemLoader {
    fn load(&self, path: &Path) -> io::Result<ModuleHandle> {
        use std::os::unix::ffi::OsStrExt;

        let mut last_error = String::from("library not found");
        for candidate in search_order(path) {
            let cpath = CString::new(candidate.as_os_str().as_bytes())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

            // SAFETY: cpath is a valid NUL-terminated path.
            let handle = unsafe { libc::dlopen(cpath.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
            if let Some(module) = ModuleHandle::from_ptr(handle) {
                return Ok(module);
            }

            // SAFETY: dlerror returns null or a thread-local NUL-terminated message.
            let message = unsafe { libc::dlerror() };
            if !message.is_null() {
                last_error = unsafe { std::ffi::CStr::from_ptr(message) }
                    .to_string_lossy()
                    .into_owned();
            }
        }

        Err(io::Error::new(io::ErrorKind::NotFound, last_error))
    }

    fn symbol(&self, module: ModuleHandle, name: &str) -> Option<Symbol> {
        let cname = CString::new(name).ok()?;
        // SAFETY: module came from dlopen and cname is NUL-terminated.
        let addr = unsafe { libc::dlsym(module.as_ptr(), cname.as_ptr()) };
        Symbol::from_ptr(addr)
    }
}

/// Application directory first, then the loader's system search.
#[cfg(unix)]
fn search_order(path: &Path) -> Vec<PathBuf> {
    let bare = path.parent().is_none_or(|p| p.as_os_str().is_empty());
    if !bare {
        return vec![path.to_path_buf()];
    }

    let mut candidates = Vec::with_capacity(2);
    if let Ok(exe) = std::env::current_exe()
        && let Some(dir) = exe.parent()
    {
        candidates.push(dir.join(path));
    }
    candidates.push(path.to_path_buf());
    candidates
}

#[cfg(windows)]
impl Loader for SystemLoader {
    fn load(&self, path: &Path) -> io::Result<ModuleHandle> {
        use std::os::windows::ffi::OsStrExt;
        use windows_sys::Win32::System::LibraryLoader::{
            LOAD_LIBRARY_SEARCH_APPLICATION_DIR, LOAD_LIBRARY_SEARCH_SYSTEM32, LoadLibraryExW,
        };

        let wide: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: wide is NUL-terminated and outlives the call.
        let module = unsafe {
            LoadLibraryExW(
                wide.as_ptr(),
                ptr::null_mut(),
                LOAD_LIBRARY_SEARCH_APPLICATION_DIR | LOAD_LIBRARY_SEARCH_SYSTEM32,
            )
        };
        ModuleHandle::from_ptr(module).ok_or_else(io::Error::last_os_error)
    }

    fn symbol(&self, module: ModuleHandle, name: &str) -> Option<Symbol> {
        use windows_sys::Win32::System::LibraryLoader::GetProcAddress;

        let cname = CString::new(name).ok()?;
        // SAFETY: module came from LoadLibraryExW and cname is NUL-terminated.
        let proc = unsafe { GetProcAddress(module.as_ptr(), cname.as_ptr().cast()) }?;
        Symbol::from_ptr(proc as usize as *mut c_void)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};

    static CREATE: u8 = 0;
    static OPEN: u8 = 0;

    /// Hands out the addresses of two statics and counts loads.
    #[derive(Debug, Clone, Default)]
    struct CountingLoader {
        loads: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Loader for CountingLoader {
        fn load(&self, _path: &Path) -> io::Result<ModuleHandle> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            // Widen the race window for concurrent first use.
            std::thread::sleep(std::time::Duration::from_millis(5));
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such library"));
            }
            Ok(ModuleHandle::from_ptr(NonNull::<u64>::dangling().as_ptr().cast()).unwrap())
        }

        fn symbol(&self, _module: ModuleHandle, name: &str) -> Option<Symbol> {
            let addr = match name {
                "WintunCreateAdapter" => &CREATE as *const u8,
                "WintunOpenAdapter" => &OPEN as *const u8,
                _ => return None,
            };
            Symbol::from_ptr(addr as *mut c_void)
        }
    }

    #[test]
    fn test_concurrent_first_use_loads_once() {
        let loader = CountingLoader::default();
        let loads = loader.loads.clone();
        let hooks = Arc::new(AtomicUsize::new(0));
        let hook_count = hooks.clone();

        let library = Library::with_loader("wintun.dll", loader).on_load(move |lib, module| {
            hook_count.fetch_add(1, Ordering::SeqCst);
            assert!(lib.lookup(module, "WintunOpenAdapter").is_ok());
        });
        let proc = Proc::new("WintunCreateAdapter");

        let threads = 8;
        let barrier = Barrier::new(threads);
        let results: Vec<Symbol> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        proc.find(&library).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let expected = Symbol::from_ptr(&CREATE as *const u8 as *mut c_void).unwrap();
        assert!(results.iter().all(|s| *s == expected));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
        assert!(library.is_loaded());
    }

    #[test]
    fn test_missing_symbol_is_named() {
        let library = Library::with_loader("wintun.dll", CountingLoader::default());
        let err = library.resolve("WintunSetLogger").unwrap_err();
        match err {
            Error::SymbolNotFound { library, symbol } => {
                assert_eq!(library, "wintun.dll");
                assert_eq!(symbol, "WintunSetLogger");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_load_failure() {
        let loader = CountingLoader {
            fail: true,
            ..Default::default()
        };
        let library = Library::with_loader("missing.dll", loader);
        assert!(matches!(
            library.ensure_loaded(),
            Err(Error::LibraryLoad { .. })
        ));
        assert!(!library.is_loaded());
    }

    #[test]
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    fn test_system_loader_libc() {
        let library = Library::new("libc.so.6");
        let getpid = Proc::new("getpid");
        let symbol = getpid.find(&library).unwrap();
        assert_eq!(getpid.find(&library).unwrap(), symbol);

        let missing = Library::new("libtunnels-does-not-exist.so");
        assert!(matches!(
            missing.ensure_loaded(),
            Err(Error::LibraryLoad { .. })
        ));
    }

    #[test]
    #[cfg(unix)]
    fn test_search_order() {
        let order = search_order(Path::new("wintun.dll"));
        assert_eq!(order.last().unwrap(), Path::new("wintun.dll"));
        assert!(order.len() <= 2);

        let order = search_order(Path::new("/opt/lib/wintun.dll"));
        assert_eq!(order, vec![PathBuf::from("/opt/lib/wintun.dll")]);
    }
}
