use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::path::VirtualPath;

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("{0} not found")]
    NotFound(VirtualPath),
    #[error("{0} is a directory")]
    IsDirectory(VirtualPath),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type FsResult<T> = std::result::Result<T, FsError>;

/// Storage that unit sources are fetched from.
pub trait VirtualFileSystem: Send + Sync {
    fn read(&self, path: &VirtualPath) -> FsResult<Vec<u8>>;
    fn write(&self, path: &VirtualPath, contents: &[u8]) -> FsResult<()>;
    fn exists(&self, path: &VirtualPath) -> bool;
    fn mkdirp(&self, path: &VirtualPath) -> FsResult<()>;

    fn read_to_string(&self, path: &VirtualPath) -> FsResult<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| {
            FsError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }
}

// -----------------------------------------------------------------------------
// In-memory filesystem
// -----------------------------------------------------------------------------

#[derive(Clone)]
pub struct InMemoryFileSystem {
    root: Arc<Mutex<HashMap<VirtualPath, FsNode>>>,
}

#[derive(Clone, Debug)]
enum FsNode {
    File(Vec<u8>),
    Directory,
}

impl InMemoryFileSystem {
    pub fn new() -> Self {
        let mut map = HashMap::new();
        map.insert(VirtualPath::root(), FsNode::Directory);
        Self {
            root: Arc::new(Mutex::new(map)),
        }
    }

    /// Seeds `path` with text, creating parent directories.
    pub fn with_file(self, path: &str, contents: &str) -> FsResult<Self> {
        let path = VirtualPath::from(path);
        self.write(&path, contents.as_bytes())?;
        Ok(self)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<VirtualPath, FsNode>> {
        match self.root.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }
}

impl Default for InMemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualFileSystem for InMemoryFileSystem {
    fn read(&self, path: &VirtualPath) -> FsResult<Vec<u8>> {
        match self.lock().get(path) {
            Some(FsNode::File(contents)) => Ok(contents.clone()),
            Some(FsNode::Directory) => Err(FsError::IsDirectory(path.clone())),
            None => Err(FsError::NotFound(path.clone())),
        }
    }

    fn write(&self, path: &VirtualPath, contents: &[u8]) -> FsResult<()> {
        if let Some(parent) = path.parent() {
            self.mkdirp(&parent)?;
        }
        self.lock()
            .insert(path.clone(), FsNode::File(contents.to_vec()));
        Ok(())
    }

    fn exists(&self, path: &VirtualPath) -> bool {
        self.lock().contains_key(path)
    }

    fn mkdirp(&self, path: &VirtualPath) -> FsResult<()> {
        let mut guard = self.lock();
        let mut current = if path.is_absolute() {
            VirtualPath::root()
        } else {
            VirtualPath::new_relative(Vec::<String>::new())
        };
        guard.entry(current.clone()).or_insert(FsNode::Directory);
        for segment in path.segments() {
            current = current.join(segment.clone());
            guard.entry(current.clone()).or_insert(FsNode::Directory);
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Native filesystem rooted at a host directory
// -----------------------------------------------------------------------------

/// Maps absolute virtual paths onto a directory of the host filesystem, so
/// `/app/a.js` reads `<root>/app/a.js`.
pub struct NativeFileSystem {
    root: PathBuf,
}

impl NativeFileSystem {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn to_native_path(&self, path: &VirtualPath) -> PathBuf {
        let mut buf = self.root.clone();
        for segment in path.segments() {
            buf.push(segment);
        }
        buf
    }
}

impl VirtualFileSystem for NativeFileSystem {
    fn read(&self, path: &VirtualPath) -> FsResult<Vec<u8>> {
        let native = self.to_native_path(path);
        if native.is_dir() {
            return Err(FsError::IsDirectory(path.clone()));
        }
        let mut file = std::fs::File::open(&native).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FsError::NotFound(path.clone()),
            _ => FsError::Io(e),
        })?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    fn write(&self, path: &VirtualPath, contents: &[u8]) -> FsResult<()> {
        let native = self.to_native_path(path);
        if let Some(parent) = native.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(native, contents)?;
        Ok(())
    }

    fn exists(&self, path: &VirtualPath) -> bool {
        self.to_native_path(path).exists()
    }

    fn mkdirp(&self, path: &VirtualPath) -> FsResult<()> {
        std::fs::create_dir_all(self.to_native_path(path))?;
        Ok(())
    }
}
