//! Source identity: normalizing VM source strings into canonical keys.
//!
//! The VM reports chunk sources in its native convention; breakpoints are
//! keyed by client paths. Both sides are folded to lowercase and made
//! relative to the working directory so `setBreakpoints("C:\Proj\a.lua")`
//! and a hook firing in `@a.lua` agree on one key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Classification of a raw VM source string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RawSource<'a> {
    /// `@path`: a chunk loaded from a file.
    File(&'a str),
    /// `=name`: a named chunk; identity comes from the resolver.
    Chunk(&'a str),
    /// `=[C]`: a host-native frame. No source, no breakpoints.
    Native,
    /// Anything else: an anonymous in-memory chunk whose raw string is its
    /// own text.
    Anonymous(&'a str),
}

pub fn classify(raw: &str) -> RawSource<'_> {
    if let Some(path) = raw.strip_prefix('@') {
        RawSource::File(path)
    } else if raw == "=[C]" {
        RawSource::Native
    } else if let Some(name) = raw.strip_prefix('=') {
        RawSource::Chunk(name)
    } else {
        RawSource::Anonymous(raw)
    }
}

/// Outcome of resolving a `=name` chunk to a client path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkResolution {
    /// Remember the mapping for the rest of the session.
    Cached(String),
    /// Valid for the current stack-trace render only.
    Once(String),
    Unresolved,
}

/// Host-supplied resolver for `=name` chunks.
pub trait ChunkResolver {
    fn resolve(&mut self, name: &str) -> ChunkResolution;
}

/// Resolver that never resolves anything.
#[derive(Debug, Default)]
pub struct NullResolver;

impl ChunkResolver for NullResolver {
    fn resolve(&mut self, _name: &str) -> ChunkResolution {
        ChunkResolution::Unresolved
    }
}

/// Canonical-key derivation with the two resolver caching tiers.
#[derive(Debug, Default)]
pub struct PathConvert {
    workdir: PathBuf,
    session: HashMap<String, PathBuf>,
    once: HashMap<String, PathBuf>,
}

impl PathConvert {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_workdir(&mut self, dir: &str) {
        self.workdir = PathBuf::from(fold_case(dir));
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Canonical breakpoint key for a client-supplied path.
    pub fn client_key(&self, path: &str) -> PathBuf {
        uncomplete(Path::new(&fold_case(path)), &self.workdir)
    }

    /// Canonical key for a VM-reported file source (the part after `@`).
    pub fn vm_file_key(&self, path: &str) -> PathBuf {
        uncomplete(Path::new(&fold_case(path)), &self.workdir)
    }

    /// Completed path for display to the client.
    pub fn display_path(&self, key: &Path) -> PathBuf {
        if key.is_absolute() {
            key.to_path_buf()
        } else {
            self.workdir.join(key)
        }
    }

    /// Drop resolutions scoped to the previous stack-trace render.
    pub fn begin_render(&mut self) {
        self.once.clear();
    }

    /// Resolve a `=name` chunk to its canonical key, consulting both cache
    /// tiers before the host resolver.
    pub fn resolve_chunk(
        &mut self,
        name: &str,
        resolver: &mut dyn ChunkResolver,
    ) -> Option<PathBuf> {
        if let Some(key) = self.session.get(name) {
            return Some(key.clone());
        }
        if let Some(key) = self.once.get(name) {
            return Some(key.clone());
        }
        match resolver.resolve(name) {
            ChunkResolution::Cached(path) => {
                let key = self.client_key(&path);
                self.session.insert(name.to_string(), key.clone());
                Some(key)
            }
            ChunkResolution::Once(path) => {
                let key = self.client_key(&path);
                self.once.insert(name.to_string(), key.clone());
                Some(key)
            }
            ChunkResolution::Unresolved => None,
        }
    }
}

fn fold_case(path: &str) -> String {
    path.to_lowercase()
}

fn uncomplete(path: &Path, base: &Path) -> PathBuf {
    if base.as_os_str().is_empty() {
        return path.to_path_buf();
    }
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}
