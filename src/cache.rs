use crate::error::{ServerError, ServerResult};
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Minimum body size worth running through the gzip encoder.
const GZIP_MIN_SIZE: usize = 512;

/// What a canonical path turned out to be on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    /// Directory marker; carries no body. The directory indexer decides
    /// whether an index file or a generated listing is served.
    Directory,
}

/// State of the lazily computed gzip variant of an entry.
enum GzipState {
    NotComputed,
    /// Too small, not a compressible content type, or gzip grew the body.
    Unsuitable,
    Ready(Bytes),
}

/// A cached record of one file's (or directory's) metadata and body.
///
/// Two entries with equal `etag` are interchangeable: the etag is a
/// deterministic function of (path, mtime, size).
pub struct CacheEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: SystemTime,
    pub etag: String,
    pub content_type: &'static str,
    pub body: Bytes,
    gzip: Mutex<GzipState>,
    expires_at: Instant,
    last_used: AtomicU64,
}

impl CacheEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Per-path slot. The slot mutex is the single-flight guard: the first
/// concurrent requester for a path loads the entry while holding it, any
/// others block on the same mutex and then reuse the result.
struct Slot {
    entry: Mutex<Option<Arc<CacheEntry>>>,
}

/// Shared cache of open-file metadata and bodies, keyed by canonical path.
///
/// Entries are created on first resolution, revalidated against the file's
/// modification time on every hit, and refreshed once their TTL passes.
/// With a memory ceiling configured, least-recently-used entries are
/// evicted; without one the cache never evicts.
pub struct FileCache {
    slots: RwLock<HashMap<PathBuf, Arc<Slot>>>,
    ttl: Duration,
    max_bytes: Option<usize>,
    total_bytes: AtomicUsize,
    clock: AtomicU64,
    loads: AtomicU64,
    compressions: AtomicU64,
}

impl FileCache {
    pub fn new(ttl: Duration, max_bytes: Option<usize>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            ttl,
            max_bytes,
            total_bytes: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            compressions: AtomicU64::new(0),
        }
    }

    /// Fetch the entry for `path`, loading or refreshing it as needed.
    pub fn get(&self, path: &Path) -> ServerResult<Arc<CacheEntry>> {
        let slot = self.slot_for(path);
        let mut guard = slot.entry.lock();

        // Revalidate a hit against the filesystem. A changed mtime or an
        // expired entry is treated as a miss and reloaded in place.
        if let Some(entry) = guard.as_ref() {
            match fs::metadata(path) {
                Ok(meta) => {
                    let modified = meta.modified()?;
                    if modified == entry.modified && Instant::now() < entry.expires_at {
                        let entry = entry.clone();
                        self.touch(&entry);
                        return Ok(entry);
                    }
                    debug!("cache refresh for {}", path.display());
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    self.drop_entry(&mut guard);
                    drop(guard);
                    self.remove_slot(path, &slot);
                    return Err(ServerError::NotFound(path.display().to_string()));
                }
                Err(e) => return Err(ServerError::Io(e)),
            }
        }

        let entry = match self.load(path) {
            Ok(entry) => Arc::new(entry),
            Err(e) => {
                // A failed load leaves no slot behind; misses must not
                // grow the slot map.
                self.drop_entry(&mut guard);
                drop(guard);
                self.remove_slot(path, &slot);
                return Err(e);
            }
        };
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.touch(&entry);

        let old_bytes = guard.as_ref().map(|e| entry_bytes(e)).unwrap_or(0);
        let new_bytes = entry.body.len();
        *guard = Some(entry.clone());
        drop(guard);

        if new_bytes >= old_bytes {
            self.total_bytes.fetch_add(new_bytes - old_bytes, Ordering::Relaxed);
        } else {
            self.total_bytes.fetch_sub(old_bytes - new_bytes, Ordering::Relaxed);
        }
        self.maybe_evict(path);

        Ok(entry)
    }

    /// Gzip variant of an entry's body, computed at most once per entry.
    ///
    /// Returns None when the body is not worth compressing (too small, not a
    /// compressible type, or gzip failed to shrink it).
    pub fn gzip_body(&self, entry: &CacheEntry) -> Option<Bytes> {
        let mut state = entry.gzip.lock();
        match &*state {
            GzipState::Ready(body) => return Some(body.clone()),
            GzipState::Unsuitable => return None,
            GzipState::NotComputed => {}
        }

        if entry.body.len() < GZIP_MIN_SIZE || !is_compressible(entry.content_type) {
            *state = GzipState::Unsuitable;
            return None;
        }

        self.compressions.fetch_add(1, Ordering::Relaxed);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        let compressed = encoder
            .write_all(&entry.body)
            .and_then(|_| encoder.finish());

        match compressed {
            Ok(data) if data.len() < entry.body.len() => {
                let body = Bytes::from(data);
                // The gzip variant pins memory too and counts toward the
                // ceiling.
                self.total_bytes.fetch_add(body.len(), Ordering::Relaxed);
                *state = GzipState::Ready(body.clone());
                Some(body)
            }
            Ok(_) => {
                *state = GzipState::Unsuitable;
                None
            }
            Err(e) => {
                warn!("gzip failed for {}: {}", entry.path.display(), e);
                *state = GzipState::Unsuitable;
                None
            }
        }
    }

    /// Number of filesystem loads performed (test instrumentation).
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Number of gzip passes performed (test instrumentation).
    pub fn compression_count(&self) -> u64 {
        self.compressions.load(Ordering::Relaxed)
    }

    /// Total bytes of cached bodies, gzip variants included.
    pub fn cached_bytes(&self) -> usize {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Number of per-path slots currently tracked (test instrumentation).
    pub fn tracked_paths(&self) -> usize {
        self.slots.read().len()
    }

    fn slot_for(&self, path: &Path) -> Arc<Slot> {
        {
            let slots = self.slots.read();
            if let Some(slot) = slots.get(path) {
                return slot.clone();
            }
        }

        let mut slots = self.slots.write();
        slots
            .entry(path.to_path_buf())
            .or_insert_with(|| {
                Arc::new(Slot {
                    entry: Mutex::new(None),
                })
            })
            .clone()
    }

    fn load(&self, path: &Path) -> ServerResult<CacheEntry> {
        let meta = fs::metadata(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ServerError::NotFound(path.display().to_string()),
            _ => ServerError::Io(e),
        })?;
        let modified = meta.modified()?;

        if meta.is_dir() {
            return Ok(CacheEntry {
                path: path.to_path_buf(),
                kind: EntryKind::Directory,
                size: 0,
                modified,
                etag: make_etag(path, modified, 0),
                content_type: "text/html; charset=utf-8",
                body: Bytes::new(),
                gzip: Mutex::new(GzipState::Unsuitable),
                expires_at: Instant::now() + self.ttl,
                last_used: AtomicU64::new(0),
            });
        }

        if !meta.is_file() {
            return Err(ServerError::NotFound(path.display().to_string()));
        }

        let body = fs::read(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => ServerError::NotFound(path.display().to_string()),
            _ => ServerError::Io(e),
        })?;
        debug!("loaded {} ({} bytes)", path.display(), body.len());

        Ok(CacheEntry {
            path: path.to_path_buf(),
            kind: EntryKind::File,
            size: meta.len(),
            modified,
            etag: make_etag(path, modified, meta.len()),
            content_type: content_type_for(path),
            body: Bytes::from(body),
            gzip: Mutex::new(GzipState::NotComputed),
            expires_at: Instant::now() + self.ttl,
            last_used: AtomicU64::new(0),
        })
    }

    fn touch(&self, entry: &CacheEntry) {
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);
        entry.last_used.store(tick, Ordering::Relaxed);
    }

    fn drop_entry(&self, guard: &mut Option<Arc<CacheEntry>>) {
        if let Some(entry) = guard.take() {
            self.total_bytes.fetch_sub(entry_bytes(&entry), Ordering::Relaxed);
        }
    }

    /// Remove a path's slot from the map, but only if it is still the same
    /// slot; a concurrent reload may have installed a fresh one.
    fn remove_slot(&self, path: &Path, slot: &Arc<Slot>) {
        let mut slots = self.slots.write();
        if slots.get(path).map_or(false, |s| Arc::ptr_eq(s, slot)) {
            slots.remove(path);
        }
    }

    /// Evict least-recently-used entries until the cached bodies fit under
    /// the ceiling. Slots whose mutex is currently held (a load in flight)
    /// are skipped; `keep` is never evicted.
    fn maybe_evict(&self, keep: &Path) {
        let max = match self.max_bytes {
            Some(max) => max,
            None => return,
        };
        if self.total_bytes.load(Ordering::Relaxed) <= max {
            return;
        }

        let slots = self.slots.read();
        let mut candidates: Vec<(PathBuf, u64)> = Vec::new();
        for (path, slot) in slots.iter() {
            if path == keep {
                continue;
            }
            let guard = slot.entry.try_lock();
            if let Some(guard) = guard {
                if let Some(entry) = guard.as_ref() {
                    candidates.push((path.clone(), entry.last_used.load(Ordering::Relaxed)));
                }
            }
        }
        drop(slots);

        candidates.sort_by_key(|(_, used)| *used);

        for (path, _) in candidates {
            if self.total_bytes.load(Ordering::Relaxed) <= max {
                break;
            }
            let slot = {
                let slots = self.slots.read();
                match slots.get(&path) {
                    Some(slot) => slot.clone(),
                    None => continue,
                }
            };
            let guard = slot.entry.try_lock();
            if let Some(mut guard) = guard {
                debug!("evicting {}", path.display());
                self.drop_entry(&mut guard);
                drop(guard);
                self.remove_slot(&path, &slot);
            }
        }
    }
}

/// Bytes an entry pins in memory, including a computed gzip variant.
fn entry_bytes(entry: &CacheEntry) -> usize {
    let gzip = match &*entry.gzip.lock() {
        GzipState::Ready(body) => body.len(),
        _ => 0,
    };
    entry.body.len() + gzip
}

/// Build a file entry whose recorded size disagrees with its loaded body,
/// as happens when the file shrinks between the stat and the read.
#[cfg(test)]
pub(crate) fn entry_with_sizes(path: &Path, body: &[u8], reported_size: u64) -> CacheEntry {
    let modified = SystemTime::UNIX_EPOCH;
    CacheEntry {
        path: path.to_path_buf(),
        kind: EntryKind::File,
        size: reported_size,
        modified,
        etag: make_etag(path, modified, reported_size),
        content_type: content_type_for(path),
        body: Bytes::copy_from_slice(body),
        gzip: Mutex::new(GzipState::Unsuitable),
        expires_at: Instant::now() + Duration::from_secs(60),
        last_used: AtomicU64::new(0),
    }
}

/// Deterministic etag from the canonical path, mtime and size.
pub fn make_etag(path: &Path, modified: SystemTime, size: u64) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    path.hash(&mut hasher);
    let mtime = modified
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("\"{:x}-{:x}-{:x}\"", hasher.finish(), mtime, size)
}

/// Content type for a file based on its extension
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" => "text/javascript",
        "txt" => "text/plain; charset=utf-8",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "tar" => "application/x-tar",
        "gz" => "application/gzip",
        "wasm" => "application/wasm",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
}

/// Whether a content type benefits from gzip.
fn is_compressible(content_type: &str) -> bool {
    content_type.starts_with("text/")
        || content_type.starts_with("application/json")
        || content_type.starts_with("application/xml")
        || content_type == "application/wasm"
        || content_type == "image/svg+xml"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_etag_deterministic() {
        let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let a = make_etag(Path::new("/srv/www/a.txt"), mtime, 42);
        let b = make_etag(Path::new("/srv/www/a.txt"), mtime, 42);
        assert_eq!(a, b);

        let c = make_etag(Path::new("/srv/www/a.txt"), mtime, 43);
        assert_ne!(a, c);

        let d = make_etag(Path::new("/srv/www/b.txt"), mtime, 42);
        assert_ne!(a, d);
    }

    #[test]
    fn test_content_type_lookup() {
        assert_eq!(
            content_type_for(Path::new("x.html")),
            "text/html; charset=utf-8"
        );
        assert_eq!(content_type_for(Path::new("x.css")), "text/css");
        assert_eq!(content_type_for(Path::new("x.PNG")), "image/png");
        assert_eq!(
            content_type_for(Path::new("noext")),
            "application/octet-stream"
        );
    }

    #[test]
    fn test_compressible_types() {
        assert!(is_compressible("text/html; charset=utf-8"));
        assert!(is_compressible("application/json"));
        assert!(is_compressible("image/svg+xml"));
        assert!(!is_compressible("image/png"));
        assert!(!is_compressible("application/gzip"));
    }
}
