use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub const DEFAULT_CACHE_PATH: &str = "cache/code_ids.json";

/// network id -> (content hash -> code id)
pub type CodeIds = BTreeMap<String, BTreeMap<String, u64>>;

/// Hex encoded SHA-256 of the raw bytecode.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Code ids assigned to previously uploaded bytecode, per network.
///
/// The whole document is read once and rewritten after every `store`. IO problems are
/// logged and otherwise ignored: a broken cache only costs a re-upload.
#[derive(Debug)]
pub struct CodeCache {
    path: Option<PathBuf>,
    entries: Mutex<CodeIds>,
}

impl CodeCache {
    pub fn load(path: &Path) -> CodeCache {
        let entries = match fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<CodeIds>(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        "code id cache {} is malformed, starting empty: {}",
                        path.display(),
                        e
                    );
                    CodeIds::new()
                }
            },
            Err(e) => {
                warn!(
                    "unable to read code id cache {}, starting empty: {}",
                    path.display(),
                    e
                );
                CodeIds::new()
            }
        };
        CodeCache {
            path: Some(path.to_path_buf()),
            entries: Mutex::new(entries),
        }
    }

    pub fn in_memory() -> CodeCache {
        CodeCache {
            path: None,
            entries: Mutex::new(CodeIds::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn entries(&self) -> MutexGuard<'_, CodeIds> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn lookup(&self, network_id: &str, content_hash: &str) -> Option<u64> {
        self.entries()
            .get(network_id)
            .and_then(|codes| codes.get(content_hash))
            .copied()
    }

    /// Records a code id, replacing any previous entry for the same bytecode.
    pub fn store(&self, network_id: &str, content_hash: &str, code_id: u64) {
        let mut entries = self.entries();
        entries
            .entry(network_id.to_string())
            .or_default()
            .insert(content_hash.to_string(), code_id);

        if let Some(ref path) = self.path {
            match write_atomically(path, &entries) {
                Ok(()) => debug!("code id cache written to {}", path.display()),
                Err(e) => warn!(
                    "unable to write code id cache {}: {}",
                    path.display(),
                    e
                ),
            }
        }
    }

    pub fn snapshot(&self) -> CodeIds {
        self.entries().clone()
    }
}

fn write_atomically(path: &Path, entries: &CodeIds) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut file = tempfile::NamedTempFile::new_in(&dir)?;
    let content = serde_json::to_vec_pretty(entries)?;
    file.write_all(&content)?;
    file.flush()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_hashes_deterministically() {
        let hash = content_hash(b"wasm");
        assert_eq!(hash, content_hash(b"wasm"));
        assert_ne!(hash, content_hash(b"wasm2"));
        assert_eq!(hash.len(), 64);
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn it_keeps_networks_apart() {
        let cache = CodeCache::in_memory();
        cache.store("bombay-12", "abc", 1);
        assert_eq!(cache.lookup("bombay-12", "abc"), Some(1));
        assert_eq!(cache.lookup("columbus-5", "abc"), None);
    }

    #[test]
    fn it_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("code_ids.json");

        let cache = CodeCache::load(&path);
        assert_eq!(cache.lookup("bombay-12", "abc"), None);
        cache.store("bombay-12", "abc", 5);
        cache.store("bombay-12", "abc", 6);
        cache.store("columbus-5", "def", 9);

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["bombay-12"]["abc"], 6);
        assert_eq!(raw["columbus-5"]["def"], 9);

        let reloaded = CodeCache::load(&path);
        assert_eq!(reloaded.lookup("bombay-12", "abc"), Some(6));
        assert_eq!(reloaded.lookup("columbus-5", "def"), Some(9));
    }

    #[test]
    fn it_treats_a_corrupt_document_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("code_ids.json");
        fs::write(&path, "{ not json").unwrap();

        let cache = CodeCache::load(&path);
        assert!(cache.snapshot().is_empty());
        cache.store("bombay-12", "abc", 2);
        assert_eq!(CodeCache::load(&path).lookup("bombay-12", "abc"), Some(2));
    }

    #[test]
    fn it_survives_an_unwritable_location() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let cache = CodeCache::load(&blocker.join("code_ids.json"));

        cache.store("bombay-12", "abc", 3);
        assert_eq!(cache.lookup("bombay-12", "abc"), Some(3));
    }
}
