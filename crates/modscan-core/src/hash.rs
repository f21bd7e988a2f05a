//! Content hashing. Results are keyed by SHA-256 of the input, never by
//! file name, so renamed uploads map to the same record.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// SHA-256 of a file, streamed in 64 KiB chunks.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match file.read(&mut buf)? {
            0 => break,
            n => hasher.update(&buf[..n]),
        }
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 over a directory tree: relative path and content of every regular
/// file, in file-name order.
pub fn sha256_tree(root: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(sha256_file(entry.path())?.as_bytes());
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::build_zip;

    #[test]
    fn streamed_jar_hash_matches_in_memory_digest() {
        // Larger than one read chunk so the loop runs more than once.
        let filler = vec![b'x'; 200 * 1024];
        let jar = build_zip(&[
            ("fabric.mod.json", &br#"{"id": "example"}"#[..]),
            ("assets/blob.bin", filler.as_slice()),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("example.jar");
        std::fs::write(&path, &jar).unwrap();

        let streamed = sha256_file(&path).unwrap();
        assert_eq!(streamed, format!("{:x}", Sha256::digest(&jar)));
        assert_eq!(streamed.len(), 64);
    }

    #[test]
    fn renamed_jar_keeps_its_hash() {
        let jar = build_zip(&[("a/A.class", b"plain")]);
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("mod-1.0.jar");
        let renamed = dir.path().join("free-vbucks.jar");
        std::fs::write(&original, &jar).unwrap();
        std::fs::write(&renamed, &jar).unwrap();
        assert_eq!(sha256_file(&original).unwrap(), sha256_file(&renamed).unwrap());
    }

    #[test]
    fn unreadable_target_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sha256_file(&dir.path().join("gone.jar")).is_err());
    }

    #[test]
    fn tree_hash_depends_on_names_and_content() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        std::fs::write(a.path().join("A.java"), "class A {}").unwrap();
        std::fs::write(b.path().join("A.java"), "class A {}").unwrap();
        assert_eq!(sha256_tree(a.path()).unwrap(), sha256_tree(b.path()).unwrap());

        std::fs::write(b.path().join("B.java"), "class B {}").unwrap();
        assert_ne!(sha256_tree(a.path()).unwrap(), sha256_tree(b.path()).unwrap());
    }
}
