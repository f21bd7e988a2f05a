//! Archive walker.
//!
//! Two variants share one output, [`ArchiveContent`]:
//! - container: entries of a ZIP/JAR, read through the `zip` crate
//! - directory: regular files of an already-decompiled tree, via `walkdir`
//!
//! Entry contents are lossily decoded and joined with `\n` in iteration order
//! into one aggregate blob. Pattern, structure, and entropy
//! analysis run over that aggregate rather than per entry, so a signature
//! split across two entries is not seen.

use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use crate::entropy::shannon_entropy;
use crate::error::{Result, ScanError};
use crate::patterns::is_mod_metadata_entry;

/// Source extensions counted as code units in decompiled trees.
pub const SOURCE_EXTENSIONS: &[&str] = &["java", "kt", "kts", "scala", "groovy"];

/// Bounds on how much of an archive is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkLimits {
    /// Bytes read from a single entry before it is treated as undecodable.
    pub max_entry_bytes: u64,
    /// Entries examined before the walk stops.
    pub max_entries: usize,
    /// Bytes of decoded content kept across the whole archive.
    pub max_total_bytes: u64,
}

impl Default for WalkLimits {
    fn default() -> Self {
        Self {
            max_entry_bytes: 16 * 1024 * 1024,
            max_entries: 65_536,
            max_total_bytes: 256 * 1024 * 1024,
        }
    }
}

/// Which kind of entry counts as a code unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodeUnit {
    ClassFile,
    SourceFile,
}

impl CodeUnit {
    fn matches(self, name: &str) -> bool {
        let lower = name.to_lowercase();
        match self {
            CodeUnit::ClassFile => lower.ends_with(".class"),
            CodeUnit::SourceFile => Path::new(&lower)
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext)),
        }
    }
}

/// Which walker produced an [`ArchiveContent`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContentSource {
    #[default]
    Container,
    /// A source tree, possibly decompiled, whose resources may be missing.
    Directory,
}

/// One member of a container or tree, alive only while it is analyzed.
#[derive(Debug)]
pub struct ArchiveEntry {
    pub name: String,
    pub size: u64,
    pub text: String,
}

/// Aggregate of one walk: structural counts plus the decoded content blob.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveContent {
    pub source: ContentSource,
    pub num_files_total: usize,
    pub num_class_files: usize,
    pub has_dat_file: bool,
    pub has_metadata_entry: bool,
    pub entries_read: usize,
    pub entries_skipped: usize,
    /// Sum of per-entry entropies over `entries_read`.
    pub(crate) entropy_sum: f64,
    /// Decoded contents, newline separated, original case.
    pub aggregate: String,
}

impl ArchiveContent {
    /// Code units over all files, 0 for an empty walk.
    pub fn class_to_total_ratio(&self) -> f64 {
        if self.num_files_total == 0 {
            return 0.0;
        }
        self.num_class_files as f64 / self.num_files_total as f64
    }

    /// Mean entropy of the entries that were read, 0 when none were.
    pub fn average_entropy(&self) -> f64 {
        if self.entries_read == 0 {
            return 0.0;
        }
        self.entropy_sum / self.entries_read as f64
    }

    fn count_entry(&mut self, name: &str, unit: CodeUnit) {
        self.num_files_total += 1;
        if unit.matches(name) {
            self.num_class_files += 1;
        }
        if name.to_lowercase().ends_with(".dat") {
            self.has_dat_file = true;
        }
        if is_mod_metadata_entry(name) {
            self.has_metadata_entry = true;
        }
    }

    fn absorb(&mut self, entry: ArchiveEntry) {
        trace!(entry = %entry.name, size = entry.size, "analyzed entry");
        self.entropy_sum += shannon_entropy(&entry.text.to_lowercase());
        self.entries_read += 1;
        if !self.aggregate.is_empty() {
            self.aggregate.push('\n');
        }
        self.aggregate.push_str(&entry.text);
    }

    fn skip(&mut self, err: &ScanError) {
        debug!("{err}");
        self.entries_skipped += 1;
    }
}

/// Shared per-walk state: limits, cancellation, and the byte budget.
struct Walk<'a> {
    limits: &'a WalkLimits,
    cancel: Option<&'a AtomicBool>,
    bytes_kept: u64,
}

impl<'a> Walk<'a> {
    fn new(limits: &'a WalkLimits, cancel: Option<&'a AtomicBool>) -> Self {
        Self {
            limits,
            cancel,
            bytes_kept: 0,
        }
    }

    fn check_cancel(&self) -> Result<()> {
        match self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(ScanError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Read at most `max_entry_bytes` from `reader` and decode it lossily.
    fn read_entry<R: Read>(&mut self, name: &str, size: u64, reader: R) -> Result<ArchiveEntry> {
        if size > self.limits.max_entry_bytes {
            return Err(ScanError::decode(
                name,
                format!("{size} bytes exceeds limit of {}", self.limits.max_entry_bytes),
            ));
        }
        if self.bytes_kept.saturating_add(size) > self.limits.max_total_bytes {
            return Err(ScanError::decode(name, "archive content budget exhausted"));
        }

        // Declared sizes can lie; bound the actual read as well.
        let mut buf = Vec::new();
        reader
            .take(self.limits.max_entry_bytes.saturating_add(1))
            .read_to_end(&mut buf)
            .map_err(|e| ScanError::decode(name, e.to_string()))?;
        if buf.len() as u64 > self.limits.max_entry_bytes {
            return Err(ScanError::decode(
                name,
                format!("entry exceeds limit of {} bytes", self.limits.max_entry_bytes),
            ));
        }
        self.bytes_kept += buf.len() as u64;

        Ok(ArchiveEntry {
            name: name.to_string(),
            size: buf.len() as u64,
            text: String::from_utf8_lossy(&buf).into_owned(),
        })
    }
}

/// Walk a ZIP/JAR on disk.
///
/// Returns [`ScanError::Format`] when the file is not a readable container;
/// callers degrade that to an all-zero vector.
pub fn walk_container(
    path: &Path,
    limits: &WalkLimits,
    cancel: Option<&AtomicBool>,
) -> Result<ArchiveContent> {
    let file = File::open(path)?;
    walk_zip(file, path, limits, cancel)
}

/// Walk a ZIP/JAR held in memory.
pub fn walk_container_bytes(
    bytes: &[u8],
    limits: &WalkLimits,
    cancel: Option<&AtomicBool>,
) -> Result<ArchiveContent> {
    walk_zip(Cursor::new(bytes), Path::new("<memory>"), limits, cancel)
}

fn walk_zip<R: Read + Seek>(
    reader: R,
    path: &Path,
    limits: &WalkLimits,
    cancel: Option<&AtomicBool>,
) -> Result<ArchiveContent> {
    let mut archive =
        zip::ZipArchive::new(reader).map_err(|e| ScanError::format(path, e.to_string()))?;
    debug!("Opening archive: {:?} ({} entries)", path, archive.len());

    let mut walk = Walk::new(limits, cancel);
    let mut content = ArchiveContent::default();

    for i in 0..archive.len() {
        walk.check_cancel()?;
        if i >= limits.max_entries {
            warn!(
                "{}: stopping after {} entries of {}",
                path.display(),
                limits.max_entries,
                archive.len()
            );
            break;
        }

        // The central directory names the entry even when its data cannot be
        // opened, so it can still be counted structurally.
        let name = archive
            .name_for_index(i)
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{i}"));
        let entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(e) => {
                if !name.ends_with('/') {
                    content.count_entry(&name, CodeUnit::ClassFile);
                    content.skip(&ScanError::decode(name, e.to_string()));
                }
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }

        let size = entry.size();
        content.count_entry(&name, CodeUnit::ClassFile);

        match walk.read_entry(&name, size, entry) {
            Ok(decoded) => content.absorb(decoded),
            Err(e) => content.skip(&e),
        }
    }

    debug!(
        "{}: {} files, {} class files, {} read, {} skipped",
        path.display(),
        content.num_files_total,
        content.num_class_files,
        content.entries_read,
        content.entries_skipped
    );
    Ok(content)
}

/// Walk a directory tree of decompiled output. Symlinks are not followed.
pub fn walk_directory(
    root: &Path,
    limits: &WalkLimits,
    cancel: Option<&AtomicBool>,
) -> Result<ArchiveContent> {
    if !root.is_dir() {
        return Err(ScanError::format(root, "not a directory"));
    }

    let mut walk = Walk::new(limits, cancel);
    let mut content = ArchiveContent {
        source: ContentSource::Directory,
        ..ArchiveContent::default()
    };

    let files = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file());

    for (i, dir_entry) in files.enumerate() {
        walk.check_cancel()?;
        if i >= limits.max_entries {
            warn!(
                "{}: stopping after {} files",
                root.display(),
                limits.max_entries
            );
            break;
        }

        let rel = dir_entry.path().strip_prefix(root).unwrap_or(dir_entry.path());
        let name = rel.to_string_lossy().replace('\\', "/");
        content.count_entry(&name, CodeUnit::SourceFile);

        let size = dir_entry.metadata().map(|m| m.len()).unwrap_or(0);
        let read = File::open(dir_entry.path())
            .map_err(|e| ScanError::decode(name.as_str(), e.to_string()))
            .and_then(|file| walk.read_entry(&name, size, file));
        match read {
            Ok(decoded) => content.absorb(decoded),
            Err(e) => content.skip(&e),
        }
    }

    debug!(
        "{}: {} files, {} source files, {} read",
        root.display(),
        content.num_files_total,
        content.num_class_files,
        content.entries_read
    );
    Ok(content)
}
