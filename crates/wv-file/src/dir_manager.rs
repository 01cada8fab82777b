//! The directory manager: block file allocation, sharing, and reload
//!
//! One directory manager is shared by every sequence of a project. It owns
//! the pool of block files in the project directory, hands out fresh
//! paths, and reconstructs block files from their persisted XML elements.
//! Sharing is by `Arc` refcount; `copy_block_file` only materializes a
//! real on-disk copy when the source is locked against relocation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use wv_core::SampleFormat;

use crate::alias::PcmAliasBlockFile;
use crate::block::BlockFile;
use crate::decoder::DecoderKind;
use crate::error::{FileError, FileResult};
use crate::od::{OdDecodeBlockFile, OdPcmAliasBlockFile};
use crate::silent::SilentBlockFile;
use crate::simple::SimpleBlockFile;

/// Allocation and persistence of block files for one project.
///
/// Implementations must be internally thread-safe; sequences on several
/// threads share one manager.
pub trait DirManager: Send + Sync {
    /// Write `len` samples to disk and return a fresh simple block
    fn new_simple_block_file(
        &self,
        data: &[u8],
        len: usize,
        format: SampleFormat,
    ) -> FileResult<Arc<dyn BlockFile>>;

    /// A window over an external PCM file
    fn new_alias_block_file(
        &self,
        path: &Path,
        start: u64,
        len: usize,
        channel: u16,
    ) -> FileResult<Arc<dyn BlockFile>>;

    /// Same, but with the summary computed on demand
    fn new_od_alias_block_file(
        &self,
        path: &Path,
        start: u64,
        len: usize,
        channel: u16,
    ) -> FileResult<Arc<dyn BlockFile>>;

    /// A window over a compressed source, decoded on demand
    fn new_od_decode_block_file(
        &self,
        path: &Path,
        start: u64,
        len: usize,
        channel: u16,
        format: SampleFormat,
        kind: DecoderKind,
    ) -> FileResult<Arc<dyn BlockFile>>;

    /// Share `file` by refcount, or materialize a fresh on-disk copy when
    /// the source is locked
    fn copy_block_file(&self, file: &Arc<dyn BlockFile>) -> FileResult<Arc<dyn BlockFile>>;

    /// Rebuild a block file from its persisted element inside `<waveblock>`
    fn load_block_file(
        &self,
        tag: &str,
        attrs: &[(String, String)],
        format: SampleFormat,
    ) -> FileResult<Arc<dyn BlockFile>>;

    fn project_dir(&self) -> &Path;
}

// ═══════════════════════════════════════════════════════════════════════════
// DISK IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════

/// The production directory manager: block files in one project directory
pub struct DiskDirManager {
    dir: PathBuf,
    next_block: AtomicU64,
}

impl DiskDirManager {
    pub fn new(dir: impl Into<PathBuf>) -> FileResult<Arc<Self>> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Arc::new(Self {
            dir,
            next_block: AtomicU64::new(0),
        }))
    }

    /// Next unused block file path
    fn alloc_path(&self) -> PathBuf {
        loop {
            let id = self.next_block.fetch_add(1, Ordering::Relaxed);
            let path = self.dir.join(format!("e{id:07x}.wvb"));
            if !path.exists() {
                return path;
            }
        }
    }
}

fn attr<'a>(attrs: &'a [(String, String)], name: &str) -> FileResult<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
        .ok_or_else(|| FileError::InvalidFormat(format!("missing attribute {name}")))
}

fn attr_u64(attrs: &[(String, String)], name: &str) -> FileResult<u64> {
    attr(attrs, name)?
        .parse::<u64>()
        .map_err(|_| FileError::InvalidFormat(format!("bad attribute {name}")))
}

impl DirManager for DiskDirManager {
    fn new_simple_block_file(
        &self,
        data: &[u8],
        len: usize,
        format: SampleFormat,
    ) -> FileResult<Arc<dyn BlockFile>> {
        let file = SimpleBlockFile::new(self.alloc_path(), data, len, format)?;
        Ok(file)
    }

    fn new_alias_block_file(
        &self,
        path: &Path,
        start: u64,
        len: usize,
        channel: u16,
    ) -> FileResult<Arc<dyn BlockFile>> {
        let file = PcmAliasBlockFile::new(
            self.alloc_path(),
            path.to_path_buf(),
            start,
            len,
            channel,
        )?;
        Ok(file)
    }

    fn new_od_alias_block_file(
        &self,
        path: &Path,
        start: u64,
        len: usize,
        channel: u16,
    ) -> FileResult<Arc<dyn BlockFile>> {
        Ok(OdPcmAliasBlockFile::new(
            self.alloc_path(),
            path.to_path_buf(),
            start,
            len,
            channel,
        ))
    }

    fn new_od_decode_block_file(
        &self,
        path: &Path,
        start: u64,
        len: usize,
        channel: u16,
        format: SampleFormat,
        kind: DecoderKind,
    ) -> FileResult<Arc<dyn BlockFile>> {
        Ok(OdDecodeBlockFile::new(
            self.alloc_path(),
            path.to_path_buf(),
            start,
            len,
            channel,
            format,
            kind,
        ))
    }

    fn copy_block_file(&self, file: &Arc<dyn BlockFile>) -> FileResult<Arc<dyn BlockFile>> {
        // Silent blocks have no disk identity to contend over
        if file.file_name().is_none() || !file.is_locked() {
            return Ok(Arc::clone(file));
        }
        file.clone_to(&self.alloc_path())
    }

    fn load_block_file(
        &self,
        tag: &str,
        attrs: &[(String, String)],
        format: SampleFormat,
    ) -> FileResult<Arc<dyn BlockFile>> {
        match tag {
            "simpleblockfile" => {
                let filename = attr(attrs, "filename")?;
                let len = attr_u64(attrs, "len").ok().map(|l| l as usize);
                let file = SimpleBlockFile::open(self.dir.join(filename), len)?;
                Ok(file)
            }
            "silentblockfile" => {
                let len = attr_u64(attrs, "len")? as usize;
                Ok(SilentBlockFile::new(len, format))
            }
            "pcmaliasblockfile" => {
                let file = PcmAliasBlockFile::open(
                    self.dir.join(attr(attrs, "summaryfile")?),
                    PathBuf::from(attr(attrs, "aliasfile")?),
                    attr_u64(attrs, "aliasstart")?,
                    attr_u64(attrs, "aliaslen")? as usize,
                    attr_u64(attrs, "aliaschannel")? as u16,
                )?;
                Ok(file)
            }
            "odpcmaliasblockfile" => Ok(OdPcmAliasBlockFile::open(
                self.dir.join(attr(attrs, "summaryfile")?),
                PathBuf::from(attr(attrs, "aliasfile")?),
                attr_u64(attrs, "aliasstart")?,
                attr_u64(attrs, "aliaslen")? as usize,
                attr_u64(attrs, "aliaschannel")? as u16,
            )),
            "oddecodeblockfile" => {
                let kind = DecoderKind::from_name(attr(attrs, "decodetype")?).ok_or_else(|| {
                    FileError::InvalidFormat("unknown decodetype".to_string())
                })?;
                Ok(OdDecodeBlockFile::open(
                    self.dir.join(attr(attrs, "summaryfile")?),
                    PathBuf::from(attr(attrs, "aliasfile")?),
                    attr_u64(attrs, "aliasstart")?,
                    attr_u64(attrs, "aliaslen")? as usize,
                    attr_u64(attrs, "aliaschannel")? as u16,
                    format,
                    kind,
                ))
            }
            other => Err(FileError::InvalidFormat(format!(
                "unknown block file tag <{other}>"
            ))),
        }
    }

    fn project_dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wv_core::f32_to_samples;

    fn manager() -> (tempfile::TempDir, Arc<DiskDirManager>) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = DiskDirManager::new(dir.path().join("project")).unwrap();
        (dir, mgr)
    }

    fn simple_block(mgr: &DiskDirManager, samples: &[f32]) -> Arc<dyn BlockFile> {
        let mut data = vec![0u8; samples.len() * 4];
        f32_to_samples(samples, SampleFormat::Float, &mut data);
        mgr.new_simple_block_file(&data, samples.len(), SampleFormat::Float)
            .unwrap()
    }

    #[test]
    fn test_paths_are_unique() {
        let (_t, mgr) = manager();
        let a = simple_block(&mgr, &[0.1; 8]);
        let b = simple_block(&mgr, &[0.2; 8]);
        assert_ne!(a.file_name(), b.file_name());
    }

    #[test]
    fn test_copy_bumps_refcount() {
        let (_t, mgr) = manager();
        let a = simple_block(&mgr, &[0.5; 16]);
        let b = mgr.copy_block_file(&a).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_copy_of_locked_block_is_deep() {
        let (_t, mgr) = manager();
        let a = simple_block(&mgr, &[0.5; 16]);
        a.lock();
        let b = mgr.copy_block_file(&a).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_ne!(a.file_name(), b.file_name());
        assert_eq!(b.len(), 16);
    }

    #[test]
    fn test_load_simple_roundtrip() {
        let (_t, mgr) = manager();
        let a = simple_block(&mgr, &[0.25; 32]);
        let el = a.xml_element();
        let attrs: Vec<(String, String)> = el
            .attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();

        let b = mgr
            .load_block_file(el.name, &attrs, SampleFormat::Float)
            .unwrap();
        assert_eq!(b.len(), 32);
        assert_eq!(
            b.min_max_rms(true).unwrap(),
            a.min_max_rms(true).unwrap()
        );
    }

    #[test]
    fn test_load_silent_roundtrip() {
        let (_t, mgr) = manager();
        let attrs = vec![("len".to_string(), "64".to_string())];
        let b = mgr
            .load_block_file("silentblockfile", &attrs, SampleFormat::Int16)
            .unwrap();
        assert_eq!(b.len(), 64);
        assert!(b.file_name().is_none());
    }

    #[test]
    fn test_load_unknown_tag_fails() {
        let (_t, mgr) = manager();
        assert!(mgr
            .load_block_file("mysteryblock", &[], SampleFormat::Float)
            .is_err());
    }
}
