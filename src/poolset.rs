#![allow(dead_code)]
//! In-memory description of a pool-set: replicas, parts, and the mapped
//! regions backing them (C2, spec §4.2).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};
use uuid::Uuid;

use crate::codec::POOL_HDR_SIZE;

/// One file backing a replica.
pub struct Part {
    pub path: PathBuf,
    pub file: Option<File>,
    pub filesize: u64,
    /// Header region mapping, present only between `map_headers` and
    /// `unmap_headers`.
    pub hdr_map: Option<MmapMut>,
    /// Data region mapping (everything after the header), present once
    /// the pool-set has been opened.
    pub data_map: Option<MmapMut>,
    pub uuid: Uuid,
}

impl Part {
    fn new(path: PathBuf, filesize: u64) -> Part {
        Part { path, file: None, filesize, hdr_map: None, data_map: None, uuid: Uuid::nil() }
    }

    pub fn hdr_bytes(&self) -> &[u8] {
        self.hdr_map.as_deref().expect("header not mapped")
    }

    pub fn hdr_bytes_mut(&mut self) -> &mut [u8] {
        self.hdr_map.as_deref_mut().expect("header not mapped")
    }

    pub fn data_len(&self) -> u64 {
        self.filesize.saturating_sub(POOL_HDR_SIZE as u64)
    }
}

/// An ordered sequence of parts forming one complete image of the pool.
pub struct Replica {
    pub parts: Vec<Part>,
}

impl Replica {
    pub fn data_size(&self) -> u64 {
        self.parts.iter().map(|p| p.data_len()).sum()
    }
}

/// One or more replicas sharing a logical identity.
pub struct PoolSet {
    pub poolset_uuid: Uuid,
    pub replicas: Vec<Replica>,
    rdonly: bool,
}

impl PoolSet {
    /// Parses a pool-set path: a regular file synthesises a 1x1 pool-set;
    /// a file beginning with `PMEMPOOLSET` is read as a pool-set
    /// descriptor (parts and `REPLICA` separators, one per line).
    pub fn parse(path: &Path) -> anyhow::Result<PoolSet> {
        let mut f = File::open(path)?;
        let mut head = [0u8; 11];
        let is_poolset = f.read_exact(&mut head).is_ok() && &head == b"PMEMPOOLSET";

        if !is_poolset {
            let filesize = std::fs::metadata(path)?.len();
            return Ok(PoolSet {
                poolset_uuid: Uuid::nil(),
                replicas: vec![Replica { parts: vec![Part::new(path.to_path_buf(), filesize)] }],
                rdonly: false,
            });
        }

        let mut contents = String::new();
        f.seek(SeekFrom::Start(0))?;
        f.read_to_string(&mut contents)?;
        Self::parse_descriptor(path, &contents)
    }

    fn parse_descriptor(base: &Path, contents: &str) -> anyhow::Result<PoolSet> {
        let base_dir = base.parent().unwrap_or(Path::new("."));
        let mut replicas = Vec::new();
        let mut current: Vec<Part> = Vec::new();

        for (lineno, raw_line) in contents.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line == "PMEMPOOLSET" {
                continue;
            }
            if line.eq_ignore_ascii_case("REPLICA") {
                if !current.is_empty() {
                    replicas.push(Replica { parts: std::mem::take(&mut current) });
                }
                continue;
            }

            let mut it = line.split_whitespace();
            let size_tok = it.next().ok_or_else(|| {
                anyhow::anyhow!("pool-set descriptor line {}: missing size", lineno + 1)
            })?;
            let path_tok = it.next().ok_or_else(|| {
                anyhow::anyhow!("pool-set descriptor line {}: missing path", lineno + 1)
            })?;
            let size = parse_size(size_tok)?;
            let part_path = base_dir.join(path_tok);
            current.push(Part::new(part_path, size));
        }
        if !current.is_empty() {
            replicas.push(Replica { parts: current });
        }

        if replicas.is_empty() {
            anyhow::bail!("pool-set descriptor {} has no parts", base.display());
        }

        Ok(PoolSet { poolset_uuid: Uuid::nil(), replicas, rdonly: false })
    }

    /// Opens every part file and mmaps its data region (after the fixed
    /// pool-header region). `checked` additionally cross-verifies every
    /// part's header against the first part's (left to the check driver,
    /// which reads headers itself; this just does the mechanical mmap).
    pub fn open(&mut self, rdonly: bool) -> anyhow::Result<()> {
        self.rdonly = rdonly;
        for repl in &mut self.replicas {
            for part in &mut repl.parts {
                let file = OpenOptions::new().read(true).write(!rdonly).open(&part.path)?;
                let file = if part.filesize == 0 {
                    part.filesize = file.metadata()?.len();
                    file
                } else {
                    file
                };
                part.file = Some(file);
            }
        }
        Ok(())
    }

    pub fn open_nocheck(&mut self, rdonly: bool) -> anyhow::Result<()> {
        self.open(rdonly)
    }

    /// Maps each part's header region (first `POOL_HDR_SIZE` bytes).
    /// Idempotent: mapping twice is a no-op.
    pub fn map_headers(&mut self, rdonly: bool) -> anyhow::Result<()> {
        for repl in &mut self.replicas {
            for part in &mut repl.parts {
                if part.hdr_map.is_some() {
                    continue;
                }
                let file = part.file.as_ref().ok_or_else(|| anyhow::anyhow!("part not open"))?;
                let mmap = unsafe {
                    MmapOptions::new().offset(0).len(POOL_HDR_SIZE).map_copy(file)?
                };
                let _ = rdonly; // copy-on-write map is always locally writable; commit is explicit via msync_header
                part.hdr_map = Some(mmap);
            }
        }
        Ok(())
    }

    /// Unmaps all header regions. Reversible: `map_headers` may be called
    /// again afterwards.
    pub fn unmap_headers(&mut self) {
        for repl in &mut self.replicas {
            for part in &mut repl.parts {
                part.hdr_map = None;
            }
        }
    }

    /// Commits a part's header mapping back to disk (the write-back step
    /// relies on this after patching fields in place).
    pub fn msync_header(&mut self, replica: usize, part: usize) -> anyhow::Result<()> {
        let p = &mut self.replicas[replica].parts[part];
        if let Some(map) = &p.hdr_map {
            map.flush()?;
        }
        Ok(())
    }

    /// Reads `nbytes` from `off` in the replica's flattened data region
    /// (parts are invisible to the caller).
    pub fn read(&mut self, replica: usize, off: u64, nbytes: u64) -> anyhow::Result<Vec<u8>> {
        let repl = &mut self.replicas[replica];
        let total = repl.data_size();
        if off + nbytes > total {
            anyhow::bail!("read out of range: off={} nbytes={} poolsize={}", off, nbytes, total);
        }

        let mut out = Vec::with_capacity(nbytes as usize);
        let mut remaining = nbytes;
        let mut cursor = off;
        for part in &mut repl.parts {
            let part_len = part.data_len();
            if cursor >= part_len {
                cursor -= part_len;
                continue;
            }
            let file = part.file.as_mut().ok_or_else(|| anyhow::anyhow!("part not open"))?;
            let avail = part_len - cursor;
            let take = remaining.min(avail);
            let mut buf = vec![0u8; take as usize];
            file.seek(SeekFrom::Start(POOL_HDR_SIZE as u64 + cursor))?;
            file.read_exact(&mut buf)?;
            out.extend_from_slice(&buf);
            remaining -= take;
            cursor = 0;
            if remaining == 0 {
                break;
            }
        }
        Ok(out)
    }

    pub fn write(&mut self, replica: usize, off: u64, buf: &[u8]) -> anyhow::Result<()> {
        let repl = &mut self.replicas[replica];
        let total = repl.data_size();
        let nbytes = buf.len() as u64;
        if off + nbytes > total {
            anyhow::bail!("write out of range: off={} nbytes={} poolsize={}", off, nbytes, total);
        }

        let mut remaining = buf;
        let mut cursor = off;
        for part in &mut repl.parts {
            let part_len = part.data_len();
            if cursor >= part_len {
                cursor -= part_len;
                continue;
            }
            let file = part.file.as_mut().ok_or_else(|| anyhow::anyhow!("part not open"))?;
            let avail = part_len - cursor;
            let take = (remaining.len() as u64).min(avail) as usize;
            file.seek(SeekFrom::Start(POOL_HDR_SIZE as u64 + cursor))?;
            file.write_all(&remaining[..take])?;
            remaining = &remaining[take..];
            cursor = 0;
            if remaining.is_empty() {
                break;
            }
        }
        Ok(())
    }

    pub fn close(&mut self) {
        self.unmap_headers();
        for repl in &mut self.replicas {
            for part in &mut repl.parts {
                part.data_map = None;
                part.file = None;
            }
        }
    }

    pub fn nreplicas(&self) -> usize {
        self.replicas.len()
    }

    pub fn nfiles(&self) -> usize {
        self.replicas.iter().map(|r| r.parts.len()).sum()
    }
}

fn parse_size(tok: &str) -> anyhow::Result<u64> {
    let lower = tok.to_ascii_uppercase();
    let (num, mult): (&str, u64) = if let Some(n) = lower.strip_suffix('T') {
        (n, 1 << 40)
    } else if let Some(n) = lower.strip_suffix('G') {
        (n, 1 << 30)
    } else if let Some(n) = lower.strip_suffix('M') {
        (n, 1 << 20)
    } else if let Some(n) = lower.strip_suffix('K') {
        (n, 1 << 10)
    } else {
        (lower.as_str(), 1)
    };
    Ok(num.parse::<u64>()? * mult)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_suffixes() {
        assert_eq!(parse_size("8M").unwrap(), 8 << 20);
        assert_eq!(parse_size("16777216").unwrap(), 16777216);
    }

    #[test]
    fn synthesises_single_file_poolset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool");
        std::fs::write(&path, vec![0u8; 4096 * 4]).unwrap();

        let set = PoolSet::parse(&path).unwrap();
        assert_eq!(set.replicas.len(), 1);
        assert_eq!(set.replicas[0].parts.len(), 1);
    }

    #[test]
    fn parses_poolset_descriptor_with_replica() {
        let dir = tempfile::tempdir().unwrap();
        let p0 = dir.path().join("p0");
        let p1 = dir.path().join("p1");
        std::fs::write(&p0, vec![0u8; 0]).unwrap();
        std::fs::write(&p1, vec![0u8; 0]).unwrap();

        let desc_path = dir.path().join("pool.set");
        std::fs::write(
            &desc_path,
            format!("PMEMPOOLSET\n8M {}\nREPLICA\n8M {}\n", p0.display(), p1.display()),
        )
        .unwrap();

        let set = PoolSet::parse(&desc_path).unwrap();
        assert_eq!(set.replicas.len(), 2);
        assert_eq!(set.replicas[0].parts[0].filesize, 8 << 20);
    }
}
