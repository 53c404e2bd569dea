//! Parsing of `/proc/<pid>/maps`
//!
//! Only executable, file-backed mappings matter to symbol resolution, so the
//! parser keeps just those. Lines that are malformed are skipped one at a
//! time rather than failing the whole scan.

use crate::error::{ProfilerError, Result};
use nix::unistd::Pid;
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::trace;

/// One executable region of a traced process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMapping {
    pub start_address: u64,
    pub end_address: u64,
    pub file_offset: u64,
    pub backing_path: PathBuf,
}

impl MemoryMapping {
    /// Parse a single maps line.
    ///
    /// Returns `None` for malformed lines, non-executable mappings and
    /// anonymous or pseudo mappings (`[heap]`, `[vdso]`, ...).
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();

        let range = fields.next()?;
        let perms = fields.next()?;
        let offset = fields.next()?;
        let _device = fields.next()?;
        let _inode = fields.next()?;

        // The path may contain spaces, so rejoin whatever is left
        let path = fields.collect::<Vec<_>>().join(" ");
        if !path.starts_with('/') {
            return None;
        }

        if perms.as_bytes().get(2) != Some(&b'x') {
            return None;
        }

        let (start, end) = range.split_once('-')?;
        let start_address = u64::from_str_radix(start, 16).ok()?;
        let end_address = u64::from_str_radix(end, 16).ok()?;
        let file_offset = u64::from_str_radix(offset, 16).ok()?;

        if end_address <= start_address {
            return None;
        }

        Some(MemoryMapping {
            start_address,
            end_address,
            file_offset,
            backing_path: PathBuf::from(path),
        })
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start_address && address < self.end_address
    }
}

/// All executable, file-backed mappings of a process, in listing order
#[derive(Debug, Default)]
pub struct MemoryMap {
    mappings: Vec<MemoryMapping>,
}

impl MemoryMap {
    /// Read and parse the mapping list of a live process
    pub fn for_pid(pid: Pid) -> Result<Self> {
        let path = format!("/proc/{}/maps", pid);
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ProfilerError::NoSuchProcess { pid: pid.as_raw() },
            _ => ProfilerError::Io(e),
        })?;

        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let mappings = content
            .lines()
            .filter_map(|line| {
                let mapping = MemoryMapping::parse_line(line);
                if mapping.is_none() {
                    trace!("skipping maps line: {}", line);
                }
                mapping
            })
            .collect();

        MemoryMap { mappings }
    }

    pub fn mappings(&self) -> &[MemoryMapping] {
        &self.mappings
    }

    /// Group mappings by backing file, preserving first-seen order
    pub fn by_image(&self) -> Vec<(PathBuf, Vec<MemoryMapping>)> {
        let mut images: Vec<(PathBuf, Vec<MemoryMapping>)> = Vec::new();

        for mapping in &self.mappings {
            match images
                .iter_mut()
                .find(|(path, _)| *path == mapping.backing_path)
            {
                Some((_, group)) => group.push(mapping.clone()),
                None => images.push((mapping.backing_path.clone(), vec![mapping.clone()])),
            }
        }

        images
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_MAPS: &str = "\
55d0c8a00000-55d0c8a02000 r--p 00000000 08:01 1311 /usr/bin/cat
55d0c8a02000-55d0c8a07000 r-xp 00002000 08:01 1311 /usr/bin/cat
55d0c8a07000-55d0c8a0a000 r--p 00007000 08:01 1311 /usr/bin/cat
55d0c9b3d000-55d0c9b5e000 rw-p 00000000 00:00 0 [heap]
7f1a2c000000-7f1a2c028000 r--p 00000000 08:01 2048 /usr/lib/x86_64-linux-gnu/libc.so.6
7f1a2c028000-7f1a2c1bd000 r-xp 00028000 08:01 2048 /usr/lib/x86_64-linux-gnu/libc.so.6
7ffd6f1e4000-7ffd6f1e6000 r-xp 00000000 00:00 0 [vdso]
";

    #[test]
    fn test_parse_executable_file_mapping() {
        let mapping = MemoryMapping::parse_line(
            "55d0c8a02000-55d0c8a07000 r-xp 00002000 08:01 1311 /usr/bin/cat",
        )
        .unwrap();

        assert_eq!(mapping.start_address, 0x55d0c8a02000);
        assert_eq!(mapping.end_address, 0x55d0c8a07000);
        assert_eq!(mapping.file_offset, 0x2000);
        assert_eq!(mapping.backing_path, PathBuf::from("/usr/bin/cat"));
    }

    #[test]
    fn test_non_executable_mapping_skipped() {
        assert!(MemoryMapping::parse_line(
            "55d0c8a00000-55d0c8a02000 r--p 00000000 08:01 1311 /usr/bin/cat"
        )
        .is_none());
    }

    #[test]
    fn test_anonymous_and_pseudo_mappings_skipped() {
        assert!(MemoryMapping::parse_line("7ffd6f1e4000-7ffd6f1e6000 r-xp 00000000 00:00 0 [vdso]").is_none());
        assert!(MemoryMapping::parse_line("7f0000000000-7f0000001000 r-xp 00000000 00:00 0").is_none());
    }

    #[test]
    fn test_malformed_lines_skipped() {
        assert!(MemoryMapping::parse_line("").is_none());
        assert!(MemoryMapping::parse_line("garbage").is_none());
        assert!(MemoryMapping::parse_line("zzzz-1000 r-xp 0 08:01 1 /bin/x").is_none());
        assert!(MemoryMapping::parse_line("1000 r-xp 0 08:01 1 /bin/x").is_none());
        assert!(MemoryMapping::parse_line("2000-1000 r-xp 0 08:01 1 /bin/x").is_none());
    }

    #[test]
    fn test_path_with_spaces() {
        let mapping = MemoryMapping::parse_line(
            "1000-2000 r-xp 00000000 08:01 7 /opt/my app/bin/tool",
        )
        .unwrap();
        assert_eq!(mapping.backing_path, PathBuf::from("/opt/my app/bin/tool"));
    }

    #[test]
    fn test_parse_keeps_only_executable_images() {
        let map = MemoryMap::parse(SAMPLE_MAPS);
        assert_eq!(map.len(), 2);
        assert!(map
            .mappings()
            .iter()
            .all(|m| m.backing_path.is_absolute()));
    }

    #[test]
    fn test_by_image_groups_per_path() {
        let content = "\
1000-2000 r-xp 00001000 08:01 7 /lib/a.so
2000-3000 r-xp 00002000 08:01 7 /lib/a.so
5000-6000 r-xp 00000000 08:01 8 /lib/b.so
";
        let images = MemoryMap::parse(content).by_image();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].0, PathBuf::from("/lib/a.so"));
        assert_eq!(images[0].1.len(), 2);
        assert_eq!(images[1].1.len(), 1);
    }

    #[test]
    fn test_contains_is_half_open() {
        let mapping =
            MemoryMapping::parse_line("1000-2000 r-xp 00000000 08:01 7 /lib/a.so").unwrap();
        assert!(mapping.contains(0x1000));
        assert!(mapping.contains(0x1fff));
        assert!(!mapping.contains(0x2000));
    }

    #[test]
    fn test_for_pid_missing_process() {
        // PIDs are capped well below i32::MAX on Linux
        let result = MemoryMap::for_pid(Pid::from_raw(i32::MAX));
        assert!(matches!(result, Err(ProfilerError::NoSuchProcess { .. })));
    }

    #[test]
    fn test_for_pid_self_has_executable_images() {
        let map = MemoryMap::for_pid(Pid::this()).unwrap();
        assert!(!map.is_empty());
    }
}
