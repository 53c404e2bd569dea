//! Symbol tables extracted from binary images
//!
//! An [`ObjectImage`] is opened once per loaded module and answers
//! nearest-symbol queries for image-relative (link-time) addresses. The
//! function names come from the ELF symbol table (falling back to the
//! dynamic table for stripped libraries) and file:line information comes
//! from DWARF `.debug_line` via addr2line when the image carries it.

use anyhow::{Context, Result};
use object::{
    Object, ObjectSection, ObjectSegment, ObjectSymbol, SectionFlags, SegmentFlags, SymbolKind,
};
use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// What a symbol table knows about one image-relative address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolHit {
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

/// A queryable symbol table for one binary image
pub trait SymbolSource {
    /// Look up the nearest symbol at or below `offset`.
    ///
    /// Returns `None` when `offset` does not fall inside any allocated
    /// section of the image.
    fn nearest(&self, offset: u64) -> Option<SymbolHit>;

    /// Number of function symbols known to this table
    fn symbol_count(&self) -> usize;
}

/// A function symbol at an image-relative address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub address: u64,
    pub name: String,
}

/// In-memory nearest-symbol table
///
/// Symbols are kept sorted by address. A query only succeeds inside one of
/// the allocated section ranges, and a symbol only names an address if it
/// lives in the same section.
#[derive(Debug, Clone, Default)]
pub struct SymbolIndex {
    sections: Vec<Range<u64>>,
    symbols: Vec<Symbol>,
}

impl SymbolIndex {
    pub fn new(mut sections: Vec<Range<u64>>, mut symbols: Vec<Symbol>) -> Self {
        sections.retain(|s| s.start < s.end);
        sections.sort_by_key(|s| s.start);
        symbols.sort_by_key(|s| s.address);
        symbols.dedup_by_key(|s| s.address);

        Self { sections, symbols }
    }

    fn section_of(&self, offset: u64) -> Option<&Range<u64>> {
        self.sections.iter().find(|s| s.contains(&offset))
    }

    fn function_at(&self, offset: u64, section: &Range<u64>) -> Option<&str> {
        let idx = self.symbols.partition_point(|s| s.address <= offset);
        let symbol = self.symbols.get(idx.checked_sub(1)?)?;
        if symbol.address < section.start {
            return None;
        }
        Some(symbol.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl SymbolSource for SymbolIndex {
    fn nearest(&self, offset: u64) -> Option<SymbolHit> {
        let section = self.section_of(offset)?;
        Some(SymbolHit {
            function: self.function_at(offset, section).map(str::to_string),
            file: None,
            line: None,
        })
    }

    fn symbol_count(&self) -> usize {
        self.symbols.len()
    }
}

type LineContext = addr2line::Context<gimli::EndianRcSlice<gimli::RunTimeEndian>>;

/// Largest page size a mapping's file offset may be rounded down by
const MAX_PAGE_SIZE: u64 = 0x10000;

/// A loadable segment: where a span of the file lands at link time
#[derive(Debug, Clone, Copy)]
struct Segment {
    file_offset: u64,
    file_size: u64,
    address: u64,
    executable: bool,
}

impl Segment {
    /// Whether a mapping starting at `file_offset` can be this segment,
    /// allowing for the page rounding the loader applies
    fn covers(&self, file_offset: u64) -> bool {
        file_offset < self.file_offset + self.file_size
            && self.file_offset.saturating_sub(file_offset) < MAX_PAGE_SIZE
    }
}

/// An opened ELF image: its symbol index plus optional line information
pub struct ObjectImage {
    path: PathBuf,
    index: SymbolIndex,
    segments: Vec<Segment>,
    lines: Option<LineContext>,
}

impl ObjectImage {
    /// Open a binary image and extract its symbol table
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open binary: {}", path.display()))?;

        let mmap = unsafe { memmap2::Mmap::map(&file) }.context("Failed to memory-map binary")?;

        let object = object::File::parse(&*mmap)
            .with_context(|| format!("Failed to parse object file: {}", path.display()))?;

        let sections = object
            .sections()
            .filter(is_allocated)
            .map(|s| s.address()..s.address().saturating_add(s.size()))
            .collect();

        let segments = object
            .segments()
            .filter_map(|seg| {
                let (file_offset, file_size) = seg.file_range();
                let executable = match seg.flags() {
                    SegmentFlags::Elf { p_flags } => p_flags & object::elf::PF_X != 0,
                    _ => false,
                };
                (file_size > 0).then(|| Segment {
                    file_offset,
                    file_size,
                    address: seg.address(),
                    executable,
                })
            })
            .collect();

        // Local symbols first, the dynamic table only when those are gone
        let mut symbols = collect_functions(object.symbols());
        if symbols.is_empty() {
            symbols = collect_functions(object.dynamic_symbols());
        }

        let lines = match load_line_context(&object) {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::debug!("no line info for {}: {:#}", path.display(), e);
                None
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            index: SymbolIndex::new(sections, symbols),
            segments,
            lines,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_symbols(&self) -> bool {
        !self.index.is_empty()
    }

    pub fn has_line_info(&self) -> bool {
        self.lines.is_some()
    }

    /// Link-time address of the byte at `file_offset` within an executable
    /// mapping, if a loadable segment covers it.
    ///
    /// One file page may be mapped by two segments, so executable segments
    /// take precedence.
    pub fn link_address(&self, file_offset: u64) -> Option<u64> {
        let segment = self
            .segments
            .iter()
            .find(|seg| seg.executable && seg.covers(file_offset))
            .or_else(|| self.segments.iter().find(|seg| seg.covers(file_offset)))?;

        Some(
            segment
                .address
                .wrapping_sub(segment.file_offset)
                .wrapping_add(file_offset),
        )
    }

    fn location(&self, offset: u64) -> Option<(String, u32)> {
        let ctx = self.lines.as_ref()?;
        // A failed line lookup leaves the function name intact
        let location = ctx.find_location(offset).ok()??;
        let file = location.file?;
        let line = location.line?;
        Some((file.to_string(), line))
    }
}

impl SymbolSource for ObjectImage {
    fn nearest(&self, offset: u64) -> Option<SymbolHit> {
        let mut hit = self.index.nearest(offset)?;
        if let Some((file, line)) = self.location(offset) {
            hit.file = Some(file);
            hit.line = Some(line);
        }
        Some(hit)
    }

    fn symbol_count(&self) -> usize {
        self.index.symbol_count()
    }
}

fn is_allocated(section: &object::Section<'_, '_>) -> bool {
    match section.flags() {
        SectionFlags::Elf { sh_flags } => sh_flags & u64::from(object::elf::SHF_ALLOC) != 0,
        _ => section.address() != 0,
    }
}

fn collect_functions<'data, I, S>(symbols: I) -> Vec<Symbol>
where
    I: Iterator<Item = S>,
    S: ObjectSymbol<'data>,
{
    symbols
        .filter(|s| s.kind() == SymbolKind::Text && s.is_definition() && s.address() != 0)
        .filter_map(|s| {
            let name = s.name().ok()?;
            if name.is_empty() {
                return None;
            }
            Some(Symbol {
                address: s.address(),
                name: demangle(name),
            })
        })
        .collect()
}

/// Demangle Rust symbol names, leaving anything else untouched
pub fn demangle(name: &str) -> String {
    match rustc_demangle::try_demangle(name) {
        Ok(demangled) => format!("{:#}", demangled),
        Err(_) => name.to_string(),
    }
}

fn load_line_context(object: &object::File<'_>) -> Result<Option<LineContext>> {
    if object.section_by_name(".debug_line").is_none() {
        return Ok(None);
    }

    let endian = if object.is_little_endian() {
        gimli::RunTimeEndian::Little
    } else {
        gimli::RunTimeEndian::Big
    };

    let load_section = |id: gimli::SectionId| -> Result<gimli::EndianRcSlice<gimli::RunTimeEndian>> {
        let data = object
            .section_by_name(id.name())
            .and_then(|section| section.uncompressed_data().ok())
            .unwrap_or(std::borrow::Cow::Borrowed(&[]));
        let bytes: Rc<[u8]> = Rc::from(data.into_owned());
        Ok(gimli::EndianRcSlice::new(bytes, endian))
    };

    let dwarf = gimli::Dwarf::load(&load_section).context("Failed to load DWARF sections")?;

    let context = addr2line::Context::from_dwarf(dwarf).context("Failed to create DWARF context")?;

    Ok(Some(context))
}
