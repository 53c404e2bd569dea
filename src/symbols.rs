//! Address-to-symbol resolution for a traced process
//!
//! The resolver maps absolute virtual addresses of the target process onto
//! the binary images loaded in it. Each executable, file-backed image in
//! `/proc/<pid>/maps` becomes a [`LoadedModule`] owning that image's symbol
//! table; images that cannot be opened or have no symbols are skipped and
//! their addresses later render as raw hex.
//!
//! Whether an image was relocated at load time is not known up front, so a
//! lookup tries each [`AddressTransform`] of [`LOOKUP_ORDER`] in turn and
//! keeps the first hit.

use crate::error::Result;
use crate::maps::{MemoryMap, MemoryMapping};
use crate::object_symbols::{ObjectImage, SymbolHit, SymbolSource};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolved identity of an address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolResult {
    pub module_name: Option<String>,
    pub function_name: Option<String>,
    pub source_file: Option<String>,
    pub line_number: Option<u32>,
}

/// How a runtime address is turned into an image-relative query offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressTransform {
    /// Position-independent image: subtract the module's load base
    Relocated,
    /// Fixed-address image: query with the address unchanged
    Absolute,
}

/// PIE executables and shared libraries dominate, so try relocation first
pub const LOOKUP_ORDER: [AddressTransform; 2] =
    [AddressTransform::Relocated, AddressTransform::Absolute];

impl AddressTransform {
    pub fn apply(self, address: u64, module: &LoadedModule) -> Option<u64> {
        match self {
            AddressTransform::Relocated => address.checked_sub(module.load_bias),
            AddressTransform::Absolute => Some(address),
        }
    }
}

/// One binary image loaded in the target process
pub struct LoadedModule {
    backing_path: PathBuf,
    symbols: Box<dyn SymbolSource>,
    load_start: u64,
    load_end: u64,
    load_bias: u64,
}

impl LoadedModule {
    /// A module occupying `[load_start, load_end)` whose image-relative
    /// addresses start at `load_start`
    pub fn new(
        backing_path: impl Into<PathBuf>,
        symbols: Box<dyn SymbolSource>,
        load_start: u64,
        load_end: u64,
    ) -> Self {
        Self {
            backing_path: backing_path.into(),
            symbols,
            load_start,
            load_end,
            load_bias: load_start,
        }
    }

    /// Build a module from the executable mappings of one image.
    ///
    /// The occupied range runs from the first mapping's start (not start
    /// plus file offset) to the last mapping's end. The relocation base is
    /// kept apart from that range and defaults to where file offset zero
    /// would be mapped, which holds when segments are linked at their file
    /// offsets.
    pub fn from_mappings(
        backing_path: impl Into<PathBuf>,
        symbols: Box<dyn SymbolSource>,
        mappings: &[MemoryMapping],
    ) -> Option<Self> {
        let first = mappings.first()?;
        let last = mappings.last()?;

        Some(Self {
            backing_path: backing_path.into(),
            symbols,
            load_start: first.start_address,
            load_end: last.end_address.max(first.end_address),
            load_bias: first.start_address.saturating_sub(first.file_offset),
        })
    }

    /// Override the relocation base, e.g. with one derived from the image's
    /// program headers
    pub fn with_load_bias(mut self, load_bias: u64) -> Self {
        self.load_bias = load_bias;
        self
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.load_start && address < self.load_end
    }

    pub fn backing_path(&self) -> &Path {
        &self.backing_path
    }

    pub fn load_start(&self) -> u64 {
        self.load_start
    }

    pub fn load_end(&self) -> u64 {
        self.load_end
    }

    pub fn load_bias(&self) -> u64 {
        self.load_bias
    }

    /// Query the symbol table under each relocation hypothesis in order
    pub fn lookup(&self, address: u64) -> Option<(AddressTransform, SymbolHit)> {
        LOOKUP_ORDER.iter().find_map(|&transform| {
            let offset = transform.apply(address, self)?;
            self.symbols.nearest(offset).map(|hit| (transform, hit))
        })
    }
}

/// Symbol tables of every module loaded in one process
#[derive(Default)]
pub struct SymbolResolver {
    modules: Vec<LoadedModule>,
}

impl SymbolResolver {
    /// Read the process's mapping list and load a symbol table per image
    pub fn build(pid: Pid) -> Result<Self> {
        let map = MemoryMap::for_pid(pid)?;
        Ok(Self::from_memory_map(&map))
    }

    pub fn from_memory_map(map: &MemoryMap) -> Self {
        let mut modules = Vec::new();

        for (path, mappings) in map.by_image() {
            let image = match ObjectImage::open(&path) {
                Ok(image) => image,
                Err(e) => {
                    debug!("skipping {}: {:#}", path.display(), e);
                    continue;
                }
            };

            if !image.has_symbols() {
                debug!("skipping {}: no symbols", path.display());
                continue;
            }

            debug!(
                "loaded {} symbols from {}{}",
                image.symbol_count(),
                path.display(),
                if image.has_line_info() { " (with line info)" } else { "" }
            );

            let bias = mappings.first().and_then(|first| {
                let link = image.link_address(first.file_offset)?;
                first.start_address.checked_sub(link)
            });

            if let Some(mut module) =
                LoadedModule::from_mappings(path, Box::new(image), &mappings)
            {
                if let Some(bias) = bias {
                    module = module.with_load_bias(bias);
                }
                modules.push(module);
            }
        }

        Self { modules }
    }

    pub fn from_modules(modules: Vec<LoadedModule>) -> Self {
        Self { modules }
    }

    pub fn modules(&self) -> &[LoadedModule] {
        &self.modules
    }

    pub fn module_for(&self, address: u64) -> Option<&LoadedModule> {
        self.modules.iter().find(|m| m.contains(address))
    }

    /// Resolve an absolute address of the target process.
    ///
    /// Returns `None` when no module contains the address, or when the
    /// owning module's symbol table knows nothing about it.
    pub fn resolve(&self, address: u64) -> Option<SymbolResult> {
        let module = self.module_for(address)?;
        let (_, hit) = module.lookup(address)?;

        Some(SymbolResult {
            module_name: Some(module.backing_path.display().to_string()),
            function_name: hit.function,
            source_file: hit.file,
            line_number: hit.line,
        })
    }
}
