//! Rendering symbolicated call trees
//!
//! The text format prints one line per node, indented one space per level:
//!
//! ```text
//! thread 4242:
//!  120 main (in app) main.rs:12
//!   97 parse (in app) parse.rs:40
//!    97 0x7f3e2a1b4c10 (in libc.so.6)
//!   23 0x55d0c8a03f00
//! ```
//!
//! The JSON format carries the same tree as nested objects.

use crate::call_tree::{CallTree, NodeId};
use crate::symbols::{SymbolResolver, SymbolResult};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Last path component, or the whole string when there is none
fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Render a node's label: count, function (or raw address) and, when
/// known, library and source position
pub fn format_node(count: u64, address: u64, symbol: Option<&SymbolResult>) -> String {
    let Some(symbol) = symbol else {
        return format!("{} 0x{:x}", count, address);
    };

    let name = match symbol.function_name.as_deref() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("0x{:x}", address),
    };

    let mut line = format!("{} {}", count, name);
    if let Some(module) = &symbol.module_name {
        line.push_str(&format!(" (in {})", basename(module)));
    }
    if let (Some(file), Some(lineno)) = (&symbol.source_file, symbol.line_number) {
        line.push_str(&format!(" {}:{}", basename(file), lineno));
    }
    line
}

/// Print one thread's tree in the indented text format
pub fn write_text<W: Write>(
    out: &mut W,
    resolver: &SymbolResolver,
    tid: i32,
    tree: &CallTree,
) -> Result<()> {
    writeln!(out, "thread {}:", tid)?;

    for (id, depth) in tree.walk() {
        let node = tree.node(id);
        let Some(address) = node.address() else {
            continue;
        };
        let symbol = resolver.resolve(address);
        writeln!(
            out,
            "{}{}",
            " ".repeat(depth),
            format_node(node.sample_count(), address, symbol.as_ref())
        )?;
    }

    Ok(())
}

/// A call tree node in the JSON report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonNode {
    pub count: u64,
    /// Hex-formatted program counter
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub children: Vec<JsonNode>,
}

/// One thread's tree in the JSON report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonThread {
    pub thread: i32,
    pub total_samples: u64,
    pub children: Vec<JsonNode>,
}

/// The whole JSON report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonReport {
    pub pid: i32,
    pub rounds: u64,
    pub threads: Vec<JsonThread>,
}

impl JsonReport {
    pub fn new(pid: i32, rounds: u64) -> Self {
        Self {
            pid,
            rounds,
            threads: Vec::new(),
        }
    }

    pub fn add_thread(&mut self, resolver: &SymbolResolver, tid: i32, tree: &CallTree) {
        let children = tree
            .root()
            .children
            .iter()
            .filter_map(|&id| json_node(resolver, tree, id))
            .collect();

        self.threads.push(JsonThread {
            thread: tid,
            total_samples: tree.total_samples(),
            children,
        });
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn json_node(resolver: &SymbolResolver, tree: &CallTree, id: NodeId) -> Option<JsonNode> {
    let node = tree.node(id);
    let address = node.address()?;
    let symbol = resolver.resolve(address).unwrap_or_default();

    Some(JsonNode {
        count: node.sample_count(),
        address: format!("0x{:x}", address),
        function: symbol.function_name.filter(|name| !name.is_empty()),
        library: symbol.module_name,
        file: symbol.source_file,
        line: symbol.line_number,
        children: node
            .children
            .iter()
            .filter_map(|&child| json_node(resolver, tree, child))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::SampleRecord;
    use crate::object_symbols::{Symbol, SymbolIndex};
    use crate::symbols::LoadedModule;

    fn resolver() -> SymbolResolver {
        let index = SymbolIndex::new(
            vec![0x0..0x1000],
            vec![
                Symbol {
                    address: 0x10,
                    name: "main".to_string(),
                },
                Symbol {
                    address: 0x200,
                    name: "worker".to_string(),
                },
            ],
        );
        SymbolResolver::from_modules(vec![LoadedModule::new(
            "/opt/app/bin/app",
            Box::new(index),
            0x1000,
            0x2000,
        )])
    }

    fn tree() -> CallTree {
        CallTree::build(vec![
            SampleRecord::new(vec![0x1010], 3),
            SampleRecord::new(vec![0x1204, 0x1010], 2),
            SampleRecord::new(vec![0x9999, 0x1010], 1),
        ])
    }

    #[test]
    fn test_format_node_unresolved() {
        assert_eq!(format_node(4, 0xabc, None), "4 0xabc");
    }

    #[test]
    fn test_format_node_with_source_position() {
        let symbol = SymbolResult {
            module_name: Some("/usr/lib/libc.so.6".to_string()),
            function_name: Some("read".to_string()),
            source_file: Some("/build/glibc/read.c".to_string()),
            line_number: Some(26),
        };
        assert_eq!(format_node(7, 0x1, Some(&symbol)), "7 read (in libc.so.6) read.c:26");
    }

    #[test]
    fn test_format_node_unnamed_symbol_uses_address() {
        let symbol = SymbolResult {
            module_name: Some("/lib/x.so".to_string()),
            function_name: Some(String::new()),
            source_file: None,
            line_number: None,
        };
        assert_eq!(format_node(1, 0x42, Some(&symbol)), "1 0x42 (in x.so)");
    }

    #[test]
    fn test_write_text_indents_by_depth() {
        let mut out = Vec::new();
        write_text(&mut out, &resolver(), 77, &tree()).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(
            text,
            "thread 77:\n 3 main (in app)\n  2 worker (in app)\n  1 0x9999\n"
        );
    }

    #[test]
    fn test_json_report_structure() {
        let mut report = JsonReport::new(77, 10);
        report.add_thread(&resolver(), 77, &tree());
        let json = report.to_json().unwrap();

        let parsed: JsonReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.threads.len(), 1);
        let thread = &parsed.threads[0];
        assert_eq!(thread.total_samples, 3);
        assert_eq!(thread.children[0].function.as_deref(), Some("main"));
        assert_eq!(thread.children[0].children.len(), 2);
        assert_eq!(thread.children[0].children[1].address, "0x9999");
        assert!(thread.children[0].children[1].function.is_none());
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/usr/lib/libc.so.6"), "libc.so.6");
        assert_eq!(basename("plain"), "plain");
    }
}
