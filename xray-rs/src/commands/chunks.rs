//! Chunk layout of arbitrary chunked files

use anyhow::{Context, Result};
use std::path::Path;

use xray_data::{Chunk, read_chunks};

use crate::utils::{NodeType, TreeNode, TreeOptions, format_chunk_id, render_tree};

/// Nesting below this depth is never probed
const MAX_NESTING: usize = 16;

pub fn execute(path: &Path, depth: Option<usize>, no_color: bool) -> Result<()> {
    let data =
        std::fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
    let name = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());

    let children = parse_level(&data, 0)
        .with_context(|| format!("Failed to parse chunks of {}", path.display()))?;
    let mut root = TreeNode::new(name, NodeType::File).with_size(data.len() as u64);
    root.children = children;

    let options = TreeOptions {
        max_depth: depth,
        no_color,
    };
    print!("{}", render_tree(&root, &options));
    Ok(())
}

fn parse_level(data: &[u8], level: usize) -> xray_data::Result<Vec<TreeNode>> {
    read_chunks(data)
        .map(|chunk| chunk.map(|chunk| chunk_node(&chunk, level)))
        .collect()
}

fn chunk_node(chunk: &Chunk<'_>, level: usize) -> TreeNode {
    let mut node = TreeNode::new(format_chunk_id(chunk.id, chunk.compressed), NodeType::Chunk)
        .with_size(chunk.data().len() as u64)
        .with_metadata("offset", &format!("0x{:X}", chunk.offset));

    match nested(chunk.data(), level + 1) {
        Some(children) => node.children = children,
        None => node.node_type = NodeType::Data,
    }
    node
}

/// Children of a payload that parses as a complete chunked stream
fn nested(data: &[u8], level: usize) -> Option<Vec<TreeNode>> {
    if level > MAX_NESTING || data.len() < xray_data::CHUNK_HEADER_SIZE {
        return None;
    }
    parse_level(data, level).ok()
}
