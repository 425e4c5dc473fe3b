//! Tree rendering for chunk layouts

use console::Style;

use super::format::format_bytes;

/// A node in a tree structure
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub name: String,
    pub node_type: NodeType,
    pub size: Option<u64>,
    pub children: Vec<TreeNode>,
    /// Key/value pairs shown under the node, in insertion order
    pub metadata: Vec<(String, String)>,
}

/// Types of nodes in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    File,
    Chunk,
    Data,
}

/// Options for tree rendering
#[derive(Debug, Clone, Default)]
pub struct TreeOptions {
    pub max_depth: Option<usize>,
    pub no_color: bool,
}

impl TreeNode {
    pub fn new(name: String, node_type: NodeType) -> Self {
        Self {
            name,
            node_type,
            size: None,
            children: Vec::new(),
            metadata: Vec::new(),
        }
    }

    pub fn add_child(mut self, child: TreeNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.push((key.to_string(), value.to_string()));
        self
    }
}

impl NodeType {
    pub fn icon(&self) -> &'static str {
        match self {
            NodeType::File => "📄",
            NodeType::Chunk => "📦",
            NodeType::Data => "💾",
        }
    }

    pub fn style(&self, no_color: bool) -> Style {
        if no_color {
            Style::new()
        } else {
            match self {
                NodeType::File => Style::new().bold().cyan(),
                NodeType::Chunk => Style::new().blue(),
                NodeType::Data => Style::new().white(),
            }
        }
    }
}

/// Render a tree structure to string
pub fn render_tree(root: &TreeNode, options: &TreeOptions) -> String {
    let mut output = String::new();
    render_node(root, &mut output, "", true, 0, options);
    output
}

fn render_node(
    node: &TreeNode,
    output: &mut String,
    prefix: &str,
    is_last: bool,
    depth: usize,
    options: &TreeOptions,
) {
    if let Some(max_depth) = options.max_depth
        && depth > max_depth
    {
        return;
    }

    let connector = if depth == 0 {
        ""
    } else if is_last {
        "└── "
    } else {
        "├── "
    };
    output.push_str(&format!(
        "{}{}{} {}",
        prefix,
        connector,
        node.node_type.icon(),
        node.node_type.style(options.no_color).apply_to(&node.name)
    ));
    if let Some(size) = node.size {
        output.push_str(&format!(" ({})", format_bytes(size)));
    }
    output.push('\n');

    let new_prefix = if depth == 0 {
        String::new()
    } else {
        format!("{}{}", prefix, if is_last { "    " } else { "│   " })
    };

    for (key, value) in &node.metadata {
        let meta_style = if options.no_color {
            Style::new()
        } else {
            Style::new().dim()
        };
        output.push_str(&format!(
            "{new_prefix}    {}: {value}\n",
            meta_style.apply_to(key)
        ));
    }

    for (i, child) in node.children.iter().enumerate() {
        let is_last_child = i == node.children.len() - 1;
        render_node(child, output, &new_prefix, is_last_child, depth + 1, options);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TreeNode {
        TreeNode::new("actor.omf".to_string(), NodeType::File)
            .with_size(2048)
            .add_child(
                TreeNode::new("0x000E".to_string(), NodeType::Chunk)
                    .with_size(1500)
                    .add_child(
                        TreeNode::new("0x0000".to_string(), NodeType::Data)
                            .with_metadata("motions", "2"),
                    ),
            )
            .add_child(TreeNode::new("0x000F".to_string(), NodeType::Chunk).with_size(500))
    }

    #[test]
    fn test_tree_rendering() {
        let options = TreeOptions {
            no_color: true,
            ..TreeOptions::default()
        };
        let output = render_tree(&sample(), &options);

        assert!(output.contains("actor.omf"));
        assert!(output.contains("├── 📦 0x000E"));
        assert!(output.contains("└── 📦 0x000F"));
        assert!(output.contains("motions: 2"));
    }

    #[test]
    fn test_max_depth() {
        let options = TreeOptions {
            max_depth: Some(1),
            no_color: true,
        };
        let output = render_tree(&sample(), &options);
        assert!(output.contains("0x000E"));
        assert!(!output.contains("0x0000"));
    }
}
