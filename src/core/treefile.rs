/*!
 * Human-readable tree rendering for the tree.txt sidecar
 *
 * The format is informational only; nothing parses it back.
 */

use std::fs;
use std::path::Path;

use tracing::error;

use crate::core::tree::MAX_DEPTH;

const BRANCH: &str = "├── ";
const LAST_BRANCH: &str = "└── ";
const PIPE: &str = "│   ";
const INDENT: &str = "    ";

/// Render the directory under `root` as classic box-drawing tree lines,
/// root's own name first. Enumeration errors skip the affected directory.
pub fn tree_lines(root: &Path, follow_symlinks: bool) -> Vec<String> {
    let root_name = root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string());

    let mut lines = vec![root_name];
    render_children(root, "", follow_symlinks, 0, &mut lines);
    lines
}

fn render_children(
    dir: &Path,
    prefix: &str,
    follow_symlinks: bool,
    depth: usize,
    lines: &mut Vec<String>,
) {
    if depth >= MAX_DEPTH {
        error!("Maximum tree depth reached at {}, not descending", dir.display());
        return;
    }

    let mut children: Vec<(String, std::path::PathBuf)> = match fs::read_dir(dir) {
        Ok(reader) => reader
            .filter_map(|entry| entry.ok())
            .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
            .collect(),
        Err(e) => {
            error!("Error rendering tree for {}: {}", dir.display(), e);
            return;
        }
    };
    children.sort_by(|a, b| a.0.cmp(&b.0));

    let count = children.len();
    for (index, (name, path)) in children.into_iter().enumerate() {
        let last = index + 1 == count;
        let connector = if last { LAST_BRANCH } else { BRANCH };
        lines.push(format!("{}{}{}", prefix, connector, name));

        let descend = if follow_symlinks {
            path.is_dir()
        } else {
            fs::symlink_metadata(&path)
                .map(|meta| meta.is_dir())
                .unwrap_or(false)
        };

        if descend {
            let child_prefix = format!("{}{}", prefix, if last { INDENT } else { PIPE });
            render_children(&path, &child_prefix, follow_symlinks, depth + 1, lines);
        }
    }
}
