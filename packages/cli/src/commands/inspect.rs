use anyhow::{Context, Result};
use canopy_common::{ActorId, NodeId};
use canopy_storage::visitor::{walk_node, walk_slot, Visitor};
use canopy_storage::{ChildKey, Lson, NodeRecord, Pool, Snapshot};
use clap::Args;
use colored::Colorize;
use std::fs;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Snapshot file written by `canopy simulate --out`
    pub input: PathBuf,

    /// Print the plain JSON view instead of the node tree
    #[arg(long)]
    pub json: bool,
}

pub fn inspect(args: InspectArgs, _cwd: &str) -> Result<()> {
    let content = fs::read_to_string(&args.input)
        .with_context(|| format!("Cannot read {}", args.input.display()))?;
    let snapshot = Snapshot::from_json_str(&content)?;
    let pool = Pool::from_snapshot(ActorId::SERVER, &snapshot)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&pool.to_json())?);
        return Ok(());
    }

    for line in render_tree(&pool) {
        println!("{}", line);
    }
    println!();
    println!("   {} {}", "Nodes:".bright_white(), pool.len());
    Ok(())
}

/// One line per slot, indented by depth
pub fn render_tree(pool: &Pool) -> Vec<String> {
    let mut printer = TreePrinter::default();
    if let Ok(root) = pool.get_node(NodeId::root()) {
        printer.lines.push(format!("{} {}", root.kind(), root.id).bold().to_string());
        printer.depth = 1;
        walk_node(&mut printer, pool, root);
    }
    printer.lines
}

#[derive(Default)]
struct TreePrinter {
    depth: usize,
    lines: Vec<String>,
}

impl Visitor for TreePrinter {
    fn visit_slot(&mut self, pool: &Pool, _parent: &NodeRecord, key: &ChildKey, value: &Lson) {
        let indent = "  ".repeat(self.depth);
        let key = match key {
            ChildKey::Field(name) => name.cyan().to_string(),
            ChildKey::Index(_) => key.to_string().cyan().to_string(),
        };
        match value {
            Lson::Json(json) => {
                self.lines.push(format!("{}{}: {}", indent, key, json));
            }
            Lson::Node(id) => {
                let label = match pool.get_node(*id) {
                    Ok(child) => format!("{} {}", child.kind(), id).dimmed().to_string(),
                    Err(_) => format!("missing {}", id).red().to_string(),
                };
                self.lines.push(format!("{}{}: {}", indent, key, label));
                self.depth += 1;
                walk_slot(self, pool, value);
                self.depth -= 1;
            }
        }
    }
}
