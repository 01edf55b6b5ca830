//! Serialises a resolved unit tree into one self-contained bundle.

use std::fmt::Write as _;

use serde::Serialize;

use crate::config::Environment;
use crate::namespace::NamespaceTree;
use crate::tree::{TreeSnapshot, UnitTree};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportBundle {
    pub code: String,
    pub tree: TreeSnapshot,
}

/// Runtime object every bundle starts with.
pub fn library_preamble(environment: Environment) -> String {
    format!(
        "SL={{}};SL.ENVIRONMENT=\"{}\";SL.GLOBAL={};",
        environment,
        environment.global_object_name()
    )
}

/// Writes every unit reachable from the root in post-order. Blocks whose
/// environment filter excludes `environment` are left out; guards and
/// constants are not evaluated.
pub fn write_bundle(
    units: &UnitTree,
    namespaces: &NamespaceTree,
    environment: Environment,
    tree: TreeSnapshot,
) -> ExportBundle {
    let mut code = library_preamble(environment);
    code.push('\n');
    let declarations = namespaces.preamble();
    if !declarations.is_empty() {
        code.push_str(&declarations);
        code.push('\n');
    }
    for id in units.post_order() {
        let unit = &units[id];
        let _ = writeln!(code, "/* {} */", unit.key);
        for block in unit.blocks.iter().filter(|b| b.admits(environment)) {
            let _ = writeln!(code, "({}());", block.source);
        }
    }
    ExportBundle { code, tree }
}
