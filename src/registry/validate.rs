//! Content graph validation.
//!
//! Builds directed graphs over rarity downgrades, item parents and loot
//! table references and reports cycles and dangling ids. Rolling tolerates
//! all of these at runtime; the report lets tools surface them early.

use std::fmt;

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use serde::Serialize;
use tracing::warn;

use super::{ContentRegistry, PrototypeId, PrototypeRegistry};
use crate::loot::LootNodeKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IssueKind {
    Cycle,
    DanglingReference,
    InvalidModifier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub subject: PrototypeId,
    pub detail: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} at {}: {}", self.kind, self.subject.0, self.detail)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn count(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|i| i.kind == kind).count()
    }

    fn push(&mut self, kind: IssueKind, subject: PrototypeId, detail: impl Into<String>) {
        self.issues.push(ValidationIssue {
            kind,
            subject,
            detail: detail.into(),
        });
    }
}

/// Strongly connected components with more than one node, or a self loop
fn report_cycles(graph: &DiGraphMap<PrototypeId, ()>, what: &str, report: &mut ValidationReport) {
    for component in tarjan_scc(graph) {
        let first = component[0];
        if component.len() == 1 && !graph.contains_edge(first, first) {
            continue;
        }
        let mut ids: Vec<u64> = component.iter().map(|id| id.0).collect();
        ids.sort_unstable();
        report.push(IssueKind::Cycle, PrototypeId(ids[0]), format!("{what} cycle through {ids:?}"));
    }
}

pub fn validate_content(registry: &ContentRegistry) -> ValidationReport {
    let mut report = ValidationReport::default();

    let mut downgrades = DiGraphMap::new();
    for rarity in registry.rarities() {
        downgrades.add_node(rarity.id);
        if !rarity.downgrade_to.is_valid() {
            continue;
        }
        if registry.rarity(rarity.downgrade_to).is_none() {
            report.push(
                IssueKind::DanglingReference,
                rarity.id,
                format!("downgrade target {} is not a rarity", rarity.downgrade_to.0),
            );
            continue;
        }
        downgrades.add_edge(rarity.id, rarity.downgrade_to, ());
    }
    report_cycles(&downgrades, "rarity downgrade", &mut report);

    let mut parents = DiGraphMap::new();
    for item in registry.items() {
        parents.add_node(item.id);
        if !item.parent.is_valid() {
            continue;
        }
        if !registry.contains(item.parent) {
            report.push(
                IssueKind::DanglingReference,
                item.id,
                format!("unknown parent {}", item.parent.0),
            );
            continue;
        }
        parents.add_edge(item.id, item.parent, ());
    }
    report_cycles(&parents, "item parent", &mut report);

    let mut references = DiGraphMap::new();
    for table in registry.loot_tables() {
        references.add_node(table.id);
        for target in table.root.referenced_tables() {
            if registry.loot_table(target).is_none() {
                report.push(
                    IssueKind::DanglingReference,
                    table.id,
                    format!("table reference {} is not a loot table", target.0),
                );
                continue;
            }
            references.add_edge(table.id, target, ());
        }
        for item in table.root.referenced_items() {
            if registry.item(item).is_none() {
                report.push(
                    IssueKind::DanglingReference,
                    table.id,
                    format!("item {} is not an item prototype", item.0),
                );
            }
        }
        table.root.visit(&mut |node| {
            for modifier in &node.modifiers {
                if !modifier.is_valid_for_node(&node.kind) {
                    report.push(
                        IssueKind::InvalidModifier,
                        table.id,
                        format!("{} cannot apply to a {} node", modifier.name(), node.kind.name()),
                    );
                }
            }
            if let LootNodeKind::Credits(curve) | LootNodeKind::Experience(curve) = &node.kind {
                if registry.curve(*curve).is_none() {
                    report.push(
                        IssueKind::DanglingReference,
                        table.id,
                        format!("{} node curve {} missing", node.kind.name(), curve.0),
                    );
                }
            }
        });
    }
    report_cycles(&references, "loot table", &mut report);

    for issue in &report.issues {
        warn!(%issue, "content issue");
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affix::RarityPrototype;
    use crate::loot::{LootNode, LootRollModifier, LootTablePrototype, PickMethod};
    use crate::registry::{ContentDatabase, CurveId, EquipmentSlot, ItemPrototype};

    fn rarity(id: u64, down: u64) -> RarityPrototype {
        RarityPrototype {
            id: PrototypeId(id),
            name: String::new(),
            downgrade_to: PrototypeId(down),
            weight_curve: CurveId::INVALID,
        }
    }

    fn item(id: u64, parent: u64) -> ItemPrototype {
        ItemPrototype {
            id: PrototypeId(id),
            name: String::new(),
            parent: PrototypeId(parent),
            is_abstract: parent == 0,
            slot: EquipmentSlot::Gear01,
            usable_by: vec![],
            builtin_affixes: vec![],
            affix_limits: vec![],
            drop_restrictions: vec![],
        }
    }

    fn table(id: u64, refs: &[u64]) -> LootTablePrototype {
        let choices = refs
            .iter()
            .map(|r| {
                LootNode::new(LootNodeKind::TableRef {
                    table: PrototypeId(*r),
                    num_min: 1,
                    num_max: 1,
                })
            })
            .collect();
        LootTablePrototype {
            id: PrototypeId(id),
            name: String::new(),
            root: LootNode::table(PickMethod::PickAll, choices),
        }
    }

    #[test]
    fn test_clean_content() {
        let mut db = ContentDatabase::default();
        db.rarities = vec![rarity(1, 0), rarity(2, 1)];
        db.items = vec![item(10, 0), item(11, 10)];
        db.loot_tables = vec![table(20, &[21]), table(21, &[])];
        let reg = ContentRegistry::new(db).unwrap();
        assert!(validate_content(&reg).is_clean());
    }

    #[test]
    fn test_reports_cycles() {
        let mut db = ContentDatabase::default();
        db.rarities = vec![rarity(1, 2), rarity(2, 1), rarity(3, 3)];
        db.items = vec![item(10, 11), item(11, 10)];
        db.loot_tables = vec![table(20, &[21]), table(21, &[20])];
        let reg = ContentRegistry::new(db).unwrap();
        let report = validate_content(&reg);
        assert_eq!(report.count(IssueKind::Cycle), 4);
    }

    #[test]
    fn test_reports_dangling_references() {
        let mut db = ContentDatabase::default();
        db.rarities = vec![rarity(1, 99)];
        db.items = vec![item(10, 98)];
        let mut root = table(20, &[97]);
        if let LootNodeKind::Table(inner) = &mut root.root.kind {
            inner.choices.push(LootNode::item(PrototypeId(96)));
        }
        db.loot_tables = vec![root];
        let reg = ContentRegistry::new(db).unwrap();
        let report = validate_content(&reg);
        assert_eq!(report.count(IssueKind::DanglingReference), 4);
    }

    #[test]
    fn test_reports_misplaced_modifier() {
        let mut db = ContentDatabase::default();
        db.curves = vec![crate::registry::Curve::new(CurveId(1), 1, vec![1.0])];
        let node = LootNode::new(LootNodeKind::Credits(CurveId(1)))
            .with_modifier(LootRollModifier::RequireKillCount(5));
        db.loot_tables = vec![LootTablePrototype {
            id: PrototypeId(20),
            name: String::new(),
            root: LootNode::table(PickMethod::PickAll, vec![node]),
        }];
        let reg = ContentRegistry::new(db).unwrap();
        let report = validate_content(&reg);
        assert_eq!(report.count(IssueKind::InvalidModifier), 1);
    }
}
