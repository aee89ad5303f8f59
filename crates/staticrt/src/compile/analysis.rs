//! Liveness and aliasing analysis.
//!
//! Positions follow the processed node order: inputs and constants are defined at `0`, node `i`
//! defines its outputs at `i + 1` and graph outputs are read at `N + 1`. Values that may share
//! storage (views and containers) form alias groups whose members all get the group's widened
//! live range. Managed values are then packed into storage slots so that values whose ranges do
//! not overlap can reuse the same buffer.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::kernels::AliasKind;
use crate::options::StaticModuleOptions;
use crate::value::{Value, ValueType};

use super::lower::LoweredGraph;
use super::node::ValueSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveRange {
    pub start: usize,
    pub end: usize,
}

impl LiveRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &LiveRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// One shared storage region and the managed values placed in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSlot {
    pub id: usize,
    pub byte_len: usize,
    pub members: Vec<ValueSlot>,
}

/// Graph output whose storage the planner provides up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedOutput {
    pub value: ValueSlot,
    pub byte_len: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoragePlan {
    pub slots: Vec<StorageSlot>,
    pub assignment: BTreeMap<ValueSlot, usize>,
    pub planned_outputs: Vec<PlannedOutput>,
}

impl StoragePlan {
    pub fn slot_of(&self, value: ValueSlot) -> Option<&StorageSlot> {
        self.assignment
            .get(&value)
            .and_then(|slot| self.slots.get(*slot))
    }

    pub fn num_managed(&self) -> usize {
        self.assignment.len()
    }

    /// Managed values that reuse a slot opened by another value.
    pub fn num_reused(&self) -> usize {
        self.assignment.len() - self.slots.len()
    }

    pub fn managed_bytes(&self) -> usize {
        self.slots.iter().map(|slot| slot.byte_len).sum()
    }

    pub fn planned_output_bytes(&self) -> usize {
        self.planned_outputs.iter().map(|output| output.byte_len).sum()
    }
}

/// Static storage facts shared by every instance of a compiled module.
#[derive(Debug, Clone, Default)]
pub struct StorageAnalysis {
    pub live_ranges: BTreeMap<ValueSlot, LiveRange>,
    pub alias_groups: BTreeMap<ValueSlot, usize>,
    pub external: BTreeSet<ValueSlot>,
    pub plan: StoragePlan,
    pub sharing: BTreeMap<ValueSlot, Vec<ValueSlot>>,
}

impl StorageAnalysis {
    pub fn is_managed(&self, value: ValueSlot) -> bool {
        self.plan.assignment.contains_key(&value)
    }

    pub fn same_alias_group(&self, a: ValueSlot, b: ValueSlot) -> bool {
        match (self.alias_groups.get(&a), self.alias_groups.get(&b)) {
            (Some(left), Some(right)) => left == right,
            _ => false,
        }
    }
}

pub(crate) fn analyze(lowered: &LoweredGraph, options: &StaticModuleOptions) -> StorageAnalysis {
    let types = slot_types(lowered);
    let live_ranges = compute_live_ranges(lowered);
    let (alias_groups, live_ranges) = compute_alias_groups(lowered, &types, live_ranges);
    let external = compute_external(lowered, &alias_groups);

    let mut plan = StoragePlan::default();
    if options.plans_memory() {
        let managed = managed_values(lowered, &external);
        let (slots, assignment) = assign_slots(&managed, &live_ranges, options.optimize_memory);
        plan.slots = slots;
        plan.assignment = assignment;
        if options.optimize_graph_output_memory {
            plan.planned_outputs = planned_outputs(lowered);
        }
    }

    let mut sharing = BTreeMap::new();
    for slot in &plan.slots {
        if slot.members.len() < 2 {
            continue;
        }
        for member in &slot.members {
            let others: Vec<ValueSlot> = slot
                .members
                .iter()
                .copied()
                .filter(|other| other != member)
                .collect();
            sharing.insert(*member, others);
        }
    }

    StorageAnalysis {
        live_ranges,
        alias_groups,
        external,
        plan,
        sharing,
    }
}

enum SlotKind<'a> {
    Declared(&'a ValueType),
    Constant(&'a Value),
}

impl SlotKind<'_> {
    fn may_hold_tensor(&self) -> bool {
        match self {
            SlotKind::Declared(ty) => matches!(
                ty,
                ValueType::Tensor(_) | ValueType::List(_) | ValueType::Tuple(_)
            ),
            SlotKind::Constant(value) => {
                matches!(value, Value::Tensor(_) | Value::List(_) | Value::Tuple(_))
            }
        }
    }
}

fn slot_types(lowered: &LoweredGraph) -> BTreeMap<ValueSlot, SlotKind<'_>> {
    let mut types = BTreeMap::new();
    for (index, value) in lowered.constants.iter().enumerate() {
        types.insert(ValueSlot::Constant(index), SlotKind::Constant(value));
    }
    for (index, ty) in lowered.input_types.iter().enumerate() {
        types.insert(ValueSlot::Input(index), SlotKind::Declared(ty));
    }
    for (node_index, node) in lowered.nodes.iter().enumerate() {
        for (output, ty) in node.output_types.iter().enumerate() {
            types.insert(ValueSlot::output(node_index, output), SlotKind::Declared(ty));
        }
    }
    types
}

fn compute_live_ranges(lowered: &LoweredGraph) -> BTreeMap<ValueSlot, LiveRange> {
    let mut ranges = BTreeMap::new();
    for index in 0..lowered.constants.len() {
        ranges.insert(ValueSlot::Constant(index), LiveRange::new(0, 0));
    }
    for index in 0..lowered.input_types.len() {
        ranges.insert(ValueSlot::Input(index), LiveRange::new(0, 0));
    }
    for (node_index, node) in lowered.nodes.iter().enumerate() {
        let pos = node_index + 1;
        for output in 0..node.num_outputs() {
            ranges.insert(ValueSlot::output(node_index, output), LiveRange::new(pos, pos));
        }
    }
    for (node_index, node) in lowered.nodes.iter().enumerate() {
        let pos = node_index + 1;
        for input in node.inputs() {
            if let Some(range) = ranges.get_mut(input) {
                range.end = range.end.max(pos);
            }
        }
    }
    let end = lowered.nodes.len() + 1;
    for output in &lowered.output_slots {
        if let Some(range) = ranges.get_mut(output) {
            range.end = range.end.max(end);
        }
    }
    ranges
}

fn compute_alias_groups(
    lowered: &LoweredGraph,
    types: &BTreeMap<ValueSlot, SlotKind<'_>>,
    mut ranges: BTreeMap<ValueSlot, LiveRange>,
) -> (BTreeMap<ValueSlot, usize>, BTreeMap<ValueSlot, LiveRange>) {
    let mut parents: HashMap<ValueSlot, ValueSlot> = HashMap::new();
    for key in ranges.keys() {
        parents.insert(*key, *key);
    }

    for (node_index, node) in lowered.nodes.iter().enumerate() {
        let sources: Vec<ValueSlot> = match node.alias() {
            AliasKind::None => continue,
            AliasKind::View => node.inputs().first().copied().into_iter().collect(),
            AliasKind::Contains => node
                .inputs()
                .iter()
                .copied()
                .filter(|input| types.get(input).is_some_and(SlotKind::may_hold_tensor))
                .collect(),
        };
        for output in 0..node.num_outputs() {
            let out_slot = ValueSlot::output(node_index, output);
            for source in &sources {
                let root_out = find_root(&parents, out_slot);
                let root_in = find_root(&parents, *source);
                if root_out != root_in {
                    parents.insert(root_out, root_in);
                }
            }
        }
    }

    let mut group_ids: HashMap<ValueSlot, usize> = HashMap::new();
    let mut group_ranges: Vec<LiveRange> = Vec::new();
    let mut groups = BTreeMap::new();
    for (key, range) in &ranges {
        let root = find_root(&parents, *key);
        let id = *group_ids.entry(root).or_insert_with(|| {
            group_ranges.push(*range);
            group_ranges.len() - 1
        });
        let group_range = &mut group_ranges[id];
        group_range.start = group_range.start.min(range.start);
        group_range.end = group_range.end.max(range.end);
        groups.insert(*key, id);
    }

    for (key, range) in ranges.iter_mut() {
        if let Some(id) = groups.get(key) {
            *range = group_ranges[*id];
        }
    }

    (groups, ranges)
}

fn compute_external(
    lowered: &LoweredGraph,
    alias_groups: &BTreeMap<ValueSlot, usize>,
) -> BTreeSet<ValueSlot> {
    let mut external: BTreeSet<ValueSlot> = alias_groups
        .keys()
        .copied()
        .filter(|slot| slot.is_constant() || slot.is_input())
        .collect();
    external.extend(lowered.output_slots.iter().copied());

    let external_groups: BTreeSet<usize> = external
        .iter()
        .filter_map(|slot| alias_groups.get(slot).copied())
        .collect();
    for (slot, group) in alias_groups {
        if external_groups.contains(group) {
            external.insert(*slot);
        }
    }
    external
}

fn static_tensor_bytes(ty: &ValueType) -> Option<usize> {
    ty.as_tensor()
        .and_then(|spec| spec.byte_len())
        .filter(|bytes| *bytes > 0)
}

fn managed_values(lowered: &LoweredGraph, external: &BTreeSet<ValueSlot>) -> Vec<(ValueSlot, usize)> {
    let mut managed = Vec::new();
    for (node_index, node) in lowered.nodes.iter().enumerate() {
        if !node.is_out_variant() {
            continue;
        }
        for (output, ty) in node.output_types().iter().enumerate() {
            let slot = ValueSlot::output(node_index, output);
            if external.contains(&slot) {
                continue;
            }
            if let Some(bytes) = static_tensor_bytes(ty) {
                managed.push((slot, bytes));
            }
        }
    }
    managed
}

fn planned_outputs(lowered: &LoweredGraph) -> Vec<PlannedOutput> {
    let mut seen = BTreeSet::new();
    let mut planned = Vec::new();
    for slot in &lowered.output_slots {
        let ValueSlot::NodeOutput { node, output } = *slot else {
            continue;
        };
        let Some(processed) = lowered.nodes.get(node) else {
            continue;
        };
        if !processed.is_out_variant() || !seen.insert(*slot) {
            continue;
        }
        if let Some(byte_len) = processed.output_types().get(output).and_then(static_tensor_bytes) {
            planned.push(PlannedOutput {
                value: *slot,
                byte_len,
            });
        }
    }
    planned
}

/// Packs managed values into slots.
///
/// A slot becomes free once its last occupant's range ends strictly before the candidate's start.
/// The candidate takes the most recently freed slot that is large enough, else grows the most
/// recently freed slot, else opens a new one.
fn assign_slots(
    managed: &[(ValueSlot, usize)],
    ranges: &BTreeMap<ValueSlot, LiveRange>,
    share: bool,
) -> (Vec<StorageSlot>, BTreeMap<ValueSlot, usize>) {
    let mut order: Vec<(ValueSlot, usize, LiveRange)> = managed
        .iter()
        .filter_map(|(slot, bytes)| ranges.get(slot).map(|range| (*slot, *bytes, *range)))
        .collect();
    order.sort_by_key(|(slot, _, range)| (range.start, *slot));

    let mut slots: Vec<StorageSlot> = Vec::new();
    let mut assignment = BTreeMap::new();
    let mut active: Vec<(usize, usize)> = Vec::new();
    let mut free: Vec<usize> = Vec::new();

    for (value, bytes, range) in order {
        if share {
            let mut released: Vec<(usize, usize)> = Vec::new();
            active.retain(|(end, slot)| {
                if *end < range.start {
                    released.push((*end, *slot));
                    false
                } else {
                    true
                }
            });
            released.sort_unstable();
            free.extend(released.into_iter().map(|(_, slot)| slot));
        }

        let reuse = free
            .iter()
            .rposition(|slot| slots[*slot].byte_len >= bytes)
            .or_else(|| free.len().checked_sub(1));
        let slot_id = match reuse {
            Some(position) => {
                let id = free.remove(position);
                let slot = &mut slots[id];
                slot.byte_len = slot.byte_len.max(bytes);
                slot.members.push(value);
                id
            }
            None => {
                let id = slots.len();
                slots.push(StorageSlot {
                    id,
                    byte_len: bytes,
                    members: vec![value],
                });
                id
            }
        };
        active.push((range.end, slot_id));
        assignment.insert(value, slot_id);
    }

    (slots, assignment)
}

fn find_root(parents: &HashMap<ValueSlot, ValueSlot>, key: ValueSlot) -> ValueSlot {
    let mut current = key;
    loop {
        let next = parents.get(&current).copied().unwrap_or(current);
        if next == current {
            return current;
        }
        current = next;
    }
}
