// contract.rs — Per-node type contract: four tag-indexed slot sets
//
// A contract is created from a node's declared streams and side packets
// (one unset type slot per entry) and then filled by the node's registered
// contract filler through `ContractContext`.
//
// Preconditions: the declared entries parse as `TAG:index:name`.
// Postconditions: one arena slot per declared entry, in tag map order.
// Failure modes: tag map errors from `Contract::new`; `unset_slots` lists
//                what the filler left empty.
// Side effects: allocates slots in the shared `TypeArena`.

use std::fmt;

use crate::packet_type::{PacketTypeDecl, TypeArena, TypeSlotId};
use crate::tag_map::{slot_label, SlotId, TagMap, TagMapError};

// ── Slot sets ───────────────────────────────────────────────────────────────

/// Which of the four slot sets of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotSet {
    InputStreams,
    OutputStreams,
    InputSidePackets,
    OutputSidePackets,
}

impl SlotSet {
    pub const ALL: [SlotSet; 4] = [
        SlotSet::InputStreams,
        SlotSet::OutputStreams,
        SlotSet::InputSidePackets,
        SlotSet::OutputSidePackets,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SlotSet::InputStreams => "input streams",
            SlotSet::OutputStreams => "output streams",
            SlotSet::InputSidePackets => "input side packets",
            SlotSet::OutputSidePackets => "output side packets",
        }
    }
}

impl fmt::Display for SlotSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A tag map plus one type slot per entry.
#[derive(Debug, Clone, Default)]
pub struct PacketTypeSet {
    tag_map: TagMap,
    slots: Vec<TypeSlotId>,
}

impl PacketTypeSet {
    fn new(tag_map: TagMap, arena: &mut TypeArena) -> Self {
        let slots = (0..tag_map.len()).map(|_| arena.alloc_unset()).collect();
        PacketTypeSet { tag_map, slots }
    }

    pub fn tag_map(&self) -> &TagMap {
        &self.tag_map
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, id: SlotId) -> TypeSlotId {
        self.slots[id.0]
    }

    pub fn get(&self, tag: &str, index: usize) -> Option<TypeSlotId> {
        self.tag_map.get_id(tag, index).map(|id| self.slots[id.0])
    }

    /// `(slot id, entry name, type slot)` in slot order.
    pub fn entries(&self) -> impl Iterator<Item = (SlotId, &str, TypeSlotId)> + '_ {
        self.tag_map
            .ids()
            .map(move |id| (id, self.tag_map.name(id), self.slots[id.0]))
    }

    /// Labels of every slot whose type was never filled.
    pub fn unset_slots(&self, arena: &TypeArena) -> Vec<String> {
        self.tag_map
            .ids()
            .filter(|id| !arena.is_set(self.slots[id.0]))
            .map(|id| slot_label(&self.tag_map, id))
            .collect()
    }
}

// ── Contract ────────────────────────────────────────────────────────────────

/// Resolved type contract of one node.
#[derive(Debug, Clone, Default)]
pub struct Contract {
    pub inputs: PacketTypeSet,
    pub outputs: PacketTypeSet,
    pub input_side_packets: PacketTypeSet,
    pub output_side_packets: PacketTypeSet,
    pub options: serde_json::Value,
    pub node_name: String,
    pub input_stream_handler: Option<String>,
}

/// Declared entries a contract is built from.
#[derive(Debug, Clone, Copy, Default)]
pub struct Declared<'a> {
    pub inputs: &'a [String],
    pub outputs: &'a [String],
    pub input_side_packets: &'a [String],
    pub output_side_packets: &'a [String],
}

impl Contract {
    /// Build the tag maps and allocate one unset slot per entry.
    pub fn new(
        declared: Declared<'_>,
        options: serde_json::Value,
        arena: &mut TypeArena,
    ) -> Result<Contract, (SlotSet, TagMapError)> {
        let make = |set: SlotSet, entries: &[String]| {
            TagMap::create(entries).map_err(|e| (set, e))
        };
        let inputs = make(SlotSet::InputStreams, declared.inputs)?;
        let outputs = make(SlotSet::OutputStreams, declared.outputs)?;
        let in_side = make(SlotSet::InputSidePackets, declared.input_side_packets)?;
        let out_side = make(SlotSet::OutputSidePackets, declared.output_side_packets)?;
        Ok(Contract {
            inputs: PacketTypeSet::new(inputs, arena),
            outputs: PacketTypeSet::new(outputs, arena),
            input_side_packets: PacketTypeSet::new(in_side, arena),
            output_side_packets: PacketTypeSet::new(out_side, arena),
            options,
            node_name: String::new(),
            input_stream_handler: None,
        })
    }

    pub fn set(&self, which: SlotSet) -> &PacketTypeSet {
        match which {
            SlotSet::InputStreams => &self.inputs,
            SlotSet::OutputStreams => &self.outputs,
            SlotSet::InputSidePackets => &self.input_side_packets,
            SlotSet::OutputSidePackets => &self.output_side_packets,
        }
    }
}

// ── Filler context ──────────────────────────────────────────────────────────

/// What a contract filler sees: the node's options and tag maps, and a way
/// to declare slot types.
pub struct ContractContext<'a> {
    contract: &'a Contract,
    arena: &'a mut TypeArena,
}

impl<'a> ContractContext<'a> {
    pub fn new(contract: &'a Contract, arena: &'a mut TypeArena) -> Self {
        ContractContext { contract, arena }
    }

    pub fn options(&self) -> &serde_json::Value {
        &self.contract.options
    }

    pub fn tag_map(&self, which: SlotSet) -> &TagMap {
        self.contract.set(which).tag_map()
    }

    /// Set the type of one slot.
    pub fn set(&mut self, which: SlotSet, id: SlotId, decl: PacketTypeDecl) {
        let slot = self.contract.set(which).slot(id);
        self.arena.set(slot, decl);
    }

    /// Set every slot under `tag` to `decl`. Returns how many were set.
    pub fn set_tag(&mut self, which: SlotSet, tag: &str, decl: &PacketTypeDecl) -> usize {
        let set = self.contract.set(which);
        let slots: Vec<TypeSlotId> = (0..set.tag_map().num_entries_for_tag(tag))
            .filter_map(|index| set.get(tag, index))
            .collect();
        for &slot in &slots {
            self.arena.set(slot, decl.clone());
        }
        slots.len()
    }

    /// Declare that slot `id` carries the same type as slot `target`.
    pub fn set_same_as(
        &mut self,
        which: SlotSet,
        id: SlotId,
        target_set: SlotSet,
        target: SlotId,
    ) -> Result<(), String> {
        let slot = self.contract.set(which).slot(id);
        let target_slot = self.contract.set(target_set).slot(target);
        if self.arena.set_same_as(slot, target_slot) {
            Ok(())
        } else {
            Err(format!(
                "{} {} cannot alias {} {}: the link would loop",
                which,
                slot_label(self.contract.set(which).tag_map(), id),
                target_set,
                slot_label(self.contract.set(target_set).tag_map(), target)
            ))
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn new_contract_has_unset_slots() {
        let mut arena = TypeArena::new();
        let inputs = strings(&["a", "VIDEO:b"]);
        let outputs = strings(&["c"]);
        let contract = Contract::new(
            Declared {
                inputs: &inputs,
                outputs: &outputs,
                ..Default::default()
            },
            serde_json::Value::Null,
            &mut arena,
        )
        .unwrap();
        assert_eq!(arena.len(), 3);
        assert_eq!(contract.inputs.unset_slots(&arena), vec![":0", "VIDEO:0"]);
        assert!(contract.input_side_packets.is_empty());
    }

    #[test]
    fn bad_entry_reports_its_slot_set() {
        let mut arena = TypeArena::new();
        let outputs = strings(&["Bad-Name"]);
        let err = Contract::new(
            Declared {
                outputs: &outputs,
                ..Default::default()
            },
            serde_json::Value::Null,
            &mut arena,
        )
        .unwrap_err();
        assert_eq!(err.0, SlotSet::OutputStreams);
    }

    #[test]
    fn context_sets_types_and_links() {
        let mut arena = TypeArena::new();
        let inputs = strings(&["IN:0:a", "IN:1:b"]);
        let outputs = strings(&["OUT:c"]);
        let contract = Contract::new(
            Declared {
                inputs: &inputs,
                outputs: &outputs,
                ..Default::default()
            },
            serde_json::Value::Null,
            &mut arena,
        )
        .unwrap();
        {
            let mut cc = ContractContext::new(&contract, &mut arena);
            assert_eq!(
                cc.set_tag(SlotSet::InputStreams, "IN", &PacketTypeDecl::exact("int")),
                2
            );
            let out = cc.tag_map(SlotSet::OutputStreams).get_id("OUT", 0).unwrap();
            let first = cc.tag_map(SlotSet::InputStreams).get_id("IN", 0).unwrap();
            cc.set_same_as(SlotSet::OutputStreams, out, SlotSet::InputStreams, first)
                .unwrap();
        }
        assert!(contract.inputs.unset_slots(&arena).is_empty());
        let out = contract.outputs.get("OUT", 0).unwrap();
        assert_eq!(arena.registered_type_name(out), Some("int"));
    }
}
