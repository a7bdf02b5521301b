// packet_type.rs — Packet type slots, wildcard links and consistency
//
// Every stream/side-packet slot of every node owns one entry in a shared
// `TypeArena`. Edges refer to slots by `TypeSlotId`, so linking a wildcard
// slot to a concrete one is observed by every edge that shares the slot.
//
// Preconditions: none.
// Postconditions: `root()` always terminates (links never form a loop).
// Failure modes: `FromStr` rejects malformed type expressions; packet
//                validation reports mismatches as strings.
// Side effects: none.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── Public types ────────────────────────────────────────────────────────────

/// Handle to a slot in a `TypeArena`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypeSlotId(pub u32);

/// What a slot accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeSpec {
    /// Not filled in by the node's contract.
    Unset,
    /// Wildcard; adopts the type of whatever it is connected to.
    Any,
    /// The slot never carries packets.
    NoPackets,
    Exact(String),
    OneOf(BTreeSet<String>),
}

/// A type specification plus whether empty packets are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketTypeDecl {
    pub spec: TypeSpec,
    pub optional: bool,
}

impl PacketTypeDecl {
    pub fn new(spec: TypeSpec) -> Self {
        PacketTypeDecl {
            spec,
            optional: false,
        }
    }

    pub fn any() -> Self {
        Self::new(TypeSpec::Any)
    }

    pub fn exact(name: impl Into<String>) -> Self {
        Self::new(TypeSpec::Exact(name.into()))
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

#[derive(Debug, Clone)]
struct PacketType {
    decl: PacketTypeDecl,
    same_as: Option<TypeSlotId>,
}

/// Owner of all type slots for one validation pass.
#[derive(Debug, Clone, Default)]
pub struct TypeArena {
    slots: Vec<PacketType>,
}

/// A value supplied from outside the graph (an input side packet).
///
/// A `null` payload is an empty packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    #[serde(rename = "type", default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl Packet {
    pub fn new(type_name: impl Into<String>, value: serde_json::Value) -> Self {
        Packet {
            type_name: Some(type_name.into()),
            value,
        }
    }

    pub fn empty() -> Self {
        Packet {
            type_name: None,
            value: serde_json::Value::Null,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_null()
    }
}

// ── Type expressions ────────────────────────────────────────────────────────

/// Error from parsing a type expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeExprError(pub String);

impl fmt::Display for TypeExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid type expression \"{}\"", self.0)
    }
}

impl std::error::Error for TypeExprError {}

fn is_type_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '<' | '>' | '.'))
}

impl FromStr for PacketTypeDecl {
    type Err = TypeExprError;

    /// `any`, `none`, `int`, `int|float`; a trailing `?` marks optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (body, optional) = match trimmed.strip_suffix('?') {
            Some(body) => (body.trim(), true),
            None => (trimmed, false),
        };
        let spec = match body {
            "any" | "*" => TypeSpec::Any,
            "none" => TypeSpec::NoPackets,
            _ if body.contains('|') => {
                let names: BTreeSet<String> = body.split('|').map(|n| n.trim().to_string()).collect();
                if names.iter().any(|n| !is_type_name(n)) {
                    return Err(TypeExprError(s.to_string()));
                }
                TypeSpec::OneOf(names)
            }
            _ if is_type_name(body) => TypeSpec::Exact(body.to_string()),
            _ => return Err(TypeExprError(s.to_string())),
        };
        Ok(PacketTypeDecl { spec, optional })
    }
}

// ── Consistency ─────────────────────────────────────────────────────────────

/// Whether two specs can be connected.
pub fn specs_consistent(a: &TypeSpec, b: &TypeSpec) -> bool {
    match (a, b) {
        (TypeSpec::Unset, _) | (_, TypeSpec::Unset) => false,
        (TypeSpec::Any, _) | (_, TypeSpec::Any) => true,
        (TypeSpec::NoPackets, other) | (other, TypeSpec::NoPackets) => {
            matches!(other, TypeSpec::NoPackets)
        }
        (TypeSpec::Exact(x), TypeSpec::Exact(y)) => x == y,
        (TypeSpec::Exact(x), TypeSpec::OneOf(set)) | (TypeSpec::OneOf(set), TypeSpec::Exact(x)) => {
            set.contains(x)
        }
        (TypeSpec::OneOf(x), TypeSpec::OneOf(y)) => x.intersection(y).next().is_some(),
    }
}

/// Human readable type name used in diagnostics.
pub fn debug_spec_name(spec: &TypeSpec) -> String {
    match spec {
        TypeSpec::Unset => "[Undefined Type]".to_string(),
        TypeSpec::Any => "[Any Type]".to_string(),
        TypeSpec::NoPackets => "[No Type]".to_string(),
        TypeSpec::Exact(name) => name.clone(),
        TypeSpec::OneOf(names) => {
            format!("OneOf<{}>", names.iter().cloned().collect::<Vec<_>>().join(", "))
        }
    }
}

// ── Arena ───────────────────────────────────────────────────────────────────

impl TypeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Allocate a slot that the contract has not filled yet.
    pub fn alloc_unset(&mut self) -> TypeSlotId {
        self.alloc(PacketTypeDecl::new(TypeSpec::Unset))
    }

    pub fn alloc(&mut self, decl: PacketTypeDecl) -> TypeSlotId {
        let id = TypeSlotId(self.slots.len() as u32);
        self.slots.push(PacketType {
            decl,
            same_as: None,
        });
        id
    }

    /// Drop every slot allocated at or after `len`.
    pub fn truncate(&mut self, len: usize) {
        self.slots.truncate(len);
    }

    /// Overwrite a slot's declaration and clear its link.
    pub fn set(&mut self, id: TypeSlotId, decl: PacketTypeDecl) {
        let slot = &mut self.slots[id.0 as usize];
        slot.decl = decl;
        slot.same_as = None;
    }

    /// Make `id` an alias of `target`. Ignored if it would close a loop.
    pub fn set_same_as(&mut self, id: TypeSlotId, target: TypeSlotId) -> bool {
        let mut current = Some(target);
        while let Some(slot) = current {
            if slot == id {
                return false;
            }
            current = self.slots[slot.0 as usize].same_as;
        }
        self.slots[id.0 as usize].same_as = Some(target);
        true
    }

    /// Follow `same_as` links to the slot that owns the type.
    pub fn root(&self, id: TypeSlotId) -> TypeSlotId {
        let mut current = id;
        while let Some(next) = self.slots[current.0 as usize].same_as {
            current = next;
        }
        current
    }

    /// The effective declaration of a slot.
    pub fn resolved(&self, id: TypeSlotId) -> &PacketTypeDecl {
        &self.slots[self.root(id).0 as usize].decl
    }

    pub fn is_set(&self, id: TypeSlotId) -> bool {
        self.slots[id.0 as usize].same_as.is_some()
            || self.slots[id.0 as usize].decl.spec != TypeSpec::Unset
    }

    pub fn is_any(&self, id: TypeSlotId) -> bool {
        self.resolved(id).spec == TypeSpec::Any
    }

    pub fn is_consistent_with(&self, a: TypeSlotId, b: TypeSlotId) -> bool {
        specs_consistent(&self.resolved(a).spec, &self.resolved(b).spec)
    }

    pub fn is_consistent_with_spec(&self, a: TypeSlotId, spec: &TypeSpec) -> bool {
        specs_consistent(&self.resolved(a).spec, spec)
    }

    pub fn debug_type_name(&self, id: TypeSlotId) -> String {
        debug_spec_name(&self.resolved(id).spec)
    }

    /// The concrete registered type name, if the slot resolves to one.
    pub fn registered_type_name(&self, id: TypeSlotId) -> Option<&str> {
        match &self.resolved(id).spec {
            TypeSpec::Exact(name) => Some(name),
            _ => None,
        }
    }

    /// Check a concrete packet against a slot.
    pub fn validate_packet(&self, id: TypeSlotId, packet: &Packet) -> Result<(), String> {
        let decl = self.resolved(id);
        if packet.is_empty() {
            return match decl.spec {
                TypeSpec::Any | TypeSpec::NoPackets => Ok(()),
                _ if decl.optional => Ok(()),
                _ => Err(format!(
                    "Empty packets are not allowed for type: {}",
                    debug_spec_name(&decl.spec)
                )),
            };
        }
        let stored = packet.type_name.as_deref().unwrap_or("[Unknown Type]");
        let ok = match &decl.spec {
            TypeSpec::Any => true,
            TypeSpec::Unset | TypeSpec::NoPackets => false,
            TypeSpec::Exact(name) => packet.type_name.as_deref() == Some(name.as_str()),
            TypeSpec::OneOf(names) => packet
                .type_name
                .as_deref()
                .is_some_and(|t| names.contains(t)),
        };
        if ok {
            Ok(())
        } else {
            Err(format!(
                "The Packet stores \"{}\", but \"{}\" was requested.",
                stored,
                debug_spec_name(&decl.spec)
            ))
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(s: &str) -> PacketTypeDecl {
        s.parse().unwrap()
    }

    #[test]
    fn parse_type_expressions() {
        assert_eq!(decl("any").spec, TypeSpec::Any);
        assert_eq!(decl("none").spec, TypeSpec::NoPackets);
        assert_eq!(decl("int").spec, TypeSpec::Exact("int".into()));
        assert!(decl("int?").optional);
        match decl("int | float").spec {
            TypeSpec::OneOf(set) => assert_eq!(set.len(), 2),
            other => panic!("expected OneOf, got {:?}", other),
        }
        assert!("".parse::<PacketTypeDecl>().is_err());
        assert!("a b".parse::<PacketTypeDecl>().is_err());
    }

    #[test]
    fn consistency_rules() {
        let int = TypeSpec::Exact("int".into());
        let float = TypeSpec::Exact("float".into());
        let either = decl("int|float").spec;
        assert!(specs_consistent(&TypeSpec::Any, &int));
        assert!(specs_consistent(&int, &TypeSpec::Any));
        assert!(specs_consistent(&int, &either));
        assert!(!specs_consistent(&int, &float));
        assert!(!specs_consistent(&TypeSpec::NoPackets, &int));
        assert!(specs_consistent(&TypeSpec::NoPackets, &TypeSpec::NoPackets));
        assert!(!specs_consistent(&TypeSpec::Unset, &TypeSpec::Any));
    }

    #[test]
    fn same_as_links_are_observed_through_root() {
        let mut arena = TypeArena::new();
        let concrete = arena.alloc(PacketTypeDecl::exact("int"));
        let wild = arena.alloc(PacketTypeDecl::any());
        let downstream = arena.alloc(PacketTypeDecl::any());
        assert!(arena.set_same_as(downstream, wild));
        assert!(arena.is_any(downstream));
        assert!(arena.set_same_as(wild, concrete));
        assert_eq!(arena.registered_type_name(downstream), Some("int"));
        assert_eq!(arena.debug_type_name(wild), "int");
    }

    #[test]
    fn same_as_refuses_loops() {
        let mut arena = TypeArena::new();
        let a = arena.alloc(PacketTypeDecl::any());
        let b = arena.alloc(PacketTypeDecl::any());
        assert!(arena.set_same_as(a, b));
        assert!(!arena.set_same_as(b, a));
        assert!(!arena.set_same_as(a, a));
        assert_eq!(arena.root(a), b);
    }

    #[test]
    fn truncate_drops_late_slots() {
        let mut arena = TypeArena::new();
        arena.alloc_unset();
        let mark = arena.len();
        arena.alloc(PacketTypeDecl::any());
        arena.truncate(mark);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn packet_validation() {
        let mut arena = TypeArena::new();
        let int = arena.alloc(PacketTypeDecl::exact("int"));
        let opt = arena.alloc(PacketTypeDecl::exact("int").optional());
        assert!(arena
            .validate_packet(int, &Packet::new("int", serde_json::json!(3)))
            .is_ok());
        let err = arena
            .validate_packet(int, &Packet::new("string", serde_json::json!("x")))
            .unwrap_err();
        assert!(err.contains("\"string\""), "{err}");
        assert!(arena.validate_packet(int, &Packet::empty()).is_err());
        assert!(arena.validate_packet(opt, &Packet::empty()).is_ok());
    }
}
