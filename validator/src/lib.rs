// flowcheck — dataflow graph validator
//
// Library root. One module per validation phase; `validated` drives them.

pub mod config;
pub mod contract;
pub mod diag;
pub mod dot;
pub mod edges;
pub mod executor;
pub mod node;
pub mod packet_type;
pub mod pass;
pub mod registry;
pub mod tag_map;
pub mod topo;
pub mod typecheck;
pub mod validated;

pub use config::GraphConfig;
pub use diag::{Diagnostic, ErrorKind, ValidationError};
pub use packet_type::{Packet, PacketTypeDecl};
pub use registry::Registry;
pub use validated::ValidatedGraph;
