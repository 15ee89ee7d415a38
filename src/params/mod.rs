//! Parameter registry: descriptors, the descriptor table and the live store

pub mod descriptor;
pub mod store;
pub mod table;

pub use descriptor::{DisplayFormat, ParamFlags, ParamRole, ParameterDescriptor, SysexField};
pub use store::{ParameterStore, PROGRAM_NAME_LEN};
pub use table::{default_table, load_table, DescriptorTable};
