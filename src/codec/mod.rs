//! Wire codec: NRPN groups and patch dumps

pub mod nrpn;
pub mod sysex;

pub use nrpn::{NrpnDecoder, NrpnEvent};
pub use sysex::{
    classify, decode_patch, dump_request, encode_patch, parse_patch, PatchImage, SysexFraming,
    SysexKind, BLOCK_LEN, NAME_OFFSET, PARAMS_START,
};
