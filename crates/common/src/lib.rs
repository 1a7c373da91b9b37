// coedit-common: wire types and codecs shared by the coedit crates

pub mod codec;
pub mod crdt;
pub mod presence;
pub mod protocol;
