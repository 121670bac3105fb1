// src/core/wire/mod.rs

//! Binary wire protocol between clients (and range servers reporting
//! recovery progress) and the master, framed with [`MasterFrameCodec`].

mod codec;
mod frame;

pub use codec::{MasterFrameCodec, encode_to_vec};
pub use frame::MasterFrame;
