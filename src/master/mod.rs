// src/master/mod.rs

//! The master daemon itself: wires the operation processor, connection
//! manager, balance plan authority, response manager, recovery registry,
//! and metalog into a single collaborator every client connection talks
//! to through [`Gateway`].

pub mod gateway;

pub use gateway::Gateway;
