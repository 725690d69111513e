//! Bridge between an OpenPLC controller and a simulation key-value store.
//!
//! The bridge polls both endpoints into one thread-safe state store and
//! periodically translates values between the two address spaces:
//!
//! - **cache → controller**: named sensor tags become a contiguous
//!   input-register block write
//! - **controller → cache**: actuator coils become named boolean tags
//!
//! Two independent periodic loops ([`polling`] and [`sync`]) share the
//! store from `simbridge-state` as their only point of communication.
//! The [`testing`] harness runs acceptance scenarios against the live
//! endpoints and records the outcomes in the same store.

pub mod cache;
pub mod config;
pub mod connections;
pub mod modbus;
pub mod polling;
pub mod sync;
pub mod testing;
