//! Hardware coordination core for the Tank-Tread Bot on no-std embedded platforms.
//!
//! For a runnable host harness against mock hardware, see the `mock-rig` crate.
#![no_std]

extern crate alloc;

pub mod utils;
