//! Math utilities for the Tank-Tread Bot.
//!
//! This module provides the color conversions used by the LED animation engine.

pub mod color;
