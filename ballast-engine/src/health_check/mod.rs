//! Background health probing.

pub mod prober;
