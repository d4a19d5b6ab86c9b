//! Reversible sketch structures.
//!
//! A pair of count-min-style sketches summarises one aggregation window:
//! the destination sketch keys on protected /24 prefixes and stores rich
//! [`DstCell`] aggregates, the source sketch keys on full source addresses
//! and stores plain [`BinCount32`] values. Both are reversible: a cell keeps
//! enough bit-level evidence to recover its dominant key by majority vote.

pub mod aggregate;
pub mod bincount;
pub mod countmin;

pub use aggregate::DstCell;
pub use bincount::BinCount32;
pub use countmin::Sketch;

/// Per-cell accumulator stored in a sketch.
///
/// Addition and saturating subtraction must behave componentwise so cells
/// can be aggregated across rows during reversal and drained back out.
pub trait CellValue: Clone + Default {
    /// Payload carried by one insert.
    type Update;

    /// Fold one keyed insert into the cell.
    fn absorb(&mut self, key: u32, update: &Self::Update);

    /// Total weight routed to this cell; zero means empty.
    fn total(&self) -> u32;

    /// Componentwise addition.
    fn merge(&mut self, other: &Self);

    /// Componentwise subtraction, never dropping any field below zero.
    fn saturating_sub(&mut self, other: &Self);
}

/// Snapshot of one window, handed from the ingress to the engine.
#[derive(Debug)]
pub struct SketchPair {
    pub dst: Sketch<DstCell>,
    pub src: Sketch<BinCount32>,
}
