//! GRIDCALC - Spreadsheet Calculation Engine
//!
//! The core of a spreadsheet: a sparse grid of cells holding text or
//! arithmetic formulas over cell references, with dependency tracking,
//! cycle rejection, and lazily cached evaluation.

pub mod domain;

pub use domain::*;
