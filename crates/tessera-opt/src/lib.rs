//! Transformations over the flat contraction form.
//!
//! Lowering from the symbolic contraction model ([`flatten_contraction`]),
//! index folding to a fixed point ([`simplify_to_fixed_point`]),
//! aggregation vectorization ([`vectorize`]), and the tile-size search
//! ([`optimize_tiles`]) with its hardware description and performance
//! statistics.

mod flatten;
mod simplify;
mod tile;
mod vectorize;

pub use flatten::{flatten_contraction, FlattenError};
pub use simplify::{simplify_flat, simplify_to_fixed_point};
pub use tile::{compute_tile_stats, optimize_tiles, HardwareSettings, PerfStats};
pub use vectorize::vectorize;
