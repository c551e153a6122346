pub mod median_cut;
pub mod palette;
pub mod quantizer;

pub use median_cut::{median_cut, ColorHistogram};
pub use palette::{Palette, PaletteFrame, MAX_TABLE_SIZE};
pub use quantizer::{PaletteConfig, PaletteMode, QuantizedFrames, Quantizer};
