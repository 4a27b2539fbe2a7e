/// Data layer: spot tables in, frame-indexed cell tables out.
///
/// Architecture:
/// ```text
///  {dataset}_{nnn}.csv / .parquet
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  discover datasets, parse subsets → Vec<SpotRecord>
///   └──────────┘
///        │
///        ▼
///   ┌──────────────┐
///   │  FrameTable   │  frames × cells, NaN = no sample
///   └──────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  longest flag-free crop, min length, reference mask
///   └──────────┘
/// ```

pub mod loader;
pub mod model;
pub mod filter;
