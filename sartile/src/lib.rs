//! Streaming raster engine for remote NISAR GCOV products.
//!
//! A product is explored over HTTP byte-range requests without ever
//! downloading the whole file: the HDF5 container is parsed lazily,
//! tiles are decoded on demand, and RGB composites and statistics are
//! built from the same cached tile path.
//!
//! ```rust,no_run
//! use sartile::{CancelToken, Frequency, Session, TileKey};
//!
//! #[tokio::main]
//! async fn main() -> sartile::Result<()> {
//!     let session = Session::new();
//!     let product = session.open_product("https://example.com/gcov.h5").await?;
//!
//!     let pol = product.polarizations(Frequency::A)[0];
//!     let path = product.dataset_path(Frequency::A, pol)?;
//!     let tile = product
//!         .tile_service()
//!         .get_tile(&TileKey::new(path, 4, 3, 5), &CancelToken::new())
//!         .await?;
//!     println!("{}x{} pixels over {}", tile.width, tile.height, tile.bounds);
//!     Ok(())
//! }
//! ```

pub mod composite;
pub mod lod;
pub mod product;
pub mod session;
pub mod stats;
pub mod tile_service;

pub use composite::{ChannelFormula, Preset, default_presets};
pub use lod::TileGrid;
pub use product::{Identification, Product};
pub use session::{Session, SessionOptions};
pub use stats::{ChannelStats, StatsOptions, ViewportStats, auto_contrast, sample_channel_stats};
pub use tile_service::{RgbTileResult, TileResult, TileService};

pub use sartile_core::utils::CancelToken;
pub use sartile_core::{CompositeKey, EngineError, Frequency, GeoBBox, Polarization, Result, TileKey};

/// Opens a product with a default session. Embedders wanting shared
/// caches across products or custom tuning create a [`Session`] first.
pub async fn open_product(url: &str) -> Result<Product> {
	Session::new().open_product(url).await
}
