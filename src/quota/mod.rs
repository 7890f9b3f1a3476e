// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-18

//! Raw quota responses into canonical snapshots, plus display smoothing.

mod hysteresis;
mod normalize;
mod refresh;

pub use hysteresis::{apply_hysteresis, QuotaDisplayCache, HYSTERESIS_BAND};
pub use normalize::{
    canonical_name, format_reset, normalize, ModelQuotaInfo, RawModel, RawQuotaResponse,
    CANONICAL_ORDER,
};
pub use refresh::{ensure_fresh, refresh_identity, RefreshError};
