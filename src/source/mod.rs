pub mod provider;
pub mod sofascore;

#[cfg(test)]
pub mod fake;

pub use provider::StatsSource;
pub use sofascore::{ClientSettings, SofaScoreClient};
