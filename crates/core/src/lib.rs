pub mod config;
pub mod domain;
pub mod errors;
pub mod scoring;

pub use domain::abandonment::{AbandonmentId, CartAbandonment};
pub use domain::cart::{
    Cart, CartId, CartItem, CartItemId, CartOwner, CartSnapshot, ProductId, SessionId, UserId,
};
pub use domain::event::{CartEvent, CartEventId, CartEventKind};
pub use domain::score::UserScore;
pub use errors::DomainError;
pub use scoring::tiers::{DiscountTier, ScoreBand};
pub use scoring::{ComponentScores, ScoreBreakdown, ScoreCalculator, ScoringWeights, UserActivity};
