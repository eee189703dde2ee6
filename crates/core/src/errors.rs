use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("cart item quantity must be at least 1, got {quantity}")]
    InvalidQuantity { quantity: u32 },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}
