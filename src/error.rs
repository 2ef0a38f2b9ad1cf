// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Topup Engine Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Error types for order and promo-code processing.
//!
//! Every failure in this crate is per-request and reported to the caller as a
//! structured reason. Nothing here is fatal to the process.

use rust_decimal::Decimal;
use thiserror::Error;

/// Order and redemption processing errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Referenced order, game, package, or user does not exist
    #[error("not found")]
    NotFound,

    /// Promo code does not exist, is inactive, or is outside its validity window
    #[error("promo code is invalid or expired")]
    InvalidOrExpired,

    /// Promo code has reached its global usage limit
    #[error("promo code has been fully redeemed")]
    GloballyExhausted,

    /// Order amount is below the promo's minimum
    #[error("order amount is below the promo minimum of {minimum}")]
    BelowMinimum { minimum: Decimal },

    /// Caller has reached the per-user usage limit for this promo
    #[error("promo usage limit reached for this user")]
    UserLimitReached,

    /// Promo is not applicable to the selected game
    #[error("promo code is not applicable to this game")]
    GameNotEligible,

    /// Illegal order status transition (including double-cancel)
    #[error("invalid order state for this operation")]
    InvalidState,

    /// Lost a commit-time race on a shared promo counter.
    ///
    /// Callers should treat this like an exhausted limit rather than
    /// retrying blindly.
    #[error("concurrent redemption conflict")]
    ConcurrencyConflict,

    /// Persistence layer is unreachable; the caller may retry
    #[error("storage unavailable")]
    StorageUnavailable,

    /// Order amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Promo definition is malformed (negative value or inverted date range)
    #[error("invalid promo definition")]
    InvalidPromo,

    /// A promo with this code is already registered
    #[error("duplicate promo code")]
    DuplicatePromo,

    /// Payment gateway declined or failed the charge
    #[error("payment failed: {0}")]
    PaymentFailed(String),

    /// In-game top-up failed after a successful charge
    #[error("top-up failed: {0}")]
    TopupFailed(String),
}

#[cfg(test)]
mod tests {
    use super::EngineError;
    use rust_decimal_macros::dec;

    #[test]
    fn error_display_messages() {
        assert_eq!(EngineError::NotFound.to_string(), "not found");
        assert_eq!(
            EngineError::InvalidOrExpired.to_string(),
            "promo code is invalid or expired"
        );
        assert_eq!(
            EngineError::GloballyExhausted.to_string(),
            "promo code has been fully redeemed"
        );
        assert_eq!(
            EngineError::BelowMinimum { minimum: dec!(200) }.to_string(),
            "order amount is below the promo minimum of 200"
        );
        assert_eq!(
            EngineError::UserLimitReached.to_string(),
            "promo usage limit reached for this user"
        );
        assert_eq!(
            EngineError::GameNotEligible.to_string(),
            "promo code is not applicable to this game"
        );
        assert_eq!(
            EngineError::InvalidState.to_string(),
            "invalid order state for this operation"
        );
        assert_eq!(
            EngineError::ConcurrencyConflict.to_string(),
            "concurrent redemption conflict"
        );
        assert_eq!(
            EngineError::StorageUnavailable.to_string(),
            "storage unavailable"
        );
        assert_eq!(
            EngineError::PaymentFailed("card declined".into()).to_string(),
            "payment failed: card declined"
        );
    }

    #[test]
    fn below_minimum_carries_the_minimum() {
        let err = EngineError::BelowMinimum { minimum: dec!(150.50) };
        assert!(err.to_string().contains("150.50"));
    }

    #[test]
    fn errors_are_cloneable() {
        let error = EngineError::UserLimitReached;
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
