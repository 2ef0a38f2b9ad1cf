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

//! Discount computation.
//!
//! [`compute`] is a pure function from a promo's discount parameters and a
//! pre-discount order amount to the discount granted. The result is rounded
//! to currency minor units and is always within `[0, amount]`, so the final
//! order total can never go negative.

use crate::promo::PromoKind;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Currency minor-unit precision (2 decimal places).
pub const DECIMAL_PRECISION: u32 = 2;

/// Computes the discount for an order of `amount`.
///
/// - [`PromoKind::Percentage`]: `amount * value / 100`, clipped to
///   `max_discount` when set.
/// - [`PromoKind::FixedAmount`]: `min(value, amount)`.
/// - [`PromoKind::BonusAmount`]: treated as a capped flat discount, same as
///   `FixedAmount`. Whether a bonus should reduce the price or grant in-kind
///   currency is a product decision still pending; the capped-discount
///   reading keeps totals non-negative either way.
///
/// `max_discount` is only meaningful for `Percentage` and is ignored for the
/// flat kinds.
pub fn compute(
    kind: PromoKind,
    value: Decimal,
    max_discount: Option<Decimal>,
    amount: Decimal,
) -> Decimal {
    let raw = match kind {
        PromoKind::Percentage => {
            let discount = amount * value / dec!(100);
            match max_discount {
                Some(cap) => discount.min(cap),
                None => discount,
            }
        }
        PromoKind::FixedAmount | PromoKind::BonusAmount => value.min(amount),
    };

    // Order of min/max matters: cap to the order amount first, then floor at
    // zero, so a negative intermediate can never leak through.
    raw.min(amount).max(Decimal::ZERO).round_dp(DECIMAL_PRECISION)
}
