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

//! Promo-code definitions and registry.
//!
//! Each registered promo carries its own mutex-guarded state so that the
//! validate-then-increment sequence in order creation can be serialized per
//! code: the engine takes the row lock, re-runs every eligibility check, and
//! only then records usage and bumps the counter. Lookups are
//! case-insensitive (codes are normalized to uppercase on registration and
//! lookup).

use crate::base::GameId;
use crate::discount;
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

/// How a promo's `value` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromoKind {
    /// `value` is a percentage of the order amount, optionally capped.
    Percentage,
    /// `value` is a flat discount, never more than the order amount.
    FixedAmount,
    /// `value` is a flat bonus, currently applied as a capped discount.
    BonusAmount,
}

/// A promo-code definition as supplied by an operator.
///
/// `code` is normalized to uppercase when registered. `valid_from` and
/// `valid_until` are inclusive bounds.
#[derive(Debug, Clone)]
pub struct PromoDefinition {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub kind: PromoKind,
    pub value: Decimal,
    pub min_order_amount: Decimal,
    pub max_discount: Option<Decimal>,
    pub global_usage_limit: Option<u32>,
    pub per_user_usage_limit: u32,
    /// Games the promo applies to. Empty means all games.
    pub applicable_games: HashSet<GameId>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub active: bool,
}

impl PromoDefinition {
    /// Creates a definition with the common defaults: no minimum, no caps,
    /// one use per user, all games, active.
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        kind: PromoKind,
        value: Decimal,
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            description: None,
            kind,
            value,
            min_order_amount: Decimal::ZERO,
            max_discount: None,
            global_usage_limit: None,
            per_user_usage_limit: 1,
            applicable_games: HashSet::new(),
            valid_from,
            valid_until,
            active: true,
        }
    }

    pub fn with_min_order_amount(mut self, minimum: Decimal) -> Self {
        self.min_order_amount = minimum;
        self
    }

    pub fn with_max_discount(mut self, cap: Decimal) -> Self {
        self.max_discount = Some(cap);
        self
    }

    pub fn with_global_usage_limit(mut self, limit: u32) -> Self {
        self.global_usage_limit = Some(limit);
        self
    }

    pub fn with_per_user_usage_limit(mut self, limit: u32) -> Self {
        self.per_user_usage_limit = limit;
        self
    }

    pub fn with_applicable_games(mut self, games: impl IntoIterator<Item = GameId>) -> Self {
        self.applicable_games = games.into_iter().collect();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Normalizes a user-entered code for registration and lookup.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Mutex-guarded promo state. Held only for the duration of a single
/// check or commit, never across collaborator calls.
#[derive(Debug, PartialEq)]
pub(crate) struct PromoData {
    pub(crate) code: String,
    pub(crate) name: String,
    pub(crate) description: Option<String>,
    pub(crate) kind: PromoKind,
    pub(crate) value: Decimal,
    pub(crate) min_order_amount: Decimal,
    pub(crate) max_discount: Option<Decimal>,
    pub(crate) global_usage_limit: Option<u32>,
    pub(crate) global_usage_count: u32,
    pub(crate) per_user_usage_limit: u32,
    pub(crate) applicable_games: HashSet<GameId>,
    pub(crate) valid_from: DateTime<Utc>,
    pub(crate) valid_until: DateTime<Utc>,
    pub(crate) active: bool,
}

impl PromoData {
    fn from_definition(code: String, def: PromoDefinition) -> Self {
        Self {
            code,
            name: def.name,
            description: def.description,
            kind: def.kind,
            value: def.value,
            min_order_amount: def.min_order_amount,
            max_discount: def.max_discount,
            global_usage_limit: def.global_usage_limit,
            global_usage_count: 0,
            per_user_usage_limit: def.per_user_usage_limit,
            applicable_games: def.applicable_games,
            valid_from: def.valid_from,
            valid_until: def.valid_until,
            active: def.active,
        }
    }

    fn assert_invariants(&self) {
        if let Some(limit) = self.global_usage_limit {
            debug_assert!(
                self.global_usage_count <= limit,
                "Invariant violated: usage count {} exceeds limit {} for {}",
                self.global_usage_count,
                limit,
                self.code
            );
        }
    }

    /// Runs the eligibility checks in their fixed order. First failure wins,
    /// which keeps user-facing reasons deterministic.
    ///
    /// `user_active_uses` is the caller's count of non-reversed redemptions
    /// for this (user, promo) pair. During a commit it must be read under
    /// the same row lock this data sits behind.
    pub(crate) fn check_eligibility(
        &self,
        game_id: GameId,
        amount: Decimal,
        user_active_uses: u32,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if !self.active || now < self.valid_from || now > self.valid_until {
            return Err(EngineError::InvalidOrExpired);
        }
        if let Some(limit) = self.global_usage_limit {
            if self.global_usage_count >= limit {
                return Err(EngineError::GloballyExhausted);
            }
        }
        if amount < self.min_order_amount {
            return Err(EngineError::BelowMinimum {
                minimum: self.min_order_amount,
            });
        }
        if user_active_uses >= self.per_user_usage_limit {
            return Err(EngineError::UserLimitReached);
        }
        if !self.applicable_games.is_empty() && !self.applicable_games.contains(&game_id) {
            return Err(EngineError::GameNotEligible);
        }
        Ok(())
    }

    /// Computes the discount this promo grants on `amount`.
    pub(crate) fn quote(&self, amount: Decimal) -> Decimal {
        discount::compute(self.kind, self.value, self.max_discount, amount)
    }

    pub(crate) fn increment_usage(&mut self) {
        self.global_usage_count += 1;
        self.assert_invariants();
    }

    /// Decrements the counter on reversal. Saturates at zero so a stray
    /// double-decrement cannot underflow the counter.
    pub(crate) fn decrement_usage(&mut self) {
        self.global_usage_count = self.global_usage_count.saturating_sub(1);
        self.assert_invariants();
    }
}

/// A registered promo code with its usage counter.
#[derive(Debug)]
pub struct PromoCode {
    inner: Mutex<PromoData>,
}

impl PartialEq for PromoCode {
    fn eq(&self, other: &Self) -> bool {
        *self.inner.lock() == *other.inner.lock()
    }
}

impl PromoCode {
    fn new(code: String, def: PromoDefinition) -> Self {
        Self {
            inner: Mutex::new(PromoData::from_definition(code, def)),
        }
    }

    /// The normalized code string.
    pub fn code(&self) -> String {
        self.inner.lock().code.clone()
    }

    pub fn global_usage_count(&self) -> u32 {
        self.inner.lock().global_usage_count
    }

    pub fn active(&self) -> bool {
        self.inner.lock().active
    }

    /// Takes the row lock. The commit path in order creation holds this
    /// across re-validation, usage recording, and the counter increment.
    pub(crate) fn lock(&self) -> MutexGuard<'_, PromoData> {
        self.inner.lock()
    }
}

impl Serialize for PromoCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("PromoCode", 11)?;
        state.serialize_field("code", &data.code)?;
        state.serialize_field("name", &data.name)?;
        state.serialize_field("kind", &data.kind)?;
        state.serialize_field("value", &data.value)?;
        state.serialize_field("min_order_amount", &data.min_order_amount)?;
        state.serialize_field("max_discount", &data.max_discount)?;
        state.serialize_field("global_usage_limit", &data.global_usage_limit)?;
        state.serialize_field("global_usage_count", &data.global_usage_count)?;
        state.serialize_field("per_user_usage_limit", &data.per_user_usage_limit)?;
        state.serialize_field("valid_until", &data.valid_until)?;
        state.serialize_field("active", &data.active)?;
        state.end()
    }
}

/// Registry of promo codes keyed by normalized code.
#[derive(Debug, Default)]
pub struct PromoRegistry {
    promos: DashMap<String, Arc<PromoCode>>,
}

impl PromoRegistry {
    pub fn new() -> Self {
        Self {
            promos: DashMap::new(),
        }
    }

    /// Registers a promo definition.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidPromo`] for a negative value, an inverted
    ///   validity window, or a zero per-user limit.
    /// - [`EngineError::DuplicatePromo`] if the normalized code is taken.
    pub fn register(&self, def: PromoDefinition) -> Result<Arc<PromoCode>, EngineError> {
        if def.value < Decimal::ZERO
            || def.valid_from > def.valid_until
            || def.per_user_usage_limit == 0
        {
            return Err(EngineError::InvalidPromo);
        }

        let code = normalize_code(&def.code);
        if code.is_empty() {
            return Err(EngineError::InvalidPromo);
        }

        // Entry API keeps check-and-insert atomic under concurrent registration.
        match self.promos.entry(code.clone()) {
            Entry::Occupied(_) => Err(EngineError::DuplicatePromo),
            Entry::Vacant(entry) => {
                let promo = Arc::new(PromoCode::new(code, def));
                entry.insert(Arc::clone(&promo));
                Ok(promo)
            }
        }
    }

    /// Case-insensitive lookup.
    pub fn find(&self, code: &str) -> Option<Arc<PromoCode>> {
        self.promos.get(&normalize_code(code)).map(|p| Arc::clone(&p))
    }

    /// Decrements a promo's usage counter, e.g. when a redemption is
    /// reversed. Unknown codes are ignored (the promo may have been
    /// deactivated and dropped since the order was placed).
    pub(crate) fn decrement_usage(&self, code: &str) {
        if let Some(promo) = self.promos.get(&normalize_code(code)) {
            promo.lock().decrement_usage();
        }
    }

    pub fn len(&self) -> usize {
        self.promos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.promos.is_empty()
    }

    /// Iterates over all registered promos.
    pub fn iter(
        &self,
    ) -> impl Iterator<Item = dashmap::mapref::multiple::RefMulti<'_, String, Arc<PromoCode>>> {
        self.promos.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 59).unwrap(),
        )
    }

    fn mid_year() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).unwrap()
    }

    fn percent_promo() -> PromoDefinition {
        let (from, until) = window();
        PromoDefinition::new("save15", "15% off", PromoKind::Percentage, dec!(15), from, until)
    }

    #[test]
    fn code_is_normalized_on_registration() {
        let registry = PromoRegistry::new();
        let promo = registry.register(percent_promo()).unwrap();
        assert_eq!(promo.code(), "SAVE15");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = PromoRegistry::new();
        registry.register(percent_promo()).unwrap();

        assert!(registry.find("save15").is_some());
        assert!(registry.find("Save15").is_some());
        assert!(registry.find(" SAVE15 ").is_some());
        assert!(registry.find("OTHER").is_none());
    }

    #[test]
    fn duplicate_code_rejected() {
        let registry = PromoRegistry::new();
        registry.register(percent_promo()).unwrap();

        let mut dup = percent_promo();
        dup.code = "Save15".to_string(); // same code after normalization
        assert_eq!(registry.register(dup), Err(EngineError::DuplicatePromo));
    }

    #[test]
    fn invalid_definitions_rejected() {
        let registry = PromoRegistry::new();
        let (from, until) = window();

        let negative =
            PromoDefinition::new("NEG", "neg", PromoKind::Percentage, dec!(-5), from, until);
        assert_eq!(registry.register(negative), Err(EngineError::InvalidPromo));

        let inverted =
            PromoDefinition::new("INV", "inv", PromoKind::Percentage, dec!(5), until, from);
        assert_eq!(registry.register(inverted), Err(EngineError::InvalidPromo));

        let blank = PromoDefinition::new("  ", "blank", PromoKind::Percentage, dec!(5), from, until);
        assert_eq!(registry.register(blank), Err(EngineError::InvalidPromo));
    }

    #[test]
    fn eligibility_inactive_or_out_of_window() {
        let registry = PromoRegistry::new();
        let promo = registry.register(percent_promo().inactive()).unwrap();
        let result = promo.lock().check_eligibility(GameId(1), dec!(100), 0, mid_year());
        assert_eq!(result, Err(EngineError::InvalidOrExpired));

        let (from, _) = window();
        let before_start = from - chrono::Duration::seconds(1);
        let registry = PromoRegistry::new();
        let promo = registry.register(percent_promo()).unwrap();
        let result = promo
            .lock()
            .check_eligibility(GameId(1), dec!(100), 0, before_start);
        assert_eq!(result, Err(EngineError::InvalidOrExpired));
    }

    #[test]
    fn eligibility_window_bounds_are_inclusive() {
        let registry = PromoRegistry::new();
        let promo = registry.register(percent_promo()).unwrap();
        let (from, until) = window();

        assert!(promo.lock().check_eligibility(GameId(1), dec!(100), 0, from).is_ok());
        assert!(promo.lock().check_eligibility(GameId(1), dec!(100), 0, until).is_ok());
    }

    #[test]
    fn eligibility_global_cap() {
        let registry = PromoRegistry::new();
        let promo = registry
            .register(percent_promo().with_global_usage_limit(1))
            .unwrap();

        promo.lock().increment_usage();
        let result = promo.lock().check_eligibility(GameId(1), dec!(100), 0, mid_year());
        assert_eq!(result, Err(EngineError::GloballyExhausted));
    }

    #[test]
    fn eligibility_below_minimum_carries_minimum() {
        let registry = PromoRegistry::new();
        let promo = registry
            .register(percent_promo().with_min_order_amount(dec!(200)))
            .unwrap();

        let result = promo.lock().check_eligibility(GameId(1), dec!(199.99), 0, mid_year());
        assert_eq!(result, Err(EngineError::BelowMinimum { minimum: dec!(200) }));
    }

    #[test]
    fn eligibility_per_user_limit() {
        let registry = PromoRegistry::new();
        let promo = registry.register(percent_promo()).unwrap();

        // Default per-user limit is 1
        let result = promo.lock().check_eligibility(GameId(1), dec!(100), 1, mid_year());
        assert_eq!(result, Err(EngineError::UserLimitReached));
    }

    #[test]
    fn eligibility_game_scope() {
        let registry = PromoRegistry::new();
        let promo = registry
            .register(percent_promo().with_applicable_games([GameId(7)]))
            .unwrap();

        assert!(promo.lock().check_eligibility(GameId(7), dec!(100), 0, mid_year()).is_ok());
        assert_eq!(
            promo.lock().check_eligibility(GameId(8), dec!(100), 0, mid_year()),
            Err(EngineError::GameNotEligible)
        );
    }

    #[test]
    fn empty_game_scope_applies_to_all_games() {
        let registry = PromoRegistry::new();
        let promo = registry.register(percent_promo()).unwrap();
        assert!(promo.lock().check_eligibility(GameId(999), dec!(100), 0, mid_year()).is_ok());
    }

    #[test]
    fn check_order_expiry_wins_over_other_failures() {
        // An expired promo reports InvalidOrExpired even when the amount is
        // also below minimum and the game is out of scope.
        let registry = PromoRegistry::new();
        let promo = registry
            .register(
                percent_promo()
                    .inactive()
                    .with_min_order_amount(dec!(500))
                    .with_applicable_games([GameId(1)]),
            )
            .unwrap();

        let result = promo.lock().check_eligibility(GameId(2), dec!(10), 5, mid_year());
        assert_eq!(result, Err(EngineError::InvalidOrExpired));
    }

    #[test]
    fn decrement_saturates_at_zero() {
        let registry = PromoRegistry::new();
        let promo = registry.register(percent_promo()).unwrap();

        promo.lock().decrement_usage();
        assert_eq!(promo.global_usage_count(), 0);

        promo.lock().increment_usage();
        registry.decrement_usage("save15");
        assert_eq!(promo.global_usage_count(), 0);
    }

    #[test]
    fn serializes_counter_state() {
        let registry = PromoRegistry::new();
        let promo = registry
            .register(percent_promo().with_global_usage_limit(10))
            .unwrap();
        promo.lock().increment_usage();

        let json = serde_json::to_value(&*promo).unwrap();
        assert_eq!(json["code"], "SAVE15");
        assert_eq!(json["kind"], "percentage");
        assert_eq!(json["global_usage_count"], 1);
        assert_eq!(json["global_usage_limit"], 10);
    }
}
