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

//! Order orchestrator.
//!
//! The [`Engine`] creates orders, validates and commits promo redemptions,
//! cancels pending orders with atomic reversal, and drives the payment and
//! status-transition flow against the external collaborators.
//!
//! # Redemption atomicity
//!
//! A promo commit re-runs every eligibility check under the promo's row
//! lock before recording usage and bumping the counter, so two concurrent
//! redemptions can never both slip past a limit: whichever thread takes the
//! lock second sees the first thread's usage record and counter. The
//! read-only [`Engine::validate_promo`] path runs the same checks without
//! mutating anything, for "check code" callers that never place an order.
//!
//! # Lock ordering
//!
//! Orders are locked before promos, never the other way around, and no
//! collaborator call is made while a lock is held.

use crate::base::{GameId, OrderId, UserId};
use crate::collab::{Catalog, PaymentGateway, UserLedger};
use crate::error::EngineError;
use crate::order::{Order, OrderStatus, PaymentMethod};
use crate::promo::{PromoKind, PromoRegistry};
use crate::usage::UsageLedger;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Result of a successful promo validation: what the code is worth against
/// a given order amount.
#[derive(Debug, Clone, Serialize)]
pub struct PromoQuote {
    pub code: String,
    pub kind: PromoKind,
    pub value: Decimal,
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
}

/// Central orchestrator owning orders, the promo registry, and the usage
/// ledger.
pub struct Engine {
    registry: PromoRegistry,
    usage: UsageLedger,
    orders: DashMap<OrderId, Arc<Order>>,
    order_seq: AtomicU64,
    catalog: Arc<dyn Catalog>,
    gateway: Arc<dyn PaymentGateway>,
    user_ledger: Arc<dyn UserLedger>,
}

impl Engine {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        gateway: Arc<dyn PaymentGateway>,
        user_ledger: Arc<dyn UserLedger>,
    ) -> Self {
        Self {
            registry: PromoRegistry::new(),
            usage: UsageLedger::new(),
            orders: DashMap::new(),
            order_seq: AtomicU64::new(0),
            catalog,
            gateway,
            user_ledger,
        }
    }

    /// The promo registry, for registration and listing.
    pub fn registry(&self) -> &PromoRegistry {
        &self.registry
    }

    /// The redemption ledger, for audit queries.
    pub fn usage(&self) -> &UsageLedger {
        &self.usage
    }

    pub fn get_order(&self, order_id: OrderId) -> Option<Arc<Order>> {
        self.orders.get(&order_id).map(|o| Arc::clone(&o))
    }

    /// Iterates over all orders, e.g. for report output.
    pub fn orders(
        &self,
    ) -> impl Iterator<Item = dashmap::mapref::multiple::RefMulti<'_, OrderId, Arc<Order>>> {
        self.orders.iter()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    /// Validates a promo code against an order context without consuming it.
    ///
    /// Checks run in a fixed order so the first failure is deterministic:
    /// existence/active/window, global cap, minimum amount, per-user limit,
    /// game scope. Read-only: a "check code" call that never creates an
    /// order leaves no trace.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidAmount`] - order amount is zero or negative.
    /// - [`EngineError::InvalidOrExpired`] - unknown, inactive, or
    ///   out-of-window code.
    /// - [`EngineError::GloballyExhausted`] - global usage limit reached.
    /// - [`EngineError::BelowMinimum`] - amount below the promo minimum.
    /// - [`EngineError::UserLimitReached`] - per-user limit reached.
    /// - [`EngineError::GameNotEligible`] - promo does not cover this game.
    pub fn validate_promo(
        &self,
        code: &str,
        user_id: UserId,
        game_id: GameId,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<PromoQuote, EngineError> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::InvalidAmount);
        }

        let promo = self.registry.find(code).ok_or(EngineError::InvalidOrExpired)?;
        let data = promo.lock();
        let uses = self.usage.count_active(user_id, &data.code);
        data.check_eligibility(game_id, amount, uses, now)?;

        let discount_amount = data.quote(amount);
        Ok(PromoQuote {
            code: data.code.clone(),
            kind: data.kind,
            value: data.value,
            discount_amount,
            final_amount: amount - discount_amount,
        })
    }

    /// Creates an order, optionally redeeming a promo code.
    ///
    /// The chosen package is resolved through the catalog and snapshotted
    /// into the order, so later catalog changes cannot alter its totals.
    /// When a code is given, validation, usage recording, and the counter
    /// increment all happen under the promo's row lock before the order
    /// becomes visible; any failure aborts the whole creation with nothing
    /// persisted.
    ///
    /// # Errors
    ///
    /// Catalog failures ([`EngineError::NotFound`],
    /// [`EngineError::StorageUnavailable`]) and every validation error of
    /// [`Engine::validate_promo`].
    #[allow(clippy::too_many_arguments)]
    pub fn create_order(
        &self,
        user_id: UserId,
        game_id: GameId,
        package_index: u32,
        game_account: HashMap<String, String>,
        payment_method: PaymentMethod,
        promo_code: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Arc<Order>, EngineError> {
        let package = self.catalog.get_active_package(game_id, package_index)?;
        if package.price <= Decimal::ZERO {
            return Err(EngineError::InvalidAmount);
        }
        let amount = package.price;

        let order_id = OrderId(self.order_seq.fetch_add(1, Ordering::Relaxed) + 1);
        let order_number = format!("GT{}{:04}", now.timestamp_millis(), order_id.0 % 10_000);

        let (discount_amount, applied_code) = match promo_code.map(str::trim) {
            Some(code) if !code.is_empty() => {
                let promo = self.registry.find(code).ok_or(EngineError::InvalidOrExpired)?;
                let mut data = promo.lock();

                // Re-check under the row lock; a pre-lock validate_promo
                // result cannot be trusted once another redemption may have
                // committed in between.
                let uses = self.usage.count_active(user_id, &data.code);
                data.check_eligibility(game_id, amount, uses, now)?;

                let discount = data.quote(amount);
                self.usage.record(&data.code, user_id, order_id, discount, amount, now);
                data.increment_usage();
                (discount, Some(data.code.clone()))
            }
            _ => (Decimal::ZERO, None),
        };

        let order = Arc::new(Order::new(
            order_id,
            order_number,
            user_id,
            game_id,
            package,
            game_account,
            payment_method,
            discount_amount,
            applied_code.clone(),
            now,
        ));
        self.orders.insert(order_id, Arc::clone(&order));

        debug!(
            order = %order_id,
            user = %user_id,
            promo = applied_code.as_deref().unwrap_or("-"),
            %discount_amount,
            "order created"
        );
        Ok(order)
    }

    /// Cancels a pending order owned by `user_id`.
    ///
    /// If the order redeemed a promo, the usage record is reversed and the
    /// promo counter decremented while the order lock is held, so a
    /// concurrent observer never sees a cancelled order with live usage.
    /// Reversal itself is idempotent.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] - order absent or owned by someone else.
    /// - [`EngineError::InvalidState`] - order is not pending (including an
    ///   already-cancelled order).
    pub fn cancel_order(&self, order_id: OrderId, user_id: UserId) -> Result<(), EngineError> {
        let order = self.get_order(order_id).ok_or(EngineError::NotFound)?;
        let mut data = order.lock();

        // Ownership failures are indistinguishable from absence on purpose.
        if data.user_id != user_id {
            return Err(EngineError::NotFound);
        }
        data.transition(OrderStatus::Cancelled, Utc::now(), None)?;

        if data.applied_promo_code.is_some() {
            if let Some(code) = self.usage.reverse(order_id) {
                self.registry.decrement_usage(&code);
            }
        }

        debug!(order = %order_id, user = %user_id, "order cancelled");
        Ok(())
    }

    /// Applies a status transition, enforcing the state machine.
    ///
    /// Moving to [`OrderStatus::Completed`] credits the user's lifetime
    /// spend with the order's final amount. [`OrderStatus::Cancelled`] is
    /// rejected here: cancellation must go through [`Engine::cancel_order`]
    /// so promo usage is reversed.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] - order absent.
    /// - [`EngineError::InvalidState`] - edge not in the state machine.
    pub fn transition_status(
        &self,
        order_id: OrderId,
        next: OrderStatus,
        note: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if next == OrderStatus::Cancelled {
            return Err(EngineError::InvalidState);
        }
        let order = self.get_order(order_id).ok_or(EngineError::NotFound)?;

        let credit = {
            let mut data = order.lock();
            data.transition(next, now, note)?;
            (next == OrderStatus::Completed).then(|| (data.user_id, data.final_amount))
        };

        // Collaborator call after the lock is released.
        if let Some((user_id, amount)) = credit {
            self.user_ledger.credit_total_spent(user_id, amount);
        }

        debug!(order = %order_id, status = ?next, "order transitioned");
        Ok(())
    }

    /// Charges the order and drives it through the top-up flow.
    ///
    /// Charge success moves the order to Processing and attempts the
    /// in-game top-up; top-up success completes the order (crediting the
    /// spend ledger), either failure moves it to Failed with the
    /// collaborator's reason. Returns the gateway transaction id.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotFound`] - order absent or not owned by caller.
    /// - [`EngineError::InvalidState`] - order is not pending.
    /// - [`EngineError::PaymentFailed`] / [`EngineError::TopupFailed`] -
    ///   collaborator failures; the order is left in Failed.
    pub fn pay_order(
        &self,
        order_id: OrderId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<String, EngineError> {
        let order = self.get_order(order_id).ok_or(EngineError::NotFound)?;

        let (method, amount, game_id, account, units) = {
            let data = order.lock();
            if data.user_id != user_id {
                return Err(EngineError::NotFound);
            }
            if data.status != OrderStatus::Pending {
                return Err(EngineError::InvalidState);
            }
            (
                data.payment_method,
                data.final_amount,
                data.game_id,
                data.game_account.clone(),
                data.package.amount,
            )
        };

        let transaction_id = match self.gateway.charge(method, amount) {
            Ok(id) => id,
            Err(reason) => {
                // Best effort: a concurrent cancel may have won the race.
                let _ = self.transition_status(order_id, OrderStatus::Failed, Some(&reason), now);
                return Err(EngineError::PaymentFailed(reason));
            }
        };

        {
            let mut data = order.lock();
            data.transaction_id = Some(transaction_id.clone());
            data.transition(OrderStatus::Processing, now, None)?;
        }

        match self.catalog.process_topup(game_id, &account, units) {
            Ok(()) => {
                self.transition_status(order_id, OrderStatus::Completed, None, now)?;
                debug!(order = %order_id, txn = %transaction_id, "order paid and topped up");
                Ok(transaction_id)
            }
            Err(reason) => {
                let _ = self.transition_status(order_id, OrderStatus::Failed, Some(&reason), now);
                Err(EngineError::TopupFailed(reason))
            }
        }
    }
}
