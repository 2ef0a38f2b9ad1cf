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

//! Order model and status state machine.
//!
//! Status transitions:
//!
//! ```text
//! Pending --pay--> Processing --topup ok--> Completed
//!    |                  |
//!    |                  +------failure----> Failed
//!    +------failure---> Failed
//!    +------cancel----> Cancelled (reverses any promo usage)
//! ```
//!
//! Completed, Failed, and Cancelled are terminal. The package chosen at
//! creation time is snapshotted into the order so a later catalog price
//! change can never alter an existing order's totals.

use crate::base::{GameId, OrderId, UserId};
use crate::discount::DECIMAL_PRECISION;
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rust_decimal::Decimal;
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl OrderStatus {
    /// Whether the order can move from `self` to `next`.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Processing)
                | (OrderStatus::Processing, OrderStatus::Completed)
                | (OrderStatus::Pending, OrderStatus::Failed)
                | (OrderStatus::Processing, OrderStatus::Failed)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Failed | OrderStatus::Cancelled
        )
    }
}

/// Accepted payment methods, mirroring the store front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    BankTransfer,
    Wallet,
    PromptPay,
}

impl FromStr for PaymentMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "credit_card" => Ok(Self::CreditCard),
            "bank_transfer" => Ok(Self::BankTransfer),
            "wallet" => Ok(Self::Wallet),
            "promptpay" => Ok(Self::PromptPay),
            _ => Err(()),
        }
    }
}

/// Immutable copy of the chosen package, frozen at order-creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageSnapshot {
    pub name: String,
    /// In-game currency amount delivered by the top-up.
    pub amount: u32,
    /// Price at creation time; becomes the order's `total_amount`.
    pub price: Decimal,
}

/// Mutex-guarded order state.
#[derive(Debug)]
pub(crate) struct OrderData {
    pub(crate) id: OrderId,
    pub(crate) order_number: String,
    pub(crate) user_id: UserId,
    pub(crate) game_id: GameId,
    pub(crate) package: PackageSnapshot,
    pub(crate) game_account: HashMap<String, String>,
    pub(crate) payment_method: PaymentMethod,
    pub(crate) total_amount: Decimal,
    pub(crate) discount_amount: Decimal,
    pub(crate) final_amount: Decimal,
    pub(crate) applied_promo_code: Option<String>,
    pub(crate) status: OrderStatus,
    pub(crate) transaction_id: Option<String>,
    pub(crate) failure_reason: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) processed_at: Option<DateTime<Utc>>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
}

impl OrderData {
    fn assert_invariants(&self) {
        debug_assert!(
            self.final_amount == self.total_amount - self.discount_amount,
            "Invariant violated: final {} != total {} - discount {}",
            self.final_amount,
            self.total_amount,
            self.discount_amount
        );
        debug_assert!(
            self.final_amount >= Decimal::ZERO,
            "Invariant violated: final amount went negative: {}",
            self.final_amount
        );
    }

    /// Applies a status transition, enforcing the state machine and
    /// stamping the lifecycle timestamps.
    pub(crate) fn transition(
        &mut self,
        next: OrderStatus,
        now: DateTime<Utc>,
        note: Option<&str>,
    ) -> Result<(), EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidState);
        }

        self.status = next;
        match next {
            OrderStatus::Processing => self.processed_at = Some(now),
            OrderStatus::Completed => self.completed_at = Some(now),
            OrderStatus::Failed => self.failure_reason = note.map(str::to_string),
            OrderStatus::Pending | OrderStatus::Cancelled => {}
        }
        self.assert_invariants();
        Ok(())
    }
}

/// A placed order.
///
/// Internally mutex-guarded; the engine locks orders before promos,
/// never the other way around.
#[derive(Debug)]
pub struct Order {
    inner: Mutex<OrderData>,
}

#[allow(clippy::too_many_arguments)]
impl Order {
    pub(crate) fn new(
        id: OrderId,
        order_number: String,
        user_id: UserId,
        game_id: GameId,
        package: PackageSnapshot,
        game_account: HashMap<String, String>,
        payment_method: PaymentMethod,
        discount_amount: Decimal,
        applied_promo_code: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let total_amount = package.price;
        let data = OrderData {
            id,
            order_number,
            user_id,
            game_id,
            package,
            game_account,
            payment_method,
            total_amount,
            discount_amount,
            final_amount: total_amount - discount_amount,
            applied_promo_code,
            status: OrderStatus::Pending,
            transaction_id: None,
            failure_reason: None,
            created_at,
            processed_at: None,
            completed_at: None,
        };
        data.assert_invariants();
        Self {
            inner: Mutex::new(data),
        }
    }

    pub fn id(&self) -> OrderId {
        self.inner.lock().id
    }

    pub fn order_number(&self) -> String {
        self.inner.lock().order_number.clone()
    }

    pub fn user_id(&self) -> UserId {
        self.inner.lock().user_id
    }

    pub fn game_id(&self) -> GameId {
        self.inner.lock().game_id
    }

    pub fn status(&self) -> OrderStatus {
        self.inner.lock().status
    }

    pub fn package(&self) -> PackageSnapshot {
        self.inner.lock().package.clone()
    }

    /// Pre-discount total.
    pub fn total_amount(&self) -> Decimal {
        self.inner.lock().total_amount
    }

    pub fn discount_amount(&self) -> Decimal {
        self.inner.lock().discount_amount
    }

    pub fn final_amount(&self) -> Decimal {
        self.inner.lock().final_amount
    }

    pub fn applied_promo_code(&self) -> Option<String> {
        self.inner.lock().applied_promo_code.clone()
    }

    pub fn transaction_id(&self) -> Option<String> {
        self.inner.lock().transaction_id.clone()
    }

    pub fn failure_reason(&self) -> Option<String> {
        self.inner.lock().failure_reason.clone()
    }

    pub fn processed_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().processed_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().completed_at
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, OrderData> {
        self.inner.lock()
    }
}

impl Serialize for Order {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("Order", 10)?;
        state.serialize_field("order", &data.id)?;
        state.serialize_field("number", &data.order_number)?;
        state.serialize_field("user", &data.user_id)?;
        state.serialize_field("game", &data.game_id)?;
        state.serialize_field("package", &data.package.name)?;
        state.serialize_field("total", &data.total_amount.round_dp(DECIMAL_PRECISION))?;
        state.serialize_field("discount", &data.discount_amount.round_dp(DECIMAL_PRECISION))?;
        state.serialize_field("final", &data.final_amount.round_dp(DECIMAL_PRECISION))?;
        state.serialize_field("promo", &data.applied_promo_code)?;
        state.serialize_field("status", &data.status)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_order(discount: Decimal, promo: Option<&str>) -> Order {
        Order::new(
            OrderId(1),
            "GT0000000001".to_string(),
            UserId(1),
            GameId(1),
            PackageSnapshot {
                name: "60 Diamonds".to_string(),
                amount: 60,
                price: dec!(100),
            },
            HashMap::new(),
            PaymentMethod::Wallet,
            discount,
            promo.map(str::to_string),
            Utc::now(),
        )
    }

    #[test]
    fn new_order_is_pending_with_snapshot_totals() {
        let order = make_order(dec!(15), Some("SAVE15"));
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.total_amount(), dec!(100));
        assert_eq!(order.discount_amount(), dec!(15));
        assert_eq!(order.final_amount(), dec!(85));
        assert_eq!(order.applied_promo_code().as_deref(), Some("SAVE15"));
    }

    #[test]
    fn transition_table() {
        use OrderStatus::*;
        let legal = [
            (Pending, Processing),
            (Processing, Completed),
            (Pending, Failed),
            (Processing, Failed),
            (Pending, Cancelled),
        ];
        for (from, to) in legal {
            assert!(from.can_transition_to(to), "{from:?} -> {to:?} should be legal");
        }

        let illegal = [
            (Pending, Completed),
            (Processing, Cancelled),
            (Completed, Failed),
            (Completed, Processing),
            (Cancelled, Pending),
            (Cancelled, Cancelled),
            (Failed, Processing),
            (Pending, Pending),
        ];
        for (from, to) in illegal {
            assert!(!from.can_transition_to(to), "{from:?} -> {to:?} should be illegal");
        }
    }

    #[test]
    fn terminal_states() {
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Processing.is_terminal());
    }

    #[test]
    fn transition_stamps_timestamps() {
        let order = make_order(Decimal::ZERO, None);
        let now = Utc::now();

        order.lock().transition(OrderStatus::Processing, now, None).unwrap();
        assert_eq!(order.processed_at(), Some(now));
        assert_eq!(order.completed_at(), None);

        order.lock().transition(OrderStatus::Completed, now, None).unwrap();
        assert_eq!(order.completed_at(), Some(now));
    }

    #[test]
    fn failed_transition_records_reason() {
        let order = make_order(Decimal::ZERO, None);
        order
            .lock()
            .transition(OrderStatus::Failed, Utc::now(), Some("card declined"))
            .unwrap();
        assert_eq!(order.status(), OrderStatus::Failed);
        assert_eq!(order.failure_reason().as_deref(), Some("card declined"));
    }

    #[test]
    fn illegal_transition_rejected_and_state_unchanged() {
        let order = make_order(Decimal::ZERO, None);
        let result = order.lock().transition(OrderStatus::Completed, Utc::now(), None);
        assert_eq!(result, Err(EngineError::InvalidState));
        assert_eq!(order.status(), OrderStatus::Pending);
    }

    #[test]
    fn payment_method_parsing() {
        assert_eq!("credit_card".parse(), Ok(PaymentMethod::CreditCard));
        assert_eq!(" WALLET ".parse(), Ok(PaymentMethod::Wallet));
        assert_eq!("promptpay".parse(), Ok(PaymentMethod::PromptPay));
        assert!("cash".parse::<PaymentMethod>().is_err());
    }

    #[test]
    fn serializes_rounded_totals() {
        let order = make_order(dec!(12.345), Some("SAVE15"));
        let json = serde_json::to_value(&order).unwrap();

        assert_eq!(json["status"], "pending");
        assert_eq!(json["promo"], "SAVE15");
        // Banker's rounding: 12.345 -> 12.34, 87.655 -> 87.66
        assert_eq!(json["discount"].as_str().unwrap(), "12.34");
        assert_eq!(json["final"].as_str().unwrap(), "87.66");
    }
}
