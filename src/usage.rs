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

//! Append-only ledger of promo redemptions.
//!
//! One record binds one redemption to one order and one user. Records are
//! never deleted: cancelling an order flips the record to
//! [`UsageStatus::Reversed`] so the audit trail survives the cancellation.
//! An index of active counts per (user, code) backs the per-user limit
//! check, and a FIFO feed preserves redemption order for audit export.

use crate::base::{OrderId, UserId};
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::Serialize;

/// Lifecycle of a usage record.
///
//  Active ──order cancelled──► Reversed (terminal; record is kept)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageStatus {
    Active,
    Reversed,
}

/// Audit entry for a single promo redemption.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    /// Normalized promo code.
    pub promo_code: String,
    pub user_id: UserId,
    pub order_id: OrderId,
    pub discount_amount: Decimal,
    /// Pre-discount order amount.
    pub original_amount: Decimal,
    /// `original_amount - discount_amount`.
    pub final_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub status: UsageStatus,
}

/// Thread-safe redemption ledger with per-user active counts.
#[derive(Debug, Default)]
pub struct UsageLedger {
    /// Records indexed by the order that consumed the promo.
    records: DashMap<OrderId, UsageRecord>,

    /// Active (non-reversed) redemption counts per (user, code).
    user_counts: DashMap<(UserId, String), u32>,

    /// Order ids in redemption order, for audit export.
    feed: SegQueue<OrderId>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            user_counts: DashMap::new(),
            feed: SegQueue::new(),
        }
    }

    /// Number of active redemptions of `code` by `user`.
    pub fn count_active(&self, user_id: UserId, code: &str) -> u32 {
        self.user_counts
            .get(&(user_id, code.to_string()))
            .map(|c| *c)
            .unwrap_or(0)
    }

    /// Appends a redemption record.
    ///
    /// The caller must hold the promo's row lock so the insert is atomic
    /// with the counter increment and the per-user re-check. Order ids are
    /// unique per engine, so a collision here is a caller bug.
    pub(crate) fn record(
        &self,
        promo_code: &str,
        user_id: UserId,
        order_id: OrderId,
        discount_amount: Decimal,
        original_amount: Decimal,
        created_at: DateTime<Utc>,
    ) -> UsageRecord {
        let record = UsageRecord {
            promo_code: promo_code.to_string(),
            user_id,
            order_id,
            discount_amount,
            original_amount,
            final_amount: original_amount - discount_amount,
            created_at,
            status: UsageStatus::Active,
        };

        match self.records.entry(order_id) {
            Entry::Occupied(_) => {
                debug_assert!(false, "duplicate usage record for order {}", order_id);
            }
            Entry::Vacant(entry) => {
                entry.insert(record.clone());
                *self
                    .user_counts
                    .entry((user_id, promo_code.to_string()))
                    .or_insert(0) += 1;
                self.feed.push(order_id);
            }
        }

        record
    }

    /// Marks the record for `order_id` as reversed and releases the user's
    /// slot. Idempotent: reversing an absent or already-reversed record is a
    /// no-op.
    ///
    /// Returns the promo code of the record that was actually flipped, so
    /// the caller can decrement the owning promo's global counter exactly
    /// once per redemption.
    pub(crate) fn reverse(&self, order_id: OrderId) -> Option<String> {
        let mut record = self.records.get_mut(&order_id)?;
        if record.status == UsageStatus::Reversed {
            return None;
        }
        record.status = UsageStatus::Reversed;

        let key = (record.user_id, record.promo_code.clone());
        if let Some(mut count) = self.user_counts.get_mut(&key) {
            *count = count.saturating_sub(1);
        }

        Some(record.promo_code.clone())
    }

    /// Explicit lookup of the record attached to an order.
    pub fn get(&self, order_id: OrderId) -> Option<UsageRecord> {
        self.records.get(&order_id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Pops the next order id from the audit feed, in redemption order.
    pub fn pop_audit(&self) -> Option<OrderId> {
        self.feed.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn record_computes_final_amount() {
        let ledger = UsageLedger::new();
        let record = ledger.record("SAVE15", UserId(1), OrderId(10), dec!(150), dec!(1000), now());

        assert_eq!(record.final_amount, dec!(850));
        assert_eq!(record.status, UsageStatus::Active);
        assert_eq!(ledger.count_active(UserId(1), "SAVE15"), 1);
    }

    #[test]
    fn counts_are_per_user_and_per_code() {
        let ledger = UsageLedger::new();
        ledger.record("SAVE15", UserId(1), OrderId(1), dec!(10), dec!(100), now());
        ledger.record("SAVE15", UserId(1), OrderId(2), dec!(10), dec!(100), now());
        ledger.record("SAVE15", UserId(2), OrderId(3), dec!(10), dec!(100), now());
        ledger.record("FIXED50", UserId(1), OrderId(4), dec!(50), dec!(100), now());

        assert_eq!(ledger.count_active(UserId(1), "SAVE15"), 2);
        assert_eq!(ledger.count_active(UserId(2), "SAVE15"), 1);
        assert_eq!(ledger.count_active(UserId(1), "FIXED50"), 1);
        assert_eq!(ledger.count_active(UserId(3), "SAVE15"), 0);
    }

    #[test]
    fn reverse_flips_status_and_releases_slot() {
        let ledger = UsageLedger::new();
        ledger.record("SAVE15", UserId(1), OrderId(1), dec!(10), dec!(100), now());

        let code = ledger.reverse(OrderId(1));
        assert_eq!(code.as_deref(), Some("SAVE15"));
        assert_eq!(ledger.count_active(UserId(1), "SAVE15"), 0);

        // Record survives reversal
        let record = ledger.get(OrderId(1)).unwrap();
        assert_eq!(record.status, UsageStatus::Reversed);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn reverse_is_idempotent() {
        let ledger = UsageLedger::new();
        ledger.record("SAVE15", UserId(1), OrderId(1), dec!(10), dec!(100), now());

        assert!(ledger.reverse(OrderId(1)).is_some());
        assert!(ledger.reverse(OrderId(1)).is_none());
        assert_eq!(ledger.count_active(UserId(1), "SAVE15"), 0);
    }

    #[test]
    fn reverse_of_absent_record_is_noop() {
        let ledger = UsageLedger::new();
        assert!(ledger.reverse(OrderId(999)).is_none());
    }

    #[test]
    fn audit_feed_preserves_redemption_order() {
        let ledger = UsageLedger::new();
        ledger.record("A", UserId(1), OrderId(3), dec!(1), dec!(10), now());
        ledger.record("B", UserId(1), OrderId(1), dec!(1), dec!(10), now());
        ledger.record("C", UserId(1), OrderId(2), dec!(1), dec!(10), now());

        assert_eq!(ledger.pop_audit(), Some(OrderId(3)));
        assert_eq!(ledger.pop_audit(), Some(OrderId(1)));
        assert_eq!(ledger.pop_audit(), Some(OrderId(2)));
        assert_eq!(ledger.pop_audit(), None);
    }
}
