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

//! External collaborator seams.
//!
//! The engine talks to three collaborators: the game catalog (package
//! resolution and in-game top-up), the payment gateway, and the user spend
//! ledger. Each is a synchronous call/response trait with its own
//! timeout/retry policy out of scope here. In-memory implementations back
//! the CLI, the demo server, and the tests.

use crate::base::{GameId, UserId};
use crate::error::EngineError;
use crate::order::{PackageSnapshot, PaymentMethod};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Game/package catalog and top-up provider.
pub trait Catalog: Send + Sync {
    /// Resolves a package by game and position in the game's package list.
    ///
    /// The returned price is authoritative at order-creation time only; the
    /// engine snapshots it into the order.
    fn get_active_package(
        &self,
        game_id: GameId,
        package_index: u32,
    ) -> Result<PackageSnapshot, EngineError>;

    /// Delivers `amount` in-game units to the given game account.
    fn process_topup(
        &self,
        game_id: GameId,
        game_account: &HashMap<String, String>,
        amount: u32,
    ) -> Result<(), String>;
}

/// Payment gateway. Returns a transaction id on success, a reason on failure.
pub trait PaymentGateway: Send + Sync {
    fn charge(&self, method: PaymentMethod, amount: Decimal) -> Result<String, String>;
}

/// Lifetime-spend ledger, credited when an order completes.
pub trait UserLedger: Send + Sync {
    fn credit_total_spent(&self, user_id: UserId, amount: Decimal);
}

/// In-memory catalog seeded up front. Top-ups always succeed.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    packages: DashMap<(GameId, u32), PackageSnapshot>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self {
            packages: DashMap::new(),
        }
    }

    pub fn insert_package(&self, game_id: GameId, index: u32, package: PackageSnapshot) {
        self.packages.insert((game_id, index), package);
    }
}

impl Catalog for StaticCatalog {
    fn get_active_package(
        &self,
        game_id: GameId,
        package_index: u32,
    ) -> Result<PackageSnapshot, EngineError> {
        self.packages
            .get(&(game_id, package_index))
            .map(|p| p.clone())
            .ok_or(EngineError::NotFound)
    }

    fn process_topup(
        &self,
        _game_id: GameId,
        _game_account: &HashMap<String, String>,
        _amount: u32,
    ) -> Result<(), String> {
        Ok(())
    }
}

/// Mock gateway issuing sequential `TXN...` ids, switchable to declining.
#[derive(Debug, Default)]
pub struct MockGateway {
    declining: AtomicBool,
    sequence: AtomicU64,
}

impl MockGateway {
    pub fn approving() -> Self {
        Self::default()
    }

    pub fn declining() -> Self {
        let gateway = Self::default();
        gateway.declining.store(true, Ordering::Relaxed);
        gateway
    }

    pub fn set_declining(&self, declining: bool) {
        self.declining.store(declining, Ordering::Relaxed);
    }
}

impl PaymentGateway for MockGateway {
    fn charge(&self, _method: PaymentMethod, _amount: Decimal) -> Result<String, String> {
        if self.declining.load(Ordering::Relaxed) {
            return Err("payment declined".to_string());
        }
        let n = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(format!("TXN{n:08}"))
    }
}

/// In-memory spend ledger keyed by user.
#[derive(Debug, Default)]
pub struct InMemoryUserLedger {
    spent: DashMap<UserId, Decimal>,
}

impl InMemoryUserLedger {
    pub fn new() -> Self {
        Self {
            spent: DashMap::new(),
        }
    }

    pub fn total_spent(&self, user_id: UserId) -> Decimal {
        self.spent.get(&user_id).map(|s| *s).unwrap_or(Decimal::ZERO)
    }
}

impl UserLedger for InMemoryUserLedger {
    fn credit_total_spent(&self, user_id: UserId, amount: Decimal) {
        *self.spent.entry(user_id).or_insert(Decimal::ZERO) += amount;
    }
}
