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

//! # Topup Engine
//!
//! This library provides the order and promo-code redemption engine for a
//! game top-up store: creating orders with package snapshots, validating
//! and redeeming promo codes under usage limits, and reversing redemptions
//! when orders are cancelled.
//!
//! ## Core Components
//!
//! - [`Engine`]: Order orchestrator tying the pieces together
//! - [`PromoRegistry`]: Promo definitions and global usage counters
//! - [`UsageLedger`]: Append-only redemption records with idempotent reversal
//! - [`discount::compute`]: Pure discount calculation
//! - [`EngineError`]: Structured per-request failure reasons
//!
//! ## Example
//!
//! ```
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use chrono::{Duration, Utc};
//! use rust_decimal_macros::dec;
//! use topup_engine_rs::collab::{InMemoryUserLedger, MockGateway, StaticCatalog};
//! use topup_engine_rs::{
//!     Engine, GameId, PackageSnapshot, PaymentMethod, PromoDefinition, PromoKind, UserId,
//! };
//!
//! let catalog = Arc::new(StaticCatalog::new());
//! catalog.insert_package(
//!     GameId(1),
//!     0,
//!     PackageSnapshot { name: "60 Diamonds".into(), amount: 60, price: dec!(1000) },
//! );
//! let engine = Engine::new(
//!     catalog,
//!     Arc::new(MockGateway::approving()),
//!     Arc::new(InMemoryUserLedger::new()),
//! );
//!
//! let now = Utc::now();
//! engine
//!     .registry()
//!     .register(
//!         PromoDefinition::new(
//!             "SAVE15",
//!             "15% off",
//!             PromoKind::Percentage,
//!             dec!(15),
//!             now - Duration::days(1),
//!             now + Duration::days(30),
//!         )
//!         .with_max_discount(dec!(500)),
//!     )
//!     .unwrap();
//!
//! let order = engine
//!     .create_order(
//!         UserId(1),
//!         GameId(1),
//!         0,
//!         HashMap::new(),
//!         PaymentMethod::Wallet,
//!         Some("save15"),
//!         now,
//!     )
//!     .unwrap();
//! assert_eq!(order.discount_amount(), dec!(150));
//! assert_eq!(order.final_amount(), dec!(850));
//! ```
//!
//! ## Thread Safety
//!
//! The engine handles concurrent requests; each promo carries its own row
//! lock, and the validate-then-increment sequence re-checks every limit
//! inside that lock so concurrent redemptions can never overshoot a cap.

mod base;
pub mod collab;
pub mod discount;
mod engine;
pub mod error;
pub mod order;
pub mod promo;
pub mod usage;

pub use base::{GameId, OrderId, UserId};
pub use engine::{Engine, PromoQuote};
pub use error::EngineError;
pub use order::{Order, OrderStatus, PackageSnapshot, PaymentMethod};
pub use promo::{PromoCode, PromoDefinition, PromoKind, PromoRegistry, normalize_code};
pub use usage::{UsageLedger, UsageRecord, UsageStatus};
