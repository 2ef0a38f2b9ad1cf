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

//! Demo JSON API on top of the topup engine.
//!
//! Run with: `cargo run --example server`
//!
//! ```bash
//! # Check a promo code against an order context
//! curl -X POST http://localhost:3000/promo/validate \
//!   -H "Content-Type: application/json" \
//!   -d '{"code": "SAVE15", "user_id": 1, "game_id": 1, "amount": "1000"}'
//!
//! # Create an order redeeming the code
//! curl -X POST http://localhost:3000/orders \
//!   -H "Content-Type: application/json" \
//!   -d '{"user_id": 1, "game_id": 1, "package_index": 1, "payment_method": "wallet", "promo_code": "SAVE15"}'
//!
//! # Pay / cancel / inspect
//! curl -X POST http://localhost:3000/orders/1/pay -H "Content-Type: application/json" -d '{"user_id": 1}'
//! curl -X POST http://localhost:3000/orders/1/cancel -H "Content-Type: application/json" -d '{"user_id": 1}'
//! curl http://localhost:3000/orders/1
//! ```

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use topup_engine_rs::collab::{InMemoryUserLedger, MockGateway, StaticCatalog};
use topup_engine_rs::{
    Engine, EngineError, GameId, OrderId, PackageSnapshot, PaymentMethod, PromoDefinition,
    PromoKind, UserId,
};

// === Request DTOs ===

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    code: String,
    user_id: u32,
    game_id: u32,
    amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct CreateOrderRequest {
    user_id: u32,
    game_id: u32,
    package_index: u32,
    payment_method: PaymentMethod,
    #[serde(default)]
    game_account: HashMap<String, String>,
    promo_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwnerRequest {
    user_id: u32,
}

// === Error mapping ===

struct ApiError(EngineError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::NotFound => StatusCode::NOT_FOUND,
            EngineError::InvalidState | EngineError::ConcurrencyConflict => StatusCode::CONFLICT,
            EngineError::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::PaymentFailed(_) | EngineError::TopupFailed(_) => {
                StatusCode::PAYMENT_REQUIRED
            }
            _ => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

// === Handlers ===

async fn validate_promo(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<ValidateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let quote = engine.validate_promo(
        &req.code,
        UserId(req.user_id),
        GameId(req.game_id),
        req.amount,
        Utc::now(),
    )?;
    Ok(Json(quote))
}

async fn create_order(
    State(engine): State<Arc<Engine>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let order = engine.create_order(
        UserId(req.user_id),
        GameId(req.game_id),
        req.package_index,
        req.game_account,
        req.payment_method,
        req.promo_code.as_deref(),
        Utc::now(),
    )?;
    let body = serde_json::to_value(&*order).expect("serialize order");
    Ok((StatusCode::CREATED, Json(body)))
}

async fn pay_order(
    State(engine): State<Arc<Engine>>,
    Path(order_id): Path<u64>,
    Json(req): Json<OwnerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let transaction_id = engine.pay_order(OrderId(order_id), UserId(req.user_id), Utc::now())?;
    Ok(Json(json!({ "transaction_id": transaction_id })))
}

async fn cancel_order(
    State(engine): State<Arc<Engine>>,
    Path(order_id): Path<u64>,
    Json(req): Json<OwnerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    engine.cancel_order(OrderId(order_id), UserId(req.user_id))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_order(
    State(engine): State<Arc<Engine>>,
    Path(order_id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let order = engine.get_order(OrderId(order_id)).ok_or(EngineError::NotFound)?;
    let body = serde_json::to_value(&*order).expect("serialize order");
    Ok(Json(body))
}

async fn list_promos(State(engine): State<Arc<Engine>>) -> impl IntoResponse {
    let promos: Vec<serde_json::Value> = engine
        .registry()
        .iter()
        .map(|p| serde_json::to_value(&**p.value()).expect("serialize promo"))
        .collect();
    Json(promos)
}

fn app(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/promo/validate", post(validate_promo))
        .route("/promos", get(list_promos))
        .route("/orders", post(create_order))
        .route("/orders/{id}", get(get_order))
        .route("/orders/{id}/pay", post(pay_order))
        .route("/orders/{id}/cancel", post(cancel_order))
        .with_state(engine)
}

/// Seeds a small catalog and two promos so the server is usable out of
/// the box.
fn seed_engine() -> Engine {
    let catalog = Arc::new(StaticCatalog::new());
    catalog.insert_package(
        GameId(1),
        0,
        PackageSnapshot { name: "60 Diamonds".into(), amount: 60, price: dec!(100) },
    );
    catalog.insert_package(
        GameId(1),
        1,
        PackageSnapshot { name: "1000 Diamonds".into(), amount: 1000, price: dec!(1000) },
    );
    catalog.insert_package(
        GameId(2),
        0,
        PackageSnapshot { name: "Starter Pack".into(), amount: 1, price: dec!(30) },
    );

    let engine = Engine::new(
        catalog,
        Arc::new(MockGateway::approving()),
        Arc::new(InMemoryUserLedger::new()),
    );

    let now = Utc::now();
    engine
        .registry()
        .register(
            PromoDefinition::new(
                "SAVE15",
                "15% off",
                PromoKind::Percentage,
                dec!(15),
                now - Duration::days(1),
                now + Duration::days(30),
            )
            .with_min_order_amount(dec!(200))
            .with_max_discount(dec!(500)),
        )
        .expect("seed promo");
    engine
        .registry()
        .register(
            PromoDefinition::new(
                "FIXED50",
                "50 off any order",
                PromoKind::FixedAmount,
                dec!(50),
                now - Duration::days(1),
                now + Duration::days(30),
            )
            .with_per_user_usage_limit(3),
        )
        .expect("seed promo");

    engine
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let engine = Arc::new(seed_engine());
    let listener = TcpListener::bind("127.0.0.1:3000")
        .await
        .expect("bind 127.0.0.1:3000");
    println!("listening on http://{}", listener.local_addr().unwrap());

    axum::serve(listener, app(engine)).await.expect("server error");
}
