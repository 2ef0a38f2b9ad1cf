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

use chrono::{DateTime, Utc};
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use topup_engine_rs::collab::{InMemoryUserLedger, MockGateway, StaticCatalog};
use topup_engine_rs::{
    Engine, GameId, OrderId, PackageSnapshot, PromoDefinition, PromoKind, UserId,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Topup Engine - Replay order and promo operations from CSV files
///
/// Seeds the catalog and promo registry from CSV, replays order operations
/// (create, pay, cancel), and writes the resulting order states to stdout.
#[derive(Parser, Debug)]
#[command(name = "topup-engine-rs")]
#[command(about = "An order/promo engine that replays operation CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with order operations
    ///
    /// Expected format: op,user,game,package,payment,code,order
    /// Example: cargo run -- --catalog catalog.csv --promos promos.csv orders.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// CSV of catalog packages: game,package,name,amount,price
    #[arg(long, value_name = "FILE")]
    catalog: Option<PathBuf>,

    /// CSV of promo definitions:
    /// code,name,kind,value,min_amount,max_discount,usage_limit,user_limit,games,valid_from,valid_until,active
    #[arg(long, value_name = "FILE")]
    promos: Option<PathBuf>,

    /// Write the usage-record audit trail (in redemption order) to this file
    #[arg(long, value_name = "FILE")]
    usage: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let catalog = Arc::new(StaticCatalog::new());
    if let Some(path) = &args.catalog {
        if let Err(e) = load_catalog(open(path), &catalog) {
            eprintln!("Error reading catalog '{}': {}", path.display(), e);
            process::exit(1);
        }
    }

    let engine = Engine::new(
        catalog,
        Arc::new(MockGateway::approving()),
        Arc::new(InMemoryUserLedger::new()),
    );

    if let Some(path) = &args.promos {
        if let Err(e) = load_promos(open(path), &engine) {
            eprintln!("Error reading promos '{}': {}", path.display(), e);
            process::exit(1);
        }
    }

    if let Err(e) = process_operations(open(&args.input), &engine) {
        eprintln!("Error processing operations: {}", e);
        process::exit(1);
    }

    if let Err(e) = write_orders(&engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }

    if let Some(path) = &args.usage {
        let file = match File::create(path) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Error creating '{}': {}", path.display(), e);
                process::exit(1);
            }
        };
        if let Err(e) = write_usage(&engine, file) {
            eprintln!("Error writing usage audit: {}", e);
            process::exit(1);
        }
    }
}

fn open(path: &PathBuf) -> BufReader<File> {
    match File::open(path) {
        Ok(f) => BufReader::new(f),
        Err(e) => {
            eprintln!("Error opening file '{}': {}", path.display(), e);
            process::exit(1);
        }
    }
}

/// Raw catalog row: `game, package, name, amount, price`.
#[derive(Debug, Deserialize)]
struct CatalogRecord {
    game: u32,
    package: u32,
    name: String,
    amount: u32,
    price: Decimal,
}

/// Raw promo row.
///
/// `games` is a semicolon-separated id list; empty means all games.
/// Dates are RFC 3339.
#[derive(Debug, Deserialize)]
struct PromoRecord {
    code: String,
    name: String,
    kind: String,
    value: Decimal,
    #[serde(deserialize_with = "csv::invalid_option")]
    min_amount: Option<Decimal>,
    #[serde(deserialize_with = "csv::invalid_option")]
    max_discount: Option<Decimal>,
    #[serde(deserialize_with = "csv::invalid_option")]
    usage_limit: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option")]
    user_limit: Option<u32>,
    games: Option<String>,
    valid_from: String,
    valid_until: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    active: Option<bool>,
}

impl PromoRecord {
    /// Converts the row into a promo definition.
    ///
    /// Returns `None` for unknown kinds or unparseable dates.
    fn into_definition(self) -> Option<PromoDefinition> {
        let kind = match self.kind.to_lowercase().as_str() {
            "percentage" => PromoKind::Percentage,
            "fixed_amount" => PromoKind::FixedAmount,
            "bonus_amount" => PromoKind::BonusAmount,
            _ => return None,
        };
        let valid_from = parse_date(&self.valid_from)?;
        let valid_until = parse_date(&self.valid_until)?;

        let mut def = PromoDefinition::new(self.code, self.name, kind, self.value, valid_from, valid_until);
        if let Some(minimum) = self.min_amount {
            def = def.with_min_order_amount(minimum);
        }
        if let Some(cap) = self.max_discount {
            def = def.with_max_discount(cap);
        }
        if let Some(limit) = self.usage_limit {
            def = def.with_global_usage_limit(limit);
        }
        if let Some(limit) = self.user_limit {
            def = def.with_per_user_usage_limit(limit);
        }
        if let Some(games) = &self.games {
            let ids: Vec<GameId> = games
                .split(';')
                .filter(|s| !s.trim().is_empty())
                .filter_map(|s| s.trim().parse::<u32>().ok().map(GameId))
                .collect();
            if !ids.is_empty() {
                def = def.with_applicable_games(ids);
            }
        }
        if self.active == Some(false) {
            def = def.inactive();
        }
        Some(def)
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Raw operation row: `op, user, game, package, payment, code, order`.
#[derive(Debug, Deserialize)]
struct OpRecord {
    op: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    user: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option")]
    game: Option<u32>,
    #[serde(deserialize_with = "csv::invalid_option")]
    package: Option<u32>,
    payment: Option<String>,
    code: Option<String>,
    #[serde(deserialize_with = "csv::invalid_option")]
    order: Option<u64>,
}

/// Seeds the catalog from a CSV reader. Malformed rows are skipped.
pub fn load_catalog<R: Read>(reader: R, catalog: &StaticCatalog) -> Result<(), csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for result in rdr.deserialize::<CatalogRecord>() {
        match result {
            Ok(record) => catalog.insert_package(
                GameId(record.game),
                record.package,
                PackageSnapshot {
                    name: record.name,
                    amount: record.amount,
                    price: record.price,
                },
            ),
            Err(e) => warn!("skipping malformed catalog row: {}", e),
        }
    }
    Ok(())
}

/// Registers promos from a CSV reader. Malformed or rejected rows are
/// skipped; replay continues.
pub fn load_promos<R: Read>(reader: R, engine: &Engine) -> Result<(), csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for result in rdr.deserialize::<PromoRecord>() {
        match result {
            Ok(record) => {
                let Some(def) = record.into_definition() else {
                    warn!("skipping invalid promo row");
                    continue;
                };
                if let Err(e) = engine.registry().register(def) {
                    warn!("skipping promo: {}", e);
                }
            }
            Err(e) => warn!("skipping malformed promo row: {}", e),
        }
    }
    Ok(())
}

/// Replays order operations from a CSV reader.
///
/// Supported ops:
/// - `create`: user, game, package, payment, optional code
/// - `pay`: user, order
/// - `cancel`: user, order
///
/// Operation failures (validation errors, illegal transitions) are logged
/// and skipped; the replay continues, mirroring per-request error handling.
pub fn process_operations<R: Read>(reader: R, engine: &Engine) -> Result<(), csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for result in rdr.deserialize::<OpRecord>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!("skipping malformed row: {}", e);
                continue;
            }
        };

        let now = Utc::now();
        let outcome = match record.op.to_lowercase().as_str() {
            "create" => {
                let (Some(user), Some(game), Some(package)) =
                    (record.user, record.game, record.package)
                else {
                    warn!("skipping create with missing fields");
                    continue;
                };
                let Some(payment) = record.payment.as_deref().and_then(|p| p.parse().ok()) else {
                    warn!("skipping create with unknown payment method");
                    continue;
                };
                let code = record.code.as_deref().filter(|c| !c.is_empty());
                engine
                    .create_order(
                        UserId(user),
                        GameId(game),
                        package,
                        HashMap::new(),
                        payment,
                        code,
                        now,
                    )
                    .map(|_| ())
            }
            "pay" => {
                let (Some(user), Some(order)) = (record.user, record.order) else {
                    warn!("skipping pay with missing fields");
                    continue;
                };
                engine.pay_order(OrderId(order), UserId(user), now).map(|_| ())
            }
            "cancel" => {
                let (Some(user), Some(order)) = (record.user, record.order) else {
                    warn!("skipping cancel with missing fields");
                    continue;
                };
                engine.cancel_order(OrderId(order), UserId(user))
            }
            other => {
                warn!("skipping unknown op '{}'", other);
                continue;
            }
        };

        if let Err(e) = outcome {
            warn!("skipping {} op: {}", record.op, e);
        }
    }
    Ok(())
}

/// Writes order states as CSV, sorted by order id for stable output.
///
/// Columns: `order, number, user, game, package, total, discount, final,
/// promo, status`
pub fn write_orders<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    let mut orders: Vec<_> = engine.orders().map(|o| Arc::clone(o.value())).collect();
    orders.sort_by_key(|o| o.id());

    for order in orders {
        wtr.serialize(&*order)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes the usage audit trail in redemption order, draining the feed.
pub fn write_usage<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    while let Some(order_id) = engine.usage().pop_audit() {
        if let Some(record) = engine.usage().get(order_id) {
            wtr.serialize(&record)?;
        }
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Cursor;
    use topup_engine_rs::OrderStatus;

    const CATALOG: &str = "game,package,name,amount,price\n\
                           1,0,60 Diamonds,60,100.0\n\
                           1,1,300 Diamonds,300,450.0\n\
                           2,0,Starter Pack,1,30.0\n";

    fn promos_csv(valid_from: &str, valid_until: &str) -> String {
        format!(
            "code,name,kind,value,min_amount,max_discount,usage_limit,user_limit,games,valid_from,valid_until,active\n\
             SAVE15,15% off,percentage,15,200,500,,,,{from},{until},\n\
             FIXED50,50 off,fixed_amount,50,,,,,,{from},{until},\n",
            from = valid_from,
            until = valid_until,
        )
    }

    fn make_engine(catalog_csv: &str) -> Engine {
        let catalog = Arc::new(StaticCatalog::new());
        load_catalog(Cursor::new(catalog_csv), &catalog).unwrap();
        Engine::new(
            catalog,
            Arc::new(MockGateway::approving()),
            Arc::new(InMemoryUserLedger::new()),
        )
    }

    #[test]
    fn create_order_without_promo() {
        let engine = make_engine(CATALOG);
        let ops = "op,user,game,package,payment,code,order\n\
                   create,1,1,0,wallet,,\n";
        process_operations(Cursor::new(ops), &engine).unwrap();

        assert_eq!(engine.order_count(), 1);
        let order = engine.get_order(OrderId(1)).unwrap();
        assert_eq!(order.total_amount(), dec!(100.0));
        assert_eq!(order.final_amount(), dec!(100.0));
    }

    #[test]
    fn create_order_with_promo_applies_discount() {
        let engine = make_engine(CATALOG);
        load_promos(
            Cursor::new(promos_csv("2020-01-01T00:00:00Z", "2099-01-01T00:00:00Z")),
            &engine,
        )
        .unwrap();

        let ops = "op,user,game,package,payment,code,order\n\
                   create,1,1,1,credit_card,save15,\n";
        process_operations(Cursor::new(ops), &engine).unwrap();

        let order = engine.get_order(OrderId(1)).unwrap();
        // 15% of 450 = 67.50
        assert_eq!(order.discount_amount(), dec!(67.50));
        assert_eq!(order.final_amount(), dec!(382.50));
        assert_eq!(order.applied_promo_code().as_deref(), Some("SAVE15"));
    }

    #[test]
    fn below_minimum_order_is_skipped() {
        let engine = make_engine(CATALOG);
        load_promos(
            Cursor::new(promos_csv("2020-01-01T00:00:00Z", "2099-01-01T00:00:00Z")),
            &engine,
        )
        .unwrap();

        // 30.0 is below SAVE15's 200 minimum; the create op fails and is skipped
        let ops = "op,user,game,package,payment,code,order\n\
                   create,1,2,0,wallet,SAVE15,\n";
        process_operations(Cursor::new(ops), &engine).unwrap();

        assert_eq!(engine.order_count(), 0);
    }

    #[test]
    fn pay_and_cancel_ops() {
        let engine = make_engine(CATALOG);
        let ops = "op,user,game,package,payment,code,order\n\
                   create,1,1,0,wallet,,\n\
                   create,1,1,0,wallet,,\n\
                   pay,1,,,,,1\n\
                   cancel,1,,,,,2\n";
        process_operations(Cursor::new(ops), &engine).unwrap();

        assert_eq!(engine.get_order(OrderId(1)).unwrap().status(), OrderStatus::Completed);
        assert_eq!(engine.get_order(OrderId(2)).unwrap().status(), OrderStatus::Cancelled);
    }

    #[test]
    fn expired_promo_rows_still_register_but_fail_validation() {
        let engine = make_engine(CATALOG);
        load_promos(
            Cursor::new(promos_csv("2020-01-01T00:00:00Z", "2020-12-31T00:00:00Z")),
            &engine,
        )
        .unwrap();
        assert_eq!(engine.registry().len(), 2);

        let ops = "op,user,game,package,payment,code,order\n\
                   create,1,1,1,wallet,FIXED50,\n";
        process_operations(Cursor::new(ops), &engine).unwrap();
        assert_eq!(engine.order_count(), 0);
    }

    #[test]
    fn skip_malformed_rows() {
        let engine = make_engine(CATALOG);
        let ops = "op,user,game,package,payment,code,order\n\
                   create,1,1,0,wallet,,\n\
                   bogus,row,data,here,,,\n\
                   create,not_a_user,1,0,wallet,,\n\
                   create,2,1,0,wallet,,\n";
        process_operations(Cursor::new(ops), &engine).unwrap();

        assert_eq!(engine.order_count(), 2);
    }

    #[test]
    fn write_orders_to_csv() {
        let engine = make_engine(CATALOG);
        let ops = "op,user,game,package,payment,code,order\n\
                   create,1,1,0,wallet,,\n";
        process_operations(Cursor::new(ops), &engine).unwrap();

        let mut output = Vec::new();
        write_orders(&engine, &mut output).unwrap();

        let output_str = String::from_utf8(output).unwrap();
        assert!(output_str.contains("order,number,user,game,package,total,discount,final,promo,status"));
        assert!(output_str.contains("pending"));
    }

    #[test]
    fn usage_audit_written_in_redemption_order() {
        let engine = make_engine(CATALOG);
        load_promos(
            Cursor::new(promos_csv("2020-01-01T00:00:00Z", "2099-01-01T00:00:00Z")),
            &engine,
        )
        .unwrap();

        let ops = "op,user,game,package,payment,code,order\n\
                   create,1,1,1,wallet,SAVE15,\n\
                   create,2,1,1,wallet,FIXED50,\n";
        process_operations(Cursor::new(ops), &engine).unwrap();

        let mut output = Vec::new();
        write_usage(&engine, &mut output).unwrap();
        let output_str = String::from_utf8(output).unwrap();

        let save_pos = output_str.find("SAVE15").unwrap();
        let fixed_pos = output_str.find("FIXED50").unwrap();
        assert!(save_pos < fixed_pos);
    }
}
