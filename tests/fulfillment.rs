//! Fulfillment engine tests: exactly-once key assignment, idempotent
//! redelivery, and all-or-nothing rollback on inventory shortfall.

mod common;

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use common::*;

#[test]
fn test_fulfill_assigns_key_and_decrements_stock() {
    let mut conn = setup_test_db();
    let product = create_licensed_product(&mut conn, "Pro", &["PRO-1", "PRO-2"]);
    let order = create_test_order(&mut conn, "cs_1", "buyer@example.com", None, &[cart_line(&product, 1)]);

    let result = fulfill_order(&mut conn, &confirmation("cs_1", "pi_1")).unwrap();

    assert_eq!(result.order_id, order.id);
    assert_eq!(result.correlation_id, "cs_1");
    assert_eq!(result.status, OrderStatus::Fulfilled);
    assert_eq!(result.transaction_id.as_deref(), Some("pi_1"));
    assert_eq!(result.licenses.len(), 1);
    assert_eq!(result.licenses[0].license_key.as_deref(), Some("PRO-1"));
    assert_eq!(result.licenses[0].product_name, "Pro");

    assert_eq!(product_stock(&conn, &product.id), Some(1));
    let order = ledger::get_order_by_id(&conn, &order.id).unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Fulfilled);
    assert!(order.fulfilled_at.is_some());

    let key = &queries::list_license_keys_for_product(&conn, &product.id).unwrap()[0];
    assert_eq!(key.bound_email.as_deref(), Some("buyer@example.com"));
    assert_eq!(key.order_id.as_deref(), Some(order.id.as_str()));
}

#[test]
fn test_redelivery_returns_recorded_result() {
    let mut conn = setup_test_db();
    let product = create_licensed_product(&mut conn, "Pro", &["PRO-1", "PRO-2", "PRO-3"]);
    create_test_order(&mut conn, "cs_1", "buyer@example.com", None, &[cart_line(&product, 1)]);

    let first = fulfill_order(&mut conn, &confirmation("cs_1", "pi_1")).unwrap();
    let second = fulfill_order(&mut conn, &confirmation("cs_1", "pi_other")).unwrap();

    assert_eq!(first, second);
    assert_eq!(second.transaction_id.as_deref(), Some("pi_1"), "first transaction id is kept");
    assert_eq!(product_stock(&conn, &product.id), Some(2));
    assert_eq!(consumed_key_count(&conn, &product.id), 1);
}

#[test]
fn test_unknown_correlation_id_is_not_found() {
    let mut conn = setup_test_db();
    let err = fulfill_order(&mut conn, &confirmation("cs_missing", "pi_1")).unwrap_err();
    assert!(matches!(err, AppError::OrderNotFound));
}

#[test]
fn test_quantity_claims_one_key_per_unit() {
    let mut conn = setup_test_db();
    let product = create_licensed_product(&mut conn, "Pro", &["K-1", "K-2", "K-3", "K-4"]);
    create_test_order(&mut conn, "cs_q", "buyer@example.com", None, &[cart_line(&product, 3)]);

    let result = fulfill_order(&mut conn, &confirmation("cs_q", "pi_q")).unwrap();

    let keys: Vec<&str> = result
        .licenses
        .iter()
        .filter_map(|l| l.license_key.as_deref())
        .collect();
    assert_eq!(keys, vec!["K-1", "K-2", "K-3"]);
    assert_eq!(product_stock(&conn, &product.id), Some(1));
}

#[test]
fn test_unlicensed_line_yields_entry_without_key() {
    let mut conn = setup_test_db();
    let licensed = create_licensed_product(&mut conn, "Pro", &["PRO-1"]);
    let sticker = create_test_product(&conn, "Sticker", 300, None, false);
    create_test_order(
        &mut conn,
        "cs_mixed",
        "buyer@example.com",
        None,
        &[cart_line(&licensed, 1), cart_line(&sticker, 2)],
    );

    let result = fulfill_order(&mut conn, &confirmation("cs_mixed", "pi_m")).unwrap();

    assert_eq!(result.licenses.len(), 2);
    assert_eq!(result.licenses[0].license_key.as_deref(), Some("PRO-1"));
    assert_eq!(result.licenses[1].product_name, "Sticker");
    assert_eq!(result.licenses[1].license_key, None);
    assert_eq!(
        result.licenses[1].download_link.as_deref(),
        Some("https://downloads.test/sticker")
    );
    assert_eq!(product_stock(&conn, &sticker.id), None);
}

#[test]
fn test_shortfall_rolls_back_everything_and_marks_failed() {
    let mut conn = setup_test_db();
    let plenty = create_licensed_product(&mut conn, "Plenty", &["P-1", "P-2"]);
    let scarce = create_licensed_product(&mut conn, "Scarce", &["S-1"]);
    let order = create_test_order(
        &mut conn,
        "cs_short",
        "buyer@example.com",
        None,
        &[cart_line(&plenty, 1), cart_line(&scarce, 2)],
    );

    let err = fulfill_order(&mut conn, &confirmation("cs_short", "pi_s")).unwrap_err();
    assert!(matches!(err, AppError::LicenseExhausted(ref id) if *id == scarce.id));

    // Nothing from the first line survived the rollback
    assert_eq!(consumed_key_count(&conn, &plenty.id), 0);
    assert_eq!(consumed_key_count(&conn, &scarce.id), 0);
    assert_eq!(product_stock(&conn, &plenty.id), Some(2));
    assert_eq!(product_stock(&conn, &scarce.id), Some(1));

    let order = ledger::get_order_by_id(&conn, &order.id).unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
    assert!(order.failure_reason.is_some());
    assert_eq!(order.transaction_id.as_deref(), Some("pi_s"));
}

#[test]
fn test_failed_order_is_retried_after_restock() {
    let mut conn = setup_test_db();
    let product = create_licensed_product(&mut conn, "Pro", &[]);
    let order = create_test_order(&mut conn, "cs_retry", "buyer@example.com", None, &[cart_line(&product, 1)]);

    let err = fulfill_order(&mut conn, &confirmation("cs_retry", "pi_r")).unwrap_err();
    assert!(err.is_inventory_shortfall());

    queries::import_license_keys(&mut conn, &product.id, "LATE-1").unwrap();

    let result = fulfill_order(&mut conn, &confirmation("cs_retry", "pi_r")).unwrap();
    assert_eq!(result.status, OrderStatus::Fulfilled);
    assert_eq!(result.licenses[0].license_key.as_deref(), Some("LATE-1"));

    let order = ledger::get_order_by_id(&conn, &order.id).unwrap().unwrap();
    assert_eq!(order.failure_reason, None);
    assert_eq!(product_stock(&conn, &product.id), Some(0));
}

#[test]
fn test_finite_stock_shortfall_on_unlicensed_product() {
    let mut conn = setup_test_db();
    let product = create_test_product(&conn, "Mug", 900, Some(1), false);
    create_test_order(&mut conn, "cs_mug", "buyer@example.com", None, &[cart_line(&product, 2)]);

    let err = fulfill_order(&mut conn, &confirmation("cs_mug", "pi_mug")).unwrap_err();

    assert!(matches!(err, AppError::OutOfStock(_)));
    assert_eq!(product_stock(&conn, &product.id), Some(1));
    let order = ledger::get_order_by_correlation_id(&conn, "cs_mug").unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
}

#[test]
fn test_order_binds_keys_to_registered_buyer() {
    let mut conn = setup_test_db();
    let user = create_test_user(&conn, "buyer", "buyer@example.com");
    let product = create_licensed_product(&mut conn, "Pro", &["PRO-1"]);
    create_test_order(&mut conn, "cs_user", &user.email, Some(&user.id), &[cart_line(&product, 1)]);

    fulfill_order(&mut conn, &confirmation("cs_user", "pi_u")).unwrap();

    let current = queries::get_current_license(&conn, &user).unwrap().unwrap();
    assert_eq!(current.product_name, "Pro");
    assert_eq!(current.license_key, "PRO-1");
}

#[test]
fn test_concurrent_redelivery_fulfills_once() {
    let (state, _dir) = create_file_backed_state();
    let product = {
        let mut conn = state.db.get().unwrap();
        let product = create_licensed_product(&mut conn, "Pro", &["C-1", "C-2", "C-3", "C-4"]);
        create_test_order(&mut conn, "cs_race", "buyer@example.com", None, &[cart_line(&product, 1)]);
        product
    };

    let threads = 6;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let pool = state.db.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut conn = pool.get().unwrap();
                barrier.wait();
                fulfill_order(&mut conn, &confirmation("cs_race", "pi_race"))
            })
        })
        .collect();

    let results: Vec<FulfillmentResult> = handles
        .into_iter()
        .map(|h| h.join().unwrap().expect("every delivery succeeds"))
        .collect();

    let keys: HashSet<Option<String>> = results
        .iter()
        .map(|r| r.licenses[0].license_key.clone())
        .collect();
    assert_eq!(keys.len(), 1, "every delivery sees the same key");

    let conn = state.db.get().unwrap();
    assert_eq!(consumed_key_count(&conn, &product.id), 1);
    assert_eq!(product_stock(&conn, &product.id), Some(3));
}

#[test]
fn test_concurrent_orders_get_distinct_keys() {
    let (state, _dir) = create_file_backed_state();
    let orders = 5;
    let product = {
        let mut conn = state.db.get().unwrap();
        let product = create_licensed_product(&mut conn, "Pro", &["D-1", "D-2", "D-3"]);
        for i in 0..orders {
            create_test_order(
                &mut conn,
                &format!("cs_{}", i),
                &format!("buyer{}@example.com", i),
                None,
                &[cart_line(&product, 1)],
            );
        }
        product
    };

    let barrier = Arc::new(Barrier::new(orders));
    let handles: Vec<_> = (0..orders)
        .map(|i| {
            let pool = state.db.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut conn = pool.get().unwrap();
                barrier.wait();
                fulfill_order(&mut conn, &confirmation(&format!("cs_{}", i), "pi"))
            })
        })
        .collect();

    let mut fulfilled = Vec::new();
    let mut exhausted = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(result) => fulfilled.push(result.licenses[0].license_key.clone().unwrap()),
            Err(AppError::LicenseExhausted(_)) => exhausted += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    let unique: HashSet<&String> = fulfilled.iter().collect();
    assert_eq!(fulfilled.len(), 3);
    assert_eq!(unique.len(), 3);
    assert_eq!(exhausted, 2);

    let conn = state.db.get().unwrap();
    assert_eq!(product_stock(&conn, &product.id), Some(0));
    assert_eq!(ledger::list_orders(&conn, Some(OrderStatus::Failed)).unwrap().len(), 2);
}
