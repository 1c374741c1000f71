//! Property test: no interleaving of checkout operations breaks the stock
//! counter invariant or sells more units than exist.

mod common;

use chrono::Duration;
use proptest::prelude::*;

use surgecart_checkout::{CheckoutError, FailureKind};
use surgecart_core::{HoldId, OrderId};

use common::TestStack;

#[derive(Debug, Clone, Copy)]
enum Op {
    CreateHold { qty: i64 },
    CreateOrder { pick: usize },
    Pay { pick: usize },
    Fail { pick: usize },
    AdvanceAndSweep,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1i64..4).prop_map(|qty| Op::CreateHold { qty }),
        2 => any::<usize>().prop_map(|pick| Op::CreateOrder { pick }),
        2 => any::<usize>().prop_map(|pick| Op::Pay { pick }),
        1 => any::<usize>().prop_map(|pick| Op::Fail { pick }),
        1 => Just(Op::AdvanceAndSweep),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn counters_stay_consistent(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");
        rt.block_on(async move {
            let stack = TestStack::new();
            let total = 12;
            let product = stack.seed_product(total).await;
            let worker = stack.checkout.worker();

            let mut holds: Vec<HoldId> = Vec::new();
            let mut orders: Vec<OrderId> = Vec::new();
            let mut paid_units = 0i64;

            for op in ops {
                match op {
                    Op::CreateHold { qty } => {
                        match stack.checkout.holds.create_hold(product.id, qty, None).await {
                            Ok(hold) => holds.push(hold.id),
                            Err(CheckoutError::NotEnoughStock { .. }) => {}
                            Err(other) => panic!("create_hold: {other}"),
                        }
                    }
                    Op::CreateOrder { pick } if !holds.is_empty() => {
                        let hold_id = holds[pick % holds.len()];
                        match stack.checkout.orders.create_order_from_hold(hold_id, None).await {
                            Ok(order) => {
                                if !orders.contains(&order.id) {
                                    orders.push(order.id);
                                }
                            }
                            Err(e) if e.is_business_conflict() => {}
                            Err(other) => panic!("create_order_from_hold: {other}"),
                        }
                    }
                    Op::Pay { pick } if !orders.is_empty() => {
                        let order_id = orders[pick % orders.len()];
                        let order = stack
                            .checkout
                            .orders
                            .order(order_id)
                            .await
                            .expect("read order")
                            .expect("order exists");
                        let qty_order = order.amount.minor() / 1_999;
                        match stack.checkout.orders.finalize_paid(order_id, None).await {
                            Ok(true) => paid_units += qty_order,
                            Ok(false) => {}
                            Err(e) if e.is_business_conflict() => {}
                            Err(other) => panic!("finalize_paid: {other}"),
                        }
                    }
                    Op::Fail { pick } if !orders.is_empty() => {
                        let order_id = orders[pick % orders.len()];
                        match stack
                            .checkout
                            .orders
                            .mark_as_failed(order_id, FailureKind::Failed)
                            .await
                        {
                            Ok(_) => {}
                            Err(e) if e.is_business_conflict() => {}
                            Err(other) => panic!("mark_as_failed: {other}"),
                        }
                    }
                    Op::AdvanceAndSweep => {
                        stack.clock.advance(
                            stack.config.hold_ttl()
                                + stack.config.expiry_grace()
                                + Duration::seconds(1),
                        );
                        worker.tick().await;
                        worker.sweep().await.expect("sweep");
                    }
                    _ => {}
                }

                let row = stack
                    .checkout
                    .catalog
                    .product(product.id)
                    .await
                    .expect("read product")
                    .expect("product exists");
                prop_assert!(row.counters_consistent(), "counters diverged: {row:?}");
                prop_assert!(row.stock_sold <= total);
                prop_assert_eq!(row.stock_sold, paid_units);
            }
            Ok(())
        })?;
    }
}
