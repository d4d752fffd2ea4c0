//! Startup order recovery
//!
//! Runs once at process start, before new signal intake. Every order left in
//! a pending state is reconciled against the broker's reported status; an
//! order whose ground truth cannot be established is flagged for manual
//! review, never guessed at. Per-order failures stay per-order.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::broker::{BrokerClient, BrokerOrderState};
use crate::domain::{Order, OrderStatus};
use crate::error::Result;
use crate::manager::OrderManager;
use crate::store::TradeStore;

/// Result of one recovery pass
#[derive(Debug, Clone, Default)]
pub struct RecoverySummary {
    pub total: usize,
    /// Orders moved to their broker-confirmed state
    pub recovered: usize,
    /// Orders that could not be reconciled
    pub failed: usize,
    pub manual_review: Vec<Uuid>,
    /// Still-working orders left for continued monitoring
    pub monitoring: Vec<Uuid>,
}

impl RecoverySummary {
    pub fn fully_reconciled(&self) -> bool {
        self.failed == 0
    }
}

pub struct OrderRecovery {
    manager: Arc<OrderManager>,
    store: Arc<dyn TradeStore>,
    broker: Option<Arc<dyn BrokerClient>>,
}

impl OrderRecovery {
    pub fn new(
        manager: Arc<OrderManager>,
        store: Arc<dyn TradeStore>,
        broker: Option<Arc<dyn BrokerClient>>,
    ) -> Self {
        Self {
            manager,
            store,
            broker,
        }
    }

    /// Reconcile every pending order against the broker.
    pub async fn run(&self) -> Result<RecoverySummary> {
        let pending = self
            .store
            .orders_in_states(&OrderStatus::PENDING_STATES)
            .await?;
        let mut summary = RecoverySummary {
            total: pending.len(),
            ..Default::default()
        };

        info!("Recovery started: {} pending order(s)", summary.total);

        for mut order in pending {
            match self.recover_order(&mut order).await {
                Ok(outcome) => match outcome {
                    RecoveryOutcome::Recovered => summary.recovered += 1,
                    RecoveryOutcome::StillWorking { transitioned } => {
                        if transitioned {
                            summary.recovered += 1;
                        }
                        summary.monitoring.push(order.id);
                    }
                    RecoveryOutcome::ManualReview => {
                        summary.failed += 1;
                        summary.manual_review.push(order.id);
                    }
                },
                Err(e) => {
                    // One stuck order must not abort the batch.
                    error!("Recovery of order {} failed: {}", order.id, e);
                    let note = format!("recovery failed: {}", e);
                    if let Err(flag_err) =
                        self.manager.flag_manual_review(&mut order, &note).await
                    {
                        error!(
                            "Could not flag order {} for review: {}",
                            order.id, flag_err
                        );
                    }
                    summary.failed += 1;
                    summary.manual_review.push(order.id);
                }
            }
        }

        info!(
            "Recovery complete: total={}, recovered={}, failed={}, monitoring={}",
            summary.total,
            summary.recovered,
            summary.failed,
            summary.monitoring.len()
        );
        if !summary.manual_review.is_empty() {
            warn!(
                "Orders needing manual review: {:?}",
                summary.manual_review
            );
        }
        Ok(summary)
    }

    async fn recover_order(&self, order: &mut Order) -> Result<RecoveryOutcome> {
        let Some(broker) = &self.broker else {
            self.manager
                .flag_manual_review(order, "no broker client configured")
                .await?;
            return Ok(RecoveryOutcome::ManualReview);
        };

        let Some(broker_order_id) = order.broker_order_id.clone() else {
            self.manager
                .flag_manual_review(order, "no broker order id recorded")
                .await?;
            return Ok(RecoveryOutcome::ManualReview);
        };

        let report = match broker.get_order_status(&broker_order_id).await {
            Ok(report) => report,
            Err(e) => {
                self.manager
                    .flag_manual_review(order, &format!("broker status query failed: {}", e))
                    .await?;
                return Ok(RecoveryOutcome::ManualReview);
            }
        };

        match BrokerOrderState::parse(&report.status) {
            BrokerOrderState::Filled => {
                let price = report.filled_price.unwrap_or(Decimal::ZERO);
                self.manager.fully_filled(order, price).await?;
                info!("Order {} recovered as filled at {}", order.id, price);
                Ok(RecoveryOutcome::Recovered)
            }
            BrokerOrderState::Cancelled => {
                self.manager.cancel(order, "recovered as cancelled").await?;
                info!("Order {} recovered as cancelled", order.id);
                Ok(RecoveryOutcome::Recovered)
            }
            BrokerOrderState::PartiallyFilled => {
                if order.status == OrderStatus::PartialFilled {
                    // Already where the broker says it is; keep watching.
                    return Ok(RecoveryOutcome::StillWorking {
                        transitioned: false,
                    });
                }
                let price = report.filled_price.unwrap_or(Decimal::ZERO);
                self.manager
                    .partial_fill(order, report.filled_quantity, price)
                    .await?;
                info!(
                    "Order {} recovered as partially filled ({}/{})",
                    order.id, report.filled_quantity, order.quantity
                );
                Ok(RecoveryOutcome::StillWorking { transitioned: true })
            }
            BrokerOrderState::Open => Ok(RecoveryOutcome::StillWorking {
                transitioned: false,
            }),
            BrokerOrderState::Unknown(raw) => {
                self.manager
                    .flag_manual_review(
                        order,
                        &format!("broker reported unrecognized status '{}'", raw),
                    )
                    .await?;
                Ok(RecoveryOutcome::ManualReview)
            }
        }
    }
}

enum RecoveryOutcome {
    /// Moved to a broker-confirmed terminal state
    Recovered,
    /// Broker still working the order; keep watching it
    StillWorking { transitioned: bool },
    ManualReview,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerOrderReport, MockBrokerClient};
    use crate::bus::EventBus;
    use crate::conflict::ConflictDetector;
    use crate::domain::{OrderAction, Strategy, TimeHorizon};
    use crate::error::ArbiterError;
    use crate::ownership::OwnershipService;
    use crate::store::MemoryStore;
    use rust_decimal_macros::dec;

    struct Fixture {
        store: Arc<MemoryStore>,
        manager: Arc<OrderManager>,
    }

    impl Fixture {
        fn new() -> Self {
            let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
            let bus = Arc::new(EventBus::default());
            let detector = Arc::new(ConflictDetector::new(store.clone(), bus.clone()));
            let ownership = Arc::new(OwnershipService::new(store.clone(), bus.clone()));
            let manager = Arc::new(OrderManager::new(
                store.clone(),
                bus,
                detector,
                ownership,
            ));
            Self { store, manager }
        }

        async fn sent_order(&self, ticker: &str, broker_id: &str) -> Order {
            let s = Strategy::new(&format!("s-{}", ticker), 50, TimeHorizon::Intraday);
            self.store.insert_strategy(&s).await.unwrap();
            let mut order = self
                .manager
                .create_order(ticker, OrderAction::Buy, 100, s.id)
                .await
                .unwrap();
            self.manager.order_sent(&mut order, broker_id).await.unwrap();
            order
        }

        fn recovery(&self, broker: Option<Arc<dyn BrokerClient>>) -> OrderRecovery {
            OrderRecovery::new(self.manager.clone(), self.store.clone(), broker)
        }
    }

    #[tokio::test]
    async fn test_filled_report_completes_the_order() {
        let fx = Fixture::new();
        let order = fx.sent_order("AAPL", "B-1").await;

        let mut broker = MockBrokerClient::new();
        broker.expect_get_order_status().returning(|_| {
            Ok(BrokerOrderReport {
                status: "filled".to_string(),
                filled_quantity: 100,
                filled_price: Some(dec!(189.40)),
            })
        });

        let summary = fx.recovery(Some(Arc::new(broker))).run().await.unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.recovered, 1);
        assert_eq!(summary.failed, 0);

        let stored = fx.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::FullyFilled);
        assert_eq!(stored.filled_price, Some(dec!(189.40)));
    }

    #[tokio::test]
    async fn test_cancelled_report_cancels_the_order() {
        let fx = Fixture::new();
        let order = fx.sent_order("TSLA", "B-2").await;

        let mut broker = MockBrokerClient::new();
        broker.expect_get_order_status().returning(|_| {
            Ok(BrokerOrderReport {
                status: "CANCELLED".to_string(),
                filled_quantity: 0,
                filled_price: None,
            })
        });

        let summary = fx.recovery(Some(Arc::new(broker))).run().await.unwrap();
        assert_eq!(summary.recovered, 1);

        let stored = fx.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
        assert_eq!(stored.error.as_deref(), Some("recovered as cancelled"));
    }

    #[tokio::test]
    async fn test_partial_report_transitions_once_then_monitors() {
        let fx = Fixture::new();
        let order = fx.sent_order("MSFT", "B-3").await;

        let make_broker = || {
            let mut broker = MockBrokerClient::new();
            broker.expect_get_order_status().returning(|_| {
                Ok(BrokerOrderReport {
                    status: "partial".to_string(),
                    filled_quantity: 40,
                    filled_price: Some(dec!(410.00)),
                })
            });
            Arc::new(broker)
        };

        let summary = fx.recovery(Some(make_broker())).run().await.unwrap();
        assert_eq!(summary.recovered, 1);
        // The partial stays on the watch list even after transitioning.
        assert_eq!(summary.monitoring, vec![order.id]);
        let stored = fx.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::PartialFilled);

        // Second pass: already reconciled, nothing transitions again.
        let history_len = fx.manager.transition_history().len();
        let summary = fx.recovery(Some(make_broker())).run().await.unwrap();
        assert_eq!(summary.recovered, 0);
        assert_eq!(summary.monitoring, vec![order.id]);
        assert_eq!(fx.manager.transition_history().len(), history_len);
    }

    #[tokio::test]
    async fn test_open_report_leaves_order_untouched() {
        let fx = Fixture::new();
        let order = fx.sent_order("NVDA", "B-4").await;

        let mut broker = MockBrokerClient::new();
        broker.expect_get_order_status().returning(|_| {
            Ok(BrokerOrderReport {
                status: "open".to_string(),
                filled_quantity: 0,
                filled_price: None,
            })
        });

        let summary = fx.recovery(Some(Arc::new(broker))).run().await.unwrap();
        assert_eq!(summary.recovered, 0);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.monitoring, vec![order.id]);

        let stored = fx.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::OrderSent);
    }

    #[tokio::test]
    async fn test_missing_broker_flags_without_transition() {
        let fx = Fixture::new();
        let order = fx.sent_order("AMZN", "B-5").await;

        let summary = fx.recovery(None).run().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.manual_review, vec![order.id]);

        let stored = fx.store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::OrderSent);
        assert!(stored.needs_manual_review);
        assert!(stored.error.as_deref().unwrap().contains("no broker client"));
    }

    #[tokio::test]
    async fn test_unknown_status_and_query_errors_are_isolated() {
        let fx = Fixture::new();
        let weird = fx.sent_order("AMD", "B-6").await;
        let broken = fx.sent_order("INTC", "B-7").await;
        let fine = fx.sent_order("GOOG", "B-8").await;

        let mut broker = MockBrokerClient::new();
        broker
            .expect_get_order_status()
            .returning(|id: &str| match id {
                "B-6" => Ok(BrokerOrderReport {
                    status: "limbo".to_string(),
                    filled_quantity: 0,
                    filled_price: None,
                }),
                "B-7" => Err(ArbiterError::BrokerUnavailable("timeout".to_string())),
                _ => Ok(BrokerOrderReport {
                    status: "filled".to_string(),
                    filled_quantity: 100,
                    filled_price: Some(dec!(1.00)),
                }),
            });

        let summary = fx.recovery(Some(Arc::new(broker))).run().await.unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.recovered, 1);
        assert_eq!(summary.failed, 2);
        assert!(summary.manual_review.contains(&weird.id));
        assert!(summary.manual_review.contains(&broken.id));
        assert!(!summary.fully_reconciled());

        // The batch continued past the failures.
        let stored = fx.store.get_order(fine.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::FullyFilled);

        // Neither problem order changed status.
        for id in [weird.id, broken.id] {
            let stored = fx.store.get_order(id).await.unwrap().unwrap();
            assert_eq!(stored.status, OrderStatus::OrderSent);
            assert!(stored.needs_manual_review);
        }
    }

    #[tokio::test]
    async fn test_rerun_over_reconciled_set_is_a_no_op() {
        let fx = Fixture::new();
        fx.sent_order("AAPL", "B-9").await;

        let make_broker = || {
            let mut broker = MockBrokerClient::new();
            broker.expect_get_order_status().returning(|_| {
                Ok(BrokerOrderReport {
                    status: "filled".to_string(),
                    filled_quantity: 100,
                    filled_price: Some(dec!(2.00)),
                })
            });
            Arc::new(broker)
        };

        let first = fx.recovery(Some(make_broker())).run().await.unwrap();
        assert_eq!(first.recovered, 1);

        let history_len = fx.manager.transition_history().len();
        let second = fx.recovery(Some(make_broker())).run().await.unwrap();
        assert_eq!(second.total, 0);
        assert_eq!(second.recovered, 0);
        assert_eq!(fx.manager.transition_history().len(), history_len);
    }
}
