// src/core/engine.rs
use crate::config::AppConfig;
use crate::connectors::messages::BrokerEvent;
use crate::connectors::traits::Broker;
use crate::core::aggregator::{GreekOutcome, PortfolioAggregator};
use crate::core::feed::{BrokerFeed, CycleEvent, RunStatus};
use crate::core::lifecycle::{OrderLifecycleManager, RequestIdSequence};
use crate::core::planner::OrderPlanner;
use crate::core::target::TargetCalculator;
use crate::error::HedgeError;
use crate::types::{OrderIntent, PlacedOrder};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    AwaitingPositions,
    AwaitingGreeks,
    Planning,
    Executing,
    Cooldown,
    Done,
}

impl CyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingPositions => "awaiting positions",
            Self::AwaitingGreeks => "awaiting greeks",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Cooldown => "cooling down",
            Self::Done => "done",
        }
    }
}

/// Everything one cycle knows. Built fresh per cycle and dropped at its end.
struct CycleState {
    number: u64,
    phase: CyclePhase,
    aggregator: PortfolioAggregator,
    intents: Vec<OrderIntent>,
    placed: Vec<PlacedOrder>,
}

impl CycleState {
    fn new(number: u64, account: &str) -> Self {
        Self {
            number,
            phase: CyclePhase::AwaitingPositions,
            aggregator: PortfolioAggregator::new(account),
            intents: Vec::new(),
            placed: Vec::new(),
        }
    }

    fn enter(&mut self, phase: CyclePhase) {
        debug!(cycle = self.number, from = self.phase.as_str(), to = phase.as_str(), "Cycle phase");
        self.phase = phase;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleOutcome {
    pub intents: Vec<OrderIntent>,
    pub placed: usize,
    pub cancelled: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub cycles: u64,
    pub orders_placed: usize,
    pub cancels_accepted: usize,
    pub status: RunStatus,
}

impl RunReport {
    pub fn failed(&self) -> bool {
        self.status.failed()
    }
}

/// Drives hedge cycles against one broker session, once or until the
/// broker reports it is no longer connected.
pub struct HedgeEngine {
    config: AppConfig,
    broker: Box<dyn Broker>,
    calculator: TargetCalculator,
    planner: OrderPlanner,
    lifecycle: OrderLifecycleManager,
    ids: RequestIdSequence,
    shutdown: Option<watch::Receiver<bool>>,
}

impl HedgeEngine {
    pub fn new(config: AppConfig, broker: Box<dyn Broker>) -> Self {
        Self {
            calculator: TargetCalculator::new(config.max_shares, config.flatten_unhedged_stock),
            planner: OrderPlanner::new(config.min_share_change),
            lifecycle: OrderLifecycleManager::new(
                config.account.clone(),
                config.order.clone(),
                config.cooldown(),
            ),
            // Zero and below are reserved for system notices.
            ids: RequestIdSequence::new(1),
            shutdown: None,
            config,
            broker,
        }
    }

    /// Continuous mode stops at the next cycle boundary once this reads true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    async fn connect(&mut self, events: &mpsc::UnboundedSender<BrokerEvent>) -> Result<(), HedgeError> {
        let attempts = self.config.connection.connect_attempts;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.broker.connect(&self.config.account, events.clone()).await {
                Ok(()) => {
                    info!(
                        attempt,
                        address = %self.config.connection.address(),
                        client_id = self.config.connection.client_id,
                        "Connected to broker"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Broker connection attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(HedgeError::ConnectFailed {
            attempts,
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no connection attempt made".to_string()),
        })
    }

    pub async fn run(&mut self) -> Result<RunReport, HedgeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connect(&tx).await?;
        // The broker holds its own sender; ours must not keep the feed alive.
        drop(tx);

        let mut feed = BrokerFeed::new(rx, self.config.benign_error_codes.clone());
        let mut report = RunReport::default();

        info!(
            account = %self.config.account,
            continuous = self.config.continuous,
            max_shares = self.config.max_shares,
            min_share_change = self.config.min_share_change,
            cooldown_secs = self.config.cooldown_secs,
            "Hedging started"
        );

        let result = self.cycle_loop(&mut feed, &mut report).await;

        if let Err(e) = self.broker.disconnect().await {
            warn!(error = %e, "Broker disconnect failed");
        }
        report.status = feed.status().clone();

        match result {
            Ok(()) => {
                info!(
                    cycles = report.cycles,
                    orders_placed = report.orders_placed,
                    cancels_accepted = report.cancels_accepted,
                    request_errors = report.status.request_errors,
                    "Hedging finished"
                );
                Ok(report)
            }
            Err(e) => {
                error!(cycles = report.cycles, error = %e, "Hedging aborted");
                Err(e)
            }
        }
    }

    async fn cycle_loop(
        &mut self,
        feed: &mut BrokerFeed,
        report: &mut RunReport,
    ) -> Result<(), HedgeError> {
        loop {
            report.cycles += 1;
            let outcome = self.run_cycle(report.cycles, feed).await?;
            report.orders_placed += outcome.placed;
            report.cancels_accepted += outcome.cancelled;

            if !self.config.continuous {
                return Ok(());
            }
            if self.shutdown_requested() {
                info!("Shutdown requested, leaving hedge loop");
                return Ok(());
            }
            if !self.broker.is_connected() {
                info!("Broker no longer connected, leaving hedge loop");
                return Ok(());
            }
        }
    }

    /// One full pass: positions, greeks, targets, orders, cooldown, cancels.
    pub async fn run_cycle(
        &mut self,
        number: u64,
        feed: &mut BrokerFeed,
    ) -> Result<CycleOutcome, HedgeError> {
        let mut cycle = CycleState::new(number, &self.config.account);
        info!(cycle = number, "Hedge cycle started");

        if let Err(e) = self.broker.request_positions().await {
            feed.record_command_failure("request positions", None, &e);
            // Still pace the loop so a refusing broker is not hammered.
            cycle.enter(CyclePhase::Cooldown);
            self.lifecycle.settle(self.broker.as_ref(), &[], feed).await?;
            cycle.enter(CyclePhase::Done);
            return Ok(CycleOutcome::default());
        }
        self.collect_positions(&mut cycle, feed).await?;

        cycle.enter(CyclePhase::AwaitingGreeks);
        self.collect_greeks(&mut cycle, feed).await?;

        cycle.enter(CyclePhase::Planning);
        let mut aggregates = cycle.aggregator.aggregates();
        self.calculator.finalize(&mut aggregates);
        for aggregate in &aggregates {
            info!(
                cycle = number,
                symbol = %aggregate.symbol,
                current = aggregate.current_stock_quantity,
                weighted_delta = %aggregate.delta_weighted_quantity,
                option_legs = aggregate.option_legs,
                target = aggregate.target_stock_quantity,
                "Hedge target"
            );
        }
        cycle.intents = self.planner.plan(&aggregates);

        cycle.enter(CyclePhase::Executing);
        self.seed_request_ids(feed);
        cycle.placed = self
            .lifecycle
            .submit(self.broker.as_ref(), &cycle.intents, &mut self.ids, feed)
            .await;

        cycle.enter(CyclePhase::Cooldown);
        let cancelled = self
            .lifecycle
            .settle(self.broker.as_ref(), &cycle.placed, feed)
            .await?;

        cycle.enter(CyclePhase::Done);
        info!(
            cycle = number,
            intents = cycle.intents.len(),
            placed = cycle.placed.len(),
            cancelled,
            "Hedge cycle finished"
        );
        Ok(CycleOutcome {
            placed: cycle.placed.len(),
            intents: cycle.intents,
            cancelled,
        })
    }

    fn seed_request_ids(&mut self, feed: &mut BrokerFeed) {
        if let Some(next_valid) = feed.take_next_valid_id() {
            self.ids.seed(next_valid);
        }
    }

    async fn collect_positions(
        &mut self,
        cycle: &mut CycleState,
        feed: &mut BrokerFeed,
    ) -> Result<(), HedgeError> {
        while !cycle.aggregator.positions_complete() {
            match feed.next(cycle.phase.as_str()).await? {
                CycleEvent::Position(record) => cycle.aggregator.on_position(&record),
                CycleEvent::PositionEnd => cycle.aggregator.finish_positions(),
                CycleEvent::OptionComputation { ticker_id, .. } => {
                    debug!(ticker_id, "Ignoring option computation outside greek collection");
                }
                CycleEvent::RequestFailed { .. } => {}
            }
        }
        debug!(
            cycle = cycle.number,
            option_legs = cycle.aggregator.legs().count(),
            "Positions complete"
        );
        Ok(())
    }

    async fn collect_greeks(
        &mut self,
        cycle: &mut CycleState,
        feed: &mut BrokerFeed,
    ) -> Result<(), HedgeError> {
        // Tickers share the order id counter, so late ticks and order errors
        // cannot land on this cycle's legs.
        self.seed_request_ids(feed);
        let first_ticker_id = self.ids.reserve(cycle.aggregator.legs().count());
        let requests = cycle.aggregator.market_data_requests(first_ticker_id);

        for (sequence, ticker_id, contract) in &requests {
            debug!(ticker_id, contract = %contract.display_name(), "Requesting option greeks");
            if let Err(e) = self.broker.request_market_data(*ticker_id, contract).await {
                feed.record_command_failure("request market data", Some(*ticker_id), &e);
                cycle.aggregator.abandon_leg(*sequence);
            }
        }

        while !cycle.aggregator.is_complete() {
            match feed.next(cycle.phase.as_str()).await? {
                CycleEvent::OptionComputation {
                    ticker_id,
                    tick_type,
                    delta,
                } => {
                    let outcome = cycle
                        .aggregator
                        .on_option_computation(ticker_id, tick_type, delta);
                    if outcome != GreekOutcome::Accepted {
                        debug!(ticker_id, ?tick_type, delta, ?outcome, "Option computation skipped");
                    }
                }
                CycleEvent::RequestFailed { id, .. } => {
                    if let Some(sequence) = cycle.aggregator.sequence_of(id) {
                        cycle.aggregator.abandon_leg(sequence);
                    }
                }
                CycleEvent::Position(_) | CycleEvent::PositionEnd => {
                    debug!("Ignoring late position update");
                }
            }
        }

        for (_, ticker_id, _) in &requests {
            if let Err(e) = self.broker.cancel_market_data(*ticker_id).await {
                feed.record_command_failure("cancel market data", Some(*ticker_id), &e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PaperConfig, PaperPosition};
    use crate::connectors::paper::PaperBroker;
    use crate::types::{Contract, OptionRight, OrderSpec, Side};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::time::Duration;

    fn option(symbol: &str, strike: i64, quantity: i64, delta: f64) -> PaperPosition {
        PaperPosition {
            account: "DU1".to_string(),
            contract: Contract::option(
                symbol,
                NaiveDate::from_ymd_opt(2026, 12, 18).unwrap(),
                Decimal::from(strike),
                OptionRight::Call,
            ),
            quantity,
            delta: Some(delta),
        }
    }

    fn stock(account: &str, symbol: &str, quantity: i64) -> PaperPosition {
        PaperPosition {
            account: account.to_string(),
            contract: Contract::stock(symbol, "SMART", "USD"),
            quantity,
            delta: None,
        }
    }

    fn config(max_shares: u32, min_share_change: u32, continuous: bool) -> AppConfig {
        AppConfig {
            account: "DU1".to_string(),
            continuous,
            max_shares,
            min_share_change,
            ..AppConfig::default()
        }
    }

    fn engine(config: AppConfig, paper: PaperConfig) -> (HedgeEngine, PaperBroker) {
        let broker = PaperBroker::new(paper);
        let engine = HedgeEngine::new(config, Box::new(broker.clone()));
        (engine, broker)
    }

    fn placed_summary(broker: &PaperBroker) -> Vec<(String, Side, u64)> {
        broker
            .journal()
            .placed
            .iter()
            .map(|o| (o.contract.symbol.clone(), o.spec.action, o.spec.quantity))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_cycle_sells_capped_hedge() {
        let (mut engine, broker) = engine(
            config(20, 10, false),
            PaperConfig {
                positions: vec![stock("DU1", "ABC", 5), option("ABC", 50, 1, 0.5)],
                ..PaperConfig::default()
            },
        );

        let started = tokio::time::Instant::now();
        let report = engine.run().await.unwrap();

        assert_eq!(report.cycles, 1);
        assert!(!report.failed());
        assert_eq!(placed_summary(&broker), vec![("ABC".to_string(), Side::Sell, 25)]);
        assert!(started.elapsed() >= Duration::from_secs(30));

        let journal = broker.journal();
        assert_eq!(journal.market_data_requests.len(), 1);
        assert_eq!(journal.market_data_cancels, vec![journal.market_data_requests[0].0]);
        assert_eq!(journal.cancels, vec![journal.placed[0].order_id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_small_change_places_nothing() {
        let (mut engine, broker) = engine(
            config(100, 10, false),
            PaperConfig {
                // Target -10 against a holding of -5.
                positions: vec![stock("DU1", "ABC", -5), option("ABC", 50, 1, 0.1)],
                ..PaperConfig::default()
            },
        );

        let report = engine.run().await.unwrap();

        assert_eq!(report.orders_placed, 0);
        assert!(broker.journal().placed.is_empty());
        assert!(broker.journal().cancels.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_accounts_never_hedged() {
        let mut foreign_option = option("XYZ", 10, 10, 0.9);
        foreign_option.account = "DU2".to_string();
        let (mut engine, broker) = engine(
            config(1_000, 1, false),
            PaperConfig {
                positions: vec![
                    stock("DU2", "ABC", 300),
                    foreign_option,
                    option("ABC", 50, 2, 0.25),
                ],
                ..PaperConfig::default()
            },
        );

        engine.run().await.unwrap();

        assert_eq!(broker.journal().market_data_requests.len(), 1);
        assert_eq!(placed_summary(&broker), vec![("ABC".to_string(), Side::Sell, 50)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_noise_ticks_do_not_change_hedge() {
        let positions = vec![option("ABC", 50, 3, 0.4), option("ABC", 60, -1, 0.2)];
        let (mut quiet, quiet_broker) = engine(
            config(1_000, 1, false),
            PaperConfig {
                positions: positions.clone(),
                ..PaperConfig::default()
            },
        );
        let (mut noisy, noisy_broker) = engine(
            config(1_000, 1, false),
            PaperConfig {
                positions,
                noise_ticks: true,
                ..PaperConfig::default()
            },
        );

        quiet.run().await.unwrap();
        noisy.run().await.unwrap();

        // 0.4 * 3 - 0.2 = 1.0 delta -> short 100
        let expected = vec![("ABC".to_string(), Side::Sell, 100)];
        assert_eq!(placed_summary(&quiet_broker), expected);
        assert_eq!(placed_summary(&noisy_broker), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_fail_run_but_all_orders_cancelled() {
        let (mut engine, broker) = engine(
            config(1_000, 1, false),
            PaperConfig {
                positions: vec![
                    option("AAA", 10, 1, 0.5),
                    option("BBB", 10, 1, 0.5),
                    option("CCC", 10, 1, 0.5),
                ],
                reject_symbols: vec!["BBB".to_string()],
                refuse_cancels: true,
                ..PaperConfig::default()
            },
        );

        let report = engine.run().await.unwrap();

        assert!(report.failed());
        let journal = broker.journal();
        let placed: Vec<i64> = journal.placed.iter().map(|o| o.order_id).collect();
        assert_eq!(placed.len(), 3);
        assert_eq!(journal.cancels, placed);
        assert_eq!(report.cancels_accepted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_filled_orders_cancel_benignly() {
        let (mut engine, broker) = engine(
            config(1_000, 1, false),
            PaperConfig {
                positions: vec![option("AAA", 10, 1, 0.5)],
                fill_orders: true,
                ..PaperConfig::default()
            },
        );

        let report = engine.run().await.unwrap();

        assert!(!report.failed());
        assert_eq!(report.status.benign_notices, 1);
        assert_eq!(broker.journal().cancels.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_contract_skips_symbol_and_fails_run() {
        let mut missing = option("BAD", 10, 1, 0.5);
        missing.delta = None;
        let (mut engine, broker) = engine(
            config(1_000, 1, false),
            PaperConfig {
                positions: vec![missing, option("GOOD", 10, 1, -0.5)],
                ..PaperConfig::default()
            },
        );

        let report = engine.run().await.unwrap();

        assert!(report.failed());
        assert_eq!(placed_summary(&broker), vec![("GOOD".to_string(), Side::Buy, 50)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_cycles_plan_identical_intents() {
        let (mut engine, broker) = engine(
            config(1_000, 1, false),
            PaperConfig {
                positions: vec![
                    stock("DU1", "ABC", 10),
                    option("ABC", 50, 2, 0.3),
                    option("XYZ", 20, -1, 0.6),
                ],
                fill_orders: false,
                ..PaperConfig::default()
            },
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let mut paper = broker.clone();
        paper.connect("DU1", tx).await.unwrap();
        let mut feed = BrokerFeed::new(rx, vec![202]);

        let first = engine.run_cycle(1, &mut feed).await.unwrap();
        let second = engine.run_cycle(2, &mut feed).await.unwrap();

        assert_eq!(first.intents, second.intents);
        assert_eq!(first.intents.len(), 2);

        let journal = broker.journal();
        let ids: Vec<i64> = journal.placed.iter().map(|o| o.order_id).collect();
        assert_eq!(ids, vec![3, 4, 7, 8]);
        assert_eq!(journal.cancels, ids);
        // Each cycle subscribes under fresh ticker ids drawn from the same counter.
        let tickers: Vec<i64> = journal.market_data_requests.iter().map(|(id, _)| *id).collect();
        assert_eq!(tickers, vec![1, 2, 5, 6]);
    }

    /// Replays a venue rejection for the most recent order whenever greeks are
    /// requested, the way a late order error interleaves with market data.
    struct LateOrderErrors {
        inner: PaperBroker,
        events: Option<mpsc::UnboundedSender<BrokerEvent>>,
    }

    #[async_trait]
    impl Broker for LateOrderErrors {
        async fn connect(
            &mut self,
            account: &str,
            events: mpsc::UnboundedSender<BrokerEvent>,
        ) -> anyhow::Result<()> {
            self.events = Some(events.clone());
            self.inner.connect(account, events).await
        }

        async fn disconnect(&mut self) -> anyhow::Result<()> {
            self.inner.disconnect().await
        }

        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }

        async fn request_positions(&self) -> anyhow::Result<()> {
            self.inner.request_positions().await
        }

        async fn request_market_data(&self, ticker_id: i64, contract: &Contract) -> anyhow::Result<()> {
            let last_order = self.inner.journal().placed.last().map(|o| o.order_id);
            if let (Some(events), Some(order_id)) = (&self.events, last_order) {
                events
                    .send(BrokerEvent::error(order_id, 201, "Order rejected"))
                    .unwrap();
            }
            self.inner.request_market_data(ticker_id, contract).await
        }

        async fn cancel_market_data(&self, ticker_id: i64) -> anyhow::Result<()> {
            self.inner.cancel_market_data(ticker_id).await
        }

        async fn place_order(
            &self,
            order_id: i64,
            contract: &Contract,
            order: &OrderSpec,
        ) -> anyhow::Result<()> {
            self.inner.place_order(order_id, contract, order).await
        }

        async fn cancel_order(&self, order_id: i64) -> anyhow::Result<()> {
            self.inner.cancel_order(order_id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_errors_never_abandon_option_legs() {
        let paper = PaperBroker::new(PaperConfig {
            positions: vec![option("ABC", 50, 1, 0.5)],
            next_order_id: 10_000,
            fill_orders: false,
            session_cycles: Some(2),
            ..PaperConfig::default()
        });
        let broker = LateOrderErrors {
            inner: paper.clone(),
            events: None,
        };
        let mut engine = HedgeEngine::new(config(1_000, 1, true), Box::new(broker));

        let report = engine.run().await.unwrap();

        assert_eq!(report.cycles, 2);
        // The rejection for the first order is still a failed request.
        assert!(report.failed());
        let journal = paper.journal();
        let tickers: Vec<i64> = journal.market_data_requests.iter().map(|(id, _)| *id).collect();
        let orders: Vec<i64> = journal.placed.iter().map(|o| o.order_id).collect();
        assert_eq!(tickers, vec![10_000, 10_002]);
        assert_eq!(orders, vec![10_001, 10_003]);
        assert_eq!(
            placed_summary(&paper),
            vec![
                ("ABC".to_string(), Side::Sell, 50),
                ("ABC".to_string(), Side::Sell, 50)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_runs_until_disconnected() {
        let (mut engine, broker) = engine(
            config(1_000, 5, true),
            PaperConfig {
                positions: vec![option("ABC", 50, 2, 0.5)],
                fill_orders: true,
                session_cycles: Some(3),
                ..PaperConfig::default()
            },
        );

        let report = engine.run().await.unwrap();

        assert_eq!(report.cycles, 3);
        // First cycle fills the hedge; later cycles find nothing to do.
        assert_eq!(placed_summary(&broker), vec![("ABC".to_string(), Side::Sell, 100)]);
        assert_eq!(broker.journal().position_requests, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_continuous_mode() {
        let (tx, rx) = watch::channel(true);
        let (engine, _broker) = engine(
            config(1_000, 5, true),
            PaperConfig {
                positions: vec![option("ABC", 50, 2, 0.5)],
                ..PaperConfig::default()
            },
        );
        let mut engine = engine.with_shutdown(rx);

        let report = engine.run().await.unwrap();

        assert_eq!(report.cycles, 1);
        drop(tx);
    }
}
