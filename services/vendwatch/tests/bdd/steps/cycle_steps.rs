//! BDD step definitions for the poll cycle: diffing, committing, failures

use cucumber::{given, then, when};

use vendwatch::snapshot::{PaymentMethod, SaleRow, TerminalAlert};
use vendwatch::state_store::StateStore;

use crate::world::{list, VendwatchWorld};

fn parse_alerts(arg: &str) -> Vec<(String, u32)> {
    list(arg)
        .iter()
        .map(|pair| {
            let (name, count) = pair
                .split_once('=')
                .unwrap_or_else(|| panic!("expected name=count, got {}", pair));
            (name.to_string(), count.parse().expect("error count"))
        })
        .collect()
}

#[given("no committed state")]
async fn no_committed_state(world: &mut VendwatchWorld) {
    assert_eq!(world.store.snapshot().await, Default::default());
}

#[given(expr = "the committed cursor is {string}")]
async fn committed_cursor(world: &mut VendwatchWorld, cursor: String) {
    let mut state = world.store.snapshot().await;
    state.last_processed_sale_id = Some(cursor);
    world.store.save(&state).await.unwrap();
}

#[given(expr = "terminal {string} previously had {int} error(s)")]
async fn previous_alert(world: &mut VendwatchWorld, name: String, count: u32) {
    let mut state = world.store.snapshot().await;
    state.terminal_alert_counts.insert(name, count);
    world.store.save(&state).await.unwrap();
}

#[given(expr = "the dashboard lists sales {string}")]
async fn dashboard_sales(world: &mut VendwatchWorld, ids: String) {
    world.source.snapshot.lock().await.sales = list(&ids)
        .into_iter()
        .map(|id| {
            SaleRow::new(
                [id, "ул. Ленина, 1".to_string(), "12:00".into(), "19 л".into(), "95 ₽".into()],
                PaymentMethod::Card,
            )
        })
        .collect();
}

#[given(expr = "the dashboard reports terminals {string}")]
async fn dashboard_terminals(world: &mut VendwatchWorld, alerts: String) {
    world.source.snapshot.lock().await.terminals = parse_alerts(&alerts)
        .into_iter()
        .map(|(terminal_name, error_count)| TerminalAlert {
            terminal_name,
            error_count,
        })
        .collect();
}

#[given("the dashboard rejects the login")]
async fn login_rejected(world: &mut VendwatchWorld) {
    *world.source.login_rejected.lock().await = true;
}

#[given("the state store rejects writes")]
fn store_rejects_writes(world: &mut VendwatchWorld) {
    world.store.set_fail_saves(true);
}

#[when("the state store recovers")]
fn store_recovers(world: &mut VendwatchWorld) {
    world.store.set_fail_saves(false);
}

#[when("the poll cycle ticks")]
async fn cycle_ticks(world: &mut VendwatchWorld) {
    let outcome = world.cycle().await.tick().await;
    world.outcome = Some(outcome);
}

#[when(expr = "the poll cycle ticks {int} times")]
async fn cycle_ticks_repeatedly(world: &mut VendwatchWorld, times: usize) {
    for _ in 0..times {
        let outcome = world.cycle().await.tick().await;
        world.outcome = Some(outcome);
    }
}

#[when("the service restarts")]
fn service_restarts(world: &mut VendwatchWorld) {
    world.cycle = None;
}

#[then("the tick succeeds")]
fn tick_succeeds(world: &mut VendwatchWorld) {
    let outcome = world.outcome.as_ref().expect("no tick has run");
    assert!(outcome.is_ok(), "tick failed: {:?}", outcome);
}

#[then(expr = "the tick fails while {word}")]
fn tick_fails(world: &mut VendwatchWorld, stage: String) {
    match world.outcome.as_ref().expect("no tick has run") {
        Ok(report) => panic!("tick unexpectedly succeeded: {:?}", report),
        Err(e) => assert_eq!(e.stage.to_string(), stage),
    }
}

#[then("the tick was a baseline")]
fn tick_was_baseline(world: &mut VendwatchWorld) {
    match world.outcome.as_ref().expect("no tick has run") {
        Ok(report) => assert!(report.baseline),
        Err(e) => panic!("tick failed: {}", e),
    }
}

#[then(expr = "the stored cursor is {string}")]
async fn stored_cursor(world: &mut VendwatchWorld, cursor: String) {
    let state = world.store.snapshot().await;
    assert_eq!(state.last_processed_sale_id, Some(cursor));
}

#[then(expr = "the stored alerts are {string}")]
async fn stored_alerts(world: &mut VendwatchWorld, alerts: String) {
    let state = world.store.snapshot().await;
    let stored: Vec<(String, u32)> = state.terminal_alert_counts.into_iter().collect();
    assert_eq!(stored, parse_alerts(&alerts));
}
