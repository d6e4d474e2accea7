//! Session-end behavior: expiry timer, explicit logout, and cross-tab
//! reconciliation. In every case the visible cart contents survive.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use copperleaf_cart::{CartConfig, CartFacade, MemoryStorage, SyncState};
use copperleaf_core::{ProductId, QuantityLedger};
use copperleaf_integration_tests::{RecordingGateway, mint_token_expiring_in};

fn pid(s: &str) -> ProductId {
    ProductId::new(s)
}

fn rig(gateway: Arc<RecordingGateway>) -> (CartFacade, MemoryStorage) {
    let storage = MemoryStorage::new();
    let config = CartConfig::with_base_url("https://api.example.test").unwrap();
    let facade = CartFacade::new(config, Arc::new(storage.clone()), gateway);
    (facade, storage)
}

// =============================================================================
// Expiry
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_idle_expiry_keeps_cart_and_regates_checkout() {
    let gateway = Arc::new(RecordingGateway::new());
    let (facade, _storage) = rig(gateway.clone());

    facade.add_to_cart(&pid("p1"));
    facade.login(&mint_token_expiring_in("u-1", 120)).await;
    assert_eq!(gateway.replace_count(), 1);
    assert!(!facade.requires_login_for_checkout());

    // Idle past the token's expiry instant
    tokio::time::sleep(Duration::from_secs(125)).await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    // One final best-effort save went out with the lapsed token
    assert_eq!(gateway.replace_count(), 2);
    assert_eq!(
        gateway.replace_payloads().last().unwrap().quantity(&pid("p1")),
        1
    );

    // The badge still shows the item; checkout is gated again
    assert_eq!(facade.total_cart_items(), 1);
    assert!(facade.requires_login_for_checkout());
    assert_eq!(facade.sync_state(), SyncState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_expiry_save_failure_is_swallowed() {
    let gateway = Arc::new(RecordingGateway::new());
    let (facade, _storage) = rig(gateway.clone());

    facade.add_to_cart(&pid("p1"));
    facade.login(&mint_token_expiring_in("u-1", 60)).await;

    gateway.fail_next_replaces(1);
    tokio::time::sleep(Duration::from_secs(65)).await;
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    // Best-effort means best-effort: no retry loop after demotion
    tokio::time::sleep(Duration::from_secs(120)).await;
    tokio::task::yield_now().await;
    assert_eq!(gateway.replace_count(), 1); // the login push only
    assert!(facade.requires_login_for_checkout());
    assert_eq!(facade.total_cart_items(), 1);
}

// =============================================================================
// Explicit Logout
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_logout_saves_final_ledger_and_retains_it_locally() {
    let gateway = Arc::new(RecordingGateway::new());
    let (facade, _storage) = rig(gateway.clone());

    facade.add_to_cart(&pid("p1"));
    facade.login(&mint_token_expiring_in("u-1", 3_600)).await;

    // A mutation whose debounced push has not fired yet
    facade.add_to_cart(&pid("p2"));
    facade.logout().await;

    // The pending debounce was superseded by the single final save
    let expected: QuantityLedger = [(pid("p1"), 1), (pid("p2"), 1)].into_iter().collect();
    assert_eq!(gateway.replace_count(), 2);
    assert_eq!(gateway.replace_payloads().last().unwrap(), &expected);

    tokio::time::sleep(Duration::from_secs(5)).await;
    tokio::task::yield_now().await;
    assert_eq!(gateway.replace_count(), 2);

    // Guest again, cart intact
    assert!(facade.requires_login_for_checkout());
    assert_eq!(facade.ledger(), expected);
}

// =============================================================================
// Debounce
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_rapid_mutations_collapse_into_one_push() {
    let gateway = Arc::new(RecordingGateway::new());
    let (facade, _storage) = rig(gateway.clone());

    facade.login(&mint_token_expiring_in("u-1", 3_600)).await;
    let pushes_before = gateway.replace_count();

    for _ in 0..5 {
        facade.add_to_cart(&pid("p1"));
    }
    facade.add_to_cart(&pid("p2"));

    tokio::time::sleep(Duration::from_millis(600)).await;
    tokio::task::yield_now().await;

    assert_eq!(gateway.replace_count(), pushes_before + 1);
    assert_eq!(gateway.replace_payloads().last().unwrap(), &facade.ledger());
    assert_eq!(gateway.server().quantity(&pid("p1")), 5);
}

// =============================================================================
// Cross-Tab Reconciliation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_sibling_tab_login_and_logout_propagate_on_refresh() {
    let storage = MemoryStorage::new();
    let gateway = Arc::new(RecordingGateway::new());
    let config = CartConfig::with_base_url("https://api.example.test").unwrap();

    let tab_a = CartFacade::new(
        config.clone(),
        Arc::new(storage.clone()),
        gateway.clone(),
    );
    let tab_b = CartFacade::new(config, Arc::new(storage), gateway);

    tab_a.add_to_cart(&pid("p1"));
    tab_a.login(&mint_token_expiring_in("u-1", 3_600)).await;

    // Tab B comes back to the foreground and picks up the session
    assert!(tab_b.requires_login_for_checkout());
    tab_b.refresh();
    assert!(!tab_b.requires_login_for_checkout());
    assert_eq!(tab_b.total_cart_items(), 1);

    // Tab A logs out; tab B notices on its next visibility change
    tab_a.logout().await;
    tab_b.refresh();
    tokio::task::yield_now().await;
    assert!(tab_b.requires_login_for_checkout());
    assert_eq!(tab_b.total_cart_items(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reload_resumes_identified_session_without_remerging() {
    let storage = MemoryStorage::new();
    let gateway = Arc::new(RecordingGateway::new());
    let config = CartConfig::with_base_url("https://api.example.test").unwrap();

    let facade = CartFacade::new(
        config.clone(),
        Arc::new(storage.clone()),
        gateway.clone(),
    );
    facade.add_to_cart(&pid("p1"));
    facade.login(&mint_token_expiring_in("u-1", 3_600)).await;
    assert_eq!(gateway.fetch_count(), 1);
    drop(facade);

    // Reload: the stored ledger is already the server mirror, so resuming
    // must not fetch-and-merge it in again
    let reloaded = CartFacade::new(config, Arc::new(storage), gateway.clone());
    tokio::time::sleep(Duration::from_millis(600)).await;
    tokio::task::yield_now().await;

    assert!(!reloaded.requires_login_for_checkout());
    assert_eq!(reloaded.total_cart_items(), 1);
    assert_eq!(gateway.fetch_count(), 1);
    assert_eq!(gateway.server().quantity(&pid("p1")), 1);
}
