//! Orchestrator routing and record-creation tests
//!
//! These tests drive the policy-gated router end to end against a policy
//! document on disk: route selection, the rejection taxonomy, amount
//! boundaries, and immediate-effect policy reloads.

use std::sync::Arc;

use railclaw::monitor::MonitorRegistry;
use railclaw::orchestrator::{
    Orchestrator, PaymentRequest, PaymentResponse, RequestAction, Violation,
};
use railclaw::store::{ListFilter, PaymentKind, PaymentStatus, PaymentStore};

#[path = "mod.rs"]
mod test_helpers;
use test_helpers::{build_test_config, sample_policy_text, write_policy};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

struct TestBed {
    orchestrator: Orchestrator,
    store: PaymentStore,
    policy_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

/// Builds an orchestrator over a fresh temp data root and policy document.
/// Chain RPC endpoints point at a dead port: routing never touches a chain,
/// and spawned monitors just idle out their deadline in the background.
fn testbed_with_policy(policy_text: &str) -> TestBed {
    let dir = tempfile::tempdir().expect("create temp dir");
    let policy_path = dir.path().join("policy.yaml");
    write_policy(&policy_path, policy_text);

    let config = build_test_config(
        "http://127.0.0.1:1",
        "http://127.0.0.1:1",
        dir.path(),
        &policy_path,
    );
    let store = PaymentStore::new(&config.data_dir).expect("open store");
    let orchestrator = Orchestrator::new(Arc::new(config), store.clone(), MonitorRegistry::new());
    TestBed {
        orchestrator,
        store,
        policy_path,
        _dir: dir,
    }
}

fn create_request(amount: f64, token: &str, chain: &str) -> PaymentRequest {
    PaymentRequest {
        action: RequestAction::CreatePaymentLink,
        amount,
        token: token.to_string(),
        chain: chain.to_string(),
        payment_id: None,
        business: None,
        emi: false,
    }
}

// ============================================================================
// ROUTING TESTS
// ============================================================================

/// Test that an allowed settlement chain routes to a direct payment
/// Why: the executed response carries the payment link the user opens
#[tokio::test]
async fn test_direct_route_returns_executed() {
    let bed = testbed_with_policy(&sample_policy_text());
    let response = bed
        .orchestrator
        .handle(create_request(100.0, "USDC", "polygon"))
        .await
        .expect("handle request");

    let PaymentResponse::Executed { payment_id, link } = response else {
        panic!("expected executed response");
    };
    assert!(payment_id.starts_with("pay_"));
    assert_eq!(link, format!("https://pay.example.com/p/{}", payment_id));

    let record = bed.store.get(&payment_id).expect("record created");
    assert_eq!(record.status, PaymentStatus::Pending);
    assert!(matches!(record.kind, PaymentKind::Direct));
    assert_eq!(record.settlement_chain, "polygon");
    assert_eq!(record.business_id, "biz_123");
}

/// Test that a user-payable chain with the bridge enabled routes over the
/// bridge, settling on the bridge's settlement chain
/// Why: the routing order is decisive - bridge wins before the direct check
#[tokio::test]
async fn test_bridge_route_returns_instructions() {
    let bed = testbed_with_policy(&sample_policy_text());
    let response = bed
        .orchestrator
        .handle(create_request(100.0, "USDC", "solana"))
        .await
        .expect("handle request");

    let PaymentResponse::BridgePayment {
        payment_id,
        bridge_instructions,
    } = response
    else {
        panic!("expected bridge_payment response");
    };
    // 0.6% of 100 is 0.60, above the 0.10 buffer
    assert_eq!(bridge_instructions.amount_to_send, "100.60");
    assert_eq!(bridge_instructions.relay_fee, "0.60");
    assert_eq!(bridge_instructions.business_receives, "100.00");
    assert_eq!(bridge_instructions.settlement_chain, "arbitrum");
    assert_eq!(
        bridge_instructions.settlement_wallet,
        "0x6b7d9a084f0c8a93b8f5e9adbd9b1c4e5f6a7b8c"
    );

    let record = bed.store.get(&payment_id).expect("record created");
    assert_eq!(record.status, PaymentStatus::WaitingDeposit);
    let bridge = record.bridge().expect("bridge body");
    assert_eq!(bridge.raw_input_amount, 100_600_000);
    assert_eq!(bridge.raw_output_amount, 100_000_000);
    assert_eq!(bridge.relay_fee, 600_000);
    assert_eq!(bridge.destination_chain_id, 42_161);
    assert_eq!(bridge.deposit_address, bridge_instructions.deposit_address);
    assert!(!bridge.temp_private_key_sealed.is_empty());
    // The deposit address must be a parseable Solana account
    railclaw::svm_client::parse_pubkey(&bridge.deposit_address).expect("valid deposit address");
}

/// Test that the minimum relay fee buffer applies to small amounts
#[tokio::test]
async fn test_bridge_minimum_relay_fee() {
    let bed = testbed_with_policy(&sample_policy_text());
    let response = bed
        .orchestrator
        .handle(create_request(5.0, "USDC", "solana"))
        .await
        .expect("handle request");

    let PaymentResponse::BridgePayment {
        bridge_instructions,
        ..
    } = response
    else {
        panic!("expected bridge_payment response");
    };
    // 0.6% of 5 is 0.03, below the 0.10 buffer
    assert_eq!(bridge_instructions.relay_fee, "0.10");
    assert_eq!(bridge_instructions.amount_to_send, "5.10");
}

/// Test that an unknown chain is rejected with the allowed set
/// Why: the rejection shape is part of the caller contract
#[tokio::test]
async fn test_unknown_chain_rejected() {
    let bed = testbed_with_policy(&sample_policy_text());
    let response = bed
        .orchestrator
        .handle(create_request(50.0, "USDC", "base"))
        .await
        .expect("handle request");

    let PaymentResponse::Rejected {
        violation,
        policy,
        received,
    } = response
    else {
        panic!("expected rejected response");
    };
    assert_eq!(violation, Violation::Chain);
    assert_eq!(policy, serde_json::json!(["polygon", "arbitrum"]));
    assert_eq!(received, serde_json::json!("base"));

    // No record was created
    let records = bed.store.list(&ListFilter::default()).expect("list");
    assert!(records.is_empty());
}

/// Test that a user-payable chain is rejected when the bridge is disabled
/// Why: user_payable_chains only routes when bridge.enabled holds
#[tokio::test]
async fn test_solana_rejected_when_bridge_disabled() {
    let policy = sample_policy_text().replace("enabled: true", "enabled: false");
    let bed = testbed_with_policy(&policy);
    let response = bed
        .orchestrator
        .handle(create_request(50.0, "USDC", "solana"))
        .await
        .expect("handle request");

    let PaymentResponse::Rejected { violation, .. } = response else {
        panic!("expected rejected response");
    };
    assert_eq!(violation, Violation::Chain);
}

/// Test token validation, case-insensitive
#[tokio::test]
async fn test_unknown_token_rejected() {
    let bed = testbed_with_policy(&sample_policy_text());

    let response = bed
        .orchestrator
        .handle(create_request(50.0, "DAI", "polygon"))
        .await
        .expect("handle request");
    let PaymentResponse::Rejected { violation, .. } = response else {
        panic!("expected rejected response");
    };
    assert_eq!(violation, Violation::Token);

    // Lowercase spelling of an allowed token passes
    let response = bed
        .orchestrator
        .handle(create_request(50.0, "usdc", "polygon"))
        .await
        .expect("handle request");
    assert!(matches!(response, PaymentResponse::Executed { .. }));
}

/// Test the amount cap boundary: exactly the cap passes, a step above fails
/// Why: off-by-one on the cap silently changes what the business accepts
#[tokio::test]
async fn test_amount_boundary() {
    let bed = testbed_with_policy(&sample_policy_text());

    let response = bed
        .orchestrator
        .handle(create_request(10_000.0, "USDC", "polygon"))
        .await
        .expect("handle request");
    assert!(matches!(response, PaymentResponse::Executed { .. }));

    let response = bed
        .orchestrator
        .handle(create_request(10_000.01, "USDC", "polygon"))
        .await
        .expect("handle request");
    let PaymentResponse::Rejected { violation, .. } = response else {
        panic!("expected rejected response");
    };
    assert_eq!(violation, Violation::Amount);
}

/// Test that a zero cap means unlimited
#[tokio::test]
async fn test_zero_cap_is_unlimited() {
    let policy = sample_policy_text().replace("max_single_payment: 10000", "max_single_payment: 0");
    let bed = testbed_with_policy(&policy);
    let response = bed
        .orchestrator
        .handle(create_request(5_000_000.0, "USDC", "polygon"))
        .await
        .expect("handle request");
    assert!(matches!(response, PaymentResponse::Executed { .. }));
}

/// Test that an installment request is rejected while EMI is disabled
#[tokio::test]
async fn test_emi_rejected_when_disabled() {
    let bed = testbed_with_policy(&sample_policy_text());
    let mut request = create_request(100.0, "USDC", "polygon");
    request.emi = true;
    let response = bed.orchestrator.handle(request).await.expect("handle request");
    let PaymentResponse::Rejected { violation, .. } = response else {
        panic!("expected rejected response");
    };
    assert_eq!(violation, Violation::Emi);
}

// ============================================================================
// READINESS TESTS
// ============================================================================

/// Test the not_ready outcomes: missing document, inactive status, and a
/// business that has not finished onboarding
#[tokio::test]
async fn test_not_ready_paths() {
    // Missing document
    let bed = testbed_with_policy(&sample_policy_text());
    std::fs::remove_file(&bed.policy_path).unwrap();
    let response = bed
        .orchestrator
        .handle(create_request(100.0, "USDC", "polygon"))
        .await
        .expect("handle request");
    assert!(matches!(response, PaymentResponse::NotReady { .. }));

    // Not onboarded
    let policy = sample_policy_text().replace("onboarded: true", "onboarded: false");
    let bed = testbed_with_policy(&policy);
    let response = bed
        .orchestrator
        .handle(create_request(100.0, "USDC", "polygon"))
        .await
        .expect("handle request");
    assert!(matches!(response, PaymentResponse::NotReady { .. }));

    // Pending onboarding status
    let policy = sample_policy_text().replace("status: active", "status: pending_onboarding");
    let bed = testbed_with_policy(&policy);
    let response = bed
        .orchestrator
        .handle(create_request(100.0, "USDC", "polygon"))
        .await
        .expect("handle request");
    assert!(matches!(response, PaymentResponse::NotReady { .. }));
}

/// Test that an active policy with an empty chain set reads as not ready
/// Why: the invariant check turns the broken document into not_ready, never
/// a half-routed payment
#[tokio::test]
async fn test_empty_chains_active_policy_not_ready() {
    let policy = sample_policy_text()
        .replace("allowed_chains: [polygon, arbitrum]", "allowed_chains: []")
        .replace("enabled: true", "enabled: false");
    let bed = testbed_with_policy(&policy);
    let response = bed
        .orchestrator
        .handle(create_request(100.0, "USDC", "polygon"))
        .await
        .expect("handle request");
    assert!(matches!(response, PaymentResponse::NotReady { .. }));
}

// ============================================================================
// POLICY FRESHNESS
// ============================================================================

/// Test that a policy edit between two requests is observed by the second
/// Why: the no-cache discipline is what makes edits take effect immediately
#[tokio::test]
async fn test_policy_edit_applies_to_next_request() {
    let bed = testbed_with_policy(&sample_policy_text());

    let response = bed
        .orchestrator
        .handle(create_request(100.0, "USDC", "polygon"))
        .await
        .expect("first request");
    assert!(matches!(response, PaymentResponse::Executed { .. }));

    // The editor removes USDC and bumps the version
    let edited = sample_policy_text()
        .replace("allowed_tokens: [USDC]", "allowed_tokens: [USDT]")
        .replace("version: 3", "version: 4");
    write_policy(&bed.policy_path, &edited);

    let response = bed
        .orchestrator
        .handle(create_request(100.0, "USDC", "polygon"))
        .await
        .expect("second request");
    let PaymentResponse::Rejected { violation, .. } = response else {
        panic!("expected rejected response after policy edit");
    };
    assert_eq!(violation, Violation::Token);
}

// ============================================================================
// READ PATHS
// ============================================================================

/// Test check_payment and list_payments over created records
#[tokio::test]
async fn test_check_and_list_payments() {
    let bed = testbed_with_policy(&sample_policy_text());

    let response = bed
        .orchestrator
        .handle(create_request(100.0, "USDC", "polygon"))
        .await
        .expect("create payment");
    let PaymentResponse::Executed { payment_id, .. } = response else {
        panic!("expected executed response");
    };

    let response = bed
        .orchestrator
        .handle(PaymentRequest {
            action: RequestAction::CheckPayment,
            amount: 0.0,
            token: String::new(),
            chain: String::new(),
            payment_id: Some(payment_id.clone()),
            business: None,
            emi: false,
        })
        .await
        .expect("check payment");
    let PaymentResponse::Payment { record } = response else {
        panic!("expected payment response");
    };
    assert_eq!(record.payment_id, payment_id);

    let response = bed.orchestrator.check_payment("pay_missing").expect("check");
    assert!(matches!(response, PaymentResponse::NotFound { .. }));

    let response = bed
        .orchestrator
        .list_payments(&ListFilter {
            status: Some(PaymentStatus::Pending),
            business_id: Some("biz_123".to_string()),
            limit: 10,
        })
        .expect("list payments");
    let PaymentResponse::Payments { records } = response else {
        panic!("expected payments response");
    };
    assert_eq!(records.len(), 1);
}

// ============================================================================
// WIRE SHAPE
// ============================================================================

/// Test the serialized status tags of the response envelope
/// Why: callers dispatch on the literal status strings
#[tokio::test]
async fn test_response_wire_shape() {
    let bed = testbed_with_policy(&sample_policy_text());

    let response = bed
        .orchestrator
        .handle(create_request(100.0, "USDC", "polygon"))
        .await
        .expect("create payment");
    let json = serde_json::to_value(&response).expect("serialize response");
    assert_eq!(json["status"], "executed");
    assert!(json["link"].as_str().unwrap().contains("/p/pay_"));

    let response = bed
        .orchestrator
        .handle(create_request(100.0, "USDC", "solana"))
        .await
        .expect("create bridge payment");
    let json = serde_json::to_value(&response).expect("serialize response");
    assert_eq!(json["status"], "bridge_payment");
    assert!(json["bridge_instructions"]["deposit_address"].is_string());

    let response = bed
        .orchestrator
        .handle(create_request(100.0, "DAI", "polygon"))
        .await
        .expect("rejected payment");
    let json = serde_json::to_value(&response).expect("serialize response");
    assert_eq!(json["status"], "rejected");
    assert_eq!(json["violation"], "token");
}
