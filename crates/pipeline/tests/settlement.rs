use channel::mock::{MockBehaviour, MockChannel};
use channel::NotificationChannel;
use chrono::Utc;
use mvne_core::{
    ActorRole, CartItem, DeliveryChannel, Money, PartyInfo, PaymentStatus, ProfitSharingResult,
    PurchaseMode, ReceiptDeliveryStatus, RecipientInfo, Transaction,
};
use pipeline::{
    DeliveryRouter, DeliveryState, EntryStatus, PartyStatus, PipelineSettings, SettlementError,
    SettlementPipeline, SettlementRequest, SettlementWarning,
};
use std::sync::Arc;
use std::time::Duration;
use store::{KvStore, MemoryStore, SledStore, StoreError, StoreResult};

const PAYER_PHONE: &str = "+27 82 123 4567";
const RECIPIENT_PHONE: &str = "083 000 0001";

fn transaction(id: &str, role: ActorRole, mode: PurchaseMode, markup: Money) -> Transaction {
    Transaction {
        id: id.to_string(),
        payer_id: "cust-1".into(),
        role,
        mode,
        items: vec![CartItem {
            name: "2GB monthly bundle".into(),
            quantity: 1,
            unit_price: Money::from_major(120),
        }],
        total: Money::from_major(120),
        provider_cost: Money::from_major(120) - markup,
        markup,
        status: PaymentStatus::Completed,
        created_at: Utc::now(),
    }
}

fn payer() -> PartyInfo {
    PartyInfo {
        id: "cust-1".into(),
        name: "Thandi".into(),
        phone: PAYER_PHONE.into(),
        email: Some("thandi@example.com".into()),
    }
}

fn recipient(registered: bool) -> RecipientInfo {
    RecipientInfo {
        contact: PartyInfo {
            id: "27830000001".into(),
            name: "Sipho".into(),
            phone: RECIPIENT_PHONE.into(),
            email: None,
        },
        registered,
        relationship: Some("brother".into()),
    }
}

fn request(tx: Transaction, recipient: Option<RecipientInfo>) -> SettlementRequest {
    SettlementRequest {
        transaction: tx,
        payer: payer(),
        recipient,
    }
}

/// Refuses writes to keys starting with `poison`.
struct FailingStore {
    inner: MemoryStore,
    poison: &'static str,
}

impl FailingStore {
    fn refusing(poison: &'static str) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            poison,
        })
    }
}

impl KvStore for FailingStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        if key.starts_with(self.poison) {
            return Err(StoreError::Backend("disk full".into()));
        }
        self.inner.put(key, value)
    }

    fn list_by_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        self.inner.list_by_prefix(prefix)
    }

    fn remove(&self, key: &str) -> StoreResult<bool> {
        self.inner.remove(key)
    }
}

fn pipeline_with(
    store: Arc<dyn KvStore>,
    chat: Arc<MockChannel>,
    email: Option<Arc<MockChannel>>,
) -> SettlementPipeline {
    let email = email.map(|e| e as Arc<dyn NotificationChannel>);
    SettlementPipeline::new(store, DeliveryRouter::new(chat, email), PipelineSettings::default())
        .unwrap()
}

#[tokio::test]
async fn third_party_purchase_with_unregistered_recipient() {
    let chat = MockChannel::new("chat");
    let pipeline = pipeline_with(Arc::new(MemoryStore::new()), chat.clone(), None);
    let tx = transaction("tx-20", ActorRole::Customer, PurchaseMode::ThirdParty, Money::from_major(20));

    let report = pipeline.settle(request(tx, Some(recipient(false)))).await.unwrap();

    assert!(report.is_clean(), "{:?}", report.warnings);
    assert_eq!(report.ledger.per_party["cust-1"], PartyStatus::Applied);
    assert_eq!(report.ledger.per_party["27830000001"], PartyStatus::PendingRegistration);
    assert_eq!(pipeline.ledger().balance("cust-1").unwrap(), Money::from_major(10));
    assert_eq!(pipeline.ledger().balance("27830000001").unwrap(), Money::ZERO);
    let pending = pipeline.ledger().pending_registrations().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, EntryStatus::PendingRegistration);

    let delivery = report.delivery.as_ref().unwrap();
    assert_eq!(delivery.delivered_via, Some(DeliveryChannel::Primary));
    assert_eq!(chat.calls_to("27830000001"), 1);

    let saved = pipeline.directory().lookup_exact(RECIPIENT_PHONE).unwrap().unwrap();
    assert_eq!(saved.frequency, 1);
    assert!(saved.verified);
    assert_eq!(saved.relationship.as_deref(), Some("brother"));

    let stored = pipeline.records().by_transaction("tx-20").unwrap().unwrap();
    assert_eq!(stored.delivery_status, ReceiptDeliveryStatus::Delivered);
    assert_eq!(stored.attempts.len(), 1);
    assert_eq!(pipeline.records().for_party("27830000001").unwrap().len(), 1);
    assert_eq!(pipeline.records().attempts(&stored.number).unwrap().len(), 1);
}

#[tokio::test]
async fn vendor_split_is_credited() {
    let chat = MockChannel::new("chat");
    let pipeline = pipeline_with(Arc::new(MemoryStore::new()), chat, None);
    let mut tx = transaction("tx-v", ActorRole::Vendor, PurchaseMode::SelfPurchase, Money::from_major(100));
    tx.payer_id = "vendor-3".into();
    let mut req = request(tx, None);
    req.payer.id = "vendor-3".into();

    let report = pipeline.settle(req).await.unwrap();

    assert_eq!(
        report.split,
        ProfitSharingResult::Vendor {
            vendor_profit: Money::from_major(85),
            customer_cashback: Money::from_major(15),
        }
    );
    // No separate customer on a vendor self purchase: both shares land on the vendor.
    assert_eq!(pipeline.ledger().balance("vendor-3").unwrap(), Money::from_major(100));
    let receipt = report.receipt.unwrap();
    assert_eq!(receipt.attribution.unwrap().role, ActorRole::Vendor);
}

#[tokio::test]
async fn unreachable_recipient_is_redirected_to_payer() {
    let chat = Arc::new(
        MockChannel::with_default("chat", MockBehaviour::Accept)
            .script("27830000001", MockBehaviour::Unreachable),
    );
    let pipeline = pipeline_with(Arc::new(MemoryStore::new()), chat.clone(), None);
    let tx = transaction("tx-r", ActorRole::Customer, PurchaseMode::ThirdParty, Money::from_major(20));

    let report = pipeline.settle(request(tx, Some(recipient(true)))).await.unwrap();

    let delivery = report.delivery.unwrap();
    assert!(delivery.reached(DeliveryState::RedirectSent));
    assert!(!delivery.reached(DeliveryState::Exhausted));
    assert_eq!(chat.calls_to("27821234567"), 1);
    assert!(report.warnings.is_empty());

    let saved = pipeline.directory().lookup_exact("27830000001").unwrap().unwrap();
    assert!(!saved.verified);
}

#[tokio::test]
async fn exhausted_delivery_is_a_warning_not_an_error() {
    let chat = Arc::new(MockChannel::with_default("chat", MockBehaviour::Unreachable));
    let email = Arc::new(MockChannel::with_default("email", MockBehaviour::Unreachable));
    let pipeline = pipeline_with(Arc::new(MemoryStore::new()), chat, Some(email.clone()));
    let tx = transaction("tx-x", ActorRole::Customer, PurchaseMode::ThirdParty, Money::from_major(20));

    let report = pipeline.settle(request(tx, Some(recipient(true)))).await.unwrap();

    assert_eq!(report.delivery.as_ref().unwrap().terminal(), DeliveryState::Exhausted);
    assert_eq!(email.calls_to("thandi@example.com"), 1);
    assert!(matches!(
        report.warnings.as_slice(),
        [SettlementWarning::DeliveryExhausted { .. }]
    ));
    let message = report.user_message();
    assert!(message.starts_with("Payment successful"));
    assert!(message.contains("retry"));

    let stored = pipeline.records().by_transaction("tx-x").unwrap().unwrap();
    assert_eq!(stored.delivery_status, ReceiptDeliveryStatus::Exhausted);
    assert_eq!(pipeline.ledger().balance("cust-1").unwrap(), Money::from_major(10));
}

#[tokio::test]
async fn self_purchase_never_redirects() {
    let chat = Arc::new(MockChannel::with_default("chat", MockBehaviour::Unreachable));
    let pipeline = pipeline_with(Arc::new(MemoryStore::new()), chat.clone(), None);
    let tx = transaction("tx-s", ActorRole::Customer, PurchaseMode::SelfPurchase, Money::from_major(12));

    let report = pipeline.settle(request(tx, None)).await.unwrap();

    let delivery = report.delivery.unwrap();
    assert!(!delivery.reached(DeliveryState::RedirectSent));
    assert_eq!(chat.calls().len(), 1);
    assert!(pipeline.directory().is_empty().unwrap());
}

#[tokio::test]
async fn uncompleted_payment_has_no_side_effects() {
    let store = Arc::new(MemoryStore::new());
    let chat = MockChannel::new("chat");
    let pipeline = pipeline_with(store.clone(), chat.clone(), None);
    let mut tx = transaction("tx-p", ActorRole::Customer, PurchaseMode::SelfPurchase, Money::from_major(5));
    tx.status = PaymentStatus::Pending;

    let err = pipeline.settle(request(tx, None)).await.unwrap_err();

    assert!(matches!(err, SettlementError::PaymentNotCompleted { .. }));
    assert!(store.is_empty());
    assert!(chat.calls().is_empty());
}

#[tokio::test]
async fn third_party_without_recipient_is_a_configuration_error() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline_with(store.clone(), MockChannel::new("chat"), None);
    let tx = transaction("tx-c", ActorRole::Customer, PurchaseMode::ThirdParty, Money::from_major(5));

    let err = pipeline.settle(request(tx, None)).await.unwrap_err();

    assert!(matches!(err, SettlementError::Configuration(_)));
    assert!(store.is_empty());
}

#[tokio::test]
async fn replayed_settlement_is_idempotent() {
    let chat = MockChannel::new("chat");
    let pipeline = Arc::new(pipeline_with(
        Arc::new(SledStore::temporary().unwrap()),
        chat.clone(),
        None,
    ));
    let tx = transaction("tx-again", ActorRole::Customer, PurchaseMode::ThirdParty, Money::from_major(20));

    let first = pipeline.spawn(request(tx.clone(), Some(recipient(true)))).await.unwrap().unwrap();
    let second = pipeline.spawn(request(tx, Some(recipient(true)))).await.unwrap().unwrap();

    assert!(second
        .ledger
        .per_party
        .values()
        .all(|s| *s == PartyStatus::AlreadyApplied));
    assert_eq!(pipeline.ledger().balance("cust-1").unwrap(), Money::from_major(10));
    assert_eq!(pipeline.ledger().balance("27830000001").unwrap(), Money::from_major(6));
    assert_eq!(
        first.receipt.unwrap().number,
        second.receipt.as_ref().unwrap().number
    );
    assert!(second.delivery.is_none());
    assert_eq!(chat.calls().len(), 1);
}

#[tokio::test]
async fn mismatched_cart_still_honours_payment() {
    let pipeline = pipeline_with(Arc::new(MemoryStore::new()), MockChannel::new("chat"), None);
    let mut tx = transaction("tx-m", ActorRole::Customer, PurchaseMode::SelfPurchase, Money::from_major(10));
    tx.total = Money::from_major(999);

    let report = pipeline.settle(request(tx, None)).await.unwrap();

    assert!(report.receipt.is_none());
    assert!(matches!(
        report.warnings.as_slice(),
        [SettlementWarning::ReceiptNotComposed { .. }]
    ));
    assert_eq!(pipeline.ledger().balance("cust-1").unwrap(), Money::from_major(10));
}

#[tokio::test]
async fn replay_does_not_count_as_new_recipient_use() {
    let pipeline = pipeline_with(Arc::new(MemoryStore::new()), MockChannel::new("chat"), None);
    let tx = transaction("tx-rep", ActorRole::Customer, PurchaseMode::ThirdParty, Money::from_major(20));

    pipeline.settle(request(tx.clone(), Some(recipient(true)))).await.unwrap();
    pipeline.settle(request(tx, Some(recipient(true)))).await.unwrap();

    let saved = pipeline.directory().lookup_exact(RECIPIENT_PHONE).unwrap().unwrap();
    assert_eq!(saved.frequency, 1);
}

#[tokio::test]
async fn concurrent_duplicates_deliver_once() {
    let chat = Arc::new(
        MockChannel::with_default("chat", MockBehaviour::Accept).with_latency(Duration::from_millis(50)),
    );
    let pipeline = Arc::new(pipeline_with(Arc::new(MemoryStore::new()), chat.clone(), None));
    let tx = transaction("tx-dup", ActorRole::Customer, PurchaseMode::ThirdParty, Money::from_major(20));

    let first = pipeline.spawn(request(tx.clone(), Some(recipient(true))));
    let second = pipeline.spawn(request(tx, Some(recipient(true))));
    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_eq!(chat.calls().len(), 1);
    assert_eq!(
        [first.delivery.is_some(), second.delivery.is_some()]
            .iter()
            .filter(|d| **d)
            .count(),
        1
    );
    let number = first.receipt.unwrap().number;
    assert_eq!(second.receipt.unwrap().number, number);
    assert_eq!(pipeline.records().attempts(&number).unwrap().len(), 1);
    assert_eq!(pipeline.ledger().balance("cust-1").unwrap(), Money::from_major(10));
}

#[tokio::test]
async fn unrecorded_receipt_is_one_warning_and_still_delivered() {
    let chat = MockChannel::new("chat");
    let pipeline = pipeline_with(FailingStore::refusing("receipt/"), chat.clone(), None);
    let tx = transaction("tx-nr", ActorRole::Customer, PurchaseMode::SelfPurchase, Money::from_major(10));

    let report = pipeline.settle(request(tx, None)).await.unwrap();

    assert_eq!(chat.calls().len(), 1);
    assert!(report.delivery.as_ref().unwrap().is_delivered());
    match report.warnings.as_slice() {
        [SettlementWarning::NotFullyRecorded { errors }] => assert_eq!(errors.len(), 2),
        other => panic!("unexpected warnings {other:?}"),
    }
    assert!(report.user_message().contains("not fully recorded"));
    let number = &report.receipt.as_ref().unwrap().number;
    assert_eq!(pipeline.records().attempts(number).unwrap().len(), 1);
    assert!(pipeline.records().by_transaction("tx-nr").unwrap().is_none());
}

#[tokio::test]
async fn ledger_failure_still_composes_and_delivers() {
    let chat = MockChannel::new("chat");
    let pipeline = pipeline_with(FailingStore::refusing("ledger/platform/"), chat.clone(), None);
    let tx = transaction("tx-lf", ActorRole::Customer, PurchaseMode::ThirdParty, Money::from_major(20));

    let report = pipeline.settle(request(tx, Some(recipient(true)))).await.unwrap();

    assert_eq!(
        report.warnings,
        vec![SettlementWarning::LedgerPartial {
            failed_parties: vec!["platform".to_string()],
        }]
    );
    assert!(report.receipt.is_some());
    assert_eq!(report.delivery.as_ref().unwrap().delivered_via, Some(DeliveryChannel::Primary));
    assert_eq!(chat.calls_to("27830000001"), 1);
    assert_eq!(pipeline.ledger().balance("cust-1").unwrap(), Money::from_major(10));
    assert_eq!(pipeline.ledger().balance("27830000001").unwrap(), Money::from_major(6));
    let stored = pipeline.records().by_transaction("tx-lf").unwrap().unwrap();
    assert_eq!(stored.delivery_status, ReceiptDeliveryStatus::Delivered);
}

#[tokio::test]
async fn separator_in_ids_is_rejected_before_any_write() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline_with(store.clone(), MockChannel::new("chat"), None);

    let tx = transaction("b/c", ActorRole::Customer, PurchaseMode::SelfPurchase, Money::from_major(5));
    let err = pipeline.settle(request(tx, None)).await.unwrap_err();
    assert!(matches!(err, SettlementError::InvalidIdentifier { who: "transaction", .. }));

    let tx = transaction("tx-ok", ActorRole::Customer, PurchaseMode::ThirdParty, Money::from_major(5));
    let mut other = recipient(true);
    other.contact.id = "a/b".into();
    let err = pipeline.settle(request(tx, Some(other))).await.unwrap_err();
    assert!(matches!(err, SettlementError::InvalidIdentifier { who: "recipient", .. }));

    assert!(store.is_empty());
}
