/// Integration tests spanning both subsystems
/// Drives the configuration engine and the transaction registry the way the
/// application shell would: validate a profile's snapshot, then track and
/// match transactions built from raw wire messages.
use siprelay::config::{
    check, check_against, ConfigEntry, ConfigError, LocalPolicy, NoLiveValues, NoLocalPolicy,
    ReloadMode, Schema, SchemaEntry, Value, ValueType,
};
use siprelay::sip::messages::{parse_request, parse_response};
use siprelay::transaction::TransactionIndex;
use siprelay::worker::WorkerHandle;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

fn worker() -> WorkerHandle {
    let (handle, receiver) = WorkerHandle::register();
    std::mem::forget(receiver);
    handle
}

// ============================================================================
// Configuration engine
// ============================================================================

#[test]
fn validates_and_normalizes_a_mixed_snapshot() {
    init_logging();
    let schema = Schema::new(vec![
        SchemaEntry::new("abc", ValueType::Integer).list(),
        SchemaEntry::new("def", ValueType::String).normalize(),
        SchemaEntry::new("gih", ValueType::SipUrl),
    ]);
    let snapshot = vec![
        ConfigEntry::new(
            "abc",
            Value::list([Value::Int(9), Value::Int(8), Value::Int(7)]),
            "test",
        ),
        ConfigEntry::new("def", Value::str("LowerCASEme"), "test"),
        ConfigEntry::new("gih", Value::str("sip:dontparse.example.org"), "test"),
    ];

    let out = check_against(&snapshot, &schema, ReloadMode::Soft, &NoLiveValues, &NoLocalPolicy)
        .expect("snapshot validates");
    assert_eq!(
        out,
        vec![
            ConfigEntry::new(
                "abc",
                Value::list([Value::Int(9), Value::Int(8), Value::Int(7)]),
                "test",
            ),
            ConfigEntry::new("def", Value::str("lowercaseme"), "test"),
            // No normalize flag: the URL text survives unparsed.
            ConfigEntry::new("gih", Value::str("sip:dontparse.example.org"), "test"),
        ]
    );
}

#[test]
fn profile_snapshot_end_to_end() {
    init_logging();

    // What a file backend would produce for a small incoming proxy.
    let snapshot = vec![
        ConfigEntry::new(
            "myhostnames",
            Value::list([Value::str("Proxy.Example.ORG")]),
            "file",
        ),
        ConfigEntry::new(
            "homedomain",
            Value::list([Value::str("Example.ORG")]),
            "file",
        ),
        ConfigEntry::new("udp_port", Value::Int(5060), "file"),
        ConfigEntry::new(
            "internal_to_e164",
            Value::list([Value::pair(Value::str("^19([0-9]{2})$"), Value::str("+4612345\\1"))]),
            "file",
        ),
        ConfigEntry::new("record_route_url", Value::str("sip:Proxy.Example.ORG;lr"), "file"),
    ];

    let out = check(&snapshot, "incomingproxy", ReloadMode::Hard, &NoLiveValues, &NoLocalPolicy)
        .expect("first load validates");

    assert_eq!(
        out[0].value,
        Value::list([Value::str("proxy.example.org")]),
        "myhostnames is normalized to lowercase"
    );
    match &out[4].value {
        Value::Url(url) => {
            assert_eq!(url.host(), "proxy.example.org");
            assert_eq!(url.param("lr"), Some(None));
        }
        other => panic!("record_route_url not parsed: {:?}", other),
    }

    // A soft reload with the same values is fine even for hard-only keys.
    let live_values = {
        let out = out.clone();
        move |key: &str| {
            out.iter()
                .find(|e| e.key == key)
                .map(|e| e.value.clone())
        }
    };
    check(&out, "incomingproxy", ReloadMode::Soft, &live_values, &NoLocalPolicy)
        .expect("unchanged soft reload is accepted");

    // Moving the UDP port needs a restart.
    let mut moved = out.clone();
    moved[2].value = Value::Int(5070);
    let err = check(&moved, "incomingproxy", ReloadMode::Soft, &live_values, &NoLocalPolicy)
        .expect_err("port change must be refused");
    assert_eq!(
        err.to_string(),
        "Changing parameter 'udp_port' (source: file) requires a restart - \
         current value 5060, requested 5070"
    );

    // The same change is fine on restart.
    check(&moved, "incomingproxy", ReloadMode::Hard, &live_values, &NoLocalPolicy)
        .expect("hard reload takes anything");
}

#[test]
fn local_keys_flow_through_shell_policy() {
    init_logging();

    struct ShellPolicy;
    impl LocalPolicy for ShellPolicy {
        fn validate(&self, key: &str, value: &Value, _source: &str) -> anyhow::Result<Value> {
            match (key, value) {
                ("local_billing_tag", Value::Str(s)) => Ok(Value::str(s.to_lowercase())),
                _ => anyhow::bail!("unsupported local parameter"),
            }
        }
        fn is_soft_reloadable(&self, key: &str, _value: &Value) -> bool {
            key == "local_billing_tag"
        }
    }

    let snapshot = vec![
        ConfigEntry::new(
            "myhostnames",
            Value::list([Value::str("p.example.org")]),
            "file",
        ),
        ConfigEntry::new("local_billing_tag", Value::str("GOLD"), "file"),
    ];
    let out = check(&snapshot, "unknown_app", ReloadMode::Soft, &NoLiveValues, &ShellPolicy)
        .expect("local key accepted by shell policy");
    assert_eq!(out[1].value, Value::str("gold"));

    let rejected = vec![
        ConfigEntry::new(
            "myhostnames",
            Value::list([Value::str("p.example.org")]),
            "file",
        ),
        ConfigEntry::new("local_other", Value::Int(3), "file"),
    ];
    let err = check(&rejected, "unknown_app", ReloadMode::Soft, &NoLiveValues, &ShellPolicy)
        .expect_err("unsupported local key fails");
    assert!(matches!(err, ConfigError::Caught { .. }));
}

// ============================================================================
// Transaction registry over raw wire messages
// ============================================================================

const INVITE_RAW: &str = "INVITE sip:bob@example.org SIP/2.0\r\n\
    Via: SIP/2.0/UDP client.example.org:5060;branch=z9hG4bK.abc;rport\r\n\
    Max-Forwards: 70\r\n\
    From: \"Alice\" <sip:alice@example.org>;tag=fr0m\r\n\
    To: <sip:bob@example.org>\r\n\
    Call-ID: 42@client.example.org\r\n\
    CSeq: 1 INVITE\r\n\
    Content-Length: 0\r\n\
    \r\n";

#[test]
fn client_transaction_lifecycle() {
    init_logging();
    let mut index = TransactionIndex::<()>::new();
    let id = index
        .add_client_transaction("INVITE", "z9hG4bK.abc", worker())
        .expect("fresh key inserts");

    assert_eq!(
        index.get_client_transaction("INVITE", "z9hG4bK.abc").map(|r| r.id),
        Some(id)
    );
    assert!(index.get_client_transaction("ACK", "z9hG4bK.abc").is_none());
}

#[test]
fn server_transaction_matches_3261_and_2543_acks() {
    init_logging();
    let mut index = TransactionIndex::<()>::new();

    let invite = parse_request(INVITE_RAW).expect("INVITE parses");
    let id = index
        .add_server_transaction(&invite, worker())
        .expect("server transaction created");

    // The worker answers 200 with a To-tag and records it for ACK matching.
    let response_raw = "SIP/2.0 200 OK\r\n\
        Via: SIP/2.0/UDP client.example.org:5060;branch=z9hG4bK.abc;rport\r\n\
        From: \"Alice\" <sip:alice@example.org>;tag=fr0m\r\n\
        To: <sip:bob@example.org>;tag=t0t4g\r\n\
        Call-ID: 42@client.example.org\r\n\
        CSeq: 1 INVITE\r\n\
        \r\n";
    let response = parse_response(response_raw).expect("response parses");
    assert_eq!(
        index
            .get_server_transaction_for_response(&response)
            .unwrap()
            .map(|r| r.id),
        Some(id),
        "own response finds the transaction by branch and CSeq method"
    );
    assert!(index.set_response_to_tag(id, Some("t0t4g".to_string())));

    // ACK from an RFC 2543 gateway: no magic cookie, matched by ack id and
    // To-tag.
    let old_ack_raw = "ACK sip:bob@example.org SIP/2.0\r\n\
        Via: SIP/2.0/UDP gw.example.org:5060;branch=4711\r\n\
        From: \"Alice\" <sip:alice@example.org>;tag=fr0m\r\n\
        To: <sip:bob@example.org>;tag=t0t4g\r\n\
        Call-ID: 42@client.example.org\r\n\
        CSeq: 1 ACK\r\n\
        \r\n";
    let old_ack = parse_request(old_ack_raw).expect("ACK parses");
    assert_eq!(
        index
            .get_server_transaction_for_request(&old_ack)
            .unwrap()
            .map(|r| r.id),
        Some(id)
    );

    // ACK for a different dialog leg (other To-tag) must not match.
    let foreign_ack_raw = old_ack_raw.replace("tag=t0t4g", "tag=e1se");
    let foreign_ack = parse_request(&foreign_ack_raw).expect("ACK parses");
    assert!(index
        .get_server_transaction_for_request(&foreign_ack)
        .unwrap()
        .is_none());
}

#[test]
fn stateless_response_branch_correlation() {
    init_logging();
    let mut index = TransactionIndex::<()>::new();
    let invite = parse_request(INVITE_RAW).expect("INVITE parses");
    let id = index.add_server_transaction(&invite, worker()).unwrap();

    assert!(index.append_response_branch(id, "z9hG4bK.fwd1", "INVITE"));
    assert_eq!(
        index
            .get_server_transaction_for_stateless_response_branch("z9hG4bK.fwd1", "INVITE")
            .map(|r| r.id),
        Some(id)
    );
}

#[test]
fn worker_death_and_expiry_cleanup() {
    init_logging();
    let mut index = TransactionIndex::<()>::new();
    let (w, signals) = WorkerHandle::register();

    let invite = parse_request(INVITE_RAW).expect("INVITE parses");
    index.add_server_transaction(&invite, w.clone());
    index.add_client_transaction("BYE", "z9hG4bK.bye", w.clone());

    // The supervisor notices the worker died and cleans up after it.
    assert_eq!(index.delete_by_worker(&w), 2);
    assert_eq!(index.len(), 0);
    drop(signals);

    // Expiry cleanup tells a live worker to unwind.
    let (w2, mut signals2) = WorkerHandle::register();
    let id2 = index
        .add_client_transaction("INVITE", "z9hG4bK.exp", w2)
        .unwrap();
    let mut record = index.get(id2).unwrap().clone();
    record.expire = 1000;
    index.update(record);
    assert_eq!(index.delete_expired_at(1000), 1);
    assert_eq!(
        signals2.try_recv().unwrap(),
        siprelay::worker::WorkerSignal::TransactionExpired(id2)
    );
}
