use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use roomd::clock::ManualClock;
use roomd::engine::Engine;
use roomd::seed;
use roomd::store::WalStore;
use roomd::wire;

/// 2025-05-31T00:00:00Z, the day before every booking below.
const NOW: i64 = 1_748_649_600_000;
const PASSWORD: &str = "roomd";

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("roomd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let store = Arc::new(WalStore::open(&dir.join("roomd.wal")).unwrap());
    let rooms: Vec<String> = ["Conference Room A", "Board Room"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    seed::seed_rooms(store.as_ref(), &rooms).await.unwrap();
    let engine = Engine::from_store(store, Arc::new(ManualClock::new(NOW)));

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let engine = engine.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, PASSWORD.to_string(), None).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("roomd")
        .user("tester")
        .password(PASSWORD);

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

fn rows(messages: Vec<SimpleQueryMessage>) -> Vec<SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

async fn query(client: &tokio_postgres::Client, sql: &str) -> Vec<SimpleQueryRow> {
    rows(client.simple_query(sql).await.unwrap())
}

async fn sqlstate_of(client: &tokio_postgres::Client, sql: &str) -> String {
    let err = client.simple_query(sql).await.unwrap_err();
    err.code()
        .map(|c| c.code().to_string())
        .unwrap_or_else(|| panic!("no SQLSTATE in {err}"))
}

async fn room_id(client: &tokio_postgres::Client, name: &str) -> String {
    query(client, "SELECT * FROM resources")
        .await
        .iter()
        .find(|r| r.get("name") == Some(name))
        .and_then(|r| r.get("id"))
        .map(String::from)
        .unwrap()
}

fn insert_sql(room: &str, start: &str, end: &str) -> String {
    format!(
        r#"INSERT INTO bookings (resource_id, start, "end") VALUES ('{room}', '{start}', '{end}')"#
    )
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn lists_seeded_rooms() {
    let addr = start_test_server().await;
    let client = connect(addr).await;

    let names: Vec<String> = query(&client, "SELECT * FROM resources")
        .await
        .iter()
        .map(|r| r.get("name").unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["Conference Room A", "Board Room"]);
}

#[tokio::test]
async fn booking_lifecycle_over_the_wire() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let room = room_id(&client, "Conference Room A").await;

    let created = query(
        &client,
        &format!(
            r#"INSERT INTO bookings (resource_id, start, "end", booker) VALUES ('{room}', '2025-06-01T10:00:00Z', '2025-06-01T12:00:00Z', 'Alice')"#
        ),
    )
    .await;
    assert_eq!(created.len(), 1);
    let first = created[0].get("id").unwrap().to_string();
    assert_eq!(created[0].get("status"), Some("active"));
    assert_eq!(created[0].get("resource_name"), Some("Conference Room A"));
    assert_eq!(created[0].get("booker"), Some("Alice"));
    assert_eq!(created[0].get("start"), Some("1748772000000"));

    // Abutting window is fine
    let second = query(
        &client,
        &insert_sql(&room, "2025-06-01T12:00:00Z", "2025-06-01T13:00:00Z"),
    )
    .await;
    let second = second[0].get("id").unwrap().to_string();

    let canceled = query(&client, &format!("DELETE FROM bookings WHERE id = '{first}'")).await;
    assert_eq!(canceled[0].get("status"), Some("canceled"));

    // Repeat cancel is not an error
    let again = query(&client, &format!("DELETE FROM bookings WHERE id = '{first}'")).await;
    assert_eq!(again[0].get("status"), Some("canceled"));

    let active = query(
        &client,
        &format!("SELECT * FROM bookings WHERE resource_id = '{room}'"),
    )
    .await;
    let active: Vec<_> = active.iter().map(|r| r.get("id").unwrap()).collect();
    assert_eq!(active, vec![second.as_str()]);

    let history = query(&client, &format!("SELECT * FROM bookings WHERE id = '{first}'")).await;
    assert_eq!(history[0].get("status"), Some("canceled"));
}

#[tokio::test]
async fn errors_carry_sqlstate() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let room = room_id(&client, "Board Room").await;

    query(&client, &insert_sql(&room, "2025-06-01T10:00:00Z", "2025-06-01T12:00:00Z")).await;

    let overlap = insert_sql(&room, "2025-06-01T11:00:00Z", "2025-06-01T13:00:00Z");
    assert_eq!(sqlstate_of(&client, &overlap).await, "23P01");

    let empty = insert_sql(&room, "2025-06-01T15:00:00Z", "2025-06-01T15:00:00Z");
    assert_eq!(sqlstate_of(&client, &empty).await, "22023");

    let past = insert_sql(&room, "2025-05-30T10:00:00Z", "2025-05-30T11:00:00Z");
    assert_eq!(sqlstate_of(&client, &past).await, "22023");

    let unknown_room = insert_sql(
        &Ulid::new().to_string(),
        "2025-06-01T10:00:00Z",
        "2025-06-01T11:00:00Z",
    );
    assert_eq!(sqlstate_of(&client, &unknown_room).await, "42704");

    let unknown_booking = format!("DELETE FROM bookings WHERE id = '{}'", Ulid::new());
    assert_eq!(sqlstate_of(&client, &unknown_booking).await, "P0002");

    // Ids that could never have been issued
    let bogus_room = insert_sql("999", "2025-06-01T10:00:00Z", "2025-06-01T11:00:00Z");
    assert_eq!(sqlstate_of(&client, &bogus_room).await, "42704");
    let bogus_list = "SELECT * FROM bookings WHERE resource_id = '999'";
    assert_eq!(sqlstate_of(&client, bogus_list).await, "42704");
    let bogus_booking = "DELETE FROM bookings WHERE id = '999'";
    assert_eq!(sqlstate_of(&client, bogus_booking).await, "P0002");

    assert_eq!(sqlstate_of(&client, "UPDATE bookings SET x = 1").await, "42601");
    assert_eq!(sqlstate_of(&client, "SELECT * FROM bookings").await, "42601");
}

#[tokio::test]
async fn extended_protocol_with_parameters() {
    let addr = start_test_server().await;
    let client = connect(addr).await;
    let room = room_id(&client, "Board Room").await;

    let start = "2025-06-01T09:00:00Z".to_string();
    let end = "2025-06-01T10:00:00Z".to_string();
    let inserted = client
        .query(
            r#"INSERT INTO bookings (resource_id, start, "end") VALUES ($1, $2, $3)"#,
            &[&room, &start, &end],
        )
        .await
        .unwrap();
    assert_eq!(inserted.len(), 1);
    let id: String = inserted[0].get("id");

    let listed = client
        .query("SELECT * FROM bookings WHERE resource_id = $1", &[&room])
        .await
        .unwrap();
    let listed: Vec<String> = listed.iter().map(|r| r.get("id")).collect();
    assert_eq!(listed, vec![id]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_connections_same_window_one_wins() {
    let addr = start_test_server().await;
    let setup = connect(addr).await;
    let room = room_id(&setup, "Conference Room A").await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let sql = insert_sql(&room, "2025-06-01T14:00:00Z", "2025-06-01T15:00:00Z");
        handles.push(tokio::spawn(async move {
            let client = connect(addr).await;
            client
                .simple_query(&sql)
                .await
                .map_err(|e| e.code().map(|c| c.code().to_string()))
        }));
    }

    let mut wins = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => wins += 1,
            Err(code) => assert_eq!(code.as_deref(), Some("23P01")),
        }
    }
    assert_eq!(wins, 1);

    let active = query(
        &setup,
        &format!("SELECT * FROM bookings WHERE resource_id = '{room}'"),
    )
    .await;
    assert_eq!(active.len(), 1);
}
