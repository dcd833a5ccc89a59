//! End-to-end tests over the real TCP transport: newline-framed JSON
//! messages against a live listener.

use serde_json::json;
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::watch;

use hubdb::hub::tcp::run_tcp_listener;
use hubdb::ConnectionHub;
use hubdb::Store;

struct TestClient {
    lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl TestClient {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, write) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            write,
        }
    }

    async fn send(
        &mut self,
        message: Value,
    ) {
        let mut line = message.to_string();
        line.push('\n');
        self.write.write_all(line.as_bytes()).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let line = self.lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }
}

async fn start_server() -> (std::net::SocketAddr, watch::Sender<()>, Store) {
    let store = Store::new();
    let hub = ConnectionHub::new(store.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(run_tcp_listener(hub, listener, shutdown_rx));
    (addr, shutdown_tx, store)
}

#[tokio::test]
async fn subscribe_set_and_get_over_tcp() {
    let (addr, _shutdown, _store) = start_server().await;
    let mut client = TestClient::connect(addr).await;

    client
        .send(json!({ "cmd": "onSet", "key": "greeting" }))
        .await;
    let initial = client.recv().await;
    assert_eq!(initial["type"], "update");
    assert_eq!(initial["key"], "greeting");
    assert_eq!(initial["value"], Value::Null);

    client
        .send(json!({ "cmd": "set", "key": "greeting", "value": { "msg": "hello" } }))
        .await;
    let update = client.recv().await;
    assert_eq!(update["value"], json!({ "msg": "hello" }));
    assert_eq!(update["patch"], Value::Null);

    client
        .send(json!({ "call": "get", "id": 1, "key": "greeting" }))
        .await;
    let response = client.recv().await;
    assert_eq!(response["type"], "response");
    assert_eq!(response["id"], json!(1));
    assert_eq!(response["success"], json!(true));
    assert_eq!(response["result"], json!({ "msg": "hello" }));
}

#[tokio::test]
async fn patch_subscription_delivers_deltas_over_tcp() {
    let (addr, _shutdown, store) = start_server().await;
    store.set("doc", json!({ "a": 1 }));

    let mut client = TestClient::connect(addr).await;
    client.send(json!({ "cmd": "onPatch", "key": "doc" })).await;
    let initial = client.recv().await;
    assert_eq!(initial["value"], json!({ "a": 1 }));
    assert_eq!(initial["patch"], Value::Null);

    client
        .send(json!({ "cmd": "patch", "key": "doc", "patch": { "b": 2 } }))
        .await;
    let update = client.recv().await;
    assert_eq!(update["patch"], json!({ "b": 2 }));
    assert_eq!(update["value"], Value::Null);
}

#[tokio::test]
async fn rpc_forwarding_between_two_tcp_clients() {
    let (addr, _shutdown, _store) = start_server().await;

    let mut handler = TestClient::connect(addr).await;
    let mut caller = TestClient::connect(addr).await;

    handler.send(json!({ "cmd": "onCall", "key": "add" })).await;
    // Subscribe on an unrelated key and wait for its initial update so the
    // registration is definitely processed before the call goes out.
    handler.send(json!({ "cmd": "onSet", "key": "ready" })).await;
    handler.recv().await;

    caller
        .send(json!({ "call": "call", "id": 21, "key": "add", "value": [5, 3] }))
        .await;

    let request = handler.recv().await;
    assert_eq!(request["type"], "callRequest");
    assert_eq!(request["id"], json!(21));
    assert_eq!(request["key"], "add");
    assert_eq!(request["args"], json!([5, 3]));

    let sum = request["args"][0].as_i64().unwrap() + request["args"][1].as_i64().unwrap();
    handler
        .send(json!({ "type": "callResponse", "id": 21, "success": true, "result": sum }))
        .await;

    let response = caller.recv().await;
    assert_eq!(response["type"], "response");
    assert_eq!(response["id"], json!(21));
    assert_eq!(response["success"], json!(true));
    assert_eq!(response["result"], json!(8));
}

#[tokio::test]
async fn disconnect_cleans_up_registrations() {
    let (addr, _shutdown, store) = start_server().await;

    let mut handler = TestClient::connect(addr).await;
    handler.send(json!({ "cmd": "onCall", "key": "gone" })).await;
    handler.send(json!({ "cmd": "onSet", "key": "ready" })).await;
    handler.recv().await;

    let mut caller = TestClient::connect(addr).await;
    drop(handler);

    // The server notices the closed socket on its next read; wait until the
    // connection bookkeeping reflects it before calling.
    while store.get("serverStatus")["connected"] != json!(1) {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    caller
        .send(json!({ "call": "call", "id": 30, "key": "gone" }))
        .await;
    let response = caller.recv().await;
    assert_eq!(response["success"], json!(false));
    assert_eq!(response["error"], json!("Function 'gone' not found"));
}
