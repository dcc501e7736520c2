use std::io::Write;
use std::net::UdpSocket;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use vab_sync::{
    start_request_runtime, start_update_queue_runtime, RequestConfig, UdpNotifier,
    UpdateQueueConfig,
};
use vab_vars::{VariableStore, DEFAULT_PROCESS};

fn local_receiver() -> (UdpSocket, u16) {
    let receiver = UdpSocket::bind(("127.0.0.1", 0)).expect("bind receiver");
    receiver
        .set_read_timeout(Some(Duration::from_secs(3)))
        .expect("set timeout");
    let port = receiver.local_addr().expect("local addr").port();
    (receiver, port)
}

fn receive_text(receiver: &UdpSocket) -> String {
    let mut buffer = [0_u8; 512];
    let (length, _) = receiver.recv_from(&mut buffer).expect("receive datagram");
    String::from_utf8_lossy(&buffer[..length]).to_string()
}

fn append(path: &Path, content: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open inbox file");
    file.write_all(content.as_bytes()).expect("append");
}

async fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn integration_peer_update_round_trips_back_through_a_query() {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(VariableStore::new(temp.path().join("processes")));
    let (receiver, port) = local_receiver();
    let notifier = Arc::new(UdpNotifier::new("127.0.0.1", port));

    let queue_path = temp.path().join("inbox/update-vars.txt");
    let request_path = temp.path().join("inbox/request-vars.txt");
    let mut update_handle = start_update_queue_runtime(
        UpdateQueueConfig {
            queue_path: queue_path.clone(),
            poll_interval: Duration::from_millis(10),
            drain_mode: true,
            state_path: None,
        },
        store.clone(),
        None,
    )
    .expect("start update runtime");
    let mut request_handle = start_request_runtime(
        RequestConfig {
            request_path: request_path.clone(),
            poll_interval: Duration::from_millis(10),
            state_path: None,
        },
        store.clone(),
        notifier.clone(),
    )
    .expect("start request runtime");

    // Peer pushes an update, including a concatenated fragment.
    append(&queue_path, "Landing_Gear=1Shutdown=0\n");
    let store_file = store.store_file_path(DEFAULT_PROCESS);
    wait_for("update to reach the store file", || {
        std::fs::read_to_string(&store_file)
            .map(|content| content.contains("Landing_Gear=1"))
            .unwrap_or(false)
    })
    .await;

    // Peer asks for the value back and receives the fixed wire format.
    append(&request_path, "Landing_Gear?;Shutdown?\n");
    assert_eq!(receive_text(&receiver), "SetVar Landing_Gear = 1");
    assert_eq!(receive_text(&receiver), "SetVar Shutdown = 0");

    // Both inboxes were consumed destructively.
    assert_eq!(std::fs::read_to_string(&queue_path).expect("queue"), "");
    assert_eq!(std::fs::read_to_string(&request_path).expect("requests"), "");

    update_handle.shutdown().await;
    request_handle.shutdown().await;
    notifier.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn integration_active_process_switch_routes_unaddressed_traffic() {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(VariableStore::new(temp.path().join("processes")));
    let (receiver, port) = local_receiver();
    let notifier = Arc::new(UdpNotifier::new("127.0.0.1", port));

    let queue_path = temp.path().join("inbox/update-vars.txt");
    let request_path = temp.path().join("inbox/request-vars.txt");
    let mut update_handle = start_update_queue_runtime(
        UpdateQueueConfig {
            queue_path: queue_path.clone(),
            poll_interval: Duration::from_millis(10),
            drain_mode: true,
            state_path: None,
        },
        store.clone(),
        None,
    )
    .expect("start update runtime");
    let mut request_handle = start_request_runtime(
        RequestConfig {
            request_path: request_path.clone(),
            poll_interval: Duration::from_millis(10),
            state_path: None,
        },
        store.clone(),
        notifier.clone(),
    )
    .expect("start request runtime");

    store.set_active_process(Some("Frontier"));
    append(&queue_path, "Gear=up\n@Backup:Gear=down\n");
    wait_for("update to reach the active process store", || {
        store.store_file_path("Frontier").exists() && store.store_file_path("Backup").exists()
    })
    .await;

    append(&request_path, "Gear?\n@Backup:Gear?\n");
    assert_eq!(receive_text(&receiver), "SetVar Gear = up");
    assert_eq!(receive_text(&receiver), "SetVar Gear = down");

    // Deactivating falls back to the default process, which has no value yet.
    store.set_active_process(None);
    append(&request_path, "Gear?\n");
    assert_eq!(receive_text(&receiver), "SetVar Gear = ");

    update_handle.shutdown().await;
    request_handle.shutdown().await;
    notifier.close();
}
