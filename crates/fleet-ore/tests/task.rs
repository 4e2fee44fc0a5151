use fleet_ore::task;

#[tokio::test]
async fn spawn_runs_future_and_returns_output() {
    let handle = task::spawn(|| "test_task", async { 1 + 1 });
    assert_eq!(handle.await.unwrap(), 2);
}
