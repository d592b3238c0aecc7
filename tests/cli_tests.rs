use std::process::Command;

fn binary() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_pubsub-latency"));
    command
        .env_remove("PUBSUB_EMULATOR_HOST")
        .env("GOOGLE_APPLICATION_CREDENTIALS", "/nonexistent/credentials.json");
    command
}

#[test]
fn test_missing_topic_exits_with_status_1() {
    let output = binary().args(["-projectid", "demo"]).output().unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("The pubsub topic must be provided"));
}

#[test]
fn test_empty_topic_exits_with_status_1() {
    let output = binary().args(["-topic", ""]).output().unwrap();

    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_connect_failure_is_fatal() {
    let output = binary().args(["-topic", "ticks"]).output().unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("project id must not be empty"));
}

#[test]
fn test_unreadable_credentials_are_fatal() {
    let output = binary()
        .args(["-topic", "ticks", "-projectid", "demo"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("credentials"));
}

#[test]
fn test_empty_credentials_variable_falls_through_to_well_known_file() {
    let gcloud_dir = tempfile::tempdir().unwrap();
    std::fs::write(
        gcloud_dir.path().join("application_default_credentials.json"),
        "not json",
    )
    .unwrap();

    let output = binary()
        .env("GOOGLE_APPLICATION_CREDENTIALS", "")
        .env("CLOUDSDK_CONFIG", gcloud_dir.path())
        .args(["-topic", "ticks", "-projectid", "demo"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("cannot read credentials file"));
    assert!(stderr.contains("invalid credentials file"));
    assert!(stderr.contains(&gcloud_dir.path().display().to_string()));
}
