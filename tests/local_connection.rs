//! End-to-end tests of the connection and remote-file contracts, driven
//! through the public API against the local transport.

use std::sync::Arc;

use tether::options::{self, ConnectionOptions};
use tether::{FileErrorKind, HostConnection, OperatingSystemFamily, TetherError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

async fn connect_local() -> (tempfile::TempDir, Arc<dyn HostConnection>) {
    let scratch = tempfile::tempdir().expect("scratch dir");
    let mut opts = ConnectionOptions::new();
    opts.set(
        options::TEMPORARY_DIRECTORY,
        scratch.path().to_string_lossy().as_ref(),
    )
    .unwrap();
    let connection = tether::connect("local", &opts).await.expect("connect");
    (scratch, connection)
}

#[tokio::test]
async fn round_trip_put_get() {
    let (_scratch, connection) = connect_local().await;
    let payload = b"Contents of the temporary file created during the round trip test".to_vec();

    let file = connection.temp_file("roundtrip", ".dat");
    assert!(!file.exists().await.unwrap());

    file.put(&payload).await.unwrap();

    assert!(file.exists().await.unwrap());
    assert!(!file.is_directory().await.unwrap());
    assert_eq!(file.length().await.unwrap(), payload.len() as u64);
    assert!(file.can_read().await.unwrap());
    assert!(file.can_write().await.unwrap());
    if connection.os() == OperatingSystemFamily::Unix {
        assert!(!file.can_execute().await.unwrap());
    }

    let read_back = file.read_bytes().await.unwrap();
    assert_eq!(read_back, payload);

    // The source stream is exhausted at exactly length() bytes
    let mut source = file.open_read().await.unwrap();
    let mut first = vec![0u8; payload.len()];
    source.read_exact(&mut first).await.unwrap();
    let mut rest = Vec::new();
    source.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    file.delete().await.unwrap();
    assert!(!file.exists().await.unwrap());
    connection.disconnect().await;
}

#[tokio::test]
async fn streamed_write_requires_shutdown_for_durability() {
    let (_scratch, connection) = connect_local().await;
    let file = connection.temp_file("streamed", ".bin");

    let mut sink = file.open_write().await.unwrap();
    sink.write_all(b"one chunk ").await.unwrap();
    sink.write_all(b"another chunk").await.unwrap();
    sink.shutdown().await.unwrap();

    assert_eq!(file.read_bytes().await.unwrap(), b"one chunk another chunk");

    // Overwrite, not append
    file.put(b"short").await.unwrap();
    assert_eq!(file.length().await.unwrap(), 5);
    connection.disconnect().await;
}

#[tokio::test]
async fn put_stream_copies_exactly_length_bytes() {
    let (_scratch, connection) = connect_local().await;
    let file = connection.temp_file("lengths", ".bin");

    let source = b"0123456789abcdef".to_vec();
    file.put_stream(source.as_slice(), 10).await.unwrap();
    assert_eq!(file.read_bytes().await.unwrap(), b"0123456789");

    // A source that ends early is an explicit error, not a silent short file
    let short = b"abc".to_vec();
    assert!(file.put_stream(short.as_slice(), 10).await.is_err());
    connection.disconnect().await;
}

#[tokio::test]
async fn temp_file_naming() {
    let (_scratch, connection) = connect_local().await;

    let first = connection.temp_file("prefix", "suffix");
    let second = connection.temp_file("prefix", "suffix");

    assert!(first.name().starts_with("prefix"));
    assert!(first.name().ends_with("suffix"));
    assert!(second.name().starts_with("prefix"));
    assert!(second.name().ends_with("suffix"));
    assert_ne!(first.path(), second.path());

    // Allocation alone creates nothing
    assert!(!first.exists().await.unwrap());
    connection.disconnect().await;
}

#[tokio::test]
async fn directory_nesting() {
    let (_scratch, connection) = connect_local().await;

    let base = connection.temp_file("nesting", "");
    base.mkdir().await.unwrap();

    let nested1 = base.child("nested1").unwrap();
    let nested2 = nested1.child("nested2").unwrap();
    let nested3 = nested2.child("nested3").unwrap();
    assert!(!nested3.exists().await.unwrap());

    // One-level mkdir never creates ancestors
    let err = nested3.mkdir().await.unwrap_err();
    assert_eq!(err.file_kind(), Some(FileErrorKind::ParentMissing));
    assert!(!nested3.exists().await.unwrap());

    nested3.mkdirs().await.unwrap();
    assert!(nested1.exists().await.unwrap());
    assert!(nested2.exists().await.unwrap());
    assert!(nested3.is_directory().await.unwrap());

    // mkdirs on an existing directory is fine
    nested3.mkdirs().await.unwrap();

    // ...but a file in the way is not
    let occupied = base.child("occupied").unwrap();
    occupied.put(b"contents").await.unwrap();
    assert!(occupied.child("below").unwrap().mkdirs().await.is_err());
    connection.disconnect().await;
}

#[tokio::test]
async fn listing_exactness() {
    let (_scratch, connection) = connect_local().await;

    let dir = connection.temp_file("listing", "");
    dir.mkdir().await.unwrap();
    dir.child("a").unwrap().mkdir().await.unwrap();
    dir.child("f").unwrap().put(b"file contents").await.unwrap();

    let mut names = dir.list().await.unwrap();
    names.sort();
    assert_eq!(names, vec!["a".to_string(), "f".to_string()]);

    // Listing a file or a missing path is an explicit failure
    let err = dir.child("f").unwrap().list().await.unwrap_err();
    assert_eq!(err.file_kind(), Some(FileErrorKind::NotADirectory));
    let err = dir.child("missing").unwrap().list().await.unwrap_err();
    assert_eq!(err.file_kind(), Some(FileErrorKind::NotFound));
    connection.disconnect().await;
}

#[tokio::test]
async fn deletion_guard() {
    let (_scratch, connection) = connect_local().await;

    let dir = connection.temp_file("deletion", "");
    dir.mkdir().await.unwrap();
    let inner = dir.child("inner").unwrap();
    inner.mkdir().await.unwrap();
    inner.child("keep.txt").unwrap().put(b"data").await.unwrap();

    // delete() refuses to remove a populated directory and leaves it intact
    let err = dir.delete().await.unwrap_err();
    assert_eq!(err.file_kind(), Some(FileErrorKind::DirectoryNotEmpty));
    assert!(dir.exists().await.unwrap());
    assert!(inner.child("keep.txt").unwrap().exists().await.unwrap());

    dir.delete_recursively().await.unwrap();
    assert!(!dir.exists().await.unwrap());
    assert!(!inner.exists().await.unwrap());

    // Recursive delete of an already-absent path stays quiet
    dir.delete_recursively().await.unwrap();
    connection.disconnect().await;
}

#[tokio::test]
async fn child_handles_are_pure_composition() {
    let (_scratch, connection) = connect_local().await;

    let ghost = connection.file("/definitely/not/present/anywhere");
    let child = ghost.child("deeper").unwrap();
    assert_eq!(child.name(), "deeper");
    assert!(!child.exists().await.unwrap());
    connection.disconnect().await;
}

#[tokio::test]
async fn command_execution_streams() {
    let (_scratch, connection) = connect_local().await;

    let mut process = connection.execute("cat").await.unwrap();
    let mut stdin = process.take_stdin().unwrap();
    stdin.write_all(b"echoed through stdin\n").await.unwrap();
    stdin.shutdown().await.unwrap();
    drop(stdin);

    let output = process.wait_with_output().await.unwrap();
    assert_eq!(output.stdout, "echoed through stdin\n");
    assert_eq!(output.exit_code, Some(0));

    let output = connection.run("echo out; echo err 1>&2").await.unwrap();
    assert_eq!(output.stdout.trim(), "out");
    assert_eq!(output.stderr.trim(), "err");
    connection.disconnect().await;
}

#[tokio::test]
async fn idempotent_disconnect() {
    let (_scratch, connection) = connect_local().await;

    let file = connection.temp_file("closed", ".txt");
    file.put(b"written before disconnect").await.unwrap();

    connection.disconnect().await;
    connection.disconnect().await;

    match file.exists().await {
        Err(TetherError::ConnectionClosed) => {}
        other => panic!("expected ConnectionClosed, got {:?}", other),
    }
    match connection.execute("echo hi").await {
        Err(TetherError::ConnectionClosed) => {}
        other => panic!("expected ConnectionClosed, got {:?}", other.map(|_| ())),
    }
}
