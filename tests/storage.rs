use std::{
    io::{Read, Write},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Barrier,
    },
    thread,
    time::Duration,
};

use anyhow::Result;
use gcs_storage::{
    testing::{FaultyObjectApi, TestStorage},
    ClientHandle,
    GcsStorage,
    MemoryObjectApi,
    ObjectApi,
    OpenMode,
    Operation,
    Storage,
    StorageConfig,
    StorageError,
};

fn config(allow_overwrite: bool) -> StorageConfig {
    let mut config = StorageConfig::new("test-bucket");
    config.path_prefix = "media".to_string();
    config.allow_overwrite = allow_overwrite;
    config
}

fn read_all(storage: &GcsStorage, name: &str) -> Result<Vec<u8>> {
    let mut content = Vec::new();
    storage.open(name, OpenMode::Read)?.read_to_end(&mut content)?;
    Ok(content)
}

#[test]
fn test_save_then_read_round_trip() -> Result<()> {
    let t = TestStorage::new(config(false))?;
    let content: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();

    let name = t.storage.save("bin/data.bin", &mut content.as_slice())?;
    assert_eq!(name, "bin/data.bin");
    assert_eq!(read_all(&t.storage, &name)?, content);
    assert_eq!(t.storage.size(&name)?, 10_000);
    Ok(())
}

#[test]
fn test_delete_twice() -> Result<()> {
    let t = TestStorage::new(config(false))?;
    t.storage.save("a.txt", &mut &b"hello"[..])?;
    assert!(t.storage.exists("a.txt")?);

    t.storage.delete("a.txt")?;
    t.storage.delete("a.txt")?;
    assert!(!t.storage.exists("a.txt")?);
    Ok(())
}

#[test]
fn test_overwrite_disallowed_keeps_original() -> Result<()> {
    let t = TestStorage::new(config(false))?;
    t.storage.save("report.pdf", &mut &b"original"[..])?;

    let name = t.storage.save("report.pdf", &mut &b"replacement"[..])?;
    assert_ne!(name, "report.pdf");
    assert!(name.starts_with("report_") && name.ends_with(".pdf"));
    assert_eq!(read_all(&t.storage, "report.pdf")?, b"original");
    assert_eq!(read_all(&t.storage, &name)?, b"replacement");
    assert_eq!(t.object(&format!("media/{}", name)).as_deref(), Some(&b"replacement"[..]));
    Ok(())
}

#[test]
fn test_overwrite_allowed_replaces() -> Result<()> {
    let t = TestStorage::new(config(true))?;
    t.storage.save("report.pdf", &mut &b"original"[..])?;

    let name = t.storage.save("report.pdf", &mut &b"replacement"[..])?;
    assert_eq!(name, "report.pdf");
    assert_eq!(read_all(&t.storage, "report.pdf")?, b"replacement");
    assert_eq!(t.api.object_names("test-bucket"), vec!["media/report.pdf".to_string()]);
    Ok(())
}

#[test]
fn test_uploads_carry_cache_control_and_content_type() -> Result<()> {
    let mut config = config(false);
    config.cache_control = "private, max-age=60".to_string();
    let t = TestStorage::new(config)?;

    t.storage.save("styles/site.css", &mut &b"body {}"[..])?;
    t.storage
        .save_with_content_type("raw", &mut &b"{}"[..], Some("application/json"))?;

    let css = t.api.get_object("test-bucket", "media/styles/site.css")?;
    assert_eq!(css.cache_control.as_deref(), Some("private, max-age=60"));
    assert_eq!(css.content_type.as_deref(), Some("text/css"));
    let raw = t.api.get_object("test-bucket", "media/raw")?;
    assert_eq!(raw.content_type.as_deref(), Some("application/json"));
    Ok(())
}

#[test]
fn test_reopen_after_close_appends() -> Result<()> {
    let t = TestStorage::new(config(false))?;
    let mut file = t.storage.open("log.txt", OpenMode::Write)?;

    file.write_all(b"first session\n")?;
    file.close()?;
    assert!(file.is_closed());
    assert_eq!(read_all(&t.storage, "log.txt")?, b"first session\n");

    file.write_all(b"second session\n")?;
    assert!(!file.is_closed());
    file.close()?;

    assert_eq!(
        read_all(&t.storage, "log.txt")?,
        b"first session\nsecond session\n"
    );
    assert_eq!(t.api.object_names("test-bucket").len(), 1);
    Ok(())
}

#[test]
fn test_write_handle_adopts_alternative_name() -> Result<()> {
    let t = TestStorage::new(config(false))?;
    t.storage.save("notes.txt", &mut &b"taken"[..])?;

    let mut file = t.storage.open("notes.txt", OpenMode::Write)?;
    file.write_all(b"mine")?;
    file.close()?;
    let name = file.name().to_string();
    assert_ne!(name, "notes.txt");
    assert_eq!(file.key(), format!("media/{}", name));

    // Later sessions keep writing to the adopted object.
    file.write_all(b" and more")?;
    file.close()?;
    assert_eq!(read_all(&t.storage, &name)?, b"mine and more");
    assert_eq!(read_all(&t.storage, "notes.txt")?, b"taken");
    assert_eq!(t.api.object_names("test-bucket").len(), 2);
    Ok(())
}

#[test]
fn test_read_handle_reopens_from_start() -> Result<()> {
    let t = TestStorage::new(config(false))?;
    t.storage.save("poem.txt", &mut &b"roses are red"[..])?;

    let mut file = t.storage.open("poem.txt", OpenMode::Read)?;
    let mut first = [0u8; 5];
    file.read_exact(&mut first)?;
    assert_eq!(&first, b"roses");
    file.close()?;

    let mut content = String::new();
    file.read_to_string(&mut content)?;
    assert_eq!(content, "roses are red");
    Ok(())
}

#[test]
fn test_open_missing_file_for_read() -> Result<()> {
    let t = TestStorage::new(config(false))?;
    let err = t.storage.open("missing.txt", OpenMode::Read).unwrap_err();
    assert!(matches!(
        err,
        StorageError::NotFound {
            operation: Operation::Open,
            ..
        }
    ));
    Ok(())
}

#[test]
fn test_mode_mismatch_is_an_io_error() -> Result<()> {
    let t = TestStorage::new(config(false))?;
    t.storage.save("a.txt", &mut &b"x"[..])?;
    let mut file = t.storage.open("a.txt", OpenMode::Read)?;
    let err = file.write(b"y").unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::Unsupported);
    Ok(())
}

#[test]
fn test_failed_close_leaves_handle_closed() -> Result<()> {
    let api = Arc::new(FaultyObjectApi::new(MemoryObjectApi::new(), 0, 403));
    let storage = GcsStorage::with_client(config(true), api.clone())?;

    let mut file = storage.open("a.txt", OpenMode::Write)?;
    file.write_all(b"data")?;
    api.fail_next(1);
    let err = file.close().unwrap_err();
    assert!(matches!(err, StorageError::Flush { .. }));
    assert!(file.is_closed());
    assert!(api.inner().object_names("test-bucket").is_empty());

    // The unsaved buffer is gone; a new session starts empty.
    file.write_all(b"retry")?;
    file.close()?;
    assert_eq!(read_all(&storage, "a.txt")?, b"retry");
    Ok(())
}

#[test]
fn test_listdir_one_level() -> Result<()> {
    let t = TestStorage::new(config(false))?;
    t.storage.save("dir/a.txt", &mut &b"a"[..])?;
    t.storage.save("dir/sub/b.txt", &mut &b"b"[..])?;
    t.storage.save("top.txt", &mut &b"t"[..])?;

    for path in ["dir/", "dir", "/dir//"] {
        let listing = t.storage.listdir(path)?;
        assert_eq!(listing.directories.into_iter().collect::<Vec<_>>(), vec!["sub"]);
        assert_eq!(listing.files.into_iter().collect::<Vec<_>>(), vec!["a.txt"]);
    }

    let root = t.storage.listdir("")?;
    assert_eq!(root.directories.into_iter().collect::<Vec<_>>(), vec!["dir"]);
    assert_eq!(root.files.into_iter().collect::<Vec<_>>(), vec!["top.txt"]);

    let empty = t.storage.listdir("nothing-here")?;
    assert!(empty.directories.is_empty() && empty.files.is_empty());
    Ok(())
}

#[test]
fn test_modified_time_tracks_updates() -> Result<()> {
    let t = TestStorage::new(config(true))?;
    t.storage.save("a.txt", &mut &b"1"[..])?;
    let first = t.storage.get_modified_time("a.txt")?;
    thread::sleep(Duration::from_millis(5));
    t.storage.save("a.txt", &mut &b"2"[..])?;
    let second = t.storage.get_modified_time("a.txt")?;
    assert!(second > first);
    assert!(t.storage.get_created_time("a.txt")? <= second);
    Ok(())
}

#[test]
fn test_transient_errors_are_retried_per_config() -> Result<()> {
    let mut cfg = config(true);
    cfg.num_retries = 3;
    cfg.retry_backoff_ms = 0;
    let api = Arc::new(FaultyObjectApi::new(MemoryObjectApi::new(), 3, 503));
    let storage = GcsStorage::with_client(cfg, api.clone())?;

    storage.save("a.txt", &mut &b"ok"[..])?;
    assert_eq!(api.calls(), 4);

    api.fail_next(4);
    let err = storage.size("a.txt").unwrap_err();
    assert!(matches!(err, StorageError::Transient { attempts: 4, .. }));
    Ok(())
}

#[test]
fn test_permanent_errors_are_not_retried() -> Result<()> {
    let mut cfg = config(true);
    cfg.num_retries = 5;
    cfg.retry_backoff_ms = 0;
    let api = Arc::new(FaultyObjectApi::new(MemoryObjectApi::new(), 1, 403));
    let storage = GcsStorage::with_client(cfg, api.clone())?;

    let err = storage.save("a.txt", &mut &b"x"[..]).unwrap_err();
    assert!(matches!(err, StorageError::Permanent { .. }));
    assert_eq!(err.key(), Some("media/a.txt"));
    assert_eq!(api.calls(), 1);
    Ok(())
}

#[test]
fn test_concurrent_operations_share_one_client() -> Result<()> {
    const THREADS: usize = 8;
    let built = Arc::new(AtomicUsize::new(0));
    let counter = built.clone();
    let storage = GcsStorage::with_client_factory(config(false), move || {
        counter.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(10));
        Ok(Arc::new(MemoryObjectApi::new()) as ClientHandle)
    })?;

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let storage = storage.clone();
            let barrier = barrier.clone();
            thread::spawn(move || -> Result<()> {
                barrier.wait();
                let name = format!("worker-{}.txt", i);
                let content = format!("from worker {}", i);
                storage.save(&name, &mut content.as_bytes())?;
                assert_eq!(read_all(&storage, &name)?, content.as_bytes());
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked")?;
    }

    assert_eq!(built.load(Ordering::SeqCst), 1);
    let listing = storage.listdir("")?;
    assert_eq!(listing.files.len(), THREADS);
    Ok(())
}

#[test]
fn test_url_uses_template_and_prefix() -> Result<()> {
    let mut cfg = config(false);
    cfg.url_template = "https://cdn.example.com/{bucket}/{name}".to_string();
    let t = TestStorage::new(cfg)?;
    assert_eq!(
        t.storage.url("images/cat photo.jpg")?,
        "https://cdn.example.com/test-bucket/media/images/cat%20photo.jpg"
    );
    assert!(matches!(
        t.storage.url("../secrets"),
        Err(StorageError::NameResolution { .. })
    ));
    Ok(())
}
