use std::{
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use hibiki::{FetchOptions, FileCache, HibikiError, ProxyCache, Source, ValidRegion};

use crate::{
    scripted::{sample_data, Fault, Length, ScriptedSource},
    setup_tracing, AssertWrapper,
};

fn fast_options() -> FetchOptions {
    FetchOptions {
        wait_interval: Duration::from_millis(200),
        error_pause: Duration::from_millis(10),
        transient_backoff: Duration::from_millis(10),
        ..Default::default()
    }
}

async fn proxy_at(
    path: &Path,
    source: ScriptedSource,
) -> anyhow::Result<ProxyCache<ScriptedSource>> {
    setup_tracing();
    let cache = FileCache::open(path).await?;
    Ok(ProxyCache::new(source, cache, fast_options()).await?)
}

async fn read_all<S: Source>(proxy: &ProxyCache<S>, from: u64) -> anyhow::Result<Vec<u8>> {
    let mut result = Vec::new();
    let mut buffer = vec![0u8; 1000];
    let mut offset = from;
    loop {
        let length = buffer.len();
        let read = proxy.read(&mut buffer, offset, length).await?;
        if read == 0 {
            break;
        }
        result.extend_from_slice(&buffer[..read]);
        offset += read as u64;
    }
    Ok(result)
}

#[tokio::test]
async fn complete_cache_is_served_without_fetching() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("video.mp4");
    let data = sample_data(5000);
    std::fs::write(&path, &data)?;

    let proxy = proxy_at(&path, ScriptedSource::new(data.clone())).await?;
    assert!(proxy.cache().is_completed().await);

    let result = read_all(&proxy, 0).await?;
    assert_eq!(result, data);
    assert_eq!(proxy.fetches_started(), 0);

    // the last chunk of a complete cache is still inside the valid region
    assert!(proxy.cache().in_range(4990).await);
    assert!(!proxy.cache().in_range(5000).await);

    Ok(())
}

#[tokio::test]
async fn stale_cache_file_is_truncated() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("video.mp4");
    std::fs::write(&path, sample_data(1234))?;

    let data = sample_data(5000);
    let proxy = proxy_at(&path, ScriptedSource::new(data.clone())).await?;
    assert!(!proxy.cache().is_completed().await);
    assert_eq!(proxy.cache().available().await?, 0);

    let result = read_all(&proxy, 0).await?;
    assert_eq!(result, data);

    Ok(())
}

#[tokio::test]
async fn cache_file_survives_unresolvable_length() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("video.mp4");
    let data = sample_data(5000);
    std::fs::write(&path, &data)?;

    let source = ScriptedSource::new(data).with_length(Length::Unresolvable);
    let proxy = proxy_at(&path, source).await?;
    assert_eq!(std::fs::metadata(&path)?.len(), 5000);
    assert_eq!(proxy.cache().region().await, ValidRegion::default());
    assert_eq!(proxy.cache().known_size().await, None);
    assert!(!proxy.cache().is_completed().await);

    Ok(())
}

#[tokio::test]
async fn leftover_bytes_are_not_served_when_length_is_unknown() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("video.mp4");
    std::fs::write(&path, vec![0xAAu8; 8000])?;

    let data = sample_data(5000);
    let source = ScriptedSource::new(data.clone()).with_length(Length::Unknown);
    let proxy = proxy_at(&path, source).await?;
    assert_eq!(proxy.cache().available().await?, 8000);
    assert_eq!(proxy.cache().region().await, ValidRegion::default());

    let result = read_all(&proxy, 0).await?;
    assert_eq!(result, data);
    proxy.wait_until_idle().await;

    // the end of the fetch fixes the size and drops the old tail
    assert_eq!(proxy.cache().known_size().await, Some(5000));
    assert_eq!(proxy.cache().available().await?, 5000);
    assert!(proxy.cache().is_completed().await);
    assert_eq!(proxy.percents_available(), Some(100));

    proxy.shutdown().await;
    assert_eq!(std::fs::read(&path)?, data);

    Ok(())
}

#[tokio::test]
async fn cold_fetch_then_cache_hit() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("video.mp4");
    let data = sample_data(20_000);

    let proxy = proxy_at(&path, ScriptedSource::new(data.clone())).await?;
    let result = read_all(&proxy, 0).await?;
    assert_eq!(result, data);
    assert_eq!(proxy.fetches_started(), 1);
    assert!(proxy.cache().is_completed().await);
    assert_eq!(proxy.percents_available(), Some(100));

    let result = read_all(&proxy, 1500).await?;
    assert_eq!(result, data[1500..]);
    assert_eq!(proxy.fetches_started(), 1);

    proxy.shutdown().await;
    assert_eq!(std::fs::read(&path)?, data);

    Ok(())
}

#[tokio::test]
async fn transient_faults_resume_at_the_same_offset() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("video.mp4");
    let data = sample_data(10_000);

    let source = ScriptedSource::new(data.clone())
        .faults([Fault::ResetAfter(1000), Fault::ResetAfter(1000)]);
    let opens = source.opens();
    let proxy = proxy_at(&path, source).await?;

    let result = read_all(&proxy, 0).await?;
    assert_eq!(result.len(), data.len());
    assert_eq!(result, data);
    assert_eq!(*opens.lock().unwrap(), vec![0, 1000, 2000]);
    assert_eq!(proxy.fetches_started(), 1);
    assert!(!proxy.is_stopped());

    Ok(())
}

#[tokio::test]
async fn unreadable_source_hits_retry_ceiling() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("video.mp4");

    let source = ScriptedSource::new(sample_data(10_000)).faults([Fault::Unreachable; 10]);
    let opens = source.opens();
    let proxy = proxy_at(&path, source).await?;

    let mut buffer = vec![0u8; 1000];
    let length = buffer.len();
    let result = proxy.read(&mut buffer, 0, length).await;
    assert!(matches!(
        result,
        Err(HibikiError::SourceUnreadable { attempts: 4 })
    ));
    assert_eq!(opens.lock().unwrap().len(), 4);
    assert!(proxy.is_stopped());
    assert!(!proxy.read_source_async(0).await);

    Ok(())
}

#[tokio::test]
async fn oversized_read_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("video.mp4");
    let proxy = proxy_at(&path, ScriptedSource::new(sample_data(10))).await?;

    let mut buffer = vec![0u8; 4];
    let result = proxy.read(&mut buffer, 0, 8).await;
    assert!(matches!(
        result,
        Err(HibikiError::InvalidBuffer {
            length: 8,
            capacity: 4
        })
    ));
    assert_eq!(proxy.fetches_started(), 0);

    Ok(())
}

#[tokio::test]
async fn shutdown_is_idempotent() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("video.mp4");
    let source = ScriptedSource::new(sample_data(50_000)).read_delay(Duration::from_millis(5));
    let proxy = proxy_at(&path, source).await?;

    assert!(proxy.read_source_async(0).await);
    proxy.shutdown().await;
    proxy.shutdown().await;
    proxy.wait_until_idle().await;

    assert!(proxy.is_stopped());
    assert!(!proxy.is_fetching());
    assert!(!proxy.read_source_async(0).await);

    let mut buffer = vec![0u8; 1000];
    let length = buffer.len();
    proxy.read(&mut buffer, 0, length).await.assert_error();

    Ok(())
}

#[tokio::test]
async fn concurrent_readers_share_one_fetch() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("video.mp4");
    let data = sample_data(8 * 1024);
    let source = ScriptedSource::new(data.clone()).read_delay(Duration::from_millis(5));
    let proxy = proxy_at(&path, source).await?;

    let mut readers = Vec::new();
    for _ in 0..8 {
        let proxy = proxy.clone();
        readers.push(tokio::spawn(async move { read_all(&proxy, 0).await }));
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(proxy.is_fetching());
    assert!(!proxy.read_source_async(0).await);

    for reader in readers {
        let result = reader.await?.assert_success();
        assert_eq!(result, data);
    }
    assert_eq!(proxy.fetches_started(), 1);

    Ok(())
}

#[tokio::test]
async fn progress_is_monotonic_and_ends_at_100() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("video.mp4");
    let data = sample_data(10_000);
    let proxy = proxy_at(&path, ScriptedSource::new(data)).await?;

    let progress = Arc::new(Mutex::new(Vec::new()));
    let recorded = progress.clone();
    proxy.set_listener(Arc::new(move |_: &Path, url: &str, percents: u8| {
        assert_eq!(url, "scripted://video.mp4");
        recorded.lock().unwrap().push(percents);
    }));

    read_all(&proxy, 0).await?;

    let progress = progress.lock().unwrap();
    assert!(progress.len() > 1);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&100));

    Ok(())
}

#[tokio::test]
async fn restart_at_offset_caches_the_tail() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("video.mp4");
    let data = sample_data(10_000);
    let source = ScriptedSource::new(data.clone());
    let opens = source.opens();
    let proxy = proxy_at(&path, source).await?;

    proxy.stop().await;
    proxy.wait_until_idle().await;
    proxy.cache().reset_to(6000).await?;
    proxy.resume().await;

    let result = read_all(&proxy, 6000).await?;
    assert_eq!(result, data[6000..]);
    assert_eq!(*opens.lock().unwrap(), vec![6000]);
    assert!(proxy.cache().in_range(6000).await);
    assert!(!proxy.cache().in_range(5999).await);
    assert!(!proxy.cache().is_completed().await);

    Ok(())
}

#[tokio::test]
async fn read_before_the_valid_region_returns_nothing() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("video.mp4");
    let proxy = proxy_at(&path, ScriptedSource::new(sample_data(10_000))).await?;

    proxy.stop().await;
    proxy.wait_until_idle().await;
    proxy.cache().reset_to(6000).await?;
    proxy.resume().await;

    let mut buffer = vec![0u8; 1000];
    let read = tokio::time::timeout(Duration::from_secs(1), proxy.read(&mut buffer, 100, 1000))
        .await??;
    assert_eq!(read, 0);
    assert_eq!(proxy.fetches_started(), 0);

    Ok(())
}
